//! Blocks of the account lattice.
//!
//! Every account owns its own chain. A block is one of five kinds; queries
//! such as "which balance does this block set" are answered by matching on
//! the kind instead of visiting it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

use crate::hash::blake2b_256;
use crate::{Account, Amount, BlockHash, QualifiedRoot, Root, Signature, Timestamp};

/// Discriminant of [`Block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Send,
    Receive,
    Open,
    Change,
    State,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Open => "open",
            Self::Change => "change",
            Self::State => "state",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Send => 2,
            Self::Receive => 3,
            Self::Open => 4,
            Self::Change => 5,
            Self::State => 6,
        }
    }
}

/// Link field of a state block: the destination account of a send or the
/// source hash of a receive.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link([u8; 32]);

impl Link {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_account(&self) -> Account {
        Account::new(self.0)
    }

    pub fn as_block_hash(&self) -> BlockHash {
        BlockHash::new(self.0)
    }
}

impl From<Account> for Link {
    fn from(account: Account) -> Self {
        Self(*account.as_bytes())
    }
}

impl From<BlockHash> for Link {
    fn from(hash: BlockHash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({:?})", self.as_block_hash())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    /// Balance of the account after the send.
    pub balance: Amount,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    pub source: BlockHash,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBlock {
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
    pub signature: Signature,
    pub work: u64,
}

/// Universal block: carries the full account state, the meaning of `link`
/// follows from the balance change against the previous block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Link,
    pub signature: Signature,
    pub work: u64,
}

/// A block of any kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

impl Block {
    pub fn new_send(previous: BlockHash, destination: Account, balance: Amount) -> Self {
        Self::Send(SendBlock {
            previous,
            destination,
            balance,
            signature: Signature::ZERO,
            work: 0,
        })
    }

    pub fn new_receive(previous: BlockHash, source: BlockHash) -> Self {
        Self::Receive(ReceiveBlock {
            previous,
            source,
            signature: Signature::ZERO,
            work: 0,
        })
    }

    pub fn new_open(source: BlockHash, representative: Account, account: Account) -> Self {
        Self::Open(OpenBlock {
            source,
            representative,
            account,
            signature: Signature::ZERO,
            work: 0,
        })
    }

    pub fn new_change(previous: BlockHash, representative: Account) -> Self {
        Self::Change(ChangeBlock {
            previous,
            representative,
            signature: Signature::ZERO,
            work: 0,
        })
    }

    pub fn new_state(
        account: Account,
        previous: BlockHash,
        representative: Account,
        balance: Amount,
        link: Link,
    ) -> Self {
        Self::State(StateBlock {
            account,
            previous,
            representative,
            balance,
            link,
            signature: Signature::ZERO,
            work: 0,
        })
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            Self::Send(_) => BlockType::Send,
            Self::Receive(_) => BlockType::Receive,
            Self::Open(_) => BlockType::Open,
            Self::Change(_) => BlockType::Change,
            Self::State(_) => BlockType::State,
        }
    }

    /// Content hash. Signature and work are excluded so that republishing a
    /// block with different work keeps its identity.
    pub fn hash(&self) -> BlockHash {
        let tag = [self.block_type().tag()];
        let bytes = match self {
            Self::Send(b) => blake2b_256(&[
                &tag,
                b.previous.as_bytes(),
                b.destination.as_bytes(),
                &b.balance.raw().to_be_bytes(),
            ]),
            Self::Receive(b) => blake2b_256(&[&tag, b.previous.as_bytes(), b.source.as_bytes()]),
            Self::Open(b) => blake2b_256(&[
                &tag,
                b.source.as_bytes(),
                b.representative.as_bytes(),
                b.account.as_bytes(),
            ]),
            Self::Change(b) => blake2b_256(&[
                &tag,
                b.previous.as_bytes(),
                b.representative.as_bytes(),
            ]),
            Self::State(b) => blake2b_256(&[
                &tag,
                b.account.as_bytes(),
                b.previous.as_bytes(),
                b.representative.as_bytes(),
                &b.balance.raw().to_be_bytes(),
                b.link.as_bytes(),
            ]),
        };
        BlockHash::new(bytes)
    }

    /// Previous block in the account chain, zero for the first block.
    pub fn previous(&self) -> BlockHash {
        match self {
            Self::Send(b) => b.previous,
            Self::Receive(b) => b.previous,
            Self::Open(_) => BlockHash::ZERO,
            Self::Change(b) => b.previous,
            Self::State(b) => b.previous,
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Self::Open(_) => true,
            Self::State(b) => b.previous.is_zero(),
            _ => false,
        }
    }

    pub fn root(&self) -> Root {
        match self {
            Self::Open(b) => b.account.into(),
            Self::State(b) if b.previous.is_zero() => b.account.into(),
            other => other.previous().into(),
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous())
    }

    /// Account named by the block itself. Legacy send/receive/change blocks
    /// only learn their account from the sideband.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Self::Open(b) => Some(b.account),
            Self::State(b) => Some(b.account),
            _ => None,
        }
    }

    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Self::Send(b) => Some(b.balance),
            Self::State(b) => Some(b.balance),
            _ => None,
        }
    }

    pub fn representative_field(&self) -> Option<Account> {
        match self {
            Self::Open(b) => Some(b.representative),
            Self::Change(b) => Some(b.representative),
            Self::State(b) => Some(b.representative),
            _ => None,
        }
    }

    pub fn source_field(&self) -> Option<BlockHash> {
        match self {
            Self::Receive(b) => Some(b.source),
            Self::Open(b) => Some(b.source),
            _ => None,
        }
    }

    pub fn destination_field(&self) -> Option<Account> {
        match self {
            Self::Send(b) => Some(b.destination),
            _ => None,
        }
    }

    pub fn link_field(&self) -> Option<Link> {
        match self {
            Self::State(b) => Some(b.link),
            _ => None,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Self::Send(b) => &b.signature,
            Self::Receive(b) => &b.signature,
            Self::Open(b) => &b.signature,
            Self::Change(b) => &b.signature,
            Self::State(b) => &b.signature,
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Self::Send(b) => b.work,
            Self::Receive(b) => b.work,
            Self::Open(b) => b.work,
            Self::Change(b) => b.work,
            Self::State(b) => b.work,
        }
    }

    pub fn set_work(&mut self, work: u64) {
        match self {
            Self::Send(b) => b.work = work,
            Self::Receive(b) => b.work = work,
            Self::Open(b) => b.work = work,
            Self::Change(b) => b.work = work,
            Self::State(b) => b.work = work,
        }
    }
}

/// Subtype of a stored block, derived by the ledger when it is accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDetails {
    pub is_send: bool,
    pub is_receive: bool,
}

/// Ledger-derived metadata stored alongside a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSideband {
    pub account: Account,
    /// 1-based position in the account chain.
    pub height: u64,
    /// Next block in the chain, zero while this block is the head.
    pub successor: BlockHash,
    /// Account balance after this block.
    pub balance: Amount,
    /// Local arrival time.
    pub timestamp: Timestamp,
    pub details: BlockDetails,
}

/// A block that has been accepted into the ledger, with its sideband.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBlock {
    block: Block,
    sideband: BlockSideband,
}

impl SavedBlock {
    pub fn new(block: Block, sideband: BlockSideband) -> Self {
        Self { block, sideband }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn into_block(self) -> Block {
        self.block
    }

    pub fn sideband(&self) -> &BlockSideband {
        &self.sideband
    }

    pub fn set_successor(&mut self, successor: BlockHash) {
        self.sideband.successor = successor;
    }

    pub fn account(&self) -> Account {
        self.sideband.account
    }

    pub fn height(&self) -> u64 {
        self.sideband.height
    }

    pub fn successor(&self) -> BlockHash {
        self.sideband.successor
    }

    pub fn balance(&self) -> Amount {
        self.sideband.balance
    }

    pub fn timestamp(&self) -> Timestamp {
        self.sideband.timestamp
    }

    pub fn is_send(&self) -> bool {
        self.sideband.details.is_send
    }

    pub fn is_receive(&self) -> bool {
        self.sideband.details.is_receive
    }

    /// Hash of the send block this block receives, if it is a receive.
    pub fn source(&self) -> Option<BlockHash> {
        match &self.block {
            Block::Receive(b) => Some(b.source),
            Block::Open(b) => Some(b.source),
            Block::State(b) if self.sideband.details.is_receive => Some(b.link.as_block_hash()),
            _ => None,
        }
    }

    /// Destination account, if this block is a send.
    pub fn destination(&self) -> Option<Account> {
        match &self.block {
            Block::Send(b) => Some(b.destination),
            Block::State(b) if self.sideband.details.is_send => Some(b.link.as_account()),
            _ => None,
        }
    }
}

impl Deref for SavedBlock {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.block
    }
}
