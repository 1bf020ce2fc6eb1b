//! Ledger fixture for tests across the workspace.
//!
//! Wraps a [`Ledger`] over an in-memory [`NullStore`] with a dev genesis, plus
//! helpers that build and process blocks, panicking if the ledger rejects them.

use std::sync::Arc;

use lattice_nullables::NullStore;
use lattice_types::{Account, Amount, Block, BlockHash, SavedBlock};

use lattice_store::ConfirmationHeightInfo;

use crate::{Genesis, Ledger, ProcessResult};

pub struct LedgerContext {
    pub ledger: Arc<Ledger>,
    pub store: Arc<NullStore>,
}

impl LedgerContext {
    pub fn new() -> Self {
        Self::with_genesis(Genesis::new(Account::from(1)))
    }

    pub fn with_genesis(genesis: Genesis) -> Self {
        let store = Arc::new(NullStore::new());
        let ledger = Ledger::new(store.clone(), genesis).unwrap();
        Self {
            ledger: Arc::new(ledger),
            store,
        }
    }

    pub fn genesis_account(&self) -> Account {
        self.ledger.genesis().account
    }

    pub fn head(&self, account: Account) -> BlockHash {
        self.ledger
            .account_info(&account)
            .unwrap()
            .map(|i| i.head)
            .unwrap_or_default()
    }

    pub fn balance(&self, account: Account) -> Amount {
        self.ledger
            .account_info(&account)
            .unwrap()
            .map(|i| i.balance)
            .unwrap_or_default()
    }

    /// Process `block`, which must be accepted.
    pub fn process(&self, block: Block) -> SavedBlock {
        match self.ledger.process(&block).unwrap() {
            ProcessResult::Progress(saved) => saved,
            other => panic!("block {} rejected: {}", block.hash(), other.as_str()),
        }
    }

    /// Unprocessed legacy send of `amount` from the head of `from`.
    pub fn send_block(&self, from: Account, to: Account, amount: Amount) -> Block {
        Block::new_send(self.head(from), to, self.balance(from) - amount)
    }

    pub fn send(&self, from: Account, to: Account, amount: Amount) -> SavedBlock {
        self.process(self.send_block(from, to, amount))
    }

    /// Open `account` by receiving `source`.
    pub fn open(&self, account: Account, source: BlockHash, representative: Account) -> SavedBlock {
        self.process(Block::new_open(source, representative, account))
    }

    /// Receive `source` on an already opened `account`.
    pub fn receive(&self, account: Account, source: BlockHash) -> SavedBlock {
        self.process(Block::new_receive(self.head(account), source))
    }

    pub fn change(&self, account: Account, representative: Account) -> SavedBlock {
        self.process(Block::new_change(self.head(account), representative))
    }

    /// Raise the confirmation height of `hash`'s account to cover it.
    ///
    /// A receive's source must already be cemented; order calls sources
    /// first.
    pub fn cement(&self, hash: &BlockHash) {
        let block = self.ledger.block(hash).unwrap().expect("block to cement");
        if let Some(source) = block.source() {
            assert!(
                self.ledger.block_confirmed(&source).unwrap(),
                "source {source} of {hash} is not cemented"
            );
        }
        if self.ledger.block_confirmed(hash).unwrap() {
            return;
        }
        self.ledger
            .write_confirmation_heights(&[(
                block.account(),
                ConfirmationHeightInfo::new(block.height(), *hash),
            )])
            .unwrap();
    }

    /// Fund and open `account` from genesis, returning (send, open).
    pub fn fund(&self, account: Account, amount: Amount) -> (SavedBlock, SavedBlock) {
        let send = self.send(self.genesis_account(), account, amount);
        let open = self.open(account, send.hash(), account);
        (send, open)
    }
}

impl Default for LedgerContext {
    fn default() -> Self {
        Self::new()
    }
}
