//! Genesis block creation: the first block on each network.
//!
//! The genesis block is an open block that holds the entire supply. It
//! differs per `NetworkId` (live, test, dev) so that each network has a
//! unique, deterministic genesis hash. A fresh store is seeded with it and it
//! is cemented from the start.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use lattice_types::{
    Account, Amount, Block, BlockDetails, BlockHash, BlockSideband, NetworkId, SavedBlock,
    Timestamp,
};

/// Total supply, all of it held by the genesis account at height 1.
pub const GENESIS_AMOUNT: Amount = Amount::MAX;

/// The genesis account and its open block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Genesis {
    pub account: Account,
    pub block: SavedBlock,
}

impl Genesis {
    /// Genesis owned by `account`, delegating to itself.
    pub fn new(account: Account) -> Self {
        // The open block's source is a synthetic hash: genesis receives from no one.
        let block = Block::new_open(BlockHash::new(*account.as_bytes()), account, account);
        let sideband = BlockSideband {
            account,
            height: 1,
            successor: BlockHash::ZERO,
            balance: GENESIS_AMOUNT,
            timestamp: Timestamp::EPOCH,
            details: BlockDetails::default(),
        };
        Self {
            account,
            block: SavedBlock::new(block, sideband),
        }
    }

    /// The canonical genesis of `network`.
    pub fn for_network(network: NetworkId) -> Self {
        Self::new(genesis_account(network))
    }

    pub fn hash(&self) -> BlockHash {
        self.block.hash()
    }
}

/// Canonical genesis account per network, derived from the network name.
pub fn genesis_account(network: NetworkId) -> Account {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(b"lattice-genesis");
    hasher.update(network.as_str().as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Account::new(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_differs_per_network() {
        let live = Genesis::for_network(NetworkId::Live);
        let test = Genesis::for_network(NetworkId::Test);
        let dev = Genesis::for_network(NetworkId::Dev);
        assert_ne!(live.hash(), test.hash());
        assert_ne!(test.hash(), dev.hash());
        assert_eq!(dev, Genesis::for_network(NetworkId::Dev));
    }

    #[test]
    fn genesis_holds_supply_at_height_one() {
        let genesis = Genesis::new(Account::from(1));
        assert_eq!(genesis.block.height(), 1);
        assert_eq!(genesis.block.balance(), GENESIS_AMOUNT);
        assert_eq!(genesis.block.account(), Account::from(1));
        assert!(genesis.block.is_open());
    }
}
