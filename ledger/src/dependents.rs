//! Blocks a block depends on.
//!
//! There can be at most two dependencies per block: its predecessor in the
//! account chain and, for receives, the send block being received.

use lattice_types::{BlockHash, SavedBlock};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DependentBlocks {
    previous: BlockHash,
    source: BlockHash,
}

impl DependentBlocks {
    pub fn new(previous: BlockHash, source: BlockHash) -> Self {
        Self { previous, source }
    }

    /// Dependencies of a block already in the ledger. The sideband tells
    /// state receives apart from sends and changes.
    pub fn of(block: &SavedBlock) -> Self {
        Self::new(block.previous(), block.source().unwrap_or_default())
    }

    pub fn previous(&self) -> Option<BlockHash> {
        (!self.previous.is_zero()).then_some(self.previous)
    }

    pub fn source(&self) -> Option<BlockHash> {
        (!self.source.is_zero()).then_some(self.source)
    }

    /// Non-zero dependencies, previous first.
    pub fn iter(&self) -> impl Iterator<Item = BlockHash> {
        self.previous().into_iter().chain(self.source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Account, Amount, Block, BlockDetails, BlockSideband, Link, Timestamp};

    fn sideband(details: BlockDetails) -> BlockSideband {
        BlockSideband {
            account: Account::from(1),
            height: 2,
            successor: BlockHash::ZERO,
            balance: Amount::new(5),
            timestamp: Timestamp::EPOCH,
            details,
        }
    }

    #[test]
    fn state_receive_depends_on_link() {
        let block = Block::new_state(
            Account::from(1),
            BlockHash::from(10),
            Account::from(2),
            Amount::new(5),
            Link::from(BlockHash::from(20)),
        );
        let saved = SavedBlock::new(
            block,
            sideband(BlockDetails {
                is_send: false,
                is_receive: true,
            }),
        );
        let deps = DependentBlocks::of(&saved);
        assert_eq!(
            deps.iter().collect::<Vec<_>>(),
            vec![BlockHash::from(10), BlockHash::from(20)]
        );
    }

    #[test]
    fn state_send_link_is_not_a_dependency() {
        let block = Block::new_state(
            Account::from(1),
            BlockHash::from(10),
            Account::from(2),
            Amount::new(1),
            Link::from(Account::from(3)),
        );
        let saved = SavedBlock::new(
            block,
            sideband(BlockDetails {
                is_send: true,
                is_receive: false,
            }),
        );
        let deps = DependentBlocks::of(&saved);
        assert_eq!(deps.previous(), Some(BlockHash::from(10)));
        assert_eq!(deps.source(), None);
    }

    #[test]
    fn open_has_only_source() {
        let block = Block::new_open(BlockHash::from(7), Account::from(2), Account::from(1));
        let saved = SavedBlock::new(block, sideband(BlockDetails::default()));
        assert_eq!(
            DependentBlocks::of(&saved).iter().collect::<Vec<_>>(),
            vec![BlockHash::from(7)]
        );
    }
}
