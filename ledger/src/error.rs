use lattice_types::{Account, BlockHash};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("account not found: {0}")]
    AccountNotFound(Account),

    #[error("confirmation height {height} exceeds block count {block_count} for {account}")]
    HeightAboveBlockCount {
        account: Account,
        height: u64,
        block_count: u64,
    },

    #[error("confirmation height for {account} would decrease from {current} to {requested}")]
    HeightDecrease {
        account: Account,
        current: u64,
        requested: u64,
    },

    #[error("cannot roll back cemented block {0}")]
    RollbackCemented(BlockHash),

    #[error("storage error: {0}")]
    Storage(#[from] lattice_store::StoreError),
}
