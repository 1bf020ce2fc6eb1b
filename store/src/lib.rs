//! Abstract storage traits for the lattice ledger.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the workspace depends only on the traits.
//!
//! Reads are individual lookups. Writes are collected into a
//! [`WriteBatch`] and applied atomically by [`LedgerStore::commit`], so a
//! processed block and its account update, or a run of confirmation heights,
//! become visible together or not at all.

pub mod account;
pub mod block;
pub mod confirmation_height;
pub mod error;
pub mod pending;
pub mod write_batch;

pub use account::{AccountInfo, AccountStore};
pub use block::BlockStore;
pub use confirmation_height::{ConfirmationHeightInfo, ConfirmationHeightStore};
pub use error::StoreError;
pub use pending::{PendingInfo, PendingKey, PendingStore};
pub use write_batch::{WriteBatch, WriteOp};

/// The full set of tables a ledger needs, plus atomic batch commit.
pub trait LedgerStore:
    BlockStore + AccountStore + ConfirmationHeightStore + PendingStore + Send + Sync
{
    /// Apply every operation in `batch` in one write transaction.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
