//! Block storage trait.

use crate::StoreError;
use lattice_types::{BlockHash, SavedBlock};

/// Trait for block storage operations (the block lattice).
pub trait BlockStore {
    /// Retrieve a block and its sideband by hash.
    fn get_block(&self, hash: &BlockHash) -> Result<Option<SavedBlock>, StoreError>;

    fn block_exists(&self, hash: &BlockHash) -> Result<bool, StoreError>;

    /// Total number of blocks in the store.
    fn block_count(&self) -> Result<u64, StoreError>;
}
