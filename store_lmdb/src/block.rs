//! LMDB implementation of BlockStore.
//!
//! Key: the 32-byte block hash. Value: `bincode(SavedBlock)`.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use lattice_store::block::BlockStore;
use lattice_store::StoreError;
use lattice_types::{BlockHash, SavedBlock};

use crate::LmdbError;

pub struct LmdbBlockStore {
    pub(crate) env: Arc<Env>,
    pub(crate) blocks_db: Database<Bytes, Bytes>,
}

pub(crate) fn decode_block(bytes: &[u8]) -> Result<SavedBlock, LmdbError> {
    Ok(bincode::deserialize(bytes)?)
}

impl BlockStore for LmdbBlockStore {
    fn get_block(&self, hash: &BlockHash) -> Result<Option<SavedBlock>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .blocks_db
            .get(&rtxn, hash.as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => Ok(Some(decode_block(bytes)?)),
            None => Ok(None),
        }
    }

    fn block_exists(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let found = self
            .blocks_db
            .get(&rtxn, hash.as_bytes())
            .map_err(LmdbError::from)?
            .is_some();
        Ok(found)
    }

    fn block_count(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let count = self.blocks_db.len(&rtxn).map_err(LmdbError::from)?;
        Ok(count)
    }
}
