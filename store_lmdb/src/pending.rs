//! LMDB implementation of PendingStore.
//!
//! Key format: `destination.as_bytes() ++ send_hash.as_bytes()` (64 bytes), so
//! every receivable entry of one destination is contiguous.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use lattice_store::pending::{PendingInfo, PendingKey, PendingStore};
use lattice_store::StoreError;

use crate::LmdbError;

pub struct LmdbPendingStore {
    pub(crate) env: Arc<Env>,
    pub(crate) pending_db: Database<Bytes, Bytes>,
}

impl PendingStore for LmdbPendingStore {
    fn get_pending(&self, key: &PendingKey) -> Result<Option<PendingInfo>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .pending_db
            .get(&rtxn, &key.to_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => {
                let info: PendingInfo = bincode::deserialize(bytes).map_err(LmdbError::from)?;
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }
}
