//! LMDB implementation of ConfirmationHeightStore.

use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use lattice_store::confirmation_height::{ConfirmationHeightInfo, ConfirmationHeightStore};
use lattice_store::StoreError;
use lattice_types::Account;

use crate::account::account_from_key;
use crate::LmdbError;

pub struct LmdbConfirmationHeightStore {
    pub(crate) env: Arc<Env>,
    pub(crate) confirmation_height_db: Database<Bytes, Bytes>,
}

impl ConfirmationHeightStore for LmdbConfirmationHeightStore {
    fn get_confirmation_height(
        &self,
        account: &Account,
    ) -> Result<Option<ConfirmationHeightInfo>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .confirmation_height_db
            .get(&rtxn, account.as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => {
                let info: ConfirmationHeightInfo =
                    bincode::deserialize(bytes).map_err(LmdbError::from)?;
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    fn iter_confirmation_heights(
        &self,
    ) -> Result<Vec<(Account, ConfirmationHeightInfo)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self
            .confirmation_height_db
            .iter(&rtxn)
            .map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in iter {
            let (key, val) = entry.map_err(LmdbError::from)?;
            let account = account_from_key(key, "confirmation_height")?;
            let info: ConfirmationHeightInfo =
                bincode::deserialize(val).map_err(LmdbError::from)?;
            results.push((account, info));
        }
        Ok(results)
    }
}
