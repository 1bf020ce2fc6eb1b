//! LMDB implementation of AccountStore.

use std::ops::Bound;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env};

use lattice_store::account::{AccountInfo, AccountStore};
use lattice_store::StoreError;
use lattice_types::Account;

use crate::LmdbError;

pub struct LmdbAccountStore {
    pub(crate) env: Arc<Env>,
    pub(crate) accounts_db: Database<Bytes, Bytes>,
}

/// Decode a 32-byte account key.
pub(crate) fn account_from_key(key: &[u8], db: &'static str) -> Result<Account, LmdbError> {
    let bytes: [u8; 32] = key.try_into().map_err(|_| LmdbError::Corruption {
        db,
        reason: format!("account key has length {}", key.len()),
    })?;
    Ok(Account::new(bytes))
}

impl AccountStore for LmdbAccountStore {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        match self
            .accounts_db
            .get(&rtxn, account.as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => {
                let info: AccountInfo = bincode::deserialize(bytes).map_err(LmdbError::from)?;
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    fn account_count(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let count = self.accounts_db.len(&rtxn).map_err(LmdbError::from)?;
        Ok(count)
    }

    fn iter_accounts(&self) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let iter = self.accounts_db.iter(&rtxn).map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for entry in iter {
            let (key, val) = entry.map_err(LmdbError::from)?;
            let account = account_from_key(key, "accounts")?;
            let info: AccountInfo = bincode::deserialize(val).map_err(LmdbError::from)?;
            results.push((account, info));
        }
        Ok(results)
    }

    fn iter_accounts_paged(
        &self,
        cursor: Option<&Account>,
        limit: usize,
    ) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let lower = match cursor {
            Some(account) => Bound::Excluded(account.as_bytes().as_slice()),
            None => Bound::Unbounded,
        };
        let range = (lower, Bound::Unbounded);
        let iter = self
            .accounts_db
            .range(&rtxn, &range)
            .map_err(LmdbError::from)?;
        let mut results = Vec::with_capacity(limit.min(1024));
        for entry in iter.take(limit) {
            let (key, val) = entry.map_err(LmdbError::from)?;
            let account = account_from_key(key, "accounts")?;
            let info: AccountInfo = bincode::deserialize(val).map_err(LmdbError::from)?;
            results.push((account, info));
        }
        Ok(results)
    }
}
