//! Nullable store: thread-safe in-memory storage for testing.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;

use lattice_store::{
    AccountInfo, AccountStore, BlockStore, ConfirmationHeightInfo, ConfirmationHeightStore,
    LedgerStore, PendingInfo, PendingKey, PendingStore, StoreError, WriteBatch, WriteOp,
};
use lattice_types::{Account, BlockHash, SavedBlock};

#[derive(Clone, Default)]
struct Tables {
    blocks: HashMap<BlockHash, SavedBlock>,
    accounts: BTreeMap<Account, AccountInfo>,
    confirmation_height: BTreeMap<Account, ConfirmationHeightInfo>,
    pending: BTreeMap<PendingKey, PendingInfo>,
}

/// An in-memory ledger store for testing.
///
/// All tables live behind one mutex, so a committed batch is visible to
/// readers all at once.
#[derive(Default)]
pub struct NullStore {
    tables: Mutex<Tables>,
    commits: Mutex<u64>,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-empty batches committed so far.
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock().unwrap()
    }

    /// Number of receivable entries.
    pub fn pending_count(&self) -> usize {
        self.tables.lock().unwrap().pending.len()
    }
}

fn apply(tables: &mut Tables, op: WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::PutBlock(block) => {
            tables.blocks.insert(block.hash(), block);
        }
        WriteOp::SetSuccessor { hash, successor } => {
            let block = tables
                .blocks
                .get_mut(&hash)
                .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
            block.set_successor(successor);
        }
        WriteOp::PutAccount { account, info } => {
            tables.accounts.insert(account, info);
        }
        WriteOp::PutConfirmationHeight { account, info } => {
            tables.confirmation_height.insert(account, info);
        }
        WriteOp::PutPending { key, info } => {
            tables.pending.insert(key, info);
        }
        WriteOp::DeletePending(key) => {
            tables.pending.remove(&key);
        }
        WriteOp::DeleteBlock(hash) => {
            tables.blocks.remove(&hash);
        }
        WriteOp::DeleteAccount(account) => {
            tables.accounts.remove(&account);
        }
    }
    Ok(())
}

impl LedgerStore for NullStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.lock().unwrap();
        // Staged on a copy so a failing op leaves the tables untouched.
        let mut staged = tables.clone();
        for op in batch.into_ops() {
            apply(&mut staged, op)?;
        }
        *tables = staged;
        *self.commits.lock().unwrap() += 1;
        Ok(())
    }
}

impl BlockStore for NullStore {
    fn get_block(&self, hash: &BlockHash) -> Result<Option<SavedBlock>, StoreError> {
        Ok(self.tables.lock().unwrap().blocks.get(hash).cloned())
    }

    fn block_exists(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        Ok(self.tables.lock().unwrap().blocks.contains_key(hash))
    }

    fn block_count(&self) -> Result<u64, StoreError> {
        Ok(self.tables.lock().unwrap().blocks.len() as u64)
    }
}

impl AccountStore for NullStore {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>, StoreError> {
        Ok(self.tables.lock().unwrap().accounts.get(account).cloned())
    }

    fn account_count(&self) -> Result<u64, StoreError> {
        Ok(self.tables.lock().unwrap().accounts.len() as u64)
    }

    fn iter_accounts(&self) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .accounts
            .iter()
            .map(|(a, i)| (*a, i.clone()))
            .collect())
    }

    fn iter_accounts_paged(
        &self,
        cursor: Option<&Account>,
        limit: usize,
    ) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        let tables = self.tables.lock().unwrap();
        let lower = match cursor {
            Some(account) => Bound::Excluded(*account),
            None => Bound::Unbounded,
        };
        Ok(tables
            .accounts
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(a, i)| (*a, i.clone()))
            .collect())
    }
}

impl ConfirmationHeightStore for NullStore {
    fn get_confirmation_height(
        &self,
        account: &Account,
    ) -> Result<Option<ConfirmationHeightInfo>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .confirmation_height
            .get(account)
            .copied())
    }

    fn iter_confirmation_heights(
        &self,
    ) -> Result<Vec<(Account, ConfirmationHeightInfo)>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .confirmation_height
            .iter()
            .map(|(a, i)| (*a, *i))
            .collect())
    }
}

impl PendingStore for NullStore {
    fn get_pending(&self, key: &PendingKey) -> Result<Option<PendingInfo>, StoreError> {
        Ok(self.tables.lock().unwrap().pending.get(key).copied())
    }
}
