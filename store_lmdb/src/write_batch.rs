//! Atomic commit of a [`WriteBatch`] into one LMDB write transaction.
//!
//! Every operation of the batch runs inside a single `RwTxn`. If any
//! operation fails the transaction is dropped without commit, which aborts
//! it, so readers never observe a partially applied batch.

use heed::RwTxn;

use lattice_store::{
    AccountInfo, AccountStore, BlockStore, ConfirmationHeightInfo, ConfirmationHeightStore,
    LedgerStore, PendingInfo, PendingKey, PendingStore, StoreError, WriteBatch, WriteOp,
};
use lattice_types::{Account, BlockHash, SavedBlock};

use crate::block::decode_block;
use crate::environment::LmdbStore;
use crate::LmdbError;

impl LmdbStore {
    fn apply(&self, txn: &mut RwTxn<'_>, op: WriteOp) -> Result<(), LmdbError> {
        let env = &self.environment;
        match op {
            WriteOp::PutBlock(block) => {
                let bytes = bincode::serialize(&block)?;
                env.blocks_db.put(txn, block.hash().as_bytes(), &bytes)?;
            }
            WriteOp::SetSuccessor { hash, successor } => {
                let mut block = match env.blocks_db.get(txn, hash.as_bytes())? {
                    Some(bytes) => decode_block(bytes)?,
                    None => {
                        return Err(LmdbError::Corruption {
                            db: "blocks",
                            reason: format!("successor update for missing block {hash}"),
                        })
                    }
                };
                block.set_successor(successor);
                let bytes = bincode::serialize(&block)?;
                env.blocks_db.put(txn, hash.as_bytes(), &bytes)?;
            }
            WriteOp::PutAccount { account, info } => {
                let bytes = bincode::serialize(&info)?;
                env.accounts_db.put(txn, account.as_bytes(), &bytes)?;
            }
            WriteOp::PutConfirmationHeight { account, info } => {
                let bytes = bincode::serialize(&info)?;
                env.confirmation_height_db
                    .put(txn, account.as_bytes(), &bytes)?;
            }
            WriteOp::PutPending { key, info } => {
                let bytes = bincode::serialize(&info)?;
                env.pending_db.put(txn, &key.to_bytes(), &bytes)?;
            }
            WriteOp::DeletePending(key) => {
                env.pending_db.delete(txn, &key.to_bytes())?;
            }
            WriteOp::DeleteBlock(hash) => {
                env.blocks_db.delete(txn, hash.as_bytes())?;
            }
            WriteOp::DeleteAccount(account) => {
                env.accounts_db.delete(txn, account.as_bytes())?;
            }
        }
        Ok(())
    }
}

impl LedgerStore for LmdbStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        let mut txn = self.environment.env().write_txn().map_err(LmdbError::from)?;
        for op in batch.into_ops() {
            self.apply(&mut txn, op)?;
        }
        txn.commit().map_err(LmdbError::from)?;
        tracing::trace!(count, "committed write batch");
        Ok(())
    }
}

impl BlockStore for LmdbStore {
    fn get_block(&self, hash: &BlockHash) -> Result<Option<SavedBlock>, StoreError> {
        self.blocks.get_block(hash)
    }

    fn block_exists(&self, hash: &BlockHash) -> Result<bool, StoreError> {
        self.blocks.block_exists(hash)
    }

    fn block_count(&self) -> Result<u64, StoreError> {
        self.blocks.block_count()
    }
}

impl AccountStore for LmdbStore {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>, StoreError> {
        self.accounts.get_account(account)
    }

    fn account_count(&self) -> Result<u64, StoreError> {
        self.accounts.account_count()
    }

    fn iter_accounts(&self) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        self.accounts.iter_accounts()
    }

    fn iter_accounts_paged(
        &self,
        cursor: Option<&Account>,
        limit: usize,
    ) -> Result<Vec<(Account, AccountInfo)>, StoreError> {
        self.accounts.iter_accounts_paged(cursor, limit)
    }
}

impl ConfirmationHeightStore for LmdbStore {
    fn get_confirmation_height(
        &self,
        account: &Account,
    ) -> Result<Option<ConfirmationHeightInfo>, StoreError> {
        self.confirmation_height.get_confirmation_height(account)
    }

    fn iter_confirmation_heights(
        &self,
    ) -> Result<Vec<(Account, ConfirmationHeightInfo)>, StoreError> {
        self.confirmation_height.iter_confirmation_heights()
    }
}

impl PendingStore for LmdbStore {
    fn get_pending(&self, key: &PendingKey) -> Result<Option<PendingInfo>, StoreError> {
        self.pending.get_pending(key)
    }
}
