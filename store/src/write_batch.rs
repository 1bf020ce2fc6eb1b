//! Write batching: a list of store mutations applied in one transaction.
//!
//! Callers build a [`WriteBatch`] and hand it to [`LedgerStore::commit`].
//! Backends must apply either every operation or none of them.
//!
//! [`LedgerStore::commit`]: crate::LedgerStore::commit

use lattice_types::{Account, BlockHash, SavedBlock};

use crate::{AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey};

/// One mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    PutBlock(SavedBlock),
    /// Point an already stored block at its successor.
    SetSuccessor {
        hash: BlockHash,
        successor: BlockHash,
    },
    PutAccount {
        account: Account,
        info: AccountInfo,
    },
    PutConfirmationHeight {
        account: Account,
        info: ConfirmationHeightInfo,
    },
    PutPending {
        key: PendingKey,
        info: PendingInfo,
    },
    DeletePending(PendingKey),
    DeleteBlock(BlockHash),
    DeleteAccount(Account),
}

/// An ordered list of [`WriteOp`]s. Later operations see earlier ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_block(&mut self, block: SavedBlock) -> &mut Self {
        self.ops.push(WriteOp::PutBlock(block));
        self
    }

    pub fn set_successor(&mut self, hash: BlockHash, successor: BlockHash) -> &mut Self {
        self.ops.push(WriteOp::SetSuccessor { hash, successor });
        self
    }

    pub fn put_account(&mut self, account: Account, info: AccountInfo) -> &mut Self {
        self.ops.push(WriteOp::PutAccount { account, info });
        self
    }

    pub fn put_confirmation_height(
        &mut self,
        account: Account,
        info: ConfirmationHeightInfo,
    ) -> &mut Self {
        self.ops
            .push(WriteOp::PutConfirmationHeight { account, info });
        self
    }

    pub fn put_pending(&mut self, key: PendingKey, info: PendingInfo) -> &mut Self {
        self.ops.push(WriteOp::PutPending { key, info });
        self
    }

    pub fn delete_pending(&mut self, key: PendingKey) -> &mut Self {
        self.ops.push(WriteOp::DeletePending(key));
        self
    }

    pub fn delete_block(&mut self, hash: BlockHash) -> &mut Self {
        self.ops.push(WriteOp::DeleteBlock(hash));
        self
    }

    pub fn delete_account(&mut self, account: Account) -> &mut Self {
        self.ops.push(WriteOp::DeleteAccount(account));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Amount;

    #[test]
    fn operations_keep_insertion_order() {
        let key = PendingKey::new(Account::from(2), BlockHash::from(7));
        let mut batch = WriteBatch::new();
        batch
            .put_pending(
                key,
                PendingInfo {
                    source: Account::from(1),
                    amount: Amount::new(10),
                },
            )
            .delete_pending(key);
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.ops()[0], WriteOp::PutPending { .. }));
        assert_eq!(batch.ops()[1], WriteOp::DeletePending(key));
    }

    #[test]
    fn pending_key_bytes_sort_by_destination_first() {
        let a = PendingKey::new(Account::from(1), BlockHash::from(9));
        let b = PendingKey::new(Account::from(2), BlockHash::from(0));
        assert!(a.to_bytes() < b.to_bytes());
        assert!(a < b);
    }
}
