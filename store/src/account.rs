//! Account storage trait.

use crate::StoreError;
use lattice_types::{Account, Amount, BlockHash, Timestamp};
use serde::{Deserialize, Serialize};

/// Per-account information stored in the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Hash of the latest block in this account's chain.
    pub head: BlockHash,
    /// Representative this account delegates its weight to.
    pub representative: Account,
    /// First block of the chain.
    pub open_block: BlockHash,
    pub balance: Amount,
    /// Time the head last changed.
    pub modified: Timestamp,
    /// Number of blocks in this account's chain.
    pub block_count: u64,
}

/// Trait for account storage operations.
pub trait AccountStore {
    fn get_account(&self, account: &Account) -> Result<Option<AccountInfo>, StoreError>;
    fn account_count(&self) -> Result<u64, StoreError>;
    /// All accounts, ordered by account.
    fn iter_accounts(&self) -> Result<Vec<(Account, AccountInfo)>, StoreError>;
    /// Up to `limit` accounts strictly after `cursor`, ordered by account.
    fn iter_accounts_paged(
        &self,
        cursor: Option<&Account>,
        limit: usize,
    ) -> Result<Vec<(Account, AccountInfo)>, StoreError>;
}
