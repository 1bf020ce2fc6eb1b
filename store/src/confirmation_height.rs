//! Confirmation height storage trait.

use crate::StoreError;
use lattice_types::{Account, BlockHash};
use serde::{Deserialize, Serialize};

/// Cemented prefix of one account chain.
///
/// `height` never decreases and never exceeds the account's block count.
/// `frontier` is the hash of the block at `height`, zero when nothing is cemented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    pub frontier: BlockHash,
}

impl ConfirmationHeightInfo {
    pub fn new(height: u64, frontier: BlockHash) -> Self {
        Self { height, frontier }
    }
}

pub trait ConfirmationHeightStore {
    fn get_confirmation_height(
        &self,
        account: &Account,
    ) -> Result<Option<ConfirmationHeightInfo>, StoreError>;

    fn iter_confirmation_heights(
        &self,
    ) -> Result<Vec<(Account, ConfirmationHeightInfo)>, StoreError>;
}
