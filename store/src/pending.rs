//! Receivable (pending) entry storage trait.

use crate::StoreError;
use lattice_types::{Account, Amount, BlockHash};
use serde::{Deserialize, Serialize};

/// Identifies one unreceived send: the receiving account and the send's hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PendingKey {
    pub destination: Account,
    pub send_hash: BlockHash,
}

impl PendingKey {
    pub fn new(destination: Account, send_hash: BlockHash) -> Self {
        Self {
            destination,
            send_hash,
        }
    }

    /// Fixed-width key: destination followed by send hash.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.destination.as_bytes());
        bytes[32..].copy_from_slice(self.send_hash.as_bytes());
        bytes
    }
}

/// An incoming transfer that the destination has not yet received.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
}

pub trait PendingStore {
    fn get_pending(&self, key: &PendingKey) -> Result<Option<PendingInfo>, StoreError>;
}
