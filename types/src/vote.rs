//! Representative votes.

use serde::{Deserialize, Serialize};

use crate::{Account, BlockHash, Signature};

/// A signed statement by a representative endorsing one or more blocks.
///
/// Signatures are checked before a vote reaches this crate's consumers; the
/// field is carried for rebroadcast only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub account: Account,
    /// Milliseconds since epoch, or [`Vote::FINAL_TIMESTAMP`].
    pub timestamp: u64,
    pub hashes: Vec<BlockHash>,
    pub signature: Signature,
}

impl Vote {
    /// Sentinel timestamp of a final vote. A final vote can never be replaced.
    pub const FINAL_TIMESTAMP: u64 = u64::MAX;

    /// Largest number of hashes a single vote may name.
    pub const MAX_HASHES: usize = 255;

    pub fn new(account: Account, timestamp: u64, hashes: Vec<BlockHash>) -> Self {
        Self {
            account,
            timestamp,
            hashes,
            signature: Signature::ZERO,
        }
    }

    pub fn new_final(account: Account, hashes: Vec<BlockHash>) -> Self {
        Self::new(account, Self::FINAL_TIMESTAMP, hashes)
    }

    pub fn is_final(&self) -> bool {
        is_final_timestamp(self.timestamp)
    }
}

pub fn is_final_timestamp(timestamp: u64) -> bool {
    timestamp == Vote::FINAL_TIMESTAMP
}
