//! Vote data: a representative's latest vote within one election, and the
//! result codes vote processing reports back.

use std::time::Instant;

use lattice_types::BlockHash;

/// Outcome of applying one vote to one hash.
///
/// None of these are errors. A vote that cannot be applied yet is cached and
/// replayed later; a stale one is dropped and counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoteCode {
    /// The vote was recorded by an election.
    Vote,
    /// Not newer than the representative's last vote, or the hash is
    /// already confirmed.
    Replay,
    /// No election exists for the hash, or the representative is too light
    /// to be counted. The vote was cached.
    Indeterminate,
    /// A live vote inside the representative's cooldown window.
    Ignored,
}

impl VoteCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vote => "vote",
            Self::Replay => "replay",
            Self::Indeterminate => "indeterminate",
            Self::Ignored => "ignored",
        }
    }
}

/// Where a vote came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoteSource {
    /// Received from the network.
    Live,
    /// Replayed out of the vote cache when an election started.
    Cache,
}

/// The latest vote a representative cast within an election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteInfo {
    /// Local time the vote was recorded, for cooldown.
    pub time: Instant,
    /// Timestamp carried by the vote, in milliseconds or the final sentinel.
    pub timestamp: u64,
    pub hash: BlockHash,
}

impl VoteInfo {
    pub fn new(timestamp: u64, hash: BlockHash) -> Self {
        Self {
            time: Instant::now(),
            timestamp,
            hash,
        }
    }

    pub fn is_final(&self) -> bool {
        lattice_types::vote::is_final_timestamp(self.timestamp)
    }
}
