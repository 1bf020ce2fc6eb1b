//! Consensus: resolves forks by representative voting.
//!
//! - Each account delegates its balance as voting weight to a representative.
//! - Representatives vote on blocks; an election for a root confirms the
//!   block whose weight leads by the quorum delta of online stake.
//! - Final votes lock a representative's choice and are required to confirm.
//!
//! ## Module overview
//!
//! - [`election`]: per-root election state machine (passive, active, confirmed, expired).
//! - [`active_elections`]: bounded container of running elections plus the request loop.
//! - [`vote_router`]: routes vote hashes to their elections via weak references.
//! - [`vote_cache`]: holds votes that arrive before their election.
//! - [`vote_info`]: per-representative vote record and vote result codes.
//! - [`recently_confirmed`]: bounded FIFO of recently confirmed roots.
//! - [`online_reps`]: online stake and quorum delta.
//! - [`buckets`]: balance tiers feeding the priority scheduler.
//! - [`priority_scheduler`]: starts elections for accounts in tier order.
//! - [`optimistic_scheduler`]: starts elections on heads of long unconfirmed chains.
//! - [`hinted_scheduler`]: starts elections for blocks with heavy cached votes.
//! - [`error`]: consensus error types.

pub mod active_elections;
pub mod buckets;
pub mod election;
pub mod error;
pub mod hinted_scheduler;
pub mod online_reps;
pub mod optimistic_scheduler;
pub mod priority_scheduler;
pub mod recently_confirmed;
pub mod vote_cache;
pub mod vote_info;
pub mod vote_router;

pub use active_elections::{
    ActiveElections, ActiveElectionsConfig, ConfirmationSink, InsertResult,
};
pub use buckets::{Bucket, Buckets};
pub use election::{
    ConfirmationAction, Election, ElectionBehavior, ElectionContext, ElectionState,
    ElectionStatus, ElectionStatusType, ElectionTimings, WinnerChangedAction,
};
pub use error::ConsensusError;
pub use hinted_scheduler::{HintedScheduler, HintedSchedulerConfig};
pub use online_reps::{OnlineReps, OnlineRepsConfig};
pub use optimistic_scheduler::{OptimisticScheduler, OptimisticSchedulerConfig};
pub use priority_scheduler::{PriorityScheduler, PrioritySchedulerConfig};
pub use recently_confirmed::RecentlyConfirmed;
pub use vote_cache::{CachedVote, TopEntry, VoteCache, VoteCacheConfig};
pub use vote_info::{VoteCode, VoteInfo, VoteSource};
pub use vote_router::{VoteProcessedCallback, VoteRouter};
