//! Statistics counters.
//!
//! Recoverable conditions (replayed votes, evictions, overfill, duplicate
//! cementing requests) are never surfaced as errors. They are counted here so
//! operators and tests can observe them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Component that owns a counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatType {
    Election,
    ElectionVote,
    ActiveElections,
    ActiveElectionsStarted,
    ActiveElectionsStopped,
    VoteCache,
    VoteRouter,
    RecentlyConfirmed,
    ConfirmingSet,
    Cementing,
    GapCache,
    Unchecked,
    BlockProcessor,
    Ledger,
    PriorityScheduler,
    OptimisticScheduler,
    HintedScheduler,
    BacklogScan,
}

impl StatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Election => "election",
            Self::ElectionVote => "election_vote",
            Self::ActiveElections => "active_elections",
            Self::ActiveElectionsStarted => "active_elections_started",
            Self::ActiveElectionsStopped => "active_elections_stopped",
            Self::VoteCache => "vote_cache",
            Self::VoteRouter => "vote_router",
            Self::RecentlyConfirmed => "recently_confirmed",
            Self::ConfirmingSet => "confirming_set",
            Self::Cementing => "cementing",
            Self::GapCache => "gap_cache",
            Self::Unchecked => "unchecked",
            Self::BlockProcessor => "block_processor",
            Self::Ledger => "ledger",
            Self::PriorityScheduler => "priority_scheduler",
            Self::OptimisticScheduler => "optimistic_scheduler",
            Self::HintedScheduler => "hinted_scheduler",
            Self::BacklogScan => "backlog_scan",
        }
    }
}

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DetailType {
    All,
    Loop,
    Insert,
    Update,
    Refresh,
    Evicted,
    Overfill,
    Cleanup,
    Trigger,
    Satisfied,
    Processed,

    // elections
    Started,
    Stopped,
    Confirmed,
    Unconfirmed,
    ConfirmOnce,
    ConfirmDependent,
    ForceConfirm,
    Passive,
    Active,
    ExpiredConfirmed,
    ExpiredUnconfirmed,
    EraseOldest,
    WinnerChanged,
    Publish,
    ReplaceByWeight,
    Priority,
    Hinted,
    Optimistic,
    Manual,

    // votes
    Vote,
    Replay,
    Indeterminate,
    Ignored,
    VoteNew,
    VoteCached,
    Fill,

    // cementing
    Cemented,
    AlreadyCemented,
    Batch,
    BlockNotFound,
    NotifyCemented,
    NotifyAlreadyCemented,
    NotifyDropped,
    Bounded,
    Unbounded,
    Timer,

    // block processing
    Progress,
    GapPrevious,
    GapSource,
    Old,
    Fork,
    Unreceivable,
    NegativeSpend,
    BalanceMismatch,
    Invalid,
    Force,
    Rollback,
    RollbackFailed,

    // scheduling
    Activated,
    ActivateFailed,
    InsertPriority,
    InsertPrioritySuccess,
    InsertOptimistic,
    InsertOptimisticSuccess,
    CandidateDuplicate,
    InsertHinted,
    InsertHintedSuccess,
    AlreadyActive,
    RecentlyConfirmed,
    MissingBlock,
    DependentUnconfirmed,
    Cooldown,
}

impl DetailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Loop => "loop",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Refresh => "refresh",
            Self::Evicted => "evicted",
            Self::Overfill => "overfill",
            Self::Cleanup => "cleanup",
            Self::Trigger => "trigger",
            Self::Satisfied => "satisfied",
            Self::Processed => "processed",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Confirmed => "confirmed",
            Self::Unconfirmed => "unconfirmed",
            Self::ConfirmOnce => "confirm_once",
            Self::ConfirmDependent => "confirm_dependent",
            Self::ForceConfirm => "force_confirm",
            Self::Passive => "passive",
            Self::Active => "active",
            Self::ExpiredConfirmed => "expired_confirmed",
            Self::ExpiredUnconfirmed => "expired_unconfirmed",
            Self::EraseOldest => "erase_oldest",
            Self::WinnerChanged => "winner_changed",
            Self::Publish => "publish",
            Self::ReplaceByWeight => "replace_by_weight",
            Self::Priority => "priority",
            Self::Hinted => "hinted",
            Self::Optimistic => "optimistic",
            Self::Manual => "manual",
            Self::Vote => "vote",
            Self::Replay => "replay",
            Self::Indeterminate => "indeterminate",
            Self::Ignored => "ignored",
            Self::VoteNew => "vote_new",
            Self::VoteCached => "vote_cached",
            Self::Fill => "fill",
            Self::Cemented => "cemented",
            Self::AlreadyCemented => "already_cemented",
            Self::Batch => "batch",
            Self::BlockNotFound => "block_not_found",
            Self::NotifyCemented => "notify_cemented",
            Self::NotifyAlreadyCemented => "notify_already_cemented",
            Self::NotifyDropped => "notify_dropped",
            Self::Bounded => "bounded",
            Self::Unbounded => "unbounded",
            Self::Timer => "timer",
            Self::Progress => "progress",
            Self::GapPrevious => "gap_previous",
            Self::GapSource => "gap_source",
            Self::Old => "old",
            Self::Fork => "fork",
            Self::Unreceivable => "unreceivable",
            Self::NegativeSpend => "negative_spend",
            Self::BalanceMismatch => "balance_mismatch",
            Self::Invalid => "invalid",
            Self::Force => "force",
            Self::Rollback => "rollback",
            Self::RollbackFailed => "rollback_failed",
            Self::Activated => "activated",
            Self::ActivateFailed => "activate_failed",
            Self::InsertPriority => "insert_priority",
            Self::InsertPrioritySuccess => "insert_priority_success",
            Self::InsertOptimistic => "insert_optimistic",
            Self::InsertOptimisticSuccess => "insert_optimistic_success",
            Self::CandidateDuplicate => "candidate_duplicate",
            Self::InsertHinted => "insert_hinted",
            Self::InsertHintedSuccess => "insert_hinted_success",
            Self::AlreadyActive => "already_active",
            Self::RecentlyConfirmed => "recently_confirmed",
            Self::MissingBlock => "missing_block",
            Self::DependentUnconfirmed => "dependent_unconfirmed",
            Self::Cooldown => "cooldown",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    #[default]
    In,
    Out,
}

type StatKey = (StatType, DetailType, Direction);

/// A thread-safe counter collection.
///
/// Counters are created lazily on first increment; reads of a counter that
/// was never touched return zero.
#[derive(Default)]
pub struct Stats {
    counters: RwLock<HashMap<StatKey, AtomicU64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, stat_type: StatType, detail: DetailType) {
        self.add_dir(stat_type, detail, Direction::In, 1);
    }

    pub fn inc_dir(&self, stat_type: StatType, detail: DetailType, dir: Direction) {
        self.add_dir(stat_type, detail, dir, 1);
    }

    pub fn add(&self, stat_type: StatType, detail: DetailType, value: u64) {
        self.add_dir(stat_type, detail, Direction::In, value);
    }

    pub fn add_dir(&self, stat_type: StatType, detail: DetailType, dir: Direction, value: u64) {
        if value == 0 {
            return;
        }
        let key = (stat_type, detail, dir);
        {
            let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(counter) = counters.get(&key) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn count(&self, stat_type: StatType, detail: DetailType) -> u64 {
        self.count_dir(stat_type, detail, Direction::In)
    }

    pub fn count_dir(&self, stat_type: StatType, detail: DetailType, dir: Direction) -> u64 {
        self.counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(stat_type, detail, dir))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.counters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Stable, sorted copy of every non-zero counter.
    pub fn snapshot(&self) -> BTreeMap<StatKey, u64> {
        self.counters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (*k, v.load(Ordering::Relaxed)))
            .filter(|(_, v)| *v > 0)
            .collect()
    }
}
