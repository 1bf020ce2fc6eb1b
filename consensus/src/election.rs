//! Election state machine: manages the lifecycle of one consensus election.
//!
//! An election owns every competing block seen for one qualified root and
//! the latest vote of each representative. The tally is always recomputed
//! from those latest votes using the ledger's representative weights, so a
//! representative is counted exactly once no matter how often it re-votes.
//!
//! ```text
//! passive ──> active ──> confirmed ──> expired_confirmed
//!    │          │
//!    └──────────┴──────> expired_unconfirmed
//! ```
//!
//! A block is confirmed once it leads the runner-up by the quorum delta
//! (67% of online stake) and its final-vote weight also reaches that delta.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, Block, BlockHash, NetworkId, QualifiedRoot, Root};
use lattice_utils::{DetailType, StatType, Stats};
use tracing::{debug, trace};

use crate::online_reps::OnlineReps;
use crate::vote_cache::VoteCache;
use crate::vote_info::{VoteCode, VoteInfo, VoteSource};
use crate::vote_router::VoteRouter;

/// Most competing blocks an election retains for its root.
pub const MAX_BLOCKS: usize = 10;

/// Passive elections become active after this many base latencies.
const PASSIVE_DURATION_FACTOR: u32 = 5;

/// Why an election was started. Each behavior has its own admission limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElectionBehavior {
    /// Scheduled by account balance and age.
    Priority,
    /// Started explicitly, never limited.
    Manual,
    /// Started because cached votes already carry weight.
    Hinted,
    /// Started for a long unconfirmed chain, skipping ahead to its head.
    Optimistic,
}

impl ElectionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Manual => "manual",
            Self::Hinted => "hinted",
            Self::Optimistic => "optimistic",
        }
    }

    pub(crate) fn detail(&self) -> DetailType {
        match self {
            Self::Priority => DetailType::Priority,
            Self::Manual => DetailType::Manual,
            Self::Hinted => DetailType::Hinted,
            Self::Optimistic => DetailType::Optimistic,
        }
    }
}

/// The lifecycle state of an election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionState {
    /// Created, waiting for votes to arrive.
    Passive,
    /// Actively soliciting votes.
    Active,
    /// Reached quorum; removed on the next tick.
    Confirmed,
    /// Confirmed and flushed. Terminal.
    ExpiredConfirmed,
    /// Timed out or was stopped without confirmation. Terminal.
    ExpiredUnconfirmed,
}

impl ElectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Active => "active",
            Self::Confirmed => "confirmed",
            Self::ExpiredConfirmed => "expired_confirmed",
            Self::ExpiredUnconfirmed => "expired_unconfirmed",
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed | Self::ExpiredConfirmed)
    }

    fn can_transition(self, to: Self) -> bool {
        use ElectionState::*;
        matches!(
            (self, to),
            (Passive, Active)
                | (Passive, Confirmed)
                | (Passive, ExpiredUnconfirmed)
                | (Active, Confirmed)
                | (Active, ExpiredUnconfirmed)
                | (Confirmed, ExpiredConfirmed)
        )
    }

    pub(crate) fn detail(&self) -> DetailType {
        match self {
            Self::Passive => DetailType::Passive,
            Self::Active => DetailType::Active,
            Self::Confirmed => DetailType::Confirmed,
            Self::ExpiredConfirmed => DetailType::ExpiredConfirmed,
            Self::ExpiredUnconfirmed => DetailType::ExpiredUnconfirmed,
        }
    }
}

/// How an election ended, or that it has not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ElectionStatusType {
    #[default]
    Ongoing,
    /// Confirmed by votes.
    ActiveConfirmedQuorum,
    /// Confirmed because the winner was cemented through a dependent.
    ActiveConfirmationHeight,
    /// Cemented without any election.
    InactiveConfirmationHeight,
    /// Removed without confirmation.
    Stopped,
}

impl ElectionStatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::ActiveConfirmedQuorum => "active_confirmed_quorum",
            Self::ActiveConfirmationHeight => "active_confirmation_height",
            Self::InactiveConfirmationHeight => "inactive_confirmation_height",
            Self::Stopped => "stopped",
        }
    }
}

/// Summary of an election, complete once it is confirmed.
#[derive(Clone, Debug)]
pub struct ElectionStatus {
    pub winner: Arc<Block>,
    /// Weight behind the winner when the election ended.
    pub tally: Amount,
    /// Final-vote weight behind the winner when the election ended.
    pub final_tally: Amount,
    pub duration: Duration,
    pub voter_count: usize,
    pub block_count: usize,
    pub status_type: ElectionStatusType,
}

impl ElectionStatus {
    pub fn new(winner: Arc<Block>, status_type: ElectionStatusType) -> Self {
        Self {
            winner,
            tally: Amount::ZERO,
            final_tally: Amount::ZERO,
            duration: Duration::ZERO,
            voter_count: 0,
            block_count: 1,
            status_type,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElectionTimings {
    pub base_latency: Duration,
    /// Lifetime of priority and manual elections.
    pub normal_ttl: Duration,
    /// Lifetime of hinted and optimistic elections.
    pub short_ttl: Duration,
}

impl ElectionTimings {
    pub fn for_network(network: NetworkId) -> Self {
        Self {
            base_latency: network.base_latency(),
            normal_ttl: Duration::from_secs(5 * 60),
            short_ttl: Duration::from_secs(30),
        }
    }

    pub fn passive_duration(&self) -> Duration {
        self.base_latency * PASSIVE_DURATION_FACTOR
    }

    pub fn time_to_live(&self, behavior: ElectionBehavior) -> Duration {
        match behavior {
            ElectionBehavior::Priority | ElectionBehavior::Manual => self.normal_ttl,
            ElectionBehavior::Hinted | ElectionBehavior::Optimistic => self.short_ttl,
        }
    }
}

/// Collaborators every election of a node shares.
pub struct ElectionContext {
    pub network: NetworkId,
    pub timings: ElectionTimings,
    pub ledger: Arc<Ledger>,
    pub online_reps: Arc<OnlineReps>,
    pub vote_cache: Arc<Mutex<VoteCache>>,
    pub vote_router: Arc<VoteRouter>,
    pub stats: Arc<Stats>,
}

/// Invoked exactly once, outside the election lock, when an election confirms.
pub type ConfirmationAction = Box<dyn Fn(&ElectionStatus) + Send + Sync>;

/// Invoked outside the election lock with the new winner whenever votes
/// move the election to a different block.
pub type WinnerChangedAction = Box<dyn Fn(&Arc<Block>) + Send + Sync>;

struct ElectionData {
    state: ElectionState,
    state_start: Instant,
    status: ElectionStatus,
    last_blocks: HashMap<BlockHash, Arc<Block>>,
    /// Latest vote per representative.
    last_votes: HashMap<Account, VoteInfo>,
    last_tally: HashMap<BlockHash, Amount>,
    /// Final-vote weight behind the current leader.
    final_weight: Amount,
}

/// A single consensus election for one qualified root.
pub struct Election {
    id: u64,
    qualified_root: QualifiedRoot,
    root: Root,
    behavior: ElectionBehavior,
    election_start: Instant,
    ctx: Arc<ElectionContext>,
    confirmation_action: Option<ConfirmationAction>,
    winner_changed_action: Option<WinnerChangedAction>,
    data: Mutex<ElectionData>,
}

impl Election {
    /// Create a passive election with `block` as the initial winner.
    pub fn new(
        id: u64,
        block: Arc<Block>,
        behavior: ElectionBehavior,
        ctx: Arc<ElectionContext>,
        confirmation_action: Option<ConfirmationAction>,
    ) -> Self {
        let hash = block.hash();
        let now = Instant::now();
        // The null account's vote keeps the initial block in every tally.
        let last_votes = HashMap::from([(Account::ZERO, VoteInfo::new(0, hash))]);
        let data = ElectionData {
            state: ElectionState::Passive,
            state_start: now,
            status: ElectionStatus::new(block.clone(), ElectionStatusType::Ongoing),
            last_blocks: HashMap::from([(hash, block.clone())]),
            last_votes,
            last_tally: HashMap::new(),
            final_weight: Amount::ZERO,
        };
        Self {
            id,
            qualified_root: block.qualified_root(),
            root: block.root(),
            behavior,
            election_start: now,
            ctx,
            confirmation_action,
            winner_changed_action: None,
            data: Mutex::new(data),
        }
    }

    pub fn with_winner_changed(mut self, action: WinnerChangedAction) -> Self {
        self.winner_changed_action = Some(action);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn qualified_root(&self) -> &QualifiedRoot {
        &self.qualified_root
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn behavior(&self) -> ElectionBehavior {
        self.behavior
    }

    pub fn election_start(&self) -> Instant {
        self.election_start
    }

    pub fn duration(&self) -> Duration {
        self.election_start.elapsed()
    }

    pub fn time_to_live(&self) -> Duration {
        self.ctx.timings.time_to_live(self.behavior)
    }

    pub fn state(&self) -> ElectionState {
        self.data.lock().unwrap().state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state().is_confirmed()
    }

    /// Expired without confirmation.
    pub fn failed(&self) -> bool {
        self.state() == ElectionState::ExpiredUnconfirmed
    }

    pub fn winner(&self) -> Arc<Block> {
        self.data.lock().unwrap().status.winner.clone()
    }

    pub fn status(&self) -> ElectionStatus {
        self.data.lock().unwrap().status.clone()
    }

    pub fn votes(&self) -> HashMap<Account, VoteInfo> {
        self.data.lock().unwrap().last_votes.clone()
    }

    pub fn blocks(&self) -> HashMap<BlockHash, Arc<Block>> {
        self.data.lock().unwrap().last_blocks.clone()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.data.lock().unwrap().last_blocks.contains_key(hash)
    }

    pub fn find(&self, hash: &BlockHash) -> Option<Arc<Block>> {
        self.data.lock().unwrap().last_blocks.get(hash).cloned()
    }

    /// Current tally, heaviest first.
    pub fn tally(&self) -> Vec<(Amount, BlockHash)> {
        let mut data = self.data.lock().unwrap();
        self.tally_impl(&mut data)
    }

    /// Final-vote weight behind the current leader as of the last tally.
    pub fn final_weight(&self) -> Amount {
        self.data.lock().unwrap().final_weight
    }

    // ── Votes ───────────────────────────────────────────────────────────

    /// Apply `representative`'s vote for `hash`.
    pub fn vote(
        &self,
        representative: &Account,
        timestamp: u64,
        hash: &BlockHash,
        source: VoteSource,
    ) -> VoteCode {
        let weight = self.ctx.ledger.weight(representative);
        if !self.ctx.network.is_dev() && weight <= self.ctx.online_reps.minimum_principal_weight() {
            self.ctx
                .stats
                .inc(StatType::ElectionVote, DetailType::Indeterminate);
            return VoteCode::Indeterminate;
        }

        let mut data = self.data.lock().unwrap();
        if let Some(last) = data.last_votes.get(representative) {
            if last.timestamp > timestamp {
                self.ctx.stats.inc(StatType::ElectionVote, DetailType::Replay);
                return VoteCode::Replay;
            }
            if last.timestamp == timestamp && !(last.hash < *hash) {
                self.ctx.stats.inc(StatType::ElectionVote, DetailType::Replay);
                return VoteCode::Replay;
            }

            // A final vote replacing a non-final one is never held back.
            let max_vote = lattice_types::vote::is_final_timestamp(timestamp) && last.timestamp < timestamp;
            let past_cooldown = match source {
                VoteSource::Cache => true,
                VoteSource::Live => last.time.elapsed() >= self.cooldown_time(weight),
            };
            if !max_vote && !past_cooldown {
                self.ctx.stats.inc(StatType::ElectionVote, DetailType::Ignored);
                return VoteCode::Ignored;
            }
        }

        data.last_votes
            .insert(*representative, VoteInfo::new(timestamp, *hash));
        self.ctx.stats.inc(StatType::ElectionVote, DetailType::Vote);
        trace!(
            root = %self.qualified_root,
            %hash,
            representative = %representative,
            timestamp,
            ?source,
            "vote applied"
        );

        if !data.state.is_confirmed() {
            self.confirm_if_quorum(data);
        }
        VoteCode::Vote
    }

    /// Minimum spacing between two live votes of one representative. Heavier
    /// representatives may re-vote sooner.
    fn cooldown_time(&self, weight: Amount) -> Duration {
        let online_stake = self.ctx.online_reps.online_stake();
        if weight > online_stake.scaled(5, 100) {
            Duration::from_secs(1)
        } else if weight > online_stake.scaled(1, 100) {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(15)
        }
    }

    fn tally_impl(&self, data: &mut ElectionData) -> Vec<(Amount, BlockHash)> {
        let mut block_weights: HashMap<BlockHash, Amount> = HashMap::new();
        let mut final_weights: HashMap<BlockHash, Amount> = HashMap::new();
        for (rep, info) in &data.last_votes {
            let weight = self.ctx.ledger.weight(rep);
            let total = block_weights.entry(info.hash).or_default();
            *total = total.saturating_add(weight);
            if info.is_final() {
                let total = final_weights.entry(info.hash).or_default();
                *total = total.saturating_add(weight);
            }
        }

        let mut sorted: Vec<(Amount, BlockHash)> =
            block_weights.iter().map(|(h, w)| (*w, *h)).collect();
        sorted.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        data.last_tally = block_weights;
        data.final_weight = sorted
            .first()
            .and_then(|(_, leader)| final_weights.get(leader))
            .copied()
            .unwrap_or_default();
        sorted
    }

    fn have_quorum(tally: &[(Amount, BlockHash)], delta: Amount) -> bool {
        let first = tally.first().map(|(w, _)| *w).unwrap_or_default();
        let second = tally.get(1).map(|(w, _)| *w).unwrap_or_default();
        first.saturating_sub(second) >= delta
    }

    fn confirm_if_quorum(&self, mut data: MutexGuard<'_, ElectionData>) {
        let tally = self.tally_impl(&mut data);
        let Some(&(leader_weight, leader)) = tally.first() else {
            return;
        };
        let sum = tally
            .iter()
            .fold(Amount::ZERO, |acc, (w, _)| acc.saturating_add(*w));
        let delta = self.ctx.online_reps.delta();

        let mut changed = None;
        if sum >= delta && leader != data.status.winner.hash() {
            if let Some(block) = data.last_blocks.get(&leader).cloned() {
                debug!(root = %self.qualified_root, winner = %leader, "election winner changed");
                data.status.winner = block.clone();
                self.ctx
                    .stats
                    .inc(StatType::Election, DetailType::WinnerChanged);
                changed = Some(block);
            }
        }

        let leader_is_winner = leader == data.status.winner.hash();
        if leader_is_winner && Self::have_quorum(&tally, delta) && data.final_weight >= delta {
            data.status.tally = leader_weight;
            data.status.final_tally = data.final_weight;
            self.confirm_once(data, ElectionStatusType::ActiveConfirmedQuorum);
        } else {
            drop(data);
        }

        if let (Some(block), Some(action)) = (changed, &self.winner_changed_action) {
            action(&block);
        }
    }

    /// Move to `Confirmed`, release the lock and run the confirmation action.
    /// Does nothing if the election already left the undecided states.
    fn confirm_once(&self, mut data: MutexGuard<'_, ElectionData>, status_type: ElectionStatusType) {
        let current = data.state;
        if !Self::state_change(&mut data, current, ElectionState::Confirmed) {
            return;
        }

        let winner_hash = data.status.winner.hash();
        if data.status.tally.is_zero() {
            data.status.tally = data.last_tally.get(&winner_hash).copied().unwrap_or_default();
        }
        data.status.duration = self.election_start.elapsed();
        data.status.block_count = data.last_blocks.len();
        data.status.voter_count = data.last_votes.len();
        data.status.status_type = status_type;
        let status = data.status.clone();
        drop(data);

        self.ctx.stats.inc(StatType::Election, DetailType::ConfirmOnce);
        debug!(
            root = %self.qualified_root,
            winner = %winner_hash,
            behavior = self.behavior.as_str(),
            status = status_type.as_str(),
            "election confirmed"
        );
        if let Some(action) = &self.confirmation_action {
            action(&status);
        }
    }

    /// Confirm if `hash` is the current winner. Used when the winner got
    /// cemented through a dependent block.
    pub fn try_confirm(&self, hash: &BlockHash) -> bool {
        let data = self.data.lock().unwrap();
        if data.status.winner.hash() != *hash || data.state.is_confirmed() {
            return false;
        }
        self.ctx
            .stats
            .inc(StatType::Election, DetailType::ConfirmDependent);
        self.confirm_once(data, ElectionStatusType::ActiveConfirmationHeight);
        true
    }

    /// Confirm the current winner regardless of tally.
    pub fn force_confirm(&self) {
        let data = self.data.lock().unwrap();
        self.ctx.stats.inc(StatType::Election, DetailType::ForceConfirm);
        self.confirm_once(data, ElectionStatusType::ActiveConfirmedQuorum);
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Add a competing block for this root.
    ///
    /// Returns true when the block was not added: the election is confirmed,
    /// the block is already present (its stored copy is refreshed), or the
    /// election is full and no candidate could be displaced.
    pub fn publish(&self, block: &Arc<Block>) -> bool {
        let mut data = self.data.lock().unwrap();
        if data.state.is_confirmed() {
            return true;
        }
        let hash = block.hash();
        if data.last_blocks.len() >= MAX_BLOCKS
            && !data.last_blocks.contains_key(&hash)
            && !self.replace_by_weight(&mut data, &hash)
        {
            return true;
        }

        match data.last_blocks.entry(hash) {
            Entry::Occupied(mut existing) => {
                existing.insert(block.clone());
                if data.status.winner.hash() == hash {
                    data.status.winner = block.clone();
                }
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(block.clone());
                self.ctx.stats.inc(StatType::Election, DetailType::Publish);
                false
            }
        }
    }

    /// Make room for `hash` by dropping the lowest-tally candidate that is
    /// not the winner, if the vote cache already gives `hash` more weight.
    fn replace_by_weight(&self, data: &mut ElectionData, hash: &BlockHash) -> bool {
        let winner_hash = data.status.winner.hash();
        let mut sorted: Vec<(BlockHash, Amount)> = data
            .last_blocks
            .keys()
            .map(|h| (*h, data.last_tally.get(h).copied().unwrap_or_default()))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let Some(&(lowest_hash, lowest_weight)) =
            sorted.iter().rev().find(|(h, _)| *h != winner_hash)
        else {
            return false;
        };

        let incoming_tally = self.ctx.vote_cache.lock().unwrap().tally(hash);
        if incoming_tally <= lowest_weight {
            return false;
        }

        self.remove_block(data, &lowest_hash);
        self.ctx
            .stats
            .inc(StatType::Election, DetailType::ReplaceByWeight);
        debug!(root = %self.qualified_root, removed = %lowest_hash, added = %hash, "replaced fork by weight");
        true
    }

    fn remove_block(&self, data: &mut ElectionData, hash: &BlockHash) {
        if data.status.winner.hash() == *hash {
            return;
        }
        if data.last_blocks.remove(hash).is_some() {
            data.last_votes.retain(|_, v| v.hash != *hash);
            data.last_tally.remove(hash);
            self.ctx.vote_router.disconnect(hash);
        }
    }

    // ── State ───────────────────────────────────────────────────────────

    fn state_change(data: &mut ElectionData, expected: ElectionState, desired: ElectionState) -> bool {
        if data.state != expected || !expected.can_transition(desired) {
            return false;
        }
        data.state = desired;
        data.state_start = Instant::now();
        true
    }

    pub fn transition_active(&self) -> bool {
        let mut data = self.data.lock().unwrap();
        Self::state_change(&mut data, ElectionState::Passive, ElectionState::Active)
    }

    /// Advance time-driven state. Returns true once the election is finished
    /// and should be removed from the container.
    pub fn transition_time(&self) -> bool {
        let mut data = self.data.lock().unwrap();
        let mut finished = false;
        match data.state {
            ElectionState::Passive => {
                if data.state_start.elapsed() >= self.ctx.timings.passive_duration() {
                    Self::state_change(&mut data, ElectionState::Passive, ElectionState::Active);
                }
            }
            ElectionState::Active => {}
            ElectionState::Confirmed => {
                finished = true;
                Self::state_change(
                    &mut data,
                    ElectionState::Confirmed,
                    ElectionState::ExpiredConfirmed,
                );
            }
            ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed => {
                finished = true;
            }
        }

        if !data.state.is_confirmed()
            && data.state != ElectionState::ExpiredUnconfirmed
            && self.election_start.elapsed() >= self.time_to_live()
        {
            let current = data.state;
            if Self::state_change(&mut data, current, ElectionState::ExpiredUnconfirmed) {
                debug!(root = %self.qualified_root, behavior = self.behavior.as_str(), "election expired");
                data.status.status_type = ElectionStatusType::Stopped;
                finished = true;
            }
        }
        finished
    }

    /// Mark an unconfirmed election as stopped. Confirmed elections keep
    /// their status.
    pub(crate) fn cancel(&self) {
        let mut data = self.data.lock().unwrap();
        let current = data.state;
        if Self::state_change(&mut data, current, ElectionState::ExpiredUnconfirmed) {
            data.status.status_type = ElectionStatusType::Stopped;
        }
    }
}
