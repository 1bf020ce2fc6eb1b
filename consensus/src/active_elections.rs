//! Active elections container: manages all ongoing consensus elections.
//!
//! This is the top-level coordinator for the election system. It holds a
//! bounded set of elections keyed by qualified root, wires each new election
//! to the vote router and the vote cache, and runs a request loop that ages
//! elections, removes finished ones and trims overfill.
//!
//! Capacity is tracked per [`ElectionBehavior`]:
//!
//! - **Priority** may use the whole container and counts every election.
//! - **Hinted** and **Optimistic** each get a percentage of it and count only
//!   their own elections.
//! - **Manual** is never limited.
//!
//! Every limit is further clamped by the free room in the confirming set so
//! that confirmed winners cannot pile up faster than they are cemented.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use lattice_types::{Block, BlockHash, QualifiedRoot};
use lattice_utils::{DetailType, StatType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::election::{
    ConfirmationAction, Election, ElectionBehavior, ElectionContext, ElectionStatus,
    ElectionStatusType, WinnerChangedAction,
};
use crate::error::ConsensusError;
use crate::recently_confirmed::RecentlyConfirmed;
use crate::vote_info::VoteSource;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveElectionsConfig {
    /// Maximum number of simultaneous elections.
    pub size: usize,
    /// Share of `size` available to hinted elections, in percent.
    pub hinted_limit_percentage: usize,
    /// Share of `size` available to optimistic elections, in percent.
    pub optimistic_limit_percentage: usize,
    /// Confirmed winners allowed to wait for cementing before admission stops.
    pub max_election_winners: usize,
}

impl Default for ActiveElectionsConfig {
    fn default() -> Self {
        Self {
            size: 5000,
            hinted_limit_percentage: 20,
            optimistic_limit_percentage: 10,
            max_election_winners: 1024 * 16,
        }
    }
}

/// Destination of confirmed winners. Implemented by the confirming set.
pub trait ConfirmationSink: Send + Sync {
    fn add(&self, hash: BlockHash);

    /// Winners queued but not yet cemented.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Default)]
pub struct InsertResult {
    pub inserted: bool,
    pub election: Option<Arc<Election>>,
}

pub type ElectionObserver = Box<dyn Fn(&Arc<Election>) + Send + Sync>;
pub type StatusObserver = Box<dyn Fn(&ElectionStatus) + Send + Sync>;
pub type VacancyObserver = Box<dyn Fn() + Send + Sync>;
pub type BlockObserver = Box<dyn Fn(&Arc<Block>) + Send + Sync>;

#[derive(Default)]
struct ActiveData {
    stopped: bool,
    roots: HashMap<QualifiedRoot, Arc<Election>>,
    /// Election id -> root. Ids grow monotonically, so this is age order.
    order: BTreeMap<u64, QualifiedRoot>,
    count_by_behavior: HashMap<ElectionBehavior, usize>,
}

impl ActiveData {
    fn count(&self, behavior: ElectionBehavior) -> usize {
        self.count_by_behavior.get(&behavior).copied().unwrap_or(0)
    }

    /// Oldest unconfirmed election, optionally restricted to one behavior.
    fn oldest(&self, behavior: Option<ElectionBehavior>) -> Option<Arc<Election>> {
        self.order
            .values()
            .filter_map(|root| self.roots.get(root))
            .find(|e| behavior.map_or(true, |b| e.behavior() == b) && !e.is_confirmed())
            .cloned()
    }
}

pub struct ActiveElections {
    config: ActiveElectionsConfig,
    ctx: Arc<ElectionContext>,
    recently_confirmed: Arc<RecentlyConfirmed>,
    confirming_set: Arc<dyn ConfirmationSink>,
    next_id: AtomicU64,
    data: Mutex<ActiveData>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
    started_observers: Mutex<Vec<ElectionObserver>>,
    stopped_observers: Mutex<Vec<ElectionObserver>>,
    confirmed_observers: Arc<Mutex<Vec<StatusObserver>>>,
    vacancy_observers: Mutex<Vec<VacancyObserver>>,
    winner_changed_observers: Arc<Mutex<Vec<BlockObserver>>>,
}

impl ActiveElections {
    pub fn new(
        config: ActiveElectionsConfig,
        ctx: Arc<ElectionContext>,
        recently_confirmed: Arc<RecentlyConfirmed>,
        confirming_set: Arc<dyn ConfirmationSink>,
    ) -> Self {
        Self {
            config,
            ctx,
            recently_confirmed,
            confirming_set,
            next_id: AtomicU64::new(1),
            data: Mutex::new(ActiveData::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
            started_observers: Mutex::new(Vec::new()),
            stopped_observers: Mutex::new(Vec::new()),
            confirmed_observers: Arc::new(Mutex::new(Vec::new())),
            vacancy_observers: Mutex::new(Vec::new()),
            winner_changed_observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &ActiveElectionsConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ElectionContext> {
        &self.ctx
    }

    pub fn recently_confirmed(&self) -> &Arc<RecentlyConfirmed> {
        &self.recently_confirmed
    }

    // ── Observers ───────────────────────────────────────────────────────

    pub fn on_election_started(&self, observer: ElectionObserver) {
        self.started_observers.lock().unwrap().push(observer);
    }

    /// Called after an election left the container, confirmed or not.
    pub fn on_election_stopped(&self, observer: ElectionObserver) {
        self.stopped_observers.lock().unwrap().push(observer);
    }

    /// Called for every confirmation: by quorum, through a cemented
    /// dependent, or for blocks cemented without any election.
    pub fn on_confirmed(&self, observer: StatusObserver) {
        self.confirmed_observers.lock().unwrap().push(observer);
    }

    /// Called whenever room may have opened up.
    pub fn on_vacancy_update(&self, observer: VacancyObserver) {
        self.vacancy_observers.lock().unwrap().push(observer);
    }

    /// Called with the new winner when votes move an election to a block
    /// other than the one it started with or last switched to.
    pub fn on_winner_changed(&self, observer: BlockObserver) {
        self.winner_changed_observers.lock().unwrap().push(observer);
    }

    fn notify_vacancy(&self) {
        for observer in self.vacancy_observers.lock().unwrap().iter() {
            observer();
        }
    }

    // ── Capacity ────────────────────────────────────────────────────────

    pub fn limit(&self, behavior: ElectionBehavior) -> usize {
        match behavior {
            ElectionBehavior::Manual => usize::MAX,
            ElectionBehavior::Priority => self.config.size,
            ElectionBehavior::Hinted => {
                self.config.size * self.config.hinted_limit_percentage / 100
            }
            ElectionBehavior::Optimistic => {
                self.config.size * self.config.optimistic_limit_percentage / 100
            }
        }
    }

    /// Free slots for `behavior`. Negative while the container is overfull.
    pub fn vacancy(&self, behavior: ElectionBehavior) -> i64 {
        let election_vacancy = {
            let data = self.data.lock().unwrap();
            match behavior {
                ElectionBehavior::Manual => i64::MAX,
                ElectionBehavior::Priority => self.limit(behavior) as i64 - data.roots.len() as i64,
                ElectionBehavior::Hinted | ElectionBehavior::Optimistic => {
                    self.limit(behavior) as i64 - data.count(behavior) as i64
                }
            }
        };
        let winners_vacancy =
            self.config.max_election_winners as i64 - self.confirming_set.len() as i64;
        election_vacancy.min(winners_vacancy)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, behavior: ElectionBehavior) -> usize {
        self.data.lock().unwrap().count(behavior)
    }

    pub fn election(&self, root: &QualifiedRoot) -> Option<Arc<Election>> {
        self.data.lock().unwrap().roots.get(root).cloned()
    }

    pub fn active(&self, root: &QualifiedRoot) -> bool {
        self.data.lock().unwrap().roots.contains_key(root)
    }

    /// True if an election contains the block `hash`.
    pub fn active_block(&self, hash: &BlockHash) -> bool {
        self.ctx.vote_router.active(hash)
    }

    /// Snapshot of every election, oldest first.
    pub fn list(&self) -> Vec<Arc<Election>> {
        let data = self.data.lock().unwrap();
        data.order
            .values()
            .filter_map(|root| data.roots.get(root).cloned())
            .collect()
    }

    // ── Insertion ───────────────────────────────────────────────────────

    /// Start an election for `block` unless one exists for its root.
    ///
    /// Refuses roots that were recently confirmed and does nothing once the
    /// container is stopped.
    pub fn insert(&self, block: &Arc<Block>, behavior: ElectionBehavior) -> InsertResult {
        let root = block.qualified_root();
        let hash = block.hash();

        let election = {
            let mut data = self.data.lock().unwrap();
            if data.stopped {
                return InsertResult::default();
            }
            if let Some(existing) = data.roots.get(&root) {
                return InsertResult {
                    inserted: false,
                    election: Some(existing.clone()),
                };
            }
            if self.recently_confirmed.root_exists(&root) {
                self.ctx
                    .stats
                    .inc(StatType::ActiveElections, DetailType::Replay);
                return InsertResult::default();
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let election = Arc::new(
                Election::new(
                    id,
                    block.clone(),
                    behavior,
                    self.ctx.clone(),
                    Some(self.confirmation_action()),
                )
                .with_winner_changed(self.winner_changed_action()),
            );
            data.roots.insert(root, election.clone());
            data.order.insert(id, root);
            *data.count_by_behavior.entry(behavior).or_default() += 1;
            // Routed before the root becomes visible to other threads' votes.
            self.ctx.vote_router.connect(hash, Arc::downgrade(&election));
            election
        };

        // Without cached votes there is nothing to wait for in the passive phase.
        if !self.ctx.vote_cache.lock().unwrap().contains(&hash) {
            election.transition_active();
        }
        self.fill(&election, &hash);

        self.ctx
            .stats
            .inc(StatType::ActiveElectionsStarted, behavior.detail());
        self.ctx
            .stats
            .inc(StatType::ActiveElections, DetailType::Started);
        debug!(%root, %hash, behavior = behavior.as_str(), "election started");

        for observer in self.started_observers.lock().unwrap().iter() {
            observer(&election);
        }
        self.notify_vacancy();

        InsertResult {
            inserted: true,
            election: Some(election),
        }
    }

    /// Replay cached votes for `hash` into `election`.
    fn fill(&self, election: &Arc<Election>, hash: &BlockHash) {
        let cached = self.ctx.vote_cache.lock().unwrap().find(hash);
        for vote in &cached {
            election.vote(&vote.representative, vote.timestamp, hash, VoteSource::Cache);
        }
        self.ctx
            .stats
            .add(StatType::VoteCache, DetailType::Fill, cached.len() as u64);
    }

    /// Offer a competing block to the election for its root.
    ///
    /// Returns true when the block was not added, including when there is no
    /// election for its root.
    pub fn publish(&self, block: &Arc<Block>) -> bool {
        let Some(election) = self.election(&block.qualified_root()) else {
            return true;
        };
        let hash = block.hash();
        let not_added = election.publish(block);
        if !not_added {
            self.ctx.vote_router.connect(hash, Arc::downgrade(&election));
            self.fill(&election, &hash);
            self.ctx
                .stats
                .inc(StatType::ActiveElections, DetailType::Publish);
        }
        not_added
    }

    fn confirmation_action(&self) -> ConfirmationAction {
        let recently_confirmed = self.recently_confirmed.clone();
        let confirming_set = self.confirming_set.clone();
        let observers = self.confirmed_observers.clone();
        let stats = self.ctx.stats.clone();
        Box::new(move |status: &ElectionStatus| {
            let winner = &status.winner;
            recently_confirmed.put(winner.qualified_root(), winner.hash());
            // Winners confirmed through cementing are already cemented.
            if status.status_type != ElectionStatusType::ActiveConfirmationHeight {
                confirming_set.add(winner.hash());
            }
            stats.inc(StatType::ActiveElections, DetailType::Confirmed);
            for observer in observers.lock().unwrap().iter() {
                observer(status);
            }
        })
    }

    fn winner_changed_action(&self) -> WinnerChangedAction {
        let observers = self.winner_changed_observers.clone();
        Box::new(move |block: &Arc<Block>| {
            for observer in observers.lock().unwrap().iter() {
                observer(block);
            }
        })
    }

    // ── Confirmation ────────────────────────────────────────────────────

    /// A block was cemented. Confirms the election it won, if any, or
    /// reports it as confirmed without an election.
    pub fn block_cemented(&self, block: &Arc<Block>) {
        let hash = block.hash();
        if let Some(election) = self.election(&block.qualified_root()) {
            if election.try_confirm(&hash) {
                return;
            }
            if election.is_confirmed() && election.winner().hash() == hash {
                return;
            }
        }
        if self.recently_confirmed.hash_exists(&hash) {
            return;
        }

        self.ctx
            .stats
            .inc(StatType::ActiveElections, DetailType::ConfirmDependent);
        let status = ElectionStatus::new(block.clone(), ElectionStatusType::InactiveConfirmationHeight);
        for observer in self.confirmed_observers.lock().unwrap().iter() {
            observer(&status);
        }
    }

    /// Confirm the election for `root` regardless of votes.
    pub fn force_confirm(&self, root: &QualifiedRoot) -> Result<(), ConsensusError> {
        let election = self
            .election(root)
            .ok_or(ConsensusError::ElectionNotFound(*root))?;
        election.force_confirm();
        Ok(())
    }

    // ── Removal ─────────────────────────────────────────────────────────

    pub fn erase(&self, root: &QualifiedRoot) -> bool {
        let data = self.data.lock().unwrap();
        match data.roots.get(root).cloned() {
            Some(election) => {
                self.cleanup_election(data, &election);
                true
            }
            None => false,
        }
    }

    fn erase_election(&self, election: &Arc<Election>) {
        let data = self.data.lock().unwrap();
        let current = data.roots.get(election.qualified_root());
        if current.is_some_and(|e| Arc::ptr_eq(e, election)) {
            self.cleanup_election(data, election);
        }
    }

    fn cleanup_election(&self, mut data: MutexGuard<'_, ActiveData>, election: &Arc<Election>) {
        let behavior = election.behavior();
        data.roots.remove(election.qualified_root());
        data.order.remove(&election.id());
        if let Some(count) = data.count_by_behavior.get_mut(&behavior) {
            *count = count.saturating_sub(1);
        }
        drop(data);

        election.cancel();
        self.ctx.vote_router.disconnect_election(election);

        let state = election.state();
        self.ctx
            .stats
            .inc(StatType::ActiveElectionsStopped, state.detail());
        self.ctx
            .stats
            .inc(StatType::ActiveElections, DetailType::Stopped);
        debug!(
            root = %election.qualified_root(),
            behavior = behavior.as_str(),
            state = state.as_str(),
            "election stopped"
        );

        for observer in self.stopped_observers.lock().unwrap().iter() {
            observer(election);
        }
        self.notify_vacancy();
    }

    /// Evict the oldest unconfirmed election, preferring priority ones.
    pub fn erase_oldest(&self) -> bool {
        let data = self.data.lock().unwrap();
        let victim = data
            .oldest(Some(ElectionBehavior::Priority))
            .or_else(|| data.oldest(None));
        match victim {
            Some(election) => {
                self.ctx
                    .stats
                    .inc(StatType::ActiveElections, DetailType::EraseOldest);
                self.cleanup_election(data, &election);
                true
            }
            None => false,
        }
    }

    fn erase_oldest_of(&self, behavior: ElectionBehavior) -> bool {
        let data = self.data.lock().unwrap();
        match data.oldest(Some(behavior)) {
            Some(election) => {
                self.ctx
                    .stats
                    .inc(StatType::ActiveElections, DetailType::EraseOldest);
                self.cleanup_election(data, &election);
                true
            }
            None => false,
        }
    }

    /// Remove every election.
    pub fn clear(&self) {
        for election in self.list() {
            self.erase_election(&election);
        }
    }

    // ── Request loop ────────────────────────────────────────────────────

    /// Bring every behavior back within its limit.
    fn trim(&self) {
        let overfilled = |behavior: ElectionBehavior| {
            let data = self.data.lock().unwrap();
            let count = match behavior {
                ElectionBehavior::Priority => data.roots.len(),
                other => data.count(other),
            };
            count > self.limit(behavior)
        };

        while overfilled(ElectionBehavior::Priority) {
            self.ctx
                .stats
                .inc(StatType::ActiveElections, DetailType::Overfill);
            if !self.erase_oldest() {
                break;
            }
        }
        for behavior in [ElectionBehavior::Hinted, ElectionBehavior::Optimistic] {
            while overfilled(behavior) {
                self.ctx
                    .stats
                    .inc(StatType::ActiveElections, DetailType::Overfill);
                if !self.erase_oldest_of(behavior) {
                    break;
                }
            }
        }
    }

    /// One iteration of the request loop: age every election, drop the
    /// finished ones and trim overfill.
    pub fn tick(&self) {
        self.ctx.stats.inc(StatType::ActiveElections, DetailType::Loop);
        for election in self.list() {
            if election.transition_time() {
                self.erase_election(&election);
            }
        }
        self.trim();
    }

    fn run(&self) {
        let interval = self.ctx.network.aec_loop_interval();
        let mut data = self.data.lock().unwrap();
        while !data.stopped {
            drop(data);
            let stamp = Instant::now();
            self.tick();

            data = self.data.lock().unwrap();
            let wait = interval.saturating_sub(stamp.elapsed());
            data = self
                .condition
                .wait_timeout_while(data, wait, |d| !d.stopped)
                .unwrap()
                .0;
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("Request loop".to_owned())
            .spawn(move || this.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        info!(size = self.config.size, "active elections started");
        Ok(())
    }

    /// Stop the request loop. In-flight elections are left in place.
    pub fn stop(&self) {
        self.data.lock().unwrap().stopped = true;
        self.condition.notify_all();
        let thread = self.thread.lock().unwrap().take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

impl Drop for ActiveElections {
    fn drop(&mut self) {
        // The request loop must be stopped before destruction
        debug_assert!(self.thread.lock().unwrap().is_none())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    pub(crate) struct TestSink {
        pub(crate) hashes: Mutex<Vec<BlockHash>>,
        pub(crate) backlog: AtomicUsize,
    }

    impl ConfirmationSink for TestSink {
        fn add(&self, hash: BlockHash) {
            self.hashes.lock().unwrap().push(hash);
        }

        fn len(&self) -> usize {
            self.hashes.lock().unwrap().len() + self.backlog.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn active_elections(
        ctx: Arc<ElectionContext>,
        config: ActiveElectionsConfig,
    ) -> (Arc<ActiveElections>, Arc<TestSink>) {
        let sink = Arc::new(TestSink::default());
        let active = Arc::new(ActiveElections::new(
            config,
            ctx,
            Arc::new(RecentlyConfirmed::default()),
            sink.clone(),
        ));
        (active, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::test_support::{dev_context, fork_block};
    use lattice_ledger::LedgerContext;
    use lattice_types::{Amount, Vote};
    use super::test_support::{active_elections, TestSink};
    use crate::vote_info::VoteCode;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        ledger: LedgerContext,
        sink: Arc<TestSink>,
        active: Arc<ActiveElections>,
    }

    fn fixture(config: ActiveElectionsConfig) -> Fixture {
        let ledger = LedgerContext::new();
        let ctx = dev_context(ledger.ledger.clone());
        let (active, sink) = active_elections(ctx, config);
        Fixture { ledger, sink, active }
    }

    fn small_config() -> ActiveElectionsConfig {
        ActiveElectionsConfig {
            size: 10,
            hinted_limit_percentage: 20,
            optimistic_limit_percentage: 10,
            max_election_winners: 100,
        }
    }

    #[test]
    fn insert_creates_one_election_per_root() {
        let f = fixture(small_config());
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        f.active.on_election_started(Box::new(move |_: &Arc<Election>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let block = fork_block(1, 10);
        let first = f.active.insert(&block, ElectionBehavior::Priority);
        assert!(first.inserted);
        let second = f.active.insert(&fork_block(1, 11), ElectionBehavior::Priority);
        assert!(!second.inserted);
        assert!(Arc::ptr_eq(
            first.election.as_ref().unwrap(),
            second.election.as_ref().unwrap()
        ));
        assert_eq!(f.active.len(), 1);
        assert_eq!(f.active.count(ElectionBehavior::Priority), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(f.active.active_block(&block.hash()));
    }

    #[test]
    fn recently_confirmed_root_is_refused() {
        let f = fixture(small_config());
        let block = fork_block(1, 10);
        f.active
            .recently_confirmed()
            .put(block.qualified_root(), block.hash());
        let result = f.active.insert(&block, ElectionBehavior::Priority);
        assert!(!result.inserted);
        assert!(result.election.is_none());
    }

    #[test]
    fn cached_votes_fill_new_election() {
        let f = fixture(small_config());
        let block = fork_block(1, 10);
        let genesis = f.ledger.genesis_account();
        f.active.context().vote_cache.lock().unwrap().observe(
            block.hash(),
            genesis,
            Vote::FINAL_TIMESTAMP,
            Amount::MAX,
        );

        let result = f.active.insert(&block, ElectionBehavior::Priority);
        let election = result.election.unwrap();
        assert!(election.is_confirmed());
        assert_eq!(*f.sink.hashes.lock().unwrap(), vec![block.hash()]);
        assert!(f.active.recently_confirmed().hash_exists(&block.hash()));
    }

    #[test]
    fn vacancy_tracks_behavior_limits() {
        let f = fixture(small_config());
        assert_eq!(f.active.limit(ElectionBehavior::Hinted), 2);
        assert_eq!(f.active.limit(ElectionBehavior::Optimistic), 1);
        for n in 1..=3 {
            f.active.insert(&fork_block(n, 10), ElectionBehavior::Priority);
        }
        assert_eq!(f.active.vacancy(ElectionBehavior::Priority), 7);
        assert_eq!(f.active.vacancy(ElectionBehavior::Hinted), 2);

        f.active.insert(&fork_block(4, 10), ElectionBehavior::Hinted);
        assert_eq!(f.active.vacancy(ElectionBehavior::Priority), 6);
        assert_eq!(f.active.vacancy(ElectionBehavior::Hinted), 1);
        assert_eq!(f.active.vacancy(ElectionBehavior::Manual), 100);

        f.sink.backlog.store(98, Ordering::SeqCst);
        assert_eq!(f.active.vacancy(ElectionBehavior::Priority), 2);
        f.sink.backlog.store(120, Ordering::SeqCst);
        assert!(f.active.vacancy(ElectionBehavior::Priority) < 0);
    }

    #[test]
    fn erase_notifies_and_disconnects() {
        let f = fixture(small_config());
        let stopped = Arc::new(Mutex::new(Vec::new()));
        let sink = stopped.clone();
        f.active.on_election_stopped(Box::new(move |e: &Arc<Election>| {
            sink.lock().unwrap().push(*e.qualified_root());
        }));

        let block = fork_block(1, 10);
        let election = f.active.insert(&block, ElectionBehavior::Hinted).election.unwrap();
        assert!(f.active.erase(&block.qualified_root()));
        assert!(!f.active.erase(&block.qualified_root()));

        assert!(f.active.is_empty());
        assert_eq!(f.active.count(ElectionBehavior::Hinted), 0);
        assert!(!f.active.active_block(&block.hash()));
        assert!(election.failed());
        assert_eq!(*stopped.lock().unwrap(), vec![block.qualified_root()]);
    }

    #[test]
    fn erase_oldest_prefers_priority_elections() {
        let f = fixture(small_config());
        let hinted = fork_block(1, 10);
        let priority_old = fork_block(2, 10);
        let priority_new = fork_block(3, 10);
        f.active.insert(&hinted, ElectionBehavior::Hinted);
        f.active.insert(&priority_old, ElectionBehavior::Priority);
        f.active.insert(&priority_new, ElectionBehavior::Priority);

        assert!(f.active.erase_oldest());
        assert!(f.active.active(&hinted.qualified_root()));
        assert!(!f.active.active(&priority_old.qualified_root()));
        assert!(f.active.active(&priority_new.qualified_root()));

        assert!(f.active.erase_oldest());
        assert!(f.active.erase_oldest());
        assert!(!f.active.erase_oldest());
    }

    #[test]
    fn tick_removes_confirmed_elections() {
        let f = fixture(small_config());
        let block = fork_block(1, 10);
        f.active.insert(&block, ElectionBehavior::Priority);
        f.active.force_confirm(&block.qualified_root()).unwrap();
        assert_eq!(f.active.len(), 1);

        f.active.tick();
        assert!(f.active.is_empty());
        assert!(f.active.recently_confirmed().root_exists(&block.qualified_root()));
        assert!(!f.active.insert(&block, ElectionBehavior::Priority).inserted);
    }

    #[test]
    fn force_confirm_unknown_root_fails() {
        let f = fixture(small_config());
        let root = fork_block(1, 10).qualified_root();
        assert!(matches!(
            f.active.force_confirm(&root),
            Err(ConsensusError::ElectionNotFound(_))
        ));
    }

    #[test]
    fn tick_trims_overfill() {
        let mut config = small_config();
        config.size = 2;
        let f = fixture(config);
        let manual = fork_block(1, 10);
        f.active.insert(&manual, ElectionBehavior::Manual);
        f.active.insert(&fork_block(2, 10), ElectionBehavior::Priority);
        f.active.insert(&fork_block(3, 10), ElectionBehavior::Priority);
        assert_eq!(f.active.vacancy(ElectionBehavior::Priority), -1);

        f.active.tick();
        assert_eq!(f.active.len(), 2);
        assert!(f.active.active(&manual.qualified_root()));
    }

    #[test]
    fn block_cemented_confirms_dependent_election() {
        let f = fixture(small_config());
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        f.active.on_confirmed(Box::new(move |s: &ElectionStatus| {
            sink.lock().unwrap().push((s.winner.hash(), s.status_type));
        }));

        let block = fork_block(1, 10);
        let election = f.active.insert(&block, ElectionBehavior::Priority).election.unwrap();
        f.active.block_cemented(&block);
        assert!(election.is_confirmed());
        // Already cemented: not handed to the confirming set again.
        assert!(f.sink.hashes.lock().unwrap().is_empty());

        let loose = fork_block(2, 10);
        f.active.block_cemented(&loose);
        assert_eq!(
            *statuses.lock().unwrap(),
            vec![
                (block.hash(), ElectionStatusType::ActiveConfirmationHeight),
                (loose.hash(), ElectionStatusType::InactiveConfirmationHeight),
            ]
        );
    }

    #[test]
    fn published_fork_receives_votes() {
        let f = fixture(small_config());
        let block = fork_block(1, 10);
        let fork = fork_block(1, 11);
        let winners = Arc::new(Mutex::new(Vec::new()));
        let sink = winners.clone();
        f.active.on_winner_changed(Box::new(move |block: &Arc<Block>| {
            sink.lock().unwrap().push(block.hash());
        }));
        let election = f.active.insert(&block, ElectionBehavior::Priority).election.unwrap();
        assert!(!f.active.publish(&fork));
        assert!(f.active.publish(&fork));
        assert!(f.active.publish(&fork_block(99, 1)));

        let vote = Vote::new_final(f.ledger.genesis_account(), vec![fork.hash()]);
        f.active.context().vote_router.vote(&vote, VoteSource::Live);
        assert!(election.is_confirmed());
        assert_eq!(election.winner().hash(), fork.hash());
        assert_eq!(*winners.lock().unwrap(), vec![fork.hash()]);
    }

    #[test]
    fn visible_election_is_already_routable() {
        for n in 1..=20 {
            let f = fixture(small_config());
            let block = fork_block(n, 10);
            let root = block.qualified_root();
            let hash = block.hash();
            let genesis = f.ledger.genesis_account();
            let active = f.active.clone();
            let voter = std::thread::spawn(move || {
                while !active.active(&root) {
                    std::thread::yield_now();
                }
                let vote = Vote::new(genesis, 10, vec![hash]);
                active.context().vote_router.vote(&vote, VoteSource::Cache)[&hash]
            });
            f.active.insert(&block, ElectionBehavior::Priority);
            assert_eq!(voter.join().unwrap(), VoteCode::Vote);
        }
    }

    #[test]
    fn stopped_container_refuses_inserts() {
        let f = fixture(small_config());
        f.active.start().unwrap();
        f.active.stop();
        assert!(!f.active.insert(&fork_block(1, 10), ElectionBehavior::Priority).inserted);
    }
}
