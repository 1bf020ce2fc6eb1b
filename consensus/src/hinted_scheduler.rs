//! Hinted scheduler: starts elections for blocks the vote cache already
//! shows significant weight behind.
//!
//! Votes for blocks without an election are kept in the vote cache. Once the
//! cached tally for a block passes a share of online stake, the network has
//! clearly moved on without us and the block is worth an election of its
//! own, ahead of whatever the priority scheduler would pick next.
//!
//! A block whose cached final tally is below quorum is only started once its
//! dependencies are cemented; otherwise the walk descends into the
//! uncemented dependencies and starts those instead.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lattice_ledger::Ledger;
use lattice_types::{Amount, BlockHash};
use lattice_utils::{DetailType, StatType, Stats};
use tracing::{info, trace, warn};

use crate::active_elections::ActiveElections;
use crate::election::ElectionBehavior;
use crate::error::ConsensusError;

#[derive(Clone, Debug, PartialEq)]
pub struct HintedSchedulerConfig {
    pub enabled: bool,
    /// Share of online stake a cached tally needs, in percent.
    pub hinting_threshold_percent: u32,
    /// Interval between scans of the vote cache.
    pub check_interval: Duration,
    /// How long a hash is left alone after it was looked at.
    pub block_cooldown: Duration,
}

impl Default for HintedSchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hinting_threshold_percent: 10,
            check_interval: Duration::from_secs(1),
            block_cooldown: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct State {
    stopped: bool,
}

pub struct HintedScheduler {
    config: HintedSchedulerConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    active: Arc<ActiveElections>,
    data: Mutex<State>,
    condition: Condvar,
    /// Hash -> end of its cooldown. Only the scheduling thread writes here.
    cooldowns: Mutex<HashMap<BlockHash, Instant>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HintedScheduler {
    pub fn new(
        config: HintedSchedulerConfig,
        ledger: Arc<Ledger>,
        stats: Arc<Stats>,
        active: Arc<ActiveElections>,
    ) -> Self {
        Self {
            config,
            ledger,
            stats,
            active,
            data: Mutex::new(State::default()),
            condition: Condvar::new(),
            cooldowns: Mutex::new(HashMap::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn notify(&self) {
        self.condition.notify_all();
    }

    /// Room for another hinted election.
    fn predicate(&self) -> bool {
        self.active.vacancy(ElectionBehavior::Hinted) > 0
    }

    /// Minimum cached tally worth an election.
    pub fn tally_threshold(&self) -> Amount {
        self.active
            .context()
            .online_reps
            .online_stake()
            .scaled(u128::from(self.config.hinting_threshold_percent), 100)
    }

    /// Cached final tally at which dependencies are no longer checked.
    pub fn final_tally_threshold(&self) -> Amount {
        self.active.context().online_reps.delta()
    }

    /// True if `hash` was looked at within the cooldown period. Starts a new
    /// cooldown otherwise.
    fn cooldown(&self, hash: &BlockHash) -> bool {
        let now = Instant::now();
        let mut cooldowns = self.cooldowns.lock().unwrap();
        if cooldowns.get(hash).is_some_and(|until| *until > now) {
            return true;
        }
        cooldowns.retain(|_, until| *until > now);
        cooldowns.insert(*hash, now + self.config.block_cooldown);
        false
    }

    /// One pass over the vote cache, heaviest tally first.
    fn run_iterative(&self) -> Result<(), ConsensusError> {
        let minimum_tally = self.tally_threshold();
        let minimum_final_tally = self.final_tally_threshold();
        let top = self
            .active
            .context()
            .vote_cache
            .lock()
            .unwrap()
            .top(minimum_tally);

        for entry in top {
            if !self.predicate() {
                return Ok(());
            }
            if self.cooldown(&entry.hash) {
                self.stats
                    .inc(StatType::HintedScheduler, DetailType::Cooldown);
                continue;
            }
            if self.active.active_block(&entry.hash) {
                self.stats
                    .inc(StatType::HintedScheduler, DetailType::AlreadyActive);
                continue;
            }
            if self.active.recently_confirmed().hash_exists(&entry.hash) {
                self.stats
                    .inc(StatType::HintedScheduler, DetailType::RecentlyConfirmed);
                continue;
            }

            self.stats
                .inc(StatType::HintedScheduler, DetailType::Activated);
            // A quorum of final votes confirms the block as soon as it is
            // started, dependencies or not.
            let check_dependents = entry.final_tally < minimum_final_tally;
            self.activate(entry.hash, check_dependents)?;
        }
        Ok(())
    }

    /// Start a hinted election for `hash`, or for its uncemented
    /// dependencies first when `check_dependents` is set.
    fn activate(&self, hash: BlockHash, check_dependents: bool) -> Result<(), ConsensusError> {
        let mut stack = vec![hash];
        while let Some(current) = stack.pop() {
            let Some(block) = self.ledger.block(&current)? else {
                self.stats
                    .inc(StatType::HintedScheduler, DetailType::MissingBlock);
                continue;
            };
            if self.ledger.block_confirmed(&current)?
                || self.active.recently_confirmed().hash_exists(&current)
            {
                self.stats
                    .inc(StatType::HintedScheduler, DetailType::AlreadyCemented);
                continue;
            }
            if check_dependents && !self.ledger.dependents_confirmed(&block)? {
                self.stats
                    .inc(StatType::HintedScheduler, DetailType::DependentUnconfirmed);
                stack.extend(self.ledger.dependents(&block).iter());
                continue;
            }

            self.stats
                .inc(StatType::HintedScheduler, DetailType::InsertHinted);
            let result = self
                .active
                .insert(&Arc::new(block.into_block()), ElectionBehavior::Hinted);
            if result.inserted {
                self.stats
                    .inc(StatType::HintedScheduler, DetailType::InsertHintedSuccess);
                trace!(hash = %current, "hinted election started");
            }
        }
        Ok(())
    }

    fn run(&self) {
        let mut data = self.data.lock().unwrap();
        while !data.stopped {
            self.stats.inc(StatType::HintedScheduler, DetailType::Loop);
            data = self
                .condition
                .wait_timeout(data, self.config.check_interval)
                .unwrap()
                .0;
            if data.stopped || !self.predicate() {
                continue;
            }
            drop(data);

            if let Err(err) = self.run_iterative() {
                warn!(%err, "hinted scheduling failed");
            }

            data = self.data.lock().unwrap();
        }
    }

    /// Spawn the scheduling thread. Does nothing when disabled.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        debug_assert!(self.thread.lock().unwrap().is_none());
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("Sched Hinted".to_owned())
            .spawn(move || this.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        info!(
            threshold_percent = self.config.hinting_threshold_percent,
            "hinted scheduler started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.data.lock().unwrap().stopped = true;
        self.notify();
        let thread = self.thread.lock().unwrap().take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

impl Drop for HintedScheduler {
    fn drop(&mut self) {
        // Thread must be stopped before destruction
        debug_assert!(self.thread.lock().unwrap().is_none());
    }
}
