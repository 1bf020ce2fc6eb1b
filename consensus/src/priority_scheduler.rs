//! Priority scheduler: starts elections for the next unconfirmed block of
//! each account, in balance-tier order.
//!
//! An account is only queued once the block following its confirmed
//! frontier has all of its dependencies cemented, so every election it
//! starts can actually be confirmed.

use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, SavedBlock, Timestamp};
use lattice_utils::{DetailType, StatType, Stats};
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::active_elections::ActiveElections;
use crate::buckets::Buckets;
use crate::election::{Election, ElectionBehavior};
use crate::error::ConsensusError;

/// Upper bound on how long the loop sleeps before re-checking vacancy.
const IDLE_RECHECK: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySchedulerConfig {
    pub enabled: bool,
    /// Queued blocks per bucket.
    pub bucket_maximum: usize,
    /// Running elections per bucket.
    pub max_active_per_bucket: usize,
}

impl Default for PrioritySchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_maximum: 1024 * 8,
            max_active_per_bucket: 150,
        }
    }
}

struct SchedulerData {
    stopped: bool,
    buckets: Buckets,
}

pub struct PriorityScheduler {
    config: PrioritySchedulerConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    active: Arc<ActiveElections>,
    data: Mutex<SchedulerData>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PriorityScheduler {
    pub fn new(
        config: PrioritySchedulerConfig,
        ledger: Arc<Ledger>,
        stats: Arc<Stats>,
        active: Arc<ActiveElections>,
    ) -> Self {
        let buckets = Buckets::new(config.bucket_maximum, config.max_active_per_bucket);
        Self {
            config,
            ledger,
            stats,
            active,
            data: Mutex::new(SchedulerData {
                stopped: false,
                buckets,
            }),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    /// Queue the first unconfirmed block of `account`.
    ///
    /// Returns false if the account is unknown, fully cemented, or its next
    /// block still has unconfirmed dependencies.
    pub fn activate(&self, account: &Account) -> Result<bool, ConsensusError> {
        let Some(info) = self.ledger.account_info(account)? else {
            return Ok(false);
        };
        let conf = self.ledger.confirmation_height(account)?;
        if conf.height >= info.block_count {
            return Ok(false);
        }

        let (hash, confirmed) = if conf.height == 0 {
            (info.open_block, None)
        } else {
            let frontier = self
                .ledger
                .block(&conf.frontier)?
                .ok_or(ConsensusError::BlockNotFound(conf.frontier))?;
            (frontier.successor(), Some(frontier))
        };
        let block = self
            .ledger
            .block(&hash)?
            .ok_or(ConsensusError::BlockNotFound(hash))?;

        if !self.ledger.dependents_confirmed(&block)? {
            self.stats
                .inc(StatType::PriorityScheduler, DetailType::ActivateFailed);
            return Ok(false);
        }

        // New accounts get the current time, the lowest priority within a tier.
        let (confirmed_balance, time) = match &confirmed {
            Some(frontier) => (frontier.balance(), frontier.timestamp()),
            None => (Amount::ZERO, Timestamp::now()),
        };
        let priority = block.balance().max(confirmed_balance);

        self.stats
            .inc(StatType::PriorityScheduler, DetailType::Activated);
        trace!(%account, hash = %block.hash(), time = time.as_secs(), %priority, "block activated");

        let mut data = self.data.lock().unwrap();
        if data
            .buckets
            .push(time.as_secs(), Arc::new(block.into_block()), priority)
        {
            self.stats.inc(StatType::PriorityScheduler, DetailType::Insert);
        }
        if data.buckets.available() {
            self.condition.notify_all();
        }
        Ok(true)
    }

    /// Activate the account of a freshly cemented block and, for sends, the
    /// destination account that can now receive.
    pub fn activate_successors(&self, block: &SavedBlock) -> Result<bool, ConsensusError> {
        let mut activated = self.activate(&block.account())?;
        if let Some(destination) = block.destination() {
            if !destination.is_zero() && destination != block.account() {
                activated |= self.activate(&destination)?;
            }
        }
        Ok(activated)
    }

    /// Free the bucket slot held by a finished election.
    pub fn election_stopped(&self, election: &Election) {
        let mut data = self.data.lock().unwrap();
        if data
            .buckets
            .election_stopped(election.qualified_root())
            .is_some()
        {
            self.condition.notify_all();
        }
    }

    pub fn notify(&self) {
        self.condition.notify_all();
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().unwrap().buckets.is_empty()
    }

    /// Elections started by this scheduler that are still running.
    pub fn active_count(&self) -> usize {
        self.data.lock().unwrap().buckets.active()
    }

    fn predicate(&self, data: &SchedulerData) -> bool {
        data.buckets.available() && self.active.vacancy(ElectionBehavior::Priority) > 0
    }

    fn run(&self) {
        let mut data = self.data.lock().unwrap();
        while !data.stopped {
            data = self
                .condition
                .wait_timeout_while(data, IDLE_RECHECK, |d| !d.stopped && !self.predicate(d))
                .unwrap()
                .0;
            if data.stopped {
                break;
            }
            self.stats.inc(StatType::PriorityScheduler, DetailType::Loop);

            while self.predicate(&data) {
                let Some((index, block)) = data.buckets.next() else {
                    break;
                };
                let root = block.qualified_root();
                // Tracked before inserting since removal is reported asynchronously
                if !data.buckets.election_started(index, root) {
                    continue;
                }
                drop(data);

                self.stats
                    .inc(StatType::PriorityScheduler, DetailType::InsertPriority);
                let result = self.active.insert(&block, ElectionBehavior::Priority);
                if result.inserted {
                    self.stats
                        .inc(StatType::PriorityScheduler, DetailType::InsertPrioritySuccess);
                }
                if let Some(election) = &result.election {
                    election.transition_active();
                }

                data = self.data.lock().unwrap();
                if result.election.is_none() {
                    data.buckets.election_stopped(&root);
                }
            }
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
            .name("Sched Priority".to_owned())
            .spawn(move || this.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        info!(
            buckets = Buckets::COUNT,
            max_active_per_bucket = self.config.max_active_per_bucket,
            "priority scheduler started"
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

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        // Thread must be stopped before destruction
        debug_assert!(self.thread.lock().unwrap().is_none());
    }
}
