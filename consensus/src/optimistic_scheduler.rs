//! Optimistic scheduler: starts elections directly on the head block of
//! accounts whose cemented height lags far behind.
//!
//! Confirming the head cements the whole chain below it in one go, so long
//! unconfirmed chains do not have to be walked one election at a time.
//! Candidates wait out an activation delay first, giving the priority
//! scheduler a chance to make progress on its own.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lattice_ledger::Ledger;
use lattice_store::{AccountInfo, ConfirmationHeightInfo};
use lattice_types::Account;
use lattice_utils::{DetailType, StatType, Stats};
use tracing::{info, trace, warn};

use crate::active_elections::ActiveElections;
use crate::election::ElectionBehavior;
use crate::error::ConsensusError;

#[derive(Clone, Debug, PartialEq)]
pub struct OptimisticSchedulerConfig {
    pub enabled: bool,
    /// Minimum distance between the head and the cemented frontier.
    pub gap_threshold: u64,
    /// Maximum number of candidate accounts held in memory.
    pub max_size: usize,
    /// How long a candidate waits before its head is proposed.
    pub activation_delay: Duration,
}

impl Default for OptimisticSchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gap_threshold: 32,
            max_size: 1024 * 64,
            activation_delay: Duration::from_secs(1),
        }
    }
}

struct Candidate {
    account: Account,
    added: Instant,
}

#[derive(Default)]
struct Candidates {
    stopped: bool,
    queue: VecDeque<Candidate>,
    accounts: HashSet<Account>,
}

pub struct OptimisticScheduler {
    config: OptimisticSchedulerConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    active: Arc<ActiveElections>,
    data: Mutex<Candidates>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl OptimisticScheduler {
    pub fn new(
        config: OptimisticSchedulerConfig,
        ledger: Arc<Ledger>,
        stats: Arc<Stats>,
        active: Arc<ActiveElections>,
    ) -> Self {
        Self {
            config,
            ledger,
            stats,
            active,
            data: Mutex::new(Candidates::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    fn activate_predicate(&self, info: &AccountInfo, conf: &ConfirmationHeightInfo) -> bool {
        // Nothing cemented yet, or a large enough gap to the frontier
        conf.height == 0 || info.block_count.saturating_sub(conf.height) > self.config.gap_threshold
    }

    /// Register `account` as a candidate. Returns false if it does not
    /// qualify, is already a candidate, or the candidate set is full.
    pub fn activate(
        &self,
        account: &Account,
        info: &AccountInfo,
        conf: &ConfirmationHeightInfo,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        debug_assert!(info.block_count >= conf.height);
        if !self.activate_predicate(info, conf) {
            return false;
        }

        let mut data = self.data.lock().unwrap();
        if data.accounts.contains(account) {
            self.stats
                .inc(StatType::OptimisticScheduler, DetailType::CandidateDuplicate);
            return false;
        }
        if data.queue.len() >= self.config.max_size {
            self.stats
                .inc(StatType::OptimisticScheduler, DetailType::Overfill);
            return false;
        }

        self.stats
            .inc(StatType::OptimisticScheduler, DetailType::Activated);
        trace!(%account, block_count = info.block_count, height = conf.height, "optimistic candidate");
        data.accounts.insert(*account);
        data.queue.push_back(Candidate {
            account: *account,
            added: Instant::now(),
        });
        true
    }

    pub fn notify(&self) {
        self.condition.notify_all();
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn predicate(&self, data: &Candidates) -> bool {
        if self.active.vacancy(ElectionBehavior::Optimistic) <= 0 {
            return false;
        }
        data.queue
            .front()
            .is_some_and(|c| c.added.elapsed() >= self.config.activation_delay)
    }

    fn run(&self) {
        let mut data = self.data.lock().unwrap();
        while !data.stopped {
            self.stats
                .inc(StatType::OptimisticScheduler, DetailType::Loop);

            while self.predicate(&data) {
                let Some(candidate) = data.queue.pop_front() else {
                    break;
                };
                data.accounts.remove(&candidate.account);
                drop(data);

                if let Err(err) = self.run_one(&candidate.account) {
                    warn!(account = %candidate.account, %err, "optimistic activation failed");
                }

                data = self.data.lock().unwrap();
            }

            data = self
                .condition
                .wait_timeout_while(data, self.config.activation_delay / 2, |d| {
                    !d.stopped && !self.predicate(d)
                })
                .unwrap()
                .0;
        }
    }

    /// Propose the head block of `account` unless it is already confirmed.
    fn run_one(&self, account: &Account) -> Result<(), ConsensusError> {
        let Some(info) = self.ledger.account_info(account)? else {
            return Ok(());
        };
        if self.ledger.block_confirmed(&info.head)?
            || self.active.recently_confirmed().hash_exists(&info.head)
        {
            return Ok(());
        }
        let head = self
            .ledger
            .block(&info.head)?
            .ok_or(ConsensusError::BlockNotFound(info.head))?;

        self.stats
            .inc(StatType::OptimisticScheduler, DetailType::InsertOptimistic);
        let result = self
            .active
            .insert(&Arc::new(head.into_block()), ElectionBehavior::Optimistic);
        if result.inserted {
            self.stats.inc(
                StatType::OptimisticScheduler,
                DetailType::InsertOptimisticSuccess,
            );
        }
        Ok(())
    }

    /// Spawn the scheduling thread. Does nothing when disabled.
    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        debug_assert!(self.thread.lock().unwrap().is_none());
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("Sched Opt".to_owned())
            .spawn(move || this.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        info!(
            gap_threshold = self.config.gap_threshold,
            "optimistic scheduler started"
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

impl Drop for OptimisticScheduler {
    fn drop(&mut self) {
        // Thread must be stopped before destruction
        debug_assert!(self.thread.lock().unwrap().is_none());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_elections::test_support::active_elections;
    use crate::active_elections::ActiveElectionsConfig;
    use crate::election::test_support::{assert_timely, dev_context};
    use lattice_ledger::LedgerContext;
    use lattice_types::{Amount, BlockHash};

    fn info(block_count: u64) -> AccountInfo {
        AccountInfo {
            block_count,
            ..Default::default()
        }
    }

    fn conf(height: u64) -> ConfirmationHeightInfo {
        ConfirmationHeightInfo::new(height, BlockHash::from(height))
    }

    fn scheduler(
        ledger: &LedgerContext,
        config: OptimisticSchedulerConfig,
    ) -> (Arc<OptimisticScheduler>, Arc<ActiveElections>) {
        let ctx = dev_context(ledger.ledger.clone());
        let (active, _sink) = active_elections(ctx.clone(), ActiveElectionsConfig::default());
        let scheduler = Arc::new(OptimisticScheduler::new(
            config,
            ledger.ledger.clone(),
            ctx.stats.clone(),
            active.clone(),
        ));
        (scheduler, active)
    }

    #[test]
    fn candidates_need_a_gap_or_no_confirmations() {
        let ledger = LedgerContext::new();
        let config = OptimisticSchedulerConfig {
            gap_threshold: 10,
            ..Default::default()
        };
        let (scheduler, _) = scheduler(&ledger, config);
        assert!(!scheduler.activate(&Account::from(1), &info(11), &conf(1)));
        assert!(scheduler.activate(&Account::from(2), &info(12), &conf(1)));
        assert!(scheduler.activate(&Account::from(3), &info(1), &conf(0)));
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn candidates_are_unique_and_bounded() {
        let ledger = LedgerContext::new();
        let config = OptimisticSchedulerConfig {
            max_size: 2,
            ..Default::default()
        };
        let (scheduler, _) = scheduler(&ledger, config);
        assert!(scheduler.activate(&Account::from(2), &info(1), &conf(0)));
        assert!(!scheduler.activate(&Account::from(2), &info(1), &conf(0)));
        assert!(scheduler.activate(&Account::from(3), &info(1), &conf(0)));
        assert!(!scheduler.activate(&Account::from(4), &info(1), &conf(0)));
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn disabled_scheduler_ignores_candidates() {
        let ledger = LedgerContext::new();
        let config = OptimisticSchedulerConfig {
            enabled: false,
            ..Default::default()
        };
        let (scheduler, _) = scheduler(&ledger, config);
        assert!(!scheduler.activate(&Account::from(2), &info(1), &conf(0)));
        scheduler.start().unwrap();
        scheduler.stop();
    }

    #[test]
    fn head_block_is_proposed_after_delay() {
        let ledger = LedgerContext::new();
        let account = Account::from(5);
        ledger.fund(account, Amount::new(1000));
        let genesis = ledger.genesis_account();
        for _ in 0..3 {
            ledger.send(genesis, Account::from(6), Amount::new(1));
        }
        let config = OptimisticSchedulerConfig {
            gap_threshold: 2,
            activation_delay: Duration::from_millis(20),
            ..Default::default()
        };
        let (scheduler, active) = scheduler(&ledger, config);

        let info = ledger.ledger.account_info(&genesis).unwrap().unwrap();
        let conf = ledger.ledger.confirmation_height(&genesis).unwrap();
        assert!(scheduler.activate(&genesis, &info, &conf));

        scheduler.start().unwrap();
        assert_timely(Duration::from_secs(5), || active.len() == 1);
        let election = active.list().pop().unwrap();
        assert_eq!(election.winner().hash(), info.head);
        assert_eq!(election.behavior(), ElectionBehavior::Optimistic);
        assert!(scheduler.is_empty());
        scheduler.stop();
    }
}
