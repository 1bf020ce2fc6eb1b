//! Confirming set: the queue between confirmed elections and cementing.
//!
//! Confirmed winners are added here and cemented on a dedicated thread, in
//! batches. Each batch picks a cementing strategy; in automatic mode the
//! unbounded cementer is used while the uncemented backlog is small and the
//! bounded one once it grows past `unbounded_cutoff`.
//!
//! Observers are notified from a second thread so slow observers cannot
//! stall cementing, but the queue of pending notifications is capped at
//! `max_queued_notifications` batches; beyond that the cementing thread
//! waits.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_consensus::ConfirmationSink;
use lattice_ledger::{Ledger, LedgerError};
use lattice_types::{BlockHash, SavedBlock};
use lattice_utils::{DetailType, StatType, Stats};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cementing::{Cementer, CementingMode};
use crate::cementing_bounded::BoundedCementer;
use crate::cementing_unbounded::UnboundedCementer;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmingSetConfig {
    /// Hashes taken from the queue per batch.
    pub batch_size: usize,
    /// Queue capacity; further hashes are dropped.
    pub max_blocks: usize,
    /// Longest the bounded cementer holds writes before flushing.
    pub batch_time_ms: u64,
    /// Cemented batches waiting for observers before cementing pauses.
    pub max_queued_notifications: usize,
    /// Pending writes that force a bounded flush.
    pub max_pending_writes: usize,
    /// Uncemented block count below which automatic mode cements unbounded.
    pub unbounded_cutoff: u64,
    pub mode: CementingMode,
}

impl Default for ConfirmingSetConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            max_blocks: 128 * 1024,
            batch_time_ms: 250,
            max_queued_notifications: 8,
            max_pending_writes: 16 * 1024,
            unbounded_cutoff: 4096,
            mode: CementingMode::Automatic,
        }
    }
}

impl ConfirmingSetConfig {
    pub fn batch_time(&self) -> Duration {
        Duration::from_millis(self.batch_time_ms)
    }
}

/// Outcome of one cementing batch.
#[derive(Clone, Debug, Default)]
pub struct CementedBatch {
    pub cemented: Vec<SavedBlock>,
    /// Hashes that were queued but had been cemented already.
    pub already_cemented: Vec<BlockHash>,
    pub mode: CementingMode,
}

pub type CementedObserver = Box<dyn Fn(&SavedBlock) + Send + Sync>;
pub type AlreadyCementedObserver = Box<dyn Fn(&BlockHash) + Send + Sync>;
pub type BatchObserver = Box<dyn Fn(&CementedBatch) + Send + Sync>;

#[derive(Default)]
struct SetData {
    stopped: bool,
    queue: VecDeque<BlockHash>,
    /// Everything queued or in the batch being cemented.
    set: HashSet<BlockHash>,
    notifications: VecDeque<CementedBatch>,
}

#[derive(Default)]
struct Observers {
    cemented: Vec<CementedObserver>,
    already_cemented: Vec<AlreadyCementedObserver>,
    batch: Vec<BatchObserver>,
}

pub struct ConfirmingSet {
    config: ConfirmingSetConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    data: Mutex<SetData>,
    condition: Condvar,
    observers: Mutex<Observers>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ConfirmingSet {
    pub fn new(config: ConfirmingSetConfig, ledger: Arc<Ledger>, stats: Arc<Stats>) -> Self {
        Self {
            config,
            ledger,
            stats,
            data: Mutex::new(SetData::default()),
            condition: Condvar::new(),
            observers: Mutex::new(Observers::default()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConfirmingSetConfig {
        &self.config
    }

    /// Called once for every newly cemented block, dependencies first.
    pub fn on_cemented(&self, observer: CementedObserver) {
        self.observers.lock().unwrap().cemented.push(observer);
    }

    pub fn on_already_cemented(&self, observer: AlreadyCementedObserver) {
        self.observers.lock().unwrap().already_cemented.push(observer);
    }

    pub fn on_batch_cemented(&self, observer: BatchObserver) {
        self.observers.lock().unwrap().batch.push(observer);
    }

    /// Queue `hash` for cementing. Returns false if it is already queued or
    /// the queue is full.
    pub fn add(&self, hash: BlockHash) -> bool {
        let mut data = self.data.lock().unwrap();
        if data.set.contains(&hash) {
            self.stats
                .inc(StatType::ConfirmingSet, DetailType::Ignored);
            return false;
        }
        if data.queue.len() >= self.config.max_blocks {
            self.stats
                .inc(StatType::ConfirmingSet, DetailType::Overfill);
            warn!(%hash, max_blocks = self.config.max_blocks, "confirming set full");
            return false;
        }
        data.set.insert(hash);
        data.queue.push_back(hash);
        self.stats.inc(StatType::ConfirmingSet, DetailType::Insert);
        self.condition.notify_all();
        true
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.data.lock().unwrap().set.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strategy automatic mode would pick for the next batch.
    pub fn select_mode(&self) -> CementingMode {
        match self.config.mode {
            CementingMode::Automatic => {
                let uncemented = self
                    .ledger
                    .block_count()
                    .saturating_sub(self.ledger.cemented_count());
                if uncemented < self.config.unbounded_cutoff {
                    CementingMode::Unbounded
                } else {
                    CementingMode::Bounded
                }
            }
            mode => mode,
        }
    }

    fn cementer(&self, mode: CementingMode) -> Box<dyn Cementer> {
        match mode {
            CementingMode::Bounded => Box::new(BoundedCementer::new(
                self.ledger.clone(),
                self.config.max_pending_writes,
                self.config.batch_time(),
            )),
            _ => Box::new(UnboundedCementer::new(self.ledger.clone())),
        }
    }

    /// Cement `hashes` with one strategy. Storage failures other than a
    /// missing block are fatal.
    fn cement_batch(&self, hashes: &[BlockHash]) -> CementedBatch {
        let mut cementer = self.cementer(self.select_mode());
        let mut batch = CementedBatch {
            mode: cementer.mode(),
            ..Default::default()
        };
        let detail = match batch.mode {
            CementingMode::Bounded => DetailType::Bounded,
            _ => DetailType::Unbounded,
        };
        self.stats.inc(StatType::Cementing, detail);

        for hash in hashes {
            match cementer.cement(hash) {
                Ok(blocks) if blocks.is_empty() => {
                    self.stats
                        .inc(StatType::ConfirmingSet, DetailType::AlreadyCemented);
                    batch.already_cemented.push(*hash);
                }
                Ok(blocks) => {
                    self.stats.add(
                        StatType::ConfirmingSet,
                        DetailType::Cemented,
                        blocks.len() as u64,
                    );
                    batch.cemented.extend(blocks);
                }
                Err(LedgerError::BlockNotFound(missing)) => {
                    self.stats
                        .inc(StatType::ConfirmingSet, DetailType::BlockNotFound);
                    warn!(%hash, %missing, "block to cement not found");
                }
                Err(err) => {
                    error!(%hash, %err, "cementing failed");
                    panic!("cementing failed for {hash}: {err}");
                }
            }
        }
        debug!(
            mode = batch.mode.as_str(),
            cemented = batch.cemented.len(),
            already_cemented = batch.already_cemented.len(),
            "batch cemented"
        );
        batch
    }

    fn run(&self) {
        let mut data = self.data.lock().unwrap();
        while !data.stopped {
            if data.queue.is_empty() {
                data = self
                    .condition
                    .wait_while(data, |d| !d.stopped && d.queue.is_empty())
                    .unwrap();
                continue;
            }
            self.stats.inc(StatType::ConfirmingSet, DetailType::Loop);

            let count = self.config.batch_size.max(1).min(data.queue.len());
            let hashes: Vec<_> = data.queue.drain(..count).collect();
            drop(data);

            let batch = self.cement_batch(&hashes);

            data = self.data.lock().unwrap();
            for hash in &hashes {
                data.set.remove(hash);
            }
            data = self
                .condition
                .wait_while(data, |d| {
                    !d.stopped && d.notifications.len() >= self.config.max_queued_notifications.max(1)
                })
                .unwrap();
            data.notifications.push_back(batch);
            self.condition.notify_all();
        }
    }

    fn run_notifications(&self) {
        let mut data = self.data.lock().unwrap();
        loop {
            data = self
                .condition
                .wait_while(data, |d| !d.stopped && d.notifications.is_empty())
                .unwrap();
            let Some(batch) = data.notifications.pop_front() else {
                // Stopped with nothing left to deliver
                break;
            };
            self.condition.notify_all();
            drop(data);

            self.notify(&batch);

            data = self.data.lock().unwrap();
        }
    }

    fn notify(&self, batch: &CementedBatch) {
        let observers = self.observers.lock().unwrap();
        for block in &batch.cemented {
            for observer in &observers.cemented {
                observer(block);
            }
        }
        self.stats.add(
            StatType::ConfirmingSet,
            DetailType::NotifyCemented,
            batch.cemented.len() as u64,
        );
        for hash in &batch.already_cemented {
            for observer in &observers.already_cemented {
                observer(hash);
            }
        }
        self.stats.add(
            StatType::ConfirmingSet,
            DetailType::NotifyAlreadyCemented,
            batch.already_cemented.len() as u64,
        );
        for observer in &observers.batch {
            observer(batch);
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        let mut threads = self.threads.lock().unwrap();
        debug_assert!(threads.is_empty());

        let this = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("Conf height".to_owned())
                .spawn(move || this.run())?,
        );
        let this = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("Conf notif".to_owned())
                .spawn(move || this.run_notifications())?,
        );
        info!(
            batch_size = self.config.batch_size,
            mode = self.config.mode.as_str(),
            "confirming set started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.data.lock().unwrap().stopped = true;
        self.condition.notify_all();
        let threads: Vec<_> = self.threads.lock().unwrap().drain(..).collect();
        for thread in threads {
            let _ = thread.join();
        }
    }
}

impl ConfirmationSink for ConfirmingSet {
    fn add(&self, hash: BlockHash) {
        ConfirmingSet::add(self, hash);
    }

    fn len(&self) -> usize {
        ConfirmingSet::len(self)
    }
}

impl Drop for ConfirmingSet {
    fn drop(&mut self) {
        // Threads must be stopped before destruction
        debug_assert!(self.threads.lock().unwrap().is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cementing::test_support::chained_receives;
    use lattice_ledger::LedgerContext;
    use lattice_store::ConfirmationHeightInfo;
    use lattice_types::{Account, Amount};
    use std::time::Instant;

    fn assert_timely(timeout: Duration, mut condition: impl FnMut() -> bool) {
        let start = Instant::now();
        while !condition() {
            assert!(start.elapsed() < timeout, "condition not met within {timeout:?}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn confirming_set(ctx: &LedgerContext, config: ConfirmingSetConfig) -> Arc<ConfirmingSet> {
        Arc::new(ConfirmingSet::new(
            config,
            ctx.ledger.clone(),
            Arc::new(Stats::new()),
        ))
    }

    #[test]
    fn duplicate_hashes_are_queued_once() {
        let ctx = LedgerContext::new();
        let set = confirming_set(&ctx, ConfirmingSetConfig::default());
        assert!(set.add(BlockHash::from(1)));
        assert!(!set.add(BlockHash::from(1)));
        assert!(set.contains(&BlockHash::from(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn full_queue_drops_new_hashes() {
        let ctx = LedgerContext::new();
        let config = ConfirmingSetConfig {
            max_blocks: 1,
            ..Default::default()
        };
        let set = confirming_set(&ctx, config);
        assert!(set.add(BlockHash::from(1)));
        assert!(!set.add(BlockHash::from(2)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn automatic_mode_follows_backlog() {
        let ctx = LedgerContext::new();
        let config = ConfirmingSetConfig {
            unbounded_cutoff: 2,
            ..Default::default()
        };
        let set = confirming_set(&ctx, config);
        assert_eq!(set.select_mode(), CementingMode::Unbounded);
        let genesis = ctx.genesis_account();
        ctx.send(genesis, Account::from(5), Amount::new(1));
        ctx.send(genesis, Account::from(5), Amount::new(1));
        assert_eq!(set.select_mode(), CementingMode::Bounded);
    }

    #[test]
    fn cemented_blocks_are_notified_in_order() {
        let (ctx, receive) = chained_receives();
        let set = confirming_set(&ctx, ConfirmingSetConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set.on_cemented(Box::new(move |block: &SavedBlock| {
            sink.lock().unwrap().push(block.hash());
        }));

        set.start().unwrap();
        set.add(receive.hash());
        assert_timely(Duration::from_secs(5), || {
            seen.lock().unwrap().len() as u64 == ctx.ledger.block_count() - 1
        });
        assert_eq!(*seen.lock().unwrap().last().unwrap(), receive.hash());
        assert_timely(Duration::from_secs(5), || set.is_empty());
        set.stop();
    }

    #[test]
    fn re_cementing_is_reported_and_changes_nothing() {
        let ctx = LedgerContext::new();
        let genesis = ctx.genesis_account();
        let send = ctx.send(genesis, Account::from(5), Amount::new(1));
        let set = confirming_set(&ctx, ConfirmingSetConfig::default());
        let already = Arc::new(Mutex::new(Vec::new()));
        let sink = already.clone();
        set.on_already_cemented(Box::new(move |hash: &BlockHash| {
            sink.lock().unwrap().push(*hash);
        }));
        set.start().unwrap();

        set.add(send.hash());
        assert_timely(Duration::from_secs(5), || {
            ctx.ledger.block_confirmed(&send.hash()).unwrap() && set.is_empty()
        });
        let height = ctx.ledger.confirmation_height(&genesis).unwrap();
        assert_eq!(height, ConfirmationHeightInfo::new(2, send.hash()));

        set.add(send.hash());
        assert_timely(Duration::from_secs(5), || already.lock().unwrap().len() == 1);
        assert_eq!(already.lock().unwrap()[0], send.hash());
        assert_eq!(ctx.ledger.confirmation_height(&genesis).unwrap(), height);
        set.stop();
    }

    #[test]
    fn missing_block_is_counted_not_fatal() {
        let ctx = LedgerContext::new();
        let stats = Arc::new(Stats::new());
        let set = Arc::new(ConfirmingSet::new(
            ConfirmingSetConfig::default(),
            ctx.ledger.clone(),
            stats.clone(),
        ));
        set.start().unwrap();
        set.add(BlockHash::from(404));
        assert_timely(Duration::from_secs(5), || {
            stats.count(StatType::ConfirmingSet, DetailType::BlockNotFound) == 1
        });
        set.stop();
    }
}
