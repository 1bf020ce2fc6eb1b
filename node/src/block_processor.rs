//! Block processing pipeline.
//!
//! Incoming blocks are queued and applied to the ledger in batches on a
//! dedicated thread, each batch under the ledger's `ProcessBatch` write
//! token. After the token is released the outcomes are acted on:
//! - a block with a missing previous or source is parked in the unchecked
//!   map under that dependency and recorded in the gap cache;
//! - an accepted block clears its gap cache entry and releases every block
//!   that was waiting on it back into the queue;
//! - every outcome, forks included, is reported to the processed observers.
//!
//! Forced blocks are election winners that lost the race into the ledger.
//! Before a forced block is applied, whatever occupies its chain position is
//! rolled back together with everything built on it, and the removed blocks
//! are reported to the rolled-back observers.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use lattice_ledger::{Ledger, LedgerError, ProcessResult, Writer};
use lattice_types::{Block, BlockHash, QualifiedRoot, SavedBlock};
use lattice_utils::{DetailType, StatType, Stats};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::gap_cache::GapCache;
use crate::unchecked::UncheckedMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockProcessorConfig {
    /// Queued blocks before new ones are refused.
    pub max_queue: usize,
    /// Blocks applied under one write token.
    pub batch_size: usize,
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        Self {
            max_queue: 8 * 1024,
            batch_size: 256,
        }
    }
}

/// Where an incoming block originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockSource {
    /// Received from a peer.
    Live,
    /// Submitted locally.
    Local,
    /// Released from the unchecked map once its dependency arrived.
    Unchecked,
    /// Election winner replacing a competing block already in the ledger.
    Forced,
}

/// A block together with ingestion metadata.
#[derive(Clone, Debug)]
pub struct BlockContext {
    pub block: Arc<Block>,
    pub source: BlockSource,
}

/// Queue with backpressure. Forced blocks go first and are never refused;
/// local blocks come next so local submissions are never starved by
/// network traffic.
pub struct ProcessingQueue {
    forced_queue: VecDeque<BlockContext>,
    local_queue: VecDeque<BlockContext>,
    other_queue: VecDeque<BlockContext>,
    max_capacity: usize,
}

impl ProcessingQueue {
    pub fn new(max_capacity: usize) -> Self {
        Self {
            forced_queue: VecDeque::new(),
            local_queue: VecDeque::new(),
            other_queue: VecDeque::new(),
            max_capacity,
        }
    }

    /// Returns `false` if the queue is full.
    pub fn enqueue(&mut self, ctx: BlockContext) -> bool {
        if ctx.source == BlockSource::Forced {
            self.forced_queue.push_back(ctx);
            return true;
        }
        if self.len() >= self.max_capacity {
            return false;
        }
        match ctx.source {
            BlockSource::Local => self.local_queue.push_back(ctx),
            _ => self.other_queue.push_back(ctx),
        }
        true
    }

    pub fn dequeue(&mut self) -> Option<BlockContext> {
        self.forced_queue
            .pop_front()
            .or_else(|| self.local_queue.pop_front())
            .or_else(|| self.other_queue.pop_front())
    }

    pub fn len(&self) -> usize {
        self.forced_queue.len() + self.local_queue.len() + self.other_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ProcessedObserver = Box<dyn Fn(&ProcessResult, &BlockContext) + Send + Sync>;

/// Called with the blocks removed to make room for a forced block and the
/// chain position that block occupies.
pub type RolledBackObserver = Box<dyn Fn(&[SavedBlock], &QualifiedRoot) + Send + Sync>;

/// Blocks removed by one rollback, with the root the forced block claimed.
struct RolledBack {
    blocks: Vec<SavedBlock>,
    root: QualifiedRoot,
}

struct ProcessorData {
    stopped: bool,
    queue: ProcessingQueue,
}

pub struct BlockProcessor {
    config: BlockProcessorConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    unchecked: Arc<UncheckedMap>,
    gap_cache: Arc<GapCache>,
    data: Mutex<ProcessorData>,
    condition: Condvar,
    processed_observers: Mutex<Vec<ProcessedObserver>>,
    rolled_back_observers: Mutex<Vec<RolledBackObserver>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

fn detail(result: &ProcessResult) -> DetailType {
    match result {
        ProcessResult::Progress(_) => DetailType::Progress,
        ProcessResult::Old => DetailType::Old,
        ProcessResult::GapPrevious => DetailType::GapPrevious,
        ProcessResult::GapSource => DetailType::GapSource,
        ProcessResult::Fork => DetailType::Fork,
        ProcessResult::Unreceivable => DetailType::Unreceivable,
        ProcessResult::NegativeSpend => DetailType::NegativeSpend,
        ProcessResult::BalanceMismatch => DetailType::BalanceMismatch,
        ProcessResult::Invalid => DetailType::Invalid,
    }
}

/// The send a receiving block claims, for legacy and state blocks alike.
fn source_dependency(block: &Block) -> Option<BlockHash> {
    block
        .source_field()
        .or_else(|| block.link_field().map(|link| link.as_block_hash()))
        .filter(|hash| !hash.is_zero())
}

impl BlockProcessor {
    pub fn new(
        config: BlockProcessorConfig,
        ledger: Arc<Ledger>,
        stats: Arc<Stats>,
        unchecked: Arc<UncheckedMap>,
        gap_cache: Arc<GapCache>,
    ) -> Self {
        let queue = ProcessingQueue::new(config.max_queue);
        Self {
            config,
            ledger,
            stats,
            unchecked,
            gap_cache,
            data: Mutex::new(ProcessorData {
                stopped: false,
                queue,
            }),
            condition: Condvar::new(),
            processed_observers: Mutex::new(Vec::new()),
            rolled_back_observers: Mutex::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn on_processed(&self, observer: ProcessedObserver) {
        self.processed_observers.lock().unwrap().push(observer);
    }

    pub fn on_rolled_back(&self, observer: RolledBackObserver) {
        self.rolled_back_observers.lock().unwrap().push(observer);
    }

    /// Queue an election winner, replacing any competitor in the ledger.
    pub fn force(&self, block: Arc<Block>) {
        let hash = block.hash();
        let mut data = self.data.lock().unwrap();
        data.queue.enqueue(BlockContext {
            block,
            source: BlockSource::Forced,
        });
        self.stats.inc(StatType::BlockProcessor, DetailType::Force);
        debug!(%hash, "block forced");
        self.condition.notify_all();
    }

    /// Queue `block`. Returns false if the queue is full.
    pub fn add(&self, block: Arc<Block>, source: BlockSource) -> bool {
        let mut data = self.data.lock().unwrap();
        if !data.queue.enqueue(BlockContext { block, source }) {
            self.stats
                .inc(StatType::BlockProcessor, DetailType::Overfill);
            return false;
        }
        self.stats.inc(StatType::BlockProcessor, DetailType::Insert);
        self.condition.notify_all();
        true
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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
            self.stats.inc(StatType::BlockProcessor, DetailType::Loop);

            let mut batch = Vec::with_capacity(self.config.batch_size);
            while batch.len() < self.config.batch_size.max(1) {
                match data.queue.dequeue() {
                    Some(ctx) => batch.push(ctx),
                    None => break,
                }
            }
            drop(data);

            let (processed, rolled_back) = self.process_batch(batch);
            {
                let observers = self.rolled_back_observers.lock().unwrap();
                for event in &rolled_back {
                    for observer in observers.iter() {
                        observer(&event.blocks, &event.root);
                    }
                }
            }
            for (result, ctx) in &processed {
                self.handle(result, ctx);
            }
            {
                let observers = self.processed_observers.lock().unwrap();
                for (result, ctx) in &processed {
                    for observer in observers.iter() {
                        observer(result, ctx);
                    }
                }
            }

            data = self.data.lock().unwrap();
        }
    }

    /// Apply `batch` to the ledger under one write token.
    fn process_batch(
        &self,
        batch: Vec<BlockContext>,
    ) -> (Vec<(ProcessResult, BlockContext)>, Vec<RolledBack>) {
        let _guard = self.ledger.write_queue().wait(Writer::ProcessBatch);
        let mut processed = Vec::with_capacity(batch.len());
        let mut rolled_back = Vec::new();
        for ctx in batch {
            if ctx.source == BlockSource::Forced {
                if let Some(event) = self.rollback_competitor(&ctx.block) {
                    rolled_back.push(event);
                }
            }
            let result = match self.ledger.process(&ctx.block) {
                Ok(result) => result,
                Err(err) => {
                    error!(hash = %ctx.block.hash(), %err, "block processing failed");
                    panic!("block processing failed for {}: {err}", ctx.block.hash());
                }
            };
            self.stats.inc(StatType::BlockProcessor, detail(&result));
            trace!(hash = %ctx.block.hash(), result = result.as_str(), source = ?ctx.source, "block processed");
            processed.push((result, ctx));
        }
        debug!(count = processed.len(), "block batch processed");
        (processed, rolled_back)
    }

    /// Roll back the block holding `block`'s chain position, if it is a
    /// different block. Must be called with the write token held.
    fn rollback_competitor(&self, block: &Block) -> Option<RolledBack> {
        let hash = block.hash();
        let previous = block.previous();
        let competitor = if previous.is_zero() {
            let account = block.account_field()?;
            self.ledger
                .account_info(&account)
                .map(|info| info.map(|info| info.open_block))
        } else {
            self.ledger.successor(&previous)
        };
        let competitor = match competitor {
            Ok(Some(competitor)) if competitor != hash => competitor,
            Ok(_) => return None,
            Err(err) => {
                error!(%hash, %err, "competitor lookup failed");
                panic!("competitor lookup failed for {hash}: {err}");
            }
        };

        match self.ledger.rollback(&competitor) {
            Ok(blocks) => {
                self.stats.inc(StatType::BlockProcessor, DetailType::Rollback);
                info!(
                    %competitor,
                    winner = %hash,
                    count = blocks.len(),
                    "rolled back competitor of forced block"
                );
                Some(RolledBack {
                    blocks,
                    root: block.qualified_root(),
                })
            }
            Err(LedgerError::RollbackCemented(cemented)) => {
                self.stats
                    .inc(StatType::BlockProcessor, DetailType::RollbackFailed);
                warn!(%competitor, %cemented, winner = %hash, "cannot roll back cemented competitor");
                None
            }
            Err(err) => {
                error!(%competitor, %err, "rollback failed");
                panic!("rollback of {competitor} failed: {err}");
            }
        }
    }

    fn handle(&self, result: &ProcessResult, ctx: &BlockContext) {
        let hash = ctx.block.hash();
        match result {
            ProcessResult::Progress(_) => {
                self.gap_cache.erase(&hash);
                for block in self.unchecked.trigger(&hash) {
                    self.add(block, BlockSource::Unchecked);
                }
            }
            ProcessResult::GapPrevious => {
                self.unchecked.put(ctx.block.previous(), ctx.block.clone());
                self.gap_cache.add(hash);
            }
            ProcessResult::GapSource => {
                if let Some(source) = source_dependency(&ctx.block) {
                    self.unchecked.put(source, ctx.block.clone());
                    self.gap_cache.add(hash);
                }
            }
            _ => {}
        }
    }

    pub fn start(self: &Arc<Self>) -> io::Result<()> {
        debug_assert!(self.thread.lock().unwrap().is_none());
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("Blck processing".to_owned())
            .spawn(move || this.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        info!(
            max_queue = self.config.max_queue,
            batch_size = self.config.batch_size,
            "block processor started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.data.lock().unwrap().stopped = true;
        self.condition.notify_all();
        let thread = self.thread.lock().unwrap().take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

impl Drop for BlockProcessor {
    fn drop(&mut self) {
        // Thread must be stopped before destruction
        debug_assert!(self.thread.lock().unwrap().is_none());
    }
}
