//! The node: wires the ledger, consensus and cementing components together.
//!
//! Data flows in a loop:
//! - the block processor applies blocks and hands accepted ones to the
//!   priority scheduler, and forks to their running election;
//! - schedulers start elections in the active elections container;
//! - votes reach elections through the vote router, and confirmed winners
//!   are queued in the confirming set;
//! - cemented blocks confirm dependent elections, free scheduler slots and
//!   activate the next block of each touched account;
//! - an election whose winner changes forces the winner into the ledger,
//!   rolling back the competitor, and elections for rolled-back blocks are
//!   dropped.
//!
//! Observers hold weak references back to the components they drive, so
//! dropping the node releases everything.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use lattice_consensus::{
    ActiveElections, Election, ElectionContext, ElectionStatus, ElectionStatusType,
    ElectionTimings, HintedScheduler, OnlineReps, OnlineRepsConfig, OptimisticScheduler,
    PriorityScheduler, RecentlyConfirmed, VoteCache, VoteCode, VoteRouter, VoteSource,
};
use lattice_ledger::{Genesis, Ledger, ProcessResult};
use lattice_store::LedgerStore;
use lattice_store_lmdb::LmdbStore;
use lattice_types::{Block, BlockHash, QualifiedRoot, SavedBlock, Vote};
use lattice_utils::Stats;
use tracing::{debug, info, warn};

use crate::backlog_scan::{ActivatedInfo, BacklogScan};
use crate::block_processor::{BlockContext, BlockProcessor, BlockSource};
use crate::config::NodeConfig;
use crate::confirming_set::ConfirmingSet;
use crate::error::NodeError;
use crate::gap_cache::GapCache;
use crate::metrics::NodeMetrics;
use crate::unchecked::UncheckedMap;

/// A running lattice node.
pub struct Node {
    pub config: NodeConfig,
    pub stats: Arc<Stats>,
    pub metrics: Arc<NodeMetrics>,
    pub ledger: Arc<Ledger>,
    /// Shared by the vote router and active elections.
    pub recently_confirmed: Arc<RecentlyConfirmed>,
    pub election_context: Arc<ElectionContext>,
    pub active_elections: Arc<ActiveElections>,
    pub confirming_set: Arc<ConfirmingSet>,
    pub gap_cache: Arc<GapCache>,
    pub unchecked: Arc<UncheckedMap>,
    pub block_processor: Arc<BlockProcessor>,
    pub priority_scheduler: Arc<PriorityScheduler>,
    pub optimistic_scheduler: Arc<OptimisticScheduler>,
    pub hinted_scheduler: Arc<HintedScheduler>,
    pub backlog_scan: Arc<BacklogScan>,
    started: Mutex<bool>,
}

impl Node {
    /// Open the LMDB store under `config.data_dir` and build a node on it.
    pub fn open(config: NodeConfig) -> Result<Self, NodeError> {
        let path = config.data_dir.join("ledger");
        let store = LmdbStore::open(Path::new(&path), &config.lmdb)?;
        info!(path = %path.display(), "ledger store opened");
        Self::new(config, Arc::new(store))
    }

    /// Build a node over `store`, seeding it with the network's genesis if
    /// it is empty. Nothing runs until [`Node::start`].
    pub fn new(config: NodeConfig, store: Arc<dyn LedgerStore>) -> Result<Self, NodeError> {
        let stats = Arc::new(Stats::new());
        let metrics = Arc::new(NodeMetrics::new());
        let network = config.network;
        let ledger = Arc::new(Ledger::new(store, Genesis::for_network(network))?);

        let recently_confirmed = Arc::new(RecentlyConfirmed::default());
        let vote_cache = Arc::new(Mutex::new(VoteCache::new(
            (&config.vote_cache).into(),
            stats.clone(),
        )));
        let vote_router = Arc::new(VoteRouter::new(
            vote_cache.clone(),
            recently_confirmed.clone(),
            ledger.clone(),
            stats.clone(),
        ));
        let election_context = Arc::new(ElectionContext {
            network,
            timings: ElectionTimings::for_network(network),
            ledger: ledger.clone(),
            online_reps: Arc::new(OnlineReps::new(
                ledger.clone(),
                network,
                OnlineRepsConfig::default(),
            )),
            vote_cache,
            vote_router,
            stats: stats.clone(),
        });

        let confirming_set = Arc::new(ConfirmingSet::new(
            config.confirming_set.clone(),
            ledger.clone(),
            stats.clone(),
        ));
        let active_elections = Arc::new(ActiveElections::new(
            config.active_elections.clone(),
            election_context.clone(),
            recently_confirmed.clone(),
            confirming_set.clone(),
        ));

        let gap_cache = Arc::new(GapCache::new(config.gap_cache.clone(), stats.clone()));
        let unchecked = Arc::new(UncheckedMap::new(config.unchecked.clone(), stats.clone()));
        let block_processor = Arc::new(BlockProcessor::new(
            config.block_processor.clone(),
            ledger.clone(),
            stats.clone(),
            unchecked.clone(),
            gap_cache.clone(),
        ));

        let priority_scheduler = Arc::new(PriorityScheduler::new(
            config.priority_scheduler.clone(),
            ledger.clone(),
            stats.clone(),
            active_elections.clone(),
        ));
        let optimistic_scheduler = Arc::new(OptimisticScheduler::new(
            (&config.optimistic_scheduler).into(),
            ledger.clone(),
            stats.clone(),
            active_elections.clone(),
        ));
        let hinted_scheduler = Arc::new(HintedScheduler::new(
            (&config.hinted_scheduler).into(),
            ledger.clone(),
            stats.clone(),
            active_elections.clone(),
        ));
        let backlog_scan = Arc::new(BacklogScan::new(
            config.backlog_scan.clone(),
            ledger.clone(),
            stats.clone(),
        ));

        let node = Self {
            config,
            stats,
            metrics,
            ledger,
            recently_confirmed,
            election_context,
            active_elections,
            confirming_set,
            gap_cache,
            unchecked,
            block_processor,
            priority_scheduler,
            optimistic_scheduler,
            hinted_scheduler,
            backlog_scan,
            started: Mutex::new(false),
        };
        node.connect_observers();
        Ok(node)
    }

    // ── Wiring ──────────────────────────────────────────────────────────

    fn connect_observers(&self) {
        // Cemented blocks settle their elections and unblock the next block.
        let active = Arc::downgrade(&self.active_elections);
        let priority = Arc::downgrade(&self.priority_scheduler);
        let gap_cache = Arc::downgrade(&self.gap_cache);
        let metrics = Arc::clone(&self.metrics);
        self.confirming_set
            .on_cemented(Box::new(move |block: &SavedBlock| {
                metrics.cemented_blocks.inc();
                if let Some(active) = active.upgrade() {
                    active.block_cemented(&Arc::new(block.block().clone()));
                }
                if let Some(gap_cache) = gap_cache.upgrade() {
                    gap_cache.erase(&block.hash());
                }
                if let Some(priority) = priority.upgrade() {
                    if let Err(err) = priority.activate_successors(block) {
                        warn!(hash = %block.hash(), %err, "successor activation failed");
                    }
                }
            }));

        let priority = Arc::downgrade(&self.priority_scheduler);
        self.active_elections
            .on_election_stopped(Box::new(move |election: &Arc<Election>| {
                if let Some(priority) = priority.upgrade() {
                    priority.election_stopped(election);
                }
            }));

        let priority = Arc::downgrade(&self.priority_scheduler);
        let optimistic = Arc::downgrade(&self.optimistic_scheduler);
        let hinted = Arc::downgrade(&self.hinted_scheduler);
        self.active_elections.on_vacancy_update(Box::new(move || {
            if let Some(priority) = priority.upgrade() {
                priority.notify();
            }
            if let Some(optimistic) = optimistic.upgrade() {
                optimistic.notify();
            }
            if let Some(hinted) = hinted.upgrade() {
                hinted.notify();
            }
        }));

        // A new winner replaces whatever occupies its chain position.
        let block_processor = Arc::downgrade(&self.block_processor);
        self.active_elections
            .on_winner_changed(Box::new(move |block: &Arc<Block>| {
                if let Some(block_processor) = block_processor.upgrade() {
                    block_processor.force(block.clone());
                }
            }));

        // Elections built on rolled-back blocks can never confirm.
        let active = Arc::downgrade(&self.active_elections);
        self.block_processor.on_rolled_back(Box::new(
            move |blocks: &[SavedBlock], root: &QualifiedRoot| {
                let Some(active) = active.upgrade() else {
                    return;
                };
                for block in blocks {
                    let block_root = block.qualified_root();
                    if block_root != *root {
                        active.erase(&block_root);
                    }
                }
            },
        ));

        let metrics = Arc::clone(&self.metrics);
        self.active_elections
            .on_confirmed(Box::new(move |status: &ElectionStatus| {
                if status.status_type == ElectionStatusType::ActiveConfirmedQuorum {
                    metrics
                        .election_duration_ms
                        .observe(status.duration.as_secs_f64() * 1000.0);
                }
            }));

        let priority = Arc::downgrade(&self.priority_scheduler);
        let active = Arc::downgrade(&self.active_elections);
        let confirming_set = Arc::downgrade(&self.confirming_set);
        let ledger = Arc::clone(&self.ledger);
        let recently_confirmed = Arc::clone(&self.recently_confirmed);
        let metrics = Arc::clone(&self.metrics);
        self.block_processor.on_processed(Box::new(
            move |result: &ProcessResult, context: &BlockContext| {
                metrics.blocks_processed.inc();
                match result {
                    ProcessResult::Progress(saved) => {
                        // Confirmed before it reached the ledger: the winner
                        // was dropped by the confirming set and is queued again.
                        if recently_confirmed.hash_exists(&saved.hash())
                            && !ledger.block_confirmed(&saved.hash()).unwrap_or(true)
                        {
                            if let Some(confirming_set) = confirming_set.upgrade() {
                                confirming_set.add(saved.hash());
                            }
                        }
                        if let Some(priority) = priority.upgrade() {
                            if let Err(err) = priority.activate(&saved.account()) {
                                warn!(hash = %saved.hash(), %err, "activation failed");
                            }
                        }
                    }
                    ProcessResult::Fork => {
                        if let Some(active) = active.upgrade() {
                            active.publish(&context.block);
                        }
                    }
                    _ => {}
                }
            },
        ));

        let priority = Arc::downgrade(&self.priority_scheduler);
        let optimistic = Arc::downgrade(&self.optimistic_scheduler);
        self.backlog_scan
            .on_batch_activated(Box::new(move |batch: &[ActivatedInfo]| {
                let (Some(priority), Some(optimistic)) = (priority.upgrade(), optimistic.upgrade())
                else {
                    return;
                };
                for info in batch {
                    if let Err(err) = priority.activate(&info.account) {
                        warn!(account = %info.account, %err, "backlog activation failed");
                    }
                    optimistic.activate(&info.account, &info.account_info, &info.conf_info);
                }
            }));
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub fn start(&self) -> Result<(), NodeError> {
        let mut started = self.started.lock().unwrap();
        if *started {
            return Ok(());
        }
        self.election_context.vote_router.start()?;
        self.confirming_set.start()?;
        self.active_elections.start()?;
        self.block_processor.start()?;
        self.priority_scheduler.start()?;
        self.optimistic_scheduler.start()?;
        self.hinted_scheduler.start()?;
        self.backlog_scan.start()?;
        *started = true;
        info!(
            network = self.config.network.as_str(),
            blocks = self.ledger.block_count(),
            cemented = self.ledger.cemented_count(),
            "node started"
        );
        Ok(())
    }

    /// Stop every component, producers first.
    pub fn stop(&self) {
        let mut started = self.started.lock().unwrap();
        if !*started {
            return;
        }
        self.backlog_scan.stop();
        self.block_processor.stop();
        self.hinted_scheduler.stop();
        self.optimistic_scheduler.stop();
        self.priority_scheduler.stop();
        self.active_elections.stop();
        self.confirming_set.stop();
        self.election_context.vote_router.stop();
        *started = false;
        info!("node stopped");
    }

    // ── Inputs ──────────────────────────────────────────────────────────

    /// Queue `block` for processing. Returns false if the queue is full.
    pub fn process_block(&self, block: Block, source: BlockSource) -> bool {
        self.block_processor.add(Arc::new(block), source)
    }

    /// Route a live vote to its elections, caching it for hashes without one.
    pub fn process_vote(&self, vote: &Vote) -> HashMap<BlockHash, VoteCode> {
        self.metrics.votes_processed.inc();
        // Only live votes mark a representative online; cached replays do not.
        self.election_context.online_reps.observe(vote.account);
        let results = self
            .election_context
            .vote_router
            .vote(vote, VoteSource::Live);
        debug!(representative = %vote.account, hashes = vote.hashes.len(), "vote processed");
        results
    }

    // ── Housekeeping ────────────────────────────────────────────────────

    /// Drop stale cached votes and representatives no longer seen online.
    pub fn cleanup(&self) {
        self.election_context.vote_cache.lock().unwrap().cleanup();
        self.election_context.online_reps.trim();
    }

    /// Sample component sizes into the metric gauges.
    pub fn refresh_metrics(&self) {
        let m = &self.metrics;
        m.active_elections.set(self.active_elections.len() as i64);
        m.vote_cache
            .set(self.election_context.vote_cache.lock().unwrap().len() as i64);
        m.gap_cache.set(self.gap_cache.len() as i64);
        m.unchecked.set(self.unchecked.len() as i64);
        m.confirming_set.set(self.confirming_set.len() as i64);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}
