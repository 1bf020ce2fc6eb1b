//! Vote router: hands each hash of an incoming vote to the election that
//! owns it, or parks the vote in the vote cache until one does.
//!
//! The router only holds weak references. An election is owned by the
//! active elections container; once it is dropped the router's entry dies
//! with it and is swept by a background thread.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_ledger::Ledger;
use lattice_types::{BlockHash, Vote};
use lattice_utils::{DetailType, StatType, Stats};
use tracing::trace;

use crate::election::Election;
use crate::recently_confirmed::RecentlyConfirmed;
use crate::vote_cache::VoteCache;
use crate::vote_info::{VoteCode, VoteSource};

const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

pub type VoteProcessedCallback =
    Box<dyn Fn(&Vote, VoteSource, &HashMap<BlockHash, VoteCode>) + Send + Sync>;

struct State {
    stopped: bool,
    /// Every block of every live election, including forks.
    elections: HashMap<BlockHash, Weak<Election>>,
}

impl State {
    fn sweep(&mut self) {
        self.elections
            .retain(|_, election| election.strong_count() > 0)
    }
}

pub struct VoteRouter {
    thread: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<(Condvar, Mutex<State>)>,
    vote_processed_observers: Mutex<Vec<VoteProcessedCallback>>,
    vote_cache: Arc<Mutex<VoteCache>>,
    recently_confirmed: Arc<RecentlyConfirmed>,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
}

impl VoteRouter {
    pub fn new(
        vote_cache: Arc<Mutex<VoteCache>>,
        recently_confirmed: Arc<RecentlyConfirmed>,
        ledger: Arc<Ledger>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            thread: Mutex::new(None),
            shared: Arc::new((
                Condvar::new(),
                Mutex::new(State {
                    stopped: false,
                    elections: HashMap::new(),
                }),
            )),
            vote_processed_observers: Mutex::new(Vec::new()),
            vote_cache,
            recently_confirmed,
            ledger,
            stats,
        }
    }

    pub fn start(&self) -> io::Result<()> {
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("Vote router".to_owned())
            .spawn(move || {
                let (condition, state) = &*shared;
                let mut guard = state.lock().unwrap();
                while !guard.stopped {
                    guard.sweep();
                    guard = condition
                        .wait_timeout_while(guard, SWEEP_INTERVAL, |g| !g.stopped)
                        .unwrap()
                        .0;
                }
            })?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.1.lock().unwrap().stopped = true;
        self.shared.0.notify_all();
        let thread = self.thread.lock().unwrap().take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }

    pub fn on_vote_processed(&self, observer: VoteProcessedCallback) {
        self.vote_processed_observers.lock().unwrap().push(observer);
    }

    pub fn connect(&self, hash: BlockHash, election: Weak<Election>) {
        self.shared
            .1
            .lock()
            .unwrap()
            .elections
            .insert(hash, election);
    }

    pub fn disconnect(&self, hash: &BlockHash) {
        self.shared.1.lock().unwrap().elections.remove(hash);
    }

    pub fn disconnect_election(&self, election: &Election) {
        let hashes: Vec<BlockHash> = election.blocks().into_keys().collect();
        let mut state = self.shared.1.lock().unwrap();
        for hash in hashes {
            state.elections.remove(&hash);
        }
    }

    pub fn election(&self, hash: &BlockHash) -> Option<Arc<Election>> {
        self.shared.1.lock().unwrap().elections.get(hash)?.upgrade()
    }

    /// True if a live election owns `hash`.
    pub fn active(&self, hash: &BlockHash) -> bool {
        self.shared
            .1
            .lock()
            .unwrap()
            .elections
            .get(hash)
            .is_some_and(|e| e.strong_count() > 0)
    }

    pub fn len(&self) -> usize {
        self.shared.1.lock().unwrap().elections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route `vote` to the elections owning its hashes.
    ///
    /// Hashes without an election are answered `Replay` if they were
    /// recently confirmed and `Indeterminate` otherwise. Live votes are then
    /// cached for every hash that was not a replay, so an election created
    /// later can be filled from the cache.
    pub fn vote(&self, vote: &Vote, source: VoteSource) -> HashMap<BlockHash, VoteCode> {
        let mut results = HashMap::new();
        let mut process = HashMap::new();
        {
            let guard = self.shared.1.lock().unwrap();
            for hash in &vote.hashes {
                if results.contains_key(hash) || process.contains_key(hash) {
                    continue;
                }
                match guard.elections.get(hash).and_then(Weak::upgrade) {
                    Some(election) => {
                        process.insert(*hash, election);
                    }
                    None if self.recently_confirmed.hash_exists(hash) => {
                        results.insert(*hash, VoteCode::Replay);
                    }
                    None => {
                        results.insert(*hash, VoteCode::Indeterminate);
                    }
                }
            }
        }

        for (hash, election) in process {
            let code = election.vote(&vote.account, vote.timestamp, &hash, source);
            results.insert(hash, code);
        }

        for code in results.values() {
            let detail = match code {
                VoteCode::Vote => DetailType::Vote,
                VoteCode::Replay => DetailType::Replay,
                VoteCode::Indeterminate => DetailType::Indeterminate,
                VoteCode::Ignored => DetailType::Ignored,
            };
            self.stats.inc(StatType::VoteRouter, detail);
        }
        trace!(representative = %vote.account, timestamp = vote.timestamp, hashes = vote.hashes.len(), ?source, "vote routed");

        if source == VoteSource::Live {
            let weight = self.ledger.weight(&vote.account);
            self.vote_cache
                .lock()
                .unwrap()
                .insert(vote, weight, &results);
        }

        let observers = self.vote_processed_observers.lock().unwrap();
        for observer in observers.iter() {
            observer(vote, source, &results);
        }
        results
    }
}

impl Drop for VoteRouter {
    fn drop(&mut self) {
        // The sweep thread must be stopped before destruction
        debug_assert!(self.thread.lock().unwrap().is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::test_support::{dev_context, fork_block};
    use crate::election::ElectionBehavior;
    use lattice_ledger::LedgerContext;
    use lattice_types::Account;

    #[test]
    fn unknown_hash_is_indeterminate_and_cached() {
        let ledger = LedgerContext::new();
        let ctx = dev_context(ledger.ledger.clone());
        let rep = ledger.genesis_account();
        let vote = Vote::new(rep, 10, vec![BlockHash::from(5)]);

        let results = ctx.vote_router.vote(&vote, VoteSource::Live);
        assert_eq!(results[&BlockHash::from(5)], VoteCode::Indeterminate);
        let cache = ctx.vote_cache.lock().unwrap();
        assert_eq!(cache.tally(&BlockHash::from(5)), ledger.ledger.weight(&rep));
    }

    #[test]
    fn recently_confirmed_hash_is_replay() {
        let ledger = LedgerContext::new();
        let stats = Arc::new(Stats::new());
        let cache = Arc::new(Mutex::new(VoteCache::new(Default::default(), stats.clone())));
        let recently_confirmed = Arc::new(RecentlyConfirmed::default());
        let block = fork_block(1, 10);
        recently_confirmed.put(block.qualified_root(), block.hash());
        let router = VoteRouter::new(cache.clone(), recently_confirmed, ledger.ledger.clone(), stats);

        let vote = Vote::new(ledger.genesis_account(), 10, vec![block.hash()]);
        let results = router.vote(&vote, VoteSource::Live);
        assert_eq!(results[&block.hash()], VoteCode::Replay);
        assert!(cache.lock().unwrap().is_empty());
    }

    #[test]
    fn connected_election_receives_vote() {
        let ledger = LedgerContext::new();
        let ctx = dev_context(ledger.ledger.clone());
        let block = fork_block(1, 10);
        let election = Arc::new(Election::new(1, block.clone(), ElectionBehavior::Priority, ctx.clone(), None));
        ctx.vote_router.connect(block.hash(), Arc::downgrade(&election));
        assert!(ctx.vote_router.active(&block.hash()));

        let vote = Vote::new_final(ledger.genesis_account(), vec![block.hash()]);
        let results = ctx.vote_router.vote(&vote, VoteSource::Live);
        assert_eq!(results[&block.hash()], VoteCode::Vote);
        assert!(election.is_confirmed());
    }

    #[test]
    fn dropped_election_is_no_longer_active() {
        let ledger = LedgerContext::new();
        let ctx = dev_context(ledger.ledger.clone());
        let block = fork_block(1, 10);
        let election = Arc::new(Election::new(1, block.clone(), ElectionBehavior::Priority, ctx.clone(), None));
        ctx.vote_router.connect(block.hash(), Arc::downgrade(&election));
        drop(election);

        assert!(!ctx.vote_router.active(&block.hash()));
        assert!(ctx.vote_router.election(&block.hash()).is_none());
        let vote = Vote::new(Account::from(3), 10, vec![block.hash()]);
        let results = ctx.vote_router.vote(&vote, VoteSource::Live);
        assert_eq!(results[&block.hash()], VoteCode::Indeterminate);
    }

    #[test]
    fn sweep_thread_starts_and_stops() {
        let ledger = LedgerContext::new();
        let ctx = dev_context(ledger.ledger.clone());
        ctx.vote_router.start().unwrap();
        ctx.vote_router.stop();
    }

    #[test]
    fn observers_see_every_result() {
        let ledger = LedgerContext::new();
        let ctx = dev_context(ledger.ledger.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ctx.vote_router.on_vote_processed(Box::new(
            move |_: &Vote, source: VoteSource, results: &HashMap<BlockHash, VoteCode>| {
                sink.lock().unwrap().push((source, results.len()));
            },
        ));
        let vote = Vote::new(Account::from(3), 10, vec![BlockHash::from(1), BlockHash::from(2)]);
        ctx.vote_router.vote(&vote, VoteSource::Cache);
        assert_eq!(*seen.lock().unwrap(), vec![(VoteSource::Cache, 2)]);
    }
}
