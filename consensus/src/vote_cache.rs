//! Vote cache: stores votes that arrive before their election is created.
//!
//! Votes can arrive out of order. A representative might broadcast a vote
//! for a block before this node has seen the block, or before the scheduler
//! has started an election for it. The cache holds those early votes so they
//! can be replayed into the election once it starts.
//!
//! Per hash the cache keeps at most `max_voters` representatives, replacing a
//! representative's vote only when a newer timestamp arrives, and maintains
//! running tallies that are updated incrementally. Across hashes it keeps at
//! most `max_size` entries and evicts the oldest inserted one first.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_types::{vote::is_final_timestamp, Account, Amount, BlockHash, Vote};
use lattice_utils::{DetailType, StatType, Stats};

use crate::vote_info::VoteCode;

#[derive(Clone, Debug, PartialEq)]
pub struct VoteCacheConfig {
    pub max_size: usize,
    pub max_voters: usize,
    pub age_cutoff: Duration,
}

impl Default for VoteCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1024 * 64,
            max_voters: 64,
            age_cutoff: Duration::from_secs(15 * 60),
        }
    }
}

/// One representative's latest cached vote for a hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedVote {
    pub representative: Account,
    pub timestamp: u64,
    pub weight: Amount,
}

impl CachedVote {
    pub fn is_final(&self) -> bool {
        is_final_timestamp(self.timestamp)
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub hash: BlockHash,
    voters: Vec<CachedVote>,
    tally: Amount,
    final_tally: Amount,
    last_vote: Instant,
    id: u64,
}

impl CacheEntry {
    fn new(hash: BlockHash, id: u64) -> Self {
        Self {
            hash,
            voters: Vec::new(),
            tally: Amount::ZERO,
            final_tally: Amount::ZERO,
            last_vote: Instant::now(),
            id,
        }
    }

    pub fn voters(&self) -> &[CachedVote] {
        &self.voters
    }

    pub fn tally(&self) -> Amount {
        self.tally
    }

    pub fn final_tally(&self) -> Amount {
        self.final_tally
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    fn add_weight(&mut self, vote: &CachedVote) {
        self.tally = self.tally.saturating_add(vote.weight);
        if vote.is_final() {
            self.final_tally = self.final_tally.saturating_add(vote.weight);
        }
    }

    fn remove_weight(&mut self, vote: &CachedVote) {
        self.tally = self.tally.saturating_sub(vote.weight);
        if vote.is_final() {
            self.final_tally = self.final_tally.saturating_sub(vote.weight);
        }
    }

    /// Returns true if the entry changed.
    fn vote(&mut self, incoming: CachedVote, max_voters: usize) -> bool {
        if let Some(idx) = self
            .voters
            .iter()
            .position(|v| v.representative == incoming.representative)
        {
            if incoming.timestamp <= self.voters[idx].timestamp {
                return false;
            }
            let old = self.voters[idx];
            self.remove_weight(&old);
            self.voters[idx] = incoming;
            self.add_weight(&incoming);
            self.last_vote = Instant::now();
            return true;
        }

        if self.voters.len() >= max_voters {
            // Full: only a heavier representative may displace the lightest one.
            let Some(lightest) = self
                .voters
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.weight)
                .map(|(i, _)| i)
            else {
                return false;
            };
            if incoming.weight <= self.voters[lightest].weight {
                return false;
            }
            let removed = self.voters.swap_remove(lightest);
            self.remove_weight(&removed);
        }

        self.voters.push(incoming);
        self.add_weight(&incoming);
        self.last_vote = Instant::now();
        true
    }
}

/// Snapshot of a high-tally cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopEntry {
    pub hash: BlockHash,
    pub tally: Amount,
    pub final_tally: Amount,
}

/// Pre-election vote storage.
///
/// Entries are indexed three ways, updated together: by hash, by insertion
/// order (for oldest-first eviction) and by tally (for [`VoteCache::top`]).
pub struct VoteCache {
    config: VoteCacheConfig,
    stats: Arc<Stats>,
    entries: HashMap<BlockHash, CacheEntry>,
    sequential: BTreeMap<u64, BlockHash>,
    by_tally: BTreeSet<(Amount, BlockHash)>,
    next_id: u64,
    last_cleanup: Instant,
}

impl VoteCache {
    pub fn new(config: VoteCacheConfig, stats: Arc<Stats>) -> Self {
        Self {
            config,
            stats,
            entries: HashMap::new(),
            sequential: BTreeMap::new(),
            by_tally: BTreeSet::new(),
            next_id: 0,
            last_cleanup: Instant::now(),
        }
    }

    pub fn config(&self) -> &VoteCacheConfig {
        &self.config
    }

    /// Cache `vote` for every hash the router reported as `Vote` or
    /// `Indeterminate`. Hashes that were replays or ignored are skipped.
    pub fn insert(
        &mut self,
        vote: &Vote,
        rep_weight: Amount,
        results: &HashMap<BlockHash, VoteCode>,
    ) {
        for hash in &vote.hashes {
            let cacheable = matches!(
                results.get(hash),
                Some(VoteCode::Vote) | Some(VoteCode::Indeterminate)
            );
            if cacheable {
                self.observe(*hash, vote.account, vote.timestamp, rep_weight);
            }
        }
    }

    /// Cache a single (representative, timestamp) pair for `hash`.
    pub fn observe(&mut self, hash: BlockHash, representative: Account, timestamp: u64, weight: Amount) {
        let incoming = CachedVote {
            representative,
            timestamp,
            weight,
        };
        let max_voters = self.config.max_voters;

        if let Some(entry) = self.entries.get_mut(&hash) {
            let old_tally = entry.tally;
            if entry.vote(incoming, max_voters) {
                self.stats.inc(StatType::VoteCache, DetailType::Update);
                self.by_tally.remove(&(old_tally, hash));
                self.by_tally.insert((entry.tally, hash));
            }
            return;
        }

        self.stats.inc(StatType::VoteCache, DetailType::Insert);
        let id = self.next_id;
        self.next_id += 1;
        let mut entry = CacheEntry::new(hash, id);
        entry.vote(incoming, max_voters);
        self.by_tally.insert((entry.tally, hash));
        self.sequential.insert(id, hash);
        self.entries.insert(hash, entry);

        while self.entries.len() > self.config.max_size {
            self.stats.inc(StatType::VoteCache, DetailType::Evicted);
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        if let Some((_, hash)) = self.sequential.pop_first() {
            if let Some(entry) = self.entries.remove(&hash) {
                self.by_tally.remove(&(entry.tally, hash));
            }
        }
    }

    pub fn erase(&mut self, hash: &BlockHash) -> bool {
        match self.entries.remove(hash) {
            Some(entry) => {
                self.sequential.remove(&entry.id);
                self.by_tally.remove(&(entry.tally, *hash));
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn entry(&self, hash: &BlockHash) -> Option<&CacheEntry> {
        self.entries.get(hash)
    }

    /// Cached votes for `hash`, for replay into a freshly started election.
    pub fn find(&self, hash: &BlockHash) -> Vec<CachedVote> {
        self.entries
            .get(hash)
            .map(|e| e.voters.clone())
            .unwrap_or_default()
    }

    /// Cached tally for `hash`; zero when nothing is cached.
    pub fn tally(&self, hash: &BlockHash) -> Amount {
        self.entries.get(hash).map(|e| e.tally).unwrap_or_default()
    }

    pub fn final_tally(&self, hash: &BlockHash) -> Amount {
        self.entries
            .get(hash)
            .map(|e| e.final_tally)
            .unwrap_or_default()
    }

    /// Entries with a tally of at least `min_tally`, highest first.
    ///
    /// Runs an age cleanup first when one is due.
    pub fn top(&mut self, min_tally: Amount) -> Vec<TopEntry> {
        if self.last_cleanup.elapsed() >= self.config.age_cutoff / 2 {
            self.cleanup();
        }
        self.by_tally
            .iter()
            .rev()
            .take_while(|(tally, _)| *tally >= min_tally)
            .filter_map(|(_, hash)| self.entries.get(hash))
            .map(|e| TopEntry {
                hash: e.hash,
                tally: e.tally,
                final_tally: e.final_tally,
            })
            .collect()
    }

    /// Drop entries that received no vote within `age_cutoff`.
    pub fn cleanup(&mut self) {
        self.last_cleanup = Instant::now();
        let cutoff = self.config.age_cutoff;
        let expired: Vec<BlockHash> = self
            .entries
            .values()
            .filter(|e| e.last_vote.elapsed() > cutoff)
            .map(|e| e.hash)
            .collect();
        for hash in expired {
            self.stats.inc(StatType::VoteCache, DetailType::Cleanup);
            self.erase(&hash);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sequential.clear();
        self.by_tally.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
