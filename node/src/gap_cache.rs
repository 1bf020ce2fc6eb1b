//! Gap cache: blocks the ledger rejected because a dependency is missing.
//!
//! Entries are keyed by the hash of the waiting block and ranked by arrival
//! time. Seeing the same block again refreshes its arrival; the cache is
//! bounded and sheds the oldest entry when full. Eviction loses nothing that
//! matters: the block comes back if a peer republishes it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lattice_types::BlockHash;
use lattice_utils::{DetailType, StatType, Stats};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapCacheConfig {
    pub max_size: usize,
}

impl Default for GapCacheConfig {
    fn default() -> Self {
        Self { max_size: 256 }
    }
}

#[derive(Default)]
struct GapData {
    by_hash: HashMap<BlockHash, Instant>,
    by_arrival: BTreeMap<Instant, BlockHash>,
    /// Most recent arrival handed out; arrivals are strictly increasing.
    last: Option<Instant>,
}

impl GapData {
    fn next_arrival(&mut self) -> Instant {
        let now = Instant::now();
        let arrival = match self.last {
            Some(last) if now <= last => last + Duration::from_nanos(1),
            _ => now,
        };
        self.last = Some(arrival);
        arrival
    }
}

pub struct GapCache {
    config: GapCacheConfig,
    stats: Arc<Stats>,
    data: Mutex<GapData>,
}

impl GapCache {
    pub fn new(config: GapCacheConfig, stats: Arc<Stats>) -> Self {
        Self {
            config,
            stats,
            data: Mutex::new(GapData::default()),
        }
    }

    /// Track `hash`, or refresh its arrival time if it is already tracked.
    pub fn add(&self, hash: BlockHash) {
        let mut data = self.data.lock().unwrap();
        let arrival = data.next_arrival();
        match data.by_hash.insert(hash, arrival) {
            Some(previous) => {
                data.by_arrival.remove(&previous);
                self.stats.inc(StatType::GapCache, DetailType::Update);
            }
            None => self.stats.inc(StatType::GapCache, DetailType::Insert),
        }
        data.by_arrival.insert(arrival, hash);
        trace!(%hash, "gap cached");

        while data.by_hash.len() > self.config.max_size {
            let Some((_, oldest)) = data.by_arrival.pop_first() else {
                break;
            };
            data.by_hash.remove(&oldest);
            self.stats.inc(StatType::GapCache, DetailType::Evicted);
            warn!(hash = %oldest, max_size = self.config.max_size, "gap cache full, evicted oldest");
        }
    }

    /// Stop tracking `hash`. Returns false if it was not tracked.
    pub fn erase(&self, hash: &BlockHash) -> bool {
        let mut data = self.data.lock().unwrap();
        match data.by_hash.remove(hash) {
            Some(arrival) => {
                data.by_arrival.remove(&arrival);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.data.lock().unwrap().by_hash.contains_key(hash)
    }

    pub fn arrival(&self, hash: &BlockHash) -> Option<Instant> {
        self.data.lock().unwrap().by_hash.get(hash).copied()
    }

    /// Arrival of the entry next in line for eviction.
    pub fn earliest(&self) -> Option<Instant> {
        self.data
            .lock()
            .unwrap()
            .by_arrival
            .first_key_value()
            .map(|(arrival, _)| *arrival)
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut data = self.data.lock().unwrap();
        data.by_hash.clear();
        data.by_arrival.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> GapCache {
        GapCache::new(GapCacheConfig { max_size }, Arc::new(Stats::new()))
    }

    #[test]
    fn re_adding_refreshes_arrival() {
        let cache = cache(16);
        let hash = BlockHash::from(1);
        cache.add(hash);
        let first = cache.arrival(&hash).unwrap();
        cache.add(hash);
        let second = cache.arrival(&hash).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(second > first);
        assert_eq!(cache.earliest(), Some(second));
    }

    #[test]
    fn full_cache_evicts_oldest() {
        let stats = Arc::new(Stats::new());
        let cache = GapCache::new(GapCacheConfig { max_size: 2 }, stats.clone());
        cache.add(BlockHash::from(1));
        cache.add(BlockHash::from(2));
        // Refreshing 1 makes 2 the oldest.
        cache.add(BlockHash::from(1));
        cache.add(BlockHash::from(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&BlockHash::from(1)));
        assert!(!cache.contains(&BlockHash::from(2)));
        assert!(cache.contains(&BlockHash::from(3)));
        assert_eq!(stats.count(StatType::GapCache, DetailType::Evicted), 1);
    }

    #[test]
    fn erase_removes_both_indexes() {
        let cache = cache(16);
        cache.add(BlockHash::from(1));
        cache.add(BlockHash::from(2));
        assert!(cache.erase(&BlockHash::from(1)));
        assert!(!cache.erase(&BlockHash::from(1)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.earliest(), cache.arrival(&BlockHash::from(2)));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.earliest(), None);
    }
}
