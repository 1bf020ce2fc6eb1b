//! Unchecked map: blocks parked until the block they depend on arrives.
//!
//! Entries are keyed by (dependency hash, block hash), so one missing block
//! can hold back any number of dependents. When the dependency is
//! processed, [`UncheckedMap::trigger`] removes and returns every block that
//! waited on it so the block processor can retry them.
//!
//! The map is bounded; when full the oldest entry is dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use lattice_types::{Block, BlockHash};
use lattice_utils::{DetailType, StatType, Stats};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncheckedConfig {
    pub max_size: usize,
}

impl Default for UncheckedConfig {
    fn default() -> Self {
        Self {
            max_size: 1024 * 64,
        }
    }
}

type UncheckedKey = (BlockHash, BlockHash);

struct UncheckedEntry {
    block: Arc<Block>,
    sequence: u64,
}

#[derive(Default)]
struct UncheckedData {
    entries: BTreeMap<UncheckedKey, UncheckedEntry>,
    /// Insertion order, oldest first.
    sequenced: BTreeMap<u64, UncheckedKey>,
    next_sequence: u64,
}

impl UncheckedData {
    fn remove(&mut self, key: &UncheckedKey) -> Option<Arc<Block>> {
        let entry = self.entries.remove(key)?;
        self.sequenced.remove(&entry.sequence);
        Some(entry.block)
    }

    fn keys_for(&self, dependency: &BlockHash) -> Vec<UncheckedKey> {
        self.entries
            .range((*dependency, BlockHash::ZERO)..)
            .take_while(|((dep, _), _)| dep == dependency)
            .map(|(key, _)| *key)
            .collect()
    }
}

pub struct UncheckedMap {
    config: UncheckedConfig,
    stats: Arc<Stats>,
    data: Mutex<UncheckedData>,
}

impl UncheckedMap {
    pub fn new(config: UncheckedConfig, stats: Arc<Stats>) -> Self {
        Self {
            config,
            stats,
            data: Mutex::new(UncheckedData::default()),
        }
    }

    /// Park `block` until `dependency` is available. Returns false if the
    /// pair is already parked.
    pub fn put(&self, dependency: BlockHash, block: Arc<Block>) -> bool {
        let key = (dependency, block.hash());
        let mut data = self.data.lock().unwrap();
        if data.entries.contains_key(&key) {
            return false;
        }
        let sequence = data.next_sequence;
        data.next_sequence += 1;
        data.entries.insert(key, UncheckedEntry { block, sequence });
        data.sequenced.insert(sequence, key);
        self.stats.inc(StatType::Unchecked, DetailType::Insert);
        trace!(%dependency, hash = %key.1, "block parked");

        while data.entries.len() > self.config.max_size {
            let Some((_, oldest)) = data.sequenced.pop_first() else {
                break;
            };
            data.entries.remove(&oldest);
            self.stats.inc(StatType::Unchecked, DetailType::Overfill);
            debug!(dependency = %oldest.0, hash = %oldest.1, "unchecked map full, dropped oldest");
        }
        true
    }

    /// Remove and return every block waiting on `dependency`.
    pub fn trigger(&self, dependency: &BlockHash) -> Vec<Arc<Block>> {
        let mut data = self.data.lock().unwrap();
        let keys = data.keys_for(dependency);
        let blocks: Vec<_> = keys.iter().filter_map(|key| data.remove(key)).collect();
        if !blocks.is_empty() {
            self.stats.inc(StatType::Unchecked, DetailType::Trigger);
            self.stats
                .add(StatType::Unchecked, DetailType::Satisfied, blocks.len() as u64);
            debug!(%dependency, count = blocks.len(), "dependency satisfied");
        }
        blocks
    }

    /// Blocks waiting on `dependency`, left in place.
    pub fn get(&self, dependency: &BlockHash) -> Vec<Arc<Block>> {
        let data = self.data.lock().unwrap();
        data.keys_for(dependency)
            .iter()
            .filter_map(|key| data.entries.get(key).map(|e| e.block.clone()))
            .collect()
    }

    pub fn exists(&self, dependency: &BlockHash, hash: &BlockHash) -> bool {
        self.data
            .lock()
            .unwrap()
            .entries
            .contains_key(&(*dependency, *hash))
    }

    pub fn remove(&self, dependency: &BlockHash, hash: &BlockHash) -> bool {
        self.data
            .lock()
            .unwrap()
            .remove(&(*dependency, *hash))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut data = self.data.lock().unwrap();
        data.entries.clear();
        data.sequenced.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Account, Amount};

    fn block(n: u64) -> Arc<Block> {
        Arc::new(Block::new_send(
            BlockHash::from(n),
            Account::from(n),
            Amount::new(1),
        ))
    }

    fn map(max_size: usize) -> UncheckedMap {
        UncheckedMap::new(UncheckedConfig { max_size }, Arc::new(Stats::new()))
    }

    #[test]
    fn trigger_releases_only_matching_dependents() {
        let map = map(16);
        let dependency = BlockHash::from(100);
        assert!(map.put(dependency, block(1)));
        assert!(map.put(dependency, block(2)));
        assert!(map.put(BlockHash::from(200), block(3)));
        assert!(!map.put(dependency, block(1)));
        assert_eq!(map.get(&dependency).len(), 2);

        let mut released: Vec<_> = map.trigger(&dependency).iter().map(|b| b.hash()).collect();
        released.sort();
        let mut expected = vec![block(1).hash(), block(2).hash()];
        expected.sort();
        assert_eq!(released, expected);
        assert_eq!(map.len(), 1);
        assert!(map.trigger(&dependency).is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let map = map(2);
        map.put(BlockHash::from(100), block(1));
        map.put(BlockHash::from(101), block(2));
        map.put(BlockHash::from(102), block(3));
        assert_eq!(map.len(), 2);
        assert!(!map.exists(&BlockHash::from(100), &block(1).hash()));
        assert!(map.exists(&BlockHash::from(102), &block(3).hash()));
    }

    #[test]
    fn remove_and_clear() {
        let map = map(16);
        map.put(BlockHash::from(100), block(1));
        map.put(BlockHash::from(100), block(2));
        assert!(map.remove(&BlockHash::from(100), &block(1).hash()));
        assert!(!map.remove(&BlockHash::from(100), &block(1).hash()));
        assert_eq!(map.len(), 1);
        map.clear();
        assert!(map.is_empty());
    }
}
