//! Recently-confirmed elections: prevents re-elections for roots that were
//! just decided, and lets the vote router answer late votes with `Replay`.
//!
//! A bounded FIFO: when full, the oldest (root, winner) pair is evicted to
//! make room. Lookups by root and by hash are O(1).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use lattice_types::{BlockHash, QualifiedRoot};

pub const DEFAULT_RECENTLY_CONFIRMED_SIZE: usize = 65536;

#[derive(Default)]
struct Entries {
    by_root: HashMap<QualifiedRoot, BlockHash>,
    by_hash: HashMap<BlockHash, QualifiedRoot>,
    order: VecDeque<(QualifiedRoot, BlockHash)>,
}

pub struct RecentlyConfirmed {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl RecentlyConfirmed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity,
        }
    }

    /// Record a decided root. Returns false if the root or hash was already
    /// present.
    pub fn put(&self, root: QualifiedRoot, hash: BlockHash) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.by_root.contains_key(&root) || entries.by_hash.contains_key(&hash) {
            return false;
        }
        entries.by_root.insert(root, hash);
        entries.by_hash.insert(hash, root);
        entries.order.push_back((root, hash));
        if entries.order.len() > self.capacity {
            if let Some((old_root, old_hash)) = entries.order.pop_front() {
                entries.by_root.remove(&old_root);
                entries.by_hash.remove(&old_hash);
            }
        }
        true
    }

    pub fn erase(&self, hash: &BlockHash) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(root) = entries.by_hash.remove(hash) {
            entries.by_root.remove(&root);
            entries.order.retain(|(_, h)| h != hash);
        }
    }

    pub fn root_exists(&self, root: &QualifiedRoot) -> bool {
        self.entries.lock().unwrap().by_root.contains_key(root)
    }

    pub fn hash_exists(&self, hash: &BlockHash) -> bool {
        self.entries.lock().unwrap().by_hash.contains_key(hash)
    }

    /// Most recently added pair.
    pub fn back(&self) -> Option<(QualifiedRoot, BlockHash)> {
        self.entries.lock().unwrap().order.back().copied()
    }

    pub fn clear(&self) {
        *self.entries.lock().unwrap() = Entries::default();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecentlyConfirmed {
    fn default() -> Self {
        Self::new(DEFAULT_RECENTLY_CONFIRMED_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Root;

    fn make_root(n: u64) -> QualifiedRoot {
        QualifiedRoot::new(Root::from(BlockHash::from(n)), BlockHash::from(n))
    }

    fn make_hash(n: u64) -> BlockHash {
        BlockHash::from(1000 + n)
    }

    #[test]
    fn put_and_lookup() {
        let rc = RecentlyConfirmed::new(10);
        assert!(rc.put(make_root(1), make_hash(1)));
        assert!(rc.root_exists(&make_root(1)));
        assert!(rc.hash_exists(&make_hash(1)));
        assert!(!rc.hash_exists(&make_hash(2)));
        assert_eq!(rc.back(), Some((make_root(1), make_hash(1))));
    }

    #[test]
    fn duplicate_put_is_noop() {
        let rc = RecentlyConfirmed::new(10);
        assert!(rc.put(make_root(1), make_hash(1)));
        assert!(!rc.put(make_root(1), make_hash(2)));
        assert!(!rc.put(make_root(2), make_hash(1)));
        assert_eq!(rc.len(), 1);
    }

    #[test]
    fn fifo_eviction_order() {
        let rc = RecentlyConfirmed::new(2);
        rc.put(make_root(1), make_hash(1));
        rc.put(make_root(2), make_hash(2));
        rc.put(make_root(3), make_hash(3)); // evicts 1
        rc.put(make_root(4), make_hash(4)); // evicts 2

        assert_eq!(rc.len(), 2);
        assert!(!rc.root_exists(&make_root(1)));
        assert!(!rc.hash_exists(&make_hash(2)));
        assert!(rc.root_exists(&make_root(3)));
        assert!(rc.hash_exists(&make_hash(4)));
    }

    #[test]
    fn erase_by_hash() {
        let rc = RecentlyConfirmed::new(10);
        rc.put(make_root(1), make_hash(1));
        rc.put(make_root(2), make_hash(2));
        rc.erase(&make_hash(1));
        assert!(!rc.root_exists(&make_root(1)));
        assert_eq!(rc.len(), 1);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let rc = RecentlyConfirmed::new(0);
        assert!(!rc.put(make_root(1), make_hash(1)));
        assert!(rc.is_empty());
    }
}
