//! Balance-tiered scheduling buckets.
//!
//! Accounts waiting for an election are sorted into 31 buckets by balance on
//! a roughly logarithmic scale. Inside a bucket blocks are ordered by time,
//! oldest first. Buckets are served round robin so a flood of small-balance
//! activity cannot starve the others.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use lattice_types::{Amount, Block, BlockHash, QualifiedRoot};

#[derive(Clone, Debug)]
struct BucketEntry {
    time: u64,
    hash: BlockHash,
    block: Arc<Block>,
}

impl Ord for BucketEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for BucketEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BucketEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BucketEntry {}

/// Blocks of one balance tier, ordered by time.
pub struct Bucket {
    /// Smallest priority balance admitted to this bucket.
    minimum: Amount,
    /// Queue capacity; the newest entry is dropped on overflow.
    maximum: usize,
    /// Elections this bucket may have running at once.
    max_active: usize,
    active: usize,
    queue: BTreeSet<BucketEntry>,
    hashes: HashSet<BlockHash>,
}

impl Bucket {
    fn new(minimum: Amount, maximum: usize, max_active: usize) -> Self {
        Self {
            minimum,
            maximum,
            max_active,
            active: 0,
            queue: BTreeSet::new(),
            hashes: HashSet::new(),
        }
    }

    pub fn minimum(&self) -> Amount {
        self.minimum
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Has queued blocks and room for another election.
    pub fn available(&self) -> bool {
        !self.queue.is_empty() && self.active < self.max_active
    }

    /// Returns false if the block is already queued or was dropped for being
    /// the newest entry of a full bucket.
    fn push(&mut self, time: u64, block: Arc<Block>) -> bool {
        let hash = block.hash();
        if !self.hashes.insert(hash) {
            return false;
        }
        self.queue.insert(BucketEntry { time, hash, block });
        if self.queue.len() > self.maximum {
            if let Some(evicted) = self.queue.pop_last() {
                self.hashes.remove(&evicted.hash);
                return evicted.hash != hash;
            }
        }
        true
    }

    fn pop(&mut self) -> Option<Arc<Block>> {
        let entry = self.queue.pop_first()?;
        self.hashes.remove(&entry.hash);
        Some(entry.block)
    }
}

/// Lower balance bound of every bucket, ascending.
fn minimums() -> Vec<u128> {
    let mut minimums = vec![0];
    let mut build_region = |begin: u128, end: u128, count: u128| {
        let width = (end - begin) / count;
        for i in 0..count {
            minimums.push(begin + i * width);
        }
    };
    build_region(1 << 79, 1 << 88, 1);
    build_region(1 << 88, 1 << 92, 2);
    build_region(1 << 92, 1 << 96, 4);
    build_region(1 << 96, 1 << 100, 8);
    build_region(1 << 100, 1 << 104, 8);
    build_region(1 << 104, 1 << 108, 4);
    build_region(1 << 108, 1 << 112, 2);
    build_region(1 << 112, u128::MAX, 1);
    minimums
}

/// The full set of buckets plus the round-robin cursor.
pub struct Buckets {
    buckets: Vec<Bucket>,
    /// Index of the bucket to serve next.
    current: usize,
    /// Roots with a running election, and the bucket that started them.
    tracking: HashMap<QualifiedRoot, usize>,
}

impl Buckets {
    pub const COUNT: usize = 31;

    pub fn new(bucket_maximum: usize, max_active_per_bucket: usize) -> Self {
        let buckets = minimums()
            .into_iter()
            .map(|minimum| Bucket::new(Amount::new(minimum), bucket_maximum, max_active_per_bucket))
            .collect();
        Self {
            buckets,
            current: 0,
            tracking: HashMap::new(),
        }
    }

    /// Bucket a priority balance falls into.
    pub fn index(&self, priority: Amount) -> usize {
        self.buckets
            .iter()
            .rposition(|b| b.minimum <= priority)
            .unwrap_or(0)
    }

    pub fn bucket(&self, index: usize) -> &Bucket {
        &self.buckets[index]
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn push(&mut self, time: u64, block: Arc<Block>, priority: Amount) -> bool {
        let index = self.index(priority);
        self.buckets[index].push(time, block)
    }

    /// Total queued blocks.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Bucket::is_empty)
    }

    /// True if some bucket can start an election.
    pub fn available(&self) -> bool {
        self.buckets.iter().any(Bucket::available)
    }

    /// Pop the oldest block of the next available bucket, advancing the
    /// cursor past it.
    pub fn next(&mut self) -> Option<(usize, Arc<Block>)> {
        let count = self.buckets.len();
        for _ in 0..count {
            let index = self.current;
            self.current = (self.current + 1) % count;
            if self.buckets[index].available() {
                return self.buckets[index].pop().map(|block| (index, block));
            }
        }
        None
    }

    /// Count an election for `root` against bucket `index`. Returns false if
    /// the root is already tracked.
    pub fn election_started(&mut self, index: usize, root: QualifiedRoot) -> bool {
        if self.tracking.contains_key(&root) {
            return false;
        }
        self.tracking.insert(root, index);
        self.buckets[index].active += 1;
        true
    }

    /// Free the slot held by `root`. Returns the bucket it belonged to.
    pub fn election_stopped(&mut self, root: &QualifiedRoot) -> Option<usize> {
        let index = self.tracking.remove(root)?;
        let bucket = &mut self.buckets[index];
        bucket.active = bucket.active.saturating_sub(1);
        Some(index)
    }

    pub fn is_tracked(&self, root: &QualifiedRoot) -> bool {
        self.tracking.contains_key(root)
    }

    /// Running elections across all buckets.
    pub fn active(&self) -> usize {
        self.tracking.len()
    }
}
