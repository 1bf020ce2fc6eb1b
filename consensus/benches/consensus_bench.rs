use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use lattice_consensus::{Buckets, VoteCache, VoteCacheConfig};
use lattice_types::{Account, Amount, Block, BlockHash};
use lattice_utils::Stats;

fn filled_cache(hashes: u64, voters: u64) -> VoteCache {
    let mut cache = VoteCache::new(VoteCacheConfig::default(), Arc::new(Stats::new()));
    for h in 0..hashes {
        for v in 0..voters {
            cache.observe(
                BlockHash::from(h + 1),
                Account::from(v + 1),
                1000 + v,
                Amount::new(u128::from(h * voters + v + 1)),
            );
        }
    }
    cache
}

fn bench_vote_cache_observe(c: &mut Criterion) {
    let mut group = c.benchmark_group("vote_cache_observe");

    for hashes in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("observe", hashes), &hashes, |b, &hashes| {
            b.iter(|| black_box(filled_cache(black_box(hashes), 4)));
        });
    }

    group.finish();
}

fn bench_vote_cache_top(c: &mut Criterion) {
    let mut group = c.benchmark_group("vote_cache_top");

    for hashes in [100, 1_000, 10_000] {
        let mut cache = filled_cache(hashes, 4);
        group.bench_with_input(BenchmarkId::new("top", hashes), &hashes, |b, _| {
            b.iter(|| black_box(cache.top(black_box(Amount::new(1_000)))));
        });
    }

    group.finish();
}

fn bench_buckets_push_next(c: &mut Criterion) {
    let mut group = c.benchmark_group("buckets");
    let blocks: Vec<(Arc<Block>, Amount)> = (0..10_000u64)
        .map(|n| {
            let block = Block::new_send(BlockHash::from(n + 1), Account::from(n), Amount::new(1));
            (Arc::new(block), Amount::new(1u128 << (n % 128)))
        })
        .collect();

    group.bench_function("push_then_drain_10k", |b| {
        b.iter(|| {
            let mut buckets = Buckets::new(1024, usize::MAX);
            for (n, (block, priority)) in blocks.iter().enumerate() {
                buckets.push(n as u64, block.clone(), *priority);
            }
            while let Some(entry) = buckets.next() {
                black_box(entry);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_vote_cache_observe,
    bench_vote_cache_top,
    bench_buckets_push_next
);
criterion_main!(benches);
