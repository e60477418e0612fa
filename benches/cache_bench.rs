//! Benchmarks for the cache tiers.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tiered_cache::cache::compressor::Compressor;
use tiered_cache::cache::evictor::{CandidateInfo, EvictionPolicy, Evictor};
use tiered_cache::cache::hot::HotTier;
use tiered_cache::cache::warm::WarmTier;
use tiered_cache::config::{CompressionConfig, EvictionConfig, MemoryTierConfig, WarmTierConfig};
use tiered_cache::JsonSerializer;

fn bench_eviction_scoring(c: &mut Criterion) {
    let evictor = Evictor::new(EvictionPolicy::WeightedLru, Some(0.10));

    // Create 10,000 candidates.
    let keys: Vec<String> = (0..10_000).map(|i| format!("key:{i}")).collect();
    let candidates: Vec<CandidateInfo<'_>> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| CandidateInfo {
            key,
            hit_count: (i % 97) as u64,
            age: Duration::from_millis(i as u64 + 1),
            size_bytes: 128,
        })
        .collect();

    c.bench_function("eviction_select_100_from_10k", |b| {
        b.iter(|| {
            let victims =
                evictor.select_victims(black_box(candidates.iter().copied()), 128 * 100, 0);
            black_box(victims);
        })
    });
}

fn bench_hot_tier(c: &mut Criterion) {
    let mut tier = HotTier::new(
        &MemoryTierConfig::default(),
        &EvictionConfig::default(),
        Arc::new(JsonSerializer::<String>::new()),
    );
    let ttl = Duration::from_secs(600);
    for i in 0..500 {
        tier.set(&format!("key:{i}"), format!("value-{i}"), ttl);
    }

    c.bench_function("l1_get_hit", |b| {
        b.iter(|| black_box(tier.get(black_box("key:250"))))
    });
}

fn bench_warm_compression(c: &mut Criterion) {
    let mut tier = WarmTier::new(
        &WarmTierConfig::default(),
        &EvictionConfig::default(),
        Arc::new(JsonSerializer::<String>::new()),
        Compressor::new(CompressionConfig::default()),
    );
    let ttl = Duration::from_secs(600);
    let value = "abcdefgh".repeat(32 * 1024); // 256 KiB

    c.bench_function("l2_set_compressed_256kb", |b| {
        b.iter(|| black_box(tier.set("large", value.clone(), ttl)))
    });

    tier.set("large", value.clone(), ttl);
    c.bench_function("l2_get_compressed_256kb", |b| {
        b.iter(|| black_box(tier.get("large")))
    });
}

criterion_group!(
    benches,
    bench_eviction_scoring,
    bench_hot_tier,
    bench_warm_compression,
);
criterion_main!(benches);
