/// Leaderboard benchmarks
///
/// 1. Reputation formula + tier classification
/// 2. Full in-memory recompute at increasing staker counts
///
/// Run with: cargo bench --bench ranking

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use moltrank_core::{reputation, Tier, TokenAmount};
use moltrank_leaderboard::{Address, EngineSettings, FixedClock, LeaderboardEngine, MemoryChain};
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_700_000_000;

fn bench_scoring(c: &mut Criterion) {
    c.bench_function("reputation_and_tier", |b| {
        b.iter(|| {
            let amount = TokenAmount::from_tokens(black_box(12_345));
            black_box(reputation(amount.as_tokens(), black_box(200), black_box(3)));
            black_box(Tier::for_amount(amount));
        });
    });
}

fn populated_chain(stakers: u32) -> Arc<MemoryChain> {
    let chain = Arc::new(MemoryChain::new(u64::from(stakers) * 10 + 1));
    for i in 0..stakers {
        let mut bytes = [0u8; 20];
        bytes[16..].copy_from_slice(&i.to_be_bytes());
        let tokens = u64::from(i % 97) * 1_000 + 1;
        chain.stake(Address::from_bytes(bytes), u64::from(i) * 10, TokenAmount::from_tokens(tokens), (NOW as u64) - u64::from(i) * 3_600, u64::from(i % 4));
    }
    chain
}

fn bench_recompute(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("compute_leaderboard");
    for stakers in [100u32, 1_000, 5_000] {
        let settings = EngineSettings {
            deployment_block: 0,
            window_size: 10_000,
            fetch_concurrency: 16,
            call_timeout: Duration::from_secs(5),
            run_timeout: Duration::from_secs(60),
        };
        let engine = LeaderboardEngine::new(populated_chain(stakers), settings).expect("settings").with_clock(Arc::new(FixedClock(NOW)));
        group.throughput(Throughput::Elements(u64::from(stakers)));
        group.bench_with_input(BenchmarkId::from_parameter(stakers), &engine, |b, engine| {
            b.to_async(&rt).iter(|| async { black_box(engine.compute_leaderboard().await.expect("board")) });
        });
    }
    group.finish();
}

criterion_group!(name=ranking; config=Criterion::default().sample_size(20); targets=bench_scoring, bench_recompute);
criterion_main!(ranking);
