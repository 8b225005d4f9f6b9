//! Round-trip cost of one engine iteration with empty windows.
//!
//! This is the overhead floor the engine adds around a race window: two
//! rendezvous passes and the stat updates. Run it pinned and idle for
//! stable numbers.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use fuzzy_sync::{Pair, PairConfig};

fn bench_iteration_round_trip(c: &mut Criterion) {
    let mut pair = Pair::new(
        PairConfig::default()
            .min_samples(1024)
            .max_run_time(Duration::from_secs(3600))
            .on_message(|_| {}),
    );

    pair.reset(|mut side| {
        while side.run_b() {
            side.start_race_b();
            side.end_race_b();
        }
    })
    .expect("failed to start worker");

    c.bench_function("iteration_round_trip", |b| {
        b.iter(|| {
            assert!(pair.run_a());
            pair.start_race_a();
            pair.end_race_a();
        })
    });

    pair.cleanup();
}

criterion_group!(benches, bench_iteration_round_trip);
criterion_main!(benches);
