//! Monotonic nanosecond timestamp source.
//!
//! The delay estimator interprets timestamp differences as physical
//! intervals, so only a monotonic clock is acceptable here. Timestamps are
//! nanoseconds since a process-wide epoch so that values captured on the
//! two racing threads are directly comparable.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call in this process.
///
/// Backed by [`Instant`] (CLOCK_MONOTONIC on Linux): wait-free after the
/// epoch is anchored, never goes backwards for a single thread, and shared
/// across threads so cross-thread differences are meaningful. Wraps after
/// roughly 584 years of uptime.
#[inline]
pub fn monotonic_ns() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_goes_backwards() {
        let mut prev = monotonic_ns();
        for _ in 0..10_000 {
            let now = monotonic_ns();
            assert!(now >= prev, "clock went backwards: {prev} -> {now}");
            prev = now;
        }
    }

    #[test]
    fn shares_epoch_across_threads() {
        let before = monotonic_ns();
        let from_thread = std::thread::spawn(monotonic_ns).join().unwrap();
        let after = monotonic_ns();
        assert!(before <= from_thread && from_thread <= after);
    }

    #[test]
    fn tracks_real_time() {
        let start = monotonic_ns();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = monotonic_ns() - start;
        assert!(elapsed >= 10_000_000, "slept 10ms but clock saw {elapsed}ns");
    }
}
