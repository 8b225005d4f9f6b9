//! The two-thread coordinator.
//!
//! A `Pair` is shared between the driving thread A, which owns it, and a
//! worker thread B, which gets a restricted [`WorkerSide`] view. Per
//! iteration both threads pass a start rendezvous, execute their work
//! containing the race window while timestamping its ends, and advance
//! past an asymmetric end-of-window point; A then folds the timings into
//! the moving stats that drive the delay estimator.
//!
//! Ownership is partitioned strictly: A owns the stats, the frozen delay,
//! the stop decision and all control fields; B owns its counter, its spin
//! count and its endpoint timestamps. Everything B touches lives in a
//! shared atomic block, so there are no locks anywhere on the hot path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_utils::CachePadded;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::affinity::{self, PinGuard, PinResult};
use crate::barrier::{delay_spin, pair_advance, pair_wait};
use crate::clock::monotonic_ns;
use crate::config::PairConfig;
use crate::error::PairError;
use crate::estimator;
use crate::priority::{PriorityGuard, PriorityResult};
use crate::stats::ExpStat;

/// The fields both threads touch. The two barrier counters each get their
/// own cache line so the spinning side does not steal the line the other
/// side is writing.
#[derive(Debug)]
struct Shared {
    a_cntr: CachePadded<AtomicU32>,
    b_cntr: CachePadded<AtomicU32>,
    stop: AtomicBool,
    /// Set by the worker wrapper when B exits without having been asked
    /// to, so A's run loop can shut down instead of waiting for a
    /// rendezvous that will never complete.
    worker_dead: AtomicBool,
    /// Signed delay in spin units: negative means A spins, positive
    /// means B spins. Written by A between iterations, always strictly
    /// before A's next counter bump.
    delay: AtomicI32,
    /// Spin count B burned at its last start rendezvous.
    b_spins: AtomicU32,
    /// Wall-clock nanoseconds of that spin phase; 0 when B did not spin.
    b_spin_wall: AtomicU64,
    b_start: AtomicU64,
    b_end: AtomicU64,
}

/// Statistical race-alignment coordinator for two threads.
///
/// The engine learns, from measured window timings, the delay one side
/// must insert after the per-iteration rendezvous so that the two race
/// windows overlap on nearly every subsequent iteration. It is a
/// probability amplifier for pre-existing races: it neither detects races
/// nor guarantees the overlap.
///
/// A run has two phases. During *sampling* (the first
/// [`min_samples`](PairConfig::min_samples) iterations) no delay is
/// applied and the engine measures where each window sits. The alignment
/// center and sweep range are then computed once and frozen, and every
/// remaining iteration (*amplify* mode) applies a delay drawn from that
/// fixed range on the appropriate side; statistics keep updating but no
/// longer feed back. The sweep exists because the engine only sees the
/// envelope between the `start_race`/`end_race` calls and the racy access
/// may hug either edge of it, so amplification walks the whole range of
/// offsets at which the two windows can still overlap.
///
/// # Example
///
/// ```
/// use fuzzy_sync::{Pair, PairConfig};
/// use std::time::Duration;
///
/// let mut pair = Pair::new(
///     PairConfig::default()
///         .min_samples(64)
///         .exec_loops(500)
///         .max_run_time(Duration::from_secs(5)),
/// );
///
/// pair.reset(|mut side| {
///     while side.run_b() {
///         side.start_race_b();
///         // ... racy access on thread B ...
///         side.end_race_b();
///     }
/// })
/// .expect("spawning the worker failed");
///
/// while pair.run_a() {
///     pair.start_race_a();
///     // ... racy access on thread A ...
///     pair.end_race_a();
/// }
/// // run_a() joined the worker on the way out; cleanup() is idempotent.
/// pair.cleanup();
/// ```
#[derive(Debug)]
pub struct Pair {
    shared: Arc<Shared>,

    /// Entry timestamp of A's window this iteration.
    a_start: u64,
    /// Exit timestamp of A's window this iteration.
    a_end: u64,

    /// Stat on `a_start - b_start`: the alignment error of window entries.
    diff_ss: ExpStat,
    /// Stat on the length of A's window.
    diff_sa: ExpStat,
    /// Stat on the length of B's window.
    diff_sb: ExpStat,
    /// Stat on `a_end - b_end`.
    diff_ab: ExpStat,
    /// Stat on B's start-rendezvous spin counts.
    spins: ExpStat,
    /// Stat on the wall-clock cost of one spin unit, fed from B's timed
    /// spin phases. This is what converts a nanosecond bias into units.
    spin_unit: ExpStat,

    /// A's view of the signed delay applied this iteration; mirrored
    /// into the shared block whenever it changes.
    delay: i32,
    /// Frozen center of the delay sweep, in spin units.
    delay_base: i32,
    /// Frozen half-width of the delay sweep, in spin units.
    sweep_units: u32,
    /// Deterministic source for the per-iteration sweep offsets.
    rng: Xoshiro256PlusPlus,
    /// Remaining sampling iterations; 0 means amplify mode.
    sampling: u32,

    exec_loop: u64,
    exec_time_start: Instant,
    yield_in_wait: bool,
    /// Balance guard for start/end pairing.
    in_window: bool,

    pin_guard: Option<PinGuard>,
    thread_b: Option<JoinHandle<()>>,

    cfg: PairConfig,
}

impl Pair {
    /// Create a coordinator with everything zeroed and `config` applied.
    pub fn new(config: PairConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                a_cntr: CachePadded::new(AtomicU32::new(0)),
                b_cntr: CachePadded::new(AtomicU32::new(0)),
                stop: AtomicBool::new(false),
                worker_dead: AtomicBool::new(false),
                delay: AtomicI32::new(0),
                b_spins: AtomicU32::new(0),
                b_spin_wall: AtomicU64::new(0),
                b_start: AtomicU64::new(0),
                b_end: AtomicU64::new(0),
            }),
            a_start: 0,
            a_end: 0,
            diff_ss: ExpStat::default(),
            diff_sa: ExpStat::default(),
            diff_sb: ExpStat::default(),
            diff_ab: ExpStat::default(),
            spins: ExpStat::default(),
            spin_unit: ExpStat::default(),
            delay: 0,
            delay_base: 0,
            sweep_units: 0,
            rng: Xoshiro256PlusPlus::seed_from_u64(config.sweep_seed),
            sampling: config.min_samples,
            exec_loop: 0,
            exec_time_start: Instant::now(),
            yield_in_wait: true,
            in_window: false,
            pin_guard: None,
            thread_b: None,
            cfg: config,
        }
    }

    /// Reinitialize per-run state and spawn the worker running `worker`.
    ///
    /// Everything except the caller-chosen configuration is reset to its
    /// freshly-constructed value, the yield and pinning policies are
    /// (re)decided, and B is spawned around the worker callable.
    ///
    /// # Errors
    ///
    /// [`PairError::WorkerActive`] if the previous worker has not been
    /// joined yet, [`PairError::Spawn`] if thread creation fails. In both
    /// cases the pair remains safe to `cleanup`.
    pub fn reset<W>(&mut self, worker: W) -> Result<(), PairError>
    where
        W: FnOnce(WorkerSide) + Send + 'static,
    {
        if self.thread_b.is_some() {
            return Err(PairError::WorkerActive);
        }

        self.a_start = 0;
        self.a_end = 0;
        self.diff_ss = ExpStat::default();
        self.diff_sa = ExpStat::default();
        self.diff_sb = ExpStat::default();
        self.diff_ab = ExpStat::default();
        self.spins = ExpStat::default();
        self.spin_unit = ExpStat::default();
        self.delay = 0;
        self.delay_base = 0;
        self.sweep_units = 0;
        self.rng = Xoshiro256PlusPlus::seed_from_u64(self.cfg.sweep_seed);
        self.sampling = self.cfg.min_samples;
        self.exec_loop = 0;
        self.in_window = false;

        // The spawn below publishes these to the worker.
        self.shared.a_cntr.store(0, Ordering::Relaxed);
        self.shared.b_cntr.store(0, Ordering::Relaxed);
        self.shared.stop.store(false, Ordering::Relaxed);
        self.shared.worker_dead.store(false, Ordering::Relaxed);
        self.shared.delay.store(0, Ordering::Relaxed);
        self.shared.b_spins.store(0, Ordering::Relaxed);
        self.shared.b_spin_wall.store(0, Ordering::Relaxed);
        self.shared.b_start.store(0, Ordering::Relaxed);
        self.shared.b_end.store(0, Ordering::Relaxed);

        let mut yield_in_wait = self
            .cfg
            .yield_in_wait
            .unwrap_or_else(|| affinity::hardware_parallelism() < 2);

        let mut worker_cpu = None;
        self.pin_guard = None;
        if self.cfg.pin_cpus {
            let cpus = affinity::allowed_cpus();
            if cpus.len() >= 2 {
                match PinGuard::try_pin_to(cpus[0]) {
                    PinResult::Pinned(guard) => self.pin_guard = Some(guard),
                    PinResult::NotPinned { reason } => {
                        tracing::warn!("running unpinned: {reason}");
                    }
                }
                worker_cpu = Some(cpus[1]);
            } else {
                tracing::warn!(
                    "pinning requested but fewer than two CPUs are allowed; \
                     yielding in waits instead"
                );
                yield_in_wait = true;
            }
        }
        self.yield_in_wait = yield_in_wait;
        self.exec_time_start = Instant::now();

        let shared = Arc::clone(&self.shared);
        let elevate = self.cfg.elevate_worker_priority;
        let handle = std::thread::Builder::new()
            .name("fuzzy-sync-worker".to_string())
            .spawn(move || run_worker(shared, worker, worker_cpu, elevate, yield_in_wait))?;
        self.thread_b = Some(handle);
        Ok(())
    }

    /// True while A should run another iteration.
    ///
    /// Advances the iteration count, enforces the loop and wall-clock
    /// budgets, and emits a one-shot progress line at iteration 5000. On
    /// a negative answer the worker has already been stopped and joined;
    /// the caller just falls out of its loop.
    pub fn run_a(&mut self) -> bool {
        self.exec_loop += 1;

        let mut exit = false;
        if self.exec_loop > self.cfg.exec_loops {
            self.message("exceeded execution loop limit, requesting exit");
            exit = true;
        }
        if self.exec_time_start.elapsed() >= self.cfg.max_run_time {
            self.message("exceeded run time budget, requesting exit");
            exit = true;
        }
        if self.shared.worker_dead.load(Ordering::Acquire) {
            self.message("worker thread exited early, requesting exit");
            exit = true;
        }
        if exit {
            self.stop_and_join();
            return false;
        }

        if self.exec_loop == 5000 {
            let line = if self.sampling > 0 {
                format!(
                    "loop 5000: sampling ({} iterations left), {}",
                    self.sampling,
                    self.diff_ss.describe("alignment", "ns")
                )
            } else {
                format!("loop 5000: amplifying with delay = {} spin units", self.delay)
            };
            self.message(&line);
        }
        true
    }

    /// Rendezvous with B, apply A's share of the delay, then timestamp
    /// the window entry.
    pub fn start_race_a(&mut self) {
        debug_assert!(!self.in_window, "start_race_a without matching end_race_a");

        pair_wait(
            &self.shared.a_cntr,
            &self.shared.b_cntr,
            &self.shared.stop,
            self.yield_in_wait,
        );
        if self.delay < 0 {
            delay_spin(&self.shared.b_cntr, self.delay.unsigned_abs(), self.yield_in_wait);
        }
        self.a_start = monotonic_ns();
        self.in_window = true;
    }

    /// Timestamp the window exit, wait for B's end bump, and fold this
    /// iteration's timings into the stats.
    ///
    /// The end of a window is lighter than the start rendezvous: B only
    /// bumps its counter and never spins here. A does wait for that bump,
    /// because it is the acquire edge that makes B's endpoints and spin
    /// count stable; B cannot touch them again until A's next start
    /// bump lets it through the following rendezvous.
    pub fn end_race_a(&mut self) {
        debug_assert!(self.in_window, "end_race_a without matching start_race_a");

        self.a_end = monotonic_ns();
        pair_wait(
            &self.shared.a_cntr,
            &self.shared.b_cntr,
            &self.shared.stop,
            self.yield_in_wait,
        );
        self.in_window = false;

        let b_start = self.shared.b_start.load(Ordering::Relaxed);
        let b_end = self.shared.b_end.load(Ordering::Relaxed);
        let b_spins = self.shared.b_spins.load(Ordering::Relaxed);
        let b_spin_wall = self.shared.b_spin_wall.load(Ordering::Relaxed);

        let alpha = self.cfg.avg_alpha;
        self.diff_sa.update_diff(alpha, self.a_end, self.a_start);
        self.diff_sb.update_diff(alpha, b_end, b_start);
        self.diff_ss.update_diff(alpha, self.a_start, b_start);
        self.diff_ab.update_diff(alpha, self.a_end, b_end);
        if b_spins > 0 {
            self.spins.update(alpha, f64::from(b_spins));
            self.spin_unit
                .update(alpha, b_spin_wall as f64 / f64::from(b_spins));
        }

        if self.sampling > 0 {
            self.sampling -= 1;
            if self.sampling == 0 {
                self.freeze_delay();
            }
        } else {
            let jitter = if self.sweep_units > 0 {
                let h = i64::from(self.sweep_units);
                self.rng.random_range(-h..=h) as i32
            } else {
                0
            };
            self.delay = self.delay_base.saturating_add(jitter);
            self.shared.delay.store(self.delay, Ordering::Release);
        }
    }

    /// Stop the worker, wake it if it is parked in a rendezvous, join it,
    /// and release the affinity pin. Total and idempotent: no path leaves
    /// B running, and calling this again is a no-op.
    pub fn cleanup(&mut self) {
        self.stop_and_join();
    }

    /// Entry timestamp of A's window, valid after [`end_race_a`](Self::end_race_a).
    pub fn a_start(&self) -> u64 {
        self.a_start
    }

    /// Exit timestamp of A's window, valid after [`end_race_a`](Self::end_race_a).
    pub fn a_end(&self) -> u64 {
        self.a_end
    }

    /// Entry timestamp of B's window as last published.
    pub fn b_start(&self) -> u64 {
        self.shared.b_start.load(Ordering::Acquire)
    }

    /// Exit timestamp of B's window as last published.
    pub fn b_end(&self) -> u64 {
        self.shared.b_end.load(Ordering::Acquire)
    }

    /// Iterations started in the current run.
    pub fn exec_loop(&self) -> u64 {
        self.exec_loop
    }

    /// The signed delay applied this iteration, in spin units: negative
    /// means A spins after the rendezvous, positive means B does, zero
    /// means neither. Stays 0 until sampling ends, then moves within the
    /// frozen sweep range around the learned center.
    pub fn delay(&self) -> i32 {
        self.delay
    }

    /// True once the sampling phase has ended and the alignment is
    /// frozen.
    pub fn sampling_done(&self) -> bool {
        self.sampling == 0
    }

    /// Fraction of the wall-clock budget spent so far (may exceed 1.0).
    pub fn run_time_fraction(&self) -> f64 {
        self.exec_time_start.elapsed().as_secs_f64() / self.cfg.max_run_time.as_secs_f64()
    }

    /// Stat on `a_start - b_start`.
    pub fn alignment_stat(&self) -> ExpStat {
        self.diff_ss
    }

    /// Stat on the length of A's window.
    pub fn window_a_stat(&self) -> ExpStat {
        self.diff_sa
    }

    /// Stat on the length of B's window.
    pub fn window_b_stat(&self) -> ExpStat {
        self.diff_sb
    }

    /// Stat on `a_end - b_end`.
    pub fn end_offset_stat(&self) -> ExpStat {
        self.diff_ab
    }

    /// Stat on B's start-rendezvous spin counts.
    pub fn spins_stat(&self) -> ExpStat {
        self.spins
    }

    fn freeze_delay(&mut self) {
        let spin_ns = estimator::spin_unit_ns(&self.spin_unit);
        self.delay_base =
            estimator::estimate_delay(&self.diff_ss, &self.diff_sa, &self.diff_sb, spin_ns);
        self.sweep_units = estimator::sweep_half_width(&self.diff_sa, &self.diff_sb, spin_ns);

        self.delay = self.delay_base;
        self.shared.delay.store(self.delay, Ordering::Release);

        let mut line = format!(
            "sampling period ended: delay = {} +/- {} spin units (spin unit ~ {:.1} ns)",
            self.delay_base, self.sweep_units, spin_ns
        );
        if estimator::timings_noisy(&self.diff_ss, &self.diff_sa, &self.diff_sb, &self.diff_ab) {
            line.push_str("; window timings still noisy, alignment may be off");
        }
        self.message(&line);
    }

    fn stop_and_join(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        // One extra tick releases a worker parked at the start rendezvous.
        pair_advance(&self.shared.a_cntr);
        if let Some(handle) = self.thread_b.take() {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked during the run");
            }
        }
        self.pin_guard = None;
    }

    fn message(&self, msg: &str) {
        (self.cfg.on_message)(msg);
    }
}

impl Default for Pair {
    fn default() -> Self {
        Self::new(PairConfig::default())
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Restricted view of the pair handed to the worker callable.
///
/// Exposes exactly the three operations B is allowed to perform. The
/// worker drives them in a loop:
///
/// ```text
/// while side.run_b() {
///     side.start_race_b();
///     /* racy access */
///     side.end_race_b();
/// }
/// ```
#[derive(Debug)]
pub struct WorkerSide {
    shared: Arc<Shared>,
    yield_in_wait: bool,
    in_window: bool,
}

impl WorkerSide {
    /// True while B should run another iteration; false once A's run
    /// loop has exited or `cleanup` was called.
    pub fn run_b(&self) -> bool {
        !self.shared.stop.load(Ordering::Acquire)
    }

    /// Rendezvous with A, publish the spin count, apply B's share of the
    /// delay, then timestamp the window entry.
    pub fn start_race_b(&mut self) {
        debug_assert!(!self.in_window, "start_race_b without matching end_race_b");

        let wait_begin = monotonic_ns();
        let spins = pair_wait(
            &self.shared.b_cntr,
            &self.shared.a_cntr,
            &self.shared.stop,
            self.yield_in_wait,
        );
        self.shared.b_spins.store(spins, Ordering::Relaxed);
        self.shared.b_spin_wall.store(
            if spins > 0 {
                monotonic_ns() - wait_begin
            } else {
                0
            },
            Ordering::Relaxed,
        );

        // A writes the delay strictly before its next counter bump, so
        // the acquire in the wait above makes this read fresh.
        let delay = self.shared.delay.load(Ordering::Relaxed);
        if delay > 0 {
            delay_spin(&self.shared.a_cntr, delay as u32, self.yield_in_wait);
        }

        self.shared.b_start.store(monotonic_ns(), Ordering::Relaxed);
        self.in_window = true;
    }

    /// Timestamp the window exit and advance past the end point. Never
    /// waits; the release bump publishes both endpoints to A.
    pub fn end_race_b(&mut self) {
        debug_assert!(self.in_window, "end_race_b without matching start_race_b");

        self.shared.b_end.store(monotonic_ns(), Ordering::Relaxed);
        pair_advance(&self.shared.b_cntr);
        self.in_window = false;
    }
}

fn run_worker<W>(
    shared: Arc<Shared>,
    worker: W,
    cpu: Option<usize>,
    elevate: bool,
    yield_in_wait: bool,
) where
    W: FnOnce(WorkerSide) + Send + 'static,
{
    if let Some(cpu) = cpu {
        if let Err(reason) = affinity::pin_current_to(cpu) {
            tracing::warn!("worker running unpinned: {reason}");
        }
    }

    let _priority = if elevate {
        match PriorityGuard::try_elevate() {
            PriorityResult::Elevated(guard) => Some(guard),
            PriorityResult::NotElevated { reason } => {
                tracing::debug!("worker priority not elevated: {reason}");
                None
            }
        }
    } else {
        None
    };

    let side = WorkerSide {
        shared: Arc::clone(&shared),
        yield_in_wait,
        in_window: false,
    };

    let outcome = catch_unwind(AssertUnwindSafe(move || worker(side)));

    if !shared.stop.load(Ordering::Acquire) {
        // The worker returned or panicked without being asked to stop. A
        // may be parked in the start rendezvous or in its end wait; flag
        // the death first, then two ticks stand in for the start and end
        // bumps of the iteration B will never run, releasing A from
        // whichever wait it is in so its next run_a shuts the run down.
        shared.worker_dead.store(true, Ordering::Release);
        shared.b_cntr.fetch_add(2, Ordering::Release);
    }

    if let Err(payload) = outcome {
        std::panic::resume_unwind(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn quiet_config() -> PairConfig {
        PairConfig::default().on_message(|_| {})
    }

    #[test]
    fn short_run_completes_and_joins() {
        let mut pair = Pair::new(
            quiet_config()
                .min_samples(32)
                .exec_loops(200)
                .max_run_time(Duration::from_secs(10)),
        );

        let b_iterations = Arc::new(AtomicU64::new(0));
        let counter = b_iterations.clone();
        pair.reset(move |mut side| {
            while side.run_b() {
                side.start_race_b();
                side.end_race_b();
                counter.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();

        let mut iterations = 0u64;
        while pair.run_a() {
            pair.start_race_a();
            pair.end_race_a();
            iterations += 1;
            assert!(pair.a_start() <= pair.a_end());
        }

        assert_eq!(iterations, 200);
        assert_eq!(pair.exec_loop(), 201);
        assert!(pair.sampling_done());
        assert!(b_iterations.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn worker_panic_does_not_hang_the_run() {
        let mut pair = Pair::new(
            quiet_config()
                .min_samples(8)
                .exec_loops(10_000)
                .max_run_time(Duration::from_secs(10)),
        );

        pair.reset(|mut side| {
            let mut remaining = 5;
            while side.run_b() {
                side.start_race_b();
                side.end_race_b();
                remaining -= 1;
                if remaining == 0 {
                    panic!("worker gave up");
                }
            }
        })
        .unwrap();

        while pair.run_a() {
            pair.start_race_a();
            pair.end_race_a();
        }
        // Reaching this point at all is the assertion: the run noticed
        // the dead worker instead of spinning forever.
        assert!(pair.exec_loop() < 10_000);
    }

    #[test]
    fn run_a_respects_loop_limit_exactly() {
        let mut pair = Pair::new(quiet_config().min_samples(1).exec_loops(3));
        pair.reset(|mut side| {
            while side.run_b() {
                side.start_race_b();
                side.end_race_b();
            }
        })
        .unwrap();

        let mut count = 0;
        while pair.run_a() {
            pair.start_race_a();
            pair.end_race_a();
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
