//! Configuration for a synchronized pair.

use std::time::Duration;

/// Diagnostic printer hook.
///
/// Invoked by the coordinator for one-shot progress messages (sampling
/// period ending, loop milestones, exit reasons). The default writes one
/// line to standard error; test harnesses typically install their own
/// reporter here.
pub type MessageHook = Box<dyn Fn(&str) + Send + Sync>;

/// Configuration options for [`Pair`](crate::Pair).
///
/// Built with `Default` plus builder methods, consumed by
/// [`Pair::new`](crate::Pair::new):
///
/// ```
/// use fuzzy_sync::{Pair, PairConfig};
/// use std::time::Duration;
///
/// let pair = Pair::new(
///     PairConfig::default()
///         .min_samples(10_000)
///         .exec_loops(100_000)
///         .max_run_time(Duration::from_secs(30)),
/// );
/// # drop(pair);
/// ```
pub struct PairConfig {
    /// Smoothing factor for every moving stat (default: 0.25).
    pub avg_alpha: f64,

    /// Iterations spent sampling timings before the delay is frozen
    /// (default: 1024).
    pub min_samples: u32,

    /// Hard upper bound on iterations (default: effectively unlimited).
    pub exec_loops: u64,

    /// Wall-clock budget for one run; the A-side loop requests exit once
    /// it is spent (default: 60 s).
    pub max_run_time: Duration,

    /// Force the spin barriers to yield each iteration. `None` decides
    /// automatically: yield when fewer than two CPUs are available, so a
    /// single-CPU machine cannot deadlock in the rendezvous.
    pub yield_in_wait: Option<bool>,

    /// Pin A and B to two distinct CPUs for the duration of the run
    /// (default: off). Best-effort; failure downgrades to unpinned.
    pub pin_cpus: bool,

    /// Raise the worker thread's scheduling priority (default: off).
    /// Best-effort; failure is logged and ignored.
    pub elevate_worker_priority: bool,

    /// Seed for the amplify-phase delay sweep (default: fixed, so runs
    /// are reproducible; vary it to explore a different sweep order).
    pub sweep_seed: u64,

    /// Where one-shot diagnostics go.
    pub on_message: MessageHook,
}

/// Default seed for the amplify-phase delay sweep.
pub const DEFAULT_SWEEP_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            avg_alpha: 0.25,
            min_samples: 1024,
            exec_loops: u64::MAX,
            max_run_time: Duration::from_secs(60),
            yield_in_wait: None,
            pin_cpus: false,
            elevate_worker_priority: false,
            sweep_seed: DEFAULT_SWEEP_SEED,
            on_message: Box::new(|msg| eprintln!("fuzzy-sync: {msg}")),
        }
    }
}

impl PairConfig {
    /// Builder method to set the stat smoothing factor.
    pub fn avg_alpha(mut self, alpha: f64) -> Self {
        assert!(alpha > 0.0 && alpha < 1.0, "alpha must be in (0, 1)");
        self.avg_alpha = alpha;
        self
    }

    /// Builder method to set the sampling iteration count.
    pub fn min_samples(mut self, samples: u32) -> Self {
        self.min_samples = samples;
        self
    }

    /// Builder method to bound total iterations per run.
    pub fn exec_loops(mut self, loops: u64) -> Self {
        self.exec_loops = loops;
        self
    }

    /// Builder method to set the wall-clock budget per run.
    pub fn max_run_time(mut self, budget: Duration) -> Self {
        self.max_run_time = budget;
        self
    }

    /// Builder method to force or forbid yielding in the spin barriers.
    pub fn yield_in_wait(mut self, yield_in_wait: bool) -> Self {
        self.yield_in_wait = Some(yield_in_wait);
        self
    }

    /// Builder method to enable CPU pinning.
    pub fn pin_cpus(mut self, pin: bool) -> Self {
        self.pin_cpus = pin;
        self
    }

    /// Builder method to enable worker priority elevation.
    pub fn elevate_worker_priority(mut self, elevate: bool) -> Self {
        self.elevate_worker_priority = elevate;
        self
    }

    /// Builder method to set the delay sweep seed.
    pub fn sweep_seed(mut self, seed: u64) -> Self {
        self.sweep_seed = seed;
        self
    }

    /// Builder method to install a diagnostic printer hook.
    pub fn on_message(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Box::new(hook);
        self
    }
}

impl std::fmt::Debug for PairConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairConfig")
            .field("avg_alpha", &self.avg_alpha)
            .field("min_samples", &self.min_samples)
            .field("exec_loops", &self.exec_loops)
            .field("max_run_time", &self.max_run_time)
            .field("yield_in_wait", &self.yield_in_wait)
            .field("pin_cpus", &self.pin_cpus)
            .field("elevate_worker_priority", &self.elevate_worker_priority)
            .field("sweep_seed", &self.sweep_seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PairConfig::default();
        assert_eq!(cfg.avg_alpha, 0.25);
        assert_eq!(cfg.min_samples, 1024);
        assert_eq!(cfg.exec_loops, u64::MAX);
        assert_eq!(cfg.max_run_time, Duration::from_secs(60));
        assert!(cfg.yield_in_wait.is_none());
        assert!(!cfg.pin_cpus);
        assert!(!cfg.elevate_worker_priority);
        assert_eq!(cfg.sweep_seed, DEFAULT_SWEEP_SEED);
    }

    #[test]
    fn builder_methods_chain() {
        let cfg = PairConfig::default()
            .min_samples(10_000)
            .exec_loops(100_000)
            .yield_in_wait(true)
            .pin_cpus(true);
        assert_eq!(cfg.min_samples, 10_000);
        assert_eq!(cfg.exec_loops, 100_000);
        assert_eq!(cfg.yield_in_wait, Some(true));
        assert!(cfg.pin_cpus);
    }

    #[test]
    #[should_panic(expected = "alpha must be in (0, 1)")]
    fn rejects_out_of_range_alpha() {
        let _ = PairConfig::default().avg_alpha(1.5);
    }
}
