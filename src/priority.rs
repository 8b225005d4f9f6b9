//! Best-effort worker thread priority elevation.
//!
//! Preemption by unrelated processes widens the measured windows and slows
//! convergence. Elevation is optional, fails silently into a reason
//! string, and restores the original priority when the guard drops.

use thread_priority::{ThreadPriority, ThreadPriorityValue};

/// Result of attempting to elevate the calling thread's priority.
#[derive(Debug)]
pub(crate) enum PriorityResult {
    /// Elevated; keep the guard alive while the run is hot.
    Elevated(PriorityGuard),
    /// Could not elevate; the run continues at normal priority.
    NotElevated {
        /// Why elevation was not possible.
        reason: String,
    },
}

/// RAII guard that restores the original thread priority on drop.
#[derive(Debug)]
pub(crate) struct PriorityGuard {
    original: ThreadPriority,
}

impl PriorityGuard {
    /// Try to raise the calling thread's priority.
    ///
    /// Uses a moderately high value rather than the maximum so system
    /// threads are not starved on machines where the request succeeds.
    pub(crate) fn try_elevate() -> PriorityResult {
        let original = match thread_priority::get_current_thread_priority() {
            Ok(p) => p,
            Err(err) => {
                return PriorityResult::NotElevated {
                    reason: format!("could not read current thread priority: {err:?}"),
                };
            }
        };

        let target = match ThreadPriorityValue::try_from(70u8) {
            Ok(v) => ThreadPriority::Crossplatform(v),
            Err(_) => {
                return PriorityResult::NotElevated {
                    reason: "could not construct a valid priority value".to_string(),
                };
            }
        };

        match thread_priority::set_current_thread_priority(target) {
            Ok(()) => {
                tracing::debug!("elevated worker thread priority");
                PriorityResult::Elevated(PriorityGuard { original })
            }
            Err(err) => PriorityResult::NotElevated {
                reason: format!("set_current_thread_priority failed: {err:?}"),
            },
        }
    }
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        if let Err(err) = thread_priority::set_current_thread_priority(self.original) {
            tracing::warn!("failed to restore thread priority: {err:?}");
        }
    }
}
