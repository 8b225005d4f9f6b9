//! CPU affinity pinning and hardware-parallelism probing.
//!
//! The two racing threads are meant to run truly in parallel on distinct
//! cores: thread migration moves the timing baseline mid-run and the
//! estimator chases a target that no longer exists. Pinning is optional
//! and best-effort.
//!
//! # Platform behavior
//!
//! - **Linux**: `sched_setaffinity`, enforced by the kernel, no special
//!   privileges required. The coordinating thread belongs to the caller,
//!   so its pin is held by an RAII guard that restores the original mask.
//! - **Other platforms**: pinning to a *specific* CPU is not portable;
//!   the attempt reports why and the run continues unpinned.

use std::num::NonZeroUsize;

/// Number of CPUs the process may currently run on.
///
/// Drives the automatic yield decision: with fewer than two CPUs the spin
/// barriers must yield or the peer thread never gets scheduled.
pub(crate) fn hardware_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// CPUs in the calling thread's current affinity mask, ascending.
///
/// Empty on failure or on platforms without an affinity mask; callers
/// treat that as "nothing to pin to".
#[cfg(target_os = "linux")]
pub(crate) fn allowed_cpus() -> Vec<usize> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut mask = MaybeUninit::<libc::cpu_set_t>::uninit();
        let rc = libc::sched_getaffinity(
            0, // current thread
            std::mem::size_of::<libc::cpu_set_t>(),
            mask.as_mut_ptr(),
        );
        if rc != 0 {
            tracing::warn!(
                "sched_getaffinity failed: {}",
                std::io::Error::last_os_error()
            );
            return Vec::new();
        }
        let mask = mask.assume_init();
        (0..libc::CPU_SETSIZE as usize)
            .filter(|&cpu| libc::CPU_ISSET(cpu, &mask))
            .collect()
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn allowed_cpus() -> Vec<usize> {
    Vec::new()
}

/// Result of attempting to pin the calling thread.
#[derive(Debug)]
pub(crate) enum PinResult {
    /// Pinned; keep the guard alive for as long as the pin should hold.
    Pinned(PinGuard),
    /// Could not pin; the run continues without affinity.
    NotPinned {
        /// Why pinning was not possible.
        reason: String,
    },
}

/// RAII guard that restores the thread's original affinity mask on drop.
pub struct PinGuard {
    #[cfg(target_os = "linux")]
    original_mask: libc::cpu_set_t,
    cpu: usize,
}

impl PinGuard {
    /// Try to pin the calling thread to `cpu`, remembering the current
    /// mask for restoration.
    #[cfg(target_os = "linux")]
    pub(crate) fn try_pin_to(cpu: usize) -> PinResult {
        use std::mem::MaybeUninit;

        unsafe {
            let mut original = MaybeUninit::<libc::cpu_set_t>::uninit();
            let rc = libc::sched_getaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                original.as_mut_ptr(),
            );
            if rc != 0 {
                return PinResult::NotPinned {
                    reason: format!(
                        "sched_getaffinity failed: {}",
                        std::io::Error::last_os_error()
                    ),
                };
            }
            let original_mask = original.assume_init();

            if let Err(reason) = set_affinity_to(cpu) {
                return PinResult::NotPinned { reason };
            }

            tracing::debug!("pinned coordinating thread to CPU {cpu}");
            PinResult::Pinned(PinGuard { original_mask, cpu })
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub(crate) fn try_pin_to(_cpu: usize) -> PinResult {
        PinResult::NotPinned {
            reason: "per-CPU affinity is only supported on Linux".to_string(),
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for PinGuard {
    fn drop(&mut self) {
        unsafe {
            let rc = libc::sched_setaffinity(
                0,
                std::mem::size_of::<libc::cpu_set_t>(),
                &self.original_mask,
            );
            if rc != 0 {
                tracing::warn!(
                    "failed to restore CPU affinity: {}",
                    std::io::Error::last_os_error()
                );
            } else {
                tracing::debug!("restored original CPU affinity");
            }
        }
    }
}

impl std::fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinGuard").field("cpu", &self.cpu).finish()
    }
}

/// Pin the calling thread to `cpu` with no restoration.
///
/// For the worker thread, which exits at the end of the run anyway.
#[cfg(target_os = "linux")]
pub(crate) fn pin_current_to(cpu: usize) -> Result<(), String> {
    set_affinity_to(cpu)?;
    tracing::debug!("pinned worker thread to CPU {cpu}");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin_current_to(_cpu: usize) -> Result<(), String> {
    Err("per-CPU affinity is only supported on Linux".to_string())
}

#[cfg(target_os = "linux")]
fn set_affinity_to(cpu: usize) -> Result<(), String> {
    unsafe {
        let mut mask: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut mask);
        libc::CPU_SET(cpu, &mut mask);

        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mask);
        if rc != 0 {
            return Err(format!(
                "sched_setaffinity({cpu}) failed: {}",
                std::io::Error::last_os_error()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallelism_is_at_least_one() {
        assert!(hardware_parallelism() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn allowed_cpus_is_nonempty_and_sorted() {
        let cpus = allowed_cpus();
        assert!(!cpus.is_empty());
        assert!(cpus.windows(2).all(|w| w[0] < w[1]));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pin_and_restore_round_trip() {
        let before = allowed_cpus();
        let Some(&cpu) = before.first() else { return };

        match PinGuard::try_pin_to(cpu) {
            PinResult::Pinned(guard) => {
                assert_eq!(allowed_cpus(), vec![cpu]);
                drop(guard);
                assert_eq!(allowed_cpus(), before, "mask not restored");
            }
            PinResult::NotPinned { reason } => {
                eprintln!("[SKIPPED] pin_and_restore_round_trip: {reason}");
            }
        }
    }
}
