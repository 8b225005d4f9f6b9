//! Delay bias estimation from sampled window timings.
//!
//! After the sampling phase the engine knows, on average, where each
//! thread's race window sits relative to the start rendezvous. This module
//! turns those averages into a signed spin-unit count: how long one side
//! must dawdle after the rendezvous so that the two windows share a
//! midpoint on subsequent iterations.
//!
//! The two windows may sit anywhere inside their threads' execution
//! envelopes, so sometimes A must wait for B and sometimes B must wait for
//! A. A single signed value keeps that symmetry explicit: negative means A
//! spins, positive means B spins. Resist splitting it into two unsigned
//! fields.

use crate::stats::ExpStat;

/// Above this `dev_ratio` on any window stat the timings are considered
/// too noisy for the frozen delay to mean much.
pub(crate) const MAX_DEV_RATIO: f64 = 0.1;

/// Assumed duration of one spin unit when it could not be measured.
///
/// If B never lost a start race during sampling there is no spin count to
/// calibrate against; one nanosecond keeps the conversion sane rather
/// than letting a stale or zero calibration blow the delay up.
const FALLBACK_SPIN_NS: f64 = 1.0;

/// Calibrated duration of one spin unit in nanoseconds.
///
/// The per-unit stat is fed from B's own wall-clock timing of its start
/// waits (spin-phase duration divided by spin count). Falls back to
/// [`FALLBACK_SPIN_NS`] when B never lost a start race and the unit was
/// never measured.
pub(crate) fn spin_unit_ns(spin_unit: &ExpStat) -> f64 {
    if spin_unit.avg > 0.0 {
        spin_unit.avg
    } else {
        FALLBACK_SPIN_NS
    }
}

/// Compute the signed delay, in spin units, to apply from here on.
///
/// * `alignment`: stat on `a_start - b_start`.
/// * `window_a`, `window_b`: stats on the two window lengths.
/// * `spin_ns`: calibrated duration of one spin unit.
///
/// The target alignment offsets the entries so the windows share a
/// midpoint; whatever alignment error remains beyond that target is the
/// bias to burn off in spin units. The result saturates so that the
/// inserted delay never exceeds twice the longer window: with a
/// near-zero window on one side an unclamped quotient could otherwise
/// over-correct by orders of magnitude.
pub(crate) fn estimate_delay(
    alignment: &ExpStat,
    window_a: &ExpStat,
    window_b: &ExpStat,
    spin_ns: f64,
) -> i32 {
    let target_ns = (window_b.avg - window_a.avg) / 2.0;
    let bias_ns = alignment.avg - target_ns;

    let limit = (2.0 * window_a.avg.max(window_b.avg) / spin_ns).abs();
    let units = (bias_ns / spin_ns).round().clamp(-limit, limit);

    units.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

/// Half-width, in spin units, of the per-iteration delay sweep.
///
/// The engine only observes the envelope between `start_race_*` and
/// `end_race_*`; the racy access can sit anywhere inside it. Freezing the
/// alignment at the envelope midpoint would therefore miss windows that
/// hug an entry or exit edge. Sweeping the applied delay across half the
/// combined envelope length on each side of the frozen center covers
/// every offset at which the two windows can still overlap.
pub(crate) fn sweep_half_width(
    window_a: &ExpStat,
    window_b: &ExpStat,
    spin_ns: f64,
) -> u32 {
    let half_ns = (window_a.avg + window_b.avg).abs() / 2.0;
    (half_ns / spin_ns)
        .round()
        .clamp(0.0, f64::from(i32::MAX)) as u32
}

/// True when any of the window stats is still too noisy to trust.
pub(crate) fn timings_noisy(
    alignment: &ExpStat,
    window_a: &ExpStat,
    window_b: &ExpStat,
    end_offset: &ExpStat,
) -> bool {
    [alignment, window_a, window_b, end_offset]
        .iter()
        .any(|stat| stat.dev_ratio > MAX_DEV_RATIO)
}
