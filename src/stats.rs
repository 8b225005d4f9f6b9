//! Exponentially-smoothed running statistics.
//!
//! The engine tracks window timings with an exponential moving average
//! rather than a windowed mean: constant space, and it follows drift (CPU
//! frequency scaling, thermal throttling) without ever needing a reset.
//! The default smoothing factor of 0.25 gives an effective horizon of
//! about four samples.

/// Running mean and mean absolute deviation with exponential smoothing.
///
/// The first update seeds `avg` directly instead of smoothing from zero,
/// so a freshly zeroed stat converges immediately to the sample scale.
/// `avg_dev` stays non-negative by construction.
///
/// # Example
///
/// ```
/// use fuzzy_sync::ExpStat;
///
/// let mut stat = ExpStat::default();
/// for sample in [100.0, 104.0, 96.0, 101.0] {
///     stat.update(0.25, sample);
/// }
/// assert!((stat.avg - 100.0).abs() < 5.0);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExpStat {
    /// Smoothed mean of the samples.
    pub avg: f64,
    /// Smoothed mean absolute deviation from `avg`.
    pub avg_dev: f64,
    /// `|avg_dev / avg|`, or 0 while `avg` is 0. A cheap noisiness gauge.
    pub dev_ratio: f64,
}

impl ExpStat {
    /// Fold one sample into the stat with smoothing factor `alpha`.
    ///
    /// `alpha` must be in `(0, 1)`. The deviation term uses the refreshed
    /// mean, so a single outlier moves both `avg` and `avg_dev` in the
    /// same update.
    pub fn update(&mut self, alpha: f64, sample: f64) {
        debug_assert!(alpha > 0.0 && alpha < 1.0, "alpha out of range: {alpha}");

        if self.avg == 0.0 {
            self.avg = sample;
        } else {
            self.avg += alpha * (sample - self.avg);
        }
        self.avg_dev += alpha * ((sample - self.avg).abs() - self.avg_dev);
        self.dev_ratio = if self.avg == 0.0 {
            0.0
        } else {
            (self.avg_dev / self.avg).abs()
        };
    }

    /// Fold the signed difference `end_ns - start_ns` into the stat.
    ///
    /// Convenience for sampling intervals between two monotonic
    /// timestamps; the difference may legitimately be negative when the
    /// endpoints belong to different threads.
    pub fn update_diff(&mut self, alpha: f64, end_ns: u64, start_ns: u64) {
        self.update(alpha, end_ns as i64 as f64 - start_ns as i64 as f64);
    }

    /// One human-readable line for diagnostic output.
    ///
    /// ```text
    /// A window length: avg = 1042.7ns, avg_dev = 93.1ns, dev_ratio = 0.09
    /// ```
    pub fn describe(&self, name: &str, unit: &str) -> String {
        format!(
            "{name}: avg = {:.5}{unit}, avg_dev = {:.5}{unit}, dev_ratio = {:.2}",
            self.avg, self.avg_dev, self.dev_ratio
        )
    }
}
