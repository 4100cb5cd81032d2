//! Estimation of the slowly-varying non-event signal floor.
//!
//! The baseline is a windowed low-percentile curve: near the start of the
//! trace the window looks ahead, elsewhere it looks behind. The result is
//! index-aligned with the trace and replaced wholesale whenever the trace
//! or the estimator parameters change.

use crate::trace::Trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default sliding window length, in samples
pub const DEFAULT_WINDOW_SIZE: usize = 50;
/// Default percentile rank treated as the signal floor
pub const DEFAULT_PERCENTILE: f64 = 30.0;

/// Linear-interpolated percentile of `window`, NumPy convention.
///
/// A window containing any NaN yields NaN, matching `np.percentile`;
/// the estimator's post-pass is responsible for patching those out.
fn percentile(window: &[f64], q: f64) -> f64 {
    if window.is_empty() {
        return f64::NAN;
    }
    if window.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = window.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// A per-sample estimate of the signal floor, index-aligned with the
/// [`Trace`] it was computed from.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Baseline {
    values: Vec<f64>,
}

impl Baseline {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn value_at(&self, index: usize) -> f64 {
        self.values[index]
    }

    /// Overwrite the baseline at a single index. The rise fitter uses this
    /// to anchor a peak's baseline to its pre-rise trough.
    pub(crate) fn set(&mut self, index: usize, value: f64) {
        self.values[index] = value;
    }

    /// Mean over the whole baseline array
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population standard deviation over the whole baseline array
    pub fn std(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        (self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / self.values.len() as f64)
            .sqrt()
    }
}

/// Windowed-percentile baseline estimator.
///
/// For sample `i`, the window is `trace[i..i + window_size]` while
/// `i < window_size` and `trace[i - window_size..i]` afterwards, clamped
/// to the end of the trace. Non-finite entries are patched with the mean
/// of the finite entries after the pass, so estimation never fails.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BaselineEstimator {
    pub window_size: usize,
    pub percentile: f64,
}

impl Default for BaselineEstimator {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            percentile: DEFAULT_PERCENTILE,
        }
    }
}

impl BaselineEstimator {
    pub fn new(window_size: usize, percentile: f64) -> Self {
        Self {
            window_size,
            percentile,
        }
    }

    pub fn window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn percentile(mut self, percentile: f64) -> Self {
        self.percentile = percentile;
        self
    }

    pub fn estimate(&self, trace: &Trace) -> Baseline {
        let n = trace.len();
        let values = trace.values();
        let w = self.window_size.max(1);

        let mut baseline = Vec::with_capacity(n);
        for i in 0..n {
            let window = if i < w {
                &values[i..(i + w).min(n)]
            } else {
                &values[i - w..i]
            };
            baseline.push(percentile(window, self.percentile));
        }

        // Patch NaN/±Inf entries with the mean of the finite ones. A fully
        // degenerate baseline collapses to all zeros rather than erroring.
        let finite: Vec<f64> = baseline.iter().copied().filter(|v| v.is_finite()).collect();
        let fallback = if finite.is_empty() {
            0.0
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        };
        if finite.len() != baseline.len() {
            log::warn!(
                "baseline window produced {} non-finite entries, substituting mean {fallback:0.6}",
                baseline.len() - finite.len()
            );
            for v in baseline.iter_mut() {
                if !v.is_finite() {
                    *v = fallback;
                }
            }
        }

        Baseline::new(baseline)
    }
}
