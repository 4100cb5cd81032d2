//! Algorithm for finding transient event candidates in a 1D trace.
//!
//! A candidate is a local maximum above a height threshold, optionally
//! thinned by a minimum horizontal distance and a minimum width at half
//! height. Omitted constraints are not applied at all rather than being
//! defaulted to permissive values.

use log::debug;
use thiserror::Error;

use crate::search::argmax;
use crate::trace::Trace;

/// All the ways peak detection can fail
#[derive(Debug, Clone, Error)]
pub enum PeakPickerError {
    #[error("The height threshold is not a finite number")]
    NonFiniteHeight,
}

/// A candidate peak detector for fluorescence traces
#[derive(Debug, Clone, Default)]
pub struct PeakPicker {
    /// Minimum sample value for a local maximum to qualify
    pub height: f64,
    /// Minimum number of samples between retained peaks, higher peaks win
    pub distance: Option<usize>,
    /// Minimum width at half height, in samples
    pub width: Option<f64>,
}

/// A builder for configuring [`PeakPicker`]
#[derive(Debug, Clone, Default)]
pub struct PeakPickerBuilder {
    height: f64,
    distance: Option<usize>,
    width: Option<f64>,
}

impl PeakPickerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&mut self, height: f64) -> &mut Self {
        self.height = height;
        self
    }

    pub fn distance(&mut self, distance: Option<usize>) -> &mut Self {
        self.distance = distance;
        self
    }

    pub fn width(&mut self, width: Option<f64>) -> &mut Self {
        self.width = width;
        self
    }

    pub fn build(&self) -> PeakPicker {
        PeakPicker::new(self.height, self.distance, self.width)
    }
}

impl From<PeakPickerBuilder> for PeakPicker {
    fn from(value: PeakPickerBuilder) -> Self {
        value.build()
    }
}

impl PeakPicker {
    pub fn new(height: f64, distance: Option<usize>, width: Option<f64>) -> Self {
        Self {
            height,
            distance,
            width,
        }
    }

    /// Configure a picker whose height threshold is `snr_threshold` times
    /// the standard deviation of the signal, a cheap noise-level scaling.
    pub fn from_snr(trace: &Trace, snr_threshold: f64) -> Self {
        Self::new(trace.value_std() * snr_threshold, None, None)
    }

    #[inline]
    fn is_prominent(&self, prev: f64, cur: f64, next: f64) -> bool {
        (prev <= cur) && (cur >= next)
    }

    /// Find candidate peak indices in `trace`, sorted ascending.
    ///
    /// Flat-topped maxima resolve to the first sample of the plateau, and
    /// a plateau running to the end of the trace still counts as a peak.
    pub fn discover_peaks(&self, trace: &Trace) -> Result<Vec<usize>, PeakPickerError> {
        if !self.height.is_finite() {
            return Err(PeakPickerError::NonFiniteHeight);
        }
        let values = trace.values();
        let n = values.len();
        if n < 3 {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut index = 1;
        while index < n - 1 {
            let current = values[index];
            if self.is_prominent(values[index - 1], current, values[index + 1])
                && current >= self.height
            {
                candidates.push(index);
                // Advance over the rest of a flat top so a plateau yields
                // a single candidate at its leading edge
                while index < n - 1 && values[index + 1] == current {
                    index += 1;
                }
            }
            index += 1;
        }

        if let Some(distance) = self.distance {
            candidates = self.enforce_distance(values, candidates, distance);
        }
        if let Some(width) = self.width {
            candidates.retain(|i| self.width_at_half_height(values, *i) >= width);
        }

        debug!("discovered {} candidate peaks", candidates.len());
        Ok(candidates)
    }

    /// Keep the highest peaks first, suppressing any candidate within
    /// `distance` samples of an already retained peak.
    fn enforce_distance(
        &self,
        values: &[f64],
        candidates: Vec<usize>,
        distance: usize,
    ) -> Vec<usize> {
        let mut by_height = candidates.clone();
        by_height.sort_by(|a, b| values[*b].total_cmp(&values[*a]));

        let mut kept: Vec<usize> = Vec::new();
        for idx in by_height {
            if kept.iter().any(|k| idx.abs_diff(*k) < distance.max(1)) {
                continue;
            }
            kept.push(idx);
        }
        kept.sort_unstable();
        kept
    }

    /// Width of the peak at `index` measured at half its height, using
    /// linear interpolation on each flank.
    fn width_at_half_height(&self, values: &[f64], index: usize) -> f64 {
        let peak = values[index];
        let half = peak / 2.0;
        let n = values.len();

        let mut left = 0.0;
        for j in (0..index).rev() {
            if values[j] < half {
                let frac = (values[j + 1] - half) / (values[j + 1] - values[j]);
                left = (index - j) as f64 - 1.0 + frac;
                break;
            }
            if j == 0 {
                left = index as f64;
            }
        }

        let mut right = 0.0;
        for j in index + 1..n {
            if values[j] < half {
                let frac = (values[j - 1] - half) / (values[j - 1] - values[j]);
                right = (j - index) as f64 - 1.0 + frac;
                break;
            }
            if j == n - 1 {
                right = (n - 1 - index) as f64;
            }
        }

        left + right
    }
}

/// A convenience function that detects peaks above `height` with no
/// distance or width constraints.
pub fn pick_peaks(trace: &Trace, height: f64) -> Result<Vec<usize>, PeakPickerError> {
    PeakPicker::new(height, None, None).discover_peaks(trace)
}

/// Resolve the highest local maximum within `window` samples of `center`,
/// used for manual click-to-add placement. An optional `height` threshold
/// filters candidates first.
pub fn nearest_local_maximum(
    trace: &Trace,
    center: f64,
    window: f64,
    height: Option<f64>,
) -> Option<usize> {
    let range = trace.time_window(center - window, center + window);
    if range.len() < 2 {
        return None;
    }
    let picker = PeakPicker::new(height.unwrap_or(f64::NEG_INFINITY), None, None);
    // Detect within the sub-trace; indices come back window-relative
    let values = &trace.values()[range.clone()];
    let mut local = Vec::new();
    for i in 1..values.len() - 1 {
        if picker.is_prominent(values[i - 1], values[i], values[i + 1])
            && values[i] >= picker.height
        {
            local.push(i);
        }
    }
    if local.is_empty() {
        return None;
    }
    let heights: Vec<f64> = local.iter().map(|i| values[*i]).collect();
    Some(range.start + local[argmax(&heights)])
}
