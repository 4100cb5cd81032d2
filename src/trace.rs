//! The immutable input signal under analysis.
use std::fmt;
use std::ops::Range;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::search::{binsearch, nearest};

/// All the ways constructing a [`Trace`] can fail
#[derive(Debug, Clone, Error)]
pub enum TraceError {
    #[error("The time and value arrays do not match in length")]
    LengthMismatch,
    #[error("The time array is not strictly increasing")]
    TimeNotSorted,
    #[error("The trace is empty")]
    Empty,
    #[error("The trace contains a non-finite time value")]
    NonFiniteTime,
}

/// A loaded fluorescence time-series: paired time and intensity arrays,
/// strictly increasing in time, immutable after construction.
///
/// Sample positions are the coordinate system for all downstream window
/// arithmetic; the time axis is only consulted when translating to and
/// from the caller's units.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trace {
    time: Vec<f64>,
    value: Vec<f64>,
}

impl Trace {
    pub fn new(time: Vec<f64>, value: Vec<f64>) -> Result<Self, TraceError> {
        if time.len() != value.len() {
            return Err(TraceError::LengthMismatch);
        }
        if time.is_empty() {
            return Err(TraceError::Empty);
        }
        if time.iter().any(|t| !t.is_finite()) {
            return Err(TraceError::NonFiniteTime);
        }
        if time.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TraceError::TimeNotSorted);
        }
        Ok(Self { time, value })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    #[inline]
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.value
    }

    #[inline]
    pub fn time_at(&self, index: usize) -> f64 {
        self.time[index]
    }

    #[inline]
    pub fn value_at(&self, index: usize) -> f64 {
        self.value[index]
    }

    pub fn start_time(&self) -> f64 {
        self.time[0]
    }

    pub fn end_time(&self) -> f64 {
        self.time[self.time.len() - 1]
    }

    /// The index of the sample whose time is closest to `t`
    pub fn nearest_index(&self, t: f64) -> usize {
        nearest(&self.time, t)
    }

    /// The half-open index range covering samples with time in `[lo, hi]`
    pub fn time_window(&self, lo: f64, hi: f64) -> Range<usize> {
        let start = binsearch(&self.time, lo);
        let mut end = binsearch(&self.time, hi);
        // binsearch returns the insertion point; include an exact match at `hi`
        if end < self.len() && self.time[end] <= hi {
            end += 1;
        }
        start..end.max(start)
    }

    /// Map a fractional sample offset from `start_index` back onto the time
    /// axis by linear interpolation between neighboring samples.
    pub fn interp_time(&self, start_index: usize, offset: f64) -> f64 {
        let pos = start_index as f64 + offset;
        let lo = (pos.floor() as usize).min(self.len() - 1);
        let hi = (lo + 1).min(self.len() - 1);
        let frac = pos - lo as f64;
        self.time[lo] + (self.time[hi] - self.time[lo]) * frac
    }

    /// Standard deviation of the signal values, used as a cheap noise
    /// level estimate for SNR-scaled detection.
    pub fn value_std(&self) -> f64 {
        let n = self.value.len() as f64;
        let mean = self.value.iter().sum::<f64>() / n;
        (self.value.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Trace({} samples, {:0.3}..{:0.3})",
            self.len(),
            self.start_time(),
            self.end_time()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ramp() -> Trace {
        let time: Vec<f64> = (0..100).map(|i| i as f64 * 0.1).collect();
        let value: Vec<f64> = (0..100).map(|i| i as f64).collect();
        Trace::new(time, value).unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Trace::new(vec![0.0, 1.0], vec![0.0]),
            Err(TraceError::LengthMismatch)
        ));
        assert!(matches!(
            Trace::new(vec![0.0, 0.0], vec![1.0, 2.0]),
            Err(TraceError::TimeNotSorted)
        ));
        assert!(matches!(Trace::new(vec![], vec![]), Err(TraceError::Empty)));
    }

    #[test]
    fn test_lookups() {
        let trace = ramp();
        assert_eq!(trace.nearest_index(0.52), 5);
        assert_eq!(trace.time_window(0.5, 1.0), 5..11);
        assert_eq!(trace.time_window(-10.0, -5.0), 0..0);
        let t = trace.interp_time(10, 0.5);
        assert!((t - 1.05).abs() < 1e-9);
    }
}
