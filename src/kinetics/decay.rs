//! Per-peak decay kinetics fitting.

use log::debug;

use crate::baseline::Baseline;
use crate::peak::Peak;
use crate::search::argmin;
use crate::trace::Trace;

use super::curve::FittedCurve;
use super::fitter::{fit_tau, FitConfig, FitError};
use super::model::{decay_function, ExpKind};

/// Peaks closer than this many samples share a window boundary: the
/// decay search for the earlier peak stops at the later peak's index
pub const NEIGHBOR_WINDOW: usize = 50;
/// Fallback search horizon after the peak when no close neighbor exists
pub const DEFAULT_HORIZON: usize = 20;
/// Height-over-baseline ratio up to which the band's upper edge stays at
/// the baseline mean; empirically tuned
pub const BAND_RATIO_NARROW: f64 = 5.0;
/// Ratio up to which the upper edge widens by one deviation; above it,
/// two
pub const BAND_RATIO_WIDE: f64 = 10.0;

/// The product of a successful decay fit, ready for the registry to apply
#[derive(Debug, Clone)]
pub struct DecayFit {
    /// Fitted time constant, in sample offsets
    pub tau: f64,
    /// Last sample index included in the fit window
    pub end_index: usize,
    /// The fitted model sampled over the window, on the trace time axis
    pub curve: FittedCurve,
}

/// Fits `y(t) = y0 * exp(-t/tau)` forward from a peak's apex.
///
/// The fit window ends at the first post-peak sample that re-enters a
/// baseline band, or at the window minimum when the signal never gets
/// back down. The band's upper edge widens with the peak's height above
/// baseline; the exact tier cutoffs are empirically tuned, not
/// load-bearing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayFitter {
    pub config: FitConfig,
}

impl DecayFitter {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    /// Select `[peak_index, end]`, the window the decay model is fit on.
    ///
    /// `peaks` must be sorted by time; `pos` is the peak being fit.
    pub fn fit_window(
        &self,
        trace: &Trace,
        baseline: &Baseline,
        peaks: &[Peak],
        pos: usize,
    ) -> (usize, usize) {
        let peak = &peaks[pos];
        let n = trace.len();

        let candidate_end = match peaks.get(pos + 1) {
            Some(next)
                if next.index > peak.index && next.index - peak.index <= NEIGHBOR_WINDOW =>
            {
                next.index
            }
            _ => (peak.index + DEFAULT_HORIZON).min(n - 1),
        };

        let mean = baseline.mean();
        let std = baseline.std();
        let ratio = if std > 0.0 {
            (peak.value - mean) / std
        } else {
            f64::INFINITY
        };
        let upper = if ratio <= BAND_RATIO_NARROW {
            mean
        } else if ratio <= BAND_RATIO_WIDE {
            mean + std
        } else {
            mean + 2.0 * std
        };
        let lower = mean - 2.0 * std;

        let search = &trace.values()[peak.index..=candidate_end];
        let end = match search.iter().position(|v| *v >= lower && *v <= upper) {
            Some(offset) => peak.index + offset,
            None => peak.index + argmin(search),
        };
        (peak.index, end)
    }

    /// Fit the decay of `peaks[pos]`. Does not mutate anything; the
    /// caller applies the returned fit to its own records.
    pub fn fit_decay(
        &self,
        trace: &Trace,
        baseline: &Baseline,
        peaks: &[Peak],
        pos: usize,
    ) -> Result<DecayFit, FitError> {
        let peak = &peaks[pos];
        let (start, end) = self.fit_window(trace, baseline, peaks, pos);
        debug!(
            "decay fit for peak {} over samples {start}..={end}",
            peak.id
        );

        let values = &trace.values()[start..=end];
        let (tau, result) = fit_tau(ExpKind::Decay, values, &self.config)?;
        debug!(
            "decay fit for peak {}: tau = {tau:0.4} after {} iterations",
            peak.id, result.iterations
        );

        let y0 = trace.value_at(start);
        let times: Vec<f64> = (start..=end).map(|i| trace.time_at(i)).collect();
        let fitted: Vec<f64> = (0..values.len())
            .map(|t| decay_function(t as f64, tau, y0))
            .collect();

        Ok(DecayFit {
            tau,
            end_index: end,
            curve: FittedCurve::new(times, fitted),
        })
    }
}
