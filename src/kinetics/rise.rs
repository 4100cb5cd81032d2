//! Per-peak rise kinetics fitting.
//!
//! The rise is harder than the decay: its window starts at an *onset*
//! that has to be searched for backwards from the apex, and a peak whose
//! pre-apex range never dips below the apex value has no rise at all.
//! The fitter therefore reports a [`RiseOutcome`] rather than a bare
//! fit, leaving the delete-or-keep decision to the caller.

use log::debug;

use crate::baseline::Baseline;
use crate::evoked::EvokedConfig;
use crate::peak::Peak;
use crate::search::argmin;
use crate::trace::Trace;

use super::curve::{bezier_through, first_crossing, quadratic_bezier, FittedCurve};
use super::fitter::{fit_tau, FitConfig, FitError};
use super::model::{rise_function, ExpKind};

/// Number of model samples drawn across the rise window
const CURVE_SAMPLES: usize = 100;
/// Number of samples on the Bézier segment joining the model to the apex
const BEZIER_TAIL_SAMPLES: usize = 20;
/// Number of samples on the smoothed curve used for outlier replacement
const SMOOTH_SAMPLES: usize = 200;
/// Substitute for a zero or NaN window start so the model has a finite,
/// nonzero `y0` to grow from
const START_VALUE_FLOOR: f64 = 1e-3;
/// Width of the onset band below the baseline mean, in deviations;
/// empirically tuned
const BAND_LOWER_SIGMA: f64 = 8.0;
/// Height-over-baseline ratio above which the band's upper edge widens
/// from the mean to two deviations
const BAND_RATIO_WIDE: f64 = 10.0;

/// The product of a successful rise fit
#[derive(Debug, Clone)]
pub struct RiseFit {
    /// The onset sample the fit window starts at
    pub rise_start_index: usize,
    /// Fitted time constant, in sample offsets
    pub tau: f64,
    /// The fitted model sampled over the window, shaped to terminate
    /// exactly at the apex
    pub curve: FittedCurve,
    /// The trace value at the onset, recorded as the peak's local
    /// baseline anchor
    pub baseline_anchor: f64,
}

/// What the rise fitter decided about a peak
#[derive(Debug, Clone)]
pub enum RiseOutcome {
    Fit(RiseFit),
    /// No sample before the apex lies below it; the peak is not a rising
    /// transient and should be dropped from the registry
    Unfittable,
}

/// Fits `y(t) = y0 * exp(t/tau)` backward from a peak's apex.
///
/// Onset selection tries, in order: an explicit fixed-width onset
/// window, the previous peak's apex when the peak is a non-leading
/// member of an evoked group, and a baseline-band search over the whole
/// preceding inter-peak range.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiseFitter {
    pub config: FitConfig,
}

impl RiseFitter {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    /// Locate the onset sample for `peaks[pos]`. `Ok(None)` means the
    /// peak has no rise and cannot be fit.
    pub fn find_rise_start(
        &self,
        trace: &Trace,
        baseline: &Baseline,
        peaks: &[Peak],
        pos: usize,
        evoked: Option<&EvokedConfig>,
        onset_window: Option<usize>,
    ) -> Result<Option<usize>, FitError> {
        let peak = &peaks[pos];
        if peak.index == 0 {
            return Err(FitError::WindowTooSmall);
        }
        let values = trace.values();

        // A fixed onset window overrides everything else: take the
        // smallest-valued strict local minimum inside it, or its overall
        // minimum when the window is monotone.
        if let Some(w) = onset_window {
            let start = peak.index.saturating_sub(w.max(1));
            let mut best: Option<usize> = None;
            for j in start..peak.index {
                if j > 0
                    && j + 1 < values.len()
                    && values[j] < values[j - 1]
                    && values[j] < values[j + 1]
                    && best.map_or(true, |b| values[j] < values[b])
                {
                    best = Some(j);
                }
            }
            let chosen = best.unwrap_or_else(|| start + argmin(&values[start..peak.index]));
            return Ok(Some(chosen));
        }

        // Non-leading members of an evoked group rise out of the previous
        // peak's decay, not out of baseline: start at the trough between
        // the two apexes.
        if let Some(config) = evoked {
            if pos > 0 && !config.is_group_leader(pos) {
                let prev = peaks[pos - 1].index;
                return Ok(Some(prev + argmin(&values[prev..peak.index])));
            }
        }

        let search_start = if pos > 0 { peaks[pos - 1].index } else { 0 };
        let mean = baseline.mean();
        let std = baseline.std();
        let ratio = if std > 0.0 {
            (peak.value - mean) / std
        } else {
            f64::INFINITY
        };
        let upper = if ratio <= BAND_RATIO_WIDE {
            mean
        } else {
            mean + 2.0 * std
        };
        let lower = mean - BAND_LOWER_SIGMA * std;
        let in_band = |v: f64| v >= lower && v <= upper;

        // Nearest in-band strict local minimum before the apex
        for j in (search_start..peak.index).rev() {
            if j > 0
                && j + 1 < values.len()
                && values[j] < values[j - 1]
                && values[j] < values[j + 1]
                && in_band(values[j])
            {
                return Ok(Some(j));
            }
        }
        // No local minimum in band; settle for the nearest in-band sample
        for j in (search_start..peak.index).rev() {
            if in_band(values[j]) {
                return Ok(Some(j));
            }
        }
        // Nothing in band at all. The range minimum works as an onset only
        // if the signal actually gets below the apex somewhere.
        let m = search_start + argmin(&values[search_start..peak.index]);
        if values[m] < peak.value {
            Ok(Some(m))
        } else {
            debug!(
                "no sample below peak {} in [{search_start}, {}), rise unfittable",
                peak.id, peak.index
            );
            Ok(None)
        }
    }

    /// Fit the rise of `peaks[pos]`. Does not mutate anything; the caller
    /// applies the returned fit (or deletes the peak) on its own records.
    pub fn fit_rise(
        &self,
        trace: &Trace,
        baseline: &Baseline,
        peaks: &[Peak],
        pos: usize,
        evoked: Option<&EvokedConfig>,
        onset_window: Option<usize>,
    ) -> Result<RiseOutcome, FitError> {
        let peak = &peaks[pos];
        let start = match self.find_rise_start(trace, baseline, peaks, pos, evoked, onset_window)? {
            Some(start) => start,
            None => return Ok(RiseOutcome::Unfittable),
        };
        debug!(
            "rise fit for peak {} over samples {start}..={}",
            peak.id, peak.index
        );

        let window = &trace.values()[start..=peak.index];
        if window.len() < 2 {
            return Err(FitError::WindowTooSmall);
        }
        let anchor = window[0];

        // The growth model needs a positive starting value. A negative
        // start shifts the whole window up and the curve back down after
        // fitting; a zero or NaN start is floored in place.
        let mut data = window.to_vec();
        let mut offset = 0.0;
        if anchor < 0.0 {
            offset = anchor.abs() + START_VALUE_FLOOR;
            for v in data.iter_mut() {
                *v += offset;
            }
        } else if anchor.is_nan() || anchor == 0.0 {
            data[0] = START_VALUE_FLOOR;
        }

        let (tau, result) = fit_tau(ExpKind::Rise, &data, &self.config)?;
        debug!(
            "rise fit for peak {}: tau = {tau:0.4} after {} iterations",
            peak.id, result.iterations
        );

        let y0 = data[0];
        let t_end = (window.len() - 1) as f64;
        let sampled: Vec<(f64, f64)> = (0..CURVE_SAMPLES)
            .map(|i| {
                let t = t_end * i as f64 / (CURVE_SAMPLES - 1) as f64;
                (t, rise_function(t, tau, y0) - offset)
            })
            .collect();

        // Clip the model where it overshoots the apex, then close the gap
        // to the apex with a quadratic Bézier so the drawn curve always
        // terminates exactly at the peak sample.
        let mut shaped: Vec<(f64, f64)> = sampled
            .into_iter()
            .filter(|(_, y)| *y <= peak.value)
            .collect();
        if shaped.is_empty() {
            shaped.push((0.0, y0 - offset));
        }
        let (last_t, last_y) = *shaped.last().unwrap();
        if last_t < t_end || last_y < peak.value {
            let tail = quadratic_bezier(
                (last_t, last_y),
                (t_end, last_y),
                (t_end, peak.value),
                BEZIER_TAIL_SAMPLES,
            );
            shaped.extend(tail.into_iter().skip(1));
        }

        let times = shaped.iter().map(|(t, _)| trace.interp_time(start, *t)).collect();
        let fitted = shaped.iter().map(|(_, y)| *y).collect();

        Ok(RiseOutcome::Fit(RiseFit {
            rise_start_index: start,
            tau,
            curve: FittedCurve::new(times, fitted),
            baseline_anchor: anchor,
        }))
    }
}

/// A model-free replacement rise produced by smoothing the raw window
#[derive(Debug, Clone)]
pub struct SmoothedRise {
    /// Time to 63.2% of the rise height, in sample offsets
    pub tau: f64,
    pub curve: FittedCurve,
}

/// Smooth the raw samples between onset and apex with a high-order
/// Bézier and read the 63.2% rise time off the smoothed curve.
///
/// Used in place of the exponential model when a fitted `tau` lands
/// outside the population of its neighbors. `None` when the window is
/// degenerate or the smoothed curve never reaches the 63.2% level.
pub fn smoothed_rise_time(
    trace: &Trace,
    rise_start: usize,
    peak_index: usize,
) -> Option<SmoothedRise> {
    if peak_index <= rise_start {
        return None;
    }
    let points: Vec<(f64, f64)> = (rise_start..=peak_index)
        .map(|i| ((i - rise_start) as f64, trace.value_at(i)))
        .collect();
    let smooth = bezier_through(&points, SMOOTH_SAMPLES);

    let y0 = trace.value_at(rise_start);
    let y_peak = trace.value_at(peak_index);
    let target = y0 + 0.632 * (y_peak - y0);
    let tau = first_crossing(&smooth, target)?;

    let times = smooth
        .iter()
        .map(|(t, _)| trace.interp_time(rise_start, *t))
        .collect();
    let values = smooth.iter().map(|(_, y)| *y).collect();
    Some(SmoothedRise {
        tau,
        curve: FittedCurve::new(times, values),
    })
}

/// Acceptance band for rise time constants: mean ± 2σ over the fitted
/// population. `None` when fewer than three constants exist, which is
/// too few to call anything an outlier.
pub fn tau_outlier_bounds(taus: &[f64]) -> Option<(f64, f64)> {
    if taus.len() < 3 {
        return None;
    }
    let n = taus.len() as f64;
    let mean = taus.iter().sum::<f64>() / n;
    let std = (taus.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n).sqrt();
    Some((mean - 2.0 * std, mean + 2.0 * std))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::baseline::BaselineEstimator;
    use crate::peak::PeakId;

    fn trace_of(values: Vec<f64>) -> Trace {
        let time: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        Trace::new(time, values).unwrap()
    }

    fn peak_at(trace: &Trace, id: u64, index: usize) -> Peak {
        Peak::new(PeakId(id), index, trace.time_at(index), trace.value_at(index))
    }

    /// Flat floor at 0.1, a clean exponential rise into an apex at 80,
    /// flat again after
    fn synthetic_rise(tau: f64) -> Trace {
        let mut values = vec![0.1; 150];
        for t in 0..=30 {
            values[50 + t] = rise_function(t as f64, tau, 0.1);
        }
        for v in values.iter_mut().skip(81) {
            *v = 0.1;
        }
        trace_of(values)
    }

    #[test]
    fn test_round_trip_tau() {
        let tau = 8.0;
        let trace = synthetic_rise(tau);
        let baseline = BaselineEstimator::default().estimate(&trace);
        let peaks = vec![peak_at(&trace, 0, 80)];

        let outcome = RiseFitter::default()
            .fit_rise(&trace, &baseline, &peaks, 0, None, None)
            .unwrap();
        let fit = match outcome {
            RiseOutcome::Fit(fit) => fit,
            RiseOutcome::Unfittable => panic!("clean rise declared unfittable"),
        };
        assert_eq!(fit.rise_start_index, 50);
        assert!(
            (fit.tau - tau).abs() / tau < 1e-3,
            "tau {} vs expected {tau}",
            fit.tau
        );
        assert!((fit.baseline_anchor - 0.1).abs() < 1e-12);

        // The drawn curve ends exactly on the apex sample
        let (last_time, last_value) = fit.curve.last().unwrap();
        assert!((last_time - trace.time_at(80)).abs() < 1e-9);
        assert!((last_value - trace.value_at(80)).abs() < 1e-6);
    }

    #[test]
    fn test_onset_window_prefers_deepest_local_minimum() {
        let mut values = vec![1.0; 40];
        values[14] = 0.8;
        values[15] = 0.6;
        values[16] = 0.3;
        values[17] = 0.7;
        values[18] = 0.5;
        values[19] = 0.9;
        values[20] = 2.0;
        let trace = trace_of(values);
        let baseline = BaselineEstimator::new(10, 30.0).estimate(&trace);
        let peaks = vec![peak_at(&trace, 0, 20)];

        let start = RiseFitter::default()
            .find_rise_start(&trace, &baseline, &peaks, 0, None, Some(6))
            .unwrap();
        // Two local minima in the window; 16 is the deeper one
        assert_eq!(start, Some(16));
    }

    #[test]
    fn test_evoked_member_starts_at_inter_peak_trough() {
        let mut values = vec![0.0; 60];
        values[5] = 2.0;
        values[6] = 1.5;
        values[7] = 1.0;
        values[8] = 0.8;
        values[9] = 1.2;
        values[10] = 2.5;
        for v in values.iter_mut().skip(11) {
            *v = 0.2;
        }
        let trace = trace_of(values);
        let baseline = BaselineEstimator::default().estimate(&trace);
        let peaks = vec![peak_at(&trace, 0, 5), peak_at(&trace, 1, 10)];
        let evoked = EvokedConfig::new(2, 10.0, 0.0);

        let start = RiseFitter::default()
            .find_rise_start(&trace, &baseline, &peaks, 1, Some(&evoked), None)
            .unwrap();
        assert_eq!(start, Some(8));
    }

    #[test]
    fn test_peak_below_all_predecessors_is_unfittable() {
        let mut values = vec![10.0; 112];
        values[11] = 9.8;
        for v in values.iter_mut().skip(12) {
            *v = 0.0;
        }
        let trace = trace_of(values);
        let baseline = BaselineEstimator::default().estimate(&trace);
        let peaks = vec![peak_at(&trace, 0, 11)];

        let outcome = RiseFitter::default()
            .fit_rise(&trace, &baseline, &peaks, 0, None, None)
            .unwrap();
        assert!(matches!(outcome, RiseOutcome::Unfittable));
    }

    #[test]
    fn test_first_sample_peak_has_no_window() {
        let trace = trace_of(vec![2.0, 1.0, 0.5, 0.25]);
        let baseline = BaselineEstimator::new(2, 30.0).estimate(&trace);
        let peaks = vec![peak_at(&trace, 0, 0)];

        let err = RiseFitter::default().fit_rise(&trace, &baseline, &peaks, 0, None, None);
        assert!(matches!(err, Err(FitError::WindowTooSmall)));
    }

    #[test]
    fn test_negative_onset_is_shifted_not_rejected() {
        let mut values = vec![-0.2; 60];
        for t in 0..=20 {
            values[30 + t] = -0.2 + 0.05 * (t as f64 / 4.0).exp();
        }
        for v in values.iter_mut().skip(51) {
            *v = -0.2;
        }
        let trace = trace_of(values);
        let baseline = BaselineEstimator::default().estimate(&trace);
        let peaks = vec![peak_at(&trace, 0, 50)];

        let outcome = RiseFitter::default()
            .fit_rise(&trace, &baseline, &peaks, 0, None, None)
            .unwrap();
        let fit = match outcome {
            RiseOutcome::Fit(fit) => fit,
            RiseOutcome::Unfittable => panic!("rising transient declared unfittable"),
        };
        assert!(fit.tau.is_finite() && fit.tau > 0.0);
        // The curve is reported in original, unshifted units
        let (_, first_value) = fit.curve.iter().next().unwrap();
        assert!(first_value < 0.0);
    }

    #[test]
    fn test_smoothed_rise_time_hits_632_level() {
        // Linear ramp from 0 to 1 over 20 samples; the Bézier smooth of a
        // straight line is the same line, so tau is 63.2% of the span
        let mut values = vec![0.0; 40];
        for t in 0..=20 {
            values[10 + t] = t as f64 / 20.0;
        }
        let trace = trace_of(values);
        let smoothed = smoothed_rise_time(&trace, 10, 30).unwrap();
        assert!(
            (smoothed.tau - 0.632 * 20.0).abs() < 0.05,
            "tau {}",
            smoothed.tau
        );
        assert!(smoothed_rise_time(&trace, 30, 30).is_none());
    }

    #[test]
    fn test_outlier_bounds() {
        assert!(tau_outlier_bounds(&[1.0, 2.0]).is_none());
        let (lo, hi) = tau_outlier_bounds(&[4.0, 5.0, 6.0]).unwrap();
        assert!(lo < 4.0 && hi > 6.0);
        assert!((lo + hi) / 2.0 - 5.0 < 1e-12);
    }
}
