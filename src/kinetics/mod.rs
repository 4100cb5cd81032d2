//! Fitting methods for per-peak exponential rise and decay kinetics.
//!
//! Each peak gets two independent single-parameter fits:
//!
//! - decay: $`y(t) = y_0 e^{-t / \tau}`$, from the peak apex forward
//! - rise: $`y(t) = y_0 e^{t / \tau}`$, from a searched onset up to the apex
//!
//! with `t` measured in sample offsets. The data are heterogeneous in
//! scale (raw fluorescence vs. ΔF/F), so both fits normalize time and
//! amplitude to unit scale before optimizing and rescale `tau` back
//! afterwards.
//!
//! # Example
//!
//! ```rust
//! use catransient::Trace;
//! use catransient::kinetics::{decay_function, DecayFitter};
//! use catransient::{BaselineEstimator, Peak, PeakId};
//!
//! let time: Vec<f64> = (0..60).map(|i| i as f64 * 0.1).collect();
//! let values: Vec<f64> = (0..60).map(|i| decay_function(i as f64, 8.0, 2.0)).collect();
//! let trace = Trace::new(time, values).unwrap();
//! let baseline = BaselineEstimator::default().estimate(&trace);
//!
//! let peaks = vec![Peak::new(PeakId(0), 0, 0.0, 2.0)];
//! let fit = DecayFitter::default().fit_decay(&trace, &baseline, &peaks, 0).unwrap();
//! assert!((fit.tau - 8.0).abs() / 8.0 < 1e-3);
//! ```

mod curve;
mod decay;
mod fitter;
mod model;
mod rise;

pub use curve::{bezier_through, first_crossing, quadratic_bezier, FittedCurve};
pub use decay::{DecayFit, DecayFitter};
pub use fitter::{fit_tau, FitConfig, FitError, ModelFitResult};
pub use model::{decay_function, rise_function, ExpKind};
pub use rise::{
    smoothed_rise_time, tau_outlier_bounds, RiseFit, RiseFitter, RiseOutcome, SmoothedRise,
};
