//! `catransient` provides analysis of calcium-imaging fluorescence
//! traces: baseline estimation, transient event detection, exponential
//! rise and decay kinetics fitting, and evoked-response amplitude
//! extraction, behind a stateful [`AnalysisSession`].
//!
//! The building blocks compose independently when the session is more
//! machinery than a task needs:
//!
//! 1. [`trace`] holds the immutable input signal.
//! 2. [`baseline`] estimates the slowly-varying signal floor with a
//!    windowed low-percentile filter.
//! 3. [`peak_picker`] finds transient candidates as thresholded local
//!    maxima, with optional distance and width constraints.
//! 4. [`kinetics`] fits `y0 * exp(±t/tau)` models over searched
//!    per-peak windows.
//! 5. [`registry`] stores peaks sorted and uniquely keyed by stable id.
//! 6. [`evoked`] groups peaks into stimulation intervals and computes
//!    decay-corrected amplitudes.
//! 7. [`session`] ties the passes together with incremental recompute
//!    on manual edits.
//!
//! ```rust
//! use catransient::{AnalysisSession, PeakPicker};
//!
//! // A flat floor with one transient: exponential rise into an apex at
//! // sample 100, exponential decay back down after it
//! let mut values = vec![0.1_f64; 200];
//! for t in 0..=20 {
//!     values[80 + t] = 0.1 * ((t as f64) / 6.0).exp();
//! }
//! let apex = values[100];
//! for t in 1..=60 {
//!     values[100 + t] = (apex * (-(t as f64) / 8.0).exp()).max(0.1);
//! }
//! let time: Vec<f64> = (0..200).map(|i| i as f64 * 0.1).collect();
//!
//! let mut session = AnalysisSession::new();
//! session.load_arrays(time, values).unwrap();
//! let picker = PeakPicker::new(1.0, None, None);
//! let found = session.detect_and_fit(&picker, |_| {}).unwrap();
//! assert_eq!(found, 1);
//!
//! let peak = session.peaks()[0];
//! assert!((peak.tau_rise.unwrap() - 6.0).abs() < 0.5);
//! assert!((peak.tau_decay.unwrap() - 8.0).abs() < 0.5);
//! ```

pub mod baseline;
pub mod evoked;
pub mod kinetics;
pub mod peak;
pub mod peak_picker;
pub mod registry;
pub mod search;
pub mod session;
pub mod trace;

pub use crate::baseline::{Baseline, BaselineEstimator};
pub use crate::evoked::{partition, AmplitudeOutcome, EvokedConfig, EvokedGroup};
pub use crate::kinetics::{DecayFitter, FitConfig, FitError, FittedCurve, RiseFitter};
pub use crate::peak::{Peak, PeakId};
pub use crate::peak_picker::{pick_peaks, PeakPicker, PeakPickerBuilder, PeakPickerError};
pub use crate::registry::{PeakRecord, PeakRegistry};
pub use crate::session::{AnalysisSession, AnalysisWarning, PeakRow, SessionError};
pub use crate::trace::{Trace, TraceError};
