use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identity for a peak, assigned once at creation and never reused.
///
/// Ids, not `(time, value)` pairs, are the registry's lookup key: times can
/// shift under floating-point recomputation, ids cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakId(pub u64);

impl fmt::Display for PeakId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A detected or manually placed transient event, anchored at one trace
/// sample, together with its fitted kinetics.
///
/// The rise and decay axes are independent: either, both, or neither may
/// be calculated while the peak stays in the registry. The
/// `*_calculated` flags always agree with whether the matching `tau_*`
/// field is populated.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peak {
    pub id: PeakId,
    /// The trace sample the peak is anchored at
    pub index: usize,
    pub time: f64,
    pub value: f64,

    /// Where the fitted rise begins, once resolved
    pub rise_start_index: Option<usize>,
    /// Where the fitted decay window ends, once resolved
    pub decay_end_index: Option<usize>,
    /// Rise time constant, in sample offsets
    pub tau_rise: Option<f64>,
    /// Decay time constant, in sample offsets
    pub tau_decay: Option<f64>,
    pub amplitude: Option<f64>,

    pub rise_calculated: bool,
    pub decay_calculated: bool,
}

impl Peak {
    pub fn new(id: PeakId, index: usize, time: f64, value: f64) -> Self {
        Self {
            id,
            index,
            time,
            value,
            rise_start_index: None,
            decay_end_index: None,
            tau_rise: None,
            tau_decay: None,
            amplitude: None,
            rise_calculated: false,
            decay_calculated: false,
        }
    }

    /// Drop all rise-side artifacts, e.g. when a neighboring peak changed
    /// the onset search range.
    pub fn invalidate_rise(&mut self) {
        self.rise_start_index = None;
        self.tau_rise = None;
        self.rise_calculated = false;
    }

    /// Drop all decay-side artifacts, e.g. when the next-peak window
    /// boundary moved.
    pub fn invalidate_decay(&mut self) {
        self.decay_end_index = None;
        self.tau_decay = None;
        self.decay_calculated = false;
    }
}

impl fmt::Display for Peak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Peak({}, t={:0.4}, y={:0.4}, rise={:?}, decay={:?})",
            self.id, self.time, self.value, self.tau_rise, self.tau_decay
        )
    }
}
