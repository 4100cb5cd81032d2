//! Grouping of peaks into periodic stimulation intervals, and the
//! amplitude rule that conditions on that grouping.
//!
//! In evoked mode every run of `peak_num` consecutive peaks belongs to
//! one stimulation interval. The first member of a group keeps its raw
//! value as amplitude; later members are measured against the previous
//! peak's decay curve extrapolated out to their own sample, since the
//! signal has not returned to baseline between stimuli.

use log::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::kinetics::decay_function;
use crate::peak::{Peak, PeakId};
use crate::trace::Trace;

/// Parameters of the periodic stimulation grouping
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EvokedConfig {
    /// Number of peaks per stimulation interval
    pub peak_num: usize,
    /// Length of each interval on the time axis
    pub interval_length: f64,
    /// How far before its first peak an interval starts
    pub offset: f64,
}

impl EvokedConfig {
    pub fn new(peak_num: usize, interval_length: f64, offset: f64) -> Self {
        Self {
            peak_num,
            interval_length,
            offset,
        }
    }

    /// Whether the peak at `pos` (registry order) opens a group
    #[inline]
    pub fn is_group_leader(&self, pos: usize) -> bool {
        self.peak_num == 0 || pos % self.peak_num == 0
    }
}

/// A materialized stimulation interval: a complete run of `peak_num`
/// peaks with its drawable window boundaries.
///
/// A boundary is `None` when it would fall outside the trace.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EvokedGroup {
    /// Ordinal of the group, starting at 0
    pub index: usize,
    /// Time of the group's first peak
    pub first_peak_time: f64,
    /// `first_peak_time - offset`, kept only when it is ≥ the trace start
    pub start: Option<f64>,
    /// `start + interval_length`, kept only when it is ≤ the trace end
    pub end: Option<f64>,
    /// The member peaks, in time order
    pub peak_ids: Vec<PeakId>,
}

/// Slice the sorted peak list into consecutive chunks of `peak_num`.
/// Incomplete trailing chunks are not materialized.
pub fn partition(trace: &Trace, peaks: &[Peak], config: &EvokedConfig) -> Vec<EvokedGroup> {
    if config.peak_num == 0 {
        return Vec::new();
    }
    let mut groups = Vec::new();
    for (index, chunk) in peaks.chunks(config.peak_num).enumerate() {
        if chunk.len() != config.peak_num {
            continue;
        }
        let first_peak_time = chunk[0].time;
        let start_raw = first_peak_time - config.offset;
        let start = (start_raw >= trace.start_time()).then_some(start_raw);
        let end_raw = start_raw + config.interval_length;
        let end = (end_raw <= trace.end_time()).then_some(end_raw);
        groups.push(EvokedGroup {
            index,
            first_peak_time,
            start,
            end,
            peak_ids: chunk.iter().map(|p| p.id).collect(),
        });
    }
    groups
}

/// How a single peak's amplitude came out
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmplitudeOutcome {
    /// Raw peak value (evoked off, or the peak leads its group)
    Raw(f64),
    /// Peak value minus the previous peak's extrapolated decay
    DecaySubtracted(f64),
    /// The previous peak has no fitted decay to extrapolate from
    MissingPreviousDecay,
}

impl AmplitudeOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            AmplitudeOutcome::Raw(v) | AmplitudeOutcome::DecaySubtracted(v) => Some(*v),
            AmplitudeOutcome::MissingPreviousDecay => None,
        }
    }
}

/// Compute the amplitude of `peaks[pos]` under the evoked rule.
///
/// `peaks` must be sorted by time. With `evoked` unset, or for a group
/// leader, the amplitude is the raw peak value.
pub fn amplitude_of(peaks: &[Peak], pos: usize, evoked: Option<&EvokedConfig>) -> AmplitudeOutcome {
    let peak = &peaks[pos];
    let leader = match evoked {
        Some(config) => config.is_group_leader(pos),
        None => true,
    };
    if leader || pos == 0 {
        return AmplitudeOutcome::Raw(peak.value);
    }

    let prev = &peaks[pos - 1];
    match prev.tau_decay {
        Some(prev_tau) => {
            let dt = (peak.index - prev.index) as f64;
            let extrapolated = decay_function(dt, prev_tau, prev.value);
            AmplitudeOutcome::DecaySubtracted(peak.value - extrapolated)
        }
        None => {
            warn!(
                "no decay fit on peak {} to extrapolate under peak {}, amplitude left unset",
                prev.id, peak.id
            );
            AmplitudeOutcome::MissingPreviousDecay
        }
    }
}
