//! The sorted store of peaks and their fit artifacts.
//!
//! Detection, manual edits, and recomputation all funnel through
//! [`PeakRegistry`]. It maintains two invariants the rest of the crate
//! leans on:
//!
//! 1. records are sorted by anchor index (equivalently time, since the
//!    time axis is strictly increasing), and
//! 2. no two records share an anchor index, so inserting on top of an
//!    existing peak is a no-op rather than a duplicate.
//!
//! Ids are handed out from a monotone counter and never reused, so a
//! caller can hold a [`PeakId`] across arbitrary edits and either find
//! its peak or learn that it is gone.

use log::debug;

use crate::kinetics::{DecayFit, FittedCurve, RiseFit};
use crate::peak::{Peak, PeakId};

/// A peak together with the drawable artifacts of its fits
#[derive(Debug, Clone)]
pub struct PeakRecord {
    pub peak: Peak,
    pub rise_curve: Option<FittedCurve>,
    pub decay_curve: Option<FittedCurve>,
}

impl PeakRecord {
    fn new(peak: Peak) -> Self {
        Self {
            peak,
            rise_curve: None,
            decay_curve: None,
        }
    }
}

/// The sorted, uniquely-keyed collection of peaks for one trace
#[derive(Debug, Clone, Default)]
pub struct PeakRegistry {
    records: Vec<PeakRecord>,
    next_id: u64,
}

impl PeakRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn records(&self) -> &[PeakRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeakRecord> {
        self.records.iter()
    }

    /// A by-value snapshot of the peaks, in time order. [`Peak`] is small
    /// and `Copy`, so fitters work against this while the caller keeps a
    /// mutable registry.
    pub fn peaks(&self) -> Vec<Peak> {
        self.records.iter().map(|r| r.peak).collect()
    }

    /// Drop every record but keep issuing fresh ids
    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn fresh_id(&mut self) -> PeakId {
        let id = PeakId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a peak anchored at `index`. Returns the new id, or `None`
    /// when a peak already occupies that sample.
    pub fn insert(&mut self, index: usize, time: f64, value: f64) -> Option<PeakId> {
        let at = match self
            .records
            .binary_search_by(|r| r.peak.index.cmp(&index))
        {
            Ok(_) => {
                debug!("peak already registered at sample {index}, ignoring");
                return None;
            }
            Err(at) => at,
        };
        let id = self.fresh_id();
        self.records.insert(at, PeakRecord::new(Peak::new(id, index, time, value)));
        Some(id)
    }

    /// Remove a peak, returning its record along with the ids of the
    /// peaks that flanked it. The flanks are the peaks whose fit windows
    /// the removal invalidated.
    pub fn remove(&mut self, id: PeakId) -> Option<(PeakRecord, Option<PeakId>, Option<PeakId>)> {
        let pos = self.position_of(id)?;
        let record = self.records.remove(pos);
        let prev = pos.checked_sub(1).map(|p| self.records[p].peak.id);
        let next = self.records.get(pos).map(|r| r.peak.id);
        Some((record, prev, next))
    }

    pub fn position_of(&self, id: PeakId) -> Option<usize> {
        self.records.iter().position(|r| r.peak.id == id)
    }

    pub fn get(&self, id: PeakId) -> Option<&PeakRecord> {
        self.records.iter().find(|r| r.peak.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: PeakId) -> Option<&mut PeakRecord> {
        self.records.iter_mut().find(|r| r.peak.id == id)
    }

    /// Id of the peak immediately before `id` in time order
    pub fn prev_id(&self, id: PeakId) -> Option<PeakId> {
        let pos = self.position_of(id)?;
        pos.checked_sub(1).map(|p| self.records[p].peak.id)
    }

    /// Id of the peak immediately after `id` in time order
    pub fn next_id(&self, id: PeakId) -> Option<PeakId> {
        let pos = self.position_of(id)?;
        self.records.get(pos + 1).map(|r| r.peak.id)
    }

    /// Id of the registered peak closest to `time`
    pub fn nearest_id(&self, time: f64) -> Option<PeakId> {
        self.records
            .iter()
            .min_by(|a, b| {
                let da = (a.peak.time - time).abs();
                let db = (b.peak.time - time).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|r| r.peak.id)
    }

    /// Record a successful rise fit on `id`
    pub fn apply_rise(&mut self, id: PeakId, fit: RiseFit) {
        if let Some(record) = self.get_mut(id) {
            record.peak.rise_start_index = Some(fit.rise_start_index);
            record.peak.tau_rise = Some(fit.tau);
            record.peak.rise_calculated = true;
            record.rise_curve = Some(fit.curve);
        }
    }

    /// Record a successful decay fit on `id`
    pub fn apply_decay(&mut self, id: PeakId, fit: DecayFit) {
        if let Some(record) = self.get_mut(id) {
            record.peak.decay_end_index = Some(fit.end_index);
            record.peak.tau_decay = Some(fit.tau);
            record.peak.decay_calculated = true;
            record.decay_curve = Some(fit.curve);
        }
    }

    /// Replace the rise constant and curve without touching the onset,
    /// used when a smoothed empirical rise supersedes a model fit
    pub fn replace_rise(&mut self, id: PeakId, tau: f64, curve: FittedCurve) {
        if let Some(record) = self.get_mut(id) {
            record.peak.tau_rise = Some(tau);
            record.peak.rise_calculated = true;
            record.rise_curve = Some(curve);
        }
    }

    pub fn invalidate_rise(&mut self, id: PeakId) {
        if let Some(record) = self.get_mut(id) {
            record.peak.invalidate_rise();
            record.rise_curve = None;
        }
    }

    pub fn invalidate_decay(&mut self, id: PeakId) {
        if let Some(record) = self.get_mut(id) {
            record.peak.invalidate_decay();
            record.decay_curve = None;
        }
    }

    /// Drop every fit artifact on every record, keeping the peaks
    pub fn invalidate_all(&mut self) {
        for record in self.records.iter_mut() {
            record.peak.invalidate_rise();
            record.peak.invalidate_decay();
            record.peak.amplitude = None;
            record.rise_curve = None;
            record.decay_curve = None;
        }
    }

    pub fn set_amplitude(&mut self, id: PeakId, amplitude: Option<f64>) {
        if let Some(record) = self.get_mut(id) {
            record.peak.amplitude = amplitude;
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for pair in self.records.windows(2) {
            assert!(
                pair[0].peak.index < pair[1].peak.index,
                "registry order violated: {} !< {}",
                pair[0].peak.index,
                pair[1].peak.index
            );
        }
        let mut ids: Vec<u64> = self.records.iter().map(|r| r.peak.id.0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), self.records.len(), "duplicate peak ids");
    }
}
