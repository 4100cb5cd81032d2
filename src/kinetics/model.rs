//! The exponential models and the normalize-fit-rescale scaffolding.

/// Exponential decay: $`y = y_0 e^{-t/\tau}`$
#[inline]
pub fn decay_function(t: f64, tau: f64, y0: f64) -> f64 {
    y0 * (-t / tau).exp()
}

/// Exponential growth: $`y = y_0 e^{t/\tau}`$
#[inline]
pub fn rise_function(t: f64, tau: f64, y0: f64) -> f64 {
    y0 * (t / tau).exp()
}

/// Which exponential branch a fit works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpKind {
    #[default]
    Decay,
    Rise,
}

impl ExpKind {
    #[inline]
    pub fn density(&self, t: f64, tau: f64, y0: f64) -> f64 {
        match self {
            ExpKind::Decay => decay_function(t, tau, y0),
            ExpKind::Rise => rise_function(t, tau, y0),
        }
    }
}

/// Floor for the amplitude scale so near-flat windows do not divide the
/// signal by ~0 during normalization
pub(crate) const AMPLITUDE_SCALE_FLOOR: f64 = 1e-6;

/// A fit window rescaled so time spans `[0, 1]` and the amplitude range
/// is ~1. `tau` fitted on this problem multiplies back by `time_scale`.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedWindow {
    pub time_scale: f64,
    pub values: Vec<f64>,
}

impl NormalizedWindow {
    pub fn new(values: &[f64]) -> Self {
        let time_scale = ((values.len() - 1) as f64).max(1.0);
        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let amplitude_scale = (hi - lo).abs().max(AMPLITUDE_SCALE_FLOOR);
        let values = values.iter().map(|v| v / amplitude_scale).collect();
        Self { time_scale, values }
    }

    /// Mean squared error of the model against the normalized window for
    /// a normalized `tau`
    pub fn loss(&self, kind: ExpKind, tau: f64) -> f64 {
        let y0 = self.values[0];
        let n = self.values.len() as f64;
        self.values
            .iter()
            .enumerate()
            .map(|(j, y)| {
                let t = j as f64 / self.time_scale;
                (kind.density(t, tau, y0) - y).powi(2)
            })
            .sum::<f64>()
            / n
    }
}
