//! Fitted curve polylines and the Bézier helpers used to shape them.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A fitted model sampled onto the trace time axis, registered per peak
/// for downstream consumers (amplitude extrapolation, rendering).
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FittedCurve {
    /// X coordinates on the trace time axis
    pub times: Vec<f64>,
    /// Model values at each coordinate
    pub values: Vec<f64>,
}

impl FittedCurve {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Self {
        debug_assert_eq!(times.len(), values.len());
        Self { times, values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.values.iter().copied())
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        Some((*self.times.last()?, *self.values.last()?))
    }
}

/// Sample a quadratic Bézier segment from `p0` to `p2` with control
/// point `p1`, producing `samples` points including both endpoints.
pub fn quadratic_bezier(
    p0: (f64, f64),
    p1: (f64, f64),
    p2: (f64, f64),
    samples: usize,
) -> Vec<(f64, f64)> {
    let samples = samples.max(2);
    (0..samples)
        .map(|i| {
            let u = i as f64 / (samples - 1) as f64;
            let w0 = (1.0 - u) * (1.0 - u);
            let w1 = 2.0 * (1.0 - u) * u;
            let w2 = u * u;
            (
                w0 * p0.0 + w1 * p1.0 + w2 * p2.0,
                w0 * p0.1 + w1 * p1.1 + w2 * p2.1,
            )
        })
        .collect()
}

/// Evaluate a degree-(n-1) Bézier with `control` as its control polygon
/// at parameter `u`, by De Casteljau reduction.
fn de_casteljau(control: &[(f64, f64)], u: f64) -> (f64, f64) {
    let mut pts = control.to_vec();
    let mut m = pts.len();
    while m > 1 {
        for i in 0..m - 1 {
            pts[i] = (
                (1.0 - u) * pts[i].0 + u * pts[i + 1].0,
                (1.0 - u) * pts[i].1 + u * pts[i + 1].1,
            );
        }
        m -= 1;
    }
    pts[0]
}

/// Smooth a point sequence with a single high-order Bézier whose control
/// polygon is the sequence itself. The result interpolates the endpoints
/// and rounds off everything between, which is what the rise outlier
/// correction wants: a noise-free monotone-ish curve through the window.
pub fn bezier_through(points: &[(f64, f64)], samples: usize) -> Vec<(f64, f64)> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let samples = samples.max(2);
    (0..samples)
        .map(|i| de_casteljau(points, i as f64 / (samples - 1) as f64))
        .collect()
}

/// The x coordinate at which `points` first reaches `target` in y, with
/// linear interpolation between the bracketing points. `None` when the
/// curve never gets there.
pub fn first_crossing(points: &[(f64, f64)], target: f64) -> Option<f64> {
    let mut prev: Option<(f64, f64)> = None;
    for &(x, y) in points {
        if y >= target {
            return match prev {
                Some((px, py)) if y > py => {
                    let frac = (target - py) / (y - py);
                    Some(px + (x - px) * frac)
                }
                _ => Some(x),
            };
        }
        prev = Some((x, y));
    }
    None
}
