//! Differential resistance.
//!
//! Two estimates are produced per gate step:
//! - the full gradient of each branch column against the drive axis (the resistance maps)
//! - a least-squares slope of V(I) restricted to a band of `±fraction * max` around zero drive (the
//!   per-step resistance summary), holding the previous value when too few samples fall in it

use serde::Serialize;

use crate::sweep::waveform::DriveAxis;

/// Numerical derivative of `column` with respect to `axis`, multiplied by `scale`.
///
/// Centered differences inside, one-sided differences at both ends. Zero spacing yields 0.
pub fn full_gradient(column: &[f64], axis: &[f64], scale: f64) -> Vec<f64> {
    let n = column.len().min(axis.len());
    if n < 2 {
        return vec![0.0; column.len()];
    }

    let slope = |hi: usize, lo: usize| {
        let dx = axis[hi] - axis[lo];
        if dx == 0.0 {
            0.0
        } else {
            (column[hi] - column[lo]) / dx * scale
        }
    };

    let mut gradient = Vec::with_capacity(column.len());
    gradient.push(slope(1, 0));
    for i in 1..n - 1 {
        gradient.push(slope(i + 1, i - 1));
    }
    gradient.push(slope(n - 1, n - 2));
    gradient.resize(column.len(), 0.0);
    gradient
}

/// Ordinary least-squares line through a set of points.
#[derive(Debug, Clone, Default)]
pub struct LinearFit {
    /// (x, y) samples
    pub points: Vec<(f64, f64)>,
}

impl LinearFit {
    /// Fit seeded with the given points
    pub fn with_points(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Add one sample
    pub fn push(&mut self, x: f64, y: f64) {
        self.points.push((x, y));
    }

    /// Slope of the fit over samples with `lower <= x <= upper`.
    ///
    /// `None` when fewer than two samples qualify or their x values coincide.
    pub fn slope_within(&self, lower: f64, upper: f64) -> Option<f64> {
        let selected: Vec<(f64, f64)> = self
            .points
            .iter()
            .copied()
            .filter(|(x, _)| *x >= lower && *x <= upper)
            .collect();
        if selected.len() < 2 {
            return None;
        }

        let n = selected.len() as f64;
        let mean_x = selected.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = selected.iter().map(|(_, y)| y).sum::<f64>() / n;
        let (sxy, sxx) = selected.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
            let dx = x - mean_x;
            (sxy + dx * (y - mean_y), sxx + dx * dx)
        });

        // coincident x values, up to rounding of the mean
        if sxx <= (f64::EPSILON * mean_x.abs()).powi(2) * n {
            return None;
        }
        Some(sxy / sxx)
    }

    /// Slope over every sample
    pub fn slope(&self) -> Option<f64> {
        self.slope_within(f64::NEG_INFINITY, f64::INFINITY)
    }
}

/// Least-squares slope of `response` against `drive` for `lower <= drive <= upper`.
pub fn windowed_resistance(drive: &[f64], response: &[f64], lower: f64, upper: f64) -> Option<f64> {
    LinearFit::with_points(drive.iter().copied().zip(response.iter().copied()).collect())
        .slope_within(lower, upper)
}

/// Holds the last successful resistance estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResistanceTracker {
    last: f64,
}

impl ResistanceTracker {
    /// Start at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new estimate; an underflowed fit returns the previous value unchanged.
    pub fn update(&mut self, estimate: Option<f64>) -> f64 {
        if let Some(value) = estimate.filter(|v| v.is_finite()) {
            self.last = value;
        }
        self.last
    }

    /// Last known resistance
    pub fn last(&self) -> f64 {
        self.last
    }
}

/// Drive interval used by the windowed fit, in drive source units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowBounds {
    /// Lowest included drive value
    pub lower: f64,
    /// Highest included drive value
    pub upper: f64,
}

impl WindowBounds {
    /// Symmetric band around zero drive: `[-fraction * max, +fraction * max]`.
    pub fn from_axis(axis: &DriveAxis, fraction: f64) -> Self {
        let half_width = fraction * axis.max();
        Self {
            lower: -half_width,
            upper: half_width,
        }
    }

    /// The same bounds divided by `divisor` (e.g. the load resistance, giving amps)
    pub fn scaled(&self, divisor: f64) -> Self {
        Self {
            lower: self.lower / divisor,
            upper: self.upper / divisor,
        }
    }
}
