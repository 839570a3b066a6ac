//! Drive and gate axes.
//!
//! The drive follows a triangular bipolar waveform in three legs sharing one grid of spacing
//! `max / h`:
//!
//! ```text
//! up    0    -> +max   h + 1 points
//! down  +max -> -max   2h + 1 points (passes through 0 at index h)
//! back  -max -> 0      h + 1 points
//! ```
//!
//! with `h = floor(2 * max / step) / 2`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppResult, DaqError};
use crate::sweep::classifier::Segment;

/// Gate amplitude used when the configured gate string is malformed.
pub const DEFAULT_GATE_AMPLITUDE: f64 = 10.0;

/// Gate point count used when the configured gate string is malformed.
pub const DEFAULT_GATE_POINTS: usize = 11;

/// Largest accepted gate point count. Each point is a full drive sweep.
pub const MAX_GATE_POINTS: usize = 10_000;

/// `n` evenly spaced values from `start` to `stop` inclusive.
///
/// Endpoints are reproduced exactly and the midpoint of a symmetric range is exactly zero.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let last = (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let t = i as f64 / last;
                    start * (1.0 - t) + stop * t
                })
                .collect()
        }
    }
}

/// The three legs of the drive waveform, in drive source units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveAxis {
    up: Vec<f64>,
    down: Vec<f64>,
    back: Vec<f64>,
}

impl DriveAxis {
    /// Samples of one leg
    pub fn segment(&self, segment: Segment) -> &[f64] {
        match segment {
            Segment::Up => &self.up,
            Segment::Down => &self.down,
            Segment::Back => &self.back,
        }
    }

    /// Points per quarter period (`h`)
    pub fn half(&self) -> usize {
        self.up.len() - 1
    }

    /// Length of the down leg, which is also the row count of both branch buffers (`N`)
    pub fn n_down(&self) -> usize {
        self.down.len()
    }

    /// Amplitude of the waveform
    pub fn max(&self) -> f64 {
        self.down[0]
    }

    /// Drive samples commanded per gate step
    pub fn points_per_sweep(&self) -> usize {
        self.up.len() + self.down.len() + self.back.len()
    }

    /// Drive value of every buffer row, ascending from -max to +max
    pub fn row_axis(&self) -> Vec<f64> {
        self.down.iter().map(|v| -v).collect()
    }
}

/// Build the triangular drive waveform.
pub fn build_drive_axis(max: f64, step: f64) -> AppResult<DriveAxis> {
    if !(max.is_finite() && step.is_finite()) || max <= 0.0 || step <= 0.0 {
        return Err(DaqError::Configuration(format!(
            "drive range ({max}) and step ({step}) must be positive and finite"
        )));
    }
    if step > max {
        return Err(DaqError::Configuration(format!(
            "drive step ({step}) exceeds drive range ({max})"
        )));
    }

    let n = (2.0 * max / step).floor() as usize;
    let h = n / 2;

    Ok(DriveAxis {
        up: linspace(0.0, max, h + 1),
        down: linspace(max, -max, 2 * h + 1),
        back: linspace(-max, 0.0, h + 1),
    })
}

/// `count` gate values evenly spaced over `[-amplitude, +amplitude]`.
pub fn build_gate_axis(amplitude: f64, count: usize) -> Vec<f64> {
    linspace(-amplitude, amplitude, count)
}

/// Gate sweep parameters parsed from `"amplitude;points"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateSweep {
    /// Half-width of the symmetric gate range
    pub amplitude: f64,
    /// Number of gate steps (at least 2)
    pub points: usize,
}

impl Default for GateSweep {
    fn default() -> Self {
        Self {
            amplitude: DEFAULT_GATE_AMPLITUDE,
            points: DEFAULT_GATE_POINTS,
        }
    }
}

impl GateSweep {
    /// Strict parse of `"amplitude;points"`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let fields: Vec<&str> = text.split(';').map(str::trim).collect();
        if fields.len() != 2 {
            return Err(format!("expected 'amplitude;points', got '{text}'"));
        }
        let amplitude: f64 = fields[0]
            .parse()
            .map_err(|_| format!("amplitude '{}' is not a number", fields[0]))?;
        let points: f64 = fields[1]
            .parse()
            .map_err(|_| format!("point count '{}' is not a number", fields[1]))?;

        if !amplitude.is_finite() || amplitude < 0.0 {
            return Err(format!("amplitude {amplitude} must be finite and non-negative"));
        }
        if !points.is_finite() || points < 2.0 {
            return Err(format!("point count {points} must be at least 2"));
        }
        if points > MAX_GATE_POINTS as f64 {
            return Err(format!("point count {points} exceeds the maximum of {MAX_GATE_POINTS}"));
        }

        Ok(Self {
            amplitude,
            points: points as usize,
        })
    }

    /// Parse, falling back to the default sweep with a warning on malformed input.
    pub fn parse_or_default(text: &str) -> Self {
        match Self::parse(text) {
            Ok(sweep) => sweep,
            Err(reason) => {
                let fallback = Self::default();
                warn!(
                    input = text,
                    %reason,
                    amplitude = fallback.amplitude,
                    points = fallback.points,
                    "Invalid gate sweep, using amplitude {} with {} points",
                    fallback.amplitude,
                    fallback.points
                );
                fallback
            }
        }
    }

    /// The gate values of this sweep
    pub fn values(&self) -> Vec<f64> {
        build_gate_axis(self.amplitude, self.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    impl DriveAxis {
        /// The waveform with shared endpoints merged: `0 .. +max .. -max .. 0`, length `4h + 1`
        fn flattened(&self) -> Vec<f64> {
            let mut values = Vec::with_capacity(4 * self.half() + 1);
            values.extend_from_slice(&self.up);
            values.extend_from_slice(&self.down[1..]);
            values.extend_from_slice(&self.back[1..]);
            values
        }
    }

    #[test]
    fn flattened_axis_shape() {
        let axis = build_drive_axis(1.0, 0.2).unwrap();
        let h = axis.half();
        assert_eq!(h, 5);
        assert_eq!(axis.n_down(), 11);

        let flat = axis.flattened();
        assert_eq!(flat.len(), 4 * h + 1);
        assert_eq!(flat[0], 0.0);
        assert_eq!(flat[flat.len() - 1], 0.0);
        assert_eq!(flat[h], 1.0);
        assert_eq!(flat[3 * h], -1.0);
        assert_eq!(flat.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(flat.iter().filter(|&&v| v == -1.0).count(), 1);
    }

    #[test]
    fn down_leg_crosses_zero_exactly() {
        for (max, step) in [(1.0, 0.2), (0.7, 0.03), (2.5, 0.1), (1.0, 0.3)] {
            let axis = build_drive_axis(max, step).unwrap();
            assert_eq!(axis.segment(Segment::Down)[axis.half()], 0.0);
        }
    }

    #[test]
    fn flattened_length_tracks_step_count() {
        // floor(2 * max / step) = 7: h = 3, length 13 = 2 * 7 - 1
        let axis = build_drive_axis(0.75, 0.2).unwrap();
        assert_eq!(axis.flattened().len(), 13);
        assert_eq!(axis.points_per_sweep(), 4 * axis.half() + 3);
    }

    #[test]
    fn invalid_drive_parameters_are_rejected() {
        assert!(build_drive_axis(0.0, 0.1).is_err());
        assert!(build_drive_axis(1.0, 0.0).is_err());
        assert!(build_drive_axis(1.0, 2.0).is_err());
        assert!(build_drive_axis(f64::NAN, 0.1).is_err());
        assert!(build_drive_axis(1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn gate_axis_is_symmetric() {
        let gate = GateSweep::parse("2.0;3").unwrap();
        assert_eq!(gate.values(), vec![-2.0, 0.0, 2.0]);
        assert_eq!(GateSweep::parse(" 5 ; 21.0 ").unwrap().points, 21);
    }

    #[test]
    fn malformed_gate_strings() {
        for text in ["", "10", "10;11;12", "ten;11", "10;x", "inf;11", "-1;11", "10;1"] {
            assert!(GateSweep::parse(text).is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn gate_point_count_is_capped() {
        assert_eq!(GateSweep::parse("10;10000").unwrap().points, MAX_GATE_POINTS);
        let err = GateSweep::parse("10;1e12").unwrap_err();
        assert!(err.contains("exceeds the maximum"), "{err}");
        assert!(GateSweep::parse("10;10001").is_err());
    }

    #[traced_test]
    #[test]
    fn oversized_gate_falls_back_with_warning() {
        let gate = GateSweep::parse_or_default("10;1e12");
        assert_eq!(gate, GateSweep::default());
        assert_eq!(gate.values().len(), DEFAULT_GATE_POINTS);
        assert!(logs_contain("exceeds the maximum"));
    }

    #[traced_test]
    #[test]
    fn malformed_gate_falls_back_with_warning() {
        let gate = GateSweep::parse_or_default("abc");
        assert_eq!(gate, GateSweep::default());
        assert_eq!(gate.values().len(), 11);
        assert!(logs_contain("Invalid gate sweep"));
        assert!(logs_contain("amplitude 10 with 11 points"));
    }
}
