//! Critical-current extraction.
//!
//! The resistance trace of the Critical branch is flat (superconducting) around zero drive and
//! departs from that baseline where the junction switches. The detector estimates the baseline
//! from a few samples around zero and reports, on each side, the first drive value whose
//! resistance leaves the baseline by more than
//!
//! ```text
//! T = sigma_multiplier * sigma_baseline + relative_floor * max|R|
//! ```

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

/// Switching currents of one trace. A side without departure reports 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalCurrents {
    /// Positive-going critical current (>= 0)
    pub positive: f64,
    /// Negative-going critical current (<= 0)
    pub negative: f64,
}

/// Baseline statistics around zero drive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// Index of the smallest |axis| value
    pub zero_index: usize,
    /// Mean resistance of the baseline window
    pub mean: f64,
    /// Population standard deviation of the baseline window
    pub std_dev: f64,
    /// Departure threshold; `None` when the trace is identically zero
    pub threshold: Option<f64>,
}

/// Threshold detector for switching currents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalCurrentDetector {
    /// Samples on each side of zero forming the baseline
    pub baseline_points: usize,
    /// Baseline standard deviations a departure must exceed
    pub sigma_multiplier: f64,
    /// Departure floor as a fraction of max|R|
    pub relative_floor: f64,
}

impl Default for CriticalCurrentDetector {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for CriticalCurrentDetector {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            baseline_points: config.baseline_points,
            sigma_multiplier: config.sigma_multiplier,
            relative_floor: config.relative_floor,
        }
    }
}

impl CriticalCurrentDetector {
    /// Baseline statistics of `resistance` sampled on `axis`.
    pub fn baseline(&self, axis: &[f64], resistance: &[f64]) -> Option<Baseline> {
        let n = axis.len().min(resistance.len());
        if n == 0 {
            return None;
        }

        let zero_index = (0..n)
            .min_by(|&a, &b| axis[a].abs().total_cmp(&axis[b].abs()))
            .unwrap_or(0);
        let lo = zero_index.saturating_sub(self.baseline_points);
        let hi = (zero_index + self.baseline_points).min(n - 1);
        let window = &resistance[lo..=hi];

        let count = window.len() as f64;
        let mean = window.iter().sum::<f64>() / count;
        let variance = window.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / count;
        let std_dev = variance.sqrt();

        let peak = resistance[..n].iter().fold(0.0_f64, |acc, r| acc.max(r.abs()));
        let threshold = if peak > 0.0 {
            Some(self.sigma_multiplier * std_dev + self.relative_floor * peak)
        } else {
            None
        };

        Some(Baseline {
            zero_index,
            mean,
            std_dev,
            threshold,
        })
    }

    /// Locate the positive- and negative-going switching currents.
    ///
    /// `axis` may be ascending or descending; sides are told apart by the sign of the axis value
    /// at the departure.
    pub fn extract(&self, axis: &[f64], resistance: &[f64]) -> CriticalCurrents {
        let Some(baseline) = self.baseline(axis, resistance) else {
            return CriticalCurrents::default();
        };
        let Some(threshold) = baseline.threshold else {
            return CriticalCurrents::default();
        };

        let n = axis.len().min(resistance.len());
        let departs = |i: &usize| (resistance[*i] - baseline.mean).abs() > threshold;
        let above = (baseline.zero_index + 1..n).find(departs);
        let below = (0..baseline.zero_index).rev().find(departs);

        let mut currents = CriticalCurrents::default();
        for index in [above, below].into_iter().flatten() {
            let value = axis[index];
            if value > 0.0 {
                currents.positive = value;
            } else if value < 0.0 {
                currents.negative = value;
            }
        }
        currents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis() -> Vec<f64> {
        (0..41).map(|i| -2.0 + 0.1 * i as f64).collect()
    }

    fn step_trace(axis: &[f64], ic: f64, resistive: f64) -> Vec<f64> {
        axis.iter()
            .map(|x| if x.abs() <= ic { 0.0 } else { resistive })
            .collect()
    }

    #[test]
    fn finds_both_switching_currents() {
        let axis = axis();
        let resistance = step_trace(&axis, 0.75, 10.0);
        let ic = CriticalCurrentDetector::default().extract(&axis, &resistance);
        assert!((ic.positive - 0.75).abs() <= 0.1 + 1e-9, "{ic:?}");
        assert!((ic.negative + 0.75).abs() <= 0.1 + 1e-9, "{ic:?}");
    }

    #[test]
    fn descending_axis_gives_same_signs() {
        let mut axis = axis();
        axis.reverse();
        let resistance = step_trace(&axis, 0.75, 10.0);
        let ic = CriticalCurrentDetector::default().extract(&axis, &resistance);
        assert!(ic.positive > 0.0);
        assert!(ic.negative < 0.0);
    }

    #[test]
    fn flat_trace_has_no_departure() {
        let axis = axis();
        let ohmic = vec![0.5; axis.len()];
        assert_eq!(
            CriticalCurrentDetector::default().extract(&axis, &ohmic),
            CriticalCurrents::default()
        );
        let zero = vec![0.0; axis.len()];
        assert_eq!(
            CriticalCurrentDetector::default().extract(&axis, &zero),
            CriticalCurrents::default()
        );
        assert_eq!(
            CriticalCurrentDetector::default().extract(&[], &[]),
            CriticalCurrents::default()
        );
    }

    #[test]
    fn noise_raises_threshold() {
        let axis = axis();
        let detector = CriticalCurrentDetector::default();
        let quiet = step_trace(&axis, 0.75, 10.0);
        let mut noisy = quiet.clone();
        for (i, r) in noisy.iter_mut().enumerate().skip(18).take(5) {
            *r += if i % 2 == 0 { 0.3 } else { -0.3 };
        }

        let t_quiet = detector.baseline(&axis, &quiet).unwrap().threshold.unwrap();
        let t_noisy = detector.baseline(&axis, &noisy).unwrap().threshold.unwrap();
        assert!(t_noisy > t_quiet);
    }

    #[test]
    fn baseline_window_is_clamped_at_edges() {
        let axis = [0.0, 0.5, 1.0];
        let resistance = [0.0, 0.0, 4.0];
        let ic = CriticalCurrentDetector::default().extract(&axis, &resistance);
        assert_eq!(ic.negative, 0.0);
        // baseline spans the whole trace: mean 4/3, sigma ~1.89, threshold ~9.6
        assert_eq!(ic.positive, 0.0);
    }
}
