//! Everything derived from the configuration before the first instrument command.

use serde::Serialize;
use std::time::Duration;

use crate::config::RunConfig;
use crate::error::AppResult;
use crate::plot::Grid;
use crate::sweep::buffers::Matrix;
use crate::sweep::critical::CriticalCurrentDetector;
use crate::sweep::resistance::WindowBounds;
use crate::sweep::waveform::{build_drive_axis, DriveAxis, GateSweep};

/// Axes, unit conversions and analysis parameters of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SweepPlan {
    /// Drive waveform, source units
    pub drive: DriveAxis,
    /// Parsed gate sweep (after fallback)
    pub gate: GateSweep,
    /// Gate values in order
    pub gate_values: Vec<f64>,
    /// Current of every buffer row, display units, ascending
    pub row_currents: Vec<f64>,
    /// Resistance fit window, source units
    pub window: WindowBounds,
    /// Wait between drive command and reading
    pub settle_delay: Duration,
    /// Readings averaged per point
    pub averaging: u32,
    /// Amplifier gain
    pub gain: f64,
    /// Series resistor, ohms
    pub load_resistance: f64,
    /// Display unit of current
    pub current_scale: f64,
    /// Display unit of voltage
    pub voltage_scale: f64,
    /// Display unit of resistance
    pub resistance_scale: f64,
    /// Switching-current detector
    pub detector: CriticalCurrentDetector,
}

impl SweepPlan {
    /// Validate the configuration and derive the plan.
    pub fn from_config(config: &RunConfig) -> AppResult<Self> {
        config.validate()?;
        let s = &config.sweep;

        let drive = build_drive_axis(s.drive_range, s.drive_step)?;
        let gate = GateSweep::parse_or_default(&s.gate);
        let row_currents = drive
            .row_axis()
            .iter()
            .map(|v| v / s.load_resistance / s.current_scale)
            .collect();
        let window = WindowBounds::from_axis(&drive, s.resistance_window);

        Ok(Self {
            gate_values: gate.values(),
            drive,
            gate,
            row_currents,
            window,
            settle_delay: s.settle_delay,
            averaging: s.averaging,
            gain: s.gain,
            load_resistance: s.load_resistance,
            current_scale: s.current_scale,
            voltage_scale: s.voltage_scale,
            resistance_scale: s.resistance_scale,
            detector: CriticalCurrentDetector::from(&config.analysis),
        })
    }

    /// Physical current (A) for a drive source value
    pub fn current_si(&self, drive: f64) -> f64 {
        drive / self.load_resistance
    }

    /// Sample voltage (V) for a meter reading
    pub fn voltage_si(&self, reading: f64) -> f64 {
        reading / self.gain
    }

    /// Fit window in amps
    pub fn window_si(&self) -> WindowBounds {
        self.window.scaled(self.load_resistance)
    }

    /// Factor turning d(display V)/d(display I) into ohms
    pub fn gradient_scale(&self) -> f64 {
        self.voltage_scale / self.current_scale
    }

    /// `matrix` over (gate value, row current), every value multiplied by `factor`
    pub fn map_grid(&self, matrix: &Matrix, factor: f64) -> Grid {
        Grid {
            x: self.gate_values.clone(),
            y: self.row_currents.clone(),
            values: matrix.to_rows(factor),
        }
    }

    /// Number of gate steps
    pub fn gate_steps(&self) -> usize {
        self.gate_values.len()
    }

    /// Drive commands per gate step
    pub fn points_per_step(&self) -> usize {
        self.drive.points_per_sweep()
    }

    /// Drive commands over the whole run
    pub fn total_points(&self) -> usize {
        self.points_per_step() * self.gate_steps()
    }

    /// Run time spent in settle delays alone
    pub fn minimum_duration(&self) -> Duration {
        self.settle_delay
            .saturating_mul(u32::try_from(self.total_points()).unwrap_or(u32::MAX))
    }
}
