//! Run configuration using Figment
//!
//! Configuration for one gate sweep is loaded from, in increasing priority:
//! 1. Built-in defaults (`RunConfig::default()`)
//! 2. A TOML file (default `config/iv_gate.toml`, optional)
//! 3. Environment variables prefixed with `IV_GATE_`, nested keys split on `__`
//! 4. Command-line overrides merged by the binary
//!
//! # Example
//! ```no_run
//! use iv_gate::config::RunConfig;
//!
//! let config = RunConfig::load()?;
//! println!("Gate sweep: {}", config.sweep.gate);
//! # Ok::<(), iv_gate::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/iv_gate.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "IV_GATE_";

/// Top-level run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Waveform, timing and unit conversion
    pub sweep: SweepConfig,
    /// Critical-current detection
    pub analysis: AnalysisConfig,
    /// Visualization
    pub display: DisplayConfig,
    /// Result persistence
    pub output: OutputConfig,
    /// Logging
    pub logging: LoggingConfig,
    /// Instrument selection
    pub devices: DevicesConfig,
}

/// Waveform, timing and unit conversion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Drive source amplitude, in source units (volts across the load resistor)
    pub drive_range: f64,
    /// Drive source step
    pub drive_step: f64,
    /// Wait between commanding a drive value and reading the meter
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Readings averaged by the meter per point
    pub averaging: u32,
    /// Amplifier gain between sample and meter
    pub gain: f64,
    /// Series resistor converting drive voltage to current, in ohms
    pub load_resistance: f64,
    /// Display unit of current (1e-6 plots microamps)
    pub current_scale: f64,
    /// Display unit of measured voltage
    pub voltage_scale: f64,
    /// Display unit of resistance
    pub resistance_scale: f64,
    /// Gate sweep as `"amplitude;points"`
    pub gate: String,
    /// Half-width of the resistance fit band around zero drive, as a fraction of `drive_range`
    pub resistance_window: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            drive_range: 1.0,
            drive_step: 0.01,
            settle_delay: Duration::from_millis(10),
            averaging: 6,
            gain: 1.0,
            load_resistance: 1.0e4,
            current_scale: 1.0e-6,
            voltage_scale: 1.0e-6,
            resistance_scale: 1.0,
            gate: "10;11".to_string(),
            resistance_window: 0.1,
        }
    }
}

/// Critical-current detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Samples on each side of zero drive forming the baseline
    pub baseline_points: usize,
    /// Baseline standard deviations a departure must exceed
    pub sigma_multiplier: f64,
    /// Departure floor as a fraction of the trace's largest |R|
    pub relative_floor: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            baseline_points: 2,
            sigma_multiplier: 5.0,
            relative_floor: 0.05,
        }
    }
}

/// Visualization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Period of the redraw loop
    #[serde(with = "humantime_serde")]
    pub redraw_interval: Duration,
    /// Open the native measurement window (requires the `gui` feature)
    pub gui: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            redraw_interval: Duration::from_secs(5),
            gui: false,
        }
    }
}

/// Result persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write results at the end of the run
    pub save: bool,
    /// Root directory; a dated subdirectory is created per day
    pub dir: PathBuf,
    /// File name prefix
    pub caption: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save: true,
            dir: PathBuf::from("data"),
            caption: "Gate".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// pretty, compact or json
    pub format: String,
    /// Log span close events, which report the duration of the sweep span
    pub span_events: bool,
    /// ANSI colors in pretty output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            span_events: false,
            ansi: true,
        }
    }
}

/// Device slots
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Source producing the triangular drive
    pub drive: SourceConfig,
    /// Source producing the gate voltage
    pub gate: SourceConfig,
    /// Meter reading the sample voltage
    pub meter: MeterConfig,
}

/// Excitation source variant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// In-memory source
    #[default]
    Simulated,
    /// SCPI source over TCP
    Scpi(ScpiSourceConfig),
}

/// SCPI excitation source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScpiSourceConfig {
    /// `host:port` of the instrument
    pub address: String,
    /// Command template with a `{value}` placeholder, e.g. `:SOUR:LEV {value}`
    pub set_command: String,
    /// Commands sent once after connecting
    #[serde(default)]
    pub init: Vec<String>,
}

/// Measurement source variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeterConfig {
    /// Simulated Josephson junction (needs simulated sources)
    Simulated(JunctionConfig),
    /// SCPI meter over TCP
    Scpi(ScpiMeterConfig),
}

impl Default for MeterConfig {
    fn default() -> Self {
        MeterConfig::Simulated(JunctionConfig::default())
    }
}

/// SCPI measurement source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScpiMeterConfig {
    /// `host:port` of the instrument
    pub address: String,
    /// Query returning one reading, e.g. `:READ?`
    pub query: String,
    /// Commands sent once after connecting
    #[serde(default)]
    pub init: Vec<String>,
}

/// Parameters of the simulated junction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JunctionConfig {
    /// Critical current at zero gate, in amps
    pub critical_current: f64,
    /// Critical current that survives at the gate nodes, in amps
    pub critical_current_floor: f64,
    /// Gate voltage period of the critical-current modulation
    pub gate_period: f64,
    /// Retrapping current as a fraction of the critical current
    pub retrap_ratio: f64,
    /// Resistance in the normal state, in ohms
    pub normal_resistance: f64,
    /// Peak amplitude of uniform voltage noise, in volts
    pub noise: f64,
}

impl Default for JunctionConfig {
    fn default() -> Self {
        Self {
            critical_current: 50.0e-6,
            critical_current_floor: 5.0e-6,
            gate_period: 20.0,
            retrap_ratio: 0.4,
            normal_resistance: 10.0,
            noise: 1.0e-7,
        }
    }
}

impl RunConfig {
    /// Load configuration from the default file and environment variables.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The layered provider stack, for callers that merge further overrides.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(RunConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    ///
    /// The gate string is deliberately not validated here: a malformed value falls back to the
    /// default gate sweep when the axes are built.
    pub fn validate(&self) -> AppResult<()> {
        let s = &self.sweep;
        for (name, value) in [
            ("sweep.drive_range", s.drive_range),
            ("sweep.drive_step", s.drive_step),
            ("sweep.gain", s.gain),
            ("sweep.load_resistance", s.load_resistance),
            ("sweep.current_scale", s.current_scale),
            ("sweep.voltage_scale", s.voltage_scale),
            ("sweep.resistance_scale", s.resistance_scale),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DaqError::Configuration(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        if s.drive_step > s.drive_range {
            return Err(DaqError::Configuration(format!(
                "sweep.drive_step ({}) exceeds sweep.drive_range ({})",
                s.drive_step, s.drive_range
            )));
        }
        if s.averaging == 0 {
            return Err(DaqError::Configuration(
                "sweep.averaging must be at least 1".to_string(),
            ));
        }
        if !(s.resistance_window > 0.0 && s.resistance_window <= 1.0) {
            return Err(DaqError::Configuration(format!(
                "sweep.resistance_window must be in (0, 1], got {}",
                s.resistance_window
            )));
        }

        let a = &self.analysis;
        if !(a.sigma_multiplier.is_finite() && a.sigma_multiplier >= 0.0) {
            return Err(DaqError::Configuration(format!(
                "analysis.sigma_multiplier must be non-negative, got {}",
                a.sigma_multiplier
            )));
        }
        if !(a.relative_floor.is_finite() && a.relative_floor >= 0.0) {
            return Err(DaqError::Configuration(format!(
                "analysis.relative_floor must be non-negative, got {}",
                a.relative_floor
            )));
        }

        if self.display.redraw_interval.is_zero() {
            return Err(DaqError::Configuration(
                "display.redraw_interval must be non-zero".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }
        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid logging.format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        Ok(())
    }
}
