//! # I-V Gate Sweep Library
//!
//! This crate measures current-voltage characteristics of a gated junction as a function of gate
//! voltage. For each gate value the drive source walks a triangular waveform (0 → +max → −max → 0),
//! the meter is read at every point, and the readings are sorted into switching (critical) and
//! retrapping branches. After each gate step the differential resistance and the switching
//! currents are extracted and pushed to the plots. Results are written to CSV and the map panels
//! to PNG at the end.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered run configuration (defaults, TOML, environment, CLI) via `figment`.
//! - **`error`**: The `DaqError` enum shared by every module.
//! - **`hardware`**: Capability traits for excitation sources and meters, plus simulated, SCPI and
//!   mock implementations and the registry that wires them from configuration.
//! - **`sweep`**: The waveform, branch classifier, resistance and critical-current estimators, and
//!   the controller state machine that runs a sweep.
//! - **`plot`**: The push-only plot surface, the periodic redraw loop and, with the `gui`
//!   feature, the native measurement window.
//! - **`data`**: End-of-run export (manifest, CSV tables, PNG maps).
//! - **`session`**: Runs acquisition and redraw concurrently and persists the results.
//! - **`logging`**: `tracing` subscriber setup.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod plot;
pub mod session;
pub mod sweep;
