//! Device Registry
//!
//! Resolves the three device slots of a sweep (drive source, gate source, meter) from
//! configuration once at startup. The rest of the crate only sees the capability traits.
//!
//! | Slot | Capability | Variants |
//! |------|------------|----------|
//! | `devices.drive` | `ExcitationSource` | `simulated`, `scpi` |
//! | `devices.gate` | `ExcitationSource` | `simulated`, `scpi` |
//! | `devices.meter` | `MeasurementSource` | `simulated` (junction model), `scpi` |
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let devices = registry::connect(&config.devices, &config.sweep).await?;
//! devices.drive.set_output(0.1).await?;
//! let reading = devices.meter.measure_now(6).await?;
//! ```

use std::sync::Arc;
use tracing::info;

use crate::config::{
    DevicesConfig, MeterConfig, ScpiMeterConfig, ScpiSourceConfig, SourceConfig, SweepConfig,
};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{ExcitationSource, MeasurementSource};
use crate::hardware::scpi::{run_init, ScpiMeter, ScpiSource, TcpScpiTransport};
use crate::hardware::simulated::{Circuit, SimulatedJunction, SimulatedSource};

/// The instruments of one run.
#[derive(Clone)]
pub struct DeviceSet {
    /// Drive source (triangular waveform)
    pub drive: Arc<dyn ExcitationSource>,
    /// Gate source
    pub gate: Arc<dyn ExcitationSource>,
    /// Voltmeter across the sample
    pub meter: Arc<dyn MeasurementSource>,
}

impl DeviceSet {
    /// Assemble a set from already constructed instruments.
    pub fn new(
        drive: Arc<dyn ExcitationSource>,
        gate: Arc<dyn ExcitationSource>,
        meter: Arc<dyn MeasurementSource>,
    ) -> Self {
        Self { drive, gate, meter }
    }
}

/// Human-readable variant name of a source slot
pub fn source_kind(config: &SourceConfig) -> &'static str {
    match config {
        SourceConfig::Simulated => "simulated",
        SourceConfig::Scpi(_) => "scpi",
    }
}

/// Human-readable variant name of the meter slot
pub fn meter_kind(config: &MeterConfig) -> &'static str {
    match config {
        MeterConfig::Simulated(_) => "simulated",
        MeterConfig::Scpi(_) => "scpi",
    }
}

/// Instantiate and connect every device slot.
///
/// A simulated meter is wired with the load resistance and gain of `sweep`, the same values the
/// controller converts readings with.
pub async fn connect(config: &DevicesConfig, sweep: &SweepConfig) -> AppResult<DeviceSet> {
    info!(
        drive = source_kind(&config.drive),
        gate = source_kind(&config.gate),
        meter = meter_kind(&config.meter),
        "Connecting devices"
    );

    match (&config.drive, &config.gate, &config.meter) {
        (SourceConfig::Simulated, SourceConfig::Simulated, MeterConfig::Simulated(params)) => {
            let drive = SimulatedSource::new();
            let gate = SimulatedSource::new();
            let meter = SimulatedJunction::new(
                drive.clone(),
                gate.clone(),
                params.clone(),
                Circuit::from(sweep),
            );
            Ok(DeviceSet::new(Arc::new(drive), Arc::new(gate), Arc::new(meter)))
        }
        (_, _, MeterConfig::Simulated(_)) => Err(DaqError::Configuration(
            "the simulated meter needs simulated drive and gate sources".to_string(),
        )),
        (drive, gate, MeterConfig::Scpi(meter)) => {
            let drive = connect_source("drive", drive).await?;
            let gate = connect_source("gate", gate).await?;
            let meter = connect_scpi_meter(meter).await?;
            Ok(DeviceSet::new(drive, gate, meter))
        }
    }
}

async fn connect_source(slot: &str, config: &SourceConfig) -> AppResult<Arc<dyn ExcitationSource>> {
    match config {
        SourceConfig::Simulated => Ok(Arc::new(SimulatedSource::new())),
        SourceConfig::Scpi(scpi) => connect_scpi_source(slot, scpi).await,
    }
}

async fn connect_scpi_source(
    slot: &str,
    config: &ScpiSourceConfig,
) -> AppResult<Arc<dyn ExcitationSource>> {
    let transport = TcpScpiTransport::connect(&config.address)
        .await
        .map_err(|e| DaqError::instrument(slot, &e))?;
    run_init(&transport, &config.init)
        .await
        .map_err(|e| DaqError::instrument(slot, &e))?;
    let source = ScpiSource::new(transport, config.set_command.clone())
        .map_err(|e| DaqError::Configuration(format!("devices.{slot}.set_command: {e:#}")))?;
    Ok(Arc::new(source))
}

async fn connect_scpi_meter(config: &ScpiMeterConfig) -> AppResult<Arc<dyn MeasurementSource>> {
    let transport = TcpScpiTransport::connect(&config.address)
        .await
        .map_err(|e| DaqError::instrument("meter", &e))?;
    run_init(&transport, &config.init)
        .await
        .map_err(|e| DaqError::instrument("meter", &e))?;
    Ok(Arc::new(ScpiMeter::new(transport, config.query.clone())))
}
