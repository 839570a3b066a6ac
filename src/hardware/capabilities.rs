//! Instrument Capabilities
//!
//! The sweep engine never talks to a concrete device type. It only needs two capabilities:
//!
//! - `ExcitationSource`: something that can be commanded to an output level (the drive source
//!   producing the triangular waveform, the gate source producing the gate voltage)
//! - `MeasurementSource`: something that returns an averaged reading on demand (the voltmeter
//!   across the sample)
//!
//! Concrete variants (simulated, SCPI over TCP, test mocks) implement these traits and are chosen
//! once at startup by `hardware::registry`.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn measure_at<S, M>(source: &S, meter: &M, level: f64) -> Result<f64>
//! where
//!     S: ExcitationSource,
//!     M: MeasurementSource,
//! {
//!     source.set_output(level).await?;
//!     let reading = meter.measure_now(4).await?;
//!     source.set_output(0.0).await?;
//!     Ok(reading)
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Capability: Programmable Output
///
/// Voltage or current sources driving the sample.
///
/// # Contract
/// - `set_output` commands the level and returns once the device accepted it
/// - Commanding the same level twice is harmless
/// - `set_output(0.0)` de-energizes the output and must be safe at any time
#[async_trait]
pub trait ExcitationSource: Send + Sync {
    /// Command the output level in device-native units.
    async fn set_output(&self, value: f64) -> Result<()>;

    /// De-energize the output.
    async fn zero(&self) -> Result<()> {
        self.set_output(0.0).await
    }
}

/// Capability: Averaged Scalar Readout
///
/// Voltmeters and ADC front ends.
///
/// # Contract
/// - `measure_now` performs `averaging` acquisitions and returns their mean
/// - Must tolerate one call per sweep point
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Read the averaged instantaneous value in device-native units.
    async fn measure_now(&self, averaging: u32) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSource {
        levels: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl ExcitationSource for RecordingSource {
        async fn set_output(&self, value: f64) -> Result<()> {
            self.levels.lock().unwrap().push(value);
            Ok(())
        }
    }

    struct ConstantMeter;

    #[async_trait]
    impl MeasurementSource for ConstantMeter {
        async fn measure_now(&self, _averaging: u32) -> Result<f64> {
            Ok(0.123)
        }
    }

    #[tokio::test]
    async fn zero_commands_zero_output() {
        let source = RecordingSource {
            levels: Mutex::new(Vec::new()),
        };
        source.set_output(1.5).await.unwrap();
        source.zero().await.unwrap();
        assert_eq!(*source.levels.lock().unwrap(), vec![1.5, 0.0]);
    }

    #[tokio::test]
    async fn test_measurement_trait() {
        let meter = ConstantMeter;
        assert_eq!(meter.measure_now(6).await.unwrap(), 0.123);
    }
}
