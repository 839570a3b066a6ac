//! Simulated gate-tunable Josephson junction.
//!
//! `SimulatedSource` keeps its level in memory. `SimulatedJunction` reads the levels of the drive
//! and gate sources and returns the voltage of a hysteretic junction:
//!
//! - drive current `I = V_drive / load_resistance`
//! - critical current `Ic(Vg) = ic0 * |cos(pi * Vg / period)| + ic_floor`
//! - switches to the resistive branch when `|I| > Ic`, retraps when `|I| < retrap_ratio * Ic`
//! - resistive voltage `sign(I) * Rn * sqrt(I^2 - Ir^2)`
//!
//! Uniform noise is added to every acquisition and the result is scaled by the amplifier gain. The
//! load resistance and gain are the ones the sweep converts with, so the readings round-trip.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::config::{JunctionConfig, SweepConfig};
use crate::hardware::capabilities::{ExcitationSource, MeasurementSource};

/// In-memory excitation source.
#[derive(Clone, Default)]
pub struct SimulatedSource {
    level: Arc<RwLock<f64>>,
}

impl SimulatedSource {
    /// Create a source at level 0.0
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently commanded level
    pub async fn level(&self) -> f64 {
        *self.level.read().await
    }
}

#[async_trait]
impl ExcitationSource for SimulatedSource {
    async fn set_output(&self, value: f64) -> Result<()> {
        *self.level.write().await = value;
        Ok(())
    }
}

/// Series resistor and amplifier between the sources, the junction and the meter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circuit {
    /// Ohms between the drive source and the junction
    pub load_resistance: f64,
    /// Amplifier gain in front of the meter
    pub gain: f64,
}

impl From<&SweepConfig> for Circuit {
    fn from(sweep: &SweepConfig) -> Self {
        Self {
            load_resistance: sweep.load_resistance,
            gain: sweep.gain,
        }
    }
}

/// Voltmeter across a simulated junction.
pub struct SimulatedJunction {
    drive: SimulatedSource,
    gate: SimulatedSource,
    params: JunctionConfig,
    circuit: Circuit,
    resistive: Mutex<bool>,
}

impl SimulatedJunction {
    /// Create a junction driven by `drive` through `circuit` and tuned by `gate`
    pub fn new(
        drive: SimulatedSource,
        gate: SimulatedSource,
        params: JunctionConfig,
        circuit: Circuit,
    ) -> Self {
        Self {
            drive,
            gate,
            params,
            circuit,
            resistive: Mutex::new(false),
        }
    }

    /// Critical current at gate voltage `gate`, in amps
    pub fn critical_current(&self, gate: f64) -> f64 {
        let p = &self.params;
        let phase = if p.gate_period > 0.0 {
            std::f64::consts::PI * gate / p.gate_period
        } else {
            0.0
        };
        p.critical_current * phase.cos().abs() + p.critical_current_floor
    }

    fn junction_voltage(&self, current: f64, resistive: bool, gate: f64) -> f64 {
        if !resistive {
            return 0.0;
        }
        let retrap = self.params.retrap_ratio * self.critical_current(gate);
        let excess = (current * current - retrap * retrap).max(0.0);
        current.signum() * self.params.normal_resistance * excess.sqrt()
    }
}

#[async_trait]
impl MeasurementSource for SimulatedJunction {
    async fn measure_now(&self, averaging: u32) -> Result<f64> {
        let drive = self.drive.level().await;
        let gate = self.gate.level().await;
        let current = drive / self.circuit.load_resistance;
        let ic = self.critical_current(gate);

        let resistive = {
            let mut state = self.resistive.lock().await;
            if *state {
                if current.abs() < self.params.retrap_ratio * ic {
                    *state = false;
                }
            } else if current.abs() > ic {
                *state = true;
            }
            *state
        };

        let clean = self.junction_voltage(current, resistive, gate);
        let noise = self.params.noise;
        let samples = averaging.max(1);
        let mut rng = rand::thread_rng();
        let sum: f64 = (0..samples)
            .map(|_| {
                if noise > 0.0 {
                    clean + rng.gen_range(-noise..=noise)
                } else {
                    clean
                }
            })
            .sum();
        Ok(sum / f64::from(samples) * self.circuit.gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_junction() -> (SimulatedSource, SimulatedSource, SimulatedJunction) {
        let drive = SimulatedSource::new();
        let gate = SimulatedSource::new();
        let params = JunctionConfig {
            critical_current: 1.0,
            critical_current_floor: 0.0,
            gate_period: 4.0,
            retrap_ratio: 0.5,
            normal_resistance: 2.0,
            noise: 0.0,
        };
        let circuit = Circuit {
            load_resistance: 1.0,
            gain: 1.0,
        };
        let junction = SimulatedJunction::new(drive.clone(), gate.clone(), params, circuit);
        (drive, gate, junction)
    }

    #[tokio::test]
    async fn superconducting_below_critical_current() {
        let (drive, _gate, junction) = quiet_junction();
        drive.set_output(0.9).await.unwrap();
        assert_eq!(junction.measure_now(1).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn hysteresis_between_switching_and_retrapping() {
        let (drive, _gate, junction) = quiet_junction();

        drive.set_output(1.5).await.unwrap();
        let switched = junction.measure_now(1).await.unwrap();
        assert!(switched > 0.0);

        // below Ic but above Ir: still resistive
        drive.set_output(0.8).await.unwrap();
        let expected = 2.0 * (0.8_f64 * 0.8 - 0.5 * 0.5).sqrt();
        assert!((junction.measure_now(1).await.unwrap() - expected).abs() < 1e-12);

        // below Ir: retrapped
        drive.set_output(0.4).await.unwrap();
        assert_eq!(junction.measure_now(1).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn gate_suppresses_critical_current() {
        let (drive, gate, junction) = quiet_junction();
        gate.set_output(2.0).await.unwrap(); // cos(pi/2) = 0
        assert!(junction.critical_current(2.0) < 1e-12);
        drive.set_output(0.1).await.unwrap();
        assert!(junction.measure_now(1).await.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn circuit_follows_sweep_settings() {
        let mut sweep = SweepConfig::default();
        sweep.load_resistance = 2.0;
        sweep.gain = 100.0;
        let circuit = Circuit::from(&sweep);
        assert_eq!(
            circuit,
            Circuit {
                load_resistance: 2.0,
                gain: 100.0
            }
        );

        let drive = SimulatedSource::new();
        let params = JunctionConfig {
            noise: 0.0,
            ..JunctionConfig::default()
        };
        let junction =
            SimulatedJunction::new(drive.clone(), SimulatedSource::new(), params, circuit);
        // 2 V over 2 ohms is 1 A, far above Ic: V = gain * Rn * sqrt(I^2 - Ir^2)
        drive.set_output(2.0).await.unwrap();
        let retrap = 0.4 * 55.0e-6;
        let expected = 100.0 * 10.0 * (1.0_f64 - retrap * retrap).sqrt();
        assert!((junction.measure_now(1).await.unwrap() - expected).abs() < 1e-9);
    }
}
