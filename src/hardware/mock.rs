//! Mock Hardware Implementations
//!
//! Scriptable instruments for exercising the sweep engine without physical devices.
//!
//! # Available Mocks
//!
//! - `MockSource` - Records every commanded level, optionally fails on the n-th command
//! - `MockMeter` - Evaluates a closure of the current drive and gate levels, optionally fails on
//!   the n-th read and calls a hook after every read
//!
//! Both complete instantly; the settle delay of the sweep is the only latency.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::hardware::capabilities::{ExcitationSource, MeasurementSource};

// =============================================================================
// MockSource - Recording Excitation Source
// =============================================================================

/// Excitation source that records every command.
///
/// # Example
///
/// ```rust,ignore
/// let source = MockSource::new("drive");
/// source.set_output(0.5).await?;
/// assert_eq!(source.calls().await, vec![0.5]);
/// ```
pub struct MockSource {
    name: String,
    level: Arc<RwLock<f64>>,
    calls: Mutex<Vec<f64>>,
    command_count: AtomicUsize,
    fail_on: Option<usize>,
}

impl MockSource {
    /// Create a source at level 0.0
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: Arc::new(RwLock::new(0.0)),
            calls: Mutex::new(Vec::new()),
            command_count: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fail the n-th `set_output` call (1-based) and every later one
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }

    /// Every level commanded so far, in order
    pub async fn calls(&self) -> Vec<f64> {
        self.calls.lock().await.clone()
    }

    /// Currently commanded level
    pub async fn level(&self) -> f64 {
        *self.level.read().await
    }

    fn level_handle(&self) -> Arc<RwLock<f64>> {
        Arc::clone(&self.level)
    }
}

#[async_trait]
impl ExcitationSource for MockSource {
    async fn set_output(&self, value: f64) -> Result<()> {
        let call = self.command_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fail_on) = self.fail_on {
            // de-energizing must keep working so cleanup can be observed
            if call >= fail_on && value != 0.0 {
                bail!("{}: simulated communication failure on command {}", self.name, call);
            }
        }
        self.calls.lock().await.push(value);
        *self.level.write().await = value;
        Ok(())
    }
}

// =============================================================================
// MockMeter - Closure-driven Measurement Source
// =============================================================================

type Model = Box<dyn Fn(f64, f64) -> f64 + Send + Sync>;
type ReadHook = Box<dyn Fn(usize) + Send + Sync>;

/// Measurement source whose reading is `model(drive_level, gate_level)`.
///
/// # Example
///
/// ```rust,ignore
/// let drive = MockSource::new("drive");
/// let gate = MockSource::new("gate");
/// let meter = MockMeter::new(&drive, &gate, |v, _| 0.5 * v);
/// ```
pub struct MockMeter {
    drive: Arc<RwLock<f64>>,
    gate: Arc<RwLock<f64>>,
    model: Model,
    reads: AtomicUsize,
    fail_on: Option<usize>,
    hook: Option<ReadHook>,
}

impl MockMeter {
    /// Create a meter observing the given sources
    pub fn new<F>(drive: &MockSource, gate: &MockSource, model: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            drive: drive.level_handle(),
            gate: gate.level_handle(),
            model: Box::new(model),
            reads: AtomicUsize::new(0),
            fail_on: None,
            hook: None,
        }
    }

    /// Fail the n-th read (1-based)
    pub fn failing_on(mut self, read: usize) -> Self {
        self.fail_on = Some(read);
        self
    }

    /// Call `hook(read_count)` after every successful read
    pub fn with_read_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(usize) + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Number of reads performed
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeasurementSource for MockMeter {
    async fn measure_now(&self, _averaging: u32) -> Result<f64> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(read) {
            bail!("meter: simulated read failure on read {}", read);
        }
        let drive = *self.drive.read().await;
        let gate = *self.gate.read().await;
        let value = (self.model)(drive, gate);
        if let Some(hook) = &self.hook {
            hook(read);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_records_levels() {
        let source = MockSource::new("drive");
        source.set_output(0.25).await.unwrap();
        source.set_output(-0.5).await.unwrap();
        assert_eq!(source.calls().await, vec![0.25, -0.5]);
        assert_eq!(source.level().await, -0.5);
    }

    #[tokio::test]
    async fn failing_source_still_accepts_zero() {
        let source = MockSource::new("drive").failing_on(2);
        source.set_output(1.0).await.unwrap();
        assert!(source.set_output(2.0).await.is_err());
        source.zero().await.unwrap();
        assert_eq!(source.calls().await, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn meter_follows_source_levels() {
        let drive = MockSource::new("drive");
        let gate = MockSource::new("gate");
        let meter = MockMeter::new(&drive, &gate, |v, g| 2.0 * v + g);

        drive.set_output(0.5).await.unwrap();
        gate.set_output(3.0).await.unwrap();
        assert_eq!(meter.measure_now(1).await.unwrap(), 4.0);
        assert_eq!(meter.read_count(), 1);
    }

    #[tokio::test]
    async fn meter_fails_on_requested_read() {
        let drive = MockSource::new("drive");
        let gate = MockSource::new("gate");
        let meter = MockMeter::new(&drive, &gate, |v, _| v).failing_on(2);
        assert!(meter.measure_now(1).await.is_ok());
        assert!(meter.measure_now(1).await.is_err());
    }
}
