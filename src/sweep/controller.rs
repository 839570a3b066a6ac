//! Gate sweep controller.
//!
//! Drives the gate and drive sources in lock-step through the nested sweep, routes every reading
//! into the branch buffers, runs the per-step analysis and publishes results to the plot surface.
//!
//! The controller owns its `RunContext` exclusively; the plot surface only ever receives copies.
//! Whatever way the run ends (completion, cancellation, instrument failure) both sources are
//! commanded to 0 before `run` returns.

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::error::{AppResult, DaqError};
use crate::hardware::registry::DeviceSet;
use crate::plot::{unit_prefix, LineSeries, Panel, PlotSurface};
use crate::sweep::buffers::{Matrix, RunContext};
use crate::sweep::cancel::CancelFlag;
use crate::sweep::classifier::{classify, Branch, Segment};
use crate::sweep::plan::SweepPlan;
use crate::sweep::resistance::{full_gradient, LinearFit};
use crate::sweep::state::SweepState;
use crate::sweep::timing::{format_duration, TimeEstimator};

/// Caption of the I-V panel until the live estimate has enough points.
pub const PENDING_RESISTANCE_CAPTION: &str = "R will be measured later...";

/// How a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every gate value was measured
    Completed,
    /// The cancellation flag stopped the run
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// State machine running one gate sweep.
pub struct SweepController {
    plan: SweepPlan,
    devices: DeviceSet,
    surface: Arc<dyn PlotSurface>,
    cancel: CancelFlag,
    state: SweepState,
    gate_index: usize,
    context: RunContext,
    step_fit: LinearFit,
    live_fit: LinearFit,
    iv_points: Vec<[f64; 2]>,
    estimator: TimeEstimator,
    step_started: Instant,
}

impl SweepController {
    /// Prepare a run; nothing is commanded until `run`.
    pub fn new(
        plan: SweepPlan,
        devices: DeviceSet,
        surface: Arc<dyn PlotSurface>,
        cancel: CancelFlag,
    ) -> Self {
        let context = RunContext::new(plan.drive.n_down(), plan.gate_steps());
        let estimator = TimeEstimator::start(plan.gate_steps());
        Self {
            plan,
            devices,
            surface,
            cancel,
            state: SweepState::Idle,
            gate_index: 0,
            context,
            step_fit: LinearFit::default(),
            live_fit: LinearFit::default(),
            iv_points: Vec::new(),
            estimator,
            step_started: Instant::now(),
        }
    }

    /// Current state
    pub fn state(&self) -> SweepState {
        self.state
    }

    /// The plan this controller runs
    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Buffers and results accumulated so far
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Give up the controller and keep its results
    pub fn into_context(self) -> RunContext {
        self.context
    }

    /// Run the sweep to completion, cancellation or failure.
    pub async fn run(&mut self) -> AppResult<RunOutcome> {
        if self.state != SweepState::Idle {
            return Err(DaqError::Configuration(format!(
                "sweep controller cannot start from state {}",
                self.state
            )));
        }
        let span = info_span!("sweep", run_id = %self.context.run_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> AppResult<RunOutcome> {
        self.log_header();
        self.estimator = TimeEstimator::start(self.plan.gate_steps());

        match self.execute().await {
            Ok(outcome) => {
                self.shutdown().await?;
                info!(
                    %outcome,
                    completed_steps = self.context.completed_steps(),
                    elapsed = %format_duration(self.estimator.elapsed()),
                    "Sweep finished, sources at zero"
                );
                Ok(outcome)
            }
            Err(err) => {
                error!(
                    error = %err,
                    state = %self.state,
                    mid_sweep = self.state.is_sweeping(),
                    gate_index = self.gate_index,
                    "Sweep failed, de-energizing sources"
                );
                self.state = SweepState::Failed;
                if let Err(cleanup) = self.shutdown().await {
                    error!(error = %cleanup, "Failed to de-energize sources");
                }
                Err(err)
            }
        }
    }

    async fn execute(&mut self) -> AppResult<RunOutcome> {
        while !self.state.is_terminal() {
            self.state = self.advance().await?;
            debug!(state = %self.state, gate_index = self.gate_index, "State transition");
        }

        match self.state {
            SweepState::Cancelled => {
                info!(
                    reason = self.cancel.reason().as_deref().unwrap_or("unspecified"),
                    completed_steps = self.context.completed_steps(),
                    "Sweep cancelled"
                );
                Ok(RunOutcome::Cancelled)
            }
            SweepState::Failed => Err(DaqError::Instrument(
                "sweep entered the failed state".to_string(),
            )),
            _ => Ok(RunOutcome::Completed),
        }
    }

    /// Run the work of the current state and return the next one.
    async fn advance(&mut self) -> AppResult<SweepState> {
        let next = match self.state {
            SweepState::Idle => {
                if self.cancel.is_set() {
                    SweepState::Cancelled
                } else {
                    self.gate_index = 0;
                    SweepState::SettingGate
                }
            }
            SweepState::SettingGate => {
                self.set_gate().await?;
                SweepState::SweepingUp
            }
            SweepState::SweepingUp => {
                self.sweep_segment(Segment::Up, SweepState::SweepingDown)
                    .await?
            }
            SweepState::SweepingDown => {
                self.sweep_segment(Segment::Down, SweepState::SweepingBack)
                    .await?
            }
            SweepState::SweepingBack => {
                self.sweep_segment(Segment::Back, SweepState::AnalyzingStep)
                    .await?
            }
            SweepState::AnalyzingStep => {
                self.analyze_step();
                if self.cancel.is_set() {
                    SweepState::Cancelled
                } else if self.gate_index + 1 < self.plan.gate_steps() {
                    self.gate_index += 1;
                    SweepState::SettingGate
                } else {
                    SweepState::Done
                }
            }
            terminal @ (SweepState::Done | SweepState::Cancelled | SweepState::Failed) => terminal,
        };
        Ok(next)
    }

    async fn set_gate(&mut self) -> AppResult<()> {
        let gate = self.plan.gate_values[self.gate_index];
        info!(
            step = self.gate_index + 1,
            of = self.plan.gate_steps(),
            gate,
            "Setting gate"
        );
        self.devices
            .gate
            .set_output(gate)
            .await
            .map_err(|e| DaqError::instrument("gate", &e))?;

        self.surface
            .set_caption(Panel::IvCurve, PENDING_RESISTANCE_CAPTION.to_string());
        self.step_fit = LinearFit::default();
        self.live_fit = LinearFit::with_points(vec![(0.0, 0.0)]);
        self.iv_points.clear();
        self.step_started = Instant::now();
        Ok(())
    }

    /// Step the drive through one leg. Returns `next`, or `Cancelled` if the flag was set.
    async fn sweep_segment(&mut self, segment: Segment, next: SweepState) -> AppResult<SweepState> {
        let values = self.plan.drive.segment(segment).to_vec();
        for (j, value) in values.into_iter().enumerate() {
            self.acquire_point(segment, j, value).await?;
            if self.cancel.is_set() {
                return Ok(SweepState::Cancelled);
            }
        }
        Ok(next)
    }

    async fn acquire_point(&mut self, segment: Segment, j: usize, value: f64) -> AppResult<()> {
        self.devices
            .drive
            .set_output(value)
            .await
            .map_err(|e| DaqError::instrument("drive", &e))?;
        tokio::time::sleep(self.plan.settle_delay).await;
        let reading = self
            .devices
            .meter
            .measure_now(self.plan.averaging)
            .await
            .map_err(|e| DaqError::instrument("meter", &e))?;

        let current_si = self.plan.current_si(value);
        let voltage_si = self.plan.voltage_si(reading);
        let current = current_si / self.plan.current_scale;
        let voltage = voltage_si / self.plan.voltage_scale;
        let gate = self.plan.gate_values[self.gate_index];
        trace!(%segment, j, drive = value, reading, current, voltage, "Point acquired");

        self.context.accumulators.push(current, voltage, gate);
        let target = classify(segment, j, self.plan.drive.n_down());
        self.context
            .branch_mut(target.branch)
            .write(target.row, self.gate_index, voltage);
        if target.branch == Branch::Critical {
            self.step_fit.push(current_si, voltage_si);
        }

        self.iv_points.push([current, voltage]);
        self.surface.set_line(
            Panel::IvCurve,
            LineSeries {
                label: format!("Vg = {gate}"),
                points: self.iv_points.clone(),
            },
        );

        if value > self.plan.window.upper {
            self.live_fit.push(current_si, voltage_si);
            if let Some(resistance) = self.live_fit.slope() {
                self.surface.set_caption(
                    Panel::IvCurve,
                    format!(
                        "R = {:.3} {}Ω",
                        resistance / self.plan.resistance_scale,
                        unit_prefix(self.plan.resistance_scale)
                    ),
                );
            }
        }
        Ok(())
    }

    fn analyze_step(&mut self) {
        let col = self.gate_index;
        let gate = self.plan.gate_values[col];
        let scale = self.plan.gradient_scale();

        let critical = self.context.critical.values().column(col);
        let retrapping = self.context.retrapping.values().column(col);
        let r_critical = full_gradient(&critical, &self.plan.row_currents, scale);
        let r_retrapping = full_gradient(&retrapping, &self.plan.row_currents, scale);
        self.context.critical_resistance.set_column(col, &r_critical);
        self.context
            .retrapping_resistance
            .set_column(col, &r_retrapping);

        let window = self.plan.window_si();
        let estimate = self.step_fit.slope_within(window.lower, window.upper);
        if estimate.is_none() {
            warn!(gate, "Too few points in the resistance window, keeping previous value");
        }
        let resistance = self.context.tracker.update(estimate);
        let currents = self.plan.detector.extract(&self.plan.row_currents, &r_critical);

        self.context.resistance_summary.push(resistance);
        self.context.critical_currents.push(currents);
        self.publish_step();
        self.surface.redraw(None);

        let remaining = self.estimator.step_completed();
        info!(
            step = col + 1,
            of = self.plan.gate_steps(),
            gate,
            resistance,
            ic_positive = currents.positive,
            ic_negative = currents.negative,
            step_time = ?self.step_started.elapsed(),
            remaining = %format_duration(remaining),
            "Gate step complete"
        );
    }

    fn publish_step(&self) {
        let gates = &self.plan.gate_values;
        let grid = |matrix: &Matrix, factor: f64| self.plan.map_grid(matrix, factor);
        let r_factor = 1.0 / self.plan.resistance_scale;

        let panels = [
            (
                Panel::CriticalVoltageMap,
                Panel::CriticalVoltageSurface,
                grid(self.context.critical.values(), 1.0),
            ),
            (
                Panel::RetrappingVoltageMap,
                Panel::RetrappingVoltageSurface,
                grid(self.context.retrapping.values(), 1.0),
            ),
            (
                Panel::CriticalResistanceMap,
                Panel::CriticalResistanceSurface,
                grid(&self.context.critical_resistance, r_factor),
            ),
            (
                Panel::RetrappingResistanceMap,
                Panel::RetrappingResistanceSurface,
                grid(&self.context.retrapping_resistance, r_factor),
            ),
        ];
        for (map, surface, data) in panels {
            self.surface.set_mesh(map, data.clone());
            self.surface.set_surface(surface, data);
        }

        let done = &gates[..self.context.completed_steps()];
        let [positive, negative] = self.context.critical_current_table();
        self.surface.set_lines(
            Panel::CriticalCurrentVsGate,
            vec![
                LineSeries::from_xy("Ic+", done, &positive),
                LineSeries::from_xy("Ic-", done, &negative),
            ],
        );
        let resistance: Vec<f64> = self
            .context
            .resistance_summary
            .iter()
            .map(|r| r * r_factor)
            .collect();
        self.surface.set_line(
            Panel::ResistanceVsGate,
            LineSeries::from_xy("R", done, &resistance),
        );
    }

    async fn shutdown(&self) -> AppResult<()> {
        let drive = self
            .devices
            .drive
            .zero()
            .await
            .map_err(|e| DaqError::instrument("drive", &e));
        let gate = self
            .devices
            .gate
            .zero()
            .await
            .map_err(|e| DaqError::instrument("gate", &e));
        drive.and(gate)
    }

    fn log_header(&self) {
        let unit = unit_prefix(self.plan.current_scale);
        let max = self.plan.current_si(self.plan.drive.max()) / self.plan.current_scale;
        let step = if self.plan.drive.half() > 0 {
            max / self.plan.drive.half() as f64
        } else {
            0.0
        };
        info!(
            current_range = %format!("{max:.3} {unit}A"),
            current_step = %format!("{step:.3} {unit}A"),
            gain = self.plan.gain,
            settle_delay = ?self.plan.settle_delay,
            averaging = self.plan.averaging,
            gate_amplitude = self.plan.gate.amplitude,
            gate_points = self.plan.gate.points,
            points_per_step = self.plan.points_per_step(),
            "Starting gate sweep"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::hardware::mock::{MockMeter, MockSource};
    use crate::plot::{HeadlessSurface, PanelData};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn plan(gate: &str) -> SweepPlan {
        let mut config = RunConfig::default();
        config.sweep.drive_range = 1.0;
        config.sweep.drive_step = 0.2;
        config.sweep.gate = gate.to_string();
        config.sweep.settle_delay = Duration::ZERO;
        config.sweep.load_resistance = 1.0;
        config.sweep.current_scale = 1.0;
        config.sweep.voltage_scale = 1.0;
        // fit window [-0.2, 0.2]; the live estimate sees every point above +0.2
        config.sweep.resistance_window = 0.2;
        SweepPlan::from_config(&config).unwrap()
    }

    fn ohmic(factor: f64) -> (Arc<MockSource>, Arc<MockSource>, DeviceSet) {
        let drive = Arc::new(MockSource::new("drive"));
        let gate = Arc::new(MockSource::new("gate"));
        let meter = Arc::new(MockMeter::new(&drive, &gate, move |v, _| factor * v));
        let devices = DeviceSet::new(drive.clone(), gate.clone(), meter);
        (drive, gate, devices)
    }

    #[tokio::test]
    async fn single_step_publishes_every_panel() {
        let (_drive, _gate, devices) = ohmic(0.5);
        let surface = Arc::new(HeadlessSurface::new());
        let mut controller =
            SweepController::new(plan("1;2"), devices, surface.clone(), CancelFlag::new());

        assert_eq!(controller.run().await.unwrap(), RunOutcome::Completed);
        assert_eq!(controller.state(), SweepState::Done);

        for panel in Panel::ALL {
            assert_ne!(surface.panel(panel).data, PanelData::Empty, "{panel:?}");
        }
        let caption = surface.panel(Panel::IvCurve).caption.unwrap();
        assert_eq!(caption, "R = 0.500 Ω");
    }

    #[tokio::test]
    async fn preset_cancel_touches_nothing_but_zero() {
        let (drive, gate, devices) = ohmic(1.0);
        let cancel = CancelFlag::new();
        cancel.cancel("before start");
        let mut controller =
            SweepController::new(plan("1;2"), devices, Arc::new(HeadlessSurface::new()), cancel);

        assert_eq!(controller.run().await.unwrap(), RunOutcome::Cancelled);
        assert_eq!(drive.calls().await, vec![0.0]);
        assert_eq!(gate.calls().await, vec![0.0]);
        assert_eq!(controller.context().completed_steps(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn failure_during_a_leg_is_logged_mid_sweep() {
        let drive = Arc::new(MockSource::new("drive"));
        let gate = Arc::new(MockSource::new("gate"));
        let meter = Arc::new(MockMeter::new(&drive, &gate, |v, _| v).failing_on(3));
        let devices = DeviceSet::new(drive.clone(), gate.clone(), meter);
        let mut controller = SweepController::new(
            plan("1;2"),
            devices,
            Arc::new(HeadlessSurface::new()),
            CancelFlag::new(),
        );

        assert!(controller.run().await.is_err());
        assert_eq!(controller.state(), SweepState::Failed);
        assert!(logs_contain("mid_sweep=true"));
        assert!(logs_contain("state=SweepingUp"));
        assert_eq!(drive.level().await, 0.0);
    }

    #[tokio::test]
    async fn controller_runs_once() {
        let (_drive, _gate, devices) = ohmic(1.0);
        let mut controller = SweepController::new(
            plan("1;2"),
            devices,
            Arc::new(HeadlessSurface::new()),
            CancelFlag::new(),
        );
        controller.run().await.unwrap();
        assert!(matches!(
            controller.run().await,
            Err(DaqError::Configuration(_))
        ));
    }
}
