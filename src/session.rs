//! One acquisition session.
//!
//! A session runs the sweep controller and the periodic redraw loop as two tasks sharing a
//! cancellation flag, then persists whatever was measured. The controller task owns all
//! acquisition state; the redraw task only touches the plot surface.
//!
//! ```text
//! Session::run
//!   ├── spawn_redraw ────────── redraw_all() every display.redraw_interval
//!   ├── spawn controller ────── SweepController::run
//!   ├── await controller, set flag "acquisition finished"
//!   ├── await redraw
//!   └── export (output.save)
//! ```

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::data::export::{ExportPaths, RunExporter};
use crate::error::AppResult;
use crate::hardware::registry::DeviceSet;
use crate::plot::redraw::spawn_redraw;
use crate::plot::PlotSurface;
use crate::sweep::buffers::RunContext;
use crate::sweep::{CancelFlag, RunOutcome, SweepController, SweepPlan};

/// Result of a session.
#[derive(Debug)]
pub struct SessionReport {
    /// How the sweep ended
    pub outcome: AppResult<RunOutcome>,
    /// Everything measured up to the end
    pub context: RunContext,
    /// Export result, `None` when saving is disabled
    pub export: Option<AppResult<ExportPaths>>,
}

impl SessionReport {
    /// Outcome label used in the manifest
    pub fn outcome_label(&self) -> &'static str {
        outcome_label(&self.outcome)
    }
}

fn outcome_label(outcome: &AppResult<RunOutcome>) -> &'static str {
    match outcome {
        Ok(RunOutcome::Completed) => "completed",
        Ok(RunOutcome::Cancelled) => "cancelled",
        Err(_) => "failed",
    }
}

/// Configured acquisition, ready to run.
pub struct Session {
    config: RunConfig,
    plan: SweepPlan,
    devices: DeviceSet,
    surface: Arc<dyn PlotSurface>,
    cancel: CancelFlag,
}

impl Session {
    /// Build the sweep plan; fails on an invalid configuration before any instrument is touched.
    pub fn new(
        config: RunConfig,
        devices: DeviceSet,
        surface: Arc<dyn PlotSurface>,
        cancel: CancelFlag,
    ) -> AppResult<Self> {
        let plan = SweepPlan::from_config(&config)?;
        Ok(Self {
            config,
            plan,
            devices,
            surface,
            cancel,
        })
    }

    /// The derived plan
    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Flag that stops this session
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run acquisition and redraw concurrently, then export.
    ///
    /// Only a panicked task is returned as `Err`; sweep failures are reported in
    /// `SessionReport::outcome` so the partial results can still be saved.
    pub async fn run(self) -> AppResult<SessionReport> {
        let Self {
            config,
            plan,
            devices,
            surface,
            cancel,
        } = self;

        let redraw = spawn_redraw(
            Arc::clone(&surface),
            cancel.clone(),
            config.display.redraw_interval,
        );
        let mut controller = SweepController::new(plan.clone(), devices, surface, cancel.clone());
        let acquisition = tokio::spawn(async move {
            let outcome = controller.run().await;
            (controller, outcome)
        });

        let joined = acquisition.await;
        cancel.cancel("acquisition finished");
        redraw.await?;
        let (controller, outcome) = joined?;
        let context = controller.into_context();

        if let Err(err) = &outcome {
            if err.is_instrument_failure() {
                error!(error = %err, "Acquisition failed on an instrument, sources were zeroed");
            } else {
                error!(error = %err, "Acquisition failed");
            }
        }

        let export = if config.output.save {
            let label = outcome_label(&outcome);
            let message = outcome.as_ref().err().map(|e| e.to_string());
            let result = RunExporter::from_config(&config).export(
                &config, &plan, &context, label, message,
            );
            if let Err(err) = &result {
                warn!(error = %err, "Failed to save results");
            }
            Some(result)
        } else {
            info!("Saving disabled, results discarded");
            None
        };

        Ok(SessionReport {
            outcome,
            context,
            export,
        })
    }
}
