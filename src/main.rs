//! CLI Entry Point for iv-gate
//!
//! Provides a command-line interface for:
//! - Running a gate sweep (headless, or with the native measurement window)
//! - Printing the derived sweep plan without touching any instrument
//!
//! # Usage
//!
//! Run with the default configuration file (`config/iv_gate.toml`):
//! ```bash
//! iv-gate run
//! ```
//!
//! Override the gate sweep and open the window:
//! ```bash
//! iv-gate --gate "5;21" --gui run
//! ```
//!
//! Inspect the plan:
//! ```bash
//! iv-gate plan --drive-step 0.005
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use figment::providers::Serialized;
use iv_gate::config::{RunConfig, DEFAULT_CONFIG_PATH};
use iv_gate::error::DaqError;
use iv_gate::hardware::registry;
use iv_gate::logging;
use iv_gate::plot::{HeadlessSurface, SharedPlotState, UnitLabels};
use iv_gate::session::{Session, SessionReport};
use iv_gate::sweep::timing::format_duration;
use iv_gate::sweep::{CancelFlag, RunOutcome, SweepPlan};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "iv-gate")]
#[command(about = "Gate-dependent I-V sweeps with online resistance and critical-current analysis", long_about = None)]
struct Cli {
    /// Configuration file (optional; defaults and environment still apply)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Command-line overrides, merged above the file and the environment
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Gate sweep as "amplitude;points"
    #[arg(long, global = true)]
    gate: Option<String>,

    /// Drive source amplitude
    #[arg(long, global = true)]
    drive_range: Option<f64>,

    /// Drive source step
    #[arg(long, global = true)]
    drive_step: Option<f64>,

    /// Output root directory
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// File name prefix
    #[arg(long, global = true)]
    caption: Option<String>,

    /// Do not write results
    #[arg(long, global = true)]
    no_save: bool,

    /// Open the measurement window
    #[arg(long, global = true)]
    gui: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gate sweep
    Run,

    /// Print the sweep plan and the effective configuration, then exit
    Plan,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli.config, &cli.overrides)?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Plan => {
            print_plan(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run => acquire(config),
    }
}

fn load_config(path: &Path, overrides: &Overrides) -> Result<RunConfig> {
    let mut figment = RunConfig::figment(path);
    if let Some(gate) = &overrides.gate {
        figment = figment.merge(Serialized::default("sweep.gate", gate));
    }
    if let Some(range) = overrides.drive_range {
        figment = figment.merge(Serialized::default("sweep.drive_range", range));
    }
    if let Some(step) = overrides.drive_step {
        figment = figment.merge(Serialized::default("sweep.drive_step", step));
    }
    if let Some(dir) = &overrides.output_dir {
        figment = figment.merge(Serialized::default("output.dir", dir));
    }
    if let Some(caption) = &overrides.caption {
        figment = figment.merge(Serialized::default("output.caption", caption));
    }
    if overrides.no_save {
        figment = figment.merge(Serialized::default("output.save", false));
    }
    if overrides.gui {
        figment = figment.merge(Serialized::default("display.gui", true));
    }
    if let Some(level) = &overrides.log_level {
        figment = figment.merge(Serialized::default("logging.level", level));
    }

    let config: RunConfig = figment.extract().map_err(DaqError::from)?;
    config.validate()?;
    Ok(config)
}

fn print_plan(config: &RunConfig) -> Result<()> {
    let plan = SweepPlan::from_config(config)?;
    println!("📐 Sweep plan");
    println!(
        "   Drive: ±{} in {} steps per leg, {} points per gate step",
        plan.drive.max(),
        plan.drive.half(),
        plan.points_per_step()
    );
    println!(
        "   Gate: amplitude {} with {} points {:?}",
        plan.gate.amplitude, plan.gate.points, plan.gate_values
    );
    println!(
        "   Resistance window: [{}, {}] (drive units)",
        plan.window.lower, plan.window.upper
    );
    println!(
        "   Total points: {}, at least {} in settle delays",
        plan.total_points(),
        format_duration(plan.minimum_duration())
    );
    println!();
    println!("⚙️  Effective configuration");
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn acquire(config: RunConfig) -> Result<ExitCode> {
    if config.display.gui && !cfg!(feature = "gui") {
        return Err(DaqError::FeatureNotEnabled("gui".to_string()).into());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let cancel = CancelFlag::new();
    let surface = Arc::new(HeadlessSurface::with_units(UnitLabels::from_scales(
        config.sweep.current_scale,
        config.sweep.voltage_scale,
        config.sweep.resistance_scale,
    )));
    let devices = runtime.block_on(registry::connect(&config.devices, &config.sweep))?;
    let session = Session::new(config.clone(), devices, surface.clone(), cancel.clone())?;

    let interrupt = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current point");
            interrupt.cancel("interrupted");
        }
    });

    println!(
        "▶️  Sweeping {} gate values, {} points each",
        session.plan().gate_steps(),
        session.plan().points_per_step()
    );
    let report = if config.display.gui {
        run_with_window(&runtime, session, surface.state(), cancel)?
    } else {
        runtime.block_on(session.run())?
    };
    Ok(summarize(&report))
}

#[cfg(feature = "gui")]
fn run_with_window(
    runtime: &tokio::runtime::Runtime,
    session: Session,
    state: SharedPlotState,
    cancel: CancelFlag,
) -> Result<SessionReport> {
    let task = runtime.spawn(session.run());
    // blocks the main thread until the window closes, which also cancels the sweep
    let window = iv_gate::plot::viewer::run_viewer(state, cancel);
    let report = runtime.block_on(task)??;
    window?;
    Ok(report)
}

#[cfg(not(feature = "gui"))]
fn run_with_window(
    _runtime: &tokio::runtime::Runtime,
    _session: Session,
    _state: SharedPlotState,
    _cancel: CancelFlag,
) -> Result<SessionReport> {
    Err(DaqError::FeatureNotEnabled("gui".to_string()).into())
}

fn summarize(report: &SessionReport) -> ExitCode {
    println!();
    let mut code = ExitCode::SUCCESS;
    match &report.outcome {
        Ok(RunOutcome::Completed) => println!("✅ Sweep completed"),
        Ok(RunOutcome::Cancelled) => println!("⏹️  Sweep cancelled"),
        Err(e) => {
            eprintln!("❌ Sweep failed: {e}");
            code = ExitCode::FAILURE;
        }
    }
    println!(
        "   Gate steps measured: {}",
        report.context.completed_steps()
    );

    match &report.export {
        Some(Ok(paths)) => {
            println!("💾 Results saved to {}", paths.dir.display());
            for file in &paths.files {
                println!("   {}", file.display());
            }
        }
        Some(Err(e)) => {
            eprintln!("❌ Saving failed: {e}");
            code = ExitCode::FAILURE;
        }
        None => println!("   Saving disabled"),
    }
    code
}
