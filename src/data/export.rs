//! End-of-run persistence.
//!
//! Results go into a dated subdirectory of the output directory. Every file of one run shares the
//! stamp `<HH-MM-SS>-<run>`, where `<run>` is the first eight hex digits of the run id:
//!
//! ```text
//! <dir>/<YYYY-MM-DD>/<caption>_<stamp>.csv                 full trace
//! <dir>/<YYYY-MM-DD>/<caption>_Ic_<stamp>.csv              switching currents per gate step
//! <dir>/<YYYY-MM-DD>/<caption>_R_<stamp>.csv               windowed resistance per gate step
//! <dir>/<YYYY-MM-DD>/<caption>_matrix_crit_<stamp>.csv     Critical-branch voltages
//! <dir>/<YYYY-MM-DD>/<caption>_matrix_retr_<stamp>.csv     Retrapping-branch voltages
//! <dir>/<YYYY-MM-DD>/<caption>_map_V_crit_<stamp>.png      rendered map panels
//! <dir>/<YYYY-MM-DD>/<caption>_map_V_retr_<stamp>.png
//! <dir>/<YYYY-MM-DD>/<caption>_map_R_crit_<stamp>.png
//! <dir>/<YYYY-MM-DD>/<caption>_map_R_retr_<stamp>.png
//! <dir>/<YYYY-MM-DD>/<caption>_<stamp>.json                run manifest
//! ```
//!
//! CSV output requires the `storage_csv` feature and the map images `storage_png`; the manifest
//! is always written.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
#[cfg(any(feature = "storage_csv", feature = "storage_png"))]
use tracing::info;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::AppResult;
#[cfg(not(feature = "storage_csv"))]
use crate::error::DaqError;
#[cfg(feature = "storage_csv")]
use crate::plot::unit_prefix;
use crate::sweep::buffers::RunContext;
use crate::sweep::plan::SweepPlan;

/// Summary written next to the CSV files.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Start of acquisition
    pub started_at: DateTime<Utc>,
    /// Time of export
    pub finished_at: DateTime<Utc>,
    /// completed, cancelled or failed
    pub outcome: String,
    /// Error message of a failed run
    pub error: Option<String>,
    /// Planned gate steps
    pub gate_steps: usize,
    /// Gate steps analyzed
    pub completed_steps: usize,
    /// Points acquired
    pub points: usize,
    /// Effective configuration
    pub config: RunConfig,
}

/// Files produced by one export.
#[derive(Debug, Clone, Default)]
pub struct ExportPaths {
    /// Dated output directory
    pub dir: PathBuf,
    /// Every written file
    pub files: Vec<PathBuf>,
}

/// Writes the results of a run.
#[derive(Debug, Clone)]
pub struct RunExporter {
    root: PathBuf,
    caption: String,
    timestamp: DateTime<Local>,
}

/// Names the files of one run inside the dated directory.
struct FileNames {
    dir: PathBuf,
    caption: String,
    stamp: String,
}

impl FileNames {
    fn path(&self, infix: Option<&str>, extension: &str) -> PathBuf {
        let name = match infix {
            Some(infix) => format!("{}_{}_{}.{}", self.caption, infix, self.stamp, extension),
            None => format!("{}_{}.{}", self.caption, self.stamp, extension),
        };
        self.dir.join(name)
    }
}

impl RunExporter {
    /// Exporter for `output.dir` and `output.caption`, stamped with the current local time
    pub fn new(root: impl Into<PathBuf>, caption: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            caption: caption.into(),
            timestamp: Local::now(),
        }
    }

    /// Exporter configured from a run configuration
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(&config.output.dir, &config.output.caption)
    }

    /// Dated directory receiving the files
    pub fn directory(&self) -> PathBuf {
        self.root.join(self.timestamp.format("%Y-%m-%d").to_string())
    }

    /// Stamp shared by every file of the run `run_id`
    pub fn stamp(&self, run_id: &Uuid) -> String {
        let run: String = run_id.simple().to_string().chars().take(8).collect();
        format!("{}-{}", self.timestamp.format("%H-%M-%S"), run)
    }

    /// Write the manifest, every CSV file and the map images.
    pub fn export(
        &self,
        config: &RunConfig,
        plan: &SweepPlan,
        context: &RunContext,
        outcome: &str,
        error: Option<String>,
    ) -> AppResult<ExportPaths> {
        let names = FileNames {
            dir: self.directory(),
            caption: self.caption.clone(),
            stamp: self.stamp(&context.run_id),
        };
        fs::create_dir_all(&names.dir)?;
        let mut paths = ExportPaths {
            dir: names.dir.clone(),
            files: Vec::new(),
        };

        let manifest = RunManifest {
            run_id: context.run_id,
            started_at: context.started_at,
            finished_at: Utc::now(),
            outcome: outcome.to_string(),
            error,
            gate_steps: plan.gate_steps(),
            completed_steps: context.completed_steps(),
            points: context.accumulators.len(),
            config: config.clone(),
        };
        let manifest_path = names.path(None, "json");
        serde_json::to_writer_pretty(BufWriter::new(File::create(&manifest_path)?), &manifest)?;
        paths.files.push(manifest_path);

        #[cfg(feature = "storage_png")]
        paths.files.extend(write_maps(&names, plan, context)?);

        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (plan, context);
            return Err(DaqError::FeatureNotEnabled("storage_csv".to_string()));
        }

        #[cfg(feature = "storage_csv")]
        {
            let units = Units::from_plan(plan);
            paths.files.push(write_trace(&names, context, &units)?);
            paths
                .files
                .push(write_critical_currents(&names, plan, context, &units)?);
            paths
                .files
                .push(write_resistance(&names, plan, context, &units)?);
            paths.files.push(write_matrix(
                &names,
                "matrix_crit",
                plan,
                context.critical.values(),
                &units,
            )?);
            paths.files.push(write_matrix(
                &names,
                "matrix_retr",
                plan,
                context.retrapping.values(),
                &units,
            )?);

            info!(dir = %names.dir.display(), files = paths.files.len(), "Results saved");
            Ok(paths)
        }
    }
}

/// Render the four map panels with their display colormaps, one pixel per cell.
#[cfg(feature = "storage_png")]
fn write_maps(
    names: &FileNames,
    plan: &SweepPlan,
    context: &RunContext,
) -> AppResult<Vec<PathBuf>> {
    use crate::plot::colormap::Colormap;
    use crate::plot::Panel;
    use image::error::{ParameterError, ParameterErrorKind};
    use image::{ImageError, ImageFormat, RgbaImage};

    let r_factor = 1.0 / plan.resistance_scale;
    let maps = [
        (Panel::CriticalVoltageMap, "map_V_crit", context.critical.values(), 1.0),
        (Panel::RetrappingVoltageMap, "map_V_retr", context.retrapping.values(), 1.0),
        (Panel::CriticalResistanceMap, "map_R_crit", &context.critical_resistance, r_factor),
        (Panel::RetrappingResistanceMap, "map_R_retr", &context.retrapping_resistance, r_factor),
    ];

    let mut files = Vec::with_capacity(maps.len());
    for (panel, infix, matrix, factor) in maps {
        let grid = plan.map_grid(matrix, factor);
        let width = u32::try_from(grid.x.len()).unwrap_or(u32::MAX);
        let height = u32::try_from(grid.values.len()).unwrap_or(u32::MAX);
        let pixels = Colormap::for_panel(panel).render(&grid);
        let image = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
            ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            ))
        })?;

        let path = names.path(Some(infix), "png");
        image.save_with_format(&path, ImageFormat::Png)?;
        files.push(path);
    }
    info!(
        count = files.len(),
        width = plan.gate_steps(),
        height = plan.drive.n_down(),
        "Map images written"
    );
    Ok(files)
}

#[cfg(feature = "storage_csv")]
struct Units {
    current: String,
    voltage: String,
    resistance: String,
    resistance_factor: f64,
}

#[cfg(feature = "storage_csv")]
impl Units {
    fn from_plan(plan: &SweepPlan) -> Self {
        Self {
            current: format!("current [{}A]", unit_prefix(plan.current_scale)),
            voltage: format!("voltage [{}V]", unit_prefix(plan.voltage_scale)),
            resistance: format!("resistance [{}Ω]", unit_prefix(plan.resistance_scale)),
            resistance_factor: 1.0 / plan.resistance_scale,
        }
    }
}

#[cfg(feature = "storage_csv")]
fn write_trace(names: &FileNames, context: &RunContext, units: &Units) -> AppResult<PathBuf> {
    let path = names.path(None, "csv");
    let acc = &context.accumulators;
    let index: Vec<f64> = (0..acc.len()).map(|i| i as f64).collect();
    let gradient = crate::sweep::resistance::full_gradient(&acc.voltage, &index, 1.0);

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record([
        "gate",
        units.current.as_str(),
        units.voltage.as_str(),
        "dV/dn",
    ])?;
    for i in 0..acc.len() {
        writer.write_record([
            acc.gate[i].to_string(),
            acc.current[i].to_string(),
            acc.voltage[i].to_string(),
            gradient[i].to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(feature = "storage_csv")]
fn write_critical_currents(
    names: &FileNames,
    plan: &SweepPlan,
    context: &RunContext,
    units: &Units,
) -> AppResult<PathBuf> {
    let path = names.path(Some("Ic"), "csv");
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record([
        "gate".to_string(),
        format!("ic_positive {}", units.current.trim_start_matches("current ")),
        format!("ic_negative {}", units.current.trim_start_matches("current ")),
    ])?;
    for (gate, ic) in plan.gate_values.iter().zip(&context.critical_currents) {
        writer.write_record([
            gate.to_string(),
            ic.positive.to_string(),
            ic.negative.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(feature = "storage_csv")]
fn write_resistance(
    names: &FileNames,
    plan: &SweepPlan,
    context: &RunContext,
    units: &Units,
) -> AppResult<PathBuf> {
    let path = names.path(Some("R"), "csv");
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["gate", units.resistance.as_str()])?;
    for (gate, r) in plan.gate_values.iter().zip(&context.resistance_summary) {
        writer.write_record([gate.to_string(), (r * units.resistance_factor).to_string()])?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(feature = "storage_csv")]
fn write_matrix(
    names: &FileNames,
    infix: &str,
    plan: &SweepPlan,
    matrix: &crate::sweep::buffers::Matrix,
    units: &Units,
) -> AppResult<PathBuf> {
    let path = names.path(Some(infix), "csv");
    let mut writer = csv::Writer::from_path(&path)?;

    let mut header = vec![units.current.clone()];
    header.extend(plan.gate_values.iter().map(|g| g.to_string()));
    writer.write_record(&header)?;

    for (row, current) in plan.row_currents.iter().enumerate().take(matrix.rows()) {
        let mut record = vec![current.to_string()];
        record.extend(matrix.row(row).iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(path)
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::sweep::critical::CriticalCurrents;
    use std::path::Path;

    fn plan() -> SweepPlan {
        let mut config = RunConfig::default();
        config.sweep.drive_range = 1.0;
        config.sweep.drive_step = 0.5;
        config.sweep.gate = "1;2".to_string();
        SweepPlan::from_config(&config).unwrap()
    }

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    fn with_extension<'a>(paths: &'a ExportPaths, extension: &str) -> Vec<&'a PathBuf> {
        paths
            .files
            .iter()
            .filter(|p| p.extension().unwrap() == extension)
            .collect()
    }

    #[test]
    fn writes_dated_directory_with_all_files() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = plan();
        let mut context = RunContext::new(plan.drive.n_down(), plan.gate_steps());
        context.accumulators.push(0.0, 0.0, -1.0);
        context.accumulators.push(50.0, 1.0, -1.0);
        context.resistance_summary.push(12.0);
        context.critical_currents.push(CriticalCurrents {
            positive: 25.0,
            negative: -25.0,
        });

        let exporter = RunExporter::new(tmp.path(), "Gate");
        let paths = exporter
            .export(&RunConfig::default(), &plan, &context, "cancelled", None)
            .unwrap();

        assert!(paths.dir.starts_with(tmp.path()));
        assert_eq!(with_extension(&paths, "csv").len(), 5);
        assert_eq!(with_extension(&paths, "json").len(), 1);
        assert!(paths.files.iter().all(|p| p.exists()));

        let stamp = exporter.stamp(&context.run_id);
        let names: Vec<String> = paths.files.iter().map(|p| file_name(p)).collect();
        assert!(names.iter().all(|n| n.contains(&stamp)), "{names:?}");
        assert!(names.iter().any(|n| n.starts_with("Gate_Ic_")));
        assert!(names.iter().any(|n| n.starts_with("Gate_R_")));
        assert!(names.iter().any(|n| n.starts_with("Gate_matrix_crit_")));
        assert!(names.iter().any(|n| n.starts_with("Gate_matrix_retr_")));

        // only completed steps are listed
        let r_file = paths.files.iter().find(|p| file_name(p).starts_with("Gate_R_"));
        let text = std::fs::read_to_string(r_file.unwrap()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("-1,12"));

        let manifest = with_extension(&paths, "json")[0];
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(manifest).unwrap()).unwrap();
        assert_eq!(json["outcome"], "cancelled");
        assert_eq!(json["completed_steps"], 1);
        assert_eq!(json["points"], 2);
    }

    #[test]
    fn matrix_has_current_column_and_gate_header() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = plan();
        let context = RunContext::new(plan.drive.n_down(), plan.gate_steps());
        let paths = RunExporter::new(tmp.path(), "Gate")
            .export(&RunConfig::default(), &plan, &context, "failed", Some("meter".into()))
            .unwrap();
        let matrix = paths
            .files
            .iter()
            .find(|p| file_name(p).starts_with("Gate_matrix_crit_"))
            .unwrap();
        let text = std::fs::read_to_string(matrix).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1 + plan.drive.n_down());
        assert_eq!(lines[0], "current [µA],-1,1");
    }

    #[test]
    fn back_to_back_runs_do_not_overwrite_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = plan();
        // one exporter, so both runs share the same second
        let exporter = RunExporter::new(tmp.path(), "Gate");

        let first = RunContext::new(plan.drive.n_down(), plan.gate_steps());
        let mut second = RunContext::new(plan.drive.n_down(), plan.gate_steps());
        second.resistance_summary.push(3.0);
        second.critical_currents.push(CriticalCurrents {
            positive: 1.0,
            negative: -1.0,
        });

        let a = exporter
            .export(&RunConfig::default(), &plan, &first, "completed", None)
            .unwrap();
        let b = exporter
            .export(&RunConfig::default(), &plan, &second, "completed", None)
            .unwrap();

        assert_eq!(a.dir, b.dir);
        for file in &a.files {
            assert!(!b.files.contains(file), "{} written twice", file.display());
        }
        let written = std::fs::read_dir(&a.dir).unwrap().count();
        assert_eq!(written, a.files.len() + b.files.len());

        // the first run's R file still lists no steps
        let r_file = a.files.iter().find(|p| file_name(p).starts_with("Gate_R_"));
        let text = std::fs::read_to_string(r_file.unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[cfg(feature = "storage_png")]
    #[test]
    fn map_images_have_one_pixel_per_cell() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = plan();
        let mut context = RunContext::new(plan.drive.n_down(), plan.gate_steps());
        // highest current at the second gate value is the largest voltage
        context.critical.write(plan.drive.n_down() - 1, 1, 5.0);

        let paths = RunExporter::new(tmp.path(), "Gate")
            .export(&RunConfig::default(), &plan, &context, "completed", None)
            .unwrap();

        let images = with_extension(&paths, "png");
        assert_eq!(images.len(), 4);
        for infix in ["map_V_crit", "map_V_retr", "map_R_crit", "map_R_retr"] {
            let prefix = format!("Gate_{infix}_");
            let image = images
                .iter()
                .find(|p| file_name(p).starts_with(&prefix))
                .unwrap();
            assert!(image.exists());
            let dimensions = image::image_dimensions(image).unwrap();
            assert_eq!(
                dimensions,
                (plan.gate_steps() as u32, plan.drive.n_down() as u32),
                "{infix}"
            );
        }

        // top row of the image is the highest current
        let crit = images
            .iter()
            .find(|p| file_name(p).starts_with("Gate_map_V_crit_"))
            .unwrap();
        let pixels = image::open(crit).unwrap().to_rgba8();
        let top_right = pixels.get_pixel(1, 0).0;
        let top_left = pixels.get_pixel(0, 0).0;
        assert_eq!(top_right, [253, 231, 37, 255]);
        assert_eq!(top_left, [68, 1, 84, 255]);
    }
}
