//! Visualization surface.
//!
//! The controller pushes owned copies of everything it wants displayed through `PlotSurface`.
//! Implementations keep the latest data per panel behind a reader/writer lock, so a reader sees
//! either the previous or the new value of a panel, never a partial one.
//!
//! # Panels
//!
//! | Panel | Content |
//! |-------|---------|
//! | V crit / V retr maps | branch voltages over (gate, current) |
//! | I-V | trace of the current gate step, caption shows the live resistance |
//! | V crit / V retr 3D | branch voltages as a line family per gate value |
//! | R crit / R retr maps | differential resistance over (gate, current) |
//! | R crit / R retr 3D | differential resistance as a line family |
//! | Ic vs gate | positive and negative switching currents |
//! | R vs gate | windowed resistance per gate step |

pub mod colormap;
pub mod redraw;
#[cfg(feature = "gui")]
pub mod viewer;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Panels of the measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Panel {
    /// Critical-branch voltage map
    CriticalVoltageMap,
    /// Retrapping-branch voltage map
    RetrappingVoltageMap,
    /// I-V trace of the current gate step
    IvCurve,
    /// Critical-branch voltage surface
    CriticalVoltageSurface,
    /// Retrapping-branch voltage surface
    RetrappingVoltageSurface,
    /// Critical-branch resistance map
    CriticalResistanceMap,
    /// Retrapping-branch resistance map
    RetrappingResistanceMap,
    /// Critical-branch resistance surface
    CriticalResistanceSurface,
    /// Retrapping-branch resistance surface
    RetrappingResistanceSurface,
    /// Switching currents against gate
    CriticalCurrentVsGate,
    /// Windowed resistance against gate
    ResistanceVsGate,
}

impl Panel {
    /// Every panel in window order
    pub const ALL: [Panel; 11] = [
        Panel::CriticalVoltageMap,
        Panel::RetrappingVoltageMap,
        Panel::IvCurve,
        Panel::CriticalVoltageSurface,
        Panel::RetrappingVoltageSurface,
        Panel::CriticalResistanceMap,
        Panel::RetrappingResistanceMap,
        Panel::CriticalResistanceSurface,
        Panel::RetrappingResistanceSurface,
        Panel::CriticalCurrentVsGate,
        Panel::ResistanceVsGate,
    ];

    /// Tab title
    pub fn title(&self) -> &'static str {
        match self {
            Panel::CriticalVoltageMap => "V crit",
            Panel::RetrappingVoltageMap => "V retr",
            Panel::IvCurve => "I-V",
            Panel::CriticalVoltageSurface => "V crit 3D",
            Panel::RetrappingVoltageSurface => "V retr 3D",
            Panel::CriticalResistanceMap => "R crit",
            Panel::RetrappingResistanceMap => "R retr",
            Panel::CriticalResistanceSurface => "R crit 3D",
            Panel::RetrappingResistanceSurface => "R retr 3D",
            Panel::CriticalCurrentVsGate => "Ic(Vg)",
            Panel::ResistanceVsGate => "R(Vg)",
        }
    }

    /// Whether the panel shows resistance (colored with the resistance colormap)
    pub fn is_resistance(&self) -> bool {
        matches!(
            self,
            Panel::CriticalResistanceMap
                | Panel::RetrappingResistanceMap
                | Panel::CriticalResistanceSurface
                | Panel::RetrappingResistanceSurface
        )
    }
}

/// SI prefix for a display scale factor (1e-6 -> "µ").
pub fn unit_prefix(scale: f64) -> &'static str {
    const PREFIXES: [(f64, &str); 9] = [
        (1e-12, "p"),
        (1e-9, "n"),
        (1e-6, "µ"),
        (1e-3, "m"),
        (1.0, ""),
        (1e3, "k"),
        (1e6, "M"),
        (1e9, "G"),
        (1e12, "T"),
    ];
    PREFIXES
        .iter()
        .find(|(value, _)| (scale / value - 1.0).abs() < 1e-9)
        .map(|(_, prefix)| *prefix)
        .unwrap_or("")
}

/// Axis labels in display units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitLabels {
    /// e.g. "µA"
    pub current: String,
    /// e.g. "µV"
    pub voltage: String,
    /// e.g. "Ω"
    pub resistance: String,
}

impl Default for UnitLabels {
    fn default() -> Self {
        Self::from_scales(1.0, 1.0, 1.0)
    }
}

impl UnitLabels {
    /// Labels for the given display scale factors
    pub fn from_scales(current: f64, voltage: f64, resistance: f64) -> Self {
        Self {
            current: format!("{}A", unit_prefix(current)),
            voltage: format!("{}V", unit_prefix(voltage)),
            resistance: format!("{}Ω", unit_prefix(resistance)),
        }
    }
}

/// One named line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    /// Legend entry
    pub label: String,
    /// (x, y) points
    pub points: Vec<[f64; 2]>,
}

impl LineSeries {
    /// Line from parallel x and y slices
    pub fn from_xy(label: impl Into<String>, x: &[f64], y: &[f64]) -> Self {
        Self {
            label: label.into(),
            points: x.iter().zip(y).map(|(x, y)| [*x, *y]).collect(),
        }
    }
}

/// Values on a rectangular grid: `values[row][col]` sits at `(x[col], y[row])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Column coordinates (gate)
    pub x: Vec<f64>,
    /// Row coordinates (current)
    pub y: Vec<f64>,
    /// Row-major values
    pub values: Vec<Vec<f64>>,
}

impl Grid {
    /// Smallest and largest finite value
    pub fn range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .flatten()
            .filter(|v| v.is_finite())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Latest content of a panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PanelData {
    /// Nothing pushed yet
    #[default]
    Empty,
    /// Line plot
    Lines(Vec<LineSeries>),
    /// Colormap
    Mesh(Grid),
    /// 3D surface
    Surface(Grid),
}

/// Content and caption of a panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelState {
    /// Data to render
    pub data: PanelData,
    /// Caption shown above the panel
    pub caption: Option<String>,
}

/// Everything the renderer needs.
#[derive(Debug, Clone)]
pub struct PlotState {
    /// Per-panel content
    pub panels: HashMap<Panel, PanelState>,
    /// Panel redrawn by `redraw(None)`
    pub active: Panel,
    /// Axis labels
    pub units: UnitLabels,
    /// Bumped on every redraw request
    pub revision: u64,
}

impl Default for PlotState {
    fn default() -> Self {
        Self {
            panels: HashMap::new(),
            active: Panel::IvCurve,
            units: UnitLabels::default(),
            revision: 0,
        }
    }
}

impl PlotState {
    /// Panel content, empty if nothing was pushed
    pub fn panel(&self, panel: Panel) -> PanelState {
        self.panels.get(&panel).cloned().unwrap_or_default()
    }
}

/// Plot state shared between the acquisition side and a renderer.
pub type SharedPlotState = Arc<RwLock<PlotState>>;

/// Push-only visualization interface used by the controller.
pub trait PlotSurface: Send + Sync {
    /// Replace the lines of `panel` with a single line
    fn set_line(&self, panel: Panel, line: LineSeries) {
        self.set_lines(panel, vec![line]);
    }

    /// Replace the lines of `panel`
    fn set_lines(&self, panel: Panel, lines: Vec<LineSeries>);

    /// Replace the colormap of `panel`
    fn set_mesh(&self, panel: Panel, grid: Grid);

    /// Replace the surface of `panel`
    fn set_surface(&self, panel: Panel, grid: Grid);

    /// Set the caption of `panel`
    fn set_caption(&self, panel: Panel, caption: String);

    /// Redraw one panel, or the active one for `None`
    fn redraw(&self, panel: Option<Panel>);

    /// Redraw every panel
    fn redraw_all(&self);
}

/// Surface that only keeps state; renderers (or tests) read it through `state()`.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    state: SharedPlotState,
    redraws: AtomicU64,
}

impl HeadlessSurface {
    /// Empty surface
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty surface with axis labels
    pub fn with_units(units: UnitLabels) -> Self {
        let surface = Self::default();
        surface.write(|state| state.units = units);
        surface
    }

    /// Handle to the shared state
    pub fn state(&self) -> SharedPlotState {
        Arc::clone(&self.state)
    }

    /// Copy of one panel
    pub fn panel(&self, panel: Panel) -> PanelState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .panel(panel)
    }

    /// Redraw requests so far
    pub fn redraw_count(&self) -> u64 {
        self.redraws.load(Ordering::SeqCst)
    }

    fn write(&self, update: impl FnOnce(&mut PlotState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut state);
    }

    fn set_data(&self, panel: Panel, data: PanelData) {
        self.write(|state| state.panels.entry(panel).or_default().data = data);
    }
}

impl PlotSurface for HeadlessSurface {
    fn set_lines(&self, panel: Panel, lines: Vec<LineSeries>) {
        self.set_data(panel, PanelData::Lines(lines));
    }

    fn set_mesh(&self, panel: Panel, grid: Grid) {
        self.set_data(panel, PanelData::Mesh(grid));
    }

    fn set_surface(&self, panel: Panel, grid: Grid) {
        self.set_data(panel, PanelData::Surface(grid));
    }

    fn set_caption(&self, panel: Panel, caption: String) {
        self.write(|state| state.panels.entry(panel).or_default().caption = Some(caption));
    }

    fn redraw(&self, panel: Option<Panel>) {
        self.redraws.fetch_add(1, Ordering::SeqCst);
        self.write(|state| {
            if let Some(panel) = panel {
                state.active = panel;
            }
            state.revision += 1;
            trace!(panel = ?state.active, revision = state.revision, "redraw");
        });
    }

    fn redraw_all(&self) {
        self.redraws.fetch_add(1, Ordering::SeqCst);
        self.write(|state| state.revision += 1);
    }
}
