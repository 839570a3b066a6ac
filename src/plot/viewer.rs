//! Native measurement window (eframe/egui).
//!
//! Renders the shared `PlotState` in dockable tabs, one per `Panel`. Maps are colormapped
//! textures, 3D surfaces are drawn as one line per gate value. Closing the window sets the
//! cancellation flag, which stops a running acquisition.

use egui_dock::{DockArea, DockState, Style, TabViewer};
use egui_plot::{Legend, Line, Plot, PlotImage, PlotPoint, PlotPoints};
use std::collections::HashMap;
use std::sync::PoisonError;
use std::time::Duration;

use crate::error::{AppResult, DaqError};
use crate::plot::colormap::Colormap;
use crate::plot::{Grid, LineSeries, Panel, PanelData, PlotState, SharedPlotState, UnitLabels};
use crate::sweep::cancel::CancelFlag;

const REPAINT_INTERVAL: Duration = Duration::from_millis(250);

struct CachedTexture {
    revision: u64,
    handle: egui::TextureHandle,
}

/// The measurement window.
pub struct MeasurementWindow {
    state: SharedPlotState,
    cancel: CancelFlag,
    dock_state: DockState<Panel>,
    textures: HashMap<Panel, CachedTexture>,
}

impl MeasurementWindow {
    /// Creates the window with every panel as a tab.
    pub fn new(_cc: &eframe::CreationContext<'_>, state: SharedPlotState, cancel: CancelFlag) -> Self {
        let mut dock_state = DockState::new(vec![Panel::IvCurve]);
        for panel in Panel::ALL.into_iter().filter(|p| *p != Panel::IvCurve) {
            dock_state.push_to_focused_leaf(panel);
        }
        Self {
            state,
            cancel,
            dock_state,
            textures: HashMap::new(),
        }
    }
}

impl eframe::App for MeasurementWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let snapshot = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("I-V gate sweep");
                ui.separator();
                if self.cancel.is_set() {
                    ui.label("Acquisition stopped");
                } else {
                    ui.label(format!("Active: {}", snapshot.active.title()));
                    if ui.button("Stop").clicked() {
                        self.cancel.cancel("stop requested from measurement window");
                    }
                }
            });
        });

        let mut viewer = PanelViewer {
            state: &snapshot,
            textures: &mut self.textures,
        };
        egui::CentralPanel::default().show(ctx, |ui| {
            DockArea::new(&mut self.dock_state)
                .style(Style::from_egui(ctx.style().as_ref()))
                .show_inside(ui, &mut viewer);
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

struct PanelViewer<'a> {
    state: &'a PlotState,
    textures: &'a mut HashMap<Panel, CachedTexture>,
}

impl TabViewer for PanelViewer<'_> {
    type Tab = Panel;

    fn title(&mut self, tab: &mut Self::Tab) -> egui::WidgetText {
        tab.title().into()
    }

    fn ui(&mut self, ui: &mut egui::Ui, tab: &mut Self::Tab) {
        let panel = *tab;
        let content = self.state.panel(panel);
        if let Some(caption) = &content.caption {
            ui.label(caption);
        }
        let units = &self.state.units;
        match &content.data {
            PanelData::Empty => {
                ui.label("Waiting for data...");
            }
            PanelData::Lines(lines) => line_plot(ui, panel, lines, units),
            PanelData::Mesh(grid) => {
                let texture = self.texture(ui.ctx(), panel, grid);
                mesh_plot(ui, panel, grid, texture, units);
            }
            PanelData::Surface(grid) => surface_plot(ui, panel, grid, units),
        }
    }
}

impl PanelViewer<'_> {
    fn texture(&mut self, ctx: &egui::Context, panel: Panel, grid: &Grid) -> Option<egui::TextureId> {
        let size = [grid.x.len(), grid.y.len()];
        if size[0] == 0 || size[1] == 0 {
            return None;
        }
        let revision = self.state.revision;
        let stale = self
            .textures
            .get(&panel)
            .map_or(true, |cached| cached.revision != revision);
        if stale {
            let pixels = Colormap::for_panel(panel).render(grid);
            let image = egui::ColorImage::from_rgba_unmultiplied(size, &pixels);
            let handle = ctx.load_texture(panel.title(), image, egui::TextureOptions::NEAREST);
            self.textures
                .insert(panel, CachedTexture { revision, handle });
        }
        self.textures.get(&panel).map(|cached| cached.handle.id())
    }
}

fn axis_labels(panel: Panel, units: &UnitLabels) -> (String, String) {
    match panel {
        Panel::IvCurve => (format!("I, {}", units.current), format!("V, {}", units.voltage)),
        Panel::CriticalCurrentVsGate => ("Vg".to_string(), format!("Ic, {}", units.current)),
        Panel::ResistanceVsGate => ("Vg".to_string(), format!("R, {}", units.resistance)),
        _ => ("Vg".to_string(), format!("I, {}", units.current)),
    }
}

fn line_plot(ui: &mut egui::Ui, panel: Panel, lines: &[LineSeries], units: &UnitLabels) {
    let (x_label, y_label) = axis_labels(panel, units);
    Plot::new(panel.title())
        .legend(Legend::default())
        .x_axis_label(x_label)
        .y_axis_label(y_label)
        .show(ui, |plot_ui| {
            for series in lines {
                let line = Line::new(PlotPoints::from_iter(series.points.iter().copied()))
                    .name(&series.label);
                plot_ui.line(line);
            }
        });
}

fn mesh_plot(
    ui: &mut egui::Ui,
    panel: Panel,
    grid: &Grid,
    texture: Option<egui::TextureId>,
    units: &UnitLabels,
) {
    let Some(texture) = texture else {
        ui.label("Waiting for data...");
        return;
    };
    let span = |values: &[f64]| {
        let lo = values.first().copied().unwrap_or(0.0);
        let hi = values.last().copied().unwrap_or(0.0);
        (lo, hi)
    };
    let (x0, x1) = span(&grid.x);
    let (y0, y1) = span(&grid.y);
    let center = PlotPoint::new((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    let size = egui::vec2(
        ((x1 - x0).abs() as f32).max(f32::EPSILON),
        ((y1 - y0).abs() as f32).max(f32::EPSILON),
    );

    let (x_label, y_label) = axis_labels(panel, units);
    Plot::new(panel.title())
        .x_axis_label(x_label)
        .y_axis_label(y_label)
        .show(ui, |plot_ui| {
            plot_ui.image(PlotImage::new(texture, center, size));
        });
}

fn surface_plot(ui: &mut egui::Ui, panel: Panel, grid: &Grid, units: &UnitLabels) {
    let value_unit = if panel.is_resistance() {
        &units.resistance
    } else {
        &units.voltage
    };
    Plot::new(panel.title())
        .legend(Legend::default())
        .x_axis_label(format!("I, {}", units.current))
        .y_axis_label(value_unit.clone())
        .show(ui, |plot_ui| {
            for (col, gate) in grid.x.iter().enumerate() {
                let points = grid
                    .y
                    .iter()
                    .zip(&grid.values)
                    .filter_map(|(current, row)| row.get(col).map(|v| [*current, *v]));
                plot_ui.line(Line::new(PlotPoints::from_iter(points)).name(format!("Vg = {gate}")));
            }
        });
}

/// Open the window and block until it is closed, then set the cancellation flag.
///
/// Must be called from the main thread.
pub fn run_viewer(state: SharedPlotState, cancel: CancelFlag) -> AppResult<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title("I-V gate sweep"),
        ..Default::default()
    };

    let window_cancel = cancel.clone();
    let result = eframe::run_native(
        "I-V gate sweep",
        options,
        Box::new(move |cc| Ok(Box::new(MeasurementWindow::new(cc, state, window_cancel)))),
    );
    cancel.cancel("measurement window closed");
    result.map_err(|e| DaqError::Gui(e.to_string()))
}
