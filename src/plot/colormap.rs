//! Colormaps for the voltage and resistance maps.

use crate::plot::{Grid, Panel};

/// Piecewise-linear colormap through fixed RGB stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    /// Dark blue through green to yellow (voltage maps)
    Viridis,
    /// Black through red and orange to pale yellow (resistance maps)
    Inferno,
}

const VIRIDIS: [[u8; 3]; 5] = [
    [68, 1, 84],
    [59, 82, 139],
    [33, 145, 140],
    [94, 201, 98],
    [253, 231, 37],
];

const INFERNO: [[u8; 3]; 5] = [
    [0, 0, 4],
    [87, 16, 110],
    [188, 55, 84],
    [249, 142, 9],
    [252, 255, 164],
];

impl Colormap {
    /// Inferno for resistance panels, Viridis for everything else
    pub fn for_panel(panel: Panel) -> Self {
        if panel.is_resistance() {
            Colormap::Inferno
        } else {
            Colormap::Viridis
        }
    }

    fn stops(&self) -> &'static [[u8; 3]] {
        match self {
            Colormap::Viridis => &VIRIDIS,
            Colormap::Inferno => &INFERNO,
        }
    }

    /// Color of `t` in [0, 1]; values outside are clamped, NaN maps to the lowest color.
    pub fn color(&self, t: f64) -> [u8; 3] {
        let stops = self.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let position = t * (stops.len() - 1) as f64;
        let lo = (position.floor() as usize).min(stops.len() - 2);
        let frac = position - lo as f64;
        let mut rgb = [0u8; 3];
        for (c, channel) in rgb.iter_mut().enumerate() {
            let a = f64::from(stops[lo][c]);
            let b = f64::from(stops[lo + 1][c]);
            *channel = (a + (b - a) * frac).round() as u8;
        }
        rgb
    }

    /// RGBA pixels of a grid, first image row = last grid row (highest current on top).
    pub fn render(&self, grid: &Grid) -> Vec<u8> {
        let (lo, hi) = grid.range().unwrap_or((0.0, 0.0));
        let span = hi - lo;
        let mut pixels = Vec::with_capacity(grid.values.len() * grid.x.len() * 4);
        for row in grid.values.iter().rev() {
            for value in row {
                let t = if span > 0.0 { (value - lo) / span } else { 0.0 };
                let [r, g, b] = self.color(t);
                pixels.extend_from_slice(&[r, g, b, 255]);
            }
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_and_clamping() {
        assert_eq!(Colormap::Viridis.color(0.0), VIRIDIS[0]);
        assert_eq!(Colormap::Viridis.color(1.0), VIRIDIS[4]);
        assert_eq!(Colormap::Inferno.color(2.0), INFERNO[4]);
        assert_eq!(Colormap::Inferno.color(-1.0), INFERNO[0]);
        assert_eq!(Colormap::Inferno.color(f64::NAN), INFERNO[0]);
        assert_eq!(Colormap::Viridis.color(0.25), VIRIDIS[1]);
    }

    #[test]
    fn resistance_panels_use_inferno() {
        assert_eq!(Colormap::for_panel(Panel::CriticalResistanceMap), Colormap::Inferno);
        assert_eq!(Colormap::for_panel(Panel::RetrappingResistanceSurface), Colormap::Inferno);
        assert_eq!(Colormap::for_panel(Panel::CriticalVoltageMap), Colormap::Viridis);
    }

    #[test]
    fn render_flips_rows() {
        let grid = Grid {
            x: vec![0.0, 1.0],
            y: vec![-1.0, 1.0],
            values: vec![vec![0.0, 0.0], vec![1.0, 1.0]],
        };
        let pixels = Colormap::Viridis.render(&grid);
        assert_eq!(pixels.len(), 16);
        // top-left pixel is the highest row
        assert_eq!(&pixels[0..3], &VIRIDIS[4]);
        assert_eq!(&pixels[8..11], &VIRIDIS[0]);
        assert_eq!(pixels[3], 255);
    }
}
