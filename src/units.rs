//! Physical-unit coordinate model.
//!
//! All geometry in the editor lives in source-raster pixels.  Centimetres only
//! appear at the edges (grid spacing, keyboard step, ruler, guide lines), and
//! every conversion goes through a single DPI scalar.

use crate::settings::{SettingError, check_positive};

pub const DEFAULT_DPI: f64 = 300.0;
const CM_PER_INCH: f64 = 2.54;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateModel {
    dpi: f64,
}

impl Default for CoordinateModel {
    fn default() -> Self {
        Self { dpi: DEFAULT_DPI }
    }
}

/// Result of a ruler measurement between two raster points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub pixels: f64,
    pub centimeters: f64,
}

impl CoordinateModel {
    pub fn new(dpi: f64) -> Self {
        if dpi.is_finite() && dpi > 0.0 {
            Self { dpi }
        } else {
            Self::default()
        }
    }

    pub fn dpi(&self) -> f64 {
        self.dpi
    }

    /// Replace the DPI.  Non-finite or non-positive values are rejected and
    /// the previous DPI stays in effect.
    pub fn set_dpi(&mut self, dpi: f64) -> Result<(), SettingError> {
        self.dpi = check_positive("dpi", dpi)?;
        Ok(())
    }

    pub fn pixels_to_unit(&self, pixels: f64) -> f64 {
        (pixels / self.dpi) * CM_PER_INCH
    }

    pub fn unit_to_pixels(&self, cm: f64) -> f64 {
        (cm / CM_PER_INCH) * self.dpi
    }

    pub fn grid_spacing_px(&self, grid_size_cm: f64) -> f64 {
        self.unit_to_pixels(grid_size_cm)
    }

    pub fn distance(&self, a: (f64, f64), b: (f64, f64)) -> Measurement {
        let pixels = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
        Measurement {
            pixels,
            centimeters: self.pixels_to_unit(pixels),
        }
    }
}

/// Round `(x, y)` to the nearest multiple of `spacing_px`.  A non-positive
/// spacing leaves the point untouched.
pub fn snap_to_grid(x: f64, y: f64, spacing_px: f64) -> (f64, f64) {
    if !(spacing_px > 0.0) {
        return (x, y);
    }
    (
        (x / spacing_px).round() * spacing_px,
        (y / spacing_px).round() * spacing_px,
    )
}

/// X positions of `count` vertical guide lines spaced `spacing_cm` apart and
/// centred on a raster of width `width_px`.  Lines that would fall outside
/// the raster are dropped.
pub fn guide_line_positions(
    width_px: f64,
    count: usize,
    spacing_cm: f64,
    model: &CoordinateModel,
) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let spacing = model.unit_to_pixels(spacing_cm);
    let start = (width_px - spacing * (count - 1) as f64) / 2.0;
    (0..count)
        .map(|i| start + i as f64 * spacing)
        .filter(|x| (0.0..=width_px).contains(x))
        .collect()
}
