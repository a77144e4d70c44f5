// ============================================================================
// VIEW STATE: zoom, scroll and coordinate transforms for one document view
// ============================================================================
//
// Three coordinate spaces:
//   * image : source-raster pixels (all section geometry lives here)
//   * canvas: image × scale (the full scrollable display surface)
//   * screen: canvas minus the scroll offset (what the host widget sees)

use super::viewport::{Viewport, display_size};
use crate::settings::{SettingError, parse_positive};

pub const BUTTON_ZOOM_STEP: f64 = 1.2;
pub const BUTTON_ZOOM_RANGE: (f64, f64) = (0.05, 10.0);
pub const WHEEL_ZOOM_STEP: f64 = 1.1;
pub const WHEEL_ZOOM_RANGE: (f64, f64) = (0.01, 50.0);

const FIT_MARGIN: f64 = 20.0;
const MIN_FIT_VISIBILITY: f64 = 0.2;
const PAN_STEP: f64 = 0.15;
const PAN_STEP_FAST: f64 = 0.4;

#[derive(Clone, Debug, PartialEq)]
pub struct ViewState {
    pub scale: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub viewport_w: u32,
    pub viewport_h: u32,
    image_w: u32,
    image_h: u32,
}

impl ViewState {
    pub fn new(image_w: u32, image_h: u32) -> Self {
        Self {
            scale: 1.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
            viewport_w: 800,
            viewport_h: 600,
            image_w,
            image_h,
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            scale: self.scale,
            scroll_x: self.scroll_x,
            scroll_y: self.scroll_y,
            width: self.viewport_w,
            height: self.viewport_h,
        }
    }

    pub fn resize_viewport(&mut self, width: u32, height: u32) {
        self.viewport_w = width;
        self.viewport_h = height;
        self.clamp_scroll();
    }

    /// Set the zoom directly (clamped to the wheel range) and keep the
    /// scroll inside the new display.  Non-finite or non-positive scales
    /// are ignored.
    pub fn set_scale(&mut self, scale: f64) -> bool {
        if !(scale.is_finite() && scale > 0.0) {
            return false;
        }
        self.scale = scale.clamp(WHEEL_ZOOM_RANGE.0, WHEEL_ZOOM_RANGE.1);
        self.clamp_scroll();
        true
    }

    pub fn display_size(&self) -> (u32, u32) {
        display_size(self.image_w, self.image_h, self.scale)
    }

    pub fn screen_to_canvas(&self, x: f64, y: f64) -> (f64, f64) {
        (x + self.scroll_x, y + self.scroll_y)
    }

    pub fn canvas_to_image(&self, x: f64, y: f64) -> (f64, f64) {
        (x / self.scale, y / self.scale)
    }

    pub fn image_to_canvas(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale, y * self.scale)
    }

    pub fn zoom_in(&mut self) -> bool {
        self.zoom_about_centre(self.scale * BUTTON_ZOOM_STEP, BUTTON_ZOOM_RANGE)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.zoom_about_centre(self.scale / BUTTON_ZOOM_STEP, BUTTON_ZOOM_RANGE)
    }

    /// Wheel zoom keeping the image point under the cursor fixed on screen.
    /// `(x, y)` are screen coordinates; a positive `direction` zooms in.
    pub fn wheel_zoom(&mut self, direction: i32, x: f64, y: f64) -> bool {
        let target = match direction.signum() {
            1 => self.scale * WHEEL_ZOOM_STEP,
            -1 => self.scale / WHEEL_ZOOM_STEP,
            _ => return false,
        };
        self.zoom_at(target, WHEEL_ZOOM_RANGE, x, y)
    }

    /// Set the zoom from a user-typed percentage.  Invalid input leaves the
    /// current zoom in place.
    pub fn set_zoom_percent(&mut self, input: &str) -> Result<f64, SettingError> {
        let percent = parse_positive("zoom", input).inspect_err(|e| {
            crate::log_warn!("zoom: {}; keeping {:.0}%", e, self.scale * 100.0);
        })?;
        self.zoom_about_centre(percent / 100.0, WHEEL_ZOOM_RANGE);
        Ok(self.scale)
    }

    fn zoom_about_centre(&mut self, target: f64, range: (f64, f64)) -> bool {
        let (cx, cy) = (self.viewport_w as f64 / 2.0, self.viewport_h as f64 / 2.0);
        self.zoom_at(target, range, cx, cy)
    }

    fn zoom_at(&mut self, target: f64, range: (f64, f64), x: f64, y: f64) -> bool {
        let new_scale = target.clamp(range.0, range.1);
        if (new_scale - self.scale).abs() < 1e-3 * self.scale {
            return false;
        }
        let (cx, cy) = self.screen_to_canvas(x, y);
        let (ix, iy) = self.canvas_to_image(cx, cy);
        self.scale = new_scale;
        self.scroll_x = ix * new_scale - x;
        self.scroll_y = iy * new_scale - y;
        self.clamp_scroll();
        true
    }

    /// Scale that fits the image in the viewport, reduced for very large
    /// images but never below 20% visibility.
    pub fn fit_to_window(&mut self) {
        let (iw, ih) = (self.image_w.max(1) as f64, self.image_h.max(1) as f64);
        let (vw, vh) = (self.viewport_w as f64, self.viewport_h as f64);
        let fit = if vw > 50.0 && vh > 50.0 {
            ((vw - FIT_MARGIN) / iw).min((vh - FIT_MARGIN) / ih).min(1.0)
        } else {
            0.5
        };

        let megapixels = iw * ih / 1_000_000.0;
        let performance = if megapixels > 100.0 {
            0.3
        } else if megapixels > 50.0 {
            0.5
        } else if megapixels > 25.0 {
            0.7
        } else {
            1.0
        };
        let combined = (fit * performance).max(MIN_FIT_VISIBILITY);
        if performance < 1.0 {
            crate::log_info!(
                "fit: {:.1} MP image previewed at {:.0}%",
                megapixels,
                combined * 100.0
            );
        }

        self.scale = combined;
        self.scroll_x = 0.0;
        self.scroll_y = 0.0;
    }

    /// Keyboard pan by a fraction of the display extent.
    pub fn pan(&mut self, dx: i32, dy: i32, fast: bool) {
        let step = if fast { PAN_STEP_FAST } else { PAN_STEP };
        let (dw, dh) = self.display_size();
        self.scroll_x += dx.signum() as f64 * step * dw as f64;
        self.scroll_y += dy.signum() as f64 * step * dh as f64;
        self.clamp_scroll();
    }

    fn clamp_scroll(&mut self) {
        let (dw, dh) = self.display_size();
        let max_x = (dw as f64 - self.viewport_w as f64).max(0.0);
        let max_y = (dh as f64 - self.viewport_h as f64).max(0.0);
        self.scroll_x = self.scroll_x.clamp(0.0, max_x);
        self.scroll_y = self.scroll_y.clamp(0.0, max_y);
    }
}
