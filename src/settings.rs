// ============================================================================
// EDITOR SETTINGS: persisted `key = value` configuration
// ============================================================================

use std::path::{Path, PathBuf};

use image::Rgb;
use thiserror::Error;

use crate::canvas::{format_hex_color, parse_hex_color};

/// Rejected numeric input.  The caller keeps its previous valid value.
#[derive(Debug, Error, PartialEq)]
pub enum SettingError {
    #[error("'{value}' is not a number (for {key})")]
    NotANumber { key: &'static str, value: String },
    #[error("{value} is out of range for {key}")]
    OutOfRange { key: &'static str, value: f64 },
}

/// Parse a user-entered numeric value that must be finite and strictly positive
/// (DPI, grid size, step size, zoom percentage).
pub fn parse_positive(key: &'static str, input: &str) -> Result<f64, SettingError> {
    let value: f64 = input.trim().parse().map_err(|_| SettingError::NotANumber {
        key,
        value: input.to_string(),
    })?;
    check_positive(key, value)
}

pub fn check_positive(key: &'static str, value: f64) -> Result<f64, SettingError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SettingError::OutOfRange { key, value })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    /// Fallback DPI when the loaded file carries none.
    pub dpi: f64,
    pub grid_size_cm: f64,
    /// Keyboard movement step.
    pub step_cm: f64,
    /// Opacity of the color overlay baked into each section.
    pub overlay_opacity: f32,
    pub min_section_size: f64,
    /// Side of the square corner handle, in screen pixels.
    pub handle_size: f64,
    pub smooth_movement: bool,
    pub snap_to_grid: bool,
    /// Sub-pixel positions for keyboard moves; whole pixels otherwise.
    pub precise_mode: bool,
    pub render_cache_capacity: usize,
    /// 0 = derive from system memory.
    pub pyramid_budget_mb: u64,
    pub guide_line_count: usize,
    pub guide_line_spacing_cm: f64,
    pub hole_color: Rgb<u8>,
    pub selection_color: Rgb<u8>,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            dpi: 300.0,
            grid_size_cm: 1.0,
            step_cm: 1.0,
            overlay_opacity: 0.3,
            min_section_size: 20.0,
            handle_size: 8.0,
            smooth_movement: false,
            snap_to_grid: false,
            precise_mode: true,
            render_cache_capacity: 8,
            pyramid_budget_mb: 0,
            guide_line_count: 5,
            guide_line_spacing_cm: 5.0,
            hole_color: Rgb([255, 255, 255]),
            selection_color: Rgb([255, 0, 0]),
        }
    }
}

impl EditorSettings {
    pub(crate) fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        let base = std::env::var("APPDATA").ok().map(PathBuf::from);
        #[cfg(target_os = "macos")]
        let base = std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library").join("Application Support"));
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
            .ok();

        base.map(|dir| dir.join("rastercut").join("rastercut_settings.cfg"))
    }

    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            crate::log_warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    /// Read settings from `path`.  Missing files, unknown keys and invalid
    /// values all fall back to the defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else { return Self::default() };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "dpi" => set_positive(&mut s.dpi, "dpi", val),
                "grid_size_cm" => set_positive(&mut s.grid_size_cm, "grid_size_cm", val),
                "step_cm" => set_positive(&mut s.step_cm, "step_cm", val),
                "overlay_opacity" => {
                    if let Ok(v) = val.parse::<f32>()
                        && (0.0..=1.0).contains(&v)
                    {
                        s.overlay_opacity = v;
                    }
                }
                "min_section_size" => set_positive(&mut s.min_section_size, "min_section_size", val),
                "handle_size" => set_positive(&mut s.handle_size, "handle_size", val),
                "smooth_movement" => s.smooth_movement = val == "true",
                "snap_to_grid" => s.snap_to_grid = val == "true",
                "precise_mode" => s.precise_mode = val != "false",
                "render_cache_capacity" => {
                    if let Ok(v) = val.parse::<usize>()
                        && v > 0
                    {
                        s.render_cache_capacity = v;
                    }
                }
                "pyramid_budget_mb" => {
                    if let Ok(v) = val.parse() {
                        s.pyramid_budget_mb = v;
                    }
                }
                "guide_line_count" => {
                    if let Ok(v) = val.parse() {
                        s.guide_line_count = v;
                    }
                }
                "guide_line_spacing_cm" => {
                    set_positive(&mut s.guide_line_spacing_cm, "guide_line_spacing_cm", val)
                }
                "hole_color" => {
                    if let Some(c) = parse_hex_color(val) {
                        s.hole_color = c;
                    }
                }
                "selection_color" => {
                    if let Some(c) = parse_hex_color(val) {
                        s.selection_color = c;
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("dpi = {}\n", self.dpi));
        out.push_str(&format!("grid_size_cm = {}\n", self.grid_size_cm));
        out.push_str(&format!("step_cm = {}\n", self.step_cm));
        out.push_str(&format!("overlay_opacity = {}\n", self.overlay_opacity));
        out.push_str(&format!("min_section_size = {}\n", self.min_section_size));
        out.push_str(&format!("handle_size = {}\n", self.handle_size));
        out.push_str(&format!("smooth_movement = {}\n", self.smooth_movement));
        out.push_str(&format!("snap_to_grid = {}\n", self.snap_to_grid));
        out.push_str(&format!("precise_mode = {}\n", self.precise_mode));
        out.push_str(&format!("render_cache_capacity = {}\n", self.render_cache_capacity));
        out.push_str(&format!("pyramid_budget_mb = {}\n", self.pyramid_budget_mb));
        out.push_str(&format!("guide_line_count = {}\n", self.guide_line_count));
        out.push_str(&format!("guide_line_spacing_cm = {}\n", self.guide_line_spacing_cm));
        out.push_str(&format!("hole_color = {}\n", format_hex_color(self.hole_color)));
        out.push_str(&format!("selection_color = {}\n", format_hex_color(self.selection_color)));
        out
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }
}

fn set_positive(slot: &mut f64, key: &'static str, val: &str) {
    match parse_positive(key, val) {
        Ok(v) => *slot = v,
        Err(e) => {
            crate::log_warn!("settings: {}; keeping {}", e, slot);
        }
    }
}
