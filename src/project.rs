use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use uuid::Uuid;

use crate::canvas::{Point, SourceRaster, WorkingRaster};
use crate::components::guides::GuideLines;
use crate::components::sections::SectionStore;
use crate::components::selection::SelectionCapture;
use crate::components::tools::{DragState, InputEvent, KeyCode, Tool};
use crate::io::{self, ProjectFile, RasterIoError, SavedSection};
use crate::ops::export::{ExportOptions, flatten};
use crate::ops::smoothing::MotionController;
use crate::ops::transform::SectionTransformEngine;
use crate::render::prewarm::PrewarmTask;
use crate::render::{CacheStats, PyramidCache, ViewState, ViewportRenderCache};
use crate::settings::{EditorSettings, SettingError, parse_positive};
use crate::units::{CoordinateModel, Measurement};

/// Flat fill shown when neither render path produces a bitmap.
pub const PLACEHOLDER_COLOR: Rgb<u8> = Rgb([128, 128, 128]);
/// Keyboard step multiplier while Shift is held.
const FAST_STEP_FACTOR: f64 = 10.0;

/// Where a section lands on screen for the current view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectionPlacement {
    pub index: usize,
    pub screen_x: f64,
    pub screen_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Result of one paint: the base bitmap for the viewport plus the sections to
/// draw over it, in draw order.
#[derive(Clone, Debug)]
pub struct Frame {
    pub bitmap: Arc<RgbImage>,
    /// Pyramid factor the bitmap came from.
    pub level: f64,
    pub placeholder: bool,
    pub sections: Vec<SectionPlacement>,
    /// Screen x of each visible guide line.
    pub guides: Vec<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Diagnostics {
    pub render: CacheStats,
    pub pyramid_levels: usize,
    pub pyramid_mb: f64,
    pub content_version: u64,
    pub sections: usize,
}

/// Single open document.  Owns the rasters, the sections, both caches and
/// all interaction state; nothing here is shared outside the session.
pub struct Project {
    pub id: Uuid,
    /// `None` for rasters that didn't come from a file.
    pub path: Option<PathBuf>,
    pub name: String,
    pub is_dirty: bool,
    pub view: ViewState,

    source: SourceRaster,
    working: WorkingRaster,
    sections: SectionStore,
    pyramid: PyramidCache,
    render_cache: ViewportRenderCache,
    /// Content version both caches were last synced to.
    cached_version: u64,
    prewarm: Option<PrewarmTask>,

    coords: CoordinateModel,
    settings: EditorSettings,
    capture: SelectionCapture,
    engine: SectionTransformEngine,
    motion: MotionController,
    tool: Tool,
    drag: DragState,
    measurement: Option<Measurement>,
    guides: GuideLines,
    show_guides: bool,
}

impl Project {
    pub fn from_raster(source: SourceRaster, settings: EditorSettings) -> Self {
        let working = WorkingRaster::from_source(&source);
        let pyramid = match settings.pyramid_budget_mb {
            0 => PyramidCache::new(),
            mb => PyramidCache::with_budget(mb * 1024 * 1024),
        };
        let coords = CoordinateModel::new(settings.dpi);
        let mut engine = SectionTransformEngine::new(settings.min_section_size, settings.handle_size);
        if settings.snap_to_grid {
            engine.snap_spacing = Some(coords.grid_spacing_px(settings.grid_size_cm));
        }

        Self {
            id: Uuid::new_v4(),
            path: None,
            name: "Untitled".to_string(),
            is_dirty: false,
            view: ViewState::new(source.width(), source.height()),
            cached_version: working.version(),
            sections: SectionStore::new(settings.overlay_opacity, settings.hole_color),
            render_cache: ViewportRenderCache::new(settings.render_cache_capacity),
            motion: MotionController::new(settings.smooth_movement),
            capture: SelectionCapture::new(),
            tool: Tool::default(),
            drag: DragState::Idle,
            measurement: None,
            guides: GuideLines::new(),
            show_guides: false,
            prewarm: None,
            source,
            working,
            pyramid,
            coords,
            settings,
            engine,
        }
    }

    /// Load a raster, pick up its DPI and start pre-warming the pyramid.
    pub fn open(path: &Path, settings: EditorSettings) -> Result<Self, RasterIoError> {
        let source = io::load_raster(path)?;
        let dpi = io::read_dpi(path, settings.dpi);
        let mut project = Self::from_raster(source, settings);
        project.coords = CoordinateModel::new(dpi.dpi);
        project.refresh_snap();
        project.path = Some(path.to_path_buf());
        project.name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        project.start_prewarm();
        Ok(project)
    }

    /// Build the size-appropriate pyramid levels in the background.  Any
    /// earlier pre-warm is cancelled.
    pub fn start_prewarm(&mut self) {
        self.prewarm = Some(PrewarmTask::spawn(&self.working));
    }

    /// Display title with a dirty marker.
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    // ------------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------------

    pub fn source(&self) -> &SourceRaster {
        &self.source
    }

    pub fn working(&self) -> &WorkingRaster {
        &self.working
    }

    pub fn sections(&self) -> &SectionStore {
        &self.sections
    }

    pub fn coords(&self) -> &CoordinateModel {
        &self.coords
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn selected(&self) -> Option<usize> {
        self.engine.selected()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    /// Latest ruler reading.
    pub fn measurement(&self) -> Option<Measurement> {
        self.measurement
    }

    pub fn render_cache(&self) -> &ViewportRenderCache {
        &self.render_cache
    }

    pub fn pyramid(&self) -> &PyramidCache {
        &self.pyramid
    }

    // ------------------------------------------------------------------------
    // settings that other components depend on
    // ------------------------------------------------------------------------

    pub fn set_tool(&mut self, tool: Tool) {
        if tool != self.tool {
            self.reset_gesture();
            self.tool = tool;
            crate::log_info!("tool: {}", tool.label());
        }
    }

    pub fn set_selection_color(&mut self, color: Rgb<u8>) {
        self.settings.selection_color = color;
    }

    pub fn set_dpi(&mut self, dpi: f64) -> Result<(), SettingError> {
        self.coords.set_dpi(dpi).inspect_err(|e| {
            crate::log_warn!("dpi: {}; keeping {}", e, self.coords.dpi());
        })?;
        self.refresh_snap();
        Ok(())
    }

    /// DPI from user-typed text.  Invalid input keeps the current DPI.
    pub fn set_dpi_input(&mut self, input: &str) -> Result<(), SettingError> {
        let dpi = parse_positive("dpi", input).inspect_err(|e| {
            crate::log_warn!("dpi: {}; keeping {}", e, self.coords.dpi());
        })?;
        self.set_dpi(dpi)
    }

    pub fn set_grid_size_input(&mut self, input: &str) -> Result<(), SettingError> {
        let cm = parse_positive("grid_size_cm", input).inspect_err(|e| {
            crate::log_warn!("grid: {}; keeping {} cm", e, self.settings.grid_size_cm);
        })?;
        self.settings.grid_size_cm = cm;
        self.refresh_snap();
        Ok(())
    }

    pub fn set_step_input(&mut self, input: &str) -> Result<(), SettingError> {
        let cm = parse_positive("step_cm", input).inspect_err(|e| {
            crate::log_warn!("step: {}; keeping {} cm", e, self.settings.step_cm);
        })?;
        self.settings.step_cm = cm;
        Ok(())
    }

    pub fn set_snap_to_grid(&mut self, enabled: bool) {
        self.settings.snap_to_grid = enabled;
        self.refresh_snap();
    }

    pub fn set_precise_mode(&mut self, enabled: bool) {
        self.settings.precise_mode = enabled;
    }

    pub fn set_smooth_movement(&mut self, enabled: bool) {
        self.settings.smooth_movement = enabled;
        self.motion = MotionController::new(enabled);
    }

    /// Abandon any half-finished pointer gesture.
    fn reset_gesture(&mut self) {
        self.capture.cancel();
        self.drag = DragState::Idle;
        self.motion.reset();
        self.guides.end_drag();
    }

    fn refresh_snap(&mut self) {
        self.engine.snap_spacing = self
            .settings
            .snap_to_grid
            .then(|| self.coords.grid_spacing_px(self.settings.grid_size_cm));
    }

    // ------------------------------------------------------------------------
    // paint
    // ------------------------------------------------------------------------

    /// Render the current view.  Never fails: a render error yields a flat
    /// placeholder of the viewport size and an error log line.
    pub fn paint(&mut self) -> Frame {
        self.adopt_prewarmed();
        self.sync_caches();

        let viewport = self.view.viewport();
        let (bitmap, level, placeholder) =
            match self.render_cache.render(&viewport, &self.working, &mut self.pyramid) {
                Ok(entry) => (entry.bitmap, entry.level, false),
                Err(e) => {
                    crate::log_err!("paint: render failed ({}), drawing placeholder", e);
                    let fill = RgbImage::from_pixel(
                        viewport.width.max(1),
                        viewport.height.max(1),
                        PLACEHOLDER_COLOR,
                    );
                    (Arc::new(fill), 1.0, true)
                }
            };

        let guides = if self.show_guides {
            self.ensure_guide_layout();
            self.guides
                .positions()
                .iter()
                .map(|&x| x * self.view.scale - self.view.scroll_x)
                .filter(|&x| (0.0..=self.view.viewport_w as f64).contains(&x))
                .collect()
        } else {
            Vec::new()
        };

        Frame {
            bitmap,
            level,
            placeholder,
            sections: self.section_placements(),
            guides,
        }
    }

    fn adopt_prewarmed(&mut self) {
        let Some(task) = self.prewarm.as_mut() else { return };
        let adopted = task.drain_into(&mut self.pyramid, &self.working);
        if adopted > 0 {
            crate::log_info!("pre-warm: adopted {} pyramid level(s)", adopted);
        }
        if task.is_finished() || task.is_cancelled() {
            self.prewarm = None;
        }
    }

    fn sync_caches(&mut self) {
        let version = self.working.version();
        if version != self.cached_version {
            self.pyramid.invalidate();
            self.render_cache.invalidate();
            self.cached_version = version;
        }
    }

    /// Screen rectangles of the sections that intersect the viewport.
    pub fn section_placements(&self) -> Vec<SectionPlacement> {
        let (vw, vh) = (self.view.viewport_w as f64, self.view.viewport_h as f64);
        self.sections
            .iter()
            .enumerate()
            .filter_map(|(index, s)| {
                let (cx, cy) = self.view.image_to_canvas(s.position.0, s.position.1);
                let placement = SectionPlacement {
                    index,
                    screen_x: cx - self.view.scroll_x,
                    screen_y: cy - self.view.scroll_y,
                    width: s.size.0 * self.view.scale,
                    height: s.size.1 * self.view.scale,
                };
                let visible = placement.screen_x < vw
                    && placement.screen_y < vh
                    && placement.screen_x + placement.width > 0.0
                    && placement.screen_y + placement.height > 0.0;
                visible.then_some(placement)
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // input
    // ------------------------------------------------------------------------

    /// Dispatch one host event.  Returns `true` when the view needs a repaint.
    pub fn handle_event(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::PointerDown { x, y } => self.pointer_down(x, y),
            InputEvent::PointerMove { x, y } => self.pointer_move(x, y),
            InputEvent::PointerUp { x, y } => self.pointer_up(x, y),
            InputEvent::Wheel { direction, x, y } => self.view.wheel_zoom(direction, x, y),
            InputEvent::KeyDown { key, shift } => self.key_down(key, shift),
        }
    }

    /// Advance the frame clock; applies a smoothed move held back by the
    /// throttle.
    pub fn tick(&mut self, dt_ms: f64) -> bool {
        let Some((dx, dy)) = self.motion.tick(dt_ms) else { return false };
        match self.drag {
            DragState::Moving { index, .. } => self.apply_move(index, dx, dy),
            _ => false,
        }
    }

    fn pointer_down(&mut self, x: f64, y: f64) -> bool {
        let point = self.view.canvas_to_image(x, y);
        if self.show_guides && !self.guides.is_confirmed() {
            self.ensure_guide_layout();
            if let Some(index) = self.guides.begin_drag(x, self.view.scale) {
                self.drag = DragState::Guide { index };
                return true;
            }
        }
        match self.tool {
            Tool::None => false,
            Tool::Select => {
                self.capture.begin(point);
                true
            }
            Tool::Move => {
                if let Some(hit) = self.engine.find_handle(&self.sections, x, y, self.view.scale) {
                    self.engine.select(Some(hit.index));
                    self.drag = DragState::Resizing {
                        index: hit.index,
                        corner: hit.corner,
                        last: point,
                    };
                } else if let Some(index) = self.engine.hit_test(&self.sections, point.0, point.1) {
                    self.motion.reset();
                    self.drag = DragState::Moving { index, last: point };
                } else {
                    self.engine.select(None);
                    self.drag = DragState::Idle;
                }
                true
            }
            Tool::Ruler => {
                self.drag = DragState::Measuring { start: point };
                self.measurement = Some(self.coords.distance(point, point));
                true
            }
        }
    }

    fn pointer_move(&mut self, x: f64, y: f64) -> bool {
        if let DragState::Guide { index } = self.drag {
            return self.drag_guide(index, x);
        }
        let point = self.view.canvas_to_image(x, y);
        if self.tool == Tool::Select {
            if !self.capture.is_capturing() {
                return false;
            }
            self.capture.extend(point);
            return true;
        }
        match self.drag {
            DragState::Idle => false,
            DragState::Moving { index, last } => {
                self.drag = DragState::Moving { index, last: point };
                match self.motion.push(point.0 - last.0, point.1 - last.1) {
                    Some((dx, dy)) => self.apply_move(index, dx, dy),
                    None => false,
                }
            }
            DragState::Resizing { index, corner, last } => {
                let (dx, dy) = (point.0 - last.0, point.1 - last.1);
                // Rejected drags keep `last` so the motion accumulates.
                if self.engine.resize(&mut self.sections, index, corner, dx, dy) {
                    self.drag = DragState::Resizing { index, corner, last: point };
                    self.is_dirty = true;
                    true
                } else {
                    false
                }
            }
            DragState::Measuring { start } => {
                self.measurement = Some(self.coords.distance(start, point));
                true
            }
            DragState::Guide { index } => self.drag_guide(index, x),
        }
    }

    fn drag_guide(&mut self, index: usize, canvas_x: f64) -> bool {
        let width = self.working.width() as f64;
        let Some(x) = self.guides.drag_to(canvas_x, self.view.scale, width) else { return false };
        crate::log_info!(
            "guide {}: {:.1} cm from left edge",
            index + 1,
            self.coords.pixels_to_unit(x)
        );
        true
    }

    fn pointer_up(&mut self, x: f64, y: f64) -> bool {
        if let DragState::Guide { index } = self.drag {
            self.drag = DragState::Idle;
            self.guides.end_drag();
            crate::log_info!("guide {} positioned", index + 1);
            return true;
        }
        let point = self.view.canvas_to_image(x, y);
        if self.tool == Tool::Select {
            return self.commit_selection(point).is_some();
        }
        let drag = std::mem::take(&mut self.drag);
        match drag {
            DragState::Moving { index, .. } => {
                self.motion.reset();
                if let Some(position) = self.sections.get(index).map(|s| s.position) {
                    self.engine.place_section(&mut self.sections, index, position);
                }
                true
            }
            DragState::Measuring { start } => {
                let m = self.coords.distance(start, point);
                crate::log_info!("ruler: {:.1} px ({:.2} cm)", m.pixels, m.centimeters);
                self.measurement = Some(m);
                true
            }
            DragState::Resizing { .. } | DragState::Guide { .. } => true,
            DragState::Idle => false,
        }
    }

    /// Close the path at `point` and lift it into a section.  Paths with
    /// fewer than three points are dropped.
    fn commit_selection(&mut self, point: Point) -> Option<usize> {
        if !self.capture.is_capturing() {
            return None;
        }
        self.capture.extend(point);
        let selection = self.capture.end(self.source.width(), self.source.height())?;
        let index = self.sections.create(
            selection,
            self.settings.selection_color,
            &self.source,
            &mut self.working,
        );
        self.engine.select(Some(index));
        self.is_dirty = true;
        Some(index)
    }

    fn key_down(&mut self, key: KeyCode, shift: bool) -> bool {
        match key {
            KeyCode::Escape => {
                let busy = self.capture.is_capturing() || self.drag != DragState::Idle;
                self.reset_gesture();
                busy
            }
            KeyCode::Delete => match self.engine.selected() {
                Some(index) => self.remove_section(index),
                None => false,
            },
            _ => {
                let Some(direction) = key.direction() else { return false };
                if self.tool == Tool::Move && self.engine.selected().is_some() {
                    self.move_selected(direction, shift)
                } else {
                    let before = (self.view.scroll_x, self.view.scroll_y);
                    self.view.pan(direction.0, direction.1, shift);
                    before != (self.view.scroll_x, self.view.scroll_y)
                }
            }
        }
    }

    fn apply_move(&mut self, index: usize, dx: f64, dy: f64) -> bool {
        let moved = self.engine.move_section(&mut self.sections, index, dx, dy);
        self.is_dirty |= moved;
        moved
    }

    /// Nudge the selected section one keyboard step (`step_cm`, ten steps with
    /// Shift) in `direction`.  Snaps to the grid when enabled and rounds to
    /// whole pixels outside precise mode.
    pub fn move_selected(&mut self, direction: (i32, i32), shift: bool) -> bool {
        let Some(index) = self.engine.selected() else { return false };
        let Some(position) = self.sections.get(index).map(|s| s.position) else { return false };

        let mut step = self.coords.unit_to_pixels(self.settings.step_cm);
        if shift {
            step *= FAST_STEP_FACTOR;
        }
        let target = (
            position.0 + direction.0 as f64 * step,
            position.1 + direction.1 as f64 * step,
        );
        let (mut x, mut y) = self.engine.snap(target.0, target.1);
        if !self.settings.precise_mode {
            x = x.round();
            y = y.round();
        }
        self.apply_move(index, x - position.0, y - position.1)
    }

    // ------------------------------------------------------------------------
    // section list
    // ------------------------------------------------------------------------

    pub fn select_section(&mut self, index: Option<usize>) {
        self.engine.select(index.filter(|&i| i < self.sections.len()));
    }

    pub fn remove_section(&mut self, index: usize) -> bool {
        if self.sections.remove(index, &self.source, &mut self.working).is_none() {
            return false;
        }
        // Gesture state holds indices into the old list.
        self.reset_gesture();
        self.engine.on_removed(index);
        self.is_dirty = true;
        true
    }

    pub fn undo_last(&mut self) -> bool {
        let Some(last) = self.sections.len().checked_sub(1) else { return false };
        self.remove_section(last)
    }

    pub fn clear_sections(&mut self) {
        self.sections.clear(&self.source, &mut self.working);
        self.engine.select(None);
        self.reset_gesture();
        self.is_dirty = true;
    }

    pub fn duplicate_section(&mut self, index: usize) -> Option<usize> {
        let copy = self.sections.duplicate(index)?;
        self.engine.select(Some(copy));
        self.is_dirty = true;
        Some(copy)
    }

    pub fn recolor_section(&mut self, index: usize, color: Rgb<u8>) -> bool {
        let changed = self.sections.recolor(index, color, &self.source);
        self.is_dirty |= changed;
        changed
    }

    /// Create a section from a polygon in raster coordinates, as if it had
    /// been drawn with the selection tool.
    pub fn add_section(&mut self, polygon: Vec<Point>, color: Rgb<u8>) -> Option<usize> {
        let index = self
            .sections
            .create_from_polygon(polygon, color, &self.source, &mut self.working)?;
        self.is_dirty = true;
        Some(index)
    }

    pub fn summary(&self) -> Vec<String> {
        self.sections.summary(&self.coords)
    }

    // ------------------------------------------------------------------------
    // guide lines
    // ------------------------------------------------------------------------

    pub fn guides(&self) -> &GuideLines {
        &self.guides
    }

    pub fn show_guides(&self) -> bool {
        self.show_guides
    }

    pub fn set_show_guides(&mut self, show: bool) {
        self.show_guides = show;
        if !show {
            self.guides.end_drag();
        }
    }

    fn ensure_guide_layout(&mut self) {
        self.guides.ensure_layout(
            self.working.width() as f64,
            self.settings.guide_line_count,
            self.settings.guide_line_spacing_cm,
            &self.coords,
        );
    }

    /// Guide positions as centimetres from the left edge.
    pub fn guide_offsets_cm(&mut self) -> Vec<f64> {
        self.ensure_guide_layout();
        self.guides
            .positions()
            .iter()
            .map(|&x| self.coords.pixels_to_unit(x))
            .collect()
    }

    /// Number of guide lines.  Refused while the lines are confirmed.
    pub fn set_guide_count(&mut self, count: usize) -> bool {
        if self.guides.is_confirmed() {
            crate::log_warn!("guides: locked, unlock to change the line count");
            return false;
        }
        self.settings.guide_line_count = count;
        true
    }

    /// Guide spacing from user-typed text.  `Ok(false)` while the lines are
    /// confirmed.
    pub fn set_guide_spacing_input(&mut self, input: &str) -> Result<bool, SettingError> {
        if self.guides.is_confirmed() {
            crate::log_warn!("guides: locked, unlock to change the spacing");
            return Ok(false);
        }
        let cm = parse_positive("guide_line_spacing_cm", input).inspect_err(|e| {
            crate::log_warn!("guides: {}; keeping {} cm", e, self.settings.guide_line_spacing_cm);
        })?;
        self.settings.guide_line_spacing_cm = cm;
        Ok(true)
    }

    /// Lock the current guide positions.  Needs the guides to be shown.
    pub fn confirm_guides(&mut self) -> bool {
        if !self.show_guides {
            crate::log_warn!("guides: enable the guide lines before confirming");
            return false;
        }
        self.ensure_guide_layout();
        if let DragState::Guide { .. } = self.drag {
            self.drag = DragState::Idle;
        }
        self.guides.confirm();
        crate::log_info!(
            "guides: {} line(s) locked at {:.1} cm spacing",
            self.guides.positions().len(),
            self.settings.guide_line_spacing_cm
        );
        true
    }

    pub fn unlock_guides(&mut self) {
        self.guides.unlock();
    }

    /// Return hand-placed guides to equal spacing.  Refused while confirmed.
    pub fn reset_guides(&mut self) -> bool {
        self.guides.reset()
    }

    // ------------------------------------------------------------------------
    // persistence and export
    // ------------------------------------------------------------------------

    pub fn to_project_file(&self) -> ProjectFile {
        let sections = self
            .sections
            .iter()
            .map(|s| {
                SavedSection::from_parts(
                    s.id,
                    s.position,
                    s.size,
                    s.boundary.clone(),
                    s.color,
                    s.original_boundary.clone(),
                )
            })
            .collect();
        ProjectFile::new(self.view.scale, self.coords.dpi(), sections)
    }

    /// Replace all sections with those in `file`.  Each is re-clipped from
    /// the source raster at its creation boundary, then scaled and placed as
    /// saved.  Returns the number of sections restored.
    pub fn restore_sections(&mut self, file: &ProjectFile) -> usize {
        self.sections.clear(&self.source, &mut self.working);
        self.engine.select(None);
        self.reset_gesture();
        if let Err(e) = self.coords.set_dpi(file.dpi) {
            crate::log_warn!("project: {}; keeping DPI {}", e, self.coords.dpi());
        }
        self.refresh_snap();
        if !self.view.set_scale(file.image_scale) {
            crate::log_warn!("project: scale {} ignored", file.image_scale);
        }

        let mut restored = 0;
        for saved in &file.sections {
            let Some(color) = saved.color_rgb() else { continue };
            let polygon = if saved.original_boundary.len() >= 3 {
                saved.original_boundary.clone()
            } else {
                saved.boundary.clone()
            };
            let Some(index) =
                self.sections
                    .create_from_polygon(polygon, color, &self.source, &mut self.working)
            else {
                crate::log_warn!("project: section {} lies outside the raster, skipped", saved.id);
                continue;
            };
            if let Some(section) = self.sections.get_mut(index) {
                let scale = saved.size.0 / section.original_size.0;
                if scale.is_finite() && scale > 0.0 && (scale - 1.0).abs() > 1e-9 {
                    section.apply_scale(scale, saved.position);
                } else {
                    let (dx, dy) = (
                        saved.position.0 - section.position.0,
                        saved.position.1 - section.position.1,
                    );
                    section.translate(dx, dy);
                }
            }
            restored += 1;
        }
        crate::log_info!("project: restored {} of {} sections", restored, file.sections.len());
        self.is_dirty = false;
        restored
    }

    pub fn save_project(&mut self, path: &Path) -> Result<(), RasterIoError> {
        io::save_project(&self.to_project_file(), path)?;
        self.is_dirty = false;
        Ok(())
    }

    pub fn load_project(&mut self, path: &Path) -> Result<usize, RasterIoError> {
        let file = io::load_project(path)?;
        Ok(self.restore_sections(&file))
    }

    /// Export options from the current settings.
    pub fn export_options(&self, grid: bool, guides: bool) -> ExportOptions {
        ExportOptions {
            include_sections: true,
            grid_spacing_px: grid.then(|| self.coords.grid_spacing_px(self.settings.grid_size_cm)),
            guides: if guides {
                self.guides.resolve(
                    self.working.width() as f64,
                    self.settings.guide_line_count,
                    self.settings.guide_line_spacing_cm,
                    &self.coords,
                )
            } else {
                Vec::new()
            },
            guides_confirmed: guides && self.guides.is_confirmed(),
        }
    }

    pub fn export(&self, opts: &ExportOptions) -> RgbImage {
        flatten(self.working.image(), &self.sections, opts)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            render: self.render_cache.stats(),
            pyramid_levels: self.pyramid.len(),
            pyramid_mb: self.pyramid.memory_mb(),
            content_version: self.working.version(),
            sections: self.sections.len(),
        }
    }
}
