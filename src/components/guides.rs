// ============================================================================
// GUIDES: draggable vertical guide lines that lock once confirmed
// ============================================================================

use crate::units::{CoordinateModel, guide_line_positions};

/// Canvas pixels either side of a line that still grab it.
pub const GUIDE_DRAG_TOLERANCE: f64 = 10.0;
/// Dragged lines stay this many source pixels inside the raster edges.
pub const GUIDE_EDGE_MARGIN: f64 = 10.0;

/// Inputs the equal-spacing layout was computed from.  A change to any of
/// them lays the lines out again.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Layout {
    width_px: f64,
    count: usize,
    spacing_cm: f64,
    dpi: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuideLines {
    /// X positions in source pixels.
    positions: Vec<f64>,
    layout: Option<Layout>,
    confirmed: bool,
    dragging: Option<usize>,
}

impl GuideLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn dragging(&self) -> Option<usize> {
        self.dragging
    }

    /// Positions for the given layout without touching the stored state:
    /// the placed lines when they were laid out for these inputs, otherwise
    /// a fresh equal-spacing layout.
    pub fn resolve(&self, width_px: f64, count: usize, spacing_cm: f64, model: &CoordinateModel) -> Vec<f64> {
        let wanted = Layout { width_px, count, spacing_cm, dpi: model.dpi() };
        if self.layout == Some(wanted) {
            self.positions.clone()
        } else {
            guide_line_positions(width_px, count, spacing_cm, model)
        }
    }

    /// Lay the lines out at equal spacing unless they were already laid out
    /// for these inputs.  Lines dragged by hand survive until the layout
    /// changes or [`reset`](Self::reset) is called.
    pub fn ensure_layout(
        &mut self,
        width_px: f64,
        count: usize,
        spacing_cm: f64,
        model: &CoordinateModel,
    ) -> &[f64] {
        let wanted = Layout { width_px, count, spacing_cm, dpi: model.dpi() };
        if self.layout != Some(wanted) {
            self.positions = guide_line_positions(width_px, count, spacing_cm, model);
            self.layout = Some(wanted);
            self.dragging = None;
        }
        &self.positions
    }

    /// Pick the first line within [`GUIDE_DRAG_TOLERANCE`] of canvas `x`.
    /// Confirmed lines can't be picked.
    pub fn begin_drag(&mut self, canvas_x: f64, scale: f64) -> Option<usize> {
        if self.confirmed {
            return None;
        }
        self.dragging = self
            .positions
            .iter()
            .position(|&x| (canvas_x - x * scale).abs() <= GUIDE_DRAG_TOLERANCE);
        self.dragging
    }

    /// Move the line being dragged to canvas `x`, kept inside the raster
    /// margin.  Returns the new position in source pixels.
    pub fn drag_to(&mut self, canvas_x: f64, scale: f64, width_px: f64) -> Option<f64> {
        let index = self.dragging?;
        let x = (canvas_x / scale)
            .min(width_px - GUIDE_EDGE_MARGIN)
            .max(GUIDE_EDGE_MARGIN);
        let slot = self.positions.get_mut(index)?;
        *slot = x;
        Some(x)
    }

    pub fn end_drag(&mut self) -> Option<usize> {
        self.dragging.take()
    }

    pub fn confirm(&mut self) {
        self.confirmed = true;
        self.dragging = None;
    }

    pub fn unlock(&mut self) {
        self.confirmed = false;
    }

    /// Drop hand-placed positions so the next layout is equally spaced
    /// again.  Refused while confirmed.
    pub fn reset(&mut self) -> bool {
        if self.confirmed {
            return false;
        }
        self.positions.clear();
        self.layout = None;
        self.dragging = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laid_out(width: f64) -> (GuideLines, CoordinateModel) {
        // 254 DPI: 1 cm == 100 px
        let model = CoordinateModel::new(254.0);
        let mut g = GuideLines::new();
        g.ensure_layout(width, 3, 1.0, &model);
        (g, model)
    }

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn lines_are_picked_within_tolerance() {
        let (mut g, _) = laid_out(1000.0);
        assert!(close(g.positions(), &[400.0, 500.0, 600.0]));
        // Zoomed to 50%: line 1 sits at canvas x 250.
        assert_eq!(g.begin_drag(259.0, 0.5), Some(1));
        g.end_drag();
        assert_eq!(g.begin_drag(275.0, 0.5), None);
    }

    #[test]
    fn drags_are_clamped_to_the_margin() {
        let (mut g, _) = laid_out(1000.0);
        g.begin_drag(400.0, 1.0);
        assert_eq!(g.drag_to(5000.0, 1.0, 1000.0), Some(990.0));
        assert_eq!(g.drag_to(-20.0, 1.0, 1000.0), Some(10.0));
        assert_eq!(g.drag_to(700.0, 1.0, 1000.0), Some(700.0));
        assert_eq!(g.end_drag(), Some(0));
        assert_eq!(g.drag_to(100.0, 1.0, 1000.0), None);
        assert!(close(g.positions(), &[700.0, 500.0, 600.0]));
    }

    #[test]
    fn placed_lines_survive_until_layout_changes() {
        let (mut g, model) = laid_out(1000.0);
        g.begin_drag(600.0, 1.0);
        g.drag_to(800.0, 1.0, 1000.0);
        g.end_drag();
        g.ensure_layout(1000.0, 3, 1.0, &model);
        assert!(close(g.positions(), &[400.0, 500.0, 800.0]));
        assert!(close(&g.resolve(1000.0, 3, 1.0, &model), &[400.0, 500.0, 800.0]));
        assert!(close(&g.resolve(1000.0, 2, 1.0, &model), &[450.0, 550.0]));

        g.ensure_layout(1000.0, 2, 1.0, &model);
        assert!(close(g.positions(), &[450.0, 550.0]));
    }

    #[test]
    fn confirmed_lines_are_locked() {
        let (mut g, model) = laid_out(1000.0);
        g.confirm();
        assert!(g.is_confirmed());
        assert_eq!(g.begin_drag(500.0, 1.0), None);
        assert!(!g.reset());

        g.unlock();
        g.begin_drag(500.0, 1.0);
        g.drag_to(520.0, 1.0, 1000.0);
        assert!(g.reset());
        assert!(g.positions().is_empty());
        g.ensure_layout(1000.0, 3, 1.0, &model);
        assert!(close(g.positions(), &[400.0, 500.0, 600.0]));
    }
}
