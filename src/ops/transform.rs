// ============================================================================
// SECTION TRANSFORMS: hit-testing, corner handles, move, resize
// ============================================================================

use crate::canvas::Point;
use crate::components::sections::SectionStore;
use crate::units::snap_to_grid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    /// Handle test order.
    pub const ALL: [Corner; 4] = [Corner::TopLeft, Corner::TopRight, Corner::BottomLeft, Corner::BottomRight];

    fn of(&self, (x0, y0, x1, y1): (f64, f64, f64, f64)) -> Point {
        match self {
            Corner::TopLeft => (x0, y0),
            Corner::TopRight => (x1, y0),
            Corner::BottomLeft => (x0, y1),
            Corner::BottomRight => (x1, y1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleHit {
    pub index: usize,
    pub corner: Corner,
}

/// Even-odd ray cast.  An edge counts when `min(y) < y <= max(y)`, so
/// horizontal edges never count and a point on a polygon's top edge is
/// outside while one on its bottom edge is inside.
pub fn point_in_polygon(x: f64, y: f64, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut p1 = polygon[polygon.len() - 1];
    for &p2 in polygon {
        if y > p1.1.min(p2.1) && y <= p1.1.max(p2.1) && x <= p1.0.max(p2.0) {
            let crosses = p1.0 == p2.0 || x <= (y - p1.1) * (p2.0 - p1.0) / (p2.1 - p1.1) + p1.0;
            if crosses {
                inside = !inside;
            }
        }
        p1 = p2;
    }
    inside
}

/// Move / resize / pick over a [`SectionStore`].  Owns the "currently
/// selected" section so picking stays stable under pointer jitter.
#[derive(Clone, Debug)]
pub struct SectionTransformEngine {
    selected: Option<usize>,
    pub min_size: f64,
    /// Handle square side, in screen pixels.
    pub handle_size: f64,
    /// Grid spacing in source pixels when snapping is on.
    pub snap_spacing: Option<f64>,
}

impl Default for SectionTransformEngine {
    fn default() -> Self {
        Self::new(20.0, 8.0)
    }
}

impl SectionTransformEngine {
    pub fn new(min_size: f64, handle_size: f64) -> Self {
        Self {
            selected: None,
            min_size,
            handle_size,
            snap_spacing: None,
        }
    }

    pub fn select(&mut self, index: Option<usize>) {
        self.selected = index;
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Keep the selection valid after `removed` was deleted from the store.
    pub fn on_removed(&mut self, removed: usize) {
        self.selected = match self.selected {
            Some(i) if i == removed => None,
            Some(i) if i > removed => Some(i - 1),
            other => other,
        };
    }

    /// Section under the raster point `(x, y)`.  The selected section wins
    /// while it still contains the point; otherwise the most recently created
    /// match is selected and returned.
    pub fn hit_test(&mut self, store: &SectionStore, x: f64, y: f64) -> Option<usize> {
        if let Some(i) = self.selected
            && let Some(section) = store.get(i)
            && point_in_polygon(x, y, &section.boundary)
        {
            return Some(i);
        }
        let hit = store
            .iter()
            .enumerate()
            .rev()
            .find(|(_, s)| point_in_polygon(x, y, &s.boundary))
            .map(|(i, _)| i);
        if hit.is_some() {
            self.selected = hit;
        }
        hit
    }

    /// Corner handle under canvas point `(cx, cy)` at display `scale`.
    /// Sections are tried topmost first, corners in [`Corner::ALL`] order.
    pub fn find_handle(&self, store: &SectionStore, cx: f64, cy: f64, scale: f64) -> Option<HandleHit> {
        let half = self.handle_size / 2.0;
        for (index, section) in store.iter().enumerate().rev() {
            let bounds = section.bounds();
            for corner in Corner::ALL {
                let (hx, hy) = corner.of(bounds);
                let (hx, hy) = (hx * scale, hy * scale);
                if (cx - hx).abs() <= half && (cy - hy).abs() <= half {
                    return Some(HandleHit { index, corner });
                }
            }
        }
        None
    }

    /// Translate a section and its boundary.  Never clamps to the raster.
    pub fn move_section(&self, store: &mut SectionStore, index: usize, dx: f64, dy: f64) -> bool {
        match store.get_mut(index) {
            Some(section) => {
                section.translate(dx, dy);
                true
            }
            None => false,
        }
    }

    /// Put a section's top-left corner at `target`, snapped when enabled.
    pub fn place_section(&self, store: &mut SectionStore, index: usize, target: Point) -> bool {
        let Some(section) = store.get(index) else { return false };
        let (x, y) = self.snap(target.0, target.1);
        let (dx, dy) = (x - section.position.0, y - section.position.1);
        self.move_section(store, index, dx, dy)
    }

    pub fn snap(&self, x: f64, y: f64) -> Point {
        match self.snap_spacing {
            Some(spacing) => snap_to_grid(x, y, spacing),
            None => (x, y),
        }
    }

    /// Drag `corner` by `(dx, dy)` with the aspect ratio locked to the
    /// original crop.  The opposite corner stays put.  Returns `false` and
    /// leaves the section untouched when the result would be smaller than
    /// `min_size` on either axis.
    pub fn resize(&self, store: &mut SectionStore, index: usize, corner: Corner, dx: f64, dy: f64) -> bool {
        let Some(section) = store.get_mut(index) else { return false };
        let (mut x0, mut y0, mut x1, mut y1) = section.bounds();
        match corner {
            Corner::TopLeft => {
                x0 += dx;
                y0 += dy;
            }
            Corner::TopRight => {
                x1 += dx;
                y0 += dy;
            }
            Corner::BottomLeft => {
                x0 += dx;
                y1 += dy;
            }
            Corner::BottomRight => {
                x1 += dx;
                y1 += dy;
            }
        }
        let (new_w, new_h) = (x1 - x0, y1 - y0);
        if !(new_w >= self.min_size && new_h >= self.min_size) {
            return false;
        }

        let (ow, oh) = section.original_size;
        let scale = (new_w / ow).min(new_h / oh);
        let (w, h) = (ow * scale, oh * scale);
        if !(w >= self.min_size && h >= self.min_size) {
            return false;
        }

        // Anchor on the corner opposite the one being dragged.
        let (ax0, ay0, ax1, ay1) = section.bounds();
        let position = match corner {
            Corner::TopLeft => (ax1 - w, ay1 - h),
            Corner::TopRight => (ax0, ay1 - h),
            Corner::BottomLeft => (ax1 - w, ay0),
            Corner::BottomRight => (ax0, ay0),
        };
        section.apply_scale(scale, position);
        true
    }
}
