use crate::canvas::{PixelRect, Point, PolygonMask, rasterize_polygon};

/// A finished selection, ready for [`SectionStore::create`](super::SectionStore::create).
pub struct CapturedSelection {
    pub path: Vec<Point>,
    pub bbox: PixelRect,
    pub mask: PolygonMask,
}

#[derive(Clone, Debug, Default, PartialEq)]
enum CaptureState {
    #[default]
    Idle,
    Capturing(Vec<Point>),
}

/// Accumulates a free-form path while the user draws.
#[derive(Clone, Debug, Default)]
pub struct SelectionCapture {
    state: CaptureState,
}

impl SelectionCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new path.  Calling this mid-capture restarts the path.
    pub fn begin(&mut self, point: Point) {
        self.state = CaptureState::Capturing(vec![point]);
    }

    pub fn extend(&mut self, point: Point) {
        if let CaptureState::Capturing(path) = &mut self.state {
            path.push(point);
        }
    }

    /// Finish the path and rasterize it against a `width`×`height` raster.
    ///
    /// Returns `None` (and goes back to idle) when there is nothing to commit:
    /// no capture in progress, fewer than three points, or a polygon that
    /// covers no pixel of the raster.
    pub fn end(&mut self, width: u32, height: u32) -> Option<CapturedSelection> {
        let CaptureState::Capturing(path) = std::mem::take(&mut self.state) else {
            return None;
        };
        if path.len() < 3 {
            return None;
        }
        let mask = rasterize_polygon(&path, width, height);
        let bbox = mask.bbox?;
        Some(CapturedSelection { path, bbox, mask })
    }

    pub fn cancel(&mut self) {
        self.state = CaptureState::Idle;
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Capturing(_))
    }

    /// Points captured so far (empty when idle).
    pub fn path(&self) -> &[Point] {
        match &self.state {
            CaptureState::Capturing(path) => path,
            CaptureState::Idle => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_is_ignored_while_idle() {
        let mut sel = SelectionCapture::new();
        sel.extend((1.0, 1.0));
        assert!(!sel.is_capturing());
        assert!(sel.path().is_empty());
        assert!(sel.end(10, 10).is_none());
    }

    #[test]
    fn short_paths_are_discarded() {
        let mut sel = SelectionCapture::new();
        sel.begin((0.0, 0.0));
        sel.extend((5.0, 5.0));
        assert!(sel.end(10, 10).is_none());
        assert!(!sel.is_capturing());
    }

    #[test]
    fn second_begin_restarts_the_path() {
        let mut sel = SelectionCapture::new();
        sel.begin((0.0, 0.0));
        sel.extend((50.0, 0.0));
        sel.begin((10.0, 10.0));
        assert_eq!(sel.path(), &[(10.0, 10.0)]);
    }

    #[test]
    fn committed_path_yields_mask_and_bbox() {
        let mut sel = SelectionCapture::new();
        sel.begin((10.0, 10.0));
        sel.extend((30.0, 10.0));
        sel.extend((30.0, 20.0));
        sel.extend((10.0, 20.0));
        let captured = sel.end(64, 64).unwrap();
        assert_eq!(captured.path.len(), 4);
        assert_eq!(captured.bbox, PixelRect { x0: 10, y0: 10, x1: 30, y1: 20 });
        assert!(captured.mask.contains(15, 15));
        assert!(!sel.is_capturing());
    }

    #[test]
    fn cancel_drops_the_path() {
        let mut sel = SelectionCapture::new();
        sel.begin((0.0, 0.0));
        sel.extend((9.0, 0.0));
        sel.extend((9.0, 9.0));
        sel.cancel();
        assert!(sel.end(16, 16).is_none());
    }
}
