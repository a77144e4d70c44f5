// ============================================================================
// TOOLS: active tool mode and the normalized input events a host delivers
// ============================================================================

use crate::canvas::Point;
use crate::ops::transform::Corner;

/// What a pointer drag does on the canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tool {
    /// Pointer input only navigates.
    #[default]
    None,
    /// Draw a free-form selection and lift it into a section.
    Select,
    /// Pick, drag and corner-resize sections.
    Move,
    /// Measure the distance between two points.
    Ruler,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::None => "Navigate",
            Tool::Select => "Select",
            Tool::Move => "Move",
            Tool::Ruler => "Ruler",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyCode {
    Up,
    Down,
    Left,
    Right,
    W,
    A,
    S,
    D,
    Delete,
    Escape,
}

impl KeyCode {
    /// Unit direction for arrow and WASD keys.
    pub fn direction(&self) -> Option<(i32, i32)> {
        match self {
            KeyCode::Up | KeyCode::W => Some((0, -1)),
            KeyCode::Down | KeyCode::S => Some((0, 1)),
            KeyCode::Left | KeyCode::A => Some((-1, 0)),
            KeyCode::Right | KeyCode::D => Some((1, 0)),
            KeyCode::Delete | KeyCode::Escape => None,
        }
    }
}

/// Input already translated from the host toolkit.  Pointer coordinates are
/// canvas space (scroll included, scale not undone); wheel coordinates are
/// screen space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    PointerDown { x: f64, y: f64 },
    PointerMove { x: f64, y: f64 },
    PointerUp { x: f64, y: f64 },
    Wheel { direction: i32, x: f64, y: f64 },
    KeyDown { key: KeyCode, shift: bool },
}

/// In-progress pointer gesture.  Points are in source-raster coordinates.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DragState {
    #[default]
    Idle,
    Moving { index: usize, last: Point },
    Resizing { index: usize, corner: Corner, last: Point },
    Measuring { start: Point },
    /// Dragging guide line `index`.
    Guide { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrows_and_wasd_share_directions() {
        assert_eq!(KeyCode::Up.direction(), KeyCode::W.direction());
        assert_eq!(KeyCode::D.direction(), Some((1, 0)));
        assert_eq!(KeyCode::Left.direction(), Some((-1, 0)));
        assert_eq!(KeyCode::Delete.direction(), None);
        assert_eq!(KeyCode::Escape.direction(), None);
    }
}
