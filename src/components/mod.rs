// ============================================================================
// COMPONENTS: editor state driven by user input
// ============================================================================
//
//   guides.rs   : draggable vertical guide lines, confirm / unlock
//   selection.rs: free-form polygon capture (Idle / Capturing)
//   sections.rs : Section records and the store that owns them
//   tools.rs    : active tool, normalized input events
// ============================================================================

pub mod guides;
pub mod sections;
pub mod selection;
pub mod tools;

pub use guides::GuideLines;
pub use sections::{Section, SectionStore};
pub use selection::{CapturedSelection, SelectionCapture};
pub use tools::{InputEvent, KeyCode, Tool};
