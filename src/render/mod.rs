// ============================================================================
// RENDER: pyramid levels, viewport render cache, view state
// ============================================================================
//
// Paint path: ViewState → Viewport → ViewportRenderCache (LRU hit?) →
// PyramidCache level → resample to display size.  Both caches are keyed on
// the working raster's content version, so any hole punched or refilled
// makes every cached bitmap stale.

pub mod prewarm;
pub mod pyramid;
pub mod view;
pub mod viewport;

use thiserror::Error;

pub use pyramid::{PyramidCache, PyramidLevel, select_level};
pub use view::ViewState;
pub use viewport::{CacheStats, RenderCacheEntry, Viewport, ViewportKey, ViewportRenderCache};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    #[error("working raster has no pixels")]
    EmptySource,
    #[error("display scale {0} is not a positive finite number")]
    InvalidScale(f64),
    #[error("{0} is not a pyramid level")]
    UnknownLevel(f64),
    #[error("pyramid level needs {bytes} bytes, budget is {budget}")]
    OverBudget { bytes: u64, budget: u64 },
}
