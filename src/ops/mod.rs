// ============================================================================
// OPS: operations over sections and rasters
// ============================================================================
//
//   transform.rs: hit-testing, handles, move and aspect-locked resize
//   smoothing.rs: drag delta smoothing and the per-frame motion clock
//   export.rs   : flatten working raster + sections + overlays
//   merge.rs    : concatenate several rasters into one
// ============================================================================

pub mod export;
pub mod merge;
pub mod smoothing;
pub mod transform;

pub use export::{ExportOptions, flatten};
pub use merge::{Arrangement, merge_images};
pub use smoothing::{MotionController, MovementSmoother};
pub use transform::{Corner, HandleHit, SectionTransformEngine, point_in_polygon};
