//! RasterCut: polygon sections over very large rasters.
//!
//! A [`project::Project`] owns one document: the immutable source raster, the
//! working raster with holes, the section store, and the pyramid and viewport
//! caches that keep painting interactive.  Hosts feed it normalized
//! [`components::InputEvent`]s and call [`project::Project::paint`] once per
//! frame.

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ops;
pub mod project;
pub mod render;
pub mod settings;
pub mod units;

pub use canvas::{Point, SourceRaster, WorkingRaster};
pub use project::{Frame, Project};
