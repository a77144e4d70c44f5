use std::ops::Range;
use std::sync::Arc;

use image::{GrayImage, Luma, Rgb, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A point in source-raster coordinates.
pub type Point = (f64, f64);

// ============================================================================
// PIXEL RECT: half-open integer rectangle
// ============================================================================

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    fn include_span(this: &mut Option<PixelRect>, y: u32, x0: u32, x1: u32) {
        *this = Some(match *this {
            None => PixelRect { x0, y0: y, x1, y1: y + 1 },
            Some(r) => PixelRect {
                x0: r.x0.min(x0),
                y0: r.y0.min(y),
                x1: r.x1.max(x1),
                y1: r.y1.max(y + 1),
            },
        });
    }
}

// ============================================================================
// SOURCE / WORKING RASTERS
// ============================================================================

/// The image as loaded.  Never mutated; shared with the working raster and
/// the full-resolution pyramid level through `Arc`.
#[derive(Clone)]
pub struct SourceRaster {
    pixels: Arc<RgbImage>,
}

impl SourceRaster {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels: Arc::new(pixels) }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn shared(&self) -> Arc<RgbImage> {
        Arc::clone(&self.pixels)
    }

    pub fn megapixels(&self) -> f64 {
        self.width() as f64 * self.height() as f64 / 1_000_000.0
    }
}

/// Mutable copy of the source with a hole punched for every section.
///
/// Pixels are copy-on-write: a fresh working raster shares the source
/// buffer, and the first hole clones it.  Every mutation bumps `version`,
/// which the render caches use as their validity key.
#[derive(Clone)]
pub struct WorkingRaster {
    pixels: Arc<RgbImage>,
    version: u64,
}

impl WorkingRaster {
    pub fn from_source(source: &SourceRaster) -> Self {
        Self {
            pixels: source.shared(),
            version: 0,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn shared(&self) -> Arc<RgbImage> {
        Arc::clone(&self.pixels)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Fill `polygon` with a flat `color`.
    pub fn punch_hole(&mut self, polygon: &[Point], color: Rgb<u8>) {
        fill_polygon(Arc::make_mut(&mut self.pixels), polygon, color);
        self.version += 1;
    }

    /// Discard all holes.
    pub fn reset(&mut self, source: &SourceRaster) {
        self.pixels = source.shared();
        self.version += 1;
    }
}

// ============================================================================
// POLYGON SCANLINE RASTERIZATION
// ============================================================================

/// Binary mask of a rasterized polygon, sized to the full raster, plus the
/// tight bounding box of its set pixels (`None` when nothing was covered).
pub struct PolygonMask {
    pub mask: GrayImage,
    pub bbox: Option<PixelRect>,
}

impl PolygonMask {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y)[0] != 0
    }
}

/// Rows that can intersect the polygon, clamped to `[0, height)`.
fn polygon_rows(points: &[Point], height: u32) -> Range<u32> {
    if points.len() < 3 || points.iter().any(|p| !p.0.is_finite() || !p.1.is_finite()) {
        return 0..0;
    }
    let (min_y, max_y) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
    let y0 = (min_y.floor().max(0.0) as u32).min(height);
    let y1 = (max_y.ceil().max(0.0) as u32).min(height);
    y0..y1
}

/// Horizontal spans `[x_start, x_end)` covered by the polygon on row `y`.
///
/// A pixel is inside when its centre is inside (even-odd rule).  Edges are
/// half-open in y, so a shared vertex is counted once and horizontal edges
/// never produce a crossing.
pub fn scanline_spans(points: &[Point], y: u32, width: u32) -> Vec<(u32, u32)> {
    let yf = y as f64 + 0.5;
    let n = points.len();
    let mut nodes: Vec<f64> = Vec::new();
    for i in 0..n {
        let (xi, yi) = points[i];
        let (xj, yj) = points[(i + 1) % n];
        if (yi < yf && yj >= yf) || (yj < yf && yi >= yf) {
            let t = (yf - yi) / (yj - yi);
            nodes.push(xi + t * (xj - xi));
        }
    }
    nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut spans = Vec::with_capacity(nodes.len() / 2);
    let w = width as f64;
    for pair in nodes.chunks_exact(2) {
        let start = (pair[0] - 0.5).ceil().clamp(0.0, w) as u32;
        let end = (pair[1] - 0.5).ceil().clamp(0.0, w) as u32;
        if end > start {
            spans.push((start, end));
        }
    }
    spans
}

/// Rasterize a closed polygon into a full-size binary mask.
pub fn rasterize_polygon(points: &[Point], width: u32, height: u32) -> PolygonMask {
    let mut mask = GrayImage::new(width, height);
    let rows: Vec<(u32, Vec<(u32, u32)>)> = polygon_rows(points, height)
        .into_par_iter()
        .map(|y| (y, scanline_spans(points, y, width)))
        .collect();

    let mut bbox = None;
    for (y, spans) in rows {
        for (x0, x1) in spans {
            for x in x0..x1 {
                mask.put_pixel(x, y, Luma([255u8]));
            }
            PixelRect::include_span(&mut bbox, y, x0, x1);
        }
    }
    PolygonMask { mask, bbox }
}

/// Fill the polygon interior of `img` with a flat color, row-parallel.
pub fn fill_polygon(img: &mut RgbImage, points: &[Point], color: Rgb<u8>) {
    let width = img.width();
    let rows = polygon_rows(points, img.height());
    if rows.is_empty() || width == 0 {
        return;
    }
    let stride = width as usize * 3;
    let raw: &mut [u8] = img;
    raw.par_chunks_mut(stride)
        .enumerate()
        .skip(rows.start as usize)
        .take(rows.len())
        .for_each(|(y, row)| {
            for (x0, x1) in scanline_spans(points, y as u32, width) {
                for px in row[x0 as usize * 3..x1 as usize * 3].chunks_exact_mut(3) {
                    px.copy_from_slice(&color.0);
                }
            }
        });
}

// ============================================================================
// COLORS
// ============================================================================

/// Parse `#RRGGBB` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> Option<Rgb<u8>> {
    let hex = s.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

pub fn format_hex_color(c: Rgb<u8>) -> String {
    format!("#{:02X}{:02X}{:02X}", c[0], c[1], c[2])
}
