//! LRU cache of finished viewport bitmaps.
//!
//! A render is fully determined by the working raster's content version, the
//! display scale, the scroll offset and the viewport size.  Those six values
//! form the [`ViewportKey`]; repeated paints with the same key are served
//! straight from the cache.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use image::imageops::{self, FilterType};
use lru::LruCache;

use super::RenderError;
use super::pyramid::{PyramidCache, select_level};
use crate::canvas::WorkingRaster;

pub const DEFAULT_RENDER_CACHE_CAPACITY: usize = 8;

/// Per-axis ceiling for the full display size of the raster.
pub const MAX_DISPLAY_DIM: u32 = 32_000;

/// What the host wants to see: the raster at `scale`, scrolled so that canvas
/// pixel `(scroll_x, scroll_y)` sits at the viewport's top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub scale: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewportKey {
    pub content_version: u64,
    /// Scale in units of 1/10000.
    pub scale_e4: i64,
    pub scroll_x: i64,
    pub scroll_y: i64,
    pub viewport_w: u32,
    pub viewport_h: u32,
}

impl ViewportKey {
    pub fn new(content_version: u64, viewport: &Viewport) -> Self {
        Self {
            content_version,
            scale_e4: (viewport.scale * 10_000.0).round() as i64,
            scroll_x: viewport.scroll_x.round() as i64,
            scroll_y: viewport.scroll_y.round() as i64,
            viewport_w: viewport.width,
            viewport_h: viewport.height,
        }
    }
}

#[derive(Clone)]
pub struct RenderCacheEntry {
    pub bitmap: Arc<RgbImage>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    /// Pyramid factor the bitmap was resampled from (1.0 for the direct path).
    pub level: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Size of the whole raster at `scale`, clamped to `[1, MAX_DISPLAY_DIM]`.
pub fn display_size(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let axis = |v: u32| ((v as f64 * scale) as u32).clamp(1, MAX_DISPLAY_DIM);
    (axis(width), axis(height))
}

/// Resample the part of `source` visible through `viewport`.
///
/// `source` is the raster (or a pyramid level of it); its pixels are mapped
/// onto the full display size and only the visible window is resampled.
fn render_window(
    source: &RgbImage,
    raster_size: (u32, u32),
    viewport: &Viewport,
) -> Result<RgbImage, RenderError> {
    if !(viewport.scale.is_finite() && viewport.scale > 0.0) {
        return Err(RenderError::InvalidScale(viewport.scale));
    }
    let (sw, sh) = source.dimensions();
    if sw == 0 || sh == 0 || raster_size.0 == 0 || raster_size.1 == 0 {
        return Err(RenderError::EmptySource);
    }
    let (dw, dh) = display_size(raster_size.0, raster_size.1, viewport.scale);

    let vx0 = viewport.scroll_x.round().clamp(0.0, dw as f64) as u32;
    let vy0 = viewport.scroll_y.round().clamp(0.0, dh as f64) as u32;
    let vx1 = (vx0 + viewport.width).min(dw);
    let vy1 = (vy0 + viewport.height).min(dh);
    if vx1 <= vx0 || vy1 <= vy0 {
        return Ok(RgbImage::new(0, 0));
    }

    // Display → source pixel ratio per axis.
    let rx = sw as f64 / dw as f64;
    let ry = sh as f64 / dh as f64;
    let sx0 = ((vx0 as f64 * rx).floor() as u32).min(sw - 1);
    let sy0 = ((vy0 as f64 * ry).floor() as u32).min(sh - 1);
    let sx1 = ((vx1 as f64 * rx).ceil() as u32).clamp(sx0 + 1, sw);
    let sy1 = ((vy1 as f64 * ry).ceil() as u32).clamp(sy0 + 1, sh);

    let crop = imageops::crop_imm(source, sx0, sy0, sx1 - sx0, sy1 - sy0).to_image();
    let (out_w, out_h) = (vx1 - vx0, vy1 - vy0);
    if crop.dimensions() == (out_w, out_h) {
        return Ok(crop);
    }
    Ok(imageops::resize(&crop, out_w, out_h, FilterType::Triangle))
}

pub struct ViewportRenderCache {
    entries: LruCache<ViewportKey, RenderCacheEntry>,
    hits: u64,
    misses: u64,
}

impl ViewportRenderCache {
    /// Zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Bitmap for `viewport`, from the cache or freshly rendered.
    ///
    /// A miss renders from the pyramid level chosen for the viewport's scale.
    /// If that fails the window is resampled from the full working raster;
    /// the error is only returned when both paths fail.
    pub fn render(
        &mut self,
        viewport: &Viewport,
        working: &WorkingRaster,
        pyramid: &mut PyramidCache,
    ) -> Result<RenderCacheEntry, RenderError> {
        let key = ViewportKey::new(working.version(), viewport);
        if let Some(entry) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(entry.clone());
        }
        self.misses += 1;

        let raster_size = (working.width(), working.height());
        let factor = select_level(viewport.scale);
        let rendered = pyramid
            .get(factor, working)
            .and_then(|level| render_window(&level.image, raster_size, viewport))
            .map(|bitmap| (bitmap, factor))
            .or_else(|e| {
                crate::log_warn!("render: level {} failed ({}), resampling full raster", factor, e);
                render_window(working.image(), raster_size, viewport).map(|bitmap| (bitmap, 1.0))
            });

        let (bitmap, level) = rendered?;
        let entry = RenderCacheEntry {
            width: bitmap.width(),
            height: bitmap.height(),
            bitmap: Arc::new(bitmap),
            timestamp: Instant::now(),
            level,
        };
        self.entries.put(key, entry.clone());
        Ok(entry)
    }

    pub fn contains(&self, key: &ViewportKey) -> bool {
        self.entries.contains(key)
    }

    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
            capacity: self.capacity(),
        }
    }
}

impl Default for ViewportRenderCache {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::SourceRaster;
    use image::Rgb;

    fn raster(w: u32, h: u32) -> WorkingRaster {
        let mut img = RgbImage::new(w, h);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x % 256) as u8, (y % 256) as u8, 0]);
        }
        WorkingRaster::from_source(&SourceRaster::new(img))
    }

    fn view(scale: f64, scroll_x: f64) -> Viewport {
        Viewport { scale, scroll_x, scroll_y: 0.0, width: 64, height: 48 }
    }

    #[test]
    fn ninth_key_evicts_the_first() {
        let wr = raster(200, 200);
        let mut pyramid = PyramidCache::with_budget(1 << 30);
        let mut cache = ViewportRenderCache::new(8);
        let views: Vec<Viewport> = (0..9).map(|i| view(1.0, i as f64 * 10.0)).collect();
        for v in &views {
            cache.render(v, &wr, &mut pyramid).unwrap();
        }
        assert!(!cache.contains(&ViewportKey::new(wr.version(), &views[0])));
        for v in &views[1..] {
            assert!(cache.contains(&ViewportKey::new(wr.version(), v)));
        }
        assert_eq!(cache.stats().misses, 9);
        assert_eq!(cache.stats().entries, 8);
    }

    #[test]
    fn repeated_request_counts_a_hit() {
        let wr = raster(100, 100);
        let mut pyramid = PyramidCache::with_budget(1 << 30);
        let mut cache = ViewportRenderCache::new(8);
        let a = cache.render(&view(0.5, 0.0), &wr, &mut pyramid).unwrap();
        let b = cache.render(&view(0.5, 0.0), &wr, &mut pyramid).unwrap();
        assert!(Arc::ptr_eq(&a.bitmap, &b.bitmap));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn content_change_misses() {
        let mut wr = raster(100, 100);
        let mut pyramid = PyramidCache::with_budget(1 << 30);
        let mut cache = ViewportRenderCache::default();
        cache.render(&view(1.0, 0.0), &wr, &mut pyramid).unwrap();
        wr.punch_hole(&[(0.0, 0.0), (40.0, 0.0), (0.0, 40.0)], Rgb([255, 255, 255]));
        let entry = cache.render(&view(1.0, 0.0), &wr, &mut pyramid).unwrap();
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(*entry.bitmap.get_pixel(5, 5), Rgb([255, 255, 255]));
    }

    #[test]
    fn window_is_clipped_to_display_size() {
        let wr = raster(100, 80);
        let mut pyramid = PyramidCache::with_budget(1 << 30);
        let mut cache = ViewportRenderCache::default();
        // Display is 50x40; a 64x48 viewport scrolled by 10 sees 40x40.
        let entry = cache.render(&view(0.5, 10.0), &wr, &mut pyramid).unwrap();
        assert_eq!((entry.width, entry.height), (40, 40));
        assert_eq!(entry.level, 0.5);
    }

    #[test]
    fn full_scale_window_copies_pixels() {
        let wr = raster(300, 300);
        let mut pyramid = PyramidCache::with_budget(1 << 30);
        let mut cache = ViewportRenderCache::default();
        let entry = cache.render(&view(1.0, 100.0), &wr, &mut pyramid).unwrap();
        assert_eq!(*entry.bitmap.get_pixel(0, 0), Rgb([100, 0, 0]));
    }

    #[test]
    fn over_budget_pyramid_falls_back_to_direct_resample() {
        let wr = raster(100, 100);
        let mut pyramid = PyramidCache::with_budget(16);
        let mut cache = ViewportRenderCache::default();
        let entry = cache.render(&view(0.5, 0.0), &wr, &mut pyramid).unwrap();
        assert_eq!(entry.level, 1.0);
        assert_eq!((entry.width, entry.height), (50, 48));
        assert!(pyramid.is_empty());
    }

    #[test]
    fn invalid_scale_fails_both_paths() {
        let wr = raster(10, 10);
        let mut pyramid = PyramidCache::with_budget(1 << 30);
        let mut cache = ViewportRenderCache::default();
        let err = cache.render(&view(f64::NAN, 0.0), &wr, &mut pyramid).err();
        assert!(matches!(err, Some(RenderError::InvalidScale(_))));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn display_size_is_clamped() {
        assert_eq!(display_size(100_000, 10, 1.0), (MAX_DISPLAY_DIM, 10));
        assert_eq!(display_size(10, 10, 0.001), (1, 1));
    }
}
