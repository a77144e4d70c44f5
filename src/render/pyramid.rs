//! Downsampled copies of the working raster at a fixed set of factors.
//!
//! Levels are built on first request, tracked in recency order, and evicted
//! least-recently-used first once their estimated size (3 bytes per pixel)
//! exceeds the byte budget.  The whole cache is tied to one content version
//! of the working raster.

use std::sync::Arc;

use image::RgbImage;
use image::imageops::{self, FilterType};
use lru::LruCache;
use sysinfo::System;

use super::RenderError;
use crate::canvas::WorkingRaster;

/// Every factor a level can be built at.
pub const PYRAMID_FACTORS: [f64; 8] = [0.025, 0.05, 0.1, 0.2, 0.25, 0.5, 0.75, 1.0];

const GIB: u64 = 1024 * 1024 * 1024;

/// Pyramid factor to render a given display scale from.
pub fn select_level(scale: f64) -> f64 {
    if scale >= 1.0 {
        1.0
    } else if scale >= 0.5 {
        0.5
    } else if scale >= 0.25 {
        0.25
    } else if scale >= 0.1 {
        0.1
    } else {
        0.05
    }
}

/// Factors worth building ahead of time for an image of this size.
pub fn prewarm_factors(megapixels: f64) -> &'static [f64] {
    if megapixels > 50.0 {
        &[0.05, 0.1, 0.25, 0.5]
    } else if megapixels > 10.0 {
        &[0.1, 0.25, 0.5]
    } else {
        &[0.25, 0.5]
    }
}

/// min(total RAM / 4, 4 GiB).
pub fn default_budget() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    match sys.total_memory() {
        0 => GIB,
        total => (total / 4).min(4 * GIB),
    }
}

fn level_key(factor: f64) -> Option<u32> {
    PYRAMID_FACTORS
        .iter()
        .find(|f| (**f - factor).abs() < 1e-9)
        .map(|f| (f * 1000.0).round() as u32)
}

pub struct PyramidLevel {
    pub factor: f64,
    pub image: Arc<RgbImage>,
}

impl PyramidLevel {
    pub fn byte_size(&self) -> u64 {
        self.image.width() as u64 * self.image.height() as u64 * 3
    }
}

/// Resample `source` to `factor`.  The 1.0 level shares the source buffer.
pub(crate) fn build_level(source: &Arc<RgbImage>, factor: f64) -> Result<PyramidLevel, RenderError> {
    if level_key(factor).is_none() {
        return Err(RenderError::UnknownLevel(factor));
    }
    let (w, h) = source.dimensions();
    if w == 0 || h == 0 {
        return Err(RenderError::EmptySource);
    }
    if factor == 1.0 {
        return Ok(PyramidLevel { factor, image: Arc::clone(source) });
    }
    let nw = ((w as f64 * factor).round() as u32).max(1);
    let nh = ((h as f64 * factor).round() as u32).max(1);
    let image = imageops::resize(source.as_ref(), nw, nh, FilterType::Lanczos3);
    Ok(PyramidLevel { factor, image: Arc::new(image) })
}

pub struct PyramidCache {
    levels: LruCache<u32, Arc<PyramidLevel>>,
    /// Content version the resident levels were built from.
    version: Option<u64>,
    budget_bytes: u64,
    bytes: u64,
}

impl PyramidCache {
    pub fn new() -> Self {
        Self::with_budget(default_budget())
    }

    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            levels: LruCache::unbounded(),
            version: None,
            budget_bytes,
            bytes: 0,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget_bytes
    }

    /// Level at `factor`, building it from `working` on first request.
    pub fn get(&mut self, factor: f64, working: &WorkingRaster) -> Result<Arc<PyramidLevel>, RenderError> {
        let key = level_key(factor).ok_or(RenderError::UnknownLevel(factor))?;
        self.sync_version(working.version());
        if let Some(level) = self.levels.get(&key) {
            return Ok(Arc::clone(level));
        }

        let level = build_level(&working.shared(), factor)?;
        let bytes = level.byte_size();
        if bytes > self.budget_bytes {
            return Err(RenderError::OverBudget { bytes, budget: self.budget_bytes });
        }
        let level = Arc::new(level);
        self.insert(key, Arc::clone(&level));
        Ok(level)
    }

    /// Adopt a level built elsewhere (background pre-warm) from content
    /// version `built_from`.  Ignored when `working` has changed since.
    pub fn adopt(&mut self, built_from: u64, level: PyramidLevel, working: &WorkingRaster) -> bool {
        let Some(key) = level_key(level.factor) else { return false };
        if built_from != working.version() {
            return false;
        }
        self.sync_version(built_from);
        if level.byte_size() > self.budget_bytes || self.levels.contains(&key) {
            return false;
        }
        self.insert(key, Arc::new(level));
        true
    }

    fn insert(&mut self, key: u32, level: Arc<PyramidLevel>) {
        self.bytes += level.byte_size();
        if let Some(old) = self.levels.put(key, level) {
            self.bytes -= old.byte_size();
        }
        self.evict();
    }

    /// Drop least-recently-used levels until the estimate fits the budget.
    /// The most recent level is always kept.
    fn evict(&mut self) {
        while self.bytes > self.budget_bytes && self.levels.len() > 1 {
            match self.levels.pop_lru() {
                Some((_, level)) => self.bytes -= level.byte_size(),
                None => break,
            }
        }
    }

    fn sync_version(&mut self, version: u64) {
        if self.version != Some(version) {
            self.invalidate();
            self.version = Some(version);
        }
    }

    pub fn invalidate(&mut self) {
        self.levels.clear();
        self.bytes = 0;
        self.version = None;
    }

    pub fn contains(&self, factor: f64) -> bool {
        level_key(factor).is_some_and(|k| self.levels.contains(&k))
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.bytes
    }

    pub fn memory_mb(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0)
    }
}

impl Default for PyramidCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::SourceRaster;
    use image::Rgb;
    use proptest::prelude::*;

    fn working(w: u32, h: u32) -> (SourceRaster, WorkingRaster) {
        let src = SourceRaster::new(RgbImage::from_pixel(w, h, Rgb([90, 120, 150])));
        let wr = WorkingRaster::from_source(&src);
        (src, wr)
    }

    #[test]
    fn ladder_thresholds() {
        assert_eq!(select_level(2.0), 1.0);
        assert_eq!(select_level(1.0), 1.0);
        assert_eq!(select_level(0.75), 0.5);
        assert_eq!(select_level(0.5), 0.5);
        assert_eq!(select_level(0.3), 0.25);
        assert_eq!(select_level(0.1), 0.1);
        assert_eq!(select_level(0.09), 0.05);
        assert_eq!(select_level(0.0), 0.05);
    }

    #[test]
    fn full_level_shares_working_pixels() {
        let (_src, wr) = working(40, 20);
        let mut cache = PyramidCache::with_budget(GIB);
        let level = cache.get(1.0, &wr).unwrap();
        assert!(Arc::ptr_eq(&level.image, &wr.shared()));
    }

    #[test]
    fn levels_are_rounded_and_reused() {
        let (_src, wr) = working(1001, 333);
        let mut cache = PyramidCache::with_budget(GIB);
        let a = cache.get(0.1, &wr).unwrap();
        assert_eq!(a.image.dimensions(), (100, 33));
        let b = cache.get(0.1, &wr).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.memory_bytes(), 100 * 33 * 3);
    }

    #[test]
    fn unknown_factor_is_rejected() {
        let (_src, wr) = working(10, 10);
        let mut cache = PyramidCache::with_budget(GIB);
        assert_eq!(cache.get(0.3, &wr).err(), Some(RenderError::UnknownLevel(0.3)));
    }

    #[test]
    fn content_change_invalidates_levels() {
        let (_src, mut wr) = working(100, 100);
        let mut cache = PyramidCache::with_budget(GIB);
        let before = cache.get(0.5, &wr).unwrap();
        cache.get(0.25, &wr).unwrap();
        wr.punch_hole(&[(0.0, 0.0), (50.0, 0.0), (50.0, 50.0)], Rgb([255, 255, 255]));
        let after = cache.get(0.5, &wr).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn least_recently_used_level_is_evicted_over_budget() {
        let (_src, wr) = working(100, 100);
        // 0.5 → 50x50x3 = 7500 bytes, 0.25 → 25x25x3 = 1875 bytes.
        let mut cache = PyramidCache::with_budget(10_000);
        cache.get(0.5, &wr).unwrap();
        cache.get(0.25, &wr).unwrap();
        assert_eq!(cache.len(), 2);
        // Touch 0.5 so 0.25 becomes the eviction candidate.
        cache.get(0.5, &wr).unwrap();
        cache.get(0.2, &wr).unwrap(); // 20x20x3 = 1200 → total 10575
        assert!(cache.contains(0.5));
        assert!(!cache.contains(0.25));
        assert!(cache.contains(0.2));
        assert_eq!(cache.memory_bytes(), 7500 + 1200);
    }

    #[test]
    fn level_larger_than_budget_is_refused() {
        let (_src, wr) = working(100, 100);
        let mut cache = PyramidCache::with_budget(100);
        assert!(matches!(cache.get(1.0, &wr), Err(RenderError::OverBudget { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn prewarmed_levels_are_adopted_only_while_current() {
        let (_src, mut wr) = working(64, 64);
        let mut cache = PyramidCache::with_budget(GIB);
        let fresh = build_level(&wr.shared(), 0.25).unwrap();
        assert!(cache.adopt(wr.version(), fresh, &wr));
        assert!(cache.contains(0.25));

        let stale_version = wr.version();
        let stale = build_level(&wr.shared(), 0.5).unwrap();
        wr.punch_hole(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)], Rgb([0, 0, 0]));
        assert!(!cache.adopt(stale_version, stale, &wr));
        assert!(!cache.contains(0.5));
    }

    proptest! {
        #[test]
        fn selection_is_monotonic(a in 0.0f64..4.0, b in 0.0f64..4.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(select_level(lo) <= select_level(hi));
        }
    }
}
