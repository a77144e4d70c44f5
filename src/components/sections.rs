// ============================================================================
// SECTIONS: clipped regions lifted out of the source raster
// ============================================================================
//
// Each section owns a colorized RGBA crop, its current placement and the
// polygon used for hit-testing.  The store is the only writer of the working
// raster: creating a section punches its hole, removing one rebuilds every
// remaining hole from scratch.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use rayon::prelude::*;

use super::selection::CapturedSelection;
use crate::canvas::{PixelRect, Point, SourceRaster, WorkingRaster, scanline_spans};
use crate::units::CoordinateModel;

/// Offset applied to a duplicated section, in source pixels.
pub const DUPLICATE_OFFSET: f64 = 20.0;

#[derive(Clone, Debug)]
pub struct Section {
    pub id: u64,
    /// Colorized crop at the current size.
    pub image: Arc<RgbaImage>,
    /// Top-left corner in source-raster coordinates.  Never clamped.
    pub position: Point,
    pub size: (f64, f64),
    /// Hit-test polygon, kept in step with `position`.
    pub boundary: Vec<Point>,
    pub color: Rgb<u8>,
    /// Uniform scale relative to the original crop.
    pub scale: f64,
    pub original_image: Arc<RgbaImage>,
    pub original_boundary: Vec<Point>,
    pub original_bbox: PixelRect,
    pub original_size: (f64, f64),
}

impl Section {
    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.position.0 += dx;
        self.position.1 += dy;
        for p in &mut self.boundary {
            p.0 += dx;
            p.1 += dy;
        }
    }

    /// Scale uniformly relative to the original crop and place the result's
    /// top-left corner at `position`.
    pub fn apply_scale(&mut self, scale: f64, position: Point) {
        let origin = (self.original_bbox.x0 as f64, self.original_bbox.y0 as f64);
        self.scale = scale;
        self.position = position;
        self.size = (self.original_size.0 * scale, self.original_size.1 * scale);
        self.boundary = self
            .original_boundary
            .iter()
            .map(|p| {
                (
                    position.0 + (p.0 - origin.0) * scale,
                    position.1 + (p.1 - origin.1) * scale,
                )
            })
            .collect();
        self.image = Arc::new(self.scaled_image());
    }

    /// The original crop resampled to the current size (whole pixels, at
    /// least one).
    fn scaled_image(&self) -> RgbaImage {
        let w = (self.size.0.round() as u32).max(1);
        let h = (self.size.1.round() as u32).max(1);
        if (w, h) == self.original_image.dimensions() {
            return self.original_image.as_ref().clone();
        }
        imageops::resize(self.original_image.as_ref(), w, h, FilterType::Lanczos3)
    }

    /// `(x0, y0, x1, y1)` of the placed image.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.position.0,
            self.position.1,
            self.position.0 + self.size.0,
            self.position.1 + self.size.1,
        )
    }
}

/// Blend `color` at `alpha`/255 over `src`.
fn blend(src: [u8; 3], color: Rgb<u8>, alpha: u16) -> [u8; 3] {
    let mix = |s: u8, c: u8| ((s as u16 * (255 - alpha) + c as u16 * alpha + 127) / 255) as u8;
    [mix(src[0], color[0]), mix(src[1], color[1]), mix(src[2], color[2])]
}

/// Crop `bbox` out of `source` into RGBA.  Pixels for which `inside` holds
/// get the color overlay and full alpha; the rest are transparent.
fn clip_region<F>(source: &RgbImage, bbox: PixelRect, color: Rgb<u8>, opacity: f32, inside: F) -> RgbaImage
where
    F: Fn(u32, u32) -> bool + Sync,
{
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u16;
    let mut out = RgbaImage::new(bbox.width(), bbox.height());
    let stride = bbox.width() as usize * 4;
    if stride == 0 {
        return out;
    }
    let raw: &mut [u8] = &mut out;
    raw.par_chunks_mut(stride).enumerate().for_each(|(row, dst)| {
        let y = bbox.y0 + row as u32;
        for (i, px) in dst.chunks_exact_mut(4).enumerate() {
            let x = bbox.x0 + i as u32;
            if inside(x, y) {
                let rgb = blend(source.get_pixel(x, y).0, color, alpha);
                px.copy_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
            }
        }
    });
    out
}

/// Clip a polygon from `source` without a full-raster mask.
fn clip_polygon(
    source: &RgbImage,
    polygon: &[Point],
    bbox: PixelRect,
    color: Rgb<u8>,
    opacity: f32,
) -> RgbaImage {
    let rows: Vec<Vec<(u32, u32)>> = (bbox.y0..bbox.y1)
        .map(|y| scanline_spans(polygon, y, source.width()))
        .collect();
    clip_region(source, bbox, color, opacity, |x, y| {
        rows[(y - bbox.y0) as usize]
            .iter()
            .any(|&(a, b)| a <= x && x < b)
    })
}

/// Ordered set of sections plus the fill settings used for their holes.
#[derive(Clone, Debug)]
pub struct SectionStore {
    sections: Vec<Section>,
    next_id: u64,
    pub overlay_opacity: f32,
    pub hole_color: Rgb<u8>,
}

impl Default for SectionStore {
    fn default() -> Self {
        Self::new(0.3, Rgb([255, 255, 255]))
    }
}

impl SectionStore {
    pub fn new(overlay_opacity: f32, hole_color: Rgb<u8>) -> Self {
        Self {
            sections: Vec::new(),
            next_id: 0,
            overlay_opacity,
            hole_color,
        }
    }

    /// Lift a captured selection into a new section and punch its hole in
    /// `working`.  Returns the new section's index.
    pub fn create(
        &mut self,
        selection: CapturedSelection,
        color: Rgb<u8>,
        source: &SourceRaster,
        working: &mut WorkingRaster,
    ) -> usize {
        let CapturedSelection { path, bbox, mask } = selection;
        let crop = clip_region(source.image(), bbox, color, self.overlay_opacity, |x, y| {
            mask.contains(x, y)
        });
        let crop = Arc::new(crop);
        let size = (bbox.width() as f64, bbox.height() as f64);

        working.punch_hole(&path, self.hole_color);

        let id = self.next_id;
        self.next_id += 1;
        self.sections.push(Section {
            id,
            image: Arc::clone(&crop),
            position: (bbox.x0 as f64, bbox.y0 as f64),
            size,
            boundary: path.clone(),
            color,
            scale: 1.0,
            original_image: crop,
            original_boundary: path,
            original_bbox: bbox,
            original_size: size,
        });
        crate::log_info!(
            "section {} created: {}x{} at ({}, {})",
            id,
            bbox.width(),
            bbox.height(),
            bbox.x0,
            bbox.y0
        );
        self.sections.len() - 1
    }

    /// Delete the section at `index` and rebuild every remaining hole.
    pub fn remove(
        &mut self,
        index: usize,
        source: &SourceRaster,
        working: &mut WorkingRaster,
    ) -> Option<Section> {
        if index >= self.sections.len() {
            return None;
        }
        let removed = self.sections.remove(index);
        self.rebuild(source, working);
        Some(removed)
    }

    /// Remove the most recently created section.
    pub fn undo_last(&mut self, source: &SourceRaster, working: &mut WorkingRaster) -> Option<Section> {
        let removed = self.sections.pop()?;
        self.rebuild(source, working);
        Some(removed)
    }

    pub fn clear(&mut self, source: &SourceRaster, working: &mut WorkingRaster) {
        self.sections.clear();
        working.reset(source);
    }

    /// Reset `working` to the source and re-punch each section's hole at its
    /// original boundary, in creation order.
    pub fn rebuild(&self, source: &SourceRaster, working: &mut WorkingRaster) {
        working.reset(source);
        for section in &self.sections {
            working.punch_hole(&section.original_boundary, self.hole_color);
        }
    }

    /// Re-clip the section from `source` with a new overlay color, keeping
    /// its current size and placement.
    pub fn recolor(&mut self, index: usize, color: Rgb<u8>, source: &SourceRaster) -> bool {
        let opacity = self.overlay_opacity;
        let Some(section) = self.sections.get_mut(index) else { return false };
        let crop = clip_polygon(
            source.image(),
            &section.original_boundary,
            section.original_bbox,
            color,
            opacity,
        );
        section.color = color;
        section.original_image = Arc::new(crop);
        section.image = Arc::new(section.scaled_image());
        true
    }

    /// Copy a section, offset by [`DUPLICATE_OFFSET`].  The copy shares the
    /// original's hole; no new hole is punched.
    pub fn duplicate(&mut self, index: usize) -> Option<usize> {
        let mut copy = self.sections.get(index)?.clone();
        copy.id = self.next_id;
        self.next_id += 1;
        copy.translate(DUPLICATE_OFFSET, DUPLICATE_OFFSET);
        self.sections.push(copy);
        Some(self.sections.len() - 1)
    }

    /// Build a section directly from a polygon on `source` (project restore).
    pub fn create_from_polygon(
        &mut self,
        polygon: Vec<Point>,
        color: Rgb<u8>,
        source: &SourceRaster,
        working: &mut WorkingRaster,
    ) -> Option<usize> {
        if polygon.len() < 3 {
            return None;
        }
        let mask = crate::canvas::rasterize_polygon(&polygon, source.width(), source.height());
        let bbox = mask.bbox?;
        Some(self.create(CapturedSelection { path: polygon, bbox, mask }, color, source, working))
    }

    /// One line per section: size in pixels and centimetres, position.
    pub fn summary(&self, coords: &CoordinateModel) -> Vec<String> {
        self.sections
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "Section {}: {:.0}x{:.0} px ({:.2}x{:.2} cm) at ({:.0}, {:.0}) {}",
                    i + 1,
                    s.size.0,
                    s.size.1,
                    coords.pixels_to_unit(s.size.0),
                    coords.pixels_to_unit(s.size.1),
                    s.position.0,
                    s.position.1,
                    crate::canvas::format_hex_color(s.color),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Section> {
        self.sections.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Section> {
        self.sections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::selection::SelectionCapture;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    const GREY: Rgb<u8> = Rgb([100, 100, 100]);

    fn setup(w: u32, h: u32) -> (SourceRaster, WorkingRaster, SectionStore) {
        let source = SourceRaster::new(RgbImage::from_pixel(w, h, GREY));
        let working = WorkingRaster::from_source(&source);
        (source, working, SectionStore::default())
    }

    fn capture(points: &[Point], w: u32, h: u32) -> CapturedSelection {
        let mut sel = SelectionCapture::new();
        sel.begin(points[0]);
        for p in &points[1..] {
            sel.extend(*p);
        }
        sel.end(w, h).unwrap()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
        vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
    }

    #[test]
    fn overlay_is_thirty_percent_blend() {
        assert_eq!(blend([100, 100, 100], RED, 77), [147, 70, 70]);
        assert_eq!(blend([0, 0, 0], RED, 255), [255, 0, 0]);
    }

    #[test]
    fn create_records_snapshot_and_punches_hole() {
        let (source, mut working, mut store) = setup(100, 100);
        let idx = store.create(capture(&square(10.0, 20.0, 40.0, 60.0), 100, 100), RED, &source, &mut working);
        let s = store.get(idx).unwrap();
        assert_eq!(s.position, (10.0, 20.0));
        assert_eq!(s.size, (30.0, 40.0));
        assert_eq!(s.original_size, s.size);
        assert_eq!(s.image.dimensions(), (30, 40));
        assert_eq!(s.image.get_pixel(0, 0).0, [147, 70, 70, 255]);
        assert_eq!(*working.image().get_pixel(25, 30), WHITE);
        assert_eq!(*working.image().get_pixel(5, 5), GREY);
        assert_eq!(working.version(), 1);
    }

    #[test]
    fn pixels_outside_the_polygon_are_transparent() {
        let (source, mut working, mut store) = setup(50, 50);
        let tri = [(0.0, 0.0), (40.0, 0.0), (0.0, 40.0)];
        let idx = store.create(capture(&tri, 50, 50), RED, &source, &mut working);
        let s = store.get(idx).unwrap();
        assert_eq!(s.image.get_pixel(2, 2)[3], 255);
        assert_eq!(s.image.get_pixel(38, 38)[3], 0);
    }

    #[test]
    fn remove_rebuilds_from_original_boundaries() {
        let (source, mut working, mut store) = setup(100, 100);
        store.create(capture(&square(0.0, 0.0, 30.0, 30.0), 100, 100), RED, &source, &mut working);
        store.create(capture(&square(50.0, 50.0, 80.0, 80.0), 100, 100), RED, &source, &mut working);
        store.get_mut(1).unwrap().translate(-40.0, -40.0);

        store.remove(0, &source, &mut working).unwrap();
        assert_eq!(*working.image().get_pixel(15, 15), GREY);
        assert_eq!(*working.image().get_pixel(60, 60), WHITE);
        assert_eq!(store.len(), 1);
        assert!(store.remove(5, &source, &mut working).is_none());
    }

    #[test]
    fn undo_and_clear() {
        let (source, mut working, mut store) = setup(64, 64);
        store.create(capture(&square(0.0, 0.0, 10.0, 10.0), 64, 64), RED, &source, &mut working);
        store.create(capture(&square(20.0, 20.0, 30.0, 30.0), 64, 64), RED, &source, &mut working);
        let popped = store.undo_last(&source, &mut working).unwrap();
        assert_eq!(popped.id, 1);
        assert_eq!(*working.image().get_pixel(25, 25), GREY);
        assert_eq!(*working.image().get_pixel(5, 5), WHITE);

        store.clear(&source, &mut working);
        assert!(store.is_empty());
        assert_eq!(*working.image().get_pixel(5, 5), GREY);
        assert!(store.undo_last(&source, &mut working).is_none());
    }

    #[test]
    fn duplicate_is_offset_and_keeps_one_hole() {
        let (source, mut working, mut store) = setup(64, 64);
        store.create(capture(&square(0.0, 0.0, 10.0, 10.0), 64, 64), RED, &source, &mut working);
        let version = working.version();
        let copy = store.duplicate(0).unwrap();
        let s = store.get(copy).unwrap();
        assert_eq!(s.position, (20.0, 20.0));
        assert_eq!(s.boundary[0], (20.0, 20.0));
        assert_ne!(s.id, store.get(0).unwrap().id);
        assert_eq!(working.version(), version);
        assert!(store.duplicate(9).is_none());
    }

    #[test]
    fn recolor_rebuilds_crop_at_current_size() {
        let (source, mut working, mut store) = setup(64, 64);
        store.create(capture(&square(0.0, 0.0, 20.0, 20.0), 64, 64), RED, &source, &mut working);
        store.get_mut(0).unwrap().apply_scale(1.5, (5.0, 5.0));
        assert!(store.recolor(0, Rgb([0, 0, 255]), &source));
        let s = store.get(0).unwrap();
        assert_eq!(s.color, Rgb([0, 0, 255]));
        assert_eq!(s.original_image.get_pixel(3, 3).0, [70, 70, 147, 255]);
        assert_eq!(s.image.dimensions(), (30, 30));
        assert!(!store.recolor(3, RED, &source));
    }

    #[test]
    fn summary_reports_pixels_and_centimetres() {
        let (source, mut working, mut store) = setup(400, 400);
        store.create(capture(&square(0.0, 0.0, 300.0, 150.0), 400, 400), RED, &source, &mut working);
        let lines = store.summary(&CoordinateModel::new(300.0));
        assert_eq!(lines, vec!["Section 1: 300x150 px (2.54x1.27 cm) at (0, 0) #FF0000".to_string()]);
    }
}
