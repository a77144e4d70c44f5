// ============================================================================
// EXPORT: flatten working raster + sections + overlays into one bitmap
// ============================================================================

use image::{Rgb, RgbImage};
use rayon::prelude::*;

use crate::components::sections::SectionStore;

const GRID_MAJOR: Rgb<u8> = Rgb([100, 100, 100]);
const GRID_MINOR: Rgb<u8> = Rgb([180, 180, 180]);
const GUIDE_OPEN: Rgb<u8> = Rgb([255, 0, 0]);
const GUIDE_CONFIRMED: Rgb<u8> = Rgb([0, 255, 0]);
/// Cap on grid lines per axis.
const MAX_GRID_LINES: usize = 1000;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportOptions {
    pub include_sections: bool,
    /// Grid spacing in source pixels.
    pub grid_spacing_px: Option<f64>,
    /// X positions of vertical guide lines.
    pub guides: Vec<f64>,
    pub guides_confirmed: bool,
}

impl ExportOptions {
    pub fn sections_only() -> Self {
        Self {
            include_sections: true,
            ..Self::default()
        }
    }
}

/// Working raster with every section pasted at its current position, then
/// grid and guide overlays.  The result always has the working raster's size;
/// section pixels outside it are dropped.
pub fn flatten(working: &RgbImage, sections: &SectionStore, opts: &ExportOptions) -> RgbImage {
    let mut out = working.clone();
    if opts.include_sections {
        paste_sections(&mut out, sections);
    }
    if let Some(spacing) = opts.grid_spacing_px {
        draw_grid(&mut out, spacing);
    }
    if !opts.guides.is_empty() {
        draw_guides(&mut out, &opts.guides, opts.guides_confirmed);
    }
    out
}

fn paste_sections(out: &mut RgbImage, sections: &SectionStore) {
    let w = out.width();
    if w == 0 {
        return;
    }
    // (left, top, image) with integer placement.
    let placed: Vec<_> = sections
        .iter()
        .map(|s| (s.position.0.round() as i64, s.position.1.round() as i64, s.image.as_ref()))
        .collect();

    let raw: &mut [u8] = out;
    raw.par_chunks_mut(w as usize * 3).enumerate().for_each(|(y, row)| {
        let y = y as i64;
        for &(left, top, img) in &placed {
            let sy = y - top;
            if sy < 0 || sy >= img.height() as i64 {
                continue;
            }
            let x0 = left.max(0);
            let x1 = (left + img.width() as i64).min(w as i64);
            for x in x0..x1 {
                let src = img.get_pixel((x - left) as u32, sy as u32);
                let a = src[3] as u16;
                if a == 0 {
                    continue;
                }
                let px = &mut row[x as usize * 3..x as usize * 3 + 3];
                for c in 0..3 {
                    px[c] = ((src[c] as u16 * a + px[c] as u16 * (255 - a) + 127) / 255) as u8;
                }
            }
        }
    });
}

fn fill_rect(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    for y in y0.max(0)..y1.min(h) {
        for x in x0.max(0)..x1.min(w) {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Vertical line `width` pixels wide centred on `x`.
fn vline(img: &mut RgbImage, x: i64, width: i64, color: Rgb<u8>) {
    let left = x - (width - 1) / 2;
    let h = img.height() as i64;
    fill_rect(img, left, 0, left + width, h, color);
}

fn hline(img: &mut RgbImage, y: i64, width: i64, color: Rgb<u8>) {
    let top = y - (width - 1) / 2;
    let w = img.width() as i64;
    fill_rect(img, 0, top, w, top + width, color);
}

/// Grid starting at the origin; every fifth line is major (darker, twice as
/// thick).  Skipped when the spacing doesn't fit inside the raster.
pub fn draw_grid(img: &mut RgbImage, spacing: f64) {
    let (w, h) = img.dimensions();
    let min_side = w.min(h) as f64;
    if !(spacing > 0.0 && spacing < min_side) {
        return;
    }
    let base = ((min_side / 2000.0) as i64).max(1);
    let style = |i: usize| {
        if i % 5 == 0 {
            (base * 2, GRID_MAJOR)
        } else {
            (base, GRID_MINOR)
        }
    };

    for i in 0..MAX_GRID_LINES {
        let x = i as f64 * spacing;
        if x > w as f64 {
            break;
        }
        let (lw, color) = style(i);
        vline(img, x.round() as i64, lw, color);
    }
    for i in 0..MAX_GRID_LINES {
        let y = i as f64 * spacing;
        if y > h as f64 {
            break;
        }
        let (lw, color) = style(i);
        hline(img, y.round() as i64, lw, color);
    }
}

/// Full-height guide lines; green and at least 2 px once confirmed.
pub fn draw_guides(img: &mut RgbImage, positions: &[f64], confirmed: bool) {
    let (w, h) = img.dimensions();
    let mut width = ((w.min(h) as f64 / 1000.0) as i64).max(1);
    let color = if confirmed {
        width = width.max(2);
        GUIDE_CONFIRMED
    } else {
        GUIDE_OPEN
    };
    for &x in positions {
        let x = x.round() as i64;
        if (0..=w as i64).contains(&x) {
            vline(img, x, width, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{SourceRaster, WorkingRaster};
    use crate::components::selection::SelectionCapture;

    const BG: Rgb<u8> = Rgb([10, 10, 10]);
    const RED: Rgb<u8> = Rgb([255, 0, 0]);

    fn one_section(w: u32, h: u32, rect: (f64, f64, f64, f64)) -> (WorkingRaster, SectionStore) {
        let source = SourceRaster::new(RgbImage::from_pixel(w, h, BG));
        let mut working = WorkingRaster::from_source(&source);
        // Full opacity: section pixels are pure red.
        let mut store = SectionStore::new(1.0, Rgb([255, 255, 255]));
        let (x0, y0, x1, y1) = rect;
        let mut sel = SelectionCapture::new();
        sel.begin((x0, y0));
        sel.extend((x1, y0));
        sel.extend((x1, y1));
        sel.extend((x0, y1));
        store.create(sel.end(w, h).unwrap(), RED, &source, &mut working);
        (working, store)
    }

    #[test]
    fn sections_are_pasted_at_current_position() {
        let (working, mut store) = one_section(50, 50, (0.0, 0.0, 10.0, 10.0));
        store.get_mut(0).unwrap().translate(30.0, 30.0);
        let out = flatten(working.image(), &store, &ExportOptions::sections_only());
        assert_eq!(*out.get_pixel(35, 35), RED);
        assert_eq!(*out.get_pixel(5, 5), Rgb([255, 255, 255]));
    }

    #[test]
    fn sections_hanging_off_any_edge_are_clipped() {
        let (working, mut store) = one_section(50, 50, (0.0, 0.0, 20.0, 20.0));
        store.get_mut(0).unwrap().translate(-10.0, 40.0);
        let out = flatten(working.image(), &store, &ExportOptions::sections_only());
        assert_eq!(out.dimensions(), (50, 50));
        assert_eq!(*out.get_pixel(0, 45), RED);
        assert_eq!(*out.get_pixel(9, 49), RED);
        assert_eq!(*out.get_pixel(10, 45), BG);
    }

    #[test]
    fn sections_can_be_left_out() {
        let (working, mut store) = one_section(40, 40, (0.0, 0.0, 10.0, 10.0));
        store.get_mut(0).unwrap().translate(20.0, 20.0);
        let out = flatten(working.image(), &store, &ExportOptions::default());
        assert_eq!(*out.get_pixel(25, 25), BG);
        assert_eq!(out, *working.image());
    }

    #[test]
    fn grid_marks_major_and_minor_lines() {
        let mut img = RgbImage::from_pixel(100, 100, BG);
        draw_grid(&mut img, 10.0);
        // Line 0 is major and 2 px wide, line 1 is minor.
        assert_eq!(*img.get_pixel(0, 50), GRID_MAJOR);
        assert_eq!(*img.get_pixel(10, 55), GRID_MINOR);
        assert_eq!(*img.get_pixel(50, 3), GRID_MAJOR);
        assert_eq!(*img.get_pixel(5, 5), BG);
    }

    #[test]
    fn oversized_grid_is_skipped() {
        let mut img = RgbImage::from_pixel(30, 30, BG);
        draw_grid(&mut img, 30.0);
        assert!(img.pixels().all(|p| *p == BG));
    }

    #[test]
    fn guides_change_colour_when_confirmed() {
        let mut img = RgbImage::from_pixel(60, 20, BG);
        draw_guides(&mut img, &[20.0, 75.0], false);
        assert_eq!(*img.get_pixel(20, 10), GUIDE_OPEN);
        draw_guides(&mut img, &[40.0], true);
        assert_eq!(*img.get_pixel(40, 0), GUIDE_CONFIRMED);
        assert_eq!(*img.get_pixel(41, 0), GUIDE_CONFIRMED);
    }
}
