//! Concatenate several rasters into one.

use std::str::FromStr;

use image::{Rgb, RgbImage, imageops};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Arrangement {
    /// Side by side, centred vertically.
    #[default]
    Horizontal,
    /// Stacked, centred horizontally.
    Vertical,
    /// `floor(sqrt(n))` columns of equal cells, each image centred in its cell.
    Grid,
}

impl FromStr for Arrangement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "horizontal" | "h" => Ok(Arrangement::Horizontal),
            "vertical" | "v" => Ok(Arrangement::Vertical),
            "grid" | "g" => Ok(Arrangement::Grid),
            other => Err(format!("Unknown arrangement '{}' (horizontal, vertical, grid)", other)),
        }
    }
}

/// Top-left offset of every image plus the canvas size.
pub fn layout(sizes: &[(u32, u32)], arrangement: Arrangement, spacing: u32) -> (Vec<(u32, u32)>, (u32, u32)) {
    if sizes.is_empty() {
        return (Vec::new(), (0, 0));
    }
    let n = sizes.len() as u32;
    let max_w = sizes.iter().map(|s| s.0).max().unwrap_or(0);
    let max_h = sizes.iter().map(|s| s.1).max().unwrap_or(0);
    let gaps = spacing * (n - 1);

    match arrangement {
        Arrangement::Horizontal => {
            let mut x = 0;
            let offsets = sizes
                .iter()
                .map(|&(w, h)| {
                    let at = (x, (max_h - h) / 2);
                    x += w + spacing;
                    at
                })
                .collect();
            (offsets, (sizes.iter().map(|s| s.0).sum::<u32>() + gaps, max_h))
        }
        Arrangement::Vertical => {
            let mut y = 0;
            let offsets = sizes
                .iter()
                .map(|&(w, h)| {
                    let at = ((max_w - w) / 2, y);
                    y += h + spacing;
                    at
                })
                .collect();
            (offsets, (max_w, sizes.iter().map(|s| s.1).sum::<u32>() + gaps))
        }
        Arrangement::Grid => {
            let cols = ((n as f64).sqrt() as u32).max(1);
            let rows = n.div_ceil(cols);
            let offsets = sizes
                .iter()
                .enumerate()
                .map(|(i, &(w, h))| {
                    let (row, col) = (i as u32 / cols, i as u32 % cols);
                    (
                        col * (max_w + spacing) + (max_w - w) / 2,
                        row * (max_h + spacing) + (max_h - h) / 2,
                    )
                })
                .collect();
            let size = (
                max_w * cols + spacing * (cols - 1),
                max_h * rows + spacing * (rows - 1),
            );
            (offsets, size)
        }
    }
}

/// Merge `images` onto a `background` canvas.  `None` for an empty input.
pub fn merge_images(
    images: &[RgbImage],
    arrangement: Arrangement,
    spacing: u32,
    background: Rgb<u8>,
) -> Option<RgbImage> {
    if images.is_empty() {
        return None;
    }
    let sizes: Vec<(u32, u32)> = images.iter().map(|i| i.dimensions()).collect();
    let (offsets, (w, h)) = layout(&sizes, arrangement, spacing);
    let mut merged = RgbImage::from_pixel(w, h, background);
    for (img, (x, y)) in images.iter().zip(offsets) {
        imageops::replace(&mut merged, img, x as i64, y as i64);
    }
    crate::log_info!(
        "merged {} images ({:?}) into {}x{}",
        images.len(),
        arrangement,
        w,
        h
    );
    Some(merged)
}
