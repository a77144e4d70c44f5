use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiff::encoder::compression::{Compression, Deflate, Lzw, Uncompressed};
use tiff::encoder::{Rational, TiffEncoder, colortype};
use tiff::tags::{ResolutionUnit, Tag};

use crate::canvas::{Point, SourceRaster, format_hex_color, parse_hex_color};

const CM_PER_INCH: f64 = 2.54;
const PROJECT_FORMAT_VERSION: u32 = 1;
/// How much of a JPEG file is scanned for the JFIF header.
const JFIF_SCAN_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum RasterIoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("project file error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid project: {0}")]
    InvalidProject(String),
}

// ============================================================================
// RASTER LOAD / SAVE
// ============================================================================

/// Decode `path` into an RGB raster.  The decoder's allocation and dimension
/// limits are switched off so arbitrarily large scans load.
pub fn load_raster(path: &Path) -> Result<SourceRaster, RasterIoError> {
    let mut reader = image::io::Reader::open(path)?.with_guessed_format()?;
    reader.no_limits();
    let img = reader.decode()?.to_rgb8();
    crate::log_info!(
        "Loaded {} ({}x{}, {:.1} MP)",
        path.display(),
        img.width(),
        img.height(),
        img.width() as f64 * img.height() as f64 / 1_000_000.0
    );
    Ok(SourceRaster::new(img))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TiffCompression {
    #[default]
    None,
    Lzw,
    Deflate,
}

impl FromStr for TiffCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TiffCompression::None),
            "lzw" => Ok(TiffCompression::Lzw),
            "deflate" => Ok(TiffCompression::Deflate),
            other => Err(format!("Unknown TIFF compression '{}' (none, lzw, deflate)", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SaveOptions {
    pub tiff_compression: TiffCompression,
    /// Written into the TIFF resolution tags.  Other formats ignore it.
    pub dpi: Option<f64>,
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "tif" | "tiff"))
        .unwrap_or(false)
}

/// Encode `image` to `path`; the format follows the extension.
pub fn save_raster(image: &RgbImage, path: &Path, opts: &SaveOptions) -> Result<(), RasterIoError> {
    if is_tiff(path) {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut encoder = TiffEncoder::new(&mut writer)?;
        match opts.tiff_compression {
            TiffCompression::None => write_tiff(&mut encoder, image, Uncompressed, opts.dpi)?,
            TiffCompression::Lzw => write_tiff(&mut encoder, image, Lzw, opts.dpi)?,
            TiffCompression::Deflate => write_tiff(&mut encoder, image, Deflate::default(), opts.dpi)?,
        }
        writer.flush()?;
    } else {
        image.save(path)?;
    }
    crate::log_info!("Saved {}x{} raster to {}", image.width(), image.height(), path.display());
    Ok(())
}

fn write_tiff<W: Write + Seek, D: Compression>(
    encoder: &mut TiffEncoder<W>,
    image: &RgbImage,
    compression: D,
    dpi: Option<f64>,
) -> Result<(), RasterIoError> {
    let mut tiff_image = encoder.new_image_with_compression::<colortype::RGB8, D>(
        image.width(),
        image.height(),
        compression,
    )?;
    if let Some(dpi) = dpi.filter(|d| d.is_finite() && *d > 0.0) {
        // Hundredths of an inch keep fractional DPI values.
        tiff_image.resolution(
            ResolutionUnit::Inch,
            Rational { n: (dpi * 100.0).round() as u32, d: 100 },
        );
    }
    tiff_image.write_data(image.as_raw())?;
    Ok(())
}

// ============================================================================
// DPI METADATA
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DpiSource {
    TiffTags,
    PngPhys,
    JpegJfif,
    /// Nothing usable in the file.
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DpiInfo {
    pub dpi: f64,
    pub source: DpiSource,
}

/// Best-effort horizontal DPI of the file at `path`.  Missing, unreadable or
/// non-positive values yield `fallback`.
pub fn read_dpi(path: &Path, fallback: f64) -> DpiInfo {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let found = match ext.as_str() {
        "tif" | "tiff" => tiff_dpi(path).map(|d| (d, DpiSource::TiffTags)),
        "png" => png_dpi(path).map(|d| (d, DpiSource::PngPhys)),
        "jpg" | "jpeg" => jpeg_dpi(path).map(|d| (d, DpiSource::JpegJfif)),
        _ => None,
    };

    match found {
        Some((dpi, source)) if dpi.is_finite() && dpi > 0.0 => {
            crate::log_info!("DPI {:.1} read from {:?} of {}", dpi, source, path.display());
            DpiInfo { dpi, source }
        }
        _ => {
            crate::log_info!("No DPI metadata in {}; using {}", path.display(), fallback);
            DpiInfo { dpi: fallback, source: DpiSource::Fallback }
        }
    }
}

fn tiff_dpi(path: &Path) -> Option<f64> {
    let mut decoder = tiff::decoder::Decoder::new(BufReader::new(File::open(path).ok()?)).ok()?;
    let x_res = match decoder.find_tag(Tag::XResolution).ok()?? {
        tiff::decoder::ifd::Value::Rational(n, d) if d != 0 => n as f64 / d as f64,
        other => other.into_f64().ok()?,
    };
    // 1 = no unit, 2 = inch (default), 3 = centimetre.
    let unit = decoder.find_tag_unsigned::<u16>(Tag::ResolutionUnit).ok().flatten().unwrap_or(2);
    match unit {
        2 => Some(x_res),
        3 => Some(x_res * CM_PER_INCH),
        _ => None,
    }
}

fn png_dpi(path: &Path) -> Option<f64> {
    let decoder = png::Decoder::new(BufReader::new(File::open(path).ok()?));
    let reader = decoder.read_info().ok()?;
    let dims = reader.info().pixel_dims?;
    match dims.unit {
        png::Unit::Meter => Some((dims.xppu as f64 * CM_PER_INCH / 100.0).round()),
        png::Unit::Unspecified => None,
    }
}

fn jpeg_dpi(path: &Path) -> Option<f64> {
    let mut head = Vec::new();
    File::open(path).ok()?.take(JFIF_SCAN_BYTES).read_to_end(&mut head).ok()?;
    jfif_density(&head)
}

/// DPI from the APP0 JFIF segment of a JPEG byte stream.
pub(crate) fn jfif_density(bytes: &[u8]) -> Option<f64> {
    if bytes.get(0..2)? != [0xFF, 0xD8].as_slice() {
        return None;
    }
    let mut at = 2;
    while at + 4 <= bytes.len() {
        if bytes[at] != 0xFF {
            return None;
        }
        let marker = bytes[at + 1];
        let len = u16::from_be_bytes([bytes[at + 2], bytes[at + 3]]) as usize;
        let body = bytes.get(at + 4..at + 2 + len)?;
        if marker == 0xE0 && body.len() >= 12 && &body[0..5] == b"JFIF\0" {
            let units = body[7];
            let x_density = u16::from_be_bytes([body[8], body[9]]) as f64;
            return match units {
                1 => Some(x_density),
                2 => Some(x_density * CM_PER_INCH),
                _ => None,
            };
        }
        // Start of scan: no more headers.
        if marker == 0xDA {
            return None;
        }
        at += 2 + len;
    }
    None
}

// ============================================================================
// PROJECT FILE
// ============================================================================

/// Geometry and colour of one section.  Bitmaps are not stored; they are
/// re-clipped from the source raster on restore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedSection {
    pub id: u64,
    pub position: Point,
    pub size: (f64, f64),
    pub boundary: Vec<Point>,
    /// `#RRGGBB`
    pub color: String,
    /// Boundary at creation time, before any move or resize.
    #[serde(default)]
    pub original_boundary: Vec<Point>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    #[serde(default = "default_version")]
    pub version: u32,
    pub image_scale: f64,
    #[serde(default = "default_dpi")]
    pub dpi: f64,
    pub sections: Vec<SavedSection>,
}

fn default_version() -> u32 {
    PROJECT_FORMAT_VERSION
}

fn default_dpi() -> f64 {
    crate::units::DEFAULT_DPI
}

impl ProjectFile {
    pub fn new(image_scale: f64, dpi: f64, sections: Vec<SavedSection>) -> Self {
        Self {
            version: PROJECT_FORMAT_VERSION,
            image_scale,
            dpi,
            sections,
        }
    }

    fn validate(&self) -> Result<(), RasterIoError> {
        if self.version > PROJECT_FORMAT_VERSION {
            return Err(RasterIoError::InvalidProject(format!(
                "format version {} is newer than {}",
                self.version, PROJECT_FORMAT_VERSION
            )));
        }
        if !(self.image_scale.is_finite() && self.image_scale > 0.0) {
            return Err(RasterIoError::InvalidProject(format!(
                "bad image_scale {}",
                self.image_scale
            )));
        }
        for (i, s) in self.sections.iter().enumerate() {
            if s.boundary.len() < 3 {
                return Err(RasterIoError::InvalidProject(format!(
                    "section {} has {} boundary points",
                    i + 1,
                    s.boundary.len()
                )));
            }
            if parse_hex_color(&s.color).is_none() {
                return Err(RasterIoError::InvalidProject(format!(
                    "section {} has bad colour '{}'",
                    i + 1,
                    s.color
                )));
            }
        }
        Ok(())
    }
}

impl SavedSection {
    pub fn color_rgb(&self) -> Option<image::Rgb<u8>> {
        parse_hex_color(&self.color)
    }

    pub fn from_parts(
        id: u64,
        position: Point,
        size: (f64, f64),
        boundary: Vec<Point>,
        color: image::Rgb<u8>,
        original_boundary: Vec<Point>,
    ) -> Self {
        Self {
            id,
            position,
            size,
            boundary,
            color: format_hex_color(color),
            original_boundary,
        }
    }
}

pub fn save_project(project: &ProjectFile, path: &Path) -> Result<(), RasterIoError> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, project)?;
    crate::log_info!(
        "Saved project with {} sections to {}",
        project.sections.len(),
        path.display()
    );
    Ok(())
}

pub fn load_project(path: &Path) -> Result<ProjectFile, RasterIoError> {
    let reader = BufReader::new(File::open(path)?);
    let project: ProjectFile = serde_json::from_reader(reader)?;
    project.validate()?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]))
    }

    #[test]
    fn png_round_trip_keeps_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        let img = gradient(40, 30);
        save_raster(&img, &path, &SaveOptions::default()).unwrap();
        let back = load_raster(&path).unwrap();
        assert_eq!(back.image(), &img);
    }

    #[test]
    fn compressed_tiff_round_trip_with_dpi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tiff");
        let img = gradient(64, 48);
        let opts = SaveOptions {
            tiff_compression: TiffCompression::Lzw,
            dpi: Some(600.0),
        };
        save_raster(&img, &path, &opts).unwrap();
        assert_eq!(load_raster(&path).unwrap().image(), &img);
        let info = read_dpi(&path, 300.0);
        assert_eq!(info.source, DpiSource::TiffTags);
        assert!((info.dpi - 600.0).abs() < 1e-9);
    }

    #[test]
    fn png_phys_chunk_is_read_in_inches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phys.png");
        let file = BufWriter::new(File::create(&path).unwrap());
        let mut encoder = png::Encoder::new(file, 2, 2);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: 11811,
            yppu: 11811,
            unit: png::Unit::Meter,
        }));
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0u8; 12]).unwrap();
        writer.finish().unwrap();

        let info = read_dpi(&path, 72.0);
        assert_eq!(info, DpiInfo { dpi: 300.0, source: DpiSource::PngPhys });
    }

    #[test]
    fn missing_metadata_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        save_raster(&gradient(4, 4), &path, &SaveOptions::default()).unwrap();
        assert_eq!(read_dpi(&path, 300.0).source, DpiSource::Fallback);
        assert_eq!(read_dpi(&dir.path().join("nothing.bmp"), 150.0).dpi, 150.0);
    }

    #[test]
    fn jfif_density_units() {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[1, 1, 1, 0x01, 0x2C, 0x01, 0x2C, 0, 0]);
        assert_eq!(jfif_density(&jpeg), Some(300.0));
        jpeg[13] = 2; // dots per cm
        assert!((jfif_density(&jpeg).unwrap() - 300.0 * 2.54).abs() < 1e-9);
        jpeg[13] = 0; // aspect ratio only
        assert_eq!(jfif_density(&jpeg), None);
        assert_eq!(jfif_density(&[0x89, 0x50]), None);
    }

    #[test]
    fn project_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let square = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let project = ProjectFile::new(
            0.5,
            600.0,
            vec![SavedSection::from_parts(
                3,
                (5.0, 6.0),
                (10.0, 10.0),
                square.clone(),
                Rgb([255, 0, 0]),
                square,
            )],
        );
        save_project(&project, &path).unwrap();
        let back = load_project(&path).unwrap();
        assert_eq!(back, project);
        assert_eq!(back.sections[0].color, "#FF0000");
    }

    #[test]
    fn invalid_projects_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r##"{"image_scale": 1.0, "sections": [{"id": 1, "position": [0, 0], "size": [1, 1], "boundary": [[0, 0], [1, 1]], "color": "#FF0000"}]}"##,
        )
        .unwrap();
        assert!(matches!(load_project(&path), Err(RasterIoError::InvalidProject(_))));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_project(&path), Err(RasterIoError::Json(_))));
    }

    #[test]
    fn compression_names_parse() {
        assert_eq!("LZW".parse::<TiffCompression>(), Ok(TiffCompression::Lzw));
        assert!("zip".parse::<TiffCompression>().is_err());
    }
}
