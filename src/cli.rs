// ============================================================================
// RasterCut CLI: headless inspection, export and merge
// ============================================================================
//
// Usage examples:
//   rastercut info scans/*.tif
//   rastercut export -i scan.tif -p layout.json -o flat.tiff --grid --guides
//   rastercut merge -i a.png b.png c.png -o sheet.tiff --arrangement grid --spacing 10

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use crate::canvas::parse_hex_color;
use crate::io::{self, SaveOptions, TiffCompression};
use crate::ops::merge::{Arrangement, merge_images};
use crate::project::Project;
use crate::settings::EditorSettings;

/// RasterCut headless processor.
#[derive(Parser, Debug)]
#[command(
    name = "rastercut",
    about = "RasterCut headless raster tools",
    long_about = "Inspect large rasters, flatten a saved section layout onto its source\n\
                  image, or merge several images into one sheet, without a GUI."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Print per-file timing information.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print dimensions, megapixels and DPI of each input.
    Info {
        /// Input file(s). Glob patterns accepted.
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<String>,
    },
    /// Flatten a project's sections onto its source raster.
    Export(ExportArgs),
    /// Concatenate images horizontally, vertically or in a grid.
    Merge(MergeArgs),
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Source raster the project was made on.
    #[arg(short, long, value_name = "IMAGE")]
    pub input: PathBuf,

    /// Project file (JSON).
    #[arg(short, long, value_name = "PROJECT.json")]
    pub project: PathBuf,

    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Draw the centimetre grid.
    #[arg(long)]
    pub grid: bool,

    /// Draw the vertical guide lines.
    #[arg(long)]
    pub guides: bool,

    /// Draw the guide lines in their locked (confirmed) style; implies --guides.
    #[arg(long)]
    pub confirm_guides: bool,

    /// Settings file; defaults to the user's saved settings.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    #[command(flatten)]
    pub save: SaveArgs,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Input file(s). Glob patterns accepted.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// horizontal, vertical or grid.
    #[arg(short, long, default_value = "horizontal")]
    pub arrangement: Arrangement,

    /// Gap between images in pixels.
    #[arg(short, long, default_value_t = 0)]
    pub spacing: u32,

    /// Background colour as #RRGGBB.
    #[arg(long, default_value = "#FFFFFF")]
    pub background: String,

    #[command(flatten)]
    pub save: SaveArgs,
}

#[derive(Args, Debug)]
pub struct SaveArgs {
    /// TIFF compression mode: none, lzw, deflate.
    #[arg(long, default_value = "none", value_name = "MODE")]
    pub tiff_compression: TiffCompression,

    /// DPI written into TIFF output.
    #[arg(long)]
    pub dpi: Option<f64>,
}

impl SaveArgs {
    fn options(&self, fallback_dpi: Option<f64>) -> SaveOptions {
        SaveOptions {
            tiff_compression: self.tiff_compression,
            dpi: self.dpi.or(fallback_dpi),
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the requested command and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    let result = match &args.command {
        Command::Info { inputs } => run_info(inputs),
        Command::Export(export) => run_export(export),
        Command::Merge(merge) => run_merge(merge),
    };
    match result {
        Ok(()) => {
            if args.verbose {
                println!("done ({:.0}ms)", start.elapsed().as_secs_f64() * 1000.0);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            crate::log_err!("cli: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_info(patterns: &[String]) -> Result<(), String> {
    let inputs = resolve_inputs(patterns);
    if inputs.is_empty() {
        return Err("no input files matched the given pattern(s).".to_string());
    }
    let fallback = EditorSettings::load().dpi;
    let mut failures = 0;
    for path in &inputs {
        match io::load_raster(path) {
            Ok(raster) => {
                let dpi = io::read_dpi(path, fallback);
                println!(
                    "{}: {}x{} px, {:.1} MP, {:.0} DPI ({:?})",
                    path.display(),
                    raster.width(),
                    raster.height(),
                    raster.megapixels(),
                    dpi.dpi,
                    dpi.source
                );
            }
            Err(e) => {
                eprintln!("  error: {}: {}", path.display(), e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        Err(format!("{} of {} file(s) could not be read", failures, inputs.len()))
    } else {
        Ok(())
    }
}

fn run_export(args: &ExportArgs) -> Result<(), String> {
    let settings = match &args.settings {
        Some(path) => EditorSettings::load_from(path),
        None => EditorSettings::load(),
    };
    let mut project =
        Project::open(&args.input, settings).map_err(|e| format!("load failed: {}", e))?;
    let restored = project
        .load_project(&args.project)
        .map_err(|e| format!("project load failed: {}", e))?;
    if args.confirm_guides {
        project.set_show_guides(true);
        project.confirm_guides();
    }
    let overlays = project.export_options(args.grid, args.guides || args.confirm_guides);
    let flat = project.export(&overlays);
    let opts = args.save.options(Some(project.coords().dpi()));
    io::save_raster(&flat, &args.output, &opts).map_err(|e| format!("save failed: {}", e))?;
    println!(
        "{} section(s) -> {} ({}x{})",
        restored,
        args.output.display(),
        flat.width(),
        flat.height()
    );
    Ok(())
}

fn run_merge(args: &MergeArgs) -> Result<(), String> {
    let background = parse_hex_color(&args.background)
        .ok_or_else(|| format!("invalid background colour '{}'", args.background))?;
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        return Err("no input files matched the given pattern(s).".to_string());
    }
    let images = inputs
        .iter()
        .map(|p| {
            io::load_raster(p)
                .map(|r| r.image().clone())
                .map_err(|e| format!("{}: {}", p.display(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let merged = merge_images(&images, args.arrangement, args.spacing, background)
        .ok_or_else(|| "nothing to merge".to_string())?;
    io::save_raster(&merged, &args.output, &args.save.options(None))
        .map_err(|e| format!("save failed: {}", e))?;
    println!(
        "{} image(s) -> {} ({}x{})",
        images.len(),
        args.output.display(),
        merged.width(),
        merged.height()
    );
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn merge_command_parses() {
        let args = CliArgs::try_parse_from([
            "rastercut", "merge", "-i", "a.png", "b.png", "-o", "out.tiff", "--arrangement", "grid",
            "--spacing", "10", "--tiff-compression", "lzw",
        ])
        .unwrap();
        let Command::Merge(m) = args.command else { panic!("expected merge") };
        assert_eq!(m.input, vec!["a.png", "b.png"]);
        assert_eq!(m.arrangement, Arrangement::Grid);
        assert_eq!(m.spacing, 10);
        assert_eq!(m.save.tiff_compression, TiffCompression::Lzw);
    }

    #[test]
    fn export_command_parses_guide_flags() {
        let args = CliArgs::try_parse_from([
            "rastercut", "export", "-i", "scan.tif", "-p", "layout.json", "-o", "flat.tiff", "--grid",
            "--confirm-guides",
        ])
        .unwrap();
        let Command::Export(e) = args.command else { panic!("expected export") };
        assert!(e.grid);
        assert!(!e.guides);
        assert!(e.confirm_guides);
    }

    #[test]
    fn bad_arrangement_is_a_usage_error() {
        assert!(
            CliArgs::try_parse_from(["rastercut", "merge", "-i", "a.png", "-o", "o.png", "-a", "zigzag"])
                .is_err()
        );
    }

    #[test]
    fn globs_expand_and_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let literal = dir.path().join("a.png").to_string_lossy().into_owned();
        let pattern = dir.path().join("*.png").to_string_lossy().into_owned();
        let found = resolve_inputs(&[literal, pattern]);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().unwrap() == "png"));
    }

    #[test]
    fn merge_writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])).save(&a).unwrap();
        RgbImage::from_pixel(6, 2, Rgb([9, 9, 9])).save(&b).unwrap();
        let out = dir.path().join("sheet.png");
        let args = MergeArgs {
            input: vec![a.to_string_lossy().into_owned(), b.to_string_lossy().into_owned()],
            output: out.clone(),
            arrangement: Arrangement::Vertical,
            spacing: 2,
            background: "#FFFFFF".to_string(),
            save: SaveArgs { tiff_compression: TiffCompression::None, dpi: None },
        };
        run_merge(&args).unwrap();
        let merged = image::open(&out).unwrap().to_rgb8();
        assert_eq!(merged.dimensions(), (6, 8));
        assert_eq!(*merged.get_pixel(0, 0), Rgb([255, 255, 255]));
        assert_eq!(*merged.get_pixel(1, 0), Rgb([0, 0, 0]));
    }
}
