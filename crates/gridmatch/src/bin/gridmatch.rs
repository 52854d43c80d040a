//! gridmatch CLI: match detected blob centres to a grid, export calibration
//! views and undistort images.

use clap::{Args, Parser, Subcommand};
use gridmatch::io::load_models;
use gridmatch::{
    MatchGridConfig, MatchGridStage, RemapUndistorter, UndistortConfig, UndistortParams,
    Undistorter,
};
use gridmatch_core::{GrayImageView, ImageSize};
use log::{info, warn};
#[cfg(not(feature = "tracing"))]
use log::LevelFilter;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "gridmatch")]
#[command(about = "Infer a regular grid from blob centres and prepare camera calibration views")]
#[command(version)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit tracing spans as JSON lines (`tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match upstream rects to grid coordinates.
    Match(MatchArgs),

    /// Undistort an image with a prior calibration or explicit intrinsics.
    Undistort(UndistortArgs),
}

#[derive(Debug, Clone, Args)]
struct MatchArgs {
    /// JSON object of named upstream stage results.
    #[arg(long)]
    models: PathBuf,

    /// Stage config (JSON). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the upstream stage holding `rects`.
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    tolerance: Option<f32>,

    #[arg(long)]
    sep_x: Option<f32>,

    #[arg(long)]
    sep_y: Option<f32>,

    #[command(flatten)]
    size: SizeArgs,

    /// Where to write the report; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write the sampled calibration views (JSON).
    #[arg(long)]
    views: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct SizeArgs {
    /// Image width in pixels.
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Image height in pixels.
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Take the image size from this file.
    #[arg(long, conflicts_with_all = ["width", "height"])]
    image: Option<PathBuf>,
}

impl SizeArgs {
    fn resolve(&self) -> CliResult<Option<ImageSize>> {
        if let Some(path) = &self.image {
            let (w, h) = image::image_dimensions(path)
                .map_err(|e| -> CliError { format!("{}: {e}", path.display()).into() })?;
            return Ok(Some(ImageSize::new(w, h)));
        }
        Ok(self
            .width
            .zip(self.height)
            .map(|(w, h)| ImageSize::new(w, h)))
    }
}

#[derive(Debug, Clone, Args)]
struct UndistortArgs {
    /// Input image.
    #[arg(long)]
    image: PathBuf,

    /// Output image.
    #[arg(long)]
    out: PathBuf,

    /// JSON object of prior stage results.
    #[arg(long)]
    models: Option<PathBuf>,

    /// Stage whose `calibrate` object supplies the intrinsics.
    #[arg(long, default_value = "")]
    model: String,

    /// Nine row-major values, comma separated.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    camera_matrix: Option<Vec<f64>>,

    /// Four, five or eight values, comma separated.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    dist_coeffs: Option<Vec<f64>>,
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) -> CliResult<()> {
    let _ = tracing_log::LogTracer::init();
    gridmatch_core::init_tracing(cli.log_json);
    if cli.verbose || cli.quiet {
        warn!("--verbose/--quiet are ignored with tracing; set RUST_LOG instead");
    }
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) -> CliResult<()> {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    gridmatch_core::init_with_level(level)?;
    if cli.log_json {
        warn!("--log-json needs the `tracing` feature; using plain logs");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = init_logging(&cli).and_then(|()| match &cli.command {
        Commands::Match(args) => run_match(args),
        Commands::Undistort(args) => run_undistort(args),
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn write_or_print(json: &str, out: Option<&Path>) -> CliResult<()> {
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            info!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_match(args: &MatchArgs) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => MatchGridConfig::load_json(path)?,
        None => MatchGridConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(tolerance) = args.tolerance {
        config.params.tolerance = tolerance;
    }
    if let Some(sep_x) = args.sep_x {
        config.params.sep_x = sep_x;
    }
    if let Some(sep_y) = args.sep_y {
        config.params.sep_y = sep_y;
    }
    let size = args.size.resolve()?;
    let models = load_models(&args.models)?;
    let stage = MatchGridStage::new(config);

    let report = stage.run(&models, size);
    info!(
        "{} rects matched, {} pass conflicts",
        report.rects.len(),
        report.pass_conflicts
    );
    write_or_print(&serde_json::to_string_pretty(&report)?, args.out.as_deref())?;
    if !report.errors.is_empty() {
        return Err(report.errors.join("; ").into());
    }

    if let Some(path) = &args.views {
        let views = stage.sample_views(&models, size)?;
        info!("{} calibration views", views.len());
        std::fs::write(path, serde_json::to_string_pretty(&views)?)?;
    }
    Ok(())
}

fn run_undistort(args: &UndistortArgs) -> CliResult<()> {
    let models = match &args.models {
        Some(path) => load_models(path)?,
        None => Value::Object(Default::default()),
    };
    let src = image::open(&args.image)
        .map_err(|e| -> CliError { format!("{}: {e}", args.image.display()).into() })?
        .to_luma8();
    let (w, h) = src.dimensions();

    let config = UndistortConfig {
        model: args.model.clone(),
        camera_matrix: args.camera_matrix.clone(),
        dist_coeffs: args.dist_coeffs.clone(),
    };
    let params = UndistortParams::resolve(&config, &models, ImageSize::new(w, h))?;
    let view = GrayImageView {
        width: w as usize,
        height: h as usize,
        data: src.as_raw(),
    };
    let out = RemapUndistorter.undistort(&view, &params)?;
    let out = image::GrayImage::from_raw(w, h, out.data)
        .ok_or_else(|| -> CliError { "undistorted buffer has the wrong size".into() })?;
    out.save(&args.out)?;
    info!("wrote {}", args.out.display());
    Ok(())
}
