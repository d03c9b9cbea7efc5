//! roverpilot CLI — offline replay and inspection of the rover control core.

use clap::{Args, Parser, Subcommand};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use roverpilot::{
    DriveMode, Dropout, Pilot, PilotConfig, Rectifier, RoverState, StrategyKind,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "roverpilot")]
#[command(about = "Replay rover telemetry through the perception and decision core")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control core over a JSON-lines telemetry log.
    Replay(CliReplayArgs),

    /// Rectify and classify a single camera frame.
    Rectify(CliRectifyArgs),

    /// Print the effective configuration as JSON.
    ConfigInfo {
        /// Configuration file (JSON). Defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct CliReplayArgs {
    /// JSON-lines telemetry log, one record per tick.
    #[arg(long)]
    telemetry: PathBuf,

    /// Configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write one JSON command record per tick.
    #[arg(long)]
    out: PathBuf,

    /// Path to write the final world map (PNG, obstacle/sample/navigable as R/G/B).
    #[arg(long)]
    map_png: Option<PathBuf>,

    /// Directory to write per-tick vision images into.
    #[arg(long)]
    vision_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliRectifyArgs {
    /// Camera frame to rectify.
    #[arg(long)]
    image: PathBuf,

    /// Configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write the rectified frame (PNG).
    #[arg(long)]
    out: PathBuf,

    /// Path to write the classification masks (PNG, obstacle/sample/navigable as R/G/B).
    #[arg(long)]
    masks: Option<PathBuf>,
}

/// One telemetry sample. Missing fields are treated as sensor dropout.
#[derive(Debug, Clone, serde::Deserialize)]
struct TelemetryRecord {
    /// Camera frame path, relative to the telemetry log.
    image: Option<PathBuf>,
    pos: Option<[f64; 2]>,
    yaw: Option<f64>,
    pitch: Option<f64>,
    roll: Option<f64>,
    vel: Option<f64>,
    #[serde(default)]
    near_sample: bool,
    #[serde(default)]
    picking_up: bool,
}

/// Commands issued for one tick.
#[derive(Debug, Clone, serde::Serialize)]
struct CommandRecord {
    tick: usize,
    throttle: f64,
    brake: f64,
    steer: f64,
    send_pickup: bool,
    mode: DriveMode,
    stuck: bool,
    strategy: Option<StrategyKind>,
    dropout: Option<Dropout>,
    map_updated: bool,
    nav_count: usize,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay(args) => run_replay(&args),
        Commands::Rectify(args) => run_rectify(&args),
        Commands::ConfigInfo { config } => run_config_info(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<PilotConfig> {
    match path {
        Some(p) => {
            tracing::info!("Loading config: {}", p.display());
            Ok(PilotConfig::from_json_file(p)?)
        }
        None => Ok(PilotConfig::default()),
    }
}

// ── config-info ────────────────────────────────────────────────────────

fn run_config_info(path: Option<&Path>) -> CliResult<()> {
    let config = load_config(path)?;
    config.validate()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// ── rectify ────────────────────────────────────────────────────────────

fn run_rectify(args: &CliRectifyArgs) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    let rectifier = Rectifier::new(&config.camera)?;
    tracing::debug!("Camera-to-ground homography: {}", rectifier.homography());

    let frame = image::open(&args.image)
        .map_err(|e| -> CliError {
            format!("Failed to open image {}: {}", args.image.display(), e).into()
        })?
        .to_rgb8();
    let (w, h) = frame.dimensions();
    let rectified = rectifier.rectify(&frame).ok_or_else(|| -> CliError {
        let (cw, ch) = rectifier.dimensions();
        format!("image is {}x{}, camera expects {}x{}", w, h, cw, ch).into()
    })?;

    rectified.image.save(&args.out)?;
    tracing::info!("Rectified frame written to {}", args.out.display());

    let classified = roverpilot::classify::classify(&rectified, &config.classifier);
    let count = |m: &image::GrayImage| m.pixels().filter(|p| p[0] != 0).count();
    tracing::info!(
        "Classified: {} navigable, {} obstacle, {} sample pixels",
        count(&classified.navigable),
        count(&classified.obstacle),
        count(&classified.sample),
    );

    if let Some(ref masks) = args.masks {
        classified.vision_image().save(masks)?;
        tracing::info!("Masks written to {}", masks.display());
    }
    Ok(())
}

// ── replay ─────────────────────────────────────────────────────────────

/// Copy one record's telemetry into the rover state. Missing values become
/// NaN so the core reports a telemetry dropout.
fn apply_telemetry(rover: &mut RoverState, rec: &TelemetryRecord) {
    rover.pos = rec.pos.unwrap_or([f64::NAN; 2]);
    rover.yaw = rec.yaw.unwrap_or(f64::NAN);
    rover.pitch = rec.pitch.unwrap_or(f64::NAN);
    rover.roll = rec.roll.unwrap_or(f64::NAN);
    rover.vel = rec.vel.unwrap_or(f64::NAN);
    rover.near_sample = rec.near_sample;
    rover.picking_up = rec.picking_up;
    rover.send_pickup = false;
}

fn load_frame(base: &Path, rec: &TelemetryRecord) -> Option<image::RgbImage> {
    let rel = rec.image.as_ref()?;
    let path = base.join(rel);
    match image::open(&path) {
        Ok(img) => Some(img.to_rgb8()),
        Err(e) => {
            tracing::warn!("Failed to open frame {}: {}", path.display(), e);
            None
        }
    }
}

fn run_replay(args: &CliReplayArgs) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;
    let mut pilot = Pilot::new(config)?;

    let base = args
        .telemetry
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let reader = BufReader::new(std::fs::File::open(&args.telemetry).map_err(|e| -> CliError {
        format!("Failed to open telemetry {}: {}", args.telemetry.display(), e).into()
    })?);
    let mut out = BufWriter::new(std::fs::File::create(&args.out)?);

    if let Some(ref dir) = args.vision_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut rover = RoverState::default();
    let mut n_ticks = 0usize;
    let mut n_dropouts = 0usize;
    let mut n_stuck = 0usize;
    let mut n_pickups = 0usize;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: TelemetryRecord = serde_json::from_str(&line).map_err(|e| -> CliError {
            format!("{}:{}: {}", args.telemetry.display(), lineno + 1, e).into()
        })?;

        apply_telemetry(&mut rover, &rec);
        let frame = load_frame(&base, &rec);
        let report = pilot.tick(&mut rover, frame.as_ref())?;

        if let (Some(dir), Some(vision)) = (&args.vision_dir, &report.vision) {
            vision.save(dir.join(format!("vision_{:05}.png", n_ticks)))?;
        }

        let cmd = CommandRecord {
            tick: n_ticks,
            throttle: rover.throttle,
            brake: rover.brake,
            steer: rover.steer,
            send_pickup: rover.send_pickup,
            mode: rover.mode,
            stuck: report.stuck,
            strategy: report.strategy,
            dropout: report.dropout,
            map_updated: report.map_updated,
            nav_count: rover.nav.as_ref().map_or(0, |n| n.len()),
        };
        serde_json::to_writer(&mut out, &cmd)?;
        out.write_all(b"\n")?;

        n_ticks += 1;
        n_dropouts += usize::from(report.dropout.is_some());
        n_stuck += usize::from(report.stuck);
        n_pickups += usize::from(rover.send_pickup);
    }
    out.flush()?;

    tracing::info!(
        "Replayed {} ticks: {} dropouts, {} stuck, {} pickup requests",
        n_ticks,
        n_dropouts,
        n_stuck,
        n_pickups,
    );
    tracing::info!("Commands written to {}", args.out.display());

    if let Some(ref path) = args.map_png {
        pilot.map().to_rgb_image().save(path)?;
        tracing::info!("World map written to {}", path.display());
    }
    Ok(())
}
