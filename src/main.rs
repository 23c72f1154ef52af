//! teleop-rec - Main Entry Point
//!
//! Command line front end for recording, browsing, replaying and checking
//! teleoperation episodes.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use teleop_rec::{
    analysis,
    config::{format_file_size, AppConfig},
    dataset,
    devices::{sim::simulated_rig, DeviceSet},
    episode::Metadata,
    transforms::FrameAlignment,
    types::Modality,
    DataCollector, FrameStore, ReplayEngine, ReplayFrame,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "teleop-rec", version, about = "Teleoperation episode recorder")]
struct Cli {
    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one episode from the simulated rig
    Record {
        /// Configuration file (.toml or .json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Recording length in seconds, warm-up included
        #[arg(long, default_value = "5.0")]
        duration: f64,

        /// Override the configured frame alignment (none, cw, ccw)
        #[arg(long)]
        alignment: Option<FrameAlignment>,

        /// Task description stored in the episode metadata
        #[arg(long)]
        task: Option<String>,

        /// Record without any devices attached
        #[arg(long, default_value_t = false)]
        no_devices: bool,

        /// Save into a new session directory
        #[arg(long, default_value_t = false)]
        session: bool,

        /// Explicit output file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// List episodes under a data directory
    List {
        /// Data directory (flat or session layout)
        #[arg(default_value = "./data")]
        dir: PathBuf,
    },

    /// Show array shapes and attributes of an episode
    Info { file: PathBuf },

    /// Replay an episode, printing each frame as it is due
    Replay {
        file: PathBuf,

        /// Speed multiplier (0.1-10)
        #[arg(long, default_value = "1.0")]
        speed: f64,

        /// Restart from the beginning at the end
        #[arg(long = "loop", default_value_t = false)]
        looping: bool,

        /// First frame to play
        #[arg(long, default_value_t = 0)]
        start: usize,
    },

    /// Print a timing report for an episode
    Analyze { file: PathBuf },

    /// Check which episodes can be exported for training
    Check { dir: PathBuf },
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "teleop-rec.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,teleop_rec=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir.as_deref());

    match cli.command {
        Command::Record {
            config,
            duration,
            alignment,
            task,
            no_devices,
            session,
            output,
        } => record(
            config.as_deref(),
            duration,
            alignment,
            task,
            no_devices,
            session,
            output,
        ),
        Command::List { dir } => list(&dir),
        Command::Info { file } => info(&file),
        Command::Replay {
            file,
            speed,
            looping,
            start,
        } => replay(&file, speed, looping, start),
        Command::Analyze { file } => {
            let episode = FrameStore::new().load(&file)?;
            println!("{}", file.display());
            print!("{}", analysis::analyze(&episode));
            Ok(())
        }
        Command::Check { dir } => check(&dir),
    }
}

#[allow(clippy::too_many_arguments)]
fn record(
    config_path: Option<&Path>,
    duration: f64,
    alignment: Option<FrameAlignment>,
    task: Option<String>,
    no_devices: bool,
    session: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if !(duration > 0.0 && duration.is_finite()) {
        bail!("--duration must be positive, got {}", duration);
    }

    let mut config = match config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(alignment) = alignment {
        config.collector.frame_alignment = alignment;
    }
    if session {
        let dir = FrameStore::create_session_dir(config.storage.resolved_save_dir())?;
        config.storage.save_dir = dir;
    }
    // Saved explicitly below so --output is honoured
    config.storage.auto_save = false;

    let devices = if no_devices {
        DeviceSet::new()
    } else {
        simulated_rig(&config)
    };
    let mut collector = DataCollector::new(devices, &config);
    for (modality, status) in collector.connect_devices() {
        tracing::info!("{}: {}", modality, status);
    }

    let mut metadata = Metadata::new();
    if let Some(task) = task {
        metadata.insert("task".to_string(), task.into());
    }
    if !collector.start_episode(metadata) {
        bail!("Failed to start episode");
    }

    let started = Instant::now();
    let mut last_report = Instant::now();
    let length = Duration::try_from_secs_f64(duration)
        .map_err(|e| anyhow::anyhow!("Invalid --duration {}: {}", duration, e))?;
    while started.elapsed() < length {
        if let Some(live) = collector.latest_frame(Duration::from_millis(100)) {
            tracing::debug!(
                "cycle {} warm-up={} camera={} pose={} force={}",
                live.cycle,
                live.warming_up,
                live.frame.has(Modality::Camera),
                live.frame.has(Modality::Pose),
                live.frame.has(Modality::Force)
            );
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            if let Some(stats) = collector.episode_stats() {
                if stats.warming_up {
                    tracing::info!(
                        "Warming up: {:.0}% ({:.1}s remaining)",
                        stats.warmup_progress * 100.0,
                        stats.warmup_remaining
                    );
                } else {
                    tracing::info!(
                        "Recording: {} frames, {} live frames dropped",
                        stats.num_frames,
                        stats.live_frames_dropped
                    );
                }
            }
        }
    }

    collector.stop_episode(Some(false));
    let path = collector.save_current_episode(output.as_deref())?;
    let frames = collector.with_episode(|e| e.len()).unwrap_or(0);
    collector.disconnect_devices();

    println!("Saved {} frames to {}", frames, path.display());
    Ok(())
}

fn list(dir: &Path) -> anyhow::Result<()> {
    let store = FrameStore::new();
    let groups = dataset::find_episodes(dir)?;
    if groups.is_empty() {
        println!("No episodes found in {}", dir.display());
        return Ok(());
    }

    for group in groups {
        println!("{} ({} episodes)", group.name, group.episodes.len());
        for path in group.episodes {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match store.info(&path) {
                Ok(info) => println!(
                    "  {:<32} {:>6} frames {:>8.2}s {:>6.1} fps {:>10}",
                    name,
                    info.num_frames(),
                    info.duration(),
                    info.fps(),
                    format_file_size(info.file_size)
                ),
                Err(e) => println!("  {:<32} unreadable: {}", name, e),
            }
        }
    }
    Ok(())
}

fn info(file: &Path) -> anyhow::Result<()> {
    let info = FrameStore::new().info(file)?;
    println!("{}", info.path.display());
    println!("Size:   {}", format_file_size(info.file_size));
    println!("Frames: {}", info.num_frames());
    println!("Arrays:");
    for (name, shape) in &info.shapes {
        println!("  {:<18} {:?}", name, shape);
    }
    println!("Attributes:");
    for (key, value) in &info.attributes {
        println!("  {:<18} {}", key, value);
    }
    Ok(())
}

fn print_frame(frame: &ReplayFrame, total: usize) {
    let f = &frame.frame;
    let mut line = format!("[{:>5}/{}] t={:.3}", frame.index, total, f.loop_timestamp);
    if let Some(state) = &f.state {
        let p = state.value;
        line.push_str(&format!(
            " pos=({:.3}, {:.3}, {:.3}) grip={:.2}",
            p[0], p[1], p[2], p[6]
        ));
    }
    if let Some(force) = &f.force {
        let w = force.value;
        line.push_str(&format!(" F=({:.2}, {:.2}, {:.2})", w[0], w[1], w[2]));
    }
    if let Some(image) = &f.image {
        let (h, w, _) = image.value.dim();
        line.push_str(&format!(" image={}x{}", w, h));
    }
    println!("{}", line);
}

fn replay(file: &Path, speed: f64, looping: bool, start: usize) -> anyhow::Result<()> {
    let mut engine = ReplayEngine::open(file, &FrameStore::new())?;
    let info = engine.info();
    println!(
        "{} frames, {:.2}s at {:.1} fps",
        info.total_frames, info.duration, info.fps
    );

    engine.set_speed(speed);
    engine.set_loop(looping);
    engine.seek(start);
    engine.play();

    while engine.is_playing() {
        match engine.update() {
            Some(frame) => print_frame(&frame, engine.total_frames()),
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }

    let (current, total, percent) = engine.progress();
    println!("Stopped at frame {}/{} ({:.0}%)", current + 1, total, percent);
    Ok(())
}

fn check(dir: &Path) -> anyhow::Result<()> {
    let scan = dataset::scan_for_export(dir, &FrameStore::new())?;
    for accepted in &scan.accepted {
        println!("ok    {} ({} frames)", accepted.path.display(), accepted.frames);
    }
    for skipped in &scan.skipped {
        println!("skip  {}: {}", skipped.path.display(), skipped.reason);
    }
    println!(
        "{} exportable ({} frames), {} skipped",
        scan.accepted.len(),
        scan.total_frames(),
        scan.skipped.len()
    );
    Ok(())
}
