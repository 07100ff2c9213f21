//! occupancy_replay - offline occupancy from recorded detections
//!
//! Replays a JSON Lines detection recording against a zone file and writes
//! the resulting status log, exactly as the daemon would have produced it.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use desk_occupancy::{
    EngineConfig, FanoutSink, Frame, JsonLogFile, OccupancyEngine, ReplayBackend,
    SqliteStatusStore, StatusSink, ZoneRegistry,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "occupancy_replay",
    about = "Compute desk occupancy from recorded detections"
)]
struct Args {
    /// Zone definition file ({"Desk 1": [[x, y], ...], ...})
    #[arg(long, value_name = "PATH")]
    zones: PathBuf,

    /// Detection recording (JSON Lines, one frame per line)
    #[arg(long, value_name = "PATH")]
    detections: PathBuf,

    /// Number of frames to replay (default: through the last recorded frame)
    #[arg(long)]
    frames: Option<u64>,

    /// Video frame rate used to derive the default interval and window
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Run detection every N frames (default: once per second)
    #[arg(long, value_name = "FRAMES")]
    interval: Option<u64>,

    /// Hold a zone Occupied for N frames after its last detection (default: ten seconds)
    #[arg(long, value_name = "FRAMES")]
    window: Option<u64>,

    /// Detection class that counts as an occupant
    #[arg(long, default_value = "person")]
    tracked_class: String,

    /// Ignore detections below this confidence
    #[arg(long, default_value_t = 0.1)]
    min_confidence: f32,

    /// Treat points on a zone edge as outside
    #[arg(long)]
    exclusive_boundary: bool,

    /// Output status log
    #[arg(long, default_value = "log.json")]
    out: PathBuf,

    /// Also persist statuses to this SQLite database
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let registry = {
        let _stage = ui.stage("Load zones");
        ZoneRegistry::from_path(&args.zones)?
    };
    let mut backend = {
        let _stage = ui.stage("Load detections");
        ReplayBackend::from_path(&args.detections)?
    };

    let frames = match (args.frames, backend.last_frame()) {
        (Some(frames), _) => frames,
        (None, Some(last)) => last + 1,
        (None, None) => return Err(anyhow!("detection recording is empty; pass --frames")),
    };

    let mut config = EngineConfig::from_fps(args.fps)?
        .with_tracked_class(args.tracked_class.clone())
        .with_min_confidence(args.min_confidence)
        .with_inclusive_boundary(!args.exclusive_boundary);
    if let Some(interval) = args.interval {
        config = config.with_detection_interval(interval);
    }
    if let Some(window) = args.window {
        config = config.with_smoothing_window(window);
    }
    let mut engine = OccupancyEngine::new(registry, config)?;

    {
        let _stage = ui.stage("Replay frames");
        let progress = ui.frames(frames);
        for index in 0..frames {
            let report = engine.process_frame(&Frame::blank(index, 1, 1), &mut backend)?;
            progress.advance(report.statuses.occupied_count(), report.statuses.len());
        }
        progress.finish();
    }

    {
        let _stage = ui.stage("Write status log");
        let mut sinks = FanoutSink::new().with(JsonLogFile::new(&args.out));
        if let Some(db) = &args.db {
            sinks.push(Box::new(SqliteStatusStore::open(db)?));
        }
        let flushed = engine.flush_log(&mut sinks);
        sinks.finish()?;
        flushed?;
    }

    let stats = engine.stats();
    println!("occupancy_replay: {} frames -> {}", frames, args.out.display());
    println!(
        "detection passes: {} ({} unavailable), detections assigned: {}, outside every zone: {}",
        stats.detection_passes,
        stats.detection_unavailable,
        stats.detections_assigned,
        stats.detections_unassigned
    );
    println!();
    println!("final status:");
    for (zone, status) in engine.statuses().iter() {
        println!("  {:<24} {}", zone, status);
    }
    Ok(())
}
