//! occupancyd - desk occupancy daemon
//!
//! This daemon:
//! 1. Loads the zone registry and engine parameters from configuration
//! 2. Ingests frames from a local video file or a stub:// source
//! 3. Runs the configured detector on sampled frames
//! 4. Stabilizes per-zone occupancy and logs every transition
//! 5. Persists the status log to log.json and, optionally, SQLite
//!
//! Ctrl-C stops after the current frame and flushes everything.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use desk_occupancy::{
    config::OccupancyConfig, BackendRegistry, DetectorBackend, FanoutSink, FileConfig, FileSource,
    FrameSink, FrameSource, JsonLogFile, OccupancyEngine, ReplayBackend, SqliteStatusStore,
    StatusSink, TransitionLogSink, ZoneRegistry,
};

const FLUSH_EVERY: Duration = Duration::from_secs(1);
const HEALTH_EVERY: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = OccupancyConfig::load()?;
    let registry = ZoneRegistry::from_path(&cfg.zones_path)?;
    let engine_cfg = cfg.engine_config()?;

    let mut source = FileSource::new(FileConfig {
        path: cfg.source.url.clone(),
        fps: cfg.source.fps,
        width: cfg.source.width,
        height: cfg.source.height,
        max_frames: cfg.source.max_frames,
    })?;
    source.connect()?;
    if let Some(fps) = source.fps() {
        if (fps - cfg.source.fps).abs() > 0.5 {
            log::warn!(
                "source reports {:.2} fps but configuration says {:.2}; frame windows follow the configuration",
                fps,
                cfg.source.fps
            );
        }
    }

    let backends = build_backends(&cfg)?;
    log::info!("detector backends: {:?}", backends.list());
    let mut detector = backends
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    detector.warm_up()?;

    let mut frame_sinks: Vec<Box<dyn FrameSink>> = vec![Box::new(TransitionLogSink::default())];
    if let Some(dir) = &cfg.output.snapshot_dir {
        add_snapshot_sink(&mut frame_sinks, dir, &registry, engine_cfg.detection_interval_frames)?;
    }

    let mut status_sinks = FanoutSink::new().with(JsonLogFile::new(&cfg.output.log_path));
    if let Some(db_path) = &cfg.output.db_path {
        status_sinks.push(Box::new(SqliteStatusStore::open(db_path)?));
        log::info!("persisting zone status to {}", db_path);
    }

    let mut engine = OccupancyEngine::new(registry, engine_cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    log::info!(
        "occupancyd running: source={} backend={} log={}",
        cfg.source.url,
        detector.name(),
        cfg.output.log_path.display()
    );

    let mut last_flush = Instant::now();
    let mut last_health_log = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let Some(frame) = source.next_frame()? else {
            log::info!("source exhausted");
            break;
        };
        let report = engine.process_frame(&frame, &mut detector)?;
        for sink in frame_sinks.iter_mut() {
            if let Err(e) = sink.write(&frame, &report) {
                log::error!("frame sink failed on frame {}: {:#}", report.frame_index, e);
            }
        }

        if last_flush.elapsed() >= FLUSH_EVERY {
            // Unflushed records stay pending and go out on the next attempt.
            if let Err(e) = engine.flush_log(&mut status_sinks) {
                log::error!(
                    "status flush failed ({} records pending): {:#}",
                    engine.log().pending().len(),
                    e
                );
            }
            last_flush = Instant::now();
        }

        if last_health_log.elapsed() >= HEALTH_EVERY {
            let stats = engine.stats();
            log::info!(
                "source health={} frames={} detections={} unavailable={} occupied={}/{}",
                source.is_healthy(),
                stats.frames_processed,
                stats.detection_passes,
                stats.detection_unavailable,
                engine.statuses().occupied_count(),
                engine.statuses().len()
            );
            last_health_log = Instant::now();
        }
    }

    if stop.load(Ordering::SeqCst) {
        log::info!("stop requested, flushing");
    }
    let flushed = engine.flush_log(&mut status_sinks);
    if let Err(e) = &flushed {
        log::error!("final status flush failed: {:#}", e);
    }
    let finished = status_sinks.finish();
    for sink in frame_sinks.iter_mut() {
        if let Err(e) = sink.finish() {
            log::error!("frame sink failed to finish: {:#}", e);
        }
    }

    let stats = engine.stats();
    log::info!(
        "occupancyd stopped: frames={} detection_passes={} unavailable={} assigned={}",
        stats.frames_processed,
        stats.detection_passes,
        stats.detection_unavailable,
        stats.detections_assigned
    );
    flushed?;
    finished
}

fn build_backends(cfg: &OccupancyConfig) -> Result<BackendRegistry> {
    let mut backends = BackendRegistry::new();
    let replay = match &cfg.detection.replay_path {
        Some(path) => ReplayBackend::from_path(path)?,
        None => ReplayBackend::new(),
    };
    if cfg.detection.backend == "replay" && replay.is_empty() {
        log::warn!("replay backend has no scripted detections; every zone will stay Vacant");
    }
    backends.register(replay);

    if cfg.detection.backend == "tract" {
        register_tract(&mut backends, cfg)?;
    }
    backends.set_default(&cfg.detection.backend)?;
    Ok(backends)
}

#[cfg(feature = "backend-tract")]
fn register_tract(backends: &mut BackendRegistry, cfg: &OccupancyConfig) -> Result<()> {
    let model_path = cfg
        .detection
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detection.model_path is required for the tract backend"))?;
    let backend = desk_occupancy::detect::TractBackend::new(model_path, 640, 640)?
        .with_threshold(cfg.detection.min_confidence);
    backends.register(backend);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_backends: &mut BackendRegistry, _cfg: &OccupancyConfig) -> Result<()> {
    Err(anyhow!(
        "the tract detector requires building with the backend-tract feature"
    ))
}

#[cfg(feature = "annotate-jpeg")]
fn add_snapshot_sink(
    sinks: &mut Vec<Box<dyn FrameSink>>,
    dir: &std::path::Path,
    registry: &ZoneRegistry,
    every_frames: u64,
) -> Result<()> {
    let sink = desk_occupancy::SnapshotSink::new(dir, registry.zones().to_vec(), every_frames)?;
    sinks.push(Box::new(sink));
    log::info!("writing annotated snapshots to {}", dir.display());
    Ok(())
}

#[cfg(not(feature = "annotate-jpeg"))]
fn add_snapshot_sink(
    _sinks: &mut Vec<Box<dyn FrameSink>>,
    dir: &std::path::Path,
    _registry: &ZoneRegistry,
    _every_frames: u64,
) -> Result<()> {
    log::warn!(
        "snapshot_dir {} ignored: built without the annotate-jpeg feature",
        dir.display()
    );
    Ok(())
}
