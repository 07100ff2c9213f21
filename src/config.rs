use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::assign::DEFAULT_TRACKED_CLASS;
use crate::OccupancyError;

const DEFAULT_ZONES_PATH: &str = "desk_roi_pos.json";
const DEFAULT_SOURCE_URL: &str = "stub://desks";
const DEFAULT_SOURCE_FPS: f64 = 30.0;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_BACKEND: &str = "replay";
const DEFAULT_INTERVAL_SECONDS: f64 = 1.0;
const DEFAULT_WINDOW_SECONDS: f64 = 10.0;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.1;
const DEFAULT_LOG_PATH: &str = "log.json";

/// Backends the daemon knows how to construct.
pub const KNOWN_BACKENDS: &[&str] = &["replay", "tract"];

// -------------------- Engine parameters --------------------

/// Resolved engine parameters, fixed for a session.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Run the detector on frames where `frame_index % interval == 0`.
    pub detection_interval_frames: u64,
    /// Frames a zone stays Occupied after its last confirmed detection.
    pub smoothing_window_frames: u64,
    pub tracked_class_label: String,
    /// Whether points exactly on a zone edge count as inside.
    pub point_in_polygon_inclusive_boundary: bool,
    /// Detections below this confidence never reach assignment.
    pub min_confidence: f32,
}

impl EngineConfig {
    /// Defaults relative to frame rate: detect once per second, hold for ten.
    pub fn from_fps(fps: f64) -> Result<Self> {
        Self::from_fps_and_seconds(fps, DEFAULT_INTERVAL_SECONDS, DEFAULT_WINDOW_SECONDS)
    }

    /// `interval = max(1, trunc(fps * interval_seconds))`,
    /// `window = trunc(fps * window_seconds)`.
    pub fn from_fps_and_seconds(
        fps: f64,
        interval_seconds: f64,
        window_seconds: f64,
    ) -> Result<Self> {
        check_positive("fps", fps)?;
        check_positive("interval_seconds", interval_seconds)?;
        if !window_seconds.is_finite() || window_seconds < 0.0 {
            return Err(anyhow!(OccupancyError::configuration(format!(
                "window_seconds must be a non-negative number, got {}",
                window_seconds
            ))));
        }
        Ok(Self {
            detection_interval_frames: frames_for(fps, interval_seconds).max(1),
            smoothing_window_frames: frames_for(fps, window_seconds),
            ..Self::default()
        })
    }

    pub fn with_detection_interval(mut self, frames: u64) -> Self {
        self.detection_interval_frames = frames;
        self
    }

    pub fn with_smoothing_window(mut self, frames: u64) -> Self {
        self.smoothing_window_frames = frames;
        self
    }

    pub fn with_tracked_class(mut self, label: impl Into<String>) -> Self {
        self.tracked_class_label = label.into();
        self
    }

    pub fn with_inclusive_boundary(mut self, inclusive: bool) -> Self {
        self.point_in_polygon_inclusive_boundary = inclusive;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.detection_interval_frames == 0 {
            return Err(anyhow!(OccupancyError::configuration(
                "detection_interval_frames must be >= 1"
            )));
        }
        if self.tracked_class_label.trim().is_empty() {
            return Err(anyhow!(OccupancyError::configuration(
                "tracked_class_label must not be empty"
            )));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!(OccupancyError::configuration(format!(
                "min_confidence must be within 0..=1, got {}",
                self.min_confidence
            ))));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    /// The 30 fps defaults: detect every 30 frames, hold for 300.
    fn default() -> Self {
        Self {
            detection_interval_frames: 30,
            smoothing_window_frames: 300,
            tracked_class_label: DEFAULT_TRACKED_CLASS.to_string(),
            point_in_polygon_inclusive_boundary: true,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

fn frames_for(fps: f64, seconds: f64) -> u64 {
    (fps * seconds).trunc() as u64
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!(OccupancyError::configuration(format!(
            "{} must be a positive number, got {}",
            name, value
        ))));
    }
    Ok(())
}

// -------------------- Daemon configuration --------------------

#[derive(Debug, Deserialize, Default)]
struct OccupancyConfigFile {
    zones_path: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    smoothing: Option<SmoothingConfigFile>,
    point_in_polygon_inclusive_boundary: Option<bool>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    fps: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    replay_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    interval_frames: Option<u64>,
    interval_seconds: Option<f64>,
    tracked_class_label: Option<String>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SmoothingConfigFile {
    window_frames: Option<u64>,
    window_seconds: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    log_path: Option<PathBuf>,
    db_path: Option<String>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OccupancyConfig {
    pub zones_path: PathBuf,
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub smoothing: SmoothingSettings,
    pub point_in_polygon_inclusive_boundary: bool,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub max_frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub backend: String,
    pub replay_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub interval_frames: Option<u64>,
    pub interval_seconds: f64,
    pub tracked_class_label: String,
    pub min_confidence: f32,
}

#[derive(Debug, Clone)]
pub struct SmoothingSettings {
    pub window_frames: Option<u64>,
    pub window_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub log_path: PathBuf,
    pub db_path: Option<String>,
    pub snapshot_dir: Option<PathBuf>,
}

impl OccupancyConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OCCUPANCY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OccupancyConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let smoothing = file.smoothing.unwrap_or_default();
        let output = file.output.unwrap_or_default();

        Self {
            zones_path: file
                .zones_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ZONES_PATH)),
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                fps: source.fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                max_frames: source.max_frames,
            },
            detection: DetectionSettings {
                backend: detection
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                replay_path: detection.replay_path,
                model_path: detection.model_path,
                interval_frames: detection.interval_frames,
                interval_seconds: detection
                    .interval_seconds
                    .unwrap_or(DEFAULT_INTERVAL_SECONDS),
                tracked_class_label: detection
                    .tracked_class_label
                    .unwrap_or_else(|| DEFAULT_TRACKED_CLASS.to_string()),
                min_confidence: detection.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            },
            smoothing: SmoothingSettings {
                window_frames: smoothing.window_frames,
                window_seconds: smoothing.window_seconds.unwrap_or(DEFAULT_WINDOW_SECONDS),
            },
            point_in_polygon_inclusive_boundary: file
                .point_in_polygon_inclusive_boundary
                .unwrap_or(true),
            output: OutputSettings {
                log_path: output
                    .log_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
                db_path: output.db_path,
                snapshot_dir: output.snapshot_dir,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("OCCUPANCY_ZONES_PATH") {
            self.zones_path = PathBuf::from(path);
        }
        if let Some(url) = env_string("OCCUPANCY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(fps) = env_string("OCCUPANCY_FPS") {
            self.source.fps = fps.parse().map_err(|_| {
                anyhow!(OccupancyError::configuration(
                    "OCCUPANCY_FPS must be a number"
                ))
            })?;
        }
        if let Some(interval) = env_string("OCCUPANCY_DETECTION_INTERVAL_FRAMES") {
            let frames: u64 = interval.parse().map_err(|_| {
                anyhow!(OccupancyError::configuration(
                    "OCCUPANCY_DETECTION_INTERVAL_FRAMES must be an integer number of frames"
                ))
            })?;
            self.detection.interval_frames = Some(frames);
        }
        if let Some(window) = env_string("OCCUPANCY_SMOOTHING_WINDOW_FRAMES") {
            let frames: u64 = window.parse().map_err(|_| {
                anyhow!(OccupancyError::configuration(
                    "OCCUPANCY_SMOOTHING_WINDOW_FRAMES must be an integer number of frames"
                ))
            })?;
            self.smoothing.window_frames = Some(frames);
        }
        if let Some(label) = env_string("OCCUPANCY_TRACKED_CLASS") {
            self.detection.tracked_class_label = label;
        }
        if let Some(path) = env_string("OCCUPANCY_LOG_PATH") {
            self.output.log_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("OCCUPANCY_DB_PATH") {
            self.output.db_path = Some(path);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detection.backend = self.detection.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detection.backend.as_str()) {
            return Err(anyhow!(OccupancyError::configuration(format!(
                "unknown detection backend {:?} (expected one of {})",
                self.detection.backend,
                KNOWN_BACKENDS.join(", ")
            ))));
        }
        if self.detection.backend == "tract" && self.detection.model_path.is_none() {
            return Err(anyhow!(OccupancyError::configuration(
                "detection.model_path is required for the tract backend"
            )));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(OccupancyError::configuration(
                "source width and height must be greater than zero"
            )));
        }
        self.engine_config()?.validate()
    }

    /// Resolve engine parameters. Explicit frame counts win over the
    /// fps-relative defaults.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = EngineConfig::from_fps_and_seconds(
            self.source.fps,
            self.detection.interval_seconds,
            self.smoothing.window_seconds,
        )?;
        if let Some(frames) = self.detection.interval_frames {
            engine.detection_interval_frames = frames;
        }
        if let Some(frames) = self.smoothing.window_frames {
            engine.smoothing_window_frames = frames;
        }
        Ok(engine
            .with_tracked_class(self.detection.tracked_class_label.clone())
            .with_min_confidence(self.detection.min_confidence)
            .with_inclusive_boundary(self.point_in_polygon_inclusive_boundary))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<OccupancyConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw).map_err(|e| {
        anyhow!(OccupancyError::configuration(format!(
            "invalid config file {}: {}",
            path.display(),
            e
        )))
    })?;
    Ok(cfg)
}
