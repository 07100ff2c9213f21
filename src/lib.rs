//! Desk Occupancy Tracking Engine
//!
//! This crate turns per-frame object detections into a stable, per-zone
//! Occupied/Vacant signal for fixed physical zones (desks).
//!
//! # Architecture
//!
//! Each frame flows through five stages, leaf to root:
//!
//! 1. **Zone Registry**: immutable named polygons, loaded once per session.
//! 2. **Detection Sampler**: decides whether this frame runs the detector.
//! 3. **Spatial Assignment**: maps each tracked detection to at most one zone.
//! 4. **Temporal Hysteresis**: per-zone "last seen" memory smoothed over a window.
//! 5. **Status Log**: append-only, frame-indexed audit trail of every zone status.
//!
//! The engine is single-threaded and synchronous per frame. Frames must arrive
//! with contiguous indices starting at 0; detector failures degrade to a
//! skipped-detection frame instead of halting the stream.
//!
//! # Module Structure
//!
//! - `zone`: geometry and the zone registry
//! - `sampler`, `assign`, `hysteresis`, `status_log`: the per-frame stages
//! - `engine`: `OccupancyEngine`, which owns all per-session state
//! - `detect`: detector capability and backends
//! - `frame`, `ingest`, `annotate`: frame sources and sinks
//! - `storage`, `audit`: status persistence and hash-chain verification
//! - `config`: daemon configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub mod annotate;
pub mod assign;
pub mod audit;
pub mod config;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod hysteresis;
pub mod ingest;
pub mod sampler;
pub mod status_log;
pub mod storage;
pub mod zone;

pub use annotate::{draw_overlay, NullSink, TransitionLogSink};
#[cfg(feature = "annotate-jpeg")]
pub use annotate::SnapshotSink;
pub use assign::SpatialAssigner;
pub use audit::{hash_entry, verify_chain, ChainReport};
pub use config::{EngineConfig, OccupancyConfig};
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend, ReplayBackend};
pub use engine::{DetectionOutcome, EngineStats, FrameReport, OccupancyEngine, StatusTransition};
pub use frame::{Frame, FrameSink, FrameSource};
pub use hysteresis::ZoneRuntimeState;
pub use ingest::{FileConfig, FileSource, SyntheticSource};
pub use sampler::DetectionSampler;
pub use status_log::{FrameRecord, FrameStatusMap, StatusLog};
pub use storage::{
    FanoutSink, InMemoryStatusStore, JsonLogFile, RealtimeState, SqliteStatusStore, StatusSink,
};
pub use zone::{Point, Polygon, Zone, ZoneRegistry};

/// Position of a frame in the session's contiguous frame sequence.
pub type FrameIndex = u64;

// -------------------- Occupancy Status --------------------

/// Stabilized status of a single zone on a single frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OccupancyStatus {
    Vacant,
    Occupied,
}

impl OccupancyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OccupancyStatus::Vacant => "Vacant",
            OccupancyStatus::Occupied => "Occupied",
        }
    }

    pub fn is_occupied(self) -> bool {
        matches!(self, OccupancyStatus::Occupied)
    }
}

impl std::fmt::Display for OccupancyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Errors --------------------

/// Typed engine errors. These travel inside `anyhow::Error`; callers that need
/// to branch on the kind use `err.downcast_ref::<OccupancyError>()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OccupancyError {
    /// Malformed zone registry or engine parameters. Fatal at session start.
    Configuration(String),
    /// Detector failed or returned malformed data for one frame. Recovered locally.
    DetectionUnavailable {
        frame_index: FrameIndex,
        reason: String,
    },
    /// A frame index arrived that is not exactly one past the previous one.
    OutOfOrderFrame {
        expected: FrameIndex,
        received: FrameIndex,
    },
}

impl OccupancyError {
    pub fn configuration(message: impl Into<String>) -> Self {
        OccupancyError::Configuration(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            OccupancyError::Configuration(_) => "CONFIGURATION_ERROR",
            OccupancyError::DetectionUnavailable { .. } => "DETECTION_UNAVAILABLE",
            OccupancyError::OutOfOrderFrame { .. } => "OUT_OF_ORDER_FRAME",
        }
    }
}

impl std::fmt::Display for OccupancyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OccupancyError::Configuration(message) => write!(f, "{}: {}", self.code(), message),
            OccupancyError::DetectionUnavailable {
                frame_index,
                reason,
            } => write!(f, "{}: frame {}: {}", self.code(), frame_index, reason),
            OccupancyError::OutOfOrderFrame { expected, received } => write!(
                f,
                "{}: expected frame {}, received {}",
                self.code(),
                expected,
                received
            ),
        }
    }
}

impl std::error::Error for OccupancyError {}

// -------------------- Zone Name Discipline --------------------

/// Zone names are display labels ("Desk 1", "desk-a") and storage keys.
/// They must be non-empty, at most 64 characters, free of control characters,
/// and must not carry leading or trailing whitespace.
pub fn validate_zone_name(name: &str) -> Result<()> {
    static ZONE_NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[^\s\p{Cc}](?:[^\p{Cc}]{0,62}[^\s\p{Cc}])?$")
            .expect("zone name pattern is valid")
    });

    if !re.is_match(name) {
        return Err(anyhow!(OccupancyError::configuration(format!(
            "invalid zone name {:?}: must be 1..=64 printable characters without surrounding whitespace",
            name
        ))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_plain_strings() {
        let json = serde_json::to_string(&OccupancyStatus::Occupied).unwrap();
        assert_eq!(json, "\"Occupied\"");
        let parsed: OccupancyStatus = serde_json::from_str("\"Vacant\"").unwrap();
        assert_eq!(parsed, OccupancyStatus::Vacant);
        assert_eq!(OccupancyStatus::Vacant.to_string(), "Vacant");
    }

    #[test]
    fn zone_names_accept_desk_labels() {
        assert!(validate_zone_name("Desk 1").is_ok());
        assert!(validate_zone_name("desk-a_2").is_ok());
        assert!(validate_zone_name("A").is_ok());
    }

    #[test]
    fn zone_names_reject_blank_and_padded() {
        assert!(validate_zone_name("").is_err());
        assert!(validate_zone_name("   ").is_err());
        assert!(validate_zone_name(" Desk 1").is_err());
        assert!(validate_zone_name("Desk 1 ").is_err());
        assert!(validate_zone_name("Desk\n1").is_err());
        assert!(validate_zone_name(&"d".repeat(65)).is_err());
        assert!(validate_zone_name(&"d".repeat(64)).is_ok());
    }

    #[test]
    fn zone_name_error_is_configuration_kind() {
        let err = validate_zone_name("").unwrap_err();
        let kind = err.downcast_ref::<OccupancyError>().unwrap();
        assert_eq!(kind.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn error_display_carries_code() {
        let err = OccupancyError::OutOfOrderFrame {
            expected: 4,
            received: 6,
        };
        assert_eq!(
            err.to_string(),
            "OUT_OF_ORDER_FRAME: expected frame 4, received 6"
        );
    }
}
