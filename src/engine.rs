//! Per-frame orchestration.
//!
//! `OccupancyEngine` owns every piece of per-session state: the zone
//! registry, the per-zone runtime memory, and the status log. Each frame
//! runs, in order: ordering guard, sampling decision, detection (sampled
//! frames only), validation and class filtering, spatial assignment,
//! hysteresis for every zone, and a log append.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::assign::{AssignedDetection, SpatialAssigner};
use crate::config::EngineConfig;
use crate::detect::{Detection, DetectorBackend};
use crate::frame::Frame;
use crate::hysteresis::ZoneRuntimeState;
use crate::sampler::DetectionSampler;
use crate::status_log::{FrameStatusMap, StatusLog};
use crate::storage::StatusSink;
use crate::zone::ZoneRegistry;
use crate::{FrameIndex, OccupancyError, OccupancyStatus};

/// What the detector produced for one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    /// Not a sampled frame.
    Skipped,
    Detected(Vec<Detection>),
    /// The detector failed; the frame degrades to a skipped-detection frame.
    Unavailable(String),
}

/// A zone whose stabilized status changed on this frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusTransition {
    pub zone: String,
    pub from: OccupancyStatus,
    pub to: OccupancyStatus,
}

/// Everything a frame sink needs to render or report one processed frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame_index: FrameIndex,
    /// A detection pass ran and its results were assigned.
    pub detection_ran: bool,
    /// The frame was sampled but detection was unavailable.
    pub degraded: bool,
    pub statuses: FrameStatusMap,
    /// Detections confirmed inside a zone on this frame.
    pub assigned: Vec<AssignedDetection>,
    pub transitions: Vec<StatusTransition>,
}

/// Session counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames_processed: u64,
    /// Sampled frames whose detections were assigned.
    pub detection_passes: u64,
    /// Sampled frames where detection failed or returned malformed data.
    pub detection_unavailable: u64,
    pub detections_assigned: u64,
    pub detections_unassigned: u64,
}

pub struct OccupancyEngine {
    registry: ZoneRegistry,
    config: EngineConfig,
    sampler: DetectionSampler,
    assigner: SpatialAssigner,
    runtime: ZoneRuntimeState,
    log: StatusLog,
    current: FrameStatusMap,
    next_frame: FrameIndex,
    stats: EngineStats,
}

impl OccupancyEngine {
    pub fn new(registry: ZoneRegistry, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = registry.with_inclusive_boundary(config.point_in_polygon_inclusive_boundary);
        let sampler = DetectionSampler::new(config.detection_interval_frames)?;
        let assigner =
            SpatialAssigner::new(config.tracked_class_label.clone(), config.min_confidence);
        let runtime = ZoneRuntimeState::new(registry.len());
        let current = registry
            .names()
            .map(|name| (name, OccupancyStatus::Vacant))
            .collect();

        log::info!(
            "occupancy engine ready: {} zones, detect every {} frames, hold {} frames, tracking {:?}",
            registry.len(),
            config.detection_interval_frames,
            config.smoothing_window_frames,
            config.tracked_class_label
        );

        Ok(Self {
            registry,
            config,
            sampler,
            assigner,
            runtime,
            log: StatusLog::new(),
            current,
            next_frame: 0,
            stats: EngineStats::default(),
        })
    }

    /// Process one frame, calling `detector` only when the frame is sampled.
    ///
    /// A detector error does not fail the frame; it is logged and the frame is
    /// treated as a skipped-detection frame. Only an out-of-order frame index
    /// is an error, and it leaves the engine untouched.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detector: &mut dyn DetectorBackend,
    ) -> Result<FrameReport> {
        let frame_index = frame.index();
        self.check_order(frame_index)?;

        let outcome = if self.sampler.should_detect(frame_index) {
            match detector.detect(frame) {
                Ok(detections) => DetectionOutcome::Detected(detections),
                Err(e) => DetectionOutcome::Unavailable(format!("{}: {:#}", detector.name(), e)),
            }
        } else {
            DetectionOutcome::Skipped
        };
        self.step(frame_index, outcome)
    }

    /// Same step as `process_frame` with the detection result supplied by the
    /// caller. Detections for frames the sampler skips are ignored.
    pub fn observe(
        &mut self,
        frame_index: FrameIndex,
        outcome: DetectionOutcome,
    ) -> Result<FrameReport> {
        self.check_order(frame_index)?;
        let outcome = if self.sampler.should_detect(frame_index) {
            outcome
        } else {
            if !matches!(outcome, DetectionOutcome::Skipped) {
                log::debug!("frame {}: not sampled, ignoring detection result", frame_index);
            }
            DetectionOutcome::Skipped
        };
        self.step(frame_index, outcome)
    }

    /// Malformed data in the tracked class voids the pass. Other classes are
    /// discarded before assignment, so their boxes are never inspected.
    fn validate_tracked(&self, detections: &[Detection]) -> Result<()> {
        let tracked = self.assigner.tracked_class_label();
        for (i, detection) in detections.iter().enumerate() {
            if detection.label != tracked {
                continue;
            }
            detection
                .validate()
                .map_err(|e| anyhow!("detection {} ({}): {}", i, detection.label, e))?;
        }
        Ok(())
    }

    fn check_order(&self, frame_index: FrameIndex) -> Result<()> {
        if frame_index != self.next_frame {
            return Err(anyhow!(OccupancyError::OutOfOrderFrame {
                expected: self.next_frame,
                received: frame_index,
            }));
        }
        Ok(())
    }

    fn step(
        &mut self,
        frame_index: FrameIndex,
        outcome: DetectionOutcome,
    ) -> Result<FrameReport> {
        let mut detection_ran = false;
        let mut degraded = false;
        let mut assigned = Vec::new();

        match outcome {
            DetectionOutcome::Skipped => {}
            DetectionOutcome::Detected(detections) => match self.validate_tracked(&detections) {
                Ok(()) => {
                    let assignment = self.assigner.assign(
                        &detections,
                        &self.registry,
                        &mut self.runtime,
                        frame_index,
                    );
                    detection_ran = true;
                    self.stats.detection_passes += 1;
                    self.stats.detections_assigned += assignment.matches.len() as u64;
                    self.stats.detections_unassigned += assignment.unassigned as u64;
                    assigned = assignment.matches;
                }
                Err(e) => {
                    self.detection_unavailable(frame_index, format!("{:#}", e));
                    degraded = true;
                }
            },
            DetectionOutcome::Unavailable(reason) => {
                self.detection_unavailable(frame_index, reason);
                degraded = true;
            }
        }

        let window = self.config.smoothing_window_frames;
        let mut statuses = FrameStatusMap::with_capacity(self.registry.len());
        let mut transitions = Vec::new();
        for (i, zone) in self.registry.zones().iter().enumerate() {
            let status = self.runtime.status(i, frame_index, window);
            let previous = self.current.get(&zone.name).unwrap_or(OccupancyStatus::Vacant);
            if previous != status {
                transitions.push(StatusTransition {
                    zone: zone.name.clone(),
                    from: previous,
                    to: status,
                });
            }
            statuses.insert(zone.name.clone(), status);
        }

        self.log.record(frame_index, statuses.clone())?;
        self.current = statuses.clone();
        self.next_frame = frame_index + 1;
        self.stats.frames_processed += 1;

        Ok(FrameReport {
            frame_index,
            detection_ran,
            degraded,
            statuses,
            assigned,
            transitions,
        })
    }

    fn detection_unavailable(&mut self, frame_index: FrameIndex, reason: String) {
        let err = OccupancyError::DetectionUnavailable {
            frame_index,
            reason,
        };
        log::warn!("{}", err);
        self.stats.detection_unavailable += 1;
    }

    /// Latest stabilized status of every zone, in registry order. All zones
    /// are Vacant before the first frame.
    pub fn statuses(&self) -> &FrameStatusMap {
        &self.current
    }

    pub fn status_of(&self, zone: &str) -> Option<OccupancyStatus> {
        self.current.get(zone)
    }

    pub fn log(&self) -> &StatusLog {
        &self.log
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// The only frame index the engine will accept next.
    pub fn next_frame_index(&self) -> FrameIndex {
        self.next_frame
    }

    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runtime_state(&self) -> &ZoneRuntimeState {
        &self.runtime
    }

    /// Push log records not yet flushed to `sink`.
    pub fn flush_log(&mut self, sink: &mut dyn StatusSink) -> Result<usize> {
        self.log.flush(sink)
    }
}
