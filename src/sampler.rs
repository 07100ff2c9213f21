//! Detection sampling.
//!
//! Detection is the dominant per-frame cost, so it runs only every
//! `interval` frames. Frames in between skip spatial assignment and rely on
//! hysteresis to carry zone state across the gap.

use anyhow::{anyhow, Result};

use crate::{FrameIndex, OccupancyError};

/// `frame_index mod interval == 0`. `interval` must be at least 1.
pub fn should_detect(frame_index: FrameIndex, interval: u64) -> bool {
    interval != 0 && frame_index % interval == 0
}

/// Fixed-cadence detection sampler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DetectionSampler {
    interval: u64,
}

impl DetectionSampler {
    pub fn new(interval: u64) -> Result<Self> {
        if interval == 0 {
            return Err(anyhow!(OccupancyError::configuration(
                "detection_interval_frames must be >= 1"
            )));
        }
        Ok(Self { interval })
    }

    /// Detect on every frame.
    pub fn every_frame() -> Self {
        Self { interval: 1 }
    }

    /// Detect once per second of video, `max(1, trunc(fps))` frames apart.
    pub fn per_second(fps: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(anyhow!(OccupancyError::configuration(format!(
                "fps must be a positive number, got {}",
                fps
            ))));
        }
        Self::new((fps.trunc() as u64).max(1))
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn should_detect(&self, frame_index: FrameIndex) -> bool {
        should_detect(frame_index, self.interval)
    }
}
