//! Frames and the frame I/O capabilities around the engine.
//!
//! - `Frame`: one decoded RGB24 image with its session frame index.
//! - `FrameSource`: sequential supplier of frames (video file, synthetic).
//! - `FrameSink`: consumer of processed frames plus their occupancy report.
//!
//! Sources assign frame indices. Indices start at 0 and never skip; skipped
//! *detection* is the engine's sampling policy, never skipped *frames*.

use anyhow::{anyhow, Result};

use crate::engine::FrameReport;
use crate::FrameIndex;

/// Decoded RGB24 frame.
///
/// Pixels are row-major, three bytes per pixel, no row padding.
#[derive(Clone, Debug)]
pub struct Frame {
    index: FrameIndex,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(index: FrameIndex, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {} expected {} RGB bytes, received {}",
                index,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            pixels,
        })
    }

    /// Black frame, for tests and detector-only pipelines.
    pub fn blank(index: FrameIndex, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * 3],
        }
    }

    pub fn index(&self) -> FrameIndex {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

/// Sequential frame supplier.
pub trait FrameSource {
    /// Open the underlying stream.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Nominal frame rate, when the source knows it.
    fn fps(&self) -> Option<f64>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Consumer of processed frames (video writer, overlay renderer, logger).
pub trait FrameSink {
    fn write(&mut self, frame: &Frame, report: &FrameReport) -> Result<()>;

    /// Release resources at session end.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_checks_pixel_length() {
        assert!(Frame::new(0, 2, 2, vec![0; 12]).is_ok());
        assert!(Frame::new(0, 2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn blank_frame_is_black() {
        let frame = Frame::blank(7, 4, 3);
        assert_eq!(frame.index(), 7);
        assert_eq!(frame.pixels().len(), 36);
        assert!(frame.pixels().iter().all(|&p| p == 0));
    }
}
