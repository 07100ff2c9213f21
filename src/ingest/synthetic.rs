use anyhow::{anyhow, Result};

use crate::frame::{Frame, FrameSource};
use crate::FrameIndex;

/// Generated frames for `stub://` URLs.
///
/// Produces a slowly shifting gradient so annotated output is visibly
/// animated. Pair it with a `ReplayBackend` to drive the engine without a
/// camera or model.
pub struct SyntheticSource {
    url: String,
    fps: f64,
    width: u32,
    height: u32,
    max_frames: Option<u64>,
    next_index: FrameIndex,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(url: impl Into<String>, fps: f64, width: u32, height: u32) -> Result<Self> {
        let url = url.into();
        if !url.starts_with("stub://") {
            return Err(anyhow!("synthetic source requires a stub:// url, got {}", url));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        Ok(Self {
            url,
            fps,
            width,
            height,
            max_frames: None,
            next_index: 0,
            connected: false,
        })
    }

    /// Stop after `max_frames` frames. Unlimited by default.
    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn frames_produced(&self) -> u64 {
        self.next_index
    }

    fn pixels(&self, index: FrameIndex) -> Vec<u8> {
        let shift = (index / 10) as usize;
        let row_bytes = self.width as usize * 3;
        let mut pixels = vec![0u8; row_bytes * self.height as usize];
        for (i, px) in pixels.iter_mut().enumerate() {
            let x = (i % row_bytes) / 3;
            let y = i / row_bytes;
            *px = ((x + y + shift) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(max) = self.max_frames {
            if self.next_index >= max {
                return Ok(None);
            }
        }
        let index = self.next_index;
        let frame = Frame::new(index, self.width, self.height, self.pixels(index))?;
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn fps(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }
}
