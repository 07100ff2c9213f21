//! Frame sinks and the zone overlay.
//!
//! Zones are outlined green while Vacant and red while Occupied; detections
//! assigned to a zone on the frame are boxed in yellow.

use anyhow::Result;

use crate::engine::FrameReport;
use crate::frame::{Frame, FrameSink};
use crate::zone::{Point, Zone};
use crate::OccupancyStatus;

pub const VACANT_COLOR: [u8; 3] = [0, 255, 0];
pub const OCCUPIED_COLOR: [u8; 3] = [255, 0, 0];
pub const DETECTION_COLOR: [u8; 3] = [255, 255, 0];

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
}

impl NullSink {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for NullSink {
    fn write(&mut self, _frame: &Frame, _report: &FrameReport) -> Result<()> {
        self.frames += 1;
        Ok(())
    }
}

/// Logs every zone status change at info level.
#[derive(Debug, Default)]
pub struct TransitionLogSink {
    transitions: u64,
}

impl TransitionLogSink {
    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}

impl FrameSink for TransitionLogSink {
    fn write(&mut self, _frame: &Frame, report: &FrameReport) -> Result<()> {
        for t in &report.transitions {
            log::info!(
                "frame {}: {} {} -> {}",
                report.frame_index,
                t.zone,
                t.from,
                t.to
            );
            self.transitions += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::info!("{} zone status transitions", self.transitions);
        Ok(())
    }
}

// -------------------- Overlay --------------------

/// Draw zone outlines and assigned detection boxes onto `frame`.
pub fn draw_overlay(frame: &mut Frame, zones: &[Zone], report: &FrameReport) {
    for zone in zones {
        let color = match report.statuses.get(&zone.name) {
            Some(OccupancyStatus::Occupied) => OCCUPIED_COLOR,
            _ => VACANT_COLOR,
        };
        for (a, b) in zone.polygon.edges() {
            draw_line(frame, a, b, color);
        }
    }
    for assigned in &report.assigned {
        let bbox = assigned.detection.bbox;
        let corners = [
            Point::new(bbox.x1, bbox.y1),
            Point::new(bbox.x2, bbox.y1),
            Point::new(bbox.x2, bbox.y2),
            Point::new(bbox.x1, bbox.y2),
        ];
        for i in 0..corners.len() {
            draw_line(frame, corners[i], corners[(i + 1) % corners.len()], DETECTION_COLOR);
        }
    }
}

/// Bresenham line, clipped per pixel to the frame.
fn draw_line(frame: &mut Frame, from: Point, to: Point, color: [u8; 3]) {
    let (mut x, mut y) = (from.x as i64, from.y as i64);
    let (x1, y1) = (to.x as i64, to.y as i64);
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put_pixel(frame, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn put_pixel(frame: &mut Frame, x: i64, y: i64, color: [u8; 3]) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    if x < 0 || y < 0 || x >= w || y >= h {
        return;
    }
    let offset = ((y * w + x) * 3) as usize;
    frame.pixels_mut()[offset..offset + 3].copy_from_slice(&color);
}

// -------------------- JPEG snapshots --------------------

/// Writes annotated JPEG snapshots: every `every_frames` frames, and on any
/// frame where a zone changed status.
#[cfg(feature = "annotate-jpeg")]
pub struct SnapshotSink {
    dir: std::path::PathBuf,
    zones: Vec<Zone>,
    every_frames: u64,
    written: u64,
}

#[cfg(feature = "annotate-jpeg")]
impl SnapshotSink {
    pub fn new(
        dir: impl Into<std::path::PathBuf>,
        zones: Vec<Zone>,
        every_frames: u64,
    ) -> Result<Self> {
        use anyhow::Context;

        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        Ok(Self {
            dir,
            zones,
            every_frames: every_frames.max(1),
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[cfg(feature = "annotate-jpeg")]
impl FrameSink for SnapshotSink {
    fn write(&mut self, frame: &Frame, report: &FrameReport) -> Result<()> {
        use anyhow::{anyhow, Context};

        if report.frame_index % self.every_frames != 0 && report.transitions.is_empty() {
            return Ok(());
        }
        let mut annotated = frame.clone();
        draw_overlay(&mut annotated, &self.zones, report);
        let image = image::RgbImage::from_raw(
            annotated.width(),
            annotated.height(),
            annotated.pixels().to_vec(),
        )
        .ok_or_else(|| anyhow!("frame {} has an invalid pixel buffer", report.frame_index))?;
        let path = self.dir.join(format!("frame_{:08}.jpg", report.frame_index));
        image
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        log::info!("{} snapshots written to {}", self.written, self.dir.display());
        Ok(())
    }
}
