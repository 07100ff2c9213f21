use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::FrameIndex;

/// Detector that replays recorded (or scripted) detections by frame index.
///
/// Frames without a recorded entry yield no detections. A frame can also be
/// scripted to fail, which exercises the engine's degraded-detection path.
///
/// Recordings are JSON Lines, one object per frame:
///
/// ```text
/// {"frame": 0, "detections": [{"label": "person", "confidence": 0.91, "bbox": [0, 0, 10, 10]}]}
/// {"frame": 30, "error": "inference timed out"}
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReplayBackend {
    script: BTreeMap<FrameIndex, ReplayEntry>,
    calls: u64,
}

#[derive(Clone, Debug)]
enum ReplayEntry {
    Detections(Vec<Detection>),
    Failure(String),
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    frame: FrameIndex,
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    error: Option<String>,
}

impl ReplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the detections returned for `frame_index`.
    pub fn with_detections(mut self, frame_index: FrameIndex, detections: Vec<Detection>) -> Self {
        self.script
            .insert(frame_index, ReplayEntry::Detections(detections));
        self
    }

    /// Script a detector failure on `frame_index`.
    pub fn with_failure(mut self, frame_index: FrameIndex, reason: impl Into<String>) -> Self {
        self.script
            .insert(frame_index, ReplayEntry::Failure(reason.into()));
        self
    }

    /// Parse a JSON Lines recording. Blank lines are ignored.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut backend = Self::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("read replay line {}", line_no + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReplayRecord = serde_json::from_str(&line)
                .map_err(|e| anyhow!("invalid replay record on line {}: {}", line_no + 1, e))?;
            let entry = match record.error {
                Some(reason) => ReplayEntry::Failure(reason),
                None => ReplayEntry::Detections(record.detections),
            };
            if backend.script.insert(record.frame, entry).is_some() {
                return Err(anyhow!(
                    "replay recording has more than one record for frame {}",
                    record.frame
                ));
            }
        }
        Ok(backend)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Number of recorded frames.
    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    /// Highest frame index with a recorded entry.
    pub fn last_frame(&self) -> Option<FrameIndex> {
        self.script.keys().next_back().copied()
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.get(&frame.index()) {
            Some(ReplayEntry::Detections(detections)) => Ok(detections.clone()),
            Some(ReplayEntry::Failure(reason)) => Err(anyhow!("{}", reason)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    #[test]
    fn replays_recorded_frames() {
        let raw = r#"
{"frame": 0, "detections": [{"label": "person", "confidence": 0.91, "bbox": [0, 0, 10, 10]}]}

{"frame": 2, "error": "inference timed out"}
"#;
        let mut backend = ReplayBackend::from_reader(raw.as_bytes()).unwrap();
        assert_eq!(backend.len(), 2);
        assert_eq!(backend.last_frame(), Some(2));

        let found = backend.detect(&Frame::blank(0, 32, 32)).unwrap();
        assert_eq!(found[0].bbox, BoundingBox::new(0, 0, 10, 10));
        assert!(backend.detect(&Frame::blank(1, 32, 32)).unwrap().is_empty());

        let err = backend.detect(&Frame::blank(2, 32, 32)).unwrap_err();
        assert_eq!(err.to_string(), "inference timed out");
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn rejects_duplicate_frames() {
        let raw = "{\"frame\": 1}\n{\"frame\": 1}\n";
        assert!(ReplayBackend::from_reader(raw.as_bytes()).is_err());
    }

    #[test]
    fn rejects_bad_lines_with_line_number() {
        let raw = "{\"frame\": 1}\nnot json\n";
        let err = ReplayBackend::from_reader(raw.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
