use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// This is the engine's only view of the object-detection model. From the
/// engine's side a call is blocking: it must return before spatial assignment
/// for the frame proceeds. A returned error (or malformed detections) marks
/// the frame's detection pass as unavailable; it never halts the stream.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame and return every object found, of any class.
    ///
    /// Class filtering happens in the engine, not here.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
