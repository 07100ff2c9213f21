//! Frame sources.
//!
//! - `SyntheticSource`: generated frames for `stub://` URLs and tests
//! - `FileSource`: local video files (feature: ingest-file-ffmpeg), or
//!   synthetic frames for `stub://` paths
//!
//! Every source numbers its frames from 0 without gaps. Sources stop by
//! returning `Ok(None)`; frames are never retained after handoff.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;

pub use file::{FileConfig, FileSource, FileStats};
pub use synthetic::SyntheticSource;
