//! Directory-based clip container: a JSON manifest next to raw color and
//! depth tracks.
//!
//! [`ClipRecorder`] tees the live synchronized stream to disk;
//! [`ClipReader`] serves it back frame-by-frame for export and poster
//! composition.

mod manifest;
mod reader;
mod recorder;

pub use manifest::ClipManifest;
pub use reader::ClipReader;
pub use recorder::{ClipRecorder, RecorderOpts, RecordingTee};
