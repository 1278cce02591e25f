//! Clip-to-file export: the frame sink seam, the ffmpeg encoder behind
//! it, the serial compose-and-encode session, and the single-flight
//! manager that runs sessions on a worker thread with progress reporting.

mod ffmpeg;
mod manager;
mod poster;
mod session;
mod sink;

pub use ffmpeg::{
    FfmpegSink, FfmpegSinkOpts, ensure_parent_dir, ffmpeg_tools_available, is_ffmpeg_on_path,
};
pub use manager::{
    ExportEvent, ExportOpts, ExportResult, ExportState, ExportTask, ExportTaskManager,
};
pub use poster::{PosterRequest, poster};
pub use session::{ExportOutcome, ExportSession};
pub use sink::{FrameSink, InMemorySink, SinkConfig};
