//! Aperio is a dual-camera depth video engine: synchronized color+depth
//! capture, depth-guided portrait blur, live preview, and cancellable
//! export.
//!
//! The public API is pipeline-oriented:
//!
//! - Pair color and disparity feeds through a [`FrameSynchronizer`]
//! - Preview the stream through a [`LiveRenderPipeline`], or record it
//!   with a [`ClipRecorder`]
//! - Composite frames with the [`DepthBlurCompositor`], directly or
//!   behind the serial [`CompositionEngine`]
//! - Export a recorded clip to video through an [`ExportTaskManager`]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod capture;
pub mod clip;
pub mod composition;
pub mod effect;
pub mod export;
pub mod foundation;
pub mod render;

pub use crate::foundation::core::{Dimensions, Fps, FrameIndex, TimestampUs};
pub use crate::foundation::error::{AperioError, AperioResult};
pub use crate::foundation::observer::{ObserverHandle, ObserverRegistry};

pub use crate::buffer::{BufferPool, BufferPoolOpts, PixelBuffer, PixelFormat};
pub use crate::capture::{
    CaptureEvent, FrameSynchronizer, SampleSink, SyncConfig, SyncState, SynchronizedSample,
};
pub use crate::clip::{ClipManifest, ClipReader, ClipRecorder, RecordingTee};
pub use crate::composition::{
    CompositionEngine, CompositionOutcome, CompositionRequest, RenderContext,
};
pub use crate::effect::{DepthBlurCompositor, EffectParams, PreviewMode, SegmentationModel};
pub use crate::export::{
    ExportEvent, ExportState, ExportTask, ExportTaskManager, FfmpegSink, FrameSink, InMemorySink,
};
pub use crate::render::{DisplaySurface, LiveConfig, LiveRenderPipeline};
