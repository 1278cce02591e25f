//! Capture events, the observer registry, the color/depth frame
//! synchronizer, and a synthetic capture source.
//!
//! The core never initiates hardware capture: a source (real or synthetic)
//! pushes frames into the [`FrameSynchronizer`] from its own feed threads
//! and routes emitted [`SynchronizedSample`]s into a [`SampleSink`].

mod event;
mod source;
mod synchronizer;

pub use event::{CaptureEvent, FeedKind};
pub use source::{
    SyntheticSource, SyntheticSourceOpts, fill_color_pattern, fill_depth_pattern,
};
pub use synchronizer::{
    FrameSynchronizer, SampleSink, SyncConfig, SyncState, SyncStats, SynchronizedSample,
};
