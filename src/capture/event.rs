use crate::capture::synchronizer::SyncState;
use crate::foundation::core::TimestampUs;

/// Which producer feed a frame-level event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedKind {
    Color,
    Depth,
}

/// Tagged events posted by the capture layer.
///
/// One enum over one registry replaces the delegate-protocol fan the
/// hardware layer would otherwise need: observers subscribe once and
/// dispatch by pattern matching. Frame payloads never travel here (they
/// are single-owner); events carry metadata only.
#[derive(Clone, Debug)]
pub enum CaptureEvent {
    /// The synchronizer changed state.
    StateChanged(SyncState),
    /// A synchronized sample was emitted at this timestamp.
    SampleSynchronized { timestamp: TimestampUs },
    /// A frame was discarded under the newest-wins policy.
    FrameDropped { feed: FeedKind, timestamp: TimestampUs },
    /// Normalized disparity under the focus point of the latest depth frame.
    FocusDepth { disparity: f32 },
    /// The active sensor's field of view changed.
    FieldOfViewChanged { degrees: f32 },
    /// A hardware volume button was pressed (pass-through for hosts that
    /// map it to capture).
    VolumePressed,
}
