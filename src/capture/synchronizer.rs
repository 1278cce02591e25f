use crate::buffer::{BufferPool, PixelBuffer};
use crate::capture::event::{CaptureEvent, FeedKind};
use crate::effect::CalibrationData;
use crate::foundation::core::TimestampUs;
use crate::foundation::error::{AperioError, AperioResult};
use crate::foundation::observer::ObserverRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a [`FrameSynchronizer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncState {
    Idle,
    Armed,
    Streaming,
    Stopped,
}

/// Synchronizer configuration.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct SyncConfig {
    /// Pairing window: frames whose timestamps differ by more than this
    /// never form a sample. Hardware-specific; the default is a
    /// placeholder that is small relative to a 30 fps frame period.
    pub tolerance: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance: Duration::from_millis(50),
        }
    }
}

/// Counters describing synchronizer behavior since construction.
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    /// Samples emitted.
    pub emitted: u64,
    /// Color frames discarded unmatched.
    pub dropped_color: u64,
    /// Depth frames discarded unmatched.
    pub dropped_depth: u64,
    /// Frames pushed outside the Streaming state.
    pub dropped_while_not_streaming: u64,
}

/// A paired, time-aligned color+depth frame.
///
/// Created once per successful pairing, consumed by exactly one compositor
/// invocation, then released back to the pool via [`release`]. The type is
/// not `Clone`: the constituent buffers have a single owner.
///
/// [`release`]: SynchronizedSample::release
#[derive(Debug)]
pub struct SynchronizedSample {
    pub color: PixelBuffer,
    pub depth: PixelBuffer,
    pub calibration: Option<CalibrationData>,
    /// Midpoint of the two constituent timestamps.
    pub timestamp: TimestampUs,
}

impl SynchronizedSample {
    /// Return both constituent buffers to their pool.
    pub fn release(self, pool: &BufferPool) {
        pool.release(self.color);
        pool.release(self.depth);
    }
}

/// Consumer seam for synchronized samples.
///
/// The capture thread that completed a pairing hands the sample off here;
/// implementations either forward it (live mailbox), persist it (clip
/// recorder tee), or collect it (tests).
pub trait SampleSink: Send {
    /// Take ownership of one sample. Errors are logged by the caller and
    /// treated as drop-this-frame.
    fn on_sample(&mut self, sample: SynchronizedSample) -> AperioResult<()>;
}

struct HeldFrame {
    buffer: PixelBuffer,
    timestamp: TimestampUs,
    calibration: Option<CalibrationData>,
}

struct SyncInner {
    state: SyncState,
    held_color: Option<HeldFrame>,
    held_depth: Option<HeldFrame>,
    stats: SyncStats,
}

/// Pairs color and depth frames arriving on independent feeds into
/// [`SynchronizedSample`]s.
///
/// Pairing holds at most one unmatched frame per feed. A new frame either
/// pairs with the opposite feed's held frame (timestamps within tolerance)
/// or takes over its own feed's slot, dropping the previous occupant
/// (newest-wins). A live pipeline must never accumulate latency, so late
/// and unpaired frames are sacrificed rather than queued; if one feed
/// stalls, the other occupies exactly one slot.
///
/// `push_*` is called from the per-feed capture threads; the emitted
/// sample is returned to the pushing thread, which routes it onward.
#[derive(Clone)]
pub struct FrameSynchronizer {
    config: SyncConfig,
    pool: BufferPool,
    events: ObserverRegistry<CaptureEvent>,
    inner: Arc<Mutex<SyncInner>>,
}

impl FrameSynchronizer {
    pub fn new(config: SyncConfig, pool: BufferPool) -> Self {
        Self {
            config,
            pool,
            events: ObserverRegistry::new(),
            inner: Arc::new(Mutex::new(SyncInner {
                state: SyncState::Idle,
                held_color: None,
                held_depth: None,
                stats: SyncStats::default(),
            })),
        }
    }

    /// Registry carrying [`CaptureEvent`]s for this capture session.
    /// Ancillary device events (focus, field of view, volume) are posted
    /// here by the capture source.
    pub fn events(&self) -> ObserverRegistry<CaptureEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> SyncState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> SyncStats {
        self.inner.lock().stats.clone()
    }

    /// Idle → Armed. Validates the configuration.
    pub fn arm(&self) -> AperioResult<()> {
        if self.config.tolerance.is_zero() {
            return Err(AperioError::validation("sync tolerance must be > 0"));
        }
        {
            let mut inner = self.inner.lock();
            if inner.state != SyncState::Idle {
                return Err(AperioError::capture(format!(
                    "arm requires Idle, synchronizer is {:?}",
                    inner.state
                )));
            }
            inner.state = SyncState::Armed;
        }
        self.events.post(CaptureEvent::StateChanged(SyncState::Armed));
        Ok(())
    }

    /// Armed → Streaming.
    pub fn start(&self) -> AperioResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state != SyncState::Armed {
                return Err(AperioError::capture(format!(
                    "start requires Armed, synchronizer is {:?}",
                    inner.state
                )));
            }
            inner.state = SyncState::Streaming;
        }
        self.events
            .post(CaptureEvent::StateChanged(SyncState::Streaming));
        Ok(())
    }

    /// Any state → Stopped. Held frames are released. Idempotent.
    pub fn stop(&self) {
        let (color, depth) = {
            let mut inner = self.inner.lock();
            if inner.state == SyncState::Stopped {
                return;
            }
            inner.state = SyncState::Stopped;
            (inner.held_color.take(), inner.held_depth.take())
        };
        for held in [color, depth].into_iter().flatten() {
            self.pool.release(held.buffer);
        }
        self.events
            .post(CaptureEvent::StateChanged(SyncState::Stopped));
    }

    /// Post a color frame from the color feed thread.
    pub fn push_color(
        &self,
        buffer: PixelBuffer,
        timestamp: TimestampUs,
    ) -> Option<SynchronizedSample> {
        self.push(FeedKind::Color, buffer, None, timestamp)
    }

    /// Post a depth frame (with calibration when the sensor provides it)
    /// from the depth feed thread.
    pub fn push_depth(
        &self,
        buffer: PixelBuffer,
        calibration: Option<CalibrationData>,
        timestamp: TimestampUs,
    ) -> Option<SynchronizedSample> {
        self.push(FeedKind::Depth, buffer, calibration, timestamp)
    }

    fn tolerance_us(&self) -> u64 {
        self.config.tolerance.as_micros().min(u128::from(u64::MAX)) as u64
    }

    fn push(
        &self,
        feed: FeedKind,
        mut buffer: PixelBuffer,
        calibration: Option<CalibrationData>,
        timestamp: TimestampUs,
    ) -> Option<SynchronizedSample> {
        buffer.set_timestamp(timestamp);

        let mut inner = self.inner.lock();
        if inner.state != SyncState::Streaming {
            inner.stats.dropped_while_not_streaming += 1;
            drop(inner);
            self.pool.release(buffer);
            return None;
        }

        // Try to pair with the opposite feed's held frame.
        let opposite = match feed {
            FeedKind::Color => &mut inner.held_depth,
            FeedKind::Depth => &mut inner.held_color,
        };
        if let Some(held) = opposite.take() {
            if timestamp.abs_diff(held.timestamp) <= self.tolerance_us() {
                // Once this pair is emitted, a stale frame still parked in
                // our own slot can never pair; newest-wins discards it.
                let stale = match feed {
                    FeedKind::Color => inner.held_color.take(),
                    FeedKind::Depth => inner.held_depth.take(),
                };
                inner.stats.emitted += 1;
                if stale.is_some() {
                    match feed {
                        FeedKind::Color => inner.stats.dropped_color += 1,
                        FeedKind::Depth => inner.stats.dropped_depth += 1,
                    }
                }
                let sample_ts = timestamp.midpoint(held.timestamp);
                drop(inner);

                if let Some(stale) = stale {
                    let ts = stale.timestamp;
                    self.pool.release(stale.buffer);
                    self.events
                        .post(CaptureEvent::FrameDropped { feed, timestamp: ts });
                }
                self.events.post(CaptureEvent::SampleSynchronized {
                    timestamp: sample_ts,
                });

                let (color, depth, calibration) = match feed {
                    FeedKind::Color => (buffer, held.buffer, held.calibration),
                    FeedKind::Depth => (held.buffer, buffer, calibration),
                };
                return Some(SynchronizedSample {
                    color,
                    depth,
                    calibration,
                    timestamp: sample_ts,
                });
            }
            *opposite = Some(held);
        }

        // No pairing: take over our own slot, dropping the previous
        // unmatched occupant.
        let own = match feed {
            FeedKind::Color => &mut inner.held_color,
            FeedKind::Depth => &mut inner.held_depth,
        };
        let prev = own.replace(HeldFrame {
            buffer,
            timestamp,
            calibration,
        });
        if prev.is_some() {
            match feed {
                FeedKind::Color => inner.stats.dropped_color += 1,
                FeedKind::Depth => inner.stats.dropped_depth += 1,
            }
        }
        drop(inner);

        if let Some(prev) = prev {
            let ts = prev.timestamp;
            self.pool.release(prev.buffer);
            tracing::debug!(?feed, ts = ts.0, "unmatched frame dropped");
            self.events
                .post(CaptureEvent::FrameDropped { feed, timestamp: ts });
        }
        None
    }
}
