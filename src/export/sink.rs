use crate::buffer::PixelBuffer;
use crate::foundation::core::{Dimensions, Fps, FrameIndex};
use crate::foundation::error::AperioResult;
use parking_lot::Mutex;
use std::sync::Arc;

/// Configuration provided to a [`FrameSink`] at the start of an export.
#[derive(Clone, Copy, Debug)]
pub struct SinkConfig {
    /// Output frame size in pixels.
    pub dims: Dimensions,
    /// Output frames-per-second.
    pub fps: Fps,
}

/// Sink contract for consuming composed frames in timeline order.
///
/// Ordering contract: `push_frame` is called in strictly increasing
/// `FrameIndex` order between one `begin`/`end` pair. Frames are borrowed;
/// the caller releases them to the pool after the push returns.
pub trait FrameSink: Send {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> AperioResult<()>;
    /// Push one frame in strictly increasing timeline order.
    fn push_frame(&mut self, idx: FrameIndex, frame: &PixelBuffer) -> AperioResult<()>;
    /// Called once after the last frame is pushed.
    fn end(&mut self) -> AperioResult<()>;
    /// Discard the export mid-flight. Partial output is removed where the
    /// sink can do so; the sink is reusable via a fresh `begin` afterwards.
    fn abort(&mut self) -> AperioResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryInner {
    cfg: Option<SinkConfig>,
    frames: Vec<(FrameIndex, Vec<u8>)>,
    ended: bool,
    aborted: bool,
}

/// In-memory sink for tests and debugging.
///
/// Clones share storage, so a test can keep a handle while the export
/// worker owns the sink.
#[derive(Clone, Default)]
pub struct InMemorySink {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.inner.lock().cfg
    }

    pub fn frame_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Copies of the captured frames in push order.
    pub fn frames(&self) -> Vec<(FrameIndex, Vec<u8>)> {
        self.inner.lock().frames.clone()
    }

    pub fn ended(&self) -> bool {
        self.inner.lock().ended
    }

    pub fn aborted(&self) -> bool {
        self.inner.lock().aborted
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> AperioResult<()> {
        let mut inner = self.inner.lock();
        inner.cfg = Some(cfg);
        inner.frames.clear();
        inner.ended = false;
        inner.aborted = false;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &PixelBuffer) -> AperioResult<()> {
        self.inner
            .lock()
            .frames
            .push((idx, frame.as_bytes().to_vec()));
        Ok(())
    }

    fn end(&mut self) -> AperioResult<()> {
        self.inner.lock().ended = true;
        Ok(())
    }

    fn abort(&mut self) -> AperioResult<()> {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.aborted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPool, PixelFormat};

    #[test]
    fn in_memory_sink_captures_frames_and_survives_abort() {
        let pool = BufferPool::with_defaults();
        let dims = Dimensions::new(4, 4).unwrap();
        let mut frame = pool.acquire(PixelFormat::Bgra8, dims).unwrap();
        frame.fill(9);

        let sink = InMemorySink::new();
        let mut handle = sink.clone();
        handle
            .begin(SinkConfig {
                dims,
                fps: Fps::new(30, 1).unwrap(),
            })
            .unwrap();
        handle.push_frame(FrameIndex(0), &frame).unwrap();
        assert_eq!(sink.frame_count(), 1);
        assert_eq!(sink.frames()[0].1[0], 9);
        assert!(!sink.ended());

        handle.abort().unwrap();
        assert!(sink.aborted());
        assert_eq!(sink.frame_count(), 0);

        handle
            .begin(SinkConfig {
                dims,
                fps: Fps::new(30, 1).unwrap(),
            })
            .unwrap();
        assert!(!sink.aborted());

        pool.release(frame);
    }
}
