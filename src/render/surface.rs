use parking_lot::Mutex;
use std::sync::Arc;

use crate::buffer::{BufferPool, PixelBuffer};
use crate::foundation::core::{Dimensions, TimestampUs};
use crate::foundation::error::AperioResult;

/// Presentation endpoint for composed frames.
///
/// `present` transfers ownership; the implementation releases the buffer
/// back to its pool once it is done with the pixels. The render worker
/// calls `present` from its own thread and does not start the next
/// composition until the call returns, which is what keeps a single
/// frame in flight.
pub trait DisplaySurface: Send {
    fn present(&mut self, frame: PixelBuffer) -> AperioResult<()>;
}

#[derive(Default)]
struct SurfaceInner {
    presented: u64,
    last_dims: Option<Dimensions>,
    last_timestamp: Option<TimestampUs>,
    last_bytes: Vec<u8>,
}

/// Headless surface keeping the most recent frame for inspection.
/// Clones share the same backing state.
#[derive(Clone)]
pub struct InMemorySurface {
    pool: BufferPool,
    inner: Arc<Mutex<SurfaceInner>>,
}

impl InMemorySurface {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            pool,
            inner: Arc::new(Mutex::new(SurfaceInner::default())),
        }
    }

    pub fn presented(&self) -> u64 {
        self.inner.lock().presented
    }

    pub fn last_dims(&self) -> Option<Dimensions> {
        self.inner.lock().last_dims
    }

    pub fn last_timestamp(&self) -> Option<TimestampUs> {
        self.inner.lock().last_timestamp
    }

    pub fn last_bytes(&self) -> Vec<u8> {
        self.inner.lock().last_bytes.clone()
    }
}

impl DisplaySurface for InMemorySurface {
    fn present(&mut self, frame: PixelBuffer) -> AperioResult<()> {
        {
            let mut inner = self.inner.lock();
            inner.presented += 1;
            inner.last_dims = Some(frame.dims());
            inner.last_timestamp = frame.timestamp();
            inner.last_bytes.clear();
            inner.last_bytes.extend_from_slice(frame.as_bytes());
        }
        self.pool.release(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;

    #[test]
    fn surface_keeps_latest_and_returns_buffers() {
        let pool = BufferPool::with_defaults();
        let surface = InMemorySurface::new(pool.clone());
        let d = Dimensions::new(4, 4).unwrap();

        let mut a = pool.acquire(PixelFormat::Bgra8, d).unwrap();
        a.fill(1);
        a.set_timestamp(TimestampUs::from_millis(10));
        let mut b = pool.acquire(PixelFormat::Bgra8, d).unwrap();
        b.fill(2);
        b.set_timestamp(TimestampUs::from_millis(20));

        let mut writer = surface.clone();
        writer.present(a).unwrap();
        writer.present(b).unwrap();

        assert_eq!(surface.presented(), 2);
        assert_eq!(surface.last_timestamp(), Some(TimestampUs::from_millis(20)));
        assert!(surface.last_bytes().iter().all(|&v| v == 2));
        assert_eq!(pool.stats().outstanding, 0);
    }
}
