use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::buffer::BufferPool;
use crate::capture::{SampleSink, SynchronizedSample};
use crate::effect::{DepthBlurCompositor, EffectParams};
use crate::foundation::error::{AperioError, AperioResult};
use crate::render::surface::DisplaySurface;

/// One-deep latest-wins handoff between the capture side and the render
/// worker. A new sample displaces an unconsumed previous one, whose
/// buffers go straight back to the pool.
#[derive(Clone)]
pub struct SampleMailbox {
    pool: BufferPool,
    slot: Arc<Mutex<Option<SynchronizedSample>>>,
    coalesced: Arc<AtomicU64>,
}

impl SampleMailbox {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            pool,
            slot: Arc::new(Mutex::new(None)),
            coalesced: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn take(&self) -> Option<SynchronizedSample> {
        self.slot.lock().take()
    }

    /// Samples displaced before anyone consumed them.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    fn put(&self, sample: SynchronizedSample) {
        let displaced = self.slot.lock().replace(sample);
        if let Some(old) = displaced {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            old.release(&self.pool);
        }
    }
}

impl SampleSink for SampleMailbox {
    fn on_sample(&mut self, sample: SynchronizedSample) -> AperioResult<()> {
        self.put(sample);
        Ok(())
    }
}

/// Live preview configuration.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct LiveConfig {
    /// Presentation cadence in Hz. Samples arriving faster coalesce;
    /// samples arriving slower simply delay presentation.
    pub cadence_hz: u32,
    pub params: EffectParams,
}

impl LiveConfig {
    pub fn new(params: EffectParams) -> Self {
        Self {
            cadence_hz: 20,
            params,
        }
    }
}

/// Counters published by the render worker.
#[derive(Debug, Default, Clone)]
pub struct LiveStats {
    pub rendered: u64,
    pub compose_failures: u64,
    pub present_failures: u64,
    pub coalesced: u64,
}

/// Drives the compositor from the newest synchronized sample into a
/// display surface at a bounded cadence.
///
/// Composition and presentation run back to back on one worker thread,
/// so exactly one frame is ever in flight; a compose failure leaves the
/// surface showing its previous frame.
pub struct LiveRenderPipeline {
    mailbox: SampleMailbox,
    params: Arc<Mutex<EffectParams>>,
    stats: Arc<Mutex<LiveStats>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LiveRenderPipeline {
    pub fn start(
        compositor: DepthBlurCompositor,
        mut surface: Box<dyn DisplaySurface>,
        mailbox: SampleMailbox,
        config: LiveConfig,
    ) -> AperioResult<Self> {
        if config.cadence_hz == 0 || config.cadence_hz > 240 {
            return Err(AperioError::validation(format!(
                "live cadence must be within 1..=240 Hz, got {}",
                config.cadence_hz
            )));
        }

        let params = Arc::new(Mutex::new(config.params));
        let stats = Arc::new(Mutex::new(LiveStats::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let mailbox = mailbox.clone();
            let params = Arc::clone(&params);
            let stats = Arc::clone(&stats);
            let stop = Arc::clone(&stop);
            let pool = compositor.pool().clone();
            let interval = Duration::from_secs_f64(1.0 / f64::from(config.cadence_hz));

            std::thread::Builder::new()
                .name("aperio-live-render".into())
                .spawn(move || {
                    tracing::debug!(cadence_hz = config.cadence_hz, "live render loop started");
                    let mut next = Instant::now();
                    loop {
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        let now = Instant::now();
                        if now < next {
                            std::thread::sleep((next - now).min(Duration::from_millis(20)));
                            continue;
                        }
                        next += interval;
                        if next < now {
                            next = now + interval;
                        }

                        let Some(sample) = mailbox.take() else {
                            continue;
                        };
                        let params = *params.lock();
                        let composed = compositor.compose(
                            &sample.color,
                            &sample.depth,
                            sample.calibration.as_ref(),
                            &params,
                        );
                        sample.release(&pool);

                        match composed {
                            Some(frame) => match surface.present(frame) {
                                Ok(()) => stats.lock().rendered += 1,
                                Err(err) => {
                                    tracing::debug!(%err, "surface refused frame");
                                    stats.lock().present_failures += 1;
                                }
                            },
                            None => stats.lock().compose_failures += 1,
                        }
                    }
                    if let Some(sample) = mailbox.take() {
                        sample.release(&pool);
                    }
                    tracing::debug!("live render loop exiting");
                })
                .map_err(|e| AperioError::capture(format!("spawn live render thread: {e}")))?
        };

        Ok(Self {
            mailbox,
            params,
            stats,
            stop,
            handle: Some(handle),
        })
    }

    /// Handle for wiring this pipeline as the synchronizer's sink.
    pub fn mailbox(&self) -> SampleMailbox {
        self.mailbox.clone()
    }

    pub fn params(&self) -> EffectParams {
        *self.params.lock()
    }

    /// Takes effect on the next tick.
    pub fn set_params(&self, params: EffectParams) {
        *self.params.lock() = params;
    }

    pub fn stats(&self) -> LiveStats {
        let mut s = self.stats.lock().clone();
        s.coalesced = self.mailbox.coalesced();
        s
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("live render thread panicked");
        }
    }
}

impl Drop for LiveRenderPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;
    use crate::foundation::core::{Dimensions, TimestampUs};
    use crate::render::surface::InMemorySurface;

    fn dims(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h).unwrap()
    }

    fn sample(pool: &BufferPool, ms: i64) -> SynchronizedSample {
        let mut color = pool.acquire(PixelFormat::Bgra8, dims(16, 16)).unwrap();
        color.fill(100);
        color.set_timestamp(TimestampUs::from_millis(ms));
        let mut depth = pool.acquire(PixelFormat::Gray8, dims(8, 8)).unwrap();
        depth.fill(120);
        depth.set_timestamp(TimestampUs::from_millis(ms));
        SynchronizedSample {
            color,
            depth,
            calibration: None,
            timestamp: TimestampUs::from_millis(ms),
        }
    }

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn mailbox_keeps_only_the_newest_sample() {
        let pool = BufferPool::with_defaults();
        let mut mailbox = SampleMailbox::new(pool.clone());

        mailbox.on_sample(sample(&pool, 10)).unwrap();
        mailbox.on_sample(sample(&pool, 20)).unwrap();
        mailbox.on_sample(sample(&pool, 30)).unwrap();

        let got = mailbox.take().unwrap();
        assert_eq!(got.timestamp, TimestampUs::from_millis(30));
        assert_eq!(mailbox.coalesced(), 2);
        assert!(mailbox.take().is_none());

        got.release(&pool);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn pipeline_renders_pending_samples_and_coalesces() {
        let pool = BufferPool::with_defaults();
        let mailbox = SampleMailbox::new(pool.clone());
        {
            let mut writer = mailbox.clone();
            writer.on_sample(sample(&pool, 10)).unwrap();
            writer.on_sample(sample(&pool, 20)).unwrap();
            writer.on_sample(sample(&pool, 30)).unwrap();
        }

        let surface = InMemorySurface::new(pool.clone());
        let compositor = DepthBlurCompositor::new(pool.clone());
        let config = LiveConfig::new(EffectParams::new(dims(16, 16)));
        let pipeline = LiveRenderPipeline::start(
            compositor,
            Box::new(surface.clone()),
            mailbox,
            config,
        )
        .unwrap();

        assert!(wait_until(2_000, || surface.presented() >= 1));
        pipeline.stop();

        assert_eq!(surface.presented(), 1, "coalesced samples render once");
        assert_eq!(surface.last_timestamp(), Some(TimestampUs::from_millis(30)));
        assert_eq!(surface.last_dims(), Some(dims(16, 16)));
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn surface_errors_are_counted_not_fatal() {
        struct RefusingSurface {
            pool: BufferPool,
        }
        impl DisplaySurface for RefusingSurface {
            fn present(&mut self, frame: crate::buffer::PixelBuffer) -> AperioResult<()> {
                self.pool.release(frame);
                Err(AperioError::capture("surface lost"))
            }
        }

        let pool = BufferPool::with_defaults();
        let mailbox = SampleMailbox::new(pool.clone());
        {
            let mut writer = mailbox.clone();
            writer.on_sample(sample(&pool, 10)).unwrap();
        }

        let compositor = DepthBlurCompositor::new(pool.clone());
        let pipeline = LiveRenderPipeline::start(
            compositor,
            Box::new(RefusingSurface { pool: pool.clone() }),
            mailbox,
            LiveConfig::new(EffectParams::new(dims(16, 16))),
        )
        .unwrap();

        assert!(wait_until(2_000, || pipeline.stats().present_failures >= 1));
        assert!(pipeline.is_running());
        pipeline.stop();
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let pool = BufferPool::with_defaults();
        let compositor = DepthBlurCompositor::new(pool.clone());
        let mut config = LiveConfig::new(EffectParams::new(dims(16, 16)));
        config.cadence_hz = 0;
        let res = LiveRenderPipeline::start(
            compositor,
            Box::new(InMemorySurface::new(pool.clone())),
            SampleMailbox::new(pool),
            config,
        );
        assert!(res.is_err());
    }
}
