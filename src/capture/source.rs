use crate::buffer::{BufferPool, PixelBuffer, PixelFormat};
use crate::capture::event::CaptureEvent;
use crate::capture::synchronizer::{FrameSynchronizer, SampleSink};
use crate::effect::CalibrationData;
use crate::foundation::core::{Dimensions, Fps, TimestampUs};
use crate::foundation::error::{AperioError, AperioResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Configuration for [`SyntheticSource`].
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct SyntheticSourceOpts {
    /// Color frame dimensions.
    pub dims: Dimensions,
    /// Disparity frame dimensions; depth sensors deliver well below color
    /// resolution.
    pub depth_dims: Dimensions,
    pub fps: Fps,
    /// Stop after this many frames; `None` runs until [`SyntheticSource::stop`].
    pub frame_count: Option<u64>,
    /// Sleep one frame period between frames. Recording fixtures leave
    /// this off; live preview demos turn it on.
    pub paced: bool,
}

impl Default for SyntheticSourceOpts {
    fn default() -> Self {
        Self {
            dims: Dimensions {
                width: 192,
                height: 144,
            },
            depth_dims: Dimensions {
                width: 96,
                height: 72,
            },
            fps: Fps { num: 30, den: 1 },
            frame_count: Some(30),
            paced: false,
        }
    }
}

/// Deterministic color test pattern: blue/green spatial gradient with a
/// red channel that advances per frame. BGRA byte order.
pub fn fill_color_pattern(buffer: &mut PixelBuffer, frame: u64) {
    let (w, h) = (buffer.width(), buffer.height());
    for y in 0..h {
        let row = buffer.row_mut(y);
        for x in 0..w {
            let px = &mut row[x as usize * 4..x as usize * 4 + 4];
            px[0] = ((x * 255) / w.max(1)) as u8;
            px[1] = ((y * 255) / h.max(1)) as u8;
            px[2] = ((frame * 8) % 256) as u8;
            px[3] = 255;
        }
    }
}

/// Deterministic disparity test pattern: a near (high-disparity) vertical
/// subject band sweeping across a far background ramp.
pub fn fill_depth_pattern(buffer: &mut PixelBuffer, frame: u64) {
    let (w, h) = (buffer.width(), buffer.height());
    let band_half = (w / 8).max(1);
    let center = ((frame * 3) % u64::from(w)) as u32;
    for y in 0..h {
        let row = buffer.row_mut(y);
        for x in 0..w {
            let background = 40 + ((x * 40) / w.max(1)) as u8;
            row[x as usize] = if x.abs_diff(center) < band_half {
                230
            } else {
                background
            };
        }
    }
}

fn synthetic_calibration(depth_dims: Dimensions) -> CalibrationData {
    CalibrationData {
        focal_length_px: 2_800.0,
        reference_dims: depth_dims,
        disparity_scale: 1.0,
    }
}

/// A capture source that generates synchronized synthetic frames.
///
/// Stands in for the dual-sensor hardware in tests, fixtures, and the
/// `record` CLI subcommand. One generator thread posts a color frame then
/// a depth frame per index with identical timestamps, so every index pairs
/// and the emitted sample count is deterministic.
pub struct SyntheticSource {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    /// Spawn the generator thread. Emitted samples are handed to `sink`
    /// from that thread.
    pub fn start(
        synchronizer: FrameSynchronizer,
        pool: BufferPool,
        sink: Arc<Mutex<dyn SampleSink>>,
        opts: SyntheticSourceOpts,
    ) -> AperioResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let events = synchronizer.events();

        let handle = std::thread::Builder::new()
            .name("aperio-synthetic-capture".into())
            .spawn(move || {
                events.post(CaptureEvent::FieldOfViewChanged { degrees: 64.0 });
                let frame_period = opts.fps.frame_duration_secs();
                let calibration = synthetic_calibration(opts.depth_dims);
                let mut frame: u64 = 0;

                loop {
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Some(limit) = opts.frame_count
                        && frame >= limit
                    {
                        break;
                    }

                    let ts = TimestampUs::from_secs_f64(frame_period * frame as f64);

                    if let Some(mut color) = pool.acquire(PixelFormat::Bgra8, opts.dims) {
                        fill_color_pattern(&mut color, frame);
                        if let Some(sample) = synchronizer.push_color(color, ts) {
                            deliver(&sink, sample);
                        }
                    }
                    if let Some(mut depth) = pool.acquire(PixelFormat::Gray8, opts.depth_dims) {
                        fill_depth_pattern(&mut depth, frame);
                        let center = depth.row(opts.depth_dims.height / 2)
                            [opts.depth_dims.width as usize / 2];
                        events.post(CaptureEvent::FocusDepth {
                            disparity: f32::from(center) / 255.0,
                        });
                        if let Some(sample) =
                            synchronizer.push_depth(depth, Some(calibration), ts)
                        {
                            deliver(&sink, sample);
                        }
                    }

                    frame += 1;
                    if opts.paced {
                        std::thread::sleep(std::time::Duration::from_secs_f64(frame_period));
                    }
                }
                tracing::debug!(frames = frame, "synthetic capture finished");
            })
            .map_err(|e| AperioError::capture(format!("spawn capture thread: {e}")))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the generator to stop, then join it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.join();
    }

    /// Join without signalling: returns once `frame_count` frames have
    /// been posted.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.join();
    }
}

fn deliver(sink: &Arc<Mutex<dyn SampleSink>>, sample: crate::capture::SynchronizedSample) {
    let ts = sample.timestamp;
    if let Err(err) = sink.lock().on_sample(sample) {
        tracing::warn!(ts = ts.0, %err, "sample sink rejected frame");
    }
}
