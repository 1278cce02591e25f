use crate::buffer::PixelFormat;
use crate::clip::ClipReader;
use crate::composition::{
    CompositionEngine, CompositionOutcome, CompositionRequest, RenderContext,
};
use crate::effect::{DepthBlurCompositor, EffectParams};
use crate::export::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{Fps, FrameIndex};
use crate::foundation::error::{AperioError, AperioResult};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Samples submitted ahead of the one being composed. Two keeps clip IO
/// overlapped with composition while the queued color buffers stay inside
/// the pool's per-key capacity.
const IN_FLIGHT_WINDOW: u64 = 2;

/// How an export run ended, short of an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    Completed,
    Cancelled,
}

/// One export run: clip frames through the composition engine into a
/// [`FrameSink`], in order.
///
/// The session is shared by handle: the manager clones it to poll
/// [`fraction_complete`] from the progress sampler and to flip
/// [`cancel`] from any thread. Cancellation is cooperative; it is
/// honored between frames, never mid-composition, and a cancel that
/// lands before [`run`] starts cancels the run immediately.
///
/// A frame that fails to compose fails the export. The engine answers
/// such frames with a fallback, but encoding silent black into a user's
/// output is worse than reporting the failure.
///
/// [`fraction_complete`]: ExportSession::fraction_complete
/// [`cancel`]: ExportSession::cancel
/// [`run`]: ExportSession::run
#[derive(Clone, Default)]
pub struct ExportSession {
    cancel: Arc<AtomicBool>,
    progress_bits: Arc<AtomicU32>,
}

impl ExportSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Frames delivered to the sink over the clip's frame count, 0..=1.
    pub fn fraction_complete(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Acquire))
    }

    pub fn run(
        &self,
        compositor: DepthBlurCompositor,
        reader: &mut ClipReader,
        sink: &mut dyn FrameSink,
        params: EffectParams,
        fps: Fps,
    ) -> AperioResult<ExportOutcome> {
        let total = reader.frame_count();
        if total == 0 {
            return Err(AperioError::validation("clip has no frames to export"));
        }
        self.progress_bits.store(0.0f32.to_bits(), Ordering::Release);

        sink.begin(SinkConfig {
            dims: params.output_dims,
            fps,
        })?;

        let pool = compositor.pool().clone();
        let (tx, rx) = bounded(IN_FLIGHT_WINDOW as usize * 4);
        let engine = CompositionEngine::new(
            compositor,
            Box::new(move |id, outcome| {
                let _ = tx.send((id, outcome));
            }),
        )?;
        engine.set_render_context(RenderContext::new(params.output_dims, PixelFormat::Bgra8));

        let mut failure: Option<AperioError> = None;
        let mut cancelled = false;
        let mut submitted: u64 = 0;
        let mut completed: u64 = 0;
        let mut pushed: u64 = 0;

        while completed < total {
            if failure.is_none() && !cancelled && self.is_cancelled() {
                cancelled = true;
                engine.cancel_all_pending();
            }

            if failure.is_none() && !cancelled {
                while submitted < total && submitted - completed < IN_FLIGHT_WINDOW {
                    let outcome = reader.sample_at(submitted, &pool).and_then(|sample| {
                        engine.submit(CompositionRequest { sample, params })
                    });
                    match outcome {
                        Ok(_) => submitted += 1,
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }

            if completed == submitted {
                break;
            }

            let Ok((_, outcome)) = rx.recv() else {
                failure
                    .get_or_insert_with(|| AperioError::export("composition worker disconnected"));
                break;
            };
            match outcome {
                CompositionOutcome::Frame(frame) => {
                    if failure.is_none() && !cancelled {
                        match sink.push_frame(FrameIndex(pushed), &frame) {
                            Ok(()) => {
                                pushed += 1;
                                let fraction = pushed as f32 / total as f32;
                                self.progress_bits
                                    .store(fraction.to_bits(), Ordering::Release);
                            }
                            Err(err) => failure = Some(err),
                        }
                    }
                    pool.release(frame);
                }
                CompositionOutcome::Blank(frame) => {
                    pool.release(frame);
                    if failure.is_none() && !cancelled {
                        failure = Some(AperioError::export(format!(
                            "frame {completed} failed to compose"
                        )));
                    }
                }
                CompositionOutcome::Cancelled => {
                    if failure.is_none() && !cancelled {
                        failure = Some(AperioError::export(format!(
                            "frame {completed} was not composed"
                        )));
                    }
                }
            }
            completed += 1;
        }

        engine.stop();
        while let Ok((_, outcome)) = rx.try_recv() {
            if let Some(frame) = outcome.into_frame() {
                pool.release(frame);
            }
        }

        if let Some(err) = failure {
            if let Err(abort_err) = sink.abort() {
                tracing::debug!(%abort_err, "sink abort after export failure also failed");
            }
            return Err(err);
        }
        if cancelled {
            if let Err(abort_err) = sink.abort() {
                tracing::debug!(%abort_err, "sink abort after export cancel failed");
            }
            tracing::info!(pushed, total, "export cancelled");
            return Ok(ExportOutcome::Cancelled);
        }

        sink.end()?;
        tracing::info!(frames = pushed, "export completed");
        Ok(ExportOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferPool, PixelBuffer, PixelFormat};
    use crate::capture::{SampleSink as _, SynchronizedSample};
    use crate::clip::{ClipRecorder, RecorderOpts};
    use crate::effect::{PreviewMode, SegmentationModel};
    use crate::export::sink::InMemorySink;
    use crate::foundation::core::{Dimensions, TimestampUs};
    use std::path::{Path, PathBuf};

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "aperio_{name}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn dims(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h).unwrap()
    }

    fn record_clip(dir: &Path, pool: &BufferPool, fills: &[u8]) {
        let opts = RecorderOpts::new(dims(16, 16), dims(8, 8));
        let mut recorder = ClipRecorder::create(dir, pool.clone(), opts).unwrap();
        for (i, &fill) in fills.iter().enumerate() {
            let mut color = pool.acquire(PixelFormat::Bgra8, dims(16, 16)).unwrap();
            color.fill(fill);
            let mut depth = pool.acquire(PixelFormat::Gray8, dims(8, 8)).unwrap();
            depth.fill(128);
            recorder
                .on_sample(SynchronizedSample {
                    color,
                    depth,
                    calibration: None,
                    timestamp: TimestampUs::from_millis(i as i64 * 33),
                })
                .unwrap();
        }
        recorder.finish().unwrap();
    }

    fn normal_params() -> EffectParams {
        let mut params = EffectParams::new(dims(16, 16));
        params.mode = PreviewMode::Normal;
        params
    }

    #[test]
    fn exports_every_frame_in_order() {
        let tmp = temp_dir("session_order");
        let pool = BufferPool::with_defaults();
        record_clip(&tmp, &pool, &[10, 20, 30, 40]);

        let mut reader = ClipReader::open(&tmp).unwrap();
        let sink = InMemorySink::new();
        let mut sink_handle = sink.clone();
        let session = ExportSession::new();

        let outcome = session
            .run(
                DepthBlurCompositor::new(pool.clone()),
                &mut reader,
                &mut sink_handle,
                normal_params(),
                Fps::new(30, 1).unwrap(),
            )
            .unwrap();

        assert_eq!(outcome, ExportOutcome::Completed);
        assert!(sink.ended());
        let frames = sink.frames();
        assert_eq!(frames.len(), 4);
        for (i, (idx, bytes)) in frames.iter().enumerate() {
            assert_eq!(idx.0, i as u64);
            assert!(bytes.iter().all(|&b| b == [10, 20, 30, 40][i]));
        }
        assert!((session.fraction_complete() - 1.0).abs() < 1e-6);
        assert_eq!(pool.stats().outstanding, 0);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn cancel_before_run_writes_nothing() {
        let tmp = temp_dir("session_precancel");
        let pool = BufferPool::with_defaults();
        record_clip(&tmp, &pool, &[1, 2, 3]);

        let mut reader = ClipReader::open(&tmp).unwrap();
        let sink = InMemorySink::new();
        let mut sink_handle = sink.clone();
        let session = ExportSession::new();
        session.cancel();

        let outcome = session
            .run(
                DepthBlurCompositor::new(pool.clone()),
                &mut reader,
                &mut sink_handle,
                normal_params(),
                Fps::new(30, 1).unwrap(),
            )
            .unwrap();

        assert_eq!(outcome, ExportOutcome::Cancelled);
        assert!(sink.aborted());
        assert_eq!(sink.frame_count(), 0);
        assert_eq!(pool.stats().outstanding, 0);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn mid_run_cancel_aborts_the_sink() {
        struct GateModel {
            started: crossbeam_channel::Sender<()>,
            gate: crossbeam_channel::Receiver<()>,
        }
        impl SegmentationModel for GateModel {
            fn input_dims(&self) -> Dimensions {
                dims(8, 8)
            }
            fn infer(
                &self,
                _luma: &PixelBuffer,
                _disparity: &PixelBuffer,
                mask_out: &mut PixelBuffer,
            ) -> AperioResult<()> {
                let _ = self.started.send(());
                let _ = self.gate.recv();
                mask_out.fill(0);
                Ok(())
            }
        }

        let tmp = temp_dir("session_cancel");
        let pool = BufferPool::with_defaults();
        record_clip(&tmp, &pool, &[5, 6, 7, 8, 9]);

        let (started_tx, started_rx) = bounded(16);
        let (gate_tx, gate_rx) = bounded(16);
        let compositor = DepthBlurCompositor::new(pool.clone()).with_segmentation(Arc::new(
            GateModel {
                started: started_tx,
                gate: gate_rx,
            },
        ));

        let mut reader = ClipReader::open(&tmp).unwrap();
        let sink = InMemorySink::new();
        let mut sink_handle = sink.clone();
        let session = ExportSession::new();
        let canceller = session.clone();

        let helper = std::thread::spawn(move || {
            let _ = started_rx.recv();
            canceller.cancel();
            for _ in 0..16 {
                let _ = gate_tx.send(());
            }
        });

        let mut params = EffectParams::new(dims(16, 16));
        params.mode = PreviewMode::PortraitBlur;
        let outcome = session
            .run(
                compositor,
                &mut reader,
                &mut sink_handle,
                params,
                Fps::new(30, 1).unwrap(),
            )
            .unwrap();
        helper.join().unwrap();

        assert_eq!(outcome, ExportOutcome::Cancelled);
        assert!(sink.aborted());
        assert_eq!(sink.frame_count(), 0);
        assert_eq!(pool.stats().outstanding, 0);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn failed_composition_fails_the_export() {
        struct BrokenModel;
        impl SegmentationModel for BrokenModel {
            fn input_dims(&self) -> Dimensions {
                dims(8, 8)
            }
            fn infer(
                &self,
                _luma: &PixelBuffer,
                _disparity: &PixelBuffer,
                _mask_out: &mut PixelBuffer,
            ) -> AperioResult<()> {
                Err(AperioError::composition("inference backend gone"))
            }
        }

        let tmp = temp_dir("session_failed");
        let pool = BufferPool::with_defaults();
        record_clip(&tmp, &pool, &[1, 2]);

        let mut reader = ClipReader::open(&tmp).unwrap();
        let sink = InMemorySink::new();
        let mut sink_handle = sink.clone();
        let session = ExportSession::new();

        let mut params = EffectParams::new(dims(16, 16));
        params.mode = PreviewMode::PortraitBlur;
        let err = session
            .run(
                DepthBlurCompositor::new(pool.clone()).with_segmentation(Arc::new(BrokenModel)),
                &mut reader,
                &mut sink_handle,
                params,
                Fps::new(30, 1).unwrap(),
            )
            .unwrap_err();

        assert!(err.to_string().contains("failed to compose"));
        assert!(sink.aborted());
        assert_eq!(pool.stats().outstanding, 0);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn empty_clip_is_rejected() {
        let tmp = temp_dir("session_empty");
        let pool = BufferPool::with_defaults();
        record_clip(&tmp, &pool, &[]);

        let mut reader = ClipReader::open(&tmp).unwrap();
        let sink = InMemorySink::new();
        let mut sink_handle = sink.clone();
        let session = ExportSession::new();

        let err = session
            .run(
                DepthBlurCompositor::new(pool.clone()),
                &mut reader,
                &mut sink_handle,
                normal_params(),
                Fps::new(30, 1).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, AperioError::Validation(_)));
        assert!(!sink.ended());

        std::fs::remove_dir_all(&tmp).ok();
    }
}
