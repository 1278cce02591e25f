use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::buffer::BufferPool;
use crate::composition::request::{
    CompositionOutcome, CompositionRequest, RenderContext, RequestId,
};
use crate::effect::DepthBlurCompositor;
use crate::foundation::error::{AperioError, AperioResult};

const COMMAND_DEPTH: usize = 64;

enum Command {
    Render {
        id: RequestId,
        generation: u64,
        request: CompositionRequest,
    },
    SetContext(RenderContext),
    Stop,
}

/// Callback receiving exactly one outcome per submitted request, in
/// submission order. Frame-carrying outcomes hand the callback ownership
/// of a pool buffer.
pub type OnOutcome = Box<dyn FnMut(RequestId, CompositionOutcome) + Send>;

/// Counters published by the engine worker.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub composed: u64,
    pub blanks: u64,
    pub cancelled: u64,
}

/// Serial composition service: requests are composed one at a time in
/// FIFO order on a dedicated worker thread, so output is deterministic
/// and ordered relative to submission.
///
/// Cancellation is cooperative. [`cancel_all_pending`] marks every
/// request submitted so far; the worker consults the mark at the top of
/// each request and answers marked ones with
/// [`CompositionOutcome::Cancelled`] instead of composing. A request
/// already past that check finishes normally, and requests submitted
/// after the call are untouched. No request is ever silently dropped:
/// even at shutdown, queued requests drain with a cancelled outcome.
///
/// [`cancel_all_pending`]: CompositionEngine::cancel_all_pending
pub struct CompositionEngine {
    tx: Sender<Command>,
    next_id: AtomicU64,
    generation: AtomicU64,
    cancel_watermark: Arc<AtomicU64>,
    stats: Arc<Mutex<EngineStats>>,
    pool: BufferPool,
    handle: Option<JoinHandle<()>>,
}

impl CompositionEngine {
    pub fn new(compositor: DepthBlurCompositor, on_outcome: OnOutcome) -> AperioResult<Self> {
        let (tx, rx) = bounded::<Command>(COMMAND_DEPTH);
        let cancel_watermark = Arc::new(AtomicU64::new(0));
        let stats = Arc::new(Mutex::new(EngineStats::default()));
        let pool = compositor.pool().clone();

        let handle = {
            let watermark = Arc::clone(&cancel_watermark);
            let stats = Arc::clone(&stats);
            let pool = pool.clone();
            std::thread::Builder::new()
                .name("aperio-composition".into())
                .spawn(move || worker_loop(compositor, pool, rx, watermark, stats, on_outcome))
                .map_err(|e| AperioError::composition(format!("spawn composition worker: {e}")))?
        };

        Ok(Self {
            tx,
            next_id: AtomicU64::new(0),
            generation: AtomicU64::new(1),
            cancel_watermark,
            stats,
            pool,
            handle: Some(handle),
        })
    }

    /// Install or replace the fallback geometry. Ordered relative to
    /// requests: submissions after this call fall back to the new context.
    pub fn set_render_context(&self, context: RenderContext) {
        let _ = self.tx.send(Command::SetContext(context));
    }

    /// Enqueue one request. The outcome callback fires exactly once for
    /// the returned id.
    pub fn submit(&self, request: CompositionRequest) -> AperioResult<RequestId> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let generation = self.generation.load(Ordering::Acquire);
        self.tx
            .send(Command::Render {
                id,
                generation,
                request,
            })
            .map_err(|err| {
                if let Command::Render { request, .. } = err.0 {
                    request.sample.release(&self.pool);
                }
                AperioError::composition("composition engine is stopped")
            })?;
        Ok(id)
    }

    /// Mark every request submitted so far as cancelled. Marked requests
    /// not yet started answer with a cancelled outcome; later submissions
    /// proceed normally.
    pub fn cancel_all_pending(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel);
        self.cancel_watermark
            .fetch_max(generation, Ordering::AcqRel);
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.lock().clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(Command::Stop);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("composition worker panicked");
        }
    }
}

impl Drop for CompositionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    compositor: DepthBlurCompositor,
    pool: BufferPool,
    rx: Receiver<Command>,
    cancel_watermark: Arc<AtomicU64>,
    stats: Arc<Mutex<EngineStats>>,
    mut on_outcome: OnOutcome,
) {
    let mut context: Option<RenderContext> = None;

    while let Ok(command) = rx.recv() {
        match command {
            Command::SetContext(ctx) => context = Some(ctx),
            Command::Render {
                id,
                generation,
                request,
            } => {
                if generation <= cancel_watermark.load(Ordering::Acquire) {
                    request.sample.release(&pool);
                    stats.lock().cancelled += 1;
                    on_outcome(id, CompositionOutcome::Cancelled);
                    continue;
                }

                debug_assert!(
                    context.is_some(),
                    "composition started without a render context"
                );

                let sample = &request.sample;
                let composed = compositor.compose(
                    &sample.color,
                    &sample.depth,
                    sample.calibration.as_ref(),
                    &request.params,
                );
                request.sample.release(&pool);

                let outcome = match composed {
                    Some(frame) => {
                        stats.lock().composed += 1;
                        CompositionOutcome::Frame(frame)
                    }
                    None => match context.as_ref().and_then(|ctx| ctx.blank_frame(&pool)) {
                        Some(blank) => {
                            stats.lock().blanks += 1;
                            CompositionOutcome::Blank(blank)
                        }
                        None => {
                            tracing::warn!(
                                id = id.0,
                                "no fallback frame available, answering cancelled"
                            );
                            stats.lock().cancelled += 1;
                            CompositionOutcome::Cancelled
                        }
                    },
                };
                on_outcome(id, outcome);
            }
            Command::Stop => break,
        }
    }

    // Never leave a request unanswered, even across shutdown.
    while let Ok(command) = rx.try_recv() {
        if let Command::Render { id, request, .. } = command {
            request.sample.release(&pool);
            stats.lock().cancelled += 1;
            on_outcome(id, CompositionOutcome::Cancelled);
        }
    }
}
