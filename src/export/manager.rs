use crate::clip::ClipReader;
use crate::effect::{DepthBlurCompositor, EffectParams};
use crate::export::session::{ExportOutcome, ExportSession};
use crate::export::sink::FrameSink;
use crate::foundation::core::{Fps, TimestampUs};
use crate::foundation::error::{AperioError, AperioResult};
use crate::foundation::observer::ObserverRegistry;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Manager configuration.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct ExportOpts {
    /// Interval between progress reports while an export is pending.
    pub progress_interval: Duration,
}

impl Default for ExportOpts {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(100),
        }
    }
}

/// One export order: which clip, where to, and how to compose it.
#[derive(Clone, Debug)]
pub struct ExportTask {
    pub clip_dir: PathBuf,
    /// Location reported on success. For an ffmpeg sink this matches the
    /// sink's own output path.
    pub out_path: PathBuf,
    pub params: EffectParams,
    /// Override for the clip's recorded rate.
    pub fps: Option<Fps>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportState {
    Ready,
    Pending,
}

/// Terminal result of the most recent export.
#[derive(Clone, Debug)]
pub enum ExportResult {
    Finished { out_path: PathBuf },
    Failed { error: Arc<AperioError> },
    Cancelled,
}

/// Events broadcast to export observers.
///
/// Exactly one terminal event (`Finished`, `Failed`, `Cancelled`) per
/// export, always after the last `Progress` for that export.
#[derive(Clone, Debug)]
pub enum ExportEvent {
    /// Periodic while pending; `timestamp` is time since the export began.
    Progress { fraction: f32, timestamp: TimestampUs },
    Finished { out_path: PathBuf },
    Failed { error: Arc<AperioError> },
    Cancelled,
}

struct ActiveExport {
    session: ExportSession,
    worker: JoinHandle<()>,
    sampler: JoinHandle<()>,
}

struct ManagerInner {
    active: Option<ActiveExport>,
    last_result: Option<ExportResult>,
}

/// Single-flight export orchestration.
///
/// `export` hands the work to a dedicated thread and returns immediately;
/// a second `export` while one is pending is rejected rather than queued.
/// A sampler thread forwards fraction-complete to observers at a fixed
/// interval and delivers the terminal event itself, so reporting stops
/// the instant the export ends.
pub struct ExportTaskManager {
    opts: ExportOpts,
    events: ObserverRegistry<ExportEvent>,
    inner: Arc<Mutex<ManagerInner>>,
}

impl ExportTaskManager {
    pub fn new(opts: ExportOpts) -> Self {
        Self {
            opts,
            events: ObserverRegistry::new(),
            inner: Arc::new(Mutex::new(ManagerInner {
                active: None,
                last_result: None,
            })),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ExportOpts::default())
    }

    /// Registry carrying progress and terminal events.
    pub fn events(&self) -> ObserverRegistry<ExportEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> ExportState {
        let mut inner = self.inner.lock();
        reap_finished(&mut inner);
        if inner.active.is_some() {
            ExportState::Pending
        } else {
            ExportState::Ready
        }
    }

    /// Terminal result of the most recent export, if any finished yet.
    pub fn last_result(&self) -> Option<ExportResult> {
        self.inner.lock().last_result.clone()
    }

    /// Start exporting `task` through `compositor` into `sink`.
    ///
    /// Returns immediately; completion arrives as an [`ExportEvent`].
    /// Errors synchronously only when an export is already pending.
    #[tracing::instrument(skip(self, compositor, sink))]
    pub fn export<S: FrameSink + 'static>(
        &self,
        task: ExportTask,
        compositor: DepthBlurCompositor,
        sink: S,
    ) -> AperioResult<()> {
        let mut inner = self.inner.lock();
        reap_finished(&mut inner);
        if inner.active.is_some() {
            return Err(AperioError::validation("an export is already in progress"));
        }

        let session = ExportSession::new();
        let (done_tx, done_rx) = bounded::<ExportEvent>(1);

        let sampler = spawn_sampler(
            session.clone(),
            self.events.clone(),
            self.opts.progress_interval,
            done_rx,
        )?;
        let worker = spawn_worker(
            session.clone(),
            Arc::clone(&self.inner),
            task,
            compositor,
            sink,
            done_tx,
        )?;

        inner.active = Some(ActiveExport {
            session,
            worker,
            sampler,
        });
        Ok(())
    }

    /// Request cancellation of the pending export. Ignored when idle.
    pub fn cancel(&self) {
        let inner = self.inner.lock();
        match &inner.active {
            Some(active) => active.session.cancel(),
            None => tracing::debug!("export cancel ignored, nothing pending"),
        }
    }
}

impl Drop for ExportTaskManager {
    fn drop(&mut self) {
        let active = self.inner.lock().active.take();
        if let Some(active) = active {
            active.session.cancel();
            let _ = active.worker.join();
            let _ = active.sampler.join();
        }
    }
}

/// Join threads whose export already ended so the manager reads Ready.
fn reap_finished(inner: &mut ManagerInner) {
    if inner.active.as_ref().is_some_and(|a| a.worker.is_finished())
        && let Some(active) = inner.active.take()
    {
        let _ = active.worker.join();
        let _ = active.sampler.join();
    }
}

fn spawn_sampler(
    session: ExportSession,
    events: ObserverRegistry<ExportEvent>,
    interval: Duration,
    done_rx: Receiver<ExportEvent>,
) -> AperioResult<JoinHandle<()>> {
    let started = Instant::now();
    std::thread::Builder::new()
        .name("aperio-export-progress".into())
        .spawn(move || {
            loop {
                match done_rx.recv_timeout(interval) {
                    Ok(terminal) => {
                        events.post(terminal);
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        events.post(ExportEvent::Progress {
                            fraction: session.fraction_complete(),
                            timestamp: TimestampUs::from_secs_f64(
                                started.elapsed().as_secs_f64(),
                            ),
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .map_err(|e| AperioError::export(format!("spawn export progress sampler: {e}")))
}

fn spawn_worker<S: FrameSink + 'static>(
    session: ExportSession,
    inner: Arc<Mutex<ManagerInner>>,
    task: ExportTask,
    compositor: DepthBlurCompositor,
    mut sink: S,
    done_tx: Sender<ExportEvent>,
) -> AperioResult<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("aperio-export".into())
        .spawn(move || {
            let result = run_task(&session, &task, compositor, &mut sink);
            let (event, record) = match result {
                Ok(ExportOutcome::Completed) => (
                    ExportEvent::Finished {
                        out_path: task.out_path.clone(),
                    },
                    ExportResult::Finished {
                        out_path: task.out_path,
                    },
                ),
                Ok(ExportOutcome::Cancelled) => (ExportEvent::Cancelled, ExportResult::Cancelled),
                Err(err) => {
                    tracing::error!(%err, "export failed");
                    let error = Arc::new(err);
                    (
                        ExportEvent::Failed {
                            error: Arc::clone(&error),
                        },
                        ExportResult::Failed { error },
                    )
                }
            };
            inner.lock().last_result = Some(record);
            // The sampler owns event delivery; routing the terminal event
            // through it keeps every Progress strictly before it.
            let _ = done_tx.send(event);
        })
        .map_err(|e| AperioError::export(format!("spawn export worker: {e}")))
}

fn run_task(
    session: &ExportSession,
    task: &ExportTask,
    compositor: DepthBlurCompositor,
    sink: &mut dyn FrameSink,
) -> AperioResult<ExportOutcome> {
    let mut reader = ClipReader::open(&task.clip_dir)?;
    let fps = task.fps.unwrap_or(reader.manifest().fps);
    session.run(compositor, &mut reader, sink, task.params, fps)
}
