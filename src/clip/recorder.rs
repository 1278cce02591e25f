use crate::buffer::{BufferPool, PixelFormat};
use crate::capture::{SampleSink, SynchronizedSample};
use crate::clip::manifest::{
    COLOR_TRACK_FILE, ClipManifest, DEPTH_TRACK_FILE, MANIFEST_FILE,
};
use crate::effect::APERTURE_DEFAULT;
use crate::foundation::core::{Dimensions, Fps};
use crate::foundation::error::{AperioError, AperioResult};
use anyhow::Context as _;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;
use std::time::Duration;

/// Record-time parameters, fixed before the first sample arrives.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct RecorderOpts {
    pub color_dims: Dimensions,
    pub depth_dims: Dimensions,
    pub fps: Fps,
    pub tolerance: Duration,
    pub aperture: f32,
}

impl RecorderOpts {
    pub fn new(color_dims: Dimensions, depth_dims: Dimensions) -> Self {
        Self {
            color_dims,
            depth_dims,
            fps: Fps { num: 30, den: 1 },
            tolerance: Duration::from_millis(50),
            aperture: APERTURE_DEFAULT,
        }
    }
}

/// Appends synchronized samples to a clip directory.
///
/// Tracks are written as they arrive; the manifest lands on
/// [`finish`](ClipRecorder::finish). A directory without a manifest does
/// not open as a clip, so an interrupted recording is never mistaken for
/// a complete one.
pub struct ClipRecorder {
    dir: PathBuf,
    pool: BufferPool,
    color: BufWriter<File>,
    depth: BufWriter<File>,
    manifest: ClipManifest,
    write_failures: u64,
}

impl ClipRecorder {
    pub fn create(
        dir: impl Into<PathBuf>,
        pool: BufferPool,
        opts: RecorderOpts,
    ) -> AperioResult<Self> {
        let dir = dir.into();
        let manifest = ClipManifest {
            color_dims: opts.color_dims,
            depth_dims: opts.depth_dims,
            color_format: PixelFormat::Bgra8,
            depth_format: PixelFormat::Gray8,
            fps: opts.fps,
            tolerance_us: opts.tolerance.as_micros().min(u128::from(u64::MAX)) as u64,
            aperture: opts.aperture,
            calibration: None,
            frame_timestamps_us: Vec::new(),
        };
        manifest.validate()?;

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create clip directory '{}'", dir.display()))?;
        let color_path = dir.join(COLOR_TRACK_FILE);
        let color = BufWriter::new(
            File::create(&color_path)
                .with_context(|| format!("create clip track '{}'", color_path.display()))?,
        );
        let depth_path = dir.join(DEPTH_TRACK_FILE);
        let depth = BufWriter::new(
            File::create(&depth_path)
                .with_context(|| format!("create clip track '{}'", depth_path.display()))?,
        );

        Ok(Self {
            dir,
            pool,
            color,
            depth,
            manifest,
            write_failures: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.manifest.frame_count()
    }

    /// Samples that failed to persist (IO error or track mismatch).
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Append one sample's tracks without consuming it.
    pub fn write_sample(&mut self, sample: &SynchronizedSample) -> AperioResult<()> {
        match self.try_write(sample) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.write_failures += 1;
                Err(err)
            }
        }
    }

    fn try_write(&mut self, sample: &SynchronizedSample) -> AperioResult<()> {
        if sample.color.format() != self.manifest.color_format
            || sample.color.dims() != self.manifest.color_dims
        {
            return Err(AperioError::capture(format!(
                "clip expects {:?} {:?} color frames, got {:?} {:?}",
                self.manifest.color_format,
                self.manifest.color_dims,
                sample.color.format(),
                sample.color.dims()
            )));
        }
        if sample.depth.format() != self.manifest.depth_format
            || sample.depth.dims() != self.manifest.depth_dims
        {
            return Err(AperioError::capture(format!(
                "clip expects {:?} {:?} depth frames, got {:?} {:?}",
                self.manifest.depth_format,
                self.manifest.depth_dims,
                sample.depth.format(),
                sample.depth.dims()
            )));
        }

        self.color
            .write_all(sample.color.as_bytes())
            .context("append color track")?;
        self.depth
            .write_all(sample.depth.as_bytes())
            .context("append depth track")?;

        if self.manifest.calibration.is_none() {
            self.manifest.calibration = sample.calibration;
        }
        self.manifest.frame_timestamps_us.push(sample.timestamp.0);
        Ok(())
    }

    /// Flush both tracks and write the manifest.
    pub fn finish(mut self) -> AperioResult<ClipManifest> {
        self.color.flush().context("flush color track")?;
        self.depth.flush().context("flush depth track")?;

        let json = serde_json::to_string_pretty(&self.manifest)
            .map_err(|e| AperioError::serde(format!("encode clip manifest: {e}")))?;
        let path = self.dir.join(MANIFEST_FILE);
        std::fs::write(&path, json)
            .with_context(|| format!("write clip manifest '{}'", path.display()))?;
        tracing::info!(
            dir = %self.dir.display(),
            frames = self.manifest.frame_count(),
            "clip recorded"
        );
        Ok(self.manifest)
    }
}

impl SampleSink for ClipRecorder {
    fn on_sample(&mut self, sample: SynchronizedSample) -> AperioResult<()> {
        let res = self.write_sample(&sample);
        sample.release(&self.pool);
        res
    }
}

/// Persists every sample, then forwards it to the wrapped sink.
///
/// A persistence failure is logged and counted but never blocks the
/// downstream sink: live preview outlives a full disk.
pub struct RecordingTee<S> {
    recorder: ClipRecorder,
    inner: S,
}

impl<S: SampleSink> RecordingTee<S> {
    pub fn new(recorder: ClipRecorder, inner: S) -> Self {
        Self { recorder, inner }
    }

    pub fn recorder(&self) -> &ClipRecorder {
        &self.recorder
    }

    /// Finalize the clip and hand the wrapped sink back.
    pub fn finish(self) -> AperioResult<(ClipManifest, S)> {
        let manifest = self.recorder.finish()?;
        Ok((manifest, self.inner))
    }
}

impl<S: SampleSink> SampleSink for RecordingTee<S> {
    fn on_sample(&mut self, sample: SynchronizedSample) -> AperioResult<()> {
        if let Err(err) = self.recorder.write_sample(&sample) {
            tracing::warn!(%err, "sample not persisted to clip");
        }
        self.inner.on_sample(sample)
    }
}
