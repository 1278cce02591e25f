use crate::buffer::BufferPool;
use crate::capture::SynchronizedSample;
use crate::clip::manifest::{
    COLOR_TRACK_FILE, ClipManifest, DEPTH_TRACK_FILE, MANIFEST_FILE,
};
use crate::foundation::core::TimestampUs;
use crate::foundation::error::{AperioError, AperioResult};
use anyhow::Context as _;
use std::fs::File;
use std::io::{Read as _, Seek as _, SeekFrom};
use std::path::Path;

/// Random access over a recorded clip.
///
/// [`open`](ClipReader::open) validates the manifest against the actual
/// track sizes, so a truncated or over-long track is caught before any
/// frame is served. [`sample_at`](ClipReader::sample_at) rebuilds a
/// [`SynchronizedSample`] from pool buffers; callers release it exactly
/// as they would a live one.
pub struct ClipReader {
    manifest: ClipManifest,
    color: File,
    depth: File,
}

impl ClipReader {
    #[tracing::instrument(skip(dir))]
    pub fn open(dir: impl AsRef<Path>) -> AperioResult<Self> {
        let dir = dir.as_ref();
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("read clip manifest '{}'", manifest_path.display()))?;
        let manifest: ClipManifest = serde_json::from_str(&json)
            .map_err(|e| AperioError::serde(format!("decode clip manifest: {e}")))?;
        manifest.validate()?;

        let color = open_track(
            dir,
            COLOR_TRACK_FILE,
            manifest.frame_count() * manifest.color_frame_bytes() as u64,
        )?;
        let depth = open_track(
            dir,
            DEPTH_TRACK_FILE,
            manifest.frame_count() * manifest.depth_frame_bytes() as u64,
        )?;

        Ok(Self {
            manifest,
            color,
            depth,
        })
    }

    pub fn manifest(&self) -> &ClipManifest {
        &self.manifest
    }

    pub fn frame_count(&self) -> u64 {
        self.manifest.frame_count()
    }

    /// Read frame `index` of both tracks into pool buffers.
    pub fn sample_at(&mut self, index: u64, pool: &BufferPool) -> AperioResult<SynchronizedSample> {
        let count = self.manifest.frame_count();
        if index >= count {
            return Err(AperioError::validation(format!(
                "frame index {index} out of range 0..{count}"
            )));
        }
        let ts = TimestampUs(self.manifest.frame_timestamps_us[index as usize]);

        let mut color = pool
            .acquire(self.manifest.color_format, self.manifest.color_dims)
            .ok_or_else(|| AperioError::capture("buffer pool exhausted reading clip color"))?;
        if let Err(err) = read_frame(
            &mut self.color,
            index,
            self.manifest.color_frame_bytes(),
            color.as_bytes_mut(),
        ) {
            pool.release(color);
            return Err(err);
        }

        let Some(mut depth) = pool.acquire(self.manifest.depth_format, self.manifest.depth_dims)
        else {
            pool.release(color);
            return Err(AperioError::capture("buffer pool exhausted reading clip depth"));
        };
        if let Err(err) = read_frame(
            &mut self.depth,
            index,
            self.manifest.depth_frame_bytes(),
            depth.as_bytes_mut(),
        ) {
            pool.release(color);
            pool.release(depth);
            return Err(err);
        }

        color.set_timestamp(ts);
        depth.set_timestamp(ts);
        Ok(SynchronizedSample {
            color,
            depth,
            calibration: self.manifest.calibration,
            timestamp: ts,
        })
    }
}

fn open_track(dir: &Path, name: &str, expected_len: u64) -> AperioResult<File> {
    let path = dir.join(name);
    let file =
        File::open(&path).with_context(|| format!("open clip track '{}'", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat clip track '{}'", path.display()))?
        .len();
    if len != expected_len {
        return Err(AperioError::validation(format!(
            "clip track '{}' is {len} bytes, manifest implies {expected_len}",
            path.display()
        )));
    }
    Ok(file)
}

fn read_frame(
    track: &mut File,
    index: u64,
    frame_bytes: usize,
    out: &mut [u8],
) -> AperioResult<()> {
    track
        .seek(SeekFrom::Start(index * frame_bytes as u64))
        .context("seek clip track")?;
    track.read_exact(out).context("read clip frame")?;
    Ok(())
}
