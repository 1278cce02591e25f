use std::path::Path;

use crate::clip::ClipReader;
use crate::effect::{DepthBlurCompositor, EffectParams};
use crate::foundation::error::{AperioError, AperioResult};

/// Which clip frame to turn into a still, and how.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PosterRequest {
    pub frame_index: u64,
    pub params: EffectParams,
}

impl PosterRequest {
    /// Poster from the first frame.
    pub fn new(params: EffectParams) -> Self {
        Self {
            frame_index: 0,
            params,
        }
    }
}

/// Compose a single clip frame into an RGBA still.
///
/// Goes through the same compositor as live preview and export, so the
/// poster matches what those paths produce for the frame.
pub fn poster(
    clip_dir: impl AsRef<Path>,
    compositor: &DepthBlurCompositor,
    request: &PosterRequest,
) -> AperioResult<image::RgbaImage> {
    let mut reader = ClipReader::open(clip_dir)?;
    let pool = compositor.pool().clone();

    let sample = reader.sample_at(request.frame_index, &pool)?;
    let composed = compositor.compose(
        &sample.color,
        &sample.depth,
        sample.calibration.as_ref(),
        &request.params,
    );
    sample.release(&pool);
    let Some(frame) = composed else {
        return Err(AperioError::composition(format!(
            "poster frame {} failed to compose",
            request.frame_index
        )));
    };

    let dims = frame.dims();
    let mut rgba = Vec::with_capacity(dims.pixel_count() * 4);
    for px in frame.as_bytes().chunks_exact(4) {
        rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
    pool.release(frame);

    image::RgbaImage::from_raw(dims.width, dims.height, rgba)
        .ok_or_else(|| AperioError::composition("poster image construction failed"))
}
