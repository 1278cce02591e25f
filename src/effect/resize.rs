use crate::buffer::{BufferPool, PixelBuffer, PixelFormat};
use crate::foundation::core::Dimensions;

/// How a composed frame maps onto a differently shaped output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeMode {
    /// Scale so source width matches target width; letterbox or crop
    /// vertically.
    FitWidth,
    /// Scale so the height fits in width-normalized terms; letterbox or
    /// crop horizontally.
    FitHeight,
    /// Cover the whole target, cropping whichever axis overflows.
    Fill,
}

/// Scale factor applied to `source` when drawing into `target`.
pub fn scale_for_resize(source: Dimensions, target: Dimensions, mode: ResizeMode) -> f32 {
    let aspect = source.aspect_ratio() as f32;
    let fit_width = target.width as f32 / source.width as f32;
    let fit_height = (target.height as f32 * aspect) / target.width as f32;
    match mode {
        ResizeMode::FitWidth => fit_width,
        ResizeMode::FitHeight => fit_height,
        ResizeMode::Fill => {
            if (source.height as f32) * fit_width < target.height as f32 {
                fit_height
            } else {
                fit_width
            }
        }
    }
}

struct AxisTap {
    lo: usize,
    hi: usize,
    frac: u32,
}

// Center-aligned back-mapping of destination index i to a source
// coordinate in Q8, clamped to the source extent.
fn axis_tap(i: u32, src_len: u32, dst_len: u32) -> AxisTap {
    let q8 = i64::from(2 * i + 1) * i64::from(src_len) * 128 / i64::from(dst_len) - 128;
    let q8 = q8.clamp(0, (i64::from(src_len) - 1) * 256);
    let lo = (q8 >> 8) as usize;
    let frac = (q8 & 255) as u32;
    let hi = (lo + 1).min(src_len as usize - 1);
    AxisTap { lo, hi, frac }
}

fn letterbox_fill(buf: &mut PixelBuffer) {
    buf.fill(0);
    if buf.format() == PixelFormat::Bgra8 {
        for px in buf.as_bytes_mut().chunks_exact_mut(4) {
            px[3] = 255;
        }
    }
}

/// Draw `src` scaled per `mode` into a fresh `target`-sized buffer,
/// centered. Regions the scaled image does not cover are opaque black;
/// regions falling outside the target are cropped away.
///
/// `None` when the pool cannot supply the output buffer or the scale
/// degenerates.
pub fn resize_into(
    src: &PixelBuffer,
    target: Dimensions,
    mode: ResizeMode,
    pool: &BufferPool,
) -> Option<PixelBuffer> {
    let scale = scale_for_resize(src.dims(), target, mode);
    if !scale.is_finite() || scale <= 0.0 {
        tracing::debug!(scale, "degenerate resize scale");
        return None;
    }

    let mut out = pool.acquire(src.format(), target)?;

    if src.dims() == target && (scale - 1.0).abs() < f32::EPSILON {
        out.as_bytes_mut().copy_from_slice(src.as_bytes());
        return Some(out);
    }

    let channels = src.format().bytes_per_pixel();
    let src_dims = src.dims();
    let scaled_w = ((src_dims.width as f32 * scale).round() as i64).max(1);
    let scaled_h = ((src_dims.height as f32 * scale).round() as i64).max(1);
    let off_x = (i64::from(target.width) - scaled_w) / 2;
    let off_y = (i64::from(target.height) - scaled_h) / 2;

    letterbox_fill(&mut out);

    let x0 = off_x.max(0);
    let x1 = (off_x + scaled_w).min(i64::from(target.width));
    let y0 = off_y.max(0);
    let y1 = (off_y + scaled_h).min(i64::from(target.height));
    if x0 >= x1 || y0 >= y1 {
        return Some(out);
    }

    let col_taps: Vec<AxisTap> = (x0..x1)
        .map(|tx| axis_tap((tx - off_x) as u32, src_dims.width, scaled_w as u32))
        .collect();

    for ty in y0..y1 {
        let rt = axis_tap((ty - off_y) as u32, src_dims.height, scaled_h as u32);
        let row_lo = src.row(rt.lo as u32);
        let row_hi = src.row(rt.hi as u32);
        let out_row = out.row_mut(ty as u32);
        for (i, ct) in col_taps.iter().enumerate() {
            let tx = (x0 as usize) + i;
            for c in 0..channels {
                let tl = u32::from(row_lo[ct.lo * channels + c]);
                let tr = u32::from(row_lo[ct.hi * channels + c]);
                let bl = u32::from(row_hi[ct.lo * channels + c]);
                let br = u32::from(row_hi[ct.hi * channels + c]);
                let top = (tl * (256 - ct.frac) + tr * ct.frac + 128) >> 8;
                let bot = (bl * (256 - ct.frac) + br * ct.frac + 128) >> 8;
                let v = (top * (256 - rt.frac) + bot * rt.frac + 128) >> 8;
                out_row[tx * channels + c] = v as u8;
            }
        }
    }

    Some(out)
}

/// Non-uniform whole-to-whole bilinear scale, ignoring aspect ratio.
/// Feeds fixed-input-size consumers such as segmentation models.
pub(crate) fn stretch_into(
    src: &PixelBuffer,
    target: Dimensions,
    pool: &BufferPool,
) -> Option<PixelBuffer> {
    let mut out = pool.acquire(src.format(), target)?;
    if src.dims() == target {
        out.as_bytes_mut().copy_from_slice(src.as_bytes());
        return Some(out);
    }

    let channels = src.format().bytes_per_pixel();
    let src_dims = src.dims();
    let col_taps: Vec<AxisTap> = (0..target.width)
        .map(|tx| axis_tap(tx, src_dims.width, target.width))
        .collect();

    for ty in 0..target.height {
        let rt = axis_tap(ty, src_dims.height, target.height);
        let row_lo = src.row(rt.lo as u32);
        let row_hi = src.row(rt.hi as u32);
        let out_row = out.row_mut(ty);
        for (tx, ct) in col_taps.iter().enumerate() {
            for c in 0..channels {
                let tl = u32::from(row_lo[ct.lo * channels + c]);
                let tr = u32::from(row_lo[ct.hi * channels + c]);
                let bl = u32::from(row_hi[ct.lo * channels + c]);
                let br = u32::from(row_hi[ct.hi * channels + c]);
                let top = (tl * (256 - ct.frac) + tr * ct.frac + 128) >> 8;
                let bot = (bl * (256 - ct.frac) + br * ct.frac + 128) >> 8;
                let v = (top * (256 - rt.frac) + bot * rt.frac + 128) >> 8;
                out_row[tx * channels + c] = v as u8;
            }
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h).unwrap()
    }

    #[test]
    fn fit_width_scale_is_target_over_source_width() {
        let s = scale_for_resize(dims(1920, 1080), dims(1080, 1920), ResizeMode::FitWidth);
        assert_eq!(s, 0.5625);
    }

    #[test]
    fn fit_height_scale_uses_width_normalized_height() {
        let s = scale_for_resize(dims(1920, 1080), dims(1080, 1920), ResizeMode::FitHeight);
        let expected = (1920.0f32 * (1920.0 / 1080.0)) / 1080.0;
        assert!((s - expected).abs() < 1e-4);
    }

    #[test]
    fn fill_picks_the_covering_scale() {
        // Portrait target: width fit leaves the height short, so fill
        // switches to the height scale.
        let tall = scale_for_resize(dims(1920, 1080), dims(1080, 1920), ResizeMode::Fill);
        let fit_h = scale_for_resize(dims(1920, 1080), dims(1080, 1920), ResizeMode::FitHeight);
        assert_eq!(tall, fit_h);

        // Landscape target already covered by the width fit.
        let wide = scale_for_resize(dims(640, 480), dims(1280, 720), ResizeMode::Fill);
        assert_eq!(wide, 2.0);
    }

    #[test]
    fn identity_resize_is_bit_exact() {
        let pool = BufferPool::with_defaults();
        let d = dims(7, 5);
        let mut src = pool.acquire(PixelFormat::Bgra8, d).unwrap();
        for (i, v) in src.as_bytes_mut().iter_mut().enumerate() {
            *v = (i % 256) as u8;
        }

        let out = resize_into(&src, d, ResizeMode::FitWidth, &pool).unwrap();
        assert_eq!(out.as_bytes(), src.as_bytes());

        pool.release(out);
        pool.release(src);
    }

    #[test]
    fn fit_width_letterboxes_vertically() {
        let pool = BufferPool::with_defaults();
        let mut src = pool.acquire(PixelFormat::Bgra8, dims(8, 4)).unwrap();
        src.fill(200);

        // Scale 0.5: content occupies rows 3..5 of the 4x8 target.
        let out = resize_into(&src, dims(4, 8), ResizeMode::FitWidth, &pool).unwrap();
        assert_eq!(&out.row(0)[..4], &[0, 0, 0, 255]);
        assert_eq!(&out.row(7)[..4], &[0, 0, 0, 255]);
        assert_eq!(&out.row(3)[..4], &[200, 200, 200, 200]);
        assert_eq!(&out.row(4)[..4], &[200, 200, 200, 200]);

        pool.release(out);
        pool.release(src);
    }

    #[test]
    fn stretch_interpolates_between_endpoints() {
        let pool = BufferPool::with_defaults();
        let mut src = pool.acquire(PixelFormat::Gray8, dims(2, 1)).unwrap();
        src.as_bytes_mut().copy_from_slice(&[0, 255]);

        let out = stretch_into(&src, dims(4, 1), &pool).unwrap();
        assert_eq!(out.as_bytes(), &[0, 64, 191, 255]);

        pool.release(out);
        pool.release(src);
    }

    #[test]
    fn fill_crops_instead_of_letterboxing() {
        let pool = BufferPool::with_defaults();
        let mut src = pool.acquire(PixelFormat::Gray8, dims(4, 4)).unwrap();
        src.fill(90);

        let out = resize_into(&src, dims(2, 4), ResizeMode::Fill, &pool).unwrap();
        assert!(out.as_bytes().iter().all(|&v| v == 90));

        pool.release(out);
        pool.release(src);
    }
}
