use crate::buffer::{BufferPool, PixelBuffer, PixelFormat};
use crate::foundation::error::{AperioError, AperioResult};
use rayon::prelude::*;
use smallvec::SmallVec;

/// Number of pre-blurred pyramid levels the bokeh interpolates between.
/// Level 0 is the unblurred source.
const BLUR_LEVELS: usize = 4;

/// Hard cap on gaussian radius; bounds worst-case kernel cost.
pub(crate) const MAX_BLUR_RADIUS: u32 = 31;

/// Per-frame blur drive derived from the composition request.
pub(crate) struct BokehParams {
    /// Radius of the strongest level, in pixels at color resolution.
    pub max_radius: u32,
    /// Disparity of the focus plane; pixels at this disparity stay sharp.
    pub focus_disparity: u8,
    /// Disparity magnitude correction from calibration, 1.0 when absent.
    pub disparity_scale: f32,
}

type KernelQ16 = SmallVec<[u32; 64]>;

fn gaussian_kernel_q16(radius: u32, sigma: f32) -> AperioResult<KernelQ16> {
    if radius == 0 {
        let mut k = KernelQ16::new();
        k.push(1 << 16);
        return Ok(k);
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(AperioError::composition("blur sigma must be > 0"));
    }

    let r = radius as i32;
    let mut weights_f = Vec::<f64>::with_capacity((2 * r + 1) as usize);
    let mut sum = 0.0f64;
    let sigma = f64::from(sigma);
    let denom = 2.0 * sigma * sigma;
    for i in -r..=r {
        let x = f64::from(i);
        let w = (-x * x / denom).exp();
        weights_f.push(w);
        sum += w;
    }
    if sum <= 0.0 {
        return Err(AperioError::composition("gaussian kernel sum is zero"));
    }

    let mut weights = KernelQ16::with_capacity(weights_f.len());
    let mut acc: i64 = 0;
    for &wf in &weights_f {
        let q = ((wf / sum) * 65536.0).round() as i64;
        let q = q.clamp(0, 65536);
        weights.push(q as u32);
        acc += q;
    }
    // Push rounding residue into the center tap so the kernel sums to one
    // exactly and constant regions stay bit-identical.
    let delta = 65536 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        let mid_val = i64::from(weights[mid]);
        weights[mid] = (mid_val + delta).clamp(0, 65536) as u32;
    }

    Ok(weights)
}

// Rows are independent in both passes, so each runs row-parallel. The
// composition worker stays serial at the frame level; only the interior
// of one blur fans out.
fn horizontal_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    let row_bytes = width as usize * 4;
    debug_assert_eq!(dst.len(), row_bytes * height as usize);
    dst.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, dst_row)| {
            let src_row = &src[y * row_bytes..(y + 1) * row_bytes];
            for x in 0..w {
                let mut acc = [0u64; 4];
                for (ki, &kw) in k.iter().enumerate() {
                    let sx = (x + ki as i32 - radius).clamp(0, w - 1) as usize;
                    for c in 0..4 {
                        acc[c] += u64::from(kw) * u64::from(src_row[sx * 4 + c]);
                    }
                }
                let out_idx = x as usize * 4;
                for c in 0..4 {
                    dst_row[out_idx + c] = q16_to_u8(acc[c]);
                }
            }
        });
}

fn vertical_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let h = height as i32;
    let row_bytes = width as usize * 4;
    dst.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, dst_row)| {
            for x in 0..width as usize {
                let mut acc = [0u64; 4];
                for (ki, &kw) in k.iter().enumerate() {
                    let sy = (y as i32 + ki as i32 - radius).clamp(0, h - 1) as usize;
                    let idx = sy * row_bytes + x * 4;
                    for c in 0..4 {
                        acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                    }
                }
                for c in 0..4 {
                    dst_row[x * 4 + c] = q16_to_u8(acc[c]);
                }
            }
        });
}

fn q16_to_u8(acc: u64) -> u8 {
    let v = (acc + 32768) >> 16;
    (v.min(255)) as u8
}

fn sigma_for(radius: u32) -> f32 {
    (radius as f32 * 0.5).max(0.5)
}

struct ScratchGuard<'a> {
    pool: &'a BufferPool,
    bufs: Vec<PixelBuffer>,
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        for buf in self.bufs.drain(..) {
            self.pool.release(buf);
        }
    }
}

/// Depth-guided variable-radius blur.
///
/// Builds a small pyramid of uniformly blurred copies of the color frame,
/// then per pixel interpolates between adjacent levels according to the
/// disparity distance from the focus plane (the simulated circle of
/// confusion). Pixels on the focus plane read level 0 and come out
/// bit-identical to the source. An optional `keep_mask` (a segmentation
/// result, 255 = subject) attenuates the level so masked regions stay
/// sharp regardless of their disparity.
///
/// Scratch and output buffers come from the pool; `None` means the pool
/// could not supply them or a kernel could not be built, and the caller
/// falls back per the usual drop-this-frame rules.
pub(crate) fn depth_guided_blur(
    color: &PixelBuffer,
    disparity: &PixelBuffer,
    keep_mask: Option<&PixelBuffer>,
    params: &BokehParams,
    pool: &BufferPool,
) -> Option<PixelBuffer> {
    debug_assert_eq!(color.format(), PixelFormat::Bgra8);
    debug_assert_eq!(disparity.format(), PixelFormat::Gray8);
    debug_assert_eq!(disparity.dims(), color.dims());
    if let Some(mask) = keep_mask {
        debug_assert_eq!(mask.format(), PixelFormat::Gray8);
        debug_assert_eq!(mask.dims(), color.dims());
    }

    let dims = color.dims();
    let (w, h) = (dims.width, dims.height);
    let max_radius = params.max_radius.min(MAX_BLUR_RADIUS);
    let src = color.as_bytes();

    let mut guard = ScratchGuard {
        pool,
        bufs: Vec::new(),
    };
    // Index into guard.bufs per level; None means "use the source".
    let mut level_slot: [Option<usize>; BLUR_LEVELS] = [None; BLUR_LEVELS];

    let mut tmp = pool.acquire(PixelFormat::Bgra8, dims)?;
    for (k, slot) in level_slot.iter_mut().enumerate().skip(1) {
        let radius = max_radius * k as u32 / (BLUR_LEVELS as u32 - 1);
        if radius == 0 {
            continue;
        }
        let kernel = match gaussian_kernel_q16(radius, sigma_for(radius)) {
            Ok(kernel) => kernel,
            Err(err) => {
                tracing::debug!(%err, radius, "bokeh kernel construction failed");
                pool.release(tmp);
                return None;
            }
        };
        let Some(mut level) = pool.acquire(PixelFormat::Bgra8, dims) else {
            pool.release(tmp);
            return None;
        };
        horizontal_pass(src, tmp.as_bytes_mut(), w, h, &kernel);
        vertical_pass(tmp.as_bytes(), level.as_bytes_mut(), w, h, &kernel);
        *slot = Some(guard.bufs.len());
        guard.bufs.push(level);
    }
    pool.release(tmp);

    let mut out = pool.acquire(PixelFormat::Bgra8, dims)?;

    let disp = disparity.as_bytes();
    let mask = keep_mask.map(PixelBuffer::as_bytes);
    let scale = if params.disparity_scale.is_finite() && params.disparity_scale > 0.0 {
        params.disparity_scale
    } else {
        1.0
    };
    let out_bytes = out.as_bytes_mut();

    for i in 0..(w as usize * h as usize) {
        let dist = u32::from(disp[i].abs_diff(params.focus_disparity));
        let scaled = ((dist as f32 * scale) as u32).min(255);
        let gated = match mask {
            Some(m) => scaled * (255 - u32::from(m[i])) / 255,
            None => scaled,
        };
        let lvl_q8 = gated * (BLUR_LEVELS as u32 - 1) * 256 / 255;
        let lo = (lvl_q8 >> 8) as usize;
        let frac = lvl_q8 & 255;
        let hi = (lo + 1).min(BLUR_LEVELS - 1);

        let bytes_of = |lvl: usize| -> &[u8] {
            match level_slot[lvl] {
                Some(idx) => guard.bufs[idx].as_bytes(),
                None => src,
            }
        };
        let a = bytes_of(lo);
        let b = bytes_of(hi);
        let base = i * 4;
        for c in 0..4 {
            let av = u32::from(a[base + c]);
            let bv = u32::from(b[base + c]);
            out_bytes[base + c] = ((av * (256 - frac) + bv * frac + 128) >> 8) as u8;
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Dimensions;

    fn dims(w: u32, h: u32) -> Dimensions {
        Dimensions::new(w, h).unwrap()
    }

    fn params(max_radius: u32, focus: u8) -> BokehParams {
        BokehParams {
            max_radius,
            focus_disparity: focus,
            disparity_scale: 1.0,
        }
    }

    fn filled(pool: &BufferPool, format: PixelFormat, d: Dimensions, value: u8) -> PixelBuffer {
        let mut b = pool.acquire(format, d).unwrap();
        b.fill(value);
        b
    }

    #[test]
    fn kernel_sums_to_one_in_q16() {
        for radius in [1u32, 2, 5, 13, 31] {
            let k = gaussian_kernel_q16(radius, sigma_for(radius)).unwrap();
            assert_eq!(k.len() as u32, 2 * radius + 1);
            assert_eq!(k.iter().map(|&w| u64::from(w)).sum::<u64>(), 65536);
        }
    }

    #[test]
    fn focus_plane_is_bit_identical_to_source() {
        let pool = BufferPool::with_defaults();
        let d = dims(8, 8);
        let mut color = pool.acquire(PixelFormat::Bgra8, d).unwrap();
        for (i, v) in color.as_bytes_mut().iter_mut().enumerate() {
            *v = (i * 7 % 251) as u8;
        }
        let disparity = filled(&pool, PixelFormat::Gray8, d, 200);

        let out = depth_guided_blur(&color, &disparity, None, &params(8, 200), &pool).unwrap();
        assert_eq!(out.as_bytes(), color.as_bytes());

        pool.release(out);
        pool.release(color);
        pool.release(disparity);
    }

    #[test]
    fn constant_image_survives_any_disparity() {
        let pool = BufferPool::with_defaults();
        let d = dims(6, 5);
        let color = filled(&pool, PixelFormat::Bgra8, d, 90);
        let mut disparity = pool.acquire(PixelFormat::Gray8, d).unwrap();
        for (i, v) in disparity.as_bytes_mut().iter_mut().enumerate() {
            *v = (i * 11 % 256) as u8;
        }

        let out = depth_guided_blur(&color, &disparity, None, &params(6, 128), &pool).unwrap();
        assert_eq!(out.as_bytes(), color.as_bytes());

        pool.release(out);
        pool.release(color);
        pool.release(disparity);
    }

    #[test]
    fn off_focus_impulse_spreads_while_focused_impulse_stays() {
        let pool = BufferPool::with_defaults();
        let d = dims(16, 5);
        let mut color = filled(&pool, PixelFormat::Bgra8, d, 0);
        // Impulse at x=3 (focused half) and x=12 (far half).
        for x in [3usize, 12] {
            let row = color.row_mut(2);
            row[x * 4..x * 4 + 4].copy_from_slice(&[255, 255, 255, 255]);
        }
        let mut disparity = pool.acquire(PixelFormat::Gray8, d).unwrap();
        for y in 0..5 {
            let row = disparity.row_mut(y);
            for x in 0..16usize {
                row[x] = if x < 8 { 230 } else { 40 };
            }
        }

        let out = depth_guided_blur(&color, &disparity, None, &params(4, 230), &pool).unwrap();
        let row = out.row(2);
        assert_eq!(row[3 * 4], 255, "focused impulse must stay sharp");
        assert!(row[12 * 4] < 255, "defocused impulse must spread");
        assert!(row[11 * 4] > 0, "blur must leak into neighbors");

        pool.release(out);
        pool.release(color);
        pool.release(disparity);
    }

    #[test]
    fn keep_mask_overrides_disparity() {
        let pool = BufferPool::with_defaults();
        let d = dims(16, 5);
        let mut color = filled(&pool, PixelFormat::Bgra8, d, 0);
        color.row_mut(2)[12 * 4..12 * 4 + 4].copy_from_slice(&[255, 255, 255, 255]);
        let disparity = filled(&pool, PixelFormat::Gray8, d, 40);
        let mut mask = filled(&pool, PixelFormat::Gray8, d, 0);
        for y in 0..5 {
            let row = mask.row_mut(y);
            for x in 8..16usize {
                row[x] = 255;
            }
        }

        let out =
            depth_guided_blur(&color, &disparity, Some(&mask), &params(4, 230), &pool).unwrap();
        assert_eq!(out.row(2)[12 * 4], 255);

        pool.release(out);
        pool.release(color);
        pool.release(disparity);
        pool.release(mask);
    }

    #[test]
    fn scratch_buffers_go_back_to_the_pool() {
        let pool = BufferPool::with_defaults();
        let d = dims(8, 8);
        let color = filled(&pool, PixelFormat::Bgra8, d, 10);
        let disparity = filled(&pool, PixelFormat::Gray8, d, 0);

        let out = depth_guided_blur(&color, &disparity, None, &params(8, 255), &pool).unwrap();
        // color + disparity + out outstanding; every scratch level released.
        assert_eq!(pool.stats().outstanding, 3);

        pool.release(out);
        pool.release(color);
        pool.release(disparity);
        assert_eq!(pool.stats().outstanding, 0);
    }
}
