use std::sync::Arc;

use anyhow::Context;

use crate::buffer::{BufferPool, PixelBuffer, PixelFormat};
use crate::effect::blur::{BokehParams, MAX_BLUR_RADIUS, depth_guided_blur};
use crate::effect::calibration::CalibrationData;
use crate::effect::resize::{ResizeMode, resize_into, stretch_into};
use crate::effect::segmentation::SegmentationModel;
use crate::effect::upsample::{guided_upsample, luma_bgra};
use crate::foundation::core::Dimensions;
use crate::foundation::error::AperioResult;
use crate::foundation::math::clamp_f32;

pub const APERTURE_MIN: f32 = 1.4;
pub const APERTURE_MAX: f32 = 20.0;
pub const APERTURE_DEFAULT: f32 = 2.4;

/// What the compositor draws for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewMode {
    /// Color frame passed through untouched.
    Normal,
    /// Upsampled disparity, min/max normalized to full range. Debug view.
    Depth,
    /// Depth-guided bokeh.
    PortraitBlur,
}

/// Per-request composition parameters. Immutable once issued.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EffectParams {
    pub aperture: f32,
    pub mode: PreviewMode,
    pub output_dims: Dimensions,
    pub resize: ResizeMode,
}

impl EffectParams {
    pub fn new(output_dims: Dimensions) -> Self {
        Self {
            aperture: APERTURE_DEFAULT,
            mode: PreviewMode::PortraitBlur,
            output_dims,
            resize: ResizeMode::FitWidth,
        }
    }
}

/// Corner badge stamped on composed frames. Stored premultiplied BGRA.
pub struct Watermark {
    dims: Dimensions,
    bgra_premul: Vec<u8>,
    opacity: f32,
}

impl Watermark {
    /// Decode any format the `image` crate understands.
    pub fn from_image_bytes(bytes: &[u8]) -> AperioResult<Self> {
        let dyn_img = image::load_from_memory(bytes).context("decode watermark image")?;
        let rgba = dyn_img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let dims = Dimensions::new(width, height)?;

        let mut bgra_premul = rgba.into_raw();
        for px in bgra_premul.chunks_exact_mut(4) {
            let a = u16::from(px[3]);
            if a == 0 {
                px[0] = 0;
                px[1] = 0;
                px[2] = 0;
                continue;
            }
            let (r, g, b) = (px[0], px[1], px[2]);
            px[0] = mul_div255(u16::from(b), a);
            px[1] = mul_div255(u16::from(g), a);
            px[2] = mul_div255(u16::from(r), a);
        }

        Ok(Self {
            dims,
            bgra_premul,
            opacity: 1.0,
        })
    }

    /// Solid badge, mostly for tests.
    pub fn from_solid(dims: Dimensions, bgra: [u8; 4]) -> Self {
        let mut bgra_premul = Vec::with_capacity(dims.pixel_count() * 4);
        for _ in 0..dims.pixel_count() {
            bgra_premul.extend_from_slice(&bgra);
        }
        Self {
            dims,
            bgra_premul,
            opacity: 1.0,
        }
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = clamp_f32(opacity, 0.0, 1.0);
        self
    }

    pub fn dims(&self) -> Dimensions {
        self.dims
    }
}

/// The depth-blur compositing primitive shared by live preview and
/// export.
///
/// Stateless aside from the pool it draws scratch from and the fixed
/// collaborators installed at construction. [`compose`] is deterministic:
/// the same frame pair and parameters produce bit-identical output. Any
/// internal failure (pool exhaustion, kernel construction, segmentation
/// error) yields `None`; the caller owns the fallback, never this layer.
///
/// [`compose`]: DepthBlurCompositor::compose
pub struct DepthBlurCompositor {
    pool: BufferPool,
    segmentation: Option<Arc<dyn SegmentationModel>>,
    watermark: Option<Watermark>,
    focus_point: (f32, f32),
}

impl DepthBlurCompositor {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            pool,
            segmentation: None,
            watermark: None,
            focus_point: (0.5, 0.5),
        }
    }

    pub fn with_segmentation(mut self, model: Arc<dyn SegmentationModel>) -> Self {
        self.segmentation = Some(model);
        self
    }

    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = Some(watermark);
        self
    }

    /// Normalized focus tap, (0,0) top-left to (1,1) bottom-right.
    pub fn set_focus_point(&mut self, x: f32, y: f32) {
        self.focus_point = (clamp_f32(x, 0.0, 1.0), clamp_f32(y, 0.0, 1.0));
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Compose one output frame from a color+disparity pair.
    ///
    /// The returned buffer comes from the pool and carries the color
    /// frame's timestamp; the caller releases it when done.
    pub fn compose(
        &self,
        color: &PixelBuffer,
        depth: &PixelBuffer,
        calibration: Option<&CalibrationData>,
        params: &EffectParams,
    ) -> Option<PixelBuffer> {
        debug_assert_eq!(color.format(), PixelFormat::Bgra8);
        debug_assert_eq!(depth.format(), PixelFormat::Gray8);

        let composed = match params.mode {
            PreviewMode::Normal => {
                resize_into(color, params.output_dims, params.resize, &self.pool)
            }
            PreviewMode::Depth => self.depth_preview(color, depth, params),
            PreviewMode::PortraitBlur => self.portrait(color, depth, calibration, params),
        };
        let mut out = composed?;

        if let Some(wm) = &self.watermark
            && self.stamp_watermark(&mut out, wm).is_none()
        {
            self.pool.release(out);
            return None;
        }

        if let Some(ts) = color.timestamp() {
            out.set_timestamp(ts);
        }
        Some(out)
    }

    fn depth_preview(
        &self,
        color: &PixelBuffer,
        depth: &PixelBuffer,
        params: &EffectParams,
    ) -> Option<PixelBuffer> {
        let mut disp = guided_upsample(depth, color, &self.pool)?;
        normalize_plane(disp.as_bytes_mut());
        let gray_bgra = self.gray_to_bgra(&disp);
        self.pool.release(disp);
        let gray_bgra = gray_bgra?;

        let resized = resize_into(&gray_bgra, params.output_dims, params.resize, &self.pool);
        self.pool.release(gray_bgra);
        resized
    }

    fn portrait(
        &self,
        color: &PixelBuffer,
        depth: &PixelBuffer,
        calibration: Option<&CalibrationData>,
        params: &EffectParams,
    ) -> Option<PixelBuffer> {
        let disp = guided_upsample(depth, color, &self.pool)?;

        let mask = match &self.segmentation {
            Some(model) => match self.segment(color, &disp, model.as_ref()) {
                Some(mask) => Some(mask),
                None => {
                    self.pool.release(disp);
                    return None;
                }
            },
            None => None,
        };

        let bokeh = BokehParams {
            max_radius: aperture_radius(params.aperture, color.width()),
            focus_disparity: sample_focus(&disp, self.focus_point),
            disparity_scale: calibration.map_or(1.0, |c| c.disparity_scale),
        };
        let blurred = depth_guided_blur(color, &disp, mask.as_ref(), &bokeh, &self.pool);
        self.pool.release(disp);
        if let Some(mask) = mask {
            self.pool.release(mask);
        }
        let blurred = blurred?;

        let resized = resize_into(&blurred, params.output_dims, params.resize, &self.pool);
        self.pool.release(blurred);
        resized
    }

    /// Runs segmentation at the model's native size and brings the mask
    /// back up to color resolution.
    fn segment(
        &self,
        color: &PixelBuffer,
        disp: &PixelBuffer,
        model: &dyn SegmentationModel,
    ) -> Option<PixelBuffer> {
        let model_dims = model.input_dims();

        let luma = self.luma_plane(color)?;
        let luma_small = stretch_into(&luma, model_dims, &self.pool);
        self.pool.release(luma);
        let luma_small = luma_small?;

        let disp_small = match stretch_into(disp, model_dims, &self.pool) {
            Some(buf) => buf,
            None => {
                self.pool.release(luma_small);
                return None;
            }
        };
        let mut mask_small = match self.pool.acquire(PixelFormat::Gray8, model_dims) {
            Some(buf) => buf,
            None => {
                self.pool.release(luma_small);
                self.pool.release(disp_small);
                return None;
            }
        };

        let inferred = model.infer(&luma_small, &disp_small, &mut mask_small);
        self.pool.release(luma_small);
        self.pool.release(disp_small);
        if let Err(err) = inferred {
            tracing::debug!(%err, "segmentation inference failed");
            self.pool.release(mask_small);
            return None;
        }

        let mask = stretch_into(&mask_small, color.dims(), &self.pool);
        self.pool.release(mask_small);
        mask
    }

    fn luma_plane(&self, color: &PixelBuffer) -> Option<PixelBuffer> {
        let mut out = self.pool.acquire(PixelFormat::Gray8, color.dims())?;
        for (dst, px) in out
            .as_bytes_mut()
            .iter_mut()
            .zip(color.as_bytes().chunks_exact(4))
        {
            *dst = luma_bgra(px);
        }
        Some(out)
    }

    fn gray_to_bgra(&self, gray: &PixelBuffer) -> Option<PixelBuffer> {
        let mut out = self.pool.acquire(PixelFormat::Bgra8, gray.dims())?;
        for (px, &v) in out
            .as_bytes_mut()
            .chunks_exact_mut(4)
            .zip(gray.as_bytes())
        {
            px[0] = v;
            px[1] = v;
            px[2] = v;
            px[3] = 255;
        }
        Some(out)
    }

    fn stamp_watermark(&self, frame: &mut PixelBuffer, wm: &Watermark) -> Option<()> {
        let fd = frame.dims();
        let badge_w = (fd.width / 4).max(1);
        let badge_h = ((u64::from(wm.dims.height) * u64::from(badge_w) / u64::from(wm.dims.width))
            .max(1)) as u32;
        let margin = fd.width / 32;
        if badge_w + margin > fd.width || badge_h + margin > fd.height {
            return Some(());
        }
        let origin_x = (fd.width - badge_w - margin) as usize;
        let origin_y = fd.height - badge_h - margin;

        let badge_dims = Dimensions::new(badge_w, badge_h).ok()?;
        let mut staged = self.pool.acquire(PixelFormat::Bgra8, wm.dims)?;
        staged.as_bytes_mut().copy_from_slice(&wm.bgra_premul);
        let badge = stretch_into(&staged, badge_dims, &self.pool);
        self.pool.release(staged);
        let badge = badge?;

        for by in 0..badge_h {
            let src_row = badge.row(by);
            let dst_row = frame.row_mut(origin_y + by);
            for bx in 0..badge_w as usize {
                let s = &src_row[bx * 4..bx * 4 + 4];
                let d = &mut dst_row[(origin_x + bx) * 4..(origin_x + bx) * 4 + 4];
                let blended = over_premul(
                    [d[0], d[1], d[2], d[3]],
                    [s[0], s[1], s[2], s[3]],
                    wm.opacity,
                );
                d.copy_from_slice(&blended);
            }
        }

        self.pool.release(badge);
        Some(())
    }
}

fn aperture_radius(aperture: f32, width: u32) -> u32 {
    let aperture = clamp_f32(aperture, APERTURE_MIN, APERTURE_MAX);
    ((aperture * width as f32 / 480.0).round() as u32).clamp(1, MAX_BLUR_RADIUS)
}

fn sample_focus(disp: &PixelBuffer, point: (f32, f32)) -> u8 {
    let d = disp.dims();
    let x = ((point.0 * (d.width - 1) as f32).round() as u32).min(d.width - 1);
    let y = ((point.1 * (d.height - 1) as f32).round() as u32).min(d.height - 1);
    disp.row(y)[x as usize]
}

/// Min/max remap to the full 0..255 range; flat planes stay untouched.
fn normalize_plane(plane: &mut [u8]) {
    let mut lo = u8::MAX;
    let mut hi = u8::MIN;
    for &v in plane.iter() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if hi <= lo {
        return;
    }
    let range = u32::from(hi - lo);
    for v in plane.iter_mut() {
        *v = ((u32::from(*v - lo) * 255 + range / 2) / range) as u8;
    }
}

fn over_premul(dst: [u8; 4], src: [u8; 4], opacity: f32) -> [u8; 4] {
    let opacity = clamp_f32(opacity, 0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);
    let mut out = [0u8; 4];
    out[3] = mul_div255(u16::from(dst[3]), inv).saturating_add(sa);
    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = sc.saturating_add(dc);
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    ((u32::from(x) * u32::from(y) + 127) / 255) as u8
}
