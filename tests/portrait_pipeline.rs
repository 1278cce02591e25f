use aperio::capture::{fill_color_pattern, fill_depth_pattern};
use aperio::effect::ResizeMode;
use aperio::{
    BufferPool, DepthBlurCompositor, Dimensions, EffectParams, PixelBuffer, PixelFormat,
    PreviewMode,
};

fn dims(w: u32, h: u32) -> Dimensions {
    Dimensions::new(w, h).unwrap()
}

fn patterned_pair(pool: &BufferPool, frame: u64) -> (PixelBuffer, PixelBuffer) {
    let mut color = pool.acquire(PixelFormat::Bgra8, dims(192, 144)).unwrap();
    fill_color_pattern(&mut color, frame);
    let mut depth = pool.acquire(PixelFormat::Gray8, dims(96, 72)).unwrap();
    fill_depth_pattern(&mut depth, frame);
    (color, depth)
}

#[test]
fn portrait_compose_is_deterministic_end_to_end() {
    let pool = BufferPool::with_defaults();
    let compositor = DepthBlurCompositor::new(pool.clone());
    let (color, depth) = patterned_pair(&pool, 7);
    let params = EffectParams::new(dims(192, 144));

    let a = compositor.compose(&color, &depth, None, &params).unwrap();
    let b = compositor.compose(&color, &depth, None, &params).unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());

    pool.release(a);
    pool.release(b);
    pool.release(color);
    pool.release(depth);
    assert_eq!(pool.stats().outstanding, 0);
}

#[test]
fn portrait_blur_changes_the_defocused_scene() {
    let pool = BufferPool::with_defaults();
    let compositor = DepthBlurCompositor::new(pool.clone());
    // Frame 0 puts the near band at the left edge, so the default center
    // focus lands on the far background and the band defocuses. A white
    // impulse inside the band must smear.
    let (mut color, depth) = patterned_pair(&pool, 0);
    color.row_mut(72)[8 * 4..8 * 4 + 4].copy_from_slice(&[255, 255, 255, 255]);

    let mut normal = EffectParams::new(dims(192, 144));
    normal.mode = PreviewMode::Normal;
    let passthrough = compositor.compose(&color, &depth, None, &normal).unwrap();

    let portrait = compositor
        .compose(&color, &depth, None, &EffectParams::new(dims(192, 144)))
        .unwrap();

    assert_ne!(portrait.as_bytes(), passthrough.as_bytes());
    assert!(
        portrait
            .as_bytes()
            .chunks_exact(4)
            .all(|px| px[3] == 255),
        "composed frames are opaque"
    );

    pool.release(passthrough);
    pool.release(portrait);
    pool.release(color);
    pool.release(depth);
    assert_eq!(pool.stats().outstanding, 0);
}

#[test]
fn fit_width_into_a_portrait_target_letterboxes_vertically() {
    let pool = BufferPool::with_defaults();
    let compositor = DepthBlurCompositor::new(pool.clone());
    let (color, depth) = patterned_pair(&pool, 1);

    // 192x144 into 108x192 fit-width: scale 0.5625, content 108x81
    // centered at rows 55..136.
    let mut params = EffectParams::new(dims(108, 192));
    params.mode = PreviewMode::Normal;
    params.resize = ResizeMode::FitWidth;
    let out = compositor.compose(&color, &depth, None, &params).unwrap();

    assert_eq!(out.dims(), dims(108, 192));
    assert_eq!(&out.row(0)[..4], &[0, 0, 0, 255]);
    assert_eq!(&out.row(191)[..4], &[0, 0, 0, 255]);
    let mid = out.row(96);
    assert!(
        mid.chunks_exact(4).any(|px| px[0] != 0 || px[1] != 0 || px[2] != 0),
        "center rows carry scaled content"
    );

    pool.release(out);
    pool.release(color);
    pool.release(depth);
    assert_eq!(pool.stats().outstanding, 0);
}

#[test]
fn depth_preview_spans_the_full_grayscale_range() {
    let pool = BufferPool::with_defaults();
    let compositor = DepthBlurCompositor::new(pool.clone());
    let (color, depth) = patterned_pair(&pool, 2);

    let mut params = EffectParams::new(dims(192, 144));
    params.mode = PreviewMode::Depth;
    let out = compositor.compose(&color, &depth, None, &params).unwrap();

    let mut lo = u8::MAX;
    let mut hi = u8::MIN;
    for px in out.as_bytes().chunks_exact(4) {
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        lo = lo.min(px[0]);
        hi = hi.max(px[0]);
    }
    assert_eq!(lo, 0, "normalization reaches black");
    assert_eq!(hi, 255, "normalization reaches white");

    pool.release(out);
    pool.release(color);
    pool.release(depth);
    assert_eq!(pool.stats().outstanding, 0);
}
