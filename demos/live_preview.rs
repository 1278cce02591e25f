use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use aperio::capture::{SampleSink, SyntheticSource, SyntheticSourceOpts};
use aperio::render::{InMemorySurface, LiveConfig, LiveRenderPipeline, SampleMailbox};
use aperio::{
    BufferPool, DepthBlurCompositor, Dimensions, EffectParams, Fps, FrameSynchronizer, SyncConfig,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let pool = BufferPool::with_defaults();
    let dims = Dimensions::new(192, 144)?;
    let depth_dims = Dimensions::new(96, 72)?;

    let sync = FrameSynchronizer::new(SyncConfig::default(), pool.clone());
    sync.arm()?;
    sync.start()?;

    let surface = InMemorySurface::new(pool.clone());
    let mailbox = SampleMailbox::new(pool.clone());
    let pipeline = LiveRenderPipeline::start(
        DepthBlurCompositor::new(pool.clone()),
        Box::new(surface.clone()),
        mailbox.clone(),
        LiveConfig::new(EffectParams::new(dims)),
    )?;

    let sink: Arc<Mutex<dyn SampleSink>> = Arc::new(Mutex::new(mailbox));
    let source = SyntheticSource::start(
        sync.clone(),
        pool.clone(),
        sink,
        SyntheticSourceOpts {
            dims,
            depth_dims,
            fps: Fps { num: 30, den: 1 },
            frame_count: Some(45),
            paced: true,
        },
    )?;
    source.wait();
    sync.stop();

    // Give the render loop one more tick to drain the last sample.
    std::thread::sleep(Duration::from_millis(150));
    let stats = pipeline.stats();
    pipeline.stop();

    eprintln!(
        "presented {} frames, coalesced {}, compose failures {}",
        stats.rendered, stats.coalesced, stats.compose_failures
    );

    let bytes = surface.last_bytes();
    if let Some(d) = surface.last_dims() {
        let mut rgba = Vec::with_capacity(bytes.len());
        for px in bytes.chunks_exact(4) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
        let out_dir = std::path::Path::new("target").join("live_preview");
        std::fs::create_dir_all(&out_dir)?;
        let out_path = out_dir.join("frame.png");
        let img = image::RgbaImage::from_raw(d.width, d.height, rgba)
            .ok_or_else(|| anyhow::anyhow!("invalid frame buffer size"))?;
        img.save(&out_path)?;
        eprintln!("wrote {}", out_path.display());
    }
    Ok(())
}
