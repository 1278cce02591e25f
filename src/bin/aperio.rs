use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;

use aperio::capture::{SampleSink, SyntheticSource, SyntheticSourceOpts};
use aperio::clip::{ClipReader, ClipRecorder, RecorderOpts};
use aperio::export::{
    ExportEvent, ExportTask, ExportTaskManager, FfmpegSink, FfmpegSinkOpts, PosterRequest, poster,
};
use aperio::{
    BufferPool, DepthBlurCompositor, Dimensions, EffectParams, Fps, FrameSynchronizer, PreviewMode,
    SyncConfig,
};

#[derive(Parser, Debug)]
#[command(name = "aperio", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a synthetic synchronized clip to a directory.
    Record(RecordArgs),
    /// Print a clip's manifest.
    Info(InfoArgs),
    /// Compose a single clip frame as a PNG.
    Compose(ComposeArgs),
    /// Export a clip as MP4 (requires `ffmpeg` on PATH).
    Export(ExportArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Output clip directory.
    #[arg(long)]
    out: PathBuf,

    /// Number of frames to record.
    #[arg(long, default_value_t = 90)]
    frames: u64,

    /// Color frame width; disparity runs at half resolution.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Color frame height.
    #[arg(long, default_value_t = 360)]
    height: u32,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Clip directory.
    #[arg(long)]
    clip: PathBuf,
}

#[derive(Parser, Debug)]
struct ComposeArgs {
    /// Clip directory.
    #[arg(long)]
    clip: PathBuf,

    /// Frame index (0-based).
    #[arg(long, default_value_t = 0)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// What to draw.
    #[arg(long, value_enum, default_value_t = ModeChoice::Portrait)]
    mode: ModeChoice,

    /// Aperture (f-number); lower blurs more.
    #[arg(long, default_value_t = 2.4)]
    aperture: f32,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Clip directory.
    #[arg(long)]
    clip: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// What to draw.
    #[arg(long, value_enum, default_value_t = ModeChoice::Portrait)]
    mode: ModeChoice,

    /// Aperture (f-number); lower blurs more.
    #[arg(long, default_value_t = 2.4)]
    aperture: f32,

    /// Replace the output file if it exists.
    #[arg(long)]
    overwrite: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeChoice {
    Normal,
    Depth,
    Portrait,
}

impl From<ModeChoice> for PreviewMode {
    fn from(choice: ModeChoice) -> Self {
        match choice {
            ModeChoice::Normal => PreviewMode::Normal,
            ModeChoice::Depth => PreviewMode::Depth,
            ModeChoice::Portrait => PreviewMode::PortraitBlur,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Record(args) => cmd_record(args),
        Command::Info(args) => cmd_info(args),
        Command::Compose(args) => cmd_compose(args),
        Command::Export(args) => cmd_export(args),
    }
}

fn clip_params(clip: &Path, mode: ModeChoice, aperture: f32) -> anyhow::Result<EffectParams> {
    let reader = ClipReader::open(clip)?;
    let mut params = EffectParams::new(reader.manifest().color_dims);
    params.mode = mode.into();
    params.aperture = aperture;
    Ok(params)
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let color_dims = Dimensions::new(args.width, args.height)?;
    let depth_dims = Dimensions::new(args.width / 2, args.height / 2)?;

    let pool = BufferPool::with_defaults();
    let sync = FrameSynchronizer::new(SyncConfig::default(), pool.clone());
    sync.arm()?;
    sync.start()?;

    let recorder = Arc::new(Mutex::new(ClipRecorder::create(
        &args.out,
        pool.clone(),
        RecorderOpts::new(color_dims, depth_dims),
    )?));
    let sink: Arc<Mutex<dyn SampleSink>> = recorder.clone();

    let source = SyntheticSource::start(
        sync.clone(),
        pool.clone(),
        sink,
        SyntheticSourceOpts {
            dims: color_dims,
            depth_dims,
            fps: Fps { num: 30, den: 1 },
            frame_count: Some(args.frames),
            paced: false,
        },
    )?;
    source.wait();
    sync.stop();

    let Ok(mutex) = Arc::try_unwrap(recorder) else {
        anyhow::bail!("recorder still in use after capture stopped");
    };
    let manifest = mutex.into_inner().finish()?;
    eprintln!(
        "recorded {} frames to {}",
        manifest.frame_count(),
        args.out.display()
    );
    Ok(())
}

fn cmd_info(args: InfoArgs) -> anyhow::Result<()> {
    let reader = ClipReader::open(&args.clip)?;
    let m = reader.manifest();
    let duration = m.fps.frames_to_secs(m.frame_count());

    eprintln!("clip {}", args.clip.display());
    eprintln!("  frames:    {}", m.frame_count());
    eprintln!(
        "  color:     {}x{} {:?}",
        m.color_dims.width, m.color_dims.height, m.color_format
    );
    eprintln!(
        "  depth:     {}x{} {:?}",
        m.depth_dims.width, m.depth_dims.height, m.depth_format
    );
    eprintln!("  fps:       {}/{}", m.fps.num, m.fps.den);
    eprintln!("  duration:  {duration:.2}s");
    eprintln!("  aperture:  f/{:.1}", m.aperture);
    eprintln!(
        "  calibrated: {}",
        if m.calibration.is_some() { "yes" } else { "no" }
    );
    Ok(())
}

fn cmd_compose(args: ComposeArgs) -> anyhow::Result<()> {
    let pool = BufferPool::with_defaults();
    let compositor = DepthBlurCompositor::new(pool.clone());
    let params = clip_params(&args.clip, args.mode, args.aperture)?;

    let request = PosterRequest {
        frame_index: args.frame,
        params,
    };
    let img = poster(&args.clip, &compositor, &request)?;

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    img.save_with_format(&args.out, image::ImageFormat::Png)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let pool = BufferPool::with_defaults();
    let compositor = DepthBlurCompositor::new(pool.clone());
    let params = clip_params(&args.clip, args.mode, args.aperture)?;

    let mut sink_opts = FfmpegSinkOpts::new(&args.out);
    sink_opts.overwrite = args.overwrite;
    let sink = FfmpegSink::new(sink_opts);

    let manager = ExportTaskManager::with_defaults();
    let (_observer, events) = manager.events().subscribe(64);
    manager.export(
        ExportTask {
            clip_dir: args.clip.clone(),
            out_path: args.out.clone(),
            params,
            fps: None,
        },
        compositor,
        sink,
    )?;

    loop {
        match events.recv()? {
            ExportEvent::Progress { fraction, .. } => {
                eprintln!("{:>5.1}%", f64::from(fraction) * 100.0);
            }
            ExportEvent::Finished { out_path } => {
                eprintln!("wrote {}", out_path.display());
                return Ok(());
            }
            ExportEvent::Failed { error } => anyhow::bail!("export failed: {error}"),
            ExportEvent::Cancelled => anyhow::bail!("export cancelled"),
        }
    }
}
