use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use aperio::capture::{
    CaptureEvent, SampleSink, SyntheticSource, SyntheticSourceOpts, fill_color_pattern,
    fill_depth_pattern,
};
use aperio::clip::{ClipReader, ClipRecorder, RecorderOpts, RecordingTee};
use aperio::{
    AperioResult, BufferPool, FrameSynchronizer, PixelFormat, SyncConfig, SynchronizedSample,
    TimestampUs,
};

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "aperio_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

struct CountingSink {
    pool: BufferPool,
    seen: u64,
    last_ts: Option<TimestampUs>,
}

impl SampleSink for CountingSink {
    fn on_sample(&mut self, sample: SynchronizedSample) -> AperioResult<()> {
        assert!(self.last_ts.is_none_or(|prev| prev < sample.timestamp));
        self.last_ts = Some(sample.timestamp);
        self.seen += 1;
        sample.release(&self.pool);
        Ok(())
    }
}

#[test]
fn synthetic_capture_records_a_readable_clip() {
    let tmp = temp_dir("capture_clip");
    let frames = 24u64;

    let pool = BufferPool::with_defaults();
    let opts = SyntheticSourceOpts {
        frame_count: Some(frames),
        ..SyntheticSourceOpts::default()
    };

    let sync = FrameSynchronizer::new(SyncConfig::default(), pool.clone());
    sync.arm().unwrap();
    sync.start().unwrap();

    let recorder = ClipRecorder::create(
        &tmp,
        pool.clone(),
        RecorderOpts::new(opts.dims, opts.depth_dims),
    )
    .unwrap();
    let tee = Arc::new(Mutex::new(RecordingTee::new(
        recorder,
        CountingSink {
            pool: pool.clone(),
            seen: 0,
            last_ts: None,
        },
    )));
    let sink: Arc<Mutex<dyn SampleSink>> = tee.clone();

    let source = SyntheticSource::start(sync.clone(), pool.clone(), sink, opts).unwrap();
    source.wait();
    sync.stop();

    let Ok(mutex) = Arc::try_unwrap(tee) else {
        panic!("tee still shared after capture stopped");
    };
    let (manifest, counting) = mutex.into_inner().finish().unwrap();

    assert_eq!(manifest.frame_count(), frames);
    assert_eq!(counting.seen, frames);
    assert_eq!(sync.stats().emitted, frames);
    assert!(
        manifest
            .frame_timestamps_us
            .windows(2)
            .all(|w| w[0] < w[1])
    );
    assert_eq!(pool.stats().outstanding, 0);

    // Reading back must reproduce the generator's deterministic patterns.
    let mut reader = ClipReader::open(&tmp).unwrap();
    assert_eq!(reader.frame_count(), frames);
    for index in [0u64, 5, 23] {
        let sample = reader.sample_at(index, &pool).unwrap();
        assert_eq!(
            sample.timestamp,
            TimestampUs(manifest.frame_timestamps_us[index as usize])
        );

        let mut expected_color = pool.acquire(PixelFormat::Bgra8, opts.dims).unwrap();
        fill_color_pattern(&mut expected_color, index);
        let mut expected_depth = pool.acquire(PixelFormat::Gray8, opts.depth_dims).unwrap();
        fill_depth_pattern(&mut expected_depth, index);

        assert_eq!(sample.color.as_bytes(), expected_color.as_bytes());
        assert_eq!(sample.depth.as_bytes(), expected_depth.as_bytes());
        assert!(sample.calibration.is_some(), "recorder keeps calibration");

        pool.release(expected_color);
        pool.release(expected_depth);
        sample.release(&pool);
    }
    assert_eq!(pool.stats().outstanding, 0);

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn capture_events_reach_observers() {
    let pool = BufferPool::with_defaults();
    let frames = 8u64;

    let sync = FrameSynchronizer::new(SyncConfig::default(), pool.clone());
    sync.arm().unwrap();
    sync.start().unwrap();
    let (_observer, events) = sync.events().subscribe(256);

    let sink = Arc::new(Mutex::new(CountingSink {
        pool: pool.clone(),
        seen: 0,
        last_ts: None,
    }));
    let source = SyntheticSource::start(
        sync.clone(),
        pool.clone(),
        sink,
        SyntheticSourceOpts {
            frame_count: Some(frames),
            ..SyntheticSourceOpts::default()
        },
    )
    .unwrap();
    source.wait();
    sync.stop();

    let mut fov = 0u64;
    let mut focus = 0u64;
    let mut synchronized = 0u64;
    let mut dropped = 0u64;
    while let Ok(event) = events.try_recv() {
        match event {
            CaptureEvent::FieldOfViewChanged { degrees } => {
                assert!(degrees > 0.0);
                fov += 1;
            }
            CaptureEvent::FocusDepth { disparity } => {
                assert!((0.0..=1.0).contains(&disparity));
                focus += 1;
            }
            CaptureEvent::SampleSynchronized { .. } => synchronized += 1,
            CaptureEvent::FrameDropped { .. } => dropped += 1,
            CaptureEvent::StateChanged(_) | CaptureEvent::VolumePressed => {}
        }
    }

    assert_eq!(fov, 1);
    assert_eq!(focus, frames);
    assert_eq!(synchronized, frames);
    assert_eq!(dropped, 0, "identical timestamps pair every frame");
    assert_eq!(pool.stats().outstanding, 0);
}
