use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::Result;
use lookout::capture::{
    BufferPool, Frame, FrameMetadata, FrameSource, PixelFormat, Rotation, SyntheticSource,
};
use lookout::display::{mailbox, DisplayLoop, DisplaySink, ResultReceiver};
use lookout::inference::{AnnotatingAdapter, DetectionResult, InferenceAdapter, ModelSpec, StubModel};
use lookout::pipeline::{BackPressure, Delivery, FrameSink, Phase, Pipeline, PipelineState};
use lookout::{CaptureConfig, PipelineConfig, PipelineError};

// ----------------------------------------------------------------------------
// Test doubles
// ----------------------------------------------------------------------------

/// Source driven by the test: frames are pushed by hand through its sink.
#[derive(Clone, Default)]
struct ManualSource {
    sink: Arc<Mutex<Option<FrameSink>>>,
    fail_start: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
}

impl ManualSource {
    fn sink(&self) -> FrameSink {
        self.sink.lock().unwrap().clone().expect("source started")
    }
}

impl FrameSource for ManualSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn start(&mut self, _target: &CaptureConfig, sink: FrameSink) -> Result<(), PipelineError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PipelineError::DeviceUnavailable("camera in use".into()));
        }
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().unwrap().take();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Adapter that optionally waits for a release token per call and fails on
/// chosen sequence numbers.
struct ScriptedAdapter {
    release: Option<flume::Receiver<()>>,
    fail_on: Vec<u64>,
    active: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
}

impl ScriptedAdapter {
    fn new() -> Self {
        Self {
            release: None,
            fail_on: Vec::new(),
            active: Arc::default(),
            overlapped: Arc::default(),
        }
    }

    fn gated(mut self) -> (Self, flume::Sender<()>) {
        let (tx, rx) = flume::unbounded();
        self.release = Some(rx);
        (self, tx)
    }

    fn failing_on(mut self, sequences: &[u64]) -> Self {
        self.fail_on = sequences.to_vec();
        self
    }
}

impl InferenceAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(
        &mut self,
        image: lookout::capture::NormalizedImage,
    ) -> Result<DetectionResult, PipelineError> {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(release) = &self.release {
            let _ = release.recv_timeout(Duration::from_secs(5));
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.contains(&image.sequence) {
            return Err(PipelineError::inference(image.sequence, "scripted failure"));
        }
        Ok(DetectionResult {
            sequence: image.sequence,
            captured_at: image.captured_at,
            image: image.image,
            detections: Vec::new(),
            inference_time: Duration::ZERO,
        })
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    shown: Arc<Mutex<Vec<u64>>>,
}

impl DisplaySink for RecordingSink {
    fn show(&mut self, result: &DetectionResult) -> Result<()> {
        self.shown.lock().unwrap().push(result.sequence);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn capture_config() -> CaptureConfig {
    CaptureConfig {
        width: 4,
        height: 2,
        format: PixelFormat::Rgb24,
        buffer_count: 4,
        rotation: Rotation::Cw90,
        ..CaptureConfig::default()
    }
}

fn pipeline_config(back_pressure: BackPressure) -> PipelineConfig {
    PipelineConfig {
        back_pressure,
        ..PipelineConfig::default()
    }
}

fn rgb_frame(pool: &BufferPool, sequence: u64) -> Frame {
    let meta = FrameMetadata {
        sequence,
        width: 4,
        height: 2,
        stride: 12,
        format: PixelFormat::Rgb24,
        rotation: None,
        device_timestamp: None,
    };
    Frame::new(Bytes::from(vec![sequence as u8; 24]), meta, pool.try_acquire().unwrap())
}

fn broken_frame(pool: &BufferPool, sequence: u64) -> Frame {
    let meta = FrameMetadata {
        sequence,
        width: 4,
        height: 2,
        stride: 0,
        format: PixelFormat::Mjpeg,
        rotation: None,
        device_timestamp: None,
    };
    Frame::new(Bytes::from_static(b"not a jpeg"), meta, pool.try_acquire().unwrap())
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn wait_idle(state: &PipelineState) {
    wait_until("pipeline idle", || state.phase() == Phase::Idle);
}

fn manual_pipeline(
    adapter: ScriptedAdapter,
    back_pressure: BackPressure,
) -> (Pipeline, ManualSource, ResultReceiver) {
    let source = ManualSource::default();
    let (publisher, receiver) = mailbox();
    let pipeline = Pipeline::new(
        Box::new(source.clone()),
        Box::new(adapter),
        capture_config(),
        pipeline_config(back_pressure),
        publisher,
    );
    (pipeline, source, receiver)
}

// ----------------------------------------------------------------------------
// Back-pressure
// ----------------------------------------------------------------------------

#[test]
fn frames_arriving_while_busy_are_dropped_at_the_boundary() {
    let (adapter, release) = ScriptedAdapter::new().gated();
    let overlapped = adapter.overlapped.clone();
    let (mut pipeline, source, receiver) = manual_pipeline(adapter, BackPressure::DropWhileBusy);
    pipeline.start().unwrap();
    let state = pipeline.state();
    let sink = source.sink();
    let pool = BufferPool::new(4);

    assert_eq!(sink.publish(rgb_frame(&pool, 1)), Delivery::Accepted);
    wait_until("inference to begin", || state.phase() == Phase::Inferring);
    assert_eq!(sink.publish(rgb_frame(&pool, 2)), Delivery::DroppedBusy);
    assert_eq!(sink.publish(rgb_frame(&pool, 3)), Delivery::DroppedBusy);
    // Dropped frames and the decoded one have all released their buffers.
    assert_eq!(pool.leased(), 0);

    release.send(()).unwrap();
    wait_idle(&state);
    assert_eq!(sink.publish(rgb_frame(&pool, 4)), Delivery::Accepted);
    release.send(()).unwrap();
    wait_until("second result", || state.stats().results_published == 2);
    wait_idle(&state);

    let stats = state.stats();
    assert_eq!(stats.frames_emitted, 4);
    assert_eq!(stats.frames_accepted, 2);
    assert_eq!(stats.dropped_busy, 2);
    assert!(stats.frames_accepted <= stats.frames_emitted);
    assert_eq!(state.max_in_flight(), 1);
    assert!(!overlapped.load(Ordering::SeqCst));

    // The display slot holds only the newest result.
    assert_eq!(receiver.take().unwrap().sequence, 4);
    pipeline.stop();
}

#[test]
fn keep_latest_processes_the_newest_pending_frame() {
    let (adapter, release) = ScriptedAdapter::new().gated();
    let (mut pipeline, source, receiver) = manual_pipeline(adapter, BackPressure::KeepLatest);
    pipeline.start().unwrap();
    let state = pipeline.state();
    let sink = source.sink();
    let pool = BufferPool::new(4);

    sink.publish(rgb_frame(&pool, 1));
    wait_until("inference to begin", || state.phase() == Phase::Inferring);
    assert_eq!(sink.publish(rgb_frame(&pool, 2)), Delivery::Pending);
    assert_eq!(sink.publish(rgb_frame(&pool, 3)), Delivery::Pending);

    release.send(()).unwrap();
    release.send(()).unwrap();
    wait_until("both results", || state.stats().results_published == 2);
    wait_idle(&state);

    let stats = state.stats();
    assert_eq!(stats.frames_accepted, 2);
    assert_eq!(stats.dropped_busy, 1);
    assert_eq!(state.max_in_flight(), 1);
    assert_eq!(receiver.take().unwrap().sequence, 3);
    pipeline.stop();
}

// ----------------------------------------------------------------------------
// Per-frame failures
// ----------------------------------------------------------------------------

#[test]
fn inference_error_returns_to_idle_and_keeps_previous_result() {
    let adapter = ScriptedAdapter::new().failing_on(&[2]);
    let (mut pipeline, source, receiver) = manual_pipeline(adapter, BackPressure::DropWhileBusy);
    pipeline.start().unwrap();
    let state = pipeline.state();
    let sink = source.sink();
    let pool = BufferPool::new(4);

    let display = RecordingSink::default();
    let mut ui_sink = display.clone();

    sink.publish(rgb_frame(&pool, 1));
    wait_until("first result", || state.stats().results_published == 1);
    ui_sink.show(&receiver.take().unwrap()).unwrap();

    sink.publish(rgb_frame(&pool, 2));
    wait_until("inference failure", || state.stats().inference_failures == 1);
    wait_idle(&state);

    assert!(receiver.take().is_none(), "nothing new to show");
    assert_eq!(*display.shown.lock().unwrap(), vec![1]);
    assert_eq!(state.in_flight(), 0);

    // The pipeline carries on with the next frame.
    assert_eq!(sink.publish(rgb_frame(&pool, 3)), Delivery::Accepted);
    wait_until("third result", || state.stats().results_published == 2);
    assert_eq!(receiver.take().unwrap().sequence, 3);
    pipeline.stop();
}

#[test]
fn undecodable_frame_is_released_and_skipped() {
    let (mut pipeline, source, receiver) =
        manual_pipeline(ScriptedAdapter::new(), BackPressure::DropWhileBusy);
    pipeline.start().unwrap();
    let state = pipeline.state();
    let sink = source.sink();
    let pool = BufferPool::new(2);

    assert_eq!(sink.publish(broken_frame(&pool, 1)), Delivery::Accepted);
    wait_until("decode failure", || state.stats().decode_failures == 1);
    wait_idle(&state);
    assert_eq!(pool.leased(), 0);
    assert!(receiver.take().is_none());

    sink.publish(rgb_frame(&pool, 2));
    wait_until("result", || state.stats().results_published == 1);
    let result = receiver.take().unwrap();
    // 4x2 source rotated a quarter turn by the configured decoder.
    assert_eq!(result.image.dimensions(), (2, 4));
    pipeline.stop();
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[test]
fn stop_drains_in_flight_frame_and_restart_begins_idle() {
    let (adapter, release) = ScriptedAdapter::new().gated();
    let (mut pipeline, source, receiver) = manual_pipeline(adapter, BackPressure::DropWhileBusy);
    pipeline.start().unwrap();
    let state = pipeline.state();
    let old_sink = source.sink();
    let pool = BufferPool::new(4);

    old_sink.publish(rgb_frame(&pool, 1));
    wait_until("inference to begin", || state.phase() == Phase::Inferring);

    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        release.send(()).unwrap();
        release
    });
    let stats = pipeline.stop();
    let release = releaser.join().unwrap();

    assert_eq!(stats.frames_accepted, 1);
    assert_eq!(stats.results_published, 1, "in-flight frame drained");
    assert_eq!(receiver.take().unwrap().sequence, 1);
    assert_eq!(source.stops.load(Ordering::SeqCst), 1);
    assert!(!pipeline.is_running());
    assert_eq!(state.phase(), Phase::Idle);
    assert_eq!(state.in_flight(), 0);
    assert_eq!(old_sink.publish(rgb_frame(&pool, 2)), Delivery::Stopped);

    pipeline.start().unwrap();
    assert_eq!(state.phase(), Phase::Idle);
    assert_eq!(state.in_flight(), 0);
    assert_eq!(state.stats().frames_emitted, 0);

    // A sink left over from the previous run does not leak into this one.
    assert_eq!(old_sink.publish(rgb_frame(&pool, 9)), Delivery::Stopped);
    old_sink.record_pool_exhausted();
    assert_eq!(state.stats().frames_emitted, 0);
    assert_eq!(state.stats().dropped(), 0);

    let sink = source.sink();
    assert_eq!(sink.publish(rgb_frame(&pool, 3)), Delivery::Accepted);
    release.send(()).unwrap();
    wait_until("result after restart", || state.stats().results_published == 1);
    pipeline.stop();
}

#[test]
fn device_failure_aborts_start_and_leaves_pipeline_restartable() {
    let (mut pipeline, source, _receiver) =
        manual_pipeline(ScriptedAdapter::new(), BackPressure::DropWhileBusy);
    source.fail_start.store(true, Ordering::SeqCst);

    let err = pipeline.start().unwrap_err();
    assert!(matches!(err, PipelineError::DeviceUnavailable(_)));
    assert!(err.is_fatal());
    assert!(!pipeline.is_running());
    assert_eq!(pipeline.state().phase(), Phase::Idle);

    source.fail_start.store(false, Ordering::SeqCst);
    pipeline.start().expect("adapter handed back after failed start");
    assert!(matches!(
        pipeline.start(),
        Err(PipelineError::Stopped(_))
    ));
    pipeline.stop();
}

// ----------------------------------------------------------------------------
// End to end
// ----------------------------------------------------------------------------

#[test]
fn synthetic_burst_faster_than_inference_sheds_frames_in_order() {
    let source = SyntheticSource::new(Duration::from_millis(10), Some(5));
    let model = StubModel::new(Duration::from_millis(35));
    let spec = ModelSpec {
        labels: vec!["person".into()],
        confidence_threshold: 0.5,
    };
    let (publisher, receiver) = mailbox();
    let capture = CaptureConfig {
        width: 32,
        height: 24,
        format: PixelFormat::Mjpeg,
        buffer_count: 2,
        ..CaptureConfig::default()
    };
    let mut pipeline = Pipeline::new(
        Box::new(source),
        Box::new(AnnotatingAdapter::new(model, spec)),
        capture,
        PipelineConfig::default(),
        publisher,
    );
    let state = pipeline.state();

    let display = DisplayLoop::new(receiver, Duration::from_millis(2));
    let shutdown = display.shutdown_handle();
    let watcher_state = state.clone();
    let watcher = std::thread::spawn(move || {
        wait_until("burst to finish", || {
            let stats = watcher_state.stats();
            stats.frames_emitted == 5
                && watcher_state.phase() == Phase::Idle
                && stats.results_published + stats.inference_failures + stats.decode_failures
                    == stats.frames_accepted
        });
        // Let the UI pick up the final result.
        std::thread::sleep(Duration::from_millis(100));
        shutdown.request();
    });

    pipeline.start().unwrap();
    let mut sink = RecordingSink::default();
    let shown_count = display.run(&mut sink);
    watcher.join().unwrap();
    let stats = pipeline.stop();

    let shown = sink.shown.lock().unwrap().clone();
    assert_eq!(shown_count as usize, shown.len());
    assert!(!shown.is_empty());
    assert!(shown.len() < 5, "some frames must be shed: {shown:?}");
    assert_eq!(shown[0], 1, "first frame finds the pipeline idle");
    assert!(shown.windows(2).all(|w| w[0] < w[1]), "in order: {shown:?}");

    assert_eq!(stats.frames_emitted, 5);
    assert!(stats.frames_accepted < 5);
    assert_eq!(stats.frames_accepted + stats.dropped(), stats.frames_emitted);
    assert_eq!(stats.decode_failures, 0);
}
