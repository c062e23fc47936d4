//! Frame pipeline coordinator: Source -> Decoder -> Adapter -> Display.
//!
//! At most one frame is in flight. Frames are admitted at the
//! [`FrameSink`] boundary, processed sequentially on a dedicated worker
//! thread, and the result is handed to the UI thread through a single-slot
//! mailbox.

mod gate;
pub mod state;

pub use gate::{BackPressure, Delivery, FrameSink};
pub use state::{Phase, PipelineState, StatsSnapshot};

use std::sync::Arc;
use std::thread::JoinHandle;

use flume::Receiver;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{Frame, FrameDecoder, FrameSource};
use crate::display::ResultPublisher;
use crate::inference::InferenceAdapter;
use crate::{CaptureConfig, PipelineConfig, PipelineError};

use gate::Gate;

struct Running {
    gate: Arc<Gate>,
    worker: JoinHandle<Box<dyn InferenceAdapter>>,
}

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    adapter: Option<Box<dyn InferenceAdapter>>,
    decoder: FrameDecoder,
    capture: CaptureConfig,
    config: PipelineConfig,
    state: Arc<PipelineState>,
    publisher: ResultPublisher,
    running: Option<Running>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        adapter: Box<dyn InferenceAdapter>,
        capture: CaptureConfig,
        config: PipelineConfig,
        publisher: ResultPublisher,
    ) -> Self {
        Self {
            source,
            adapter: Some(adapter),
            decoder: FrameDecoder::new(capture.rotation),
            capture,
            config,
            state: Arc::new(PipelineState::new()),
            publisher,
            running: None,
        }
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the worker and start the source. Device and configuration
    /// errors are returned as-is; nothing keeps running after a failure.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.running.is_some() {
            return Err(PipelineError::Stopped("already running"));
        }
        let mut adapter = self
            .adapter
            .take()
            .ok_or(PipelineError::Stopped("without an inference adapter"))?;

        self.state.reset();

        if let Err(e) = adapter.warm_up() {
            warn!("Warm-up of {} failed: {}", adapter.name(), e);
        }

        let (work_tx, work_rx) = flume::bounded::<Frame>(1);
        let gate = Arc::new(Gate::new(
            self.state.clone(),
            self.config.back_pressure,
            work_tx,
        ));

        let worker = Worker {
            gate: gate.clone(),
            state: self.state.clone(),
            decoder: self.decoder,
            publisher: self.publisher.clone(),
            adapter,
        };
        let core = self.config.worker_core;
        let worker = std::thread::Builder::new()
            .name("lookout-worker".into())
            .spawn(move || worker.run(work_rx, core))
            .map_err(|e| PipelineError::Configuration(format!("worker thread: {e}")))?;

        if let Err(e) = self.source.start(&self.capture, FrameSink::new(gate.clone())) {
            error!("Source {} failed to start: {}", self.source.name(), e);
            self.source.stop();
            self.shutdown(Running { gate, worker });
            self.state.reset();
            return Err(e);
        }

        info!(
            "Pipeline started ({:?}, decoder rotation {}°)",
            self.config.back_pressure,
            self.decoder.rotation().degrees()
        );
        self.running = Some(Running { gate, worker });
        Ok(())
    }

    /// Stop accepting frames, release the camera and let the in-flight frame
    /// drain. Returns the counters as they were before the reset.
    #[instrument(skip(self))]
    pub fn stop(&mut self) -> StatsSnapshot {
        let Some(running) = self.running.take() else {
            self.state.reset();
            return StatsSnapshot::default();
        };

        running.gate.close();
        self.source.stop();
        self.shutdown(running);

        let stats = self.state.stats();
        self.state.reset();
        info!(
            accepted = stats.frames_accepted,
            dropped = stats.dropped(),
            published = stats.results_published,
            "Pipeline stopped"
        );
        stats
    }

    fn shutdown(&mut self, running: Running) {
        running.gate.close();
        match running.worker.join() {
            Ok(adapter) => self.adapter = Some(adapter),
            Err(_) => error!("Pipeline worker panicked; adapter lost"),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.stop();
        }
    }
}

struct Worker {
    gate: Arc<Gate>,
    state: Arc<PipelineState>,
    decoder: FrameDecoder,
    publisher: ResultPublisher,
    adapter: Box<dyn InferenceAdapter>,
}

impl Worker {
    fn run(mut self, inbox: Receiver<Frame>, core: Option<usize>) -> Box<dyn InferenceAdapter> {
        if let Some(id) = core {
            if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                warn!("Could not pin pipeline worker to core {}", id);
            }
        }

        while let Ok(frame) = inbox.recv() {
            let mut next = Some(frame);
            while let Some(frame) = next {
                self.process(frame);
                next = self.gate.finish();
            }
        }

        debug!("pipeline worker exiting");
        self.adapter
    }

    #[instrument(skip_all, fields(seq = frame.sequence()))]
    fn process(&mut self, frame: Frame) {
        let sequence = frame.sequence();
        let captured_at = frame.timestamp;

        let decoded = self.decoder.decode(&frame);
        // Give the buffer back to the source as soon as the pixels are ours.
        drop(frame);

        let image = match decoded {
            Ok(image) => image,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                self.state.record_decode_failure();
                return;
            }
        };

        self.state.set_phase(Phase::Inferring);
        let result = match self.adapter.infer(image) {
            Ok(result) => result,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                self.state.record_inference_failure();
                return;
            }
        };

        self.state.set_phase(Phase::Displaying);
        if self.publisher.publish(result) {
            self.state.record_published();
            metrics::histogram!("frame_latency_ms")
                .record(captured_at.elapsed().as_secs_f64() * 1000.0);
        } else {
            debug!(seq = sequence, "display closed, result discarded");
        }
    }
}
