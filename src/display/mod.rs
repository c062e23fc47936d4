#[cfg(feature = "window")]
pub mod display;
pub mod layout;
pub mod mailbox;
pub mod snapshot;

#[cfg(feature = "window")]
pub use display::Sdl2Sink;
pub use layout::fit_keep_ratio;
pub use mailbox::{mailbox, ResultPublisher, ResultReceiver};
pub use snapshot::SnapshotSink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, instrument, warn};

use crate::inference::DetectionResult;

/// Presents detection results. Only ever called from the UI thread.
pub trait DisplaySink {
    /// Replace whatever is on screen with `result`.
    fn show(&mut self, result: &DetectionResult) -> Result<()>;

    /// Service platform events between frames. `false` requests shutdown.
    fn pump(&mut self) -> bool {
        true
    }
}

/// Cloneable request to end a running [`DisplayLoop`].
#[derive(Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// UI-side event loop: waits on the mailbox and hands each result to the
/// sink on the calling thread.
pub struct DisplayLoop {
    receiver: ResultReceiver,
    tick: Duration,
    shutdown: ShutdownHandle,
}

impl DisplayLoop {
    pub fn new(receiver: ResultReceiver, tick: Duration) -> Self {
        Self {
            receiver,
            tick,
            shutdown: ShutdownHandle::default(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested or the sink asks to quit. Returns the
    /// number of results shown. The mailbox is closed on return.
    #[instrument(skip_all)]
    pub fn run(self, sink: &mut dyn DisplaySink) -> u64 {
        let mut shown = 0u64;

        while !self.shutdown.is_requested() {
            if !sink.pump() {
                info!("Display closed by user");
                break;
            }

            let Some(result) = self.receiver.wait(self.tick) else {
                continue;
            };

            match sink.show(&result) {
                Ok(()) => {
                    shown += 1;
                    metrics::histogram!("display_latency_ms")
                        .record(result.captured_at.elapsed().as_secs_f64() * 1000.0);
                }
                // Previous image stays up.
                Err(e) => warn!("Display of frame {} failed: {:#}", result.sequence, e),
            }
        }

        self.receiver.close();
        shown
    }
}
