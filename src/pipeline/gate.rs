//! Admission boundary between frame sources and the pipeline worker.
//!
//! Every acceptance decision is made under a single lock so that a frame can
//! never slip in while the worker is between "done" and "idle".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use flume::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::state::{Phase, PipelineState};
use crate::capture::Frame;

/// What happens to a frame that arrives while another one is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackPressure {
    /// Drop it on arrival.
    #[default]
    DropWhileBusy,
    /// Hold it in a single pending slot; a newer arrival replaces it.
    KeepLatest,
}

/// Outcome of offering a frame to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the worker; pipeline left `Idle`.
    Accepted,
    /// Parked as the next frame to process.
    Pending,
    /// Discarded because a frame is already in flight.
    DroppedBusy,
    /// Discarded because the pipeline no longer accepts frames.
    Stopped,
}

struct Boundary {
    pending: Option<Frame>,
    work_tx: Option<Sender<Frame>>,
}

pub(crate) struct Gate {
    state: Arc<PipelineState>,
    policy: BackPressure,
    accepting: AtomicBool,
    boundary: Mutex<Boundary>,
}

impl Gate {
    pub(crate) fn new(
        state: Arc<PipelineState>,
        policy: BackPressure,
        work_tx: Sender<Frame>,
    ) -> Self {
        Self {
            state,
            policy,
            accepting: AtomicBool::new(true),
            boundary: Mutex::new(Boundary {
                pending: None,
                work_tx: Some(work_tx),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Boundary> {
        // A panic while holding the lock cannot leave the boundary torn: every
        // critical section is a handful of field writes.
        self.boundary
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self, frame: Frame) -> Delivery {
        // A closed gate belongs to a finished run; its counters may already
        // have been reset for the next one, so stale frames are not counted.
        if !self.accepting.load(Ordering::Acquire) {
            return Delivery::Stopped;
        }

        let mut boundary = self.lock();
        let Some(work_tx) = boundary.work_tx.as_ref() else {
            return Delivery::Stopped;
        };
        self.state.record_emitted();

        if self.state.phase() == Phase::Idle {
            let sequence = frame.sequence();
            match work_tx.try_send(frame) {
                Ok(()) => {
                    self.state.set_phase(Phase::Decoding);
                    self.state.enter_flight();
                    self.state.record_accepted();
                    trace!(seq = sequence, "frame accepted");
                    Delivery::Accepted
                }
                Err(TrySendError::Full(_)) => {
                    self.state.record_dropped_busy();
                    Delivery::DroppedBusy
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.state.record_dropped_stopped();
                    Delivery::Stopped
                }
            }
        } else {
            match self.policy {
                BackPressure::DropWhileBusy => {
                    trace!(seq = frame.sequence(), "pipeline busy, frame dropped");
                    self.state.record_dropped_busy();
                    Delivery::DroppedBusy
                }
                BackPressure::KeepLatest => {
                    if let Some(older) = boundary.pending.replace(frame) {
                        trace!(seq = older.sequence(), "pending frame superseded");
                        self.state.record_dropped_busy();
                    }
                    Delivery::Pending
                }
            }
        }
    }

    /// Called by the worker when a frame has left the pipeline. Returns the
    /// pending frame to process next, or parks the pipeline at `Idle`.
    pub(crate) fn finish(&self) -> Option<Frame> {
        let mut boundary = self.lock();
        self.state.leave_flight();

        if self.accepting.load(Ordering::Acquire) {
            if let Some(next) = boundary.pending.take() {
                self.state.set_phase(Phase::Decoding);
                self.state.enter_flight();
                self.state.record_accepted();
                return Some(next);
            }
        }

        self.state.set_phase(Phase::Idle);
        None
    }

    /// Stop accepting frames and release the worker's inbox.
    pub(crate) fn close(&self) {
        self.accepting.store(false, Ordering::Release);

        let mut boundary = self.lock();
        if boundary.pending.take().is_some() {
            self.state.record_dropped_stopped();
        }
        if boundary.work_tx.take().is_some() {
            debug!("pipeline boundary closed");
        }
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

/// Handle through which a [`FrameSource`](crate::capture::FrameSource)
/// pushes frames into the pipeline.
#[derive(Clone)]
pub struct FrameSink {
    gate: Arc<Gate>,
}

impl FrameSink {
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }

    /// Offer a captured frame. Frames that are not accepted are dropped here,
    /// returning their buffer to the source's pool.
    pub fn publish(&self, frame: Frame) -> Delivery {
        self.gate.admit(frame)
    }

    /// Account for a frame the source could not emit because its buffer pool
    /// was exhausted.
    pub fn record_pool_exhausted(&self) {
        self.record_lost(PipelineState::record_dropped_pool);
    }

    /// Account for a frame the source captured but could not turn into a
    /// [`Frame`], e.g. because encoding it failed.
    pub fn record_source_failure(&self) {
        self.record_lost(PipelineState::record_dropped_source);
    }

    fn record_lost(&self, reason: fn(&PipelineState)) {
        let boundary = self.gate.lock();
        if boundary.work_tx.is_some() {
            self.gate.state.record_emitted();
            reason(&self.gate.state);
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.gate.is_accepting()
    }
}
