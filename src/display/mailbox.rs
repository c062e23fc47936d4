//! Single-slot, latest-wins handoff from the pipeline worker to the UI thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use flume::{Receiver, RecvTimeoutError, Sender};

use crate::inference::DetectionResult;

struct Slot {
    latest: ArcSwapOption<DetectionResult>,
    closed: AtomicBool,
}

/// Create a connected publisher/receiver pair.
pub fn mailbox() -> (ResultPublisher, ResultReceiver) {
    let slot = Arc::new(Slot {
        latest: ArcSwapOption::const_empty(),
        closed: AtomicBool::new(false),
    });
    // Wake-ups coalesce: one pending token is enough to make the UI look.
    let (wake_tx, wake_rx) = flume::bounded(1);

    (
        ResultPublisher {
            slot: slot.clone(),
            wake: wake_tx,
        },
        ResultReceiver {
            slot,
            wake: wake_rx,
        },
    )
}

/// Worker side of the mailbox.
#[derive(Clone)]
pub struct ResultPublisher {
    slot: Arc<Slot>,
    wake: Sender<()>,
}

impl ResultPublisher {
    /// Replace whatever is waiting with `result`. Returns `false`, and drops
    /// the result, once the display side has gone away.
    pub fn publish(&self, result: DetectionResult) -> bool {
        if self.is_closed() {
            return false;
        }
        self.slot.latest.store(Some(Arc::new(result)));
        let _ = self.wake.try_send(());
        true
    }

    pub fn is_closed(&self) -> bool {
        self.slot.closed.load(Ordering::Acquire)
    }
}

/// UI side of the mailbox. Closes the mailbox when dropped.
pub struct ResultReceiver {
    slot: Arc<Slot>,
    wake: Receiver<()>,
}

impl ResultReceiver {
    /// Take the waiting result, if any.
    pub fn take(&self) -> Option<Arc<DetectionResult>> {
        self.slot.latest.swap(None)
    }

    /// Take the waiting result, blocking up to `timeout` for one to arrive.
    pub fn wait(&self, timeout: Duration) -> Option<Arc<DetectionResult>> {
        if let Some(result) = self.take() {
            // Consume the token that came with it.
            let _ = self.wake.try_recv();
            return Some(result);
        }
        match self.wake.recv_timeout(timeout) {
            Ok(()) => self.take(),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // Every publisher is gone; still honour the last result.
                let result = self.take();
                if result.is_none() {
                    std::thread::sleep(timeout);
                }
                result
            }
        }
    }

    /// Refuse further results; later `publish` calls become no-ops.
    pub fn close(&self) {
        self.slot.closed.store(true, Ordering::Release);
        self.slot.latest.store(None);
    }
}

impl Drop for ResultReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::time::Instant;

    fn result(sequence: u64) -> DetectionResult {
        DetectionResult {
            image: RgbImage::new(1, 1),
            detections: Vec::new(),
            sequence,
            captured_at: Instant::now(),
            inference_time: Duration::ZERO,
        }
    }

    #[test]
    fn latest_result_wins() {
        let (tx, rx) = mailbox();
        assert!(tx.publish(result(1)));
        assert!(tx.publish(result(2)));

        assert_eq!(rx.wait(Duration::from_millis(10)).unwrap().sequence, 2);
        assert!(rx.take().is_none());
    }

    #[test]
    fn wait_times_out_when_empty() {
        let (_tx, rx) = mailbox();
        let start = Instant::now();
        assert!(rx.wait(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn wait_wakes_on_publish_from_another_thread() {
        let (tx, rx) = mailbox();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            tx.publish(result(9))
        });
        let got = rx.wait(Duration::from_secs(2)).expect("result");
        assert_eq!(got.sequence, 9);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn publishing_after_close_is_a_no_op() {
        let (tx, rx) = mailbox();
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.publish(result(1)));
    }
}
