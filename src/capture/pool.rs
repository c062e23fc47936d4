//! Fixed-capacity frame buffer pool.
//!
//! Mirrors the camera driver's small buffer ring: a source may only emit a
//! frame while it holds a slot, and the slot comes back when the frame drops.
//! When every slot is out the newest frame is dropped instead of queued.

use std::sync::Arc;

use flume::{Receiver, Sender};

#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    capacity: usize,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (free_tx, free_rx) = flume::bounded(capacity);
        for slot in 0..capacity {
            // Cannot fail: the channel holds exactly `capacity` slots.
            let _ = free_tx.try_send(slot);
        }

        Self {
            inner: Arc::new(PoolInner {
                capacity,
                free_tx,
                free_rx,
            }),
        }
    }

    /// Lease a free slot, or `None` when the pool is exhausted.
    pub fn try_acquire(&self) -> Option<BufferLease> {
        let slot = self.inner.free_rx.try_recv().ok()?;
        Some(BufferLease {
            slot,
            home: self.inner.free_tx.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.free_rx.len()
    }

    pub fn leased(&self) -> usize {
        self.capacity() - self.available()
    }
}

/// Exclusive claim on one pool slot. Returned on drop.
pub struct BufferLease {
    slot: usize,
    home: Sender<usize>,
}

impl BufferLease {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        let _ = self.home.try_send(self.slot);
    }
}
