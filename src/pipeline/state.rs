//! Shared pipeline phase and frame accounting

use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

/// Where the single in-flight frame currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Decoding = 1,
    Inferring = 2,
    Displaying = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Phase::Decoding,
            2 => Phase::Inferring,
            3 => Phase::Displaying,
            _ => Phase::Idle,
        }
    }
}

/// Process-wide pipeline state used for back-pressure decisions.
pub struct PipelineState {
    phase: AtomicU8,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_emitted: AtomicU64,
    frames_accepted: AtomicU64,
    dropped_busy: AtomicU64,
    dropped_pool: AtomicU64,
    dropped_stopped: AtomicU64,
    dropped_source: AtomicU64,
    decode_failures: AtomicU64,
    inference_failures: AtomicU64,
    results_published: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_emitted: u64,
    pub frames_accepted: u64,
    pub dropped_busy: u64,
    pub dropped_pool: u64,
    pub dropped_stopped: u64,
    /// Captured but never delivered because the source failed to produce it
    pub dropped_source: u64,
    pub decode_failures: u64,
    pub inference_failures: u64,
    pub results_published: u64,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_busy + self.dropped_pool + self.dropped_stopped + self.dropped_source
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle as u8),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of frames ever observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn enter_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn leave_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn record_emitted(&self) {
        self.stats.frames_emitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_emitted").increment(1);
    }

    pub(crate) fn record_accepted(&self) {
        self.stats.frames_accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_accepted").increment(1);
    }

    pub(crate) fn record_dropped_busy(&self) {
        self.stats.dropped_busy.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped", "reason" => "busy").increment(1);
    }

    pub(crate) fn record_dropped_pool(&self) {
        self.stats.dropped_pool.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped", "reason" => "pool").increment(1);
    }

    pub(crate) fn record_dropped_stopped(&self) {
        self.stats.dropped_stopped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped", "reason" => "stopped").increment(1);
    }

    pub(crate) fn record_dropped_source(&self) {
        self.stats.dropped_source.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped", "reason" => "source").increment(1);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped", "reason" => "decode").increment(1);
    }

    pub(crate) fn record_inference_failure(&self) {
        self.stats.inference_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped", "reason" => "inference").increment(1);
    }

    pub(crate) fn record_published(&self) {
        self.stats.results_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.stats;
        StatsSnapshot {
            frames_emitted: s.frames_emitted.load(Ordering::Relaxed),
            frames_accepted: s.frames_accepted.load(Ordering::Relaxed),
            dropped_busy: s.dropped_busy.load(Ordering::Relaxed),
            dropped_pool: s.dropped_pool.load(Ordering::Relaxed),
            dropped_stopped: s.dropped_stopped.load(Ordering::Relaxed),
            dropped_source: s.dropped_source.load(Ordering::Relaxed),
            decode_failures: s.decode_failures.load(Ordering::Relaxed),
            inference_failures: s.inference_failures.load(Ordering::Relaxed),
            results_published: s.results_published.load(Ordering::Relaxed),
        }
    }

    /// Back to `Idle` with nothing in flight and zeroed counters.
    pub(crate) fn reset(&self) {
        self.set_phase(Phase::Idle);
        self.in_flight.store(0, Ordering::Release);
        self.max_in_flight.store(0, Ordering::Release);
        let s = &self.stats;
        for counter in [
            &s.frames_emitted,
            &s.frames_accepted,
            &s.dropped_busy,
            &s.dropped_pool,
            &s.dropped_stopped,
            &s.dropped_source,
            &s.decode_failures,
            &s.inference_failures,
            &s.results_published,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
