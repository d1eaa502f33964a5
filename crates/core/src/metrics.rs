use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters for buffer completions and producer under-supply.
///
/// # Example
/// ```rust
/// use vcam_core::metrics::Metrics;
///
/// let metrics = Metrics::default();
/// metrics.completed();
/// assert_eq!(metrics.snapshot().completed, 1);
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    completed: AtomicU64,
    aborted: AtomicU64,
    errored: AtomicU64,
    empty_ticks: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Buffers returned with a valid frame.
    pub completed: u64,
    /// Buffers drained by stop-streaming.
    pub aborted: u64,
    /// Buffers the producer refused to fill.
    pub errored: u64,
    /// Producer ticks that found no queued buffer.
    pub empty_ticks: u64,
}

impl Metrics {
    pub fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn empty_tick(&self) {
        self.empty_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            completed: self.completed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            empty_ticks: self.empty_ticks.load(Ordering::Relaxed),
        }
    }
}
