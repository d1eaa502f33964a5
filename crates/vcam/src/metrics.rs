use std::collections::VecDeque;

use parking_lot::Mutex;
use vcam_capture::prelude::{BufferInfo, CompletionStatus};

const DEFAULT_WINDOW: usize = 120;

/// What the consumer has actually retrieved, as opposed to the producer-side
/// [`QueueStats`](vcam_capture::prelude::QueueStats).
///
/// The frame rate comes from the device timestamps stamped at completion,
/// so it measures production cadence rather than how often the consumer
/// happened to call `dequeue`.
///
/// # Example
/// ```rust
/// use vcam::prelude::*;
///
/// let cam = VirtualCamera::open(DeviceConfig::new().schedule(ScheduleMode::Manual));
/// cam.request_buffers(2)?;
/// cam.queue_buffer(0)?;
/// cam.queue_buffer(1)?;
/// cam.stream_on()?;
/// cam.tick();
/// cam.dequeue(false);
/// cam.stream_off();
/// cam.dequeue(false);
///
/// let snapshot = cam.metrics();
/// assert_eq!((snapshot.delivered, snapshot.aborted), (1, 1));
/// assert!(snapshot.fps.is_none());
/// # Ok::<(), DeviceError>(())
/// ```
#[derive(Debug, Default)]
pub struct StreamMetrics {
    inner: Mutex<Tally>,
}

/// Point-in-time copy of [`StreamMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamSnapshot {
    /// Frames retrieved with `Done` status.
    pub delivered: u64,
    /// Buffers retrieved after a stop-streaming drain.
    pub aborted: u64,
    /// Buffers retrieved with `Error` status.
    pub errored: u64,
    /// Streaming sessions seen, counted when the sequence restarts.
    pub sessions: u64,
    /// Last delivered sequence number.
    pub last_sequence: Option<u32>,
    /// Delivered frames in the rolling window.
    pub window: usize,
    /// Mean spacing of device timestamps across the window.
    pub avg_interval_millis: Option<f64>,
    /// Frames per second across the window, from device timestamps.
    pub fps: Option<f64>,
}

#[derive(Debug)]
struct Tally {
    delivered: u64,
    aborted: u64,
    errored: u64,
    sessions: u64,
    /// `(sequence, timestamp_ns)` of recent `Done` frames from the current session.
    frames: VecDeque<(u32, u64)>,
    max: usize,
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            delivered: 0,
            aborted: 0,
            errored: 0,
            sessions: 0,
            frames: VecDeque::new(),
            max: DEFAULT_WINDOW,
        }
    }
}

impl StreamMetrics {
    /// Account for one retrieved buffer.
    pub fn observe(&self, info: &BufferInfo) {
        let mut state = self.inner.lock();
        match info.status {
            Some(CompletionStatus::Done) => state.deliver(info.sequence, info.timestamp),
            Some(CompletionStatus::Aborted) => state.aborted += 1,
            Some(CompletionStatus::Error) => state.errored += 1,
            None => {}
        }
    }

    /// Resize the rolling window; at least two frames are kept so a rate
    /// can still be derived.
    pub fn set_window_size(&self, frames: usize) {
        let mut state = self.inner.lock();
        state.max = frames.max(2);
        state.trim();
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let state = self.inner.lock();
        let span_nanos = state.span_nanos();
        let gaps = state.frames.len().saturating_sub(1) as f64;
        StreamSnapshot {
            delivered: state.delivered,
            aborted: state.aborted,
            errored: state.errored,
            sessions: state.sessions,
            last_sequence: state.frames.back().map(|&(seq, _)| seq),
            window: state.frames.len(),
            avg_interval_millis: span_nanos.map(|ns| ns as f64 / 1_000_000.0 / gaps),
            fps: span_nanos.map(|ns| gaps * 1_000_000_000.0 / ns as f64),
        }
    }
}

impl Tally {
    fn deliver(&mut self, sequence: u32, timestamp: u64) {
        self.delivered += 1;
        // Sequence numbers restart at 0 with every stream_on.
        let restarted = self
            .frames
            .back()
            .is_none_or(|&(last, _)| sequence <= last);
        if restarted {
            self.frames.clear();
            self.sessions += 1;
        }
        self.frames.push_back((sequence, timestamp));
        self.trim();
    }

    fn trim(&mut self) {
        while self.frames.len() > self.max {
            self.frames.pop_front();
        }
    }

    fn span_nanos(&self) -> Option<u64> {
        let &(_, first) = self.frames.front()?;
        let &(_, last) = self.frames.back()?;
        let span = last.saturating_sub(first);
        (self.frames.len() >= 2 && span > 0).then_some(span)
    }
}
