//! Frame producer: turns the head of the active queue into a completed frame.
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use tracing::{error, trace};
use vcam_core::prelude::*;

use crate::queue::QueueShared;

/// Pixel synthesis used by the producer.
///
/// # Example
/// ```rust
/// use vcam_capture::prelude::*;
///
/// struct Black;
/// impl FrameSource for Black {
///     fn fill(&self, dst: &mut [u8], format: &PixFormat, _sequence: u32) -> Option<usize> {
///         let size = format.size_image() as usize;
///         dst.get_mut(..size)?.fill(0);
///         Some(size)
///     }
/// }
/// ```
pub trait FrameSource: Send + Sync {
    /// Write one frame of `format` into `dst`, returning the bytes written, or
    /// `None` without writing when `dst` cannot hold the frame.
    fn fill(&self, dst: &mut [u8], format: &PixFormat, sequence: u32) -> Option<usize>;
}

/// The built-in scrolling gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestPattern;

impl FrameSource for TestPattern {
    fn fill(&self, dst: &mut [u8], format: &PixFormat, sequence: u32) -> Option<usize> {
        fill_test_pattern(dst, format, sequence)
    }
}

/// Clock used for completion timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimestampClock {
    /// Nanoseconds since the device was opened.
    #[default]
    Monotonic,
    /// Nanoseconds since the Unix epoch.
    Realtime,
}

/// Timestamp source that never repeats or goes backwards, even when the
/// wall clock is stepped.
#[derive(Debug)]
pub struct FrameClock {
    kind: TimestampClock,
    origin: Instant,
    last: AtomicU64,
}

impl FrameClock {
    pub fn new(kind: TimestampClock) -> Self {
        Self {
            kind,
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> TimestampClock {
        self.kind
    }

    /// Next timestamp in nanoseconds, strictly greater than the previous one.
    pub fn now(&self) -> u64 {
        let raw = match self.kind {
            TimestampClock::Monotonic => self.origin.elapsed().as_nanos() as u64,
            TimestampClock::Realtime => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
        };
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = raw.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(seen) => prev = seen,
            }
        }
    }
}

/// What a single producer tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not streaming; nothing touched.
    Idle,
    /// Streaming but the active queue was empty.
    Starved,
    /// A buffer was filled and handed back.
    Completed { index: u32, sequence: u32 },
    /// A buffer was handed back with error status instead of being filled.
    Failed { index: u32 },
}

/// One streaming session's producer, bound to the format that was current
/// when streaming started.
pub struct FrameProducer {
    shared: Arc<QueueShared>,
    format: PixFormat,
    source: Arc<dyn FrameSource>,
    clock: Arc<FrameClock>,
}

impl FrameProducer {
    pub(crate) fn new(
        shared: Arc<QueueShared>,
        format: PixFormat,
        source: Arc<dyn FrameSource>,
        clock: Arc<FrameClock>,
    ) -> Self {
        Self {
            shared,
            format,
            source,
            clock,
        }
    }

    pub fn format(&self) -> &PixFormat {
        &self.format
    }

    /// Service the oldest queued buffer, if any.
    ///
    /// Serialized against the stop-streaming drain, so a tick that observes
    /// the stream as stopped never touches the queue.
    pub fn tick(&self) -> TickOutcome {
        let _gate = self.shared.gate.lock();
        if !self.shared.is_streaming() {
            return TickOutcome::Idle;
        }
        let Some(index) = self.shared.active.pop() else {
            self.shared.metrics.empty_tick();
            trace!("producer tick with no queued buffer");
            return TickOutcome::Starved;
        };

        let buffers = self.shared.buffers.read();
        let Some(slot) = buffers.get(index as usize) else {
            error!(index, "queued index is outside the buffer pool");
            self.shared.metrics.errored();
            return TickOutcome::Failed { index };
        };
        let mut buf = slot.lock();
        let timestamp = self.clock.now();
        let sequence = self.shared.sequence.load(Ordering::Acquire);

        let written = buf
            .payload_mut()
            .and_then(|dst| self.source.fill(dst, &self.format, sequence));
        let outcome = match written {
            Some(bytes_used) => {
                self.shared
                    .sequence
                    .store(sequence.wrapping_add(1), Ordering::Release);
                buf.complete(FrameMeta::done(sequence, timestamp, bytes_used));
                self.shared.metrics.completed();
                trace!(index, sequence, timestamp, bytes_used, "frame completed");
                TickOutcome::Completed { index, sequence }
            }
            None => {
                let violation = DeviceError::InternalInvariantViolation(format!(
                    "buffer {index} reached the producer without validated storage \
                     (prepared={}, payload={}, frame={})",
                    buf.is_prepared(),
                    buf.payload(),
                    self.format.size_image()
                ));
                error!(index, code = violation.code(), "{violation}");
                buf.complete(FrameMeta::error(timestamp));
                self.shared.metrics.errored();
                TickOutcome::Failed { index }
            }
        };
        drop(buf);
        drop(buffers);
        self.shared.done.push(index);
        outcome
    }
}
