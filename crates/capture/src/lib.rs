#![doc = include_str!("../README.md")]

pub mod negotiator;
pub mod producer;
pub mod queue;
pub mod schedule;

/// Whether the producer is armed.
///
/// # Example
/// ```rust
/// use vcam_capture::prelude::*;
///
/// let queue = BufferQueue::new(PoolLimits::default(), TimestampClock::Monotonic);
/// assert_eq!(queue.state(), StreamState::Idle);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StreamState {
    #[default]
    Idle,
    Streaming,
}

pub mod prelude {
    pub use crate::{
        StreamState,
        negotiator::FormatNegotiator,
        producer::{FrameClock, FrameProducer, FrameSource, TestPattern, TickOutcome, TimestampClock},
        queue::{BufferInfo, BufferQueue, DequeueMode, PoolLimits, QueueLayout},
        schedule::{PeriodicTask, ScheduleMode},
    };
    pub use vcam_core::prelude::*;
}
