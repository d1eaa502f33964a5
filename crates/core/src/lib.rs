#![doc = include_str!("../README.md")]

pub mod buffer;
pub mod error;
pub mod format;
pub mod metrics;
pub mod pattern;
pub mod queue;

pub mod prelude {
    pub use crate::{
        buffer::{
            Buffer, BufferState, CompletionStatus, FrameMeta, Ownership, PlaneLayout, plane_layout,
        },
        error::DeviceError,
        format::{
            ColorSpace, DEFAULT_FRAME_SIZE, FORMAT_CATALOG, Field, FormatDescriptor, FormatLimits,
            FormatRequest, FourCc, FrameSize, Interval, PixFormat, negotiate, resolve_field,
        },
        metrics::{Metrics, QueueStats},
        pattern::fill_test_pattern,
        queue::{ActiveQueue, DoneQueue, RecvOutcome},
    };
}
