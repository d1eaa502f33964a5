use smallvec::{SmallVec, smallvec};

use crate::{error::DeviceError, format::PixFormat};

/// Status attached to a buffer when ownership returns to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Holds a valid frame.
    Done,
    /// Drained by stop-streaming without being filled.
    Aborted,
    /// The producer refused to fill it (storage never validated).
    Error,
}

/// Which party currently owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Allocated and never submitted.
    Free,
    /// In the active queue or being filled.
    Producer,
    /// Returned by completion or drain.
    Consumer,
}

/// Lifecycle state of a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Freshly allocated; the consumer may prepare and enqueue it.
    Free,
    /// Owned by the producer.
    Queued,
    /// Returned to the consumer and waiting in the done list.
    Done(CompletionStatus),
    /// Retrieved by the consumer.
    Dequeued(CompletionStatus),
}

impl BufferState {
    pub fn ownership(&self) -> Ownership {
        match self {
            BufferState::Free => Ownership::Free,
            BufferState::Queued => Ownership::Producer,
            BufferState::Done(_) | BufferState::Dequeued(_) => Ownership::Consumer,
        }
    }

    /// Whether the consumer currently holds the buffer and may submit it.
    pub fn submittable(&self) -> bool {
        matches!(self, BufferState::Free | BufferState::Dequeued(_))
    }
}

/// Completion metadata stamped on a buffer by the producer or the drain.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{CompletionStatus, FrameMeta};
///
/// let meta = FrameMeta::aborted();
/// assert_eq!(meta.status, CompletionStatus::Aborted);
/// assert_eq!(meta.bytes_used, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub sequence: u32,
    /// Nanoseconds on the device clock.
    pub timestamp: u64,
    pub bytes_used: usize,
    pub status: CompletionStatus,
}

impl FrameMeta {
    pub fn done(sequence: u32, timestamp: u64, bytes_used: usize) -> Self {
        Self {
            sequence,
            timestamp,
            bytes_used,
            status: CompletionStatus::Done,
        }
    }

    pub fn aborted() -> Self {
        Self {
            sequence: 0,
            timestamp: 0,
            bytes_used: 0,
            status: CompletionStatus::Aborted,
        }
    }

    pub fn error(timestamp: u64) -> Self {
        Self {
            sequence: 0,
            timestamp,
            bytes_used: 0,
            status: CompletionStatus::Error,
        }
    }
}

/// Plane sizing for a buffer pool.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{FormatDescriptor, FourCc, PixFormat, plane_layout};
///
/// let rgb = FormatDescriptor::lookup(FourCc::RGB24).unwrap();
/// let layout = plane_layout(&PixFormat::from_descriptor(rgb, 4, 4));
/// assert_eq!(layout.len(), 1);
/// assert_eq!(layout[0].len, 48);
/// assert_eq!(layout[0].stride, 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset into the owning buffer.
    pub offset: usize,
    /// Length of the plane in bytes.
    pub len: usize,
    /// Stride in bytes.
    pub stride: usize,
}

/// Planes needed to hold one frame of `format`; always a single plane.
pub fn plane_layout(format: &PixFormat) -> SmallVec<[PlaneLayout; 3]> {
    smallvec![PlaneLayout {
        offset: 0,
        len: format.size_image() as usize,
        stride: format.bytes_per_line() as usize,
    }]
}

/// One reusable frame-storage slot.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{Buffer, BufferState};
///
/// let buf = Buffer::allocate(0, 64).unwrap();
/// assert_eq!(buf.capacity(), 64);
/// assert_eq!(buf.state(), BufferState::Free);
/// assert!(!buf.is_prepared());
/// ```
#[derive(Debug)]
pub struct Buffer {
    index: u32,
    state: BufferState,
    storage: Vec<u8>,
    payload: usize,
    prepared: bool,
    meta: Option<FrameMeta>,
}

impl Buffer {
    /// Allocate zeroed backing storage of `capacity` bytes.
    pub fn allocate(index: u32, capacity: usize) -> Result<Self, DeviceError> {
        let mut storage = Vec::new();
        storage.try_reserve_exact(capacity).map_err(|_| {
            DeviceError::ResourceExhausted(format!("buffer {index}: {capacity} bytes"))
        })?;
        storage.resize(capacity, 0);
        Ok(Self {
            index,
            state: BufferState::Free,
            storage,
            payload: 0,
            prepared: false,
            meta: None,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes the next frame will occupy, as fixed by the last prepare.
    pub fn payload(&self) -> usize {
        self.payload
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Metadata from the most recent completion.
    pub fn meta(&self) -> Option<FrameMeta> {
        self.meta
    }

    /// Validate storage against `size_image` and record it as the payload.
    ///
    /// A buffer already prepared for the same size is left untouched.
    pub fn prepare(&mut self, size_image: usize) -> Result<(), DeviceError> {
        if self.prepared && self.payload == size_image {
            return Ok(());
        }
        self.prepared = false;
        self.payload = size_image;
        if self.capacity() < size_image {
            return Err(DeviceError::InvalidArgument(format!(
                "buffer {} holds {} bytes, frame needs {}",
                self.index,
                self.capacity(),
                size_image
            )));
        }
        self.prepared = true;
        Ok(())
    }

    /// Hand the buffer to the producer.
    pub fn submit(&mut self) -> Result<(), DeviceError> {
        if !self.state.submittable() {
            return Err(DeviceError::InvalidState(format!(
                "buffer {} is {:?}",
                self.index, self.state
            )));
        }
        self.state = BufferState::Queued;
        Ok(())
    }

    /// Return the buffer to the consumer with completion metadata.
    pub fn complete(&mut self, meta: FrameMeta) {
        self.meta = Some(meta);
        self.state = BufferState::Done(meta.status);
    }

    /// Mark a completed buffer as retrieved by the consumer.
    pub fn retrieve(&mut self) -> Option<FrameMeta> {
        match self.state {
            BufferState::Done(status) => {
                self.state = BufferState::Dequeued(status);
                self.meta
            }
            _ => None,
        }
    }

    /// Writable view of the prepared payload; `None` when storage was never
    /// validated or no longer covers the payload.
    pub fn payload_mut(&mut self) -> Option<&mut [u8]> {
        if !self.prepared {
            return None;
        }
        self.storage.get_mut(..self.payload)
    }

    /// Bytes of the last completed frame.
    pub fn data(&self) -> &[u8] {
        let used = self.meta.map(|m| m.bytes_used).unwrap_or(0);
        self.storage.get(..used).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_twice_keeps_payload() {
        let mut buf = Buffer::allocate(3, 100).unwrap();
        buf.prepare(80).unwrap();
        buf.prepare(80).unwrap();
        assert_eq!(buf.payload(), 80);
        assert!(buf.is_prepared());
    }

    #[test]
    fn prepare_rejects_short_storage() {
        let mut buf = Buffer::allocate(0, 10).unwrap();
        let err = buf.prepare(11).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        assert!(!buf.is_prepared());
        assert!(buf.payload_mut().is_none());
    }

    #[test]
    fn prepare_revalidates_after_size_change() {
        let mut buf = Buffer::allocate(0, 10).unwrap();
        buf.prepare(10).unwrap();
        assert!(buf.prepare(20).is_err());
        assert!(!buf.is_prepared());
        buf.prepare(8).unwrap();
        assert_eq!(buf.payload_mut().map(|p| p.len()), Some(8));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut buf = Buffer::allocate(0, 4).unwrap();
        assert_eq!(buf.state().ownership(), Ownership::Free);
        buf.submit().unwrap();
        assert_eq!(buf.state().ownership(), Ownership::Producer);
        assert!(buf.submit().is_err());
        buf.complete(FrameMeta::done(7, 100, 4));
        assert_eq!(buf.state().ownership(), Ownership::Consumer);
        // Must be retrieved before it can go back to the producer.
        assert!(buf.submit().is_err());
        assert_eq!(buf.retrieve().map(|m| m.sequence), Some(7));
        assert_eq!(buf.state(), BufferState::Dequeued(CompletionStatus::Done));
        buf.submit().unwrap();
    }

    #[test]
    fn aborted_buffer_exposes_no_data() {
        let mut buf = Buffer::allocate(0, 4).unwrap();
        buf.submit().unwrap();
        buf.complete(FrameMeta::aborted());
        assert!(buf.data().is_empty());
    }
}
