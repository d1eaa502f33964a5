//! Buffer-queue state machine shared by the control path and the producer.
use std::{
    ops::Range,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace};
use vcam_core::prelude::*;

use crate::{
    StreamState,
    producer::{FrameClock, FrameProducer, FrameSource, TestPattern, TickOutcome, TimestampClock},
    schedule::{PeriodicTask, ScheduleMode},
};

/// State touched by both the control path and the producer.
pub(crate) struct QueueShared {
    pub(crate) buffers: RwLock<Vec<Mutex<Buffer>>>,
    pub(crate) active: ActiveQueue,
    pub(crate) done: DoneQueue,
    pub(crate) streaming: AtomicBool,
    pub(crate) sequence: AtomicU32,
    /// Held by a producer tick for its whole duration and by the
    /// stop-streaming drain.
    pub(crate) gate: Mutex<()>,
    pub(crate) metrics: Metrics,
}

impl QueueShared {
    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }
}

/// Bounds on the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct PoolLimits {
    /// Buffers required before streaming may start.
    pub min_buffers: u32,
    /// Upper bound on the pool size.
    pub max_buffers: u32,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            min_buffers: 2,
            max_buffers: 32,
        }
    }
}

impl PoolLimits {
    /// At least one buffer, and `max >= min`.
    pub fn sanitized(self) -> Self {
        let min_buffers = self.min_buffers.max(1);
        Self {
            min_buffers,
            max_buffers: self.max_buffers.max(min_buffers),
        }
    }
}

/// Pool sizing answer for a format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLayout {
    pub count: u32,
    pub planes: SmallVec<[PlaneLayout; 3]>,
}

impl QueueLayout {
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane_size(&self) -> usize {
        self.planes.iter().map(|p| p.len).sum()
    }
}

/// Snapshot of one buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub state: BufferState,
    pub capacity: usize,
    pub payload: usize,
    pub prepared: bool,
    pub bytes_used: usize,
    pub sequence: u32,
    /// Nanoseconds on the device clock; 0 before the first completion.
    pub timestamp: u64,
    pub status: Option<CompletionStatus>,
}

impl BufferInfo {
    fn of(buf: &Buffer) -> Self {
        let meta = buf.meta();
        Self {
            index: buf.index(),
            state: buf.state(),
            capacity: buf.capacity(),
            payload: buf.payload(),
            prepared: buf.is_prepared(),
            bytes_used: meta.map(|m| m.bytes_used).unwrap_or(0),
            sequence: meta.map(|m| m.sequence).unwrap_or(0),
            timestamp: meta.map(|m| m.timestamp).unwrap_or(0),
            status: meta.map(|m| m.status),
        }
    }
}

/// How long `dequeue` may wait for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueMode {
    NonBlocking,
    Blocking,
    Timeout(Duration),
}

/// Owns the buffer pool, the active FIFO and the streaming state.
///
/// # Example
/// ```rust
/// use vcam_capture::prelude::*;
///
/// let queue = BufferQueue::new(PoolLimits::default(), TimestampClock::Monotonic);
/// let rgb = FormatDescriptor::lookup(FourCc::RGB24).unwrap();
/// let fmt = PixFormat::from_descriptor(rgb, 64, 48);
/// assert_eq!(queue.request_buffers(2, &fmt).unwrap(), 2);
/// for i in 0..2 {
///     queue.enqueue(i, &fmt).unwrap();
/// }
/// queue
///     .start_streaming(fmt, ScheduleMode::Manual, Interval::default())
///     .unwrap();
/// assert_eq!(queue.tick(), TickOutcome::Completed { index: 0, sequence: 0 });
/// match queue.dequeue(DequeueMode::NonBlocking) {
///     RecvOutcome::Data(info) => assert_eq!(info.bytes_used, fmt.size_image() as usize),
///     other => panic!("unexpected {other:?}"),
/// }
/// assert_eq!(queue.stop_streaming(), 1);
/// ```
pub struct BufferQueue {
    shared: Arc<QueueShared>,
    limits: PoolLimits,
    clock: Arc<FrameClock>,
    source: Arc<dyn FrameSource>,
    producer: Mutex<Option<Arc<FrameProducer>>>,
    task: Mutex<Option<PeriodicTask>>,
}

impl BufferQueue {
    pub fn new(limits: PoolLimits, clock: TimestampClock) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                buffers: RwLock::new(Vec::new()),
                active: ActiveQueue::new(),
                done: DoneQueue::new(),
                streaming: AtomicBool::new(false),
                sequence: AtomicU32::new(0),
                gate: Mutex::new(()),
                metrics: Metrics::default(),
            }),
            limits: limits.sanitized(),
            clock: Arc::new(FrameClock::new(clock)),
            source: Arc::new(TestPattern),
            producer: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Replace the pixel source used by subsequent streaming sessions.
    pub fn with_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = source;
        self
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    pub fn state(&self) -> StreamState {
        if self.shared.is_streaming() {
            StreamState::Streaming
        } else {
            StreamState::Idle
        }
    }

    /// Number of allocated buffers.
    pub fn len(&self) -> usize {
        self.shared.buffers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffers currently owned by the producer.
    pub fn queued(&self) -> usize {
        self.shared.active.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.metrics.snapshot()
    }

    /// Pool size and plane sizing for `requested` buffers of `format`.
    pub fn query_layout(&self, requested: u32, format: &PixFormat) -> QueueLayout {
        QueueLayout {
            count: requested
                .max(self.limits.min_buffers)
                .min(self.limits.max_buffers),
            planes: plane_layout(format),
        }
    }

    /// Replace the pool with buffers sized for `format`; `count == 0`
    /// releases it. Returns the number of buffers now allocated.
    pub fn request_buffers(&self, count: u32, format: &PixFormat) -> Result<u32, DeviceError> {
        if self.shared.is_streaming() {
            return Err(DeviceError::InvalidState(
                "buffer pool cannot change while streaming".into(),
            ));
        }
        if count == 0 {
            self.release_pool();
            return Ok(0);
        }
        let layout = self.query_layout(count, format);
        let capacity = layout.plane_size();
        let pool = (0..layout.count)
            .map(|index| Buffer::allocate(index, capacity).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;
        self.shared.active.drain();
        self.shared.done.clear();
        *self.shared.buffers.write() = pool;
        debug!(count = layout.count, capacity, "buffer pool allocated");
        Ok(layout.count)
    }

    /// Append up to `count` buffers of `capacity` bytes without touching
    /// existing ones. Returns the new indices.
    pub fn create_buffers(&self, count: u32, capacity: usize) -> Result<Range<u32>, DeviceError> {
        let mut buffers = self.shared.buffers.write();
        let start = buffers.len() as u32;
        if count == 0 {
            return Ok(start..start);
        }
        let room = self.limits.max_buffers.saturating_sub(start);
        if room == 0 {
            return Err(DeviceError::ResourceExhausted(format!(
                "buffer pool already holds {start} buffers"
            )));
        }
        let end = start + count.min(room);
        let mut fresh = Vec::with_capacity((end - start) as usize);
        for index in start..end {
            fresh.push(Mutex::new(Buffer::allocate(index, capacity)?));
        }
        buffers.extend(fresh);
        debug!(start, end, capacity, "buffers created");
        Ok(start..end)
    }

    /// Drop every buffer along with any queued or undelivered completions.
    ///
    /// Fails while streaming; stop first so queued buffers come back aborted.
    pub fn release(&self) -> Result<(), DeviceError> {
        if self.shared.is_streaming() {
            return Err(DeviceError::InvalidState(
                "buffer pool cannot be released while streaming".into(),
            ));
        }
        self.release_pool();
        Ok(())
    }

    fn release_pool(&self) {
        self.shared.active.drain();
        self.shared.done.clear();
        let released = std::mem::take(&mut *self.shared.buffers.write()).len();
        if released > 0 {
            debug!(released, "buffer pool released");
        }
    }

    fn with_buffer<R>(
        &self,
        index: u32,
        f: impl FnOnce(&mut Buffer) -> Result<R, DeviceError>,
    ) -> Result<R, DeviceError> {
        let buffers = self.shared.buffers.read();
        let slot = buffers
            .get(index as usize)
            .ok_or(DeviceError::OutOfRange)?;
        let mut buf = slot.lock();
        f(&mut buf)
    }

    /// Validate buffer `index` against `format`'s image size.
    pub fn prepare(&self, index: u32, format: &PixFormat) -> Result<(), DeviceError> {
        self.with_buffer(index, |buf| {
            if !buf.state().submittable() {
                return Err(DeviceError::InvalidState(format!(
                    "buffer {index} is not held by the consumer"
                )));
            }
            buf.prepare(format.size_image() as usize)
        })
    }

    /// Hand buffer `index` to the producer, preparing it first if needed.
    pub fn enqueue(&self, index: u32, format: &PixFormat) -> Result<(), DeviceError> {
        self.with_buffer(index, |buf| {
            if !buf.state().submittable() {
                return Err(DeviceError::InvalidState(format!(
                    "buffer {index} is {:?}",
                    buf.state()
                )));
            }
            buf.prepare(format.size_image() as usize)?;
            buf.submit()?;
            if !self.shared.active.push(index) {
                return Err(DeviceError::InternalInvariantViolation(format!(
                    "buffer {index} was already in the active queue"
                )));
            }
            trace!(index, "buffer enqueued");
            Ok(())
        })
    }

    /// Snapshot of buffer `index`.
    pub fn query_buffer(&self, index: u32) -> Result<BufferInfo, DeviceError> {
        self.with_buffer(index, |buf| Ok(BufferInfo::of(buf)))
    }

    /// Lend the completed bytes of a consumer-held buffer to `f`.
    pub fn read_buffer<R>(&self, index: u32, f: impl FnOnce(&[u8]) -> R) -> Result<R, DeviceError> {
        self.with_buffer(index, |buf| match buf.state().ownership() {
            Ownership::Producer => Err(DeviceError::InvalidState(format!(
                "buffer {index} is owned by the producer"
            ))),
            _ => Ok(f(buf.data())),
        })
    }

    /// Oldest completed buffer, in completion order.
    pub fn dequeue(&self, mode: DequeueMode) -> RecvOutcome<BufferInfo> {
        // One deadline across stale-completion skips.
        let deadline = match mode {
            DequeueMode::Timeout(d) => Instant::now().checked_add(d),
            _ => None,
        };
        loop {
            let received = match (mode, deadline) {
                (DequeueMode::NonBlocking, _) => self.shared.done.try_recv(),
                (DequeueMode::Timeout(_), Some(deadline)) => {
                    self.shared.done.recv_deadline(deadline)
                }
                _ => self.shared.done.recv(),
            };
            let index = match received {
                RecvOutcome::Data(index) => index,
                RecvOutcome::Empty => return RecvOutcome::Empty,
                RecvOutcome::Closed => return RecvOutcome::Closed,
            };
            let buffers = self.shared.buffers.read();
            if let Some(slot) = buffers.get(index as usize) {
                let mut buf = slot.lock();
                if buf.retrieve().is_some() {
                    return RecvOutcome::Data(BufferInfo::of(&buf));
                }
            }
            // Completion for a buffer that has since been released.
            trace!(index, "skipping stale completion");
        }
    }

    /// Arm the producer for `format`.
    pub fn start_streaming(
        &self,
        format: PixFormat,
        schedule: ScheduleMode,
        interval: Interval,
    ) -> Result<(), DeviceError> {
        if self
            .shared
            .streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::InvalidState("already streaming".into()));
        }
        let allocated = self.len() as u32;
        if allocated == 0 || allocated < self.limits.min_buffers {
            self.shared.streaming.store(false, Ordering::Release);
            return Err(DeviceError::InvalidState(format!(
                "{allocated} buffers allocated, at least {} required",
                self.limits.min_buffers
            )));
        }

        let producer = Arc::new(FrameProducer::new(
            self.shared.clone(),
            format,
            self.source.clone(),
            self.clock.clone(),
        ));
        self.shared.sequence.store(0, Ordering::Release);

        if schedule == ScheduleMode::Periodic {
            let worker = producer.clone();
            match PeriodicTask::spawn("vcam-producer", interval.period(), move || {
                worker.tick();
            }) {
                Ok(task) => *self.task.lock() = Some(task),
                Err(err) => {
                    self.shared.streaming.store(false, Ordering::Release);
                    return Err(DeviceError::ResourceExhausted(format!(
                        "producer thread: {err}"
                    )));
                }
            }
        }
        *self.producer.lock() = Some(producer);
        debug!(
            code = %format.code(),
            size_image = format.size_image(),
            ?schedule,
            fps = interval.fps(),
            "streaming started"
        );
        Ok(())
    }

    /// Disarm the producer and return every queued buffer as aborted, in
    /// FIFO order. Returns the number of buffers drained.
    ///
    /// No completion happens after this returns.
    pub fn stop_streaming(&self) -> usize {
        let was_streaming = self.shared.streaming.swap(false, Ordering::AcqRel);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel();
        }
        self.producer.lock().take();

        let _gate = self.shared.gate.lock();
        let drained = self.shared.active.drain();
        {
            let buffers = self.shared.buffers.read();
            for &index in &drained {
                if let Some(slot) = buffers.get(index as usize) {
                    slot.lock().complete(FrameMeta::aborted());
                    self.shared.metrics.aborted();
                }
            }
        }
        for &index in &drained {
            self.shared.done.push(index);
        }
        if was_streaming || !drained.is_empty() {
            debug!(drained = drained.len(), "streaming stopped");
        }
        drained.len()
    }

    /// Run one producer tick by hand; a no-op unless streaming.
    pub fn tick(&self) -> TickOutcome {
        let producer = self.producer.lock().clone();
        match producer {
            Some(producer) => producer.tick(),
            None => TickOutcome::Idle,
        }
    }

    /// Stop, release the pool and wake blocked retrievers with `Closed`.
    pub fn close(&self) {
        self.stop_streaming();
        self.release_pool();
        self.shared.done.close();
    }
}

impl Drop for BufferQueue {
    fn drop(&mut self) {
        self.close();
    }
}
