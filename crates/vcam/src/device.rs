use std::{
    ops::Range,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;
use vcam_capture::prelude::*;

use crate::{
    caps::{self, DeviceCapability, InputInfo},
    config::DeviceConfig,
    metrics::{StreamMetrics, StreamSnapshot},
};

/// One open session of the virtual capture device.
///
/// Control operations are serialized by a session lock. Retrieval and
/// producer ticks bypass it, so a blocked `dequeue` never stalls control
/// requests and a slow control request never stalls production.
///
/// # Example
/// ```rust
/// use vcam::prelude::*;
///
/// let cam = VirtualCamera::open(DeviceConfig::new().schedule(ScheduleMode::Manual));
/// let fmt = cam.set_format(&FormatRequest::new(FourCc::RGB24, 640, 360))?;
/// assert_eq!(fmt.size_image(), 691_200);
///
/// cam.request_buffers(2)?;
/// cam.queue_buffer(0)?;
/// cam.queue_buffer(1)?;
/// cam.stream_on()?;
/// cam.tick();
/// cam.tick();
/// for expected in 0..2 {
///     match cam.dequeue(false) {
///         RecvOutcome::Data(info) => assert_eq!(info.sequence, expected),
///         other => panic!("unexpected {other:?}"),
///     }
/// }
/// cam.stream_off();
/// # Ok::<(), DeviceError>(())
/// ```
pub struct VirtualCamera {
    config: DeviceConfig,
    session: Mutex<()>,
    negotiator: FormatNegotiator,
    queue: BufferQueue,
    metrics: StreamMetrics,
    closed: AtomicBool,
}

impl VirtualCamera {
    /// Open a session with the first catalog format at the configured size.
    pub fn open(config: DeviceConfig) -> Self {
        Self::with_source(config, std::sync::Arc::new(TestPattern))
    }

    /// Open a session whose frames come from `source` instead of the test
    /// pattern.
    pub fn with_source(config: DeviceConfig, source: std::sync::Arc<dyn FrameSource>) -> Self {
        let config = config.sanitized();
        let negotiator = FormatNegotiator::new(config.limits, config.default_size);
        let queue = BufferQueue::new(config.pool_limits(), config.clock).with_source(source);
        debug!(
            card = %config.card,
            format = %negotiator.get_current().code(),
            fps = config.frame_interval.fps(),
            schedule = ?config.schedule,
            "device opened"
        );
        Self {
            config,
            session: Mutex::new(()),
            negotiator,
            queue,
            metrics: StreamMetrics::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DeviceError::InvalidState("device is closed".into()));
        }
        Ok(())
    }

    pub fn query_capabilities(&self) -> DeviceCapability {
        DeviceCapability::new(
            &self.config.driver,
            &self.config.card,
            &self.config.bus_info,
            self.config.version,
        )
    }

    pub fn enum_input(&self, index: u32) -> Result<InputInfo, DeviceError> {
        caps::input(index).ok_or(DeviceError::OutOfRange)
    }

    pub fn get_input(&self) -> u32 {
        0
    }

    pub fn set_input(&self, index: u32) -> Result<(), DeviceError> {
        caps::input(index).map(|_| ()).ok_or(DeviceError::OutOfRange)
    }

    pub fn enum_formats(&self, index: u32) -> Result<&'static FormatDescriptor, DeviceError> {
        self.negotiator.enumerate(index)
    }

    pub fn get_format(&self) -> PixFormat {
        self.negotiator.get_current()
    }

    /// The format `set_format` would adopt, without adopting it.
    pub fn try_format(&self, request: &FormatRequest) -> Result<PixFormat, DeviceError> {
        self.negotiator.validate(request)
    }

    pub fn set_format(&self, request: &FormatRequest) -> Result<PixFormat, DeviceError> {
        self.ensure_open()?;
        let _session = self.session.lock();
        self.negotiator.commit(request, self.queue.state())
    }

    pub fn enum_framesizes(&self, code: FourCc, index: u32) -> Result<FrameSize, DeviceError> {
        self.negotiator.frame_size(code, index)
    }

    /// The fixed production interval.
    pub fn frame_interval(&self) -> Interval {
        self.config.frame_interval
    }

    /// Pool sizing the device would apply to a request for `count` buffers.
    pub fn query_layout(&self, count: u32) -> QueueLayout {
        self.queue.query_layout(count, &self.negotiator.get_current())
    }

    /// Allocate a pool sized for the current format; `0` releases it.
    pub fn request_buffers(&self, count: u32) -> Result<u32, DeviceError> {
        self.ensure_open()?;
        let _session = self.session.lock();
        self.queue
            .request_buffers(count, &self.negotiator.get_current())
    }

    /// Append buffers of an explicit capacity.
    pub fn create_buffers(&self, count: u32, plane_size: usize) -> Result<Range<u32>, DeviceError> {
        self.ensure_open()?;
        let _session = self.session.lock();
        self.queue.create_buffers(count, plane_size)
    }

    pub fn query_buffer(&self, index: u32) -> Result<BufferInfo, DeviceError> {
        self.queue.query_buffer(index)
    }

    pub fn prepare_buffer(&self, index: u32) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let _session = self.session.lock();
        self.queue.prepare(index, &self.negotiator.get_current())
    }

    /// Hand buffer `index` to the producer.
    pub fn queue_buffer(&self, index: u32) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let _session = self.session.lock();
        self.queue.enqueue(index, &self.negotiator.get_current())
    }

    /// Oldest completed buffer. With `blocking` set, waits until one is
    /// available or the device closes.
    pub fn dequeue(&self, blocking: bool) -> RecvOutcome<BufferInfo> {
        let mode = if blocking {
            DequeueMode::Blocking
        } else {
            DequeueMode::NonBlocking
        };
        self.dequeue_with(mode)
    }

    /// Like a blocking `dequeue`, but gives up with `Empty` after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> RecvOutcome<BufferInfo> {
        self.dequeue_with(DequeueMode::Timeout(timeout))
    }

    fn dequeue_with(&self, mode: DequeueMode) -> RecvOutcome<BufferInfo> {
        let outcome = self.queue.dequeue(mode);
        if let RecvOutcome::Data(info) = &outcome {
            self.metrics.observe(info);
        }
        outcome
    }

    /// Async retrieval helper when the `async` feature is enabled.
    #[cfg(feature = "async")]
    pub async fn dequeue_async(&self) -> RecvOutcome<BufferInfo> {
        loop {
            match self.queue.dequeue(DequeueMode::NonBlocking) {
                RecvOutcome::Data(info) => {
                    self.metrics.observe(&info);
                    return RecvOutcome::Data(info);
                }
                RecvOutcome::Closed => return RecvOutcome::Closed,
                RecvOutcome::Empty if self.closed.load(Ordering::Acquire) => {
                    return RecvOutcome::Closed;
                }
                RecvOutcome::Empty => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }
    }

    /// Lend the bytes of a completed buffer to `f`.
    pub fn read_buffer<R>(&self, index: u32, f: impl FnOnce(&[u8]) -> R) -> Result<R, DeviceError> {
        self.queue.read_buffer(index, f)
    }

    pub fn stream_on(&self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let _session = self.session.lock();
        self.queue.start_streaming(
            self.negotiator.get_current(),
            self.config.schedule,
            self.config.frame_interval,
        )
    }

    /// Stop streaming; every queued buffer comes back as aborted before this
    /// returns. Returns how many were drained.
    pub fn stream_off(&self) -> usize {
        let _session = self.session.lock();
        self.queue.stop_streaming()
    }

    pub fn stream_state(&self) -> StreamState {
        self.queue.state()
    }

    /// Drive the producer once by hand (for `ScheduleMode::Manual`).
    pub fn tick(&self) -> TickOutcome {
        self.queue.tick()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Consumer-side counts and the rolling frame rate of retrieved frames.
    pub fn metrics(&self) -> StreamSnapshot {
        self.metrics.snapshot()
    }

    /// Number of delivered frames the rolling frame rate is computed over.
    pub fn set_metrics_window(&self, frames: usize) {
        self.metrics.set_window_size(frames);
    }

    /// End the session: stop streaming, release the pool and wake blocked
    /// retrievers with `Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _session = self.session.lock();
        self.queue.close();
        debug!(card = %self.config.card, "device closed");
    }
}

impl Drop for VirtualCamera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn manual() -> VirtualCamera {
        VirtualCamera::open(DeviceConfig::new().schedule(ScheduleMode::Manual))
    }

    fn take(cam: &VirtualCamera) -> BufferInfo {
        match cam.dequeue(false) {
            RecvOutcome::Data(info) => info,
            other => panic!("expected a completion, got {other:?}"),
        }
    }

    #[test]
    fn reference_scenario_produces_two_frames_in_order() {
        let cam = manual();
        let fmt = cam
            .set_format(&FormatRequest::new(FourCc::RGB24, 640, 360))
            .unwrap();
        assert_eq!(fmt.bytes_per_line(), 1920);
        assert_eq!(fmt.size_image(), 691_200);
        assert_eq!(cam.request_buffers(2).unwrap(), 2);
        assert_eq!(cam.query_buffer(1).unwrap().capacity, 691_200);
        cam.queue_buffer(0).unwrap();
        cam.queue_buffer(1).unwrap();
        cam.stream_on().unwrap();
        assert_eq!(cam.tick(), TickOutcome::Completed { index: 0, sequence: 0 });
        assert_eq!(cam.tick(), TickOutcome::Completed { index: 1, sequence: 1 });

        let a = take(&cam);
        let b = take(&cam);
        assert_eq!((a.index, a.sequence), (0, 0));
        assert_eq!((b.index, b.sequence), (1, 1));
        assert_eq!(a.state, BufferState::Dequeued(CompletionStatus::Done));
        let metrics = cam.metrics();
        assert_eq!((metrics.delivered, metrics.sessions), (2, 1));
        assert_eq!(metrics.last_sequence, Some(1));
    }

    #[test]
    fn stream_on_without_buffers_is_invalid_state() {
        let cam = manual();
        let err = cam.stream_on().unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        assert_eq!(err.errno(), 16);
    }

    #[test]
    fn enum_formats_past_catalog_is_out_of_range() {
        let cam = manual();
        let names: Vec<_> = (0..3).map(|i| cam.enum_formats(i).unwrap().name).collect();
        assert_eq!(names, ["8:8:8, RGB", "5:6:5, RGB", "16  YUV 4:2:2"]);
        assert_eq!(cam.enum_formats(3).unwrap_err(), DeviceError::OutOfRange);
    }

    #[test]
    fn set_format_rejected_while_streaming_for_every_format() {
        let cam = manual();
        cam.request_buffers(2).unwrap();
        cam.stream_on().unwrap();
        for entry in FORMAT_CATALOG.iter() {
            let err = cam
                .set_format(&FormatRequest::new(entry.code, 320, 240))
                .unwrap_err();
            assert_eq!(err.code(), "invalid_state");
        }
        cam.stream_off();
        cam.set_format(&FormatRequest::new(FourCc::YUYV, 320, 240))
            .unwrap();
        assert_eq!(cam.get_format().code(), FourCc::YUYV);
    }

    #[test]
    fn stride_and_size_follow_catalog_for_every_format() {
        let cam = manual();
        for entry in FORMAT_CATALOG.iter() {
            let tried = cam
                .try_format(&FormatRequest::new(entry.code, 333, 200))
                .unwrap();
            let fmt = cam
                .set_format(&FormatRequest::new(entry.code, 333, 200))
                .unwrap();
            assert_eq!(tried, fmt);
            assert_eq!(fmt.width() % 2, 0);
            assert_eq!(fmt.bytes_per_line(), fmt.width() * entry.bytes_per_pixel);
            assert_eq!(fmt.size_image(), fmt.bytes_per_line() * fmt.height());
        }
    }

    #[test]
    fn field_and_colorspace_are_resolved() {
        let cam = manual();
        let fmt = cam
            .set_format(&FormatRequest::new(FourCc::YUYV, 640, 360))
            .unwrap();
        assert_eq!(fmt.field(), Field::Interlaced);
        assert_eq!(fmt.color(), ColorSpace::Smpte170m);
        let progressive = FormatRequest {
            field: Field::None,
            ..FormatRequest::new(FourCc::RGB24, 640, 360)
        };
        assert_eq!(
            cam.try_format(&progressive).unwrap_err().code(),
            "invalid_argument"
        );
    }

    #[test]
    fn inputs_and_frame_sizes() {
        let cam = manual();
        assert_eq!(cam.enum_input(0).unwrap().name, "Camera 0");
        assert_eq!(cam.enum_input(1).unwrap_err(), DeviceError::OutOfRange);
        assert_eq!(cam.get_input(), 0);
        cam.set_input(0).unwrap();
        assert!(cam.set_input(2).is_err());
        assert_eq!(
            cam.enum_framesizes(FourCc::YUYV, 0).unwrap(),
            FrameSize {
                width: 640,
                height: 360
            }
        );
        assert_eq!(
            cam.enum_framesizes(FourCc::YUYV, 1).unwrap_err(),
            DeviceError::OutOfRange
        );
        assert!((cam.frame_interval().fps() - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn stop_returns_queued_buffers_aborted_in_fifo_order() {
        let cam = manual();
        cam.request_buffers(4).unwrap();
        for i in [1, 3, 0, 2] {
            cam.queue_buffer(i).unwrap();
        }
        cam.stream_on().unwrap();
        cam.tick();
        assert_eq!(cam.stream_off(), 3);
        assert_eq!(cam.tick(), TickOutcome::Idle);

        let done = take(&cam);
        assert_eq!((done.index, done.status), (1, Some(CompletionStatus::Done)));
        let aborted: Vec<_> = (0..3).map(|_| take(&cam)).collect();
        assert_eq!(
            aborted.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![3, 0, 2]
        );
        assert!(
            aborted
                .iter()
                .all(|b| b.status == Some(CompletionStatus::Aborted))
        );
        assert_eq!(cam.dequeue(false), RecvOutcome::Empty);
    }

    #[test]
    fn buffer_shrunk_by_format_change_is_rejected_at_enqueue() {
        let cam = manual();
        cam.set_format(&FormatRequest::new(FourCc::RGB565, 64, 32))
            .unwrap();
        cam.request_buffers(2).unwrap();
        cam.set_format(&FormatRequest::new(FourCc::RGB24, 64, 32))
            .unwrap();
        let err = cam.queue_buffer(0).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
        assert_eq!(cam.query_buffer(0).unwrap().state, BufferState::Free);
    }

    #[test]
    fn storage_invalidated_by_format_change_fails_only_that_buffer() {
        let cam = manual();
        cam.set_format(&FormatRequest::new(FourCc::RGB565, 64, 32))
            .unwrap();
        cam.request_buffers(2).unwrap();
        cam.queue_buffer(0).unwrap();
        let fmt = cam
            .set_format(&FormatRequest::new(FourCc::RGB24, 64, 32))
            .unwrap();
        let fresh = cam.create_buffers(1, fmt.size_image() as usize).unwrap();
        assert_eq!(fresh, 2..3);
        cam.queue_buffer(2).unwrap();
        cam.stream_on().unwrap();

        assert_eq!(cam.tick(), TickOutcome::Failed { index: 0 });
        let failed = take(&cam);
        assert_eq!(failed.index, 0);
        assert_eq!(failed.status, Some(CompletionStatus::Error));
        assert_eq!(failed.state, BufferState::Dequeued(CompletionStatus::Error));
        assert_eq!(failed.bytes_used, 0);

        assert_eq!(cam.tick(), TickOutcome::Completed { index: 2, sequence: 0 });
        let good = take(&cam);
        assert_eq!((good.index, good.sequence), (2, 0));
        assert_eq!(good.bytes_used, 64 * 3 * 32);
        assert_eq!(cam.stats().errored, 1);
        assert_eq!(cam.metrics().errored, 1);
    }

    #[test]
    fn oversized_limits_clamp_instead_of_overflowing() {
        let cam = VirtualCamera::open(DeviceConfig::new().schedule(ScheduleMode::Manual).limits(
            FormatLimits {
                max_width: 40_000,
                max_height: 40_000,
                ..FormatLimits::default()
            },
        ));
        let request = FormatRequest::new(FourCc::RGB24, 40_000, 40_000);
        let tried = cam.try_format(&request).unwrap();
        let fmt = cam.set_format(&request).unwrap();
        assert_eq!(tried, fmt);
        assert_eq!(fmt.width(), 40_000);
        assert!(fmt.height() < 40_000);
        assert_eq!(fmt.bytes_per_line(), 120_000);
        assert_eq!(
            u64::from(fmt.size_image()),
            u64::from(fmt.bytes_per_line()) * u64::from(fmt.height())
        );
    }

    struct Refusing;

    impl FrameSource for Refusing {
        fn fill(&self, _dst: &mut [u8], _format: &PixFormat, _sequence: u32) -> Option<usize> {
            None
        }
    }

    #[test]
    fn unfillable_buffer_errors_and_ticks_continue() {
        let cam = VirtualCamera::with_source(
            DeviceConfig::new().schedule(ScheduleMode::Manual),
            Arc::new(Refusing),
        );
        cam.request_buffers(2).unwrap();
        cam.queue_buffer(0).unwrap();
        cam.queue_buffer(1).unwrap();
        cam.stream_on().unwrap();
        assert_eq!(cam.tick(), TickOutcome::Failed { index: 0 });
        assert_eq!(cam.tick(), TickOutcome::Failed { index: 1 });
        assert_eq!(cam.tick(), TickOutcome::Starved);
        let info = take(&cam);
        assert_eq!(info.status, Some(CompletionStatus::Error));
        assert_eq!(info.bytes_used, 0);
        assert_eq!(cam.stats().errored, 2);
        assert_eq!(cam.stream_state(), StreamState::Streaming);
    }

    #[test]
    fn sequence_has_no_gaps_across_requeues() {
        let cam = manual();
        cam.request_buffers(2).unwrap();
        cam.queue_buffer(0).unwrap();
        cam.queue_buffer(1).unwrap();
        cam.stream_on().unwrap();
        let mut last_ts = 0;
        for expected in 0..10 {
            cam.tick();
            let info = take(&cam);
            assert_eq!(info.sequence, expected);
            assert!(info.timestamp > last_ts);
            last_ts = info.timestamp;
            cam.queue_buffer(info.index).unwrap();
        }
    }

    #[test]
    fn frame_contents_depend_on_sequence() {
        let cam = manual();
        cam.set_format(&FormatRequest::new(FourCc::YUYV, 64, 32))
            .unwrap();
        cam.request_buffers(2).unwrap();
        cam.queue_buffer(0).unwrap();
        cam.queue_buffer(1).unwrap();
        cam.stream_on().unwrap();
        cam.tick();
        cam.tick();
        let first = cam.read_buffer(0, |d| d.to_vec()).unwrap();
        let second = cam.read_buffer(1, |d| d.to_vec()).unwrap();
        assert_eq!(first.len(), 64 * 2 * 32);
        assert_ne!(first, second);
    }

    #[test]
    fn closed_device_rejects_control_and_wakes_readers() {
        let cam = Arc::new(manual());
        cam.request_buffers(2).unwrap();
        let reader = {
            let cam = cam.clone();
            thread::spawn(move || cam.dequeue(true))
        };
        thread::sleep(Duration::from_millis(20));
        cam.close();
        assert_eq!(reader.join().unwrap(), RecvOutcome::Closed);
        assert_eq!(cam.request_buffers(2).unwrap_err().code(), "invalid_state");
        assert!(cam.query_buffer(0).is_err());
    }

    #[test]
    fn periodic_schedule_delivers_until_stopped() {
        let cam = VirtualCamera::open(DeviceConfig::new().fps(200));
        cam.set_format(&FormatRequest::new(FourCc::RGB565, 96, 64))
            .unwrap();
        cam.request_buffers(3).unwrap();
        for i in 0..3 {
            cam.queue_buffer(i).unwrap();
        }
        cam.stream_on().unwrap();

        let mut delivered = 0;
        while delivered < 6 {
            match cam.dequeue_timeout(Duration::from_secs(2)) {
                RecvOutcome::Data(info) => {
                    assert_eq!(info.sequence, delivered);
                    delivered += 1;
                    cam.queue_buffer(info.index).unwrap();
                }
                other => panic!("producer stalled: {other:?}"),
            }
        }
        cam.stream_off();
        let completed = cam.stats().completed;
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cam.stats().completed, completed);
        let metrics = cam.metrics();
        assert_eq!(metrics.delivered, 6);
        assert!(metrics.fps.is_some_and(|fps| fps > 0.0));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_dequeue_receives_completion() {
        let cam = manual();
        cam.request_buffers(2).unwrap();
        cam.queue_buffer(0).unwrap();
        cam.stream_on().unwrap();
        cam.tick();
        match cam.dequeue_async().await {
            RecvOutcome::Data(info) => assert_eq!(info.index, 0),
            other => panic!("unexpected {other:?}"),
        }
        cam.close();
        assert_eq!(cam.dequeue_async().await, RecvOutcome::Closed);
    }
}
