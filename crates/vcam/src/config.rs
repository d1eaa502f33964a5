use vcam_capture::prelude::*;

/// Default driver name reported by capability queries.
pub const DEFAULT_DRIVER: &str = "up3d_driver";
/// Default card name reported by capability queries.
pub const DEFAULT_CARD: &str = "up3d_device";
/// Default bus info reported by capability queries.
pub const DEFAULT_BUS_INFO: &str = "platform:vcam";
/// Default driver version.
pub const DEFAULT_VERSION: u32 = 1;

/// Per-device configuration, passed to [`VirtualCamera::open`](crate::VirtualCamera::open).
///
/// # Example
/// ```rust
/// use vcam::prelude::*;
///
/// let config = DeviceConfig::new()
///     .card("bench-cam")
///     .buffers(3, 8)
///     .fps(60)
///     .schedule(ScheduleMode::Manual);
/// assert_eq!(config.pool_limits().min_buffers, 3);
/// assert_eq!(config.frame_interval.denominator.get(), 60);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: u32,
    pub limits: FormatLimits,
    /// Size of the format adopted at open.
    pub default_size: FrameSize,
    pub min_buffers: u32,
    pub max_buffers: u32,
    /// Fixed production rate.
    pub frame_interval: Interval,
    pub schedule: ScheduleMode,
    pub clock: TimestampClock,
}

impl DeviceConfig {
    /// Start building a configuration with defaults.
    pub fn new() -> Self {
        Self {
            driver: DEFAULT_DRIVER.into(),
            card: DEFAULT_CARD.into(),
            bus_info: DEFAULT_BUS_INFO.into(),
            version: DEFAULT_VERSION,
            limits: FormatLimits::default(),
            default_size: DEFAULT_FRAME_SIZE,
            min_buffers: PoolLimits::default().min_buffers,
            max_buffers: PoolLimits::default().max_buffers,
            frame_interval: Interval::default(),
            schedule: ScheduleMode::Periodic,
            clock: TimestampClock::Monotonic,
        }
    }

    /// Override the identity strings reported by capability queries.
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn card(mut self, card: impl Into<String>) -> Self {
        self.card = card.into();
        self
    }

    pub fn bus_info(mut self, bus_info: impl Into<String>) -> Self {
        self.bus_info = bus_info.into();
        self
    }

    /// Override format bounds.
    pub fn limits(mut self, limits: FormatLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the size adopted at open.
    pub fn default_size(mut self, width: u32, height: u32) -> Self {
        self.default_size = FrameSize { width, height };
        self
    }

    /// Override buffer pool bounds.
    pub fn buffers(mut self, min: u32, max: u32) -> Self {
        self.min_buffers = min;
        self.max_buffers = max;
        self
    }

    /// Override the production rate.
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame_interval = Interval::from_fps(fps);
        self
    }

    pub fn schedule(mut self, schedule: ScheduleMode) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn clock(mut self, clock: TimestampClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool_limits(&self) -> PoolLimits {
        PoolLimits {
            min_buffers: self.min_buffers,
            max_buffers: self.max_buffers,
        }
        .sanitized()
    }

    pub(crate) fn sanitized(self) -> Self {
        let pool = self.pool_limits();
        Self {
            limits: self.limits.sanitized(),
            min_buffers: pool.min_buffers,
            max_buffers: pool.max_buffers,
            ..self
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_reference_device() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.driver, "up3d_driver");
        assert_eq!(cfg.card, "up3d_device");
        assert_eq!((cfg.default_size.width, cfg.default_size.height), (640, 360));
        assert_eq!((cfg.min_buffers, cfg.max_buffers), (2, 32));
        assert_eq!(cfg.frame_interval.period().as_micros(), 33_333);
        assert_eq!(cfg.schedule, ScheduleMode::Periodic);
    }

    #[test]
    fn sanitized_repairs_inverted_pool_bounds() {
        let cfg = DeviceConfig::new().buffers(0, 0).sanitized();
        assert_eq!((cfg.min_buffers, cfg.max_buffers), (1, 1));
        let cfg = DeviceConfig::new().buffers(6, 4).sanitized();
        assert_eq!((cfg.min_buffers, cfg.max_buffers), (6, 6));
    }
}
