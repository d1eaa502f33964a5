use parking_lot::RwLock;
use tracing::debug;
use vcam_core::prelude::*;

use crate::StreamState;

/// Holds the device's current format and validates candidates against the
/// catalog and device limits.
///
/// # Example
/// ```rust
/// use vcam_capture::prelude::*;
///
/// let negotiator = FormatNegotiator::new(FormatLimits::default(), DEFAULT_FRAME_SIZE);
/// let fmt = negotiator
///     .commit(&FormatRequest::new(FourCc::YUYV, 320, 240), StreamState::Idle)
///     .unwrap();
/// assert_eq!(negotiator.get_current(), fmt);
/// assert_eq!(fmt.size_image(), 320 * 2 * 240);
/// ```
pub struct FormatNegotiator {
    limits: FormatLimits,
    current: RwLock<PixFormat>,
}

impl FormatNegotiator {
    /// Start with the first catalog entry at `default_size` (bounded by `limits`).
    pub fn new(limits: FormatLimits, default_size: FrameSize) -> Self {
        let limits = limits.sanitized();
        let (width, height) = limits.bound(default_size.width, default_size.height);
        Self {
            limits,
            current: RwLock::new(PixFormat::from_descriptor(
                &FORMAT_CATALOG[0],
                width,
                height,
            )),
        }
    }

    pub fn limits(&self) -> FormatLimits {
        self.limits
    }

    /// Catalog entry at `index`, in enumeration order.
    pub fn enumerate(&self, index: u32) -> Result<&'static FormatDescriptor, DeviceError> {
        FORMAT_CATALOG
            .get(index as usize)
            .ok_or(DeviceError::OutOfRange)
    }

    /// Copy of the current format.
    pub fn get_current(&self) -> PixFormat {
        *self.current.read()
    }

    /// The format the device would adopt for `candidate`, without adopting it.
    pub fn validate(&self, candidate: &FormatRequest) -> Result<PixFormat, DeviceError> {
        if FormatDescriptor::lookup(candidate.code).is_none() {
            return Err(DeviceError::InvalidArgument(format!(
                "unsupported pixel format {}",
                candidate.code
            )));
        }
        if resolve_field(candidate.field).is_none() {
            return Err(DeviceError::InvalidArgument(format!(
                "unsupported field {:?}",
                candidate.field
            )));
        }
        negotiate(candidate, &self.limits).ok_or_else(|| {
            DeviceError::InvalidArgument(format!(
                "frame {}x{} {} exceeds the image size limit",
                candidate.width, candidate.height, candidate.code
            ))
        })
    }

    /// Validate and replace the current format; only allowed while idle.
    pub fn commit(
        &self,
        candidate: &FormatRequest,
        state: StreamState,
    ) -> Result<PixFormat, DeviceError> {
        if state != StreamState::Idle {
            return Err(DeviceError::InvalidState(
                "format cannot change while streaming".into(),
            ));
        }
        let format = self.validate(candidate)?;
        *self.current.write() = format;
        debug!(
            code = %format.code(),
            width = format.width(),
            height = format.height(),
            size_image = format.size_image(),
            "format committed"
        );
        Ok(format)
    }

    /// Discrete frame size for `code`; each encoding advertises exactly one.
    pub fn frame_size(&self, code: FourCc, index: u32) -> Result<FrameSize, DeviceError> {
        if index > 0 {
            return Err(DeviceError::OutOfRange);
        }
        FormatDescriptor::lookup(code)
            .map(|d| d.frame_size)
            .ok_or_else(|| DeviceError::InvalidArgument(format!("unsupported pixel format {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiator() -> FormatNegotiator {
        FormatNegotiator::new(FormatLimits::default(), DEFAULT_FRAME_SIZE)
    }

    #[test]
    fn default_is_first_catalog_entry() {
        let fmt = negotiator().get_current();
        assert_eq!(fmt.code(), FourCc::RGB24);
        assert_eq!((fmt.width(), fmt.height()), (640, 360));
        assert_eq!(fmt.size_image(), 691_200);
    }

    #[test]
    fn enumerate_past_catalog_is_out_of_range() {
        let n = negotiator();
        assert_eq!(n.enumerate(2).unwrap().code, FourCc::YUYV);
        assert_eq!(
            n.enumerate(FORMAT_CATALOG.len() as u32).unwrap_err(),
            DeviceError::OutOfRange
        );
    }

    #[test]
    fn validate_does_not_mutate() {
        let n = negotiator();
        let before = n.get_current();
        let fmt = n
            .validate(&FormatRequest::new(FourCc::RGB565, 99, 4000))
            .unwrap();
        assert_eq!((fmt.width(), fmt.height()), (100, 1080));
        assert_eq!(n.get_current(), before);
    }

    #[test]
    fn validate_rejects_unknown_code() {
        let err = negotiator()
            .validate(&FormatRequest::new(FourCc::new(*b"H264"), 640, 360))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn huge_limits_are_capped_instead_of_overflowing() {
        let limits = FormatLimits {
            max_width: 40_000,
            max_height: 40_000,
            ..FormatLimits::default()
        };
        let n = FormatNegotiator::new(limits, DEFAULT_FRAME_SIZE);
        let fmt = n
            .commit(
                &FormatRequest::new(FourCc::RGB24, 40_000, 40_000),
                StreamState::Idle,
            )
            .unwrap();
        assert_eq!(fmt.width(), 40_000);
        assert!(fmt.height() < 40_000);
        assert_eq!(fmt.size_image(), fmt.bytes_per_line() * fmt.height());
    }

    #[test]
    fn commit_while_streaming_is_invalid_state() {
        let n = negotiator();
        let err = n
            .commit(
                &FormatRequest::new(FourCc::YUYV, 320, 240),
                StreamState::Streaming,
            )
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        assert_eq!(n.get_current().code(), FourCc::RGB24);
    }

    #[test]
    fn frame_size_is_discrete() {
        let n = negotiator();
        assert_eq!(n.frame_size(FourCc::RGB24, 0).unwrap(), DEFAULT_FRAME_SIZE);
        assert_eq!(
            n.frame_size(FourCc::RGB24, 1).unwrap_err(),
            DeviceError::OutOfRange
        );
        assert!(n.frame_size(FourCc::new(*b"MJPG"), 0).is_err());
    }
}
