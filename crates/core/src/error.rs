/// Errors returned by control-path operations on a virtual device.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::DeviceError;
///
/// let err = DeviceError::InvalidState("format change while streaming".into());
/// assert_eq!(err.code(), "invalid_state");
/// assert_eq!(err.errno(), 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("index out of range")]
    OutOfRange,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation not allowed in current state: {0}")]
    InvalidState(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

const EINVAL: i32 = 22;
const EBUSY: i32 = 16;
const ENOMEM: i32 = 12;

impl DeviceError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::OutOfRange => "out_of_range",
            DeviceError::InvalidArgument(_) => "invalid_argument",
            DeviceError::InvalidState(_) => "invalid_state",
            DeviceError::ResourceExhausted(_) => "resource_exhausted",
            DeviceError::InternalInvariantViolation(_) => "internal_invariant",
        }
    }

    /// Errno a video device node reports for this error.
    pub fn errno(&self) -> i32 {
        match self {
            DeviceError::OutOfRange
            | DeviceError::InvalidArgument(_)
            | DeviceError::InternalInvariantViolation(_) => EINVAL,
            DeviceError::InvalidState(_) => EBUSY,
            DeviceError::ResourceExhausted(_) => ENOMEM,
        }
    }
}
