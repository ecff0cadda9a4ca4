//! Error types for the SDK capability surface and the camera session.

use std::fmt;
use std::time::Duration;

/// Error codes reported by the vendor SDK.
///
/// The numeric values follow the GenTL-style codes used by Spinnaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkErrorKind {
    /// Generic, unspecified failure.
    Error,
    /// The SDK or device was used before initialization.
    NotInitialized,
    /// The requested feature is not implemented by the device.
    NotImplemented,
    /// The device is held by another process.
    ResourceInUse,
    /// Access to the device or node was denied.
    AccessDenied,
    /// The handle no longer refers to a live device.
    InvalidHandle,
    /// No device or node with that identifier exists.
    InvalidId,
    /// The operation produced no data.
    NoData,
    /// An argument was rejected.
    InvalidParameter,
    /// Low level I/O failure.
    Io,
    /// The operation did not complete within its time budget.
    Timeout,
    /// The operation was aborted.
    Abort,
    /// A stream buffer was invalid.
    InvalidBuffer,
    /// The resource is currently not available.
    NotAvailable,
    /// The device address is not reachable (GigE device on a wrong subnet).
    InvalidAddress,
}

impl SdkErrorKind {
    /// Numeric SDK error code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Error => -1001,
            Self::NotInitialized => -1002,
            Self::NotImplemented => -1003,
            Self::ResourceInUse => -1004,
            Self::AccessDenied => -1005,
            Self::InvalidHandle => -1006,
            Self::InvalidId => -1007,
            Self::NoData => -1008,
            Self::InvalidParameter => -1009,
            Self::Io => -1010,
            Self::Timeout => -1011,
            Self::Abort => -1012,
            Self::InvalidBuffer => -1013,
            Self::NotAvailable => -1014,
            Self::InvalidAddress => -1015,
        }
    }
}

impl fmt::Display for SdkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}

/// A fault raised by the vendor SDK, carrying its diagnostic text verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} [{kind}]")]
pub struct SdkError {
    /// Error classification.
    pub kind: SdkErrorKind,
    /// Diagnostic text as reported by the SDK.
    pub message: String,
}

impl SdkError {
    /// Create a new SDK error.
    pub fn new(kind: SdkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SdkErrorKind::Timeout,
            std::io::ErrorKind::NotFound => SdkErrorKind::InvalidId,
            std::io::ErrorKind::PermissionDenied => SdkErrorKind::AccessDenied,
            std::io::ErrorKind::InvalidInput => SdkErrorKind::InvalidParameter,
            _ => match err.raw_os_error() {
                // EBUSY
                Some(16) => SdkErrorKind::ResourceInUse,
                // ENODEV
                Some(19) => SdkErrorKind::InvalidHandle,
                _ => SdkErrorKind::Io,
            },
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors surfaced by [`DeviceSession`](crate::DeviceSession) and
/// [`FrameAcquirer`](crate::FrameAcquirer).
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// No matching device became visible within the connection budget.
    #[error("cannot connect to the device within {0:?}")]
    ConnectionTimeout(Duration),

    /// The device did not report a usable serial number.
    #[error("unable to determine the serial number of the connected device")]
    SerialUnavailable,

    /// Reading transport-layer device information failed.
    #[error("failed to determine device info: {0}")]
    DeviceInfo(#[source] SdkError),

    /// Device initialization or stream setup failed.
    #[error("failed to connect to camera: {0}")]
    Initialize(#[source] SdkError),

    /// A GigE device is on the wrong subnet; auto force IP was triggered and a
    /// new connect attempt is required once the device reappears.
    #[error("camera {serial} is on a wrong subnet, auto force IP was triggered: {source}")]
    WrongSubnet {
        /// Serial of the affected device.
        serial: u32,
        /// The addressing fault reported during initialization.
        source: SdkError,
    },

    /// Tearing the device down failed.
    #[error("failed to disconnect camera: {0}")]
    Disconnect(#[source] SdkError),

    /// Beginning acquisition failed.
    #[error("failed to start capture: {0}")]
    Start(#[source] SdkError),

    /// Ending acquisition failed.
    #[error("failed to stop capture: {0}")]
    Stop(#[source] SdkError),

    /// The warm-up start/stop cycle of a reconfiguration failed.
    #[error("failed to restart the camera: {0}")]
    Restart(#[source] Box<CameraError>),

    /// No device is bound to the session.
    #[error("not connected to the camera")]
    NotConnected,

    /// A device is bound but acquisition has not been started.
    #[error("camera is currently not running, start capturing frames first")]
    NotRunning,

    /// Pulling the next buffer failed or timed out. Retry on the next cycle.
    #[error("failed to retrieve buffer: {0}")]
    RetrieveBuffer(#[source] SdkError),

    /// The frame layout reported by the device does not fit its buffer.
    #[error("inconsistent frame geometry: {0}")]
    InvalidFrame(String),

    /// The color filter / bit depth combination has no defined encoding.
    #[error("unsupported pixel format: color filter '{color_filter}' at {bits_per_pixel} bits per pixel")]
    UnsupportedFormat {
        /// Value of the `PixelColorFilter` node.
        color_filter: String,
        /// Bits per pixel reported with the frame.
        bits_per_pixel: u32,
    },

    /// The named node cannot be written in the current device state.
    #[error("node '{name}' is not available or not writable")]
    NodeNotWritable {
        /// Node name.
        name: String,
    },

    /// The named node cannot be read in the current device state.
    #[error("node '{name}' is not available or not readable")]
    NodeNotReadable {
        /// Node name.
        name: String,
    },

    /// Accessing the named node raised an SDK fault.
    #[error("node '{name}': {source}")]
    Node {
        /// Node name.
        name: String,
        /// Underlying SDK fault.
        source: SdkError,
    },
}

impl CameraError {
    /// Whether the caller should simply retry the operation later.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout(_) | Self::WrongSubnet { .. } | Self::RetrieveBuffer(_)
        )
    }

    pub(crate) fn node(name: &str, source: SdkError) -> Self {
        Self::Node {
            name: name.to_owned(),
            source,
        }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
