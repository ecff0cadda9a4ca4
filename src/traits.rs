//! Core traits and types for the camera SDK abstraction.

use std::fmt;
use std::time::Duration;

use crate::error::SdkError;
use crate::nodes::NodeMap;

/// Which pending buffer the stream delivers when several are queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferHandling {
    /// Deliver the most recent frame, dropping older ones.
    NewestFirst,
    /// Deliver only the most recent frame and discard everything else.
    NewestOnly,
    /// Deliver frames in arrival order.
    OldestFirst,
    /// Deliver frames in arrival order, overwriting the oldest when full.
    OldestFirstOverwrite,
}

/// How the number of stream buffers is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferCount {
    /// Let the SDK pick a count.
    Auto,
    /// Use exactly this many buffers.
    Manual(u32),
}

/// Stream buffer policy applied before a device is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamBuffering {
    /// Delivery policy.
    pub handling: BufferHandling,
    /// Buffer count policy.
    pub count: BufferCount,
}

impl StreamBuffering {
    /// Single buffer, newest frame first. Stale frames are worse than dropped
    /// ones for a real-time consumer.
    pub const REAL_TIME: Self = Self {
        handling: BufferHandling::NewestFirst,
        count: BufferCount::Manual(1),
    };

    /// Number of buffers to allocate, falling back to `default` in auto mode.
    pub const fn buffer_count(self, default: u32) -> u32 {
        match self.count {
            BufferCount::Auto => default,
            BufferCount::Manual(count) => count,
        }
    }
}

/// Completion status of an acquired image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// The image arrived intact.
    NoError,
    /// Payload CRC did not match.
    CrcCheckFailed,
    /// More data arrived than the buffer could hold.
    DataOverflow,
    /// Some packets were never received.
    MissingPackets,
    /// The leader packet was never received.
    MissingLeader,
    /// The trailer packet was never received.
    MissingTrailer,
    /// Fewer bytes arrived than the frame layout requires.
    DataIncomplete,
    /// The host ran out of resources while receiving.
    NoSystemResources,
    /// Any other transport-specific status code.
    Unknown(i32),
}

impl ImageStatus {
    /// Human readable description of the status.
    pub const fn description(self) -> &'static str {
        match self {
            Self::NoError => "Image has no error",
            Self::CrcCheckFailed => "Image failed CRC check",
            Self::DataOverflow => "Received more data than the size of the image",
            Self::MissingPackets => "Image has missing packets",
            Self::MissingLeader => "Image leader is missing",
            Self::MissingTrailer => "Image trailer is missing",
            Self::DataIncomplete => "Image data is incomplete",
            Self::NoSystemResources => "No system resources available",
            Self::Unknown(_) => "Unknown image status",
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "{} ({code})", self.description()),
            _ => f.write_str(self.description()),
        }
    }
}

/// A frame borrowed from the SDK. Valid until the next call on its device.
#[derive(Debug, Clone)]
pub struct RawImage<'a> {
    /// Pixel payload.
    pub data: &'a [u8],
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    /// Bits per pixel.
    pub bits_per_pixel: u32,
    /// Capture time in nanoseconds since the SDK's epoch.
    pub timestamp_ns: u64,
    /// Whether the SDK flagged the frame as incomplete.
    pub incomplete: bool,
    /// Transport status.
    pub status: ImageStatus,
}

/// Enumeration of attached cameras.
///
/// An explicitly owned registry replaces the SDK's process-wide system
/// singleton, so sessions are independent of each other.
pub trait DeviceRegistry: Send {
    /// Handle type for a device in this registry.
    type Device: CameraDevice;

    /// Re-enumerate attached devices into the cache.
    fn refresh(&mut self) -> Result<(), SdkError>;

    /// Number of cached devices.
    fn len(&self) -> usize;

    /// Whether the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look a cached device up by serial number.
    fn by_serial(&mut self, serial: &str) -> Result<Option<Self::Device>, SdkError>;

    /// Look a cached device up by position.
    fn by_index(&mut self, index: usize) -> Result<Option<Self::Device>, SdkError>;

    /// Drop a device from the cache.
    fn remove_by_serial(&mut self, serial: &str) -> Result<(), SdkError>;
}

/// Abstraction over a single camera handle.
pub trait CameraDevice: Send {
    /// Transport-layer node map, readable before [`CameraDevice::init`].
    type TransportNodes: NodeMap;
    /// Device node map, valid after [`CameraDevice::init`].
    type Nodes: NodeMap;

    /// Whether the handle still refers to an attached device.
    fn is_valid(&self) -> bool;

    /// Transport-layer properties (serial, device type, link speed, ...).
    fn transport_nodes(&self) -> &Self::TransportNodes;

    /// Mutable transport-layer properties, for commands such as force IP.
    fn transport_nodes_mut(&mut self) -> &mut Self::TransportNodes;

    /// Device properties.
    fn nodes(&self) -> &Self::Nodes;

    /// Mutable device properties.
    fn nodes_mut(&mut self) -> &mut Self::Nodes;

    /// Configure stream buffering. Must be called before streaming starts.
    fn configure_stream(&mut self, buffering: StreamBuffering) -> Result<(), SdkError>;

    /// Open and initialize the device.
    fn init(&mut self) -> Result<(), SdkError>;

    /// Release the device.
    fn deinit(&mut self) -> Result<(), SdkError>;

    /// Begin streaming.
    fn begin_acquisition(&mut self) -> Result<(), SdkError>;

    /// End streaming.
    fn end_acquisition(&mut self) -> Result<(), SdkError>;

    /// Wait up to `timeout` for the next frame.
    fn next_image(&mut self, timeout: Duration) -> Result<RawImage<'_>, SdkError>;
}
