//! Vision-Cam-Driver: session management and frame acquisition for machine-vision cameras
//!
//! This library manages the connection lifecycle of a single camera behind a
//! trait-based SDK abstraction and turns raw frames into typed images, enabling
//! both production use with V4L2 hardware and testing with mock devices.

pub mod acquire;
pub mod config;
pub mod device;
pub mod encoding;
pub mod error;
pub mod image;
pub mod nodes;
pub mod profile;
pub mod session;
pub mod settings;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use acquire::FrameAcquirer;
pub use config::{DriverConfig, SessionConfig};
pub use device::{V4l2Camera, V4l2Registry};
pub use encoding::{resolve_encoding, ImageEncoding};
pub use error::{CameraError, Result, SdkError, SdkErrorKind};
pub use image::{Header, Image, Stamp};
pub use nodes::{NodeAccess, NodeMap, NodeValue};
pub use profile::CameraProfile;
pub use session::{DeviceSession, SessionState};
pub use settings::{AutoMode, CameraSettings, ReconfigureLevel};
pub use traits::{CameraDevice, DeviceRegistry, StreamBuffering};
