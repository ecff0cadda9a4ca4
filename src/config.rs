//! Driver configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `VISION_CAM__<SECTION>__<KEY>` environment variables.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::settings::CameraSettings;

/// Connection and acquisition parameters of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial number to bind to; 0 binds to the first device found.
    pub serial: u32,
    /// Budget for discovering the device, in seconds.
    pub device_connection_timeout_secs: f64,
    /// Bound on a single frame wait, in milliseconds.
    pub frame_timeout_ms: u64,
    /// Sleep between discovery polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Frame label attached to every image.
    pub frame_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial: 0,
            device_connection_timeout_secs: 10.0,
            frame_timeout_ms: 100,
            poll_interval_ms: 1000,
            frame_id: "camera".to_owned(),
        }
    }
}

impl SessionConfig {
    /// Discovery budget.
    pub fn connection_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.device_connection_timeout_secs).unwrap_or(Duration::ZERO)
    }

    /// Frame wait bound.
    pub const fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// Discovery poll interval.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Complete configuration of the driver binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Session parameters.
    pub session: SessionConfig,
    /// Device parameters applied after connecting.
    pub camera: CameraSettings,
}

const ENV_PREFIX: &str = "VISION_CAM";

impl DriverConfig {
    /// Load configuration from an optional TOML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
