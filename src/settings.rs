//! Device parameter sets applied through reconfiguration.

use serde::{Deserialize, Serialize};

/// Reconfiguration level attached to a parameter change.
///
/// Levels at or above [`ReconfigureLevel::STOP`] can only be applied after
/// the device has streamed at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconfigureLevel(pub u32);

impl ReconfigureLevel {
    /// Parameter can be changed while streaming.
    pub const RUNNING: Self = Self(0);
    /// Parameter requires a stream restart.
    pub const STOP: Self = Self(1);
    /// Parameter requires the device to be reopened.
    pub const CLOSE: Self = Self(3);

    /// Whether applying at this level requires a stream restart.
    pub const fn requires_restart(self) -> bool {
        self.0 >= Self::STOP.0
    }
}

/// GenICam auto-function mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoMode {
    /// Manual control.
    Off,
    /// Converge once, then hold.
    Once,
    /// Track continuously.
    Continuous,
}

impl AutoMode {
    /// Enumeration entry name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Once => "Once",
            Self::Continuous => "Continuous",
        }
    }
}

/// Parameter set for a camera. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Target acquisition frame rate in Hz.
    pub acquisition_frame_rate: Option<f64>,
    /// Exposure auto mode.
    pub exposure_auto: Option<AutoMode>,
    /// Exposure time in microseconds; implies manual exposure.
    pub exposure_time_us: Option<f64>,
    /// Gain auto mode.
    pub gain_auto: Option<AutoMode>,
    /// Gain in dB; implies manual gain.
    pub gain_db: Option<f64>,
    /// Gamma correction.
    pub gamma: Option<f64>,
    /// Black level offset.
    pub black_level: Option<f64>,
    /// ROI width in pixels.
    pub width: Option<i64>,
    /// ROI height in pixels.
    pub height: Option<i64>,
    /// ROI horizontal offset.
    pub offset_x: Option<i64>,
    /// ROI vertical offset.
    pub offset_y: Option<i64>,
    /// GenICam pixel format entry, e.g. `BayerRG8` or `Mono16`.
    pub pixel_format: Option<String>,
    /// Mirror horizontally.
    pub reverse_x: Option<bool>,
    /// Mirror vertically.
    pub reverse_y: Option<bool>,
}

impl CameraSettings {
    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
