//! Camera model profiles.
//!
//! The model name string decides which node names are used for a handful of
//! features whose naming differs between camera generations.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{CameraError, Result};
use crate::nodes::{NodeAccess, NodeMap, NodeValue};
use crate::settings::{AutoMode, CameraSettings};

/// Supported camera model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraProfile {
    /// FLIR Blackfly S.
    BlackflyS,
    /// Point Grey / FLIR Chameleon3.
    Chameleon3,
    /// Any other GenICam camera.
    Generic,
}

impl CameraProfile {
    const KNOWN: [(&'static str, Self); 2] =
        [("Blackfly S", Self::BlackflyS), ("Chameleon3", Self::Chameleon3)];

    const fn frame_rate_enable_node(self) -> &'static str {
        match self {
            Self::Chameleon3 => "AcquisitionFrameRateEnabled",
            Self::BlackflyS | Self::Generic => "AcquisitionFrameRateEnable",
        }
    }

    const fn frame_rate_auto_node(self) -> Option<&'static str> {
        match self {
            Self::Chameleon3 => Some("AcquisitionFrameRateAuto"),
            Self::BlackflyS | Self::Generic => None,
        }
    }

    const fn gamma_enable_node(self) -> &'static str {
        match self {
            Self::Chameleon3 => "GammaEnabled",
            Self::BlackflyS | Self::Generic => "GammaEnable",
        }
    }

    /// Apply every set field of `settings` to the device node map.
    pub fn apply<M: NodeMap + ?Sized>(self, nodes: &mut M, settings: &CameraSettings) -> Result<()> {
        if let Some(format) = &settings.pixel_format {
            write_node(nodes, "PixelFormat", NodeValue::Enum(format.clone()))?;
        }
        if let Some(reverse) = settings.reverse_x {
            write_node(nodes, "ReverseX", NodeValue::Bool(reverse))?;
        }
        if let Some(reverse) = settings.reverse_y {
            write_node(nodes, "ReverseY", NodeValue::Bool(reverse))?;
        }

        for (name, value) in [
            ("Width", settings.width),
            ("Height", settings.height),
            ("OffsetX", settings.offset_x),
            ("OffsetY", settings.offset_y),
        ] {
            if let Some(value) = value {
                write_node(nodes, name, NodeValue::Integer(value))?;
            }
        }

        if let Some(rate) = settings.acquisition_frame_rate {
            self.set_frame_rate(nodes, rate)?;
        }

        apply_auto_pair(
            nodes,
            ("ExposureAuto", settings.exposure_auto),
            ("ExposureTime", settings.exposure_time_us),
        )?;
        apply_auto_pair(
            nodes,
            ("GainAuto", settings.gain_auto),
            ("Gain", settings.gain_db),
        )?;

        if let Some(gamma) = settings.gamma {
            write_if_present(nodes, self.gamma_enable_node(), NodeValue::Bool(true))?;
            write_node(nodes, "Gamma", NodeValue::Float(gamma))?;
        }
        if let Some(level) = settings.black_level {
            write_node(nodes, "BlackLevel", NodeValue::Float(level))?;
        }

        Ok(())
    }

    /// Switch to manual frame rate control and set the rate.
    pub fn set_frame_rate<M: NodeMap + ?Sized>(self, nodes: &mut M, rate: f64) -> Result<()> {
        if let Some(auto) = self.frame_rate_auto_node() {
            write_if_present(nodes, auto, NodeValue::Enum(AutoMode::Off.as_str().to_owned()))?;
        }
        write_node(nodes, self.frame_rate_enable_node(), NodeValue::Bool(true))?;
        write_node(nodes, "AcquisitionFrameRate", NodeValue::Float(rate))
    }

    /// Switch to manual gain and set it.
    pub fn set_gain<M: NodeMap + ?Sized>(self, nodes: &mut M, gain_db: f64) -> Result<()> {
        apply_auto_pair(nodes, ("GainAuto", None), ("Gain", Some(gain_db)))
    }
}

impl fmt::Display for CameraProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BlackflyS => "Blackfly S",
            Self::Chameleon3 => "Chameleon3",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// Pick the profile whose marker is contained in `model_name`.
///
/// Unknown models fall back to [`CameraProfile::Generic`] with a warning.
pub fn classify(model_name: &str) -> CameraProfile {
    let profile = CameraProfile::KNOWN
        .iter()
        .find(|(marker, _)| model_name.contains(marker))
        .map(|&(_, profile)| profile);

    profile.unwrap_or_else(|| {
        warn!("Could not detect camera model from name '{model_name}', using generic profile");
        CameraProfile::Generic
    })
}

/// Write a node, failing if it cannot be written in the current state.
pub(crate) fn write_node<M: NodeMap + ?Sized>(nodes: &mut M, name: &str, value: NodeValue) -> Result<()> {
    if !nodes.access(name).is_writable() {
        return Err(CameraError::NodeNotWritable {
            name: name.to_owned(),
        });
    }
    debug!("Setting {name} = {value}");
    nodes.set(name, value).map_err(|err| CameraError::node(name, err))
}

/// Write a node only if the device implements it at all.
fn write_if_present<M: NodeMap + ?Sized>(nodes: &mut M, name: &str, value: NodeValue) -> Result<()> {
    if nodes.access(name) == NodeAccess::NotImplemented {
        debug!("{name} not implemented by this device, skipping");
        return Ok(());
    }
    write_node(nodes, name, value)
}

/// Apply an auto-mode node and its manual value. A manual value implies
/// `Off` when no mode is given and is ignored while an auto mode is active.
fn apply_auto_pair<M: NodeMap + ?Sized>(
    nodes: &mut M,
    (auto_node, mode): (&str, Option<AutoMode>),
    (value_node, value): (&str, Option<f64>),
) -> Result<()> {
    let mode = match (mode, value) {
        (Some(mode), _) => Some(mode),
        (None, Some(_)) => Some(AutoMode::Off),
        (None, None) => None,
    };

    if let Some(mode) = mode {
        write_node(nodes, auto_node, NodeValue::Enum(mode.as_str().to_owned()))?;
    }
    match (mode, value) {
        (Some(AutoMode::Off), Some(value)) => write_node(nodes, value_node, NodeValue::Float(value)),
        (Some(mode), Some(_)) => {
            debug!("{auto_node} is {}, ignoring manual {value_node}", mode.as_str());
            Ok(())
        }
        _ => Ok(()),
    }
}
