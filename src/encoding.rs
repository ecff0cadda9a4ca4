//! Pixel encoding resolution from sensor metadata.
//!
//! The encoding is derived per frame from the `PixelColorFilter` node and the
//! bit depth reported with the frame. Combinations without a defined encoding
//! are rejected instead of being passed through with a guessed tag.

use std::fmt;

use crate::error::{CameraError, Result};

/// Name of the color filter node in the device node map.
pub const COLOR_FILTER_NODE: &str = "PixelColorFilter";

/// Color filter value reported by monochrome (or binned / processed) output.
pub const NO_COLOR_FILTER: &str = "None";

/// Phase of a 2x2 Bayer color filter array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BayerPhase {
    /// R G / G B
    Rg,
    /// G R / B G
    Gr,
    /// G B / R G
    Gb,
    /// B G / G R
    Bg,
}

impl BayerPhase {
    /// All four phases.
    pub const ALL: [Self; 4] = [Self::Rg, Self::Gr, Self::Gb, Self::Bg];

    /// Parse the GenICam `PixelColorFilter` entry name.
    pub fn from_filter(filter: &str) -> Option<Self> {
        match filter {
            "BayerRG" => Some(Self::Rg),
            "BayerGR" => Some(Self::Gr),
            "BayerGB" => Some(Self::Gb),
            "BayerBG" => Some(Self::Bg),
            _ => None,
        }
    }

    /// GenICam `PixelColorFilter` entry name.
    pub const fn filter_name(self) -> &'static str {
        match self {
            Self::Rg => "BayerRG",
            Self::Gr => "BayerGR",
            Self::Gb => "BayerGB",
            Self::Bg => "BayerBG",
        }
    }
}

/// Symbolic pixel layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageEncoding {
    /// 8-bit monochrome.
    Mono8,
    /// 16-bit monochrome.
    Mono16,
    /// 8-bit per channel RGB.
    Rgb8,
    /// 8-bit Bayer, RGGB phase.
    BayerRggb8,
    /// 8-bit Bayer, GRBG phase.
    BayerGrbg8,
    /// 8-bit Bayer, GBRG phase.
    BayerGbrg8,
    /// 8-bit Bayer, BGGR phase.
    BayerBggr8,
    /// 16-bit Bayer, RGGB phase.
    BayerRggb16,
    /// 16-bit Bayer, GRBG phase.
    BayerGrbg16,
    /// 16-bit Bayer, GBRG phase.
    BayerGbrg16,
    /// 16-bit Bayer, BGGR phase.
    BayerBggr16,
}

impl ImageEncoding {
    /// Conventional encoding name used by image transports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mono8 => "mono8",
            Self::Mono16 => "mono16",
            Self::Rgb8 => "rgb8",
            Self::BayerRggb8 => "bayer_rggb8",
            Self::BayerGrbg8 => "bayer_grbg8",
            Self::BayerGbrg8 => "bayer_gbrg8",
            Self::BayerBggr8 => "bayer_bggr8",
            Self::BayerRggb16 => "bayer_rggb16",
            Self::BayerGrbg16 => "bayer_grbg16",
            Self::BayerGbrg16 => "bayer_gbrg16",
            Self::BayerBggr16 => "bayer_bggr16",
        }
    }

    /// Bits per pixel across all channels.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Mono8
            | Self::BayerRggb8
            | Self::BayerGrbg8
            | Self::BayerGbrg8
            | Self::BayerBggr8 => 8,
            Self::Mono16
            | Self::BayerRggb16
            | Self::BayerGrbg16
            | Self::BayerGbrg16
            | Self::BayerBggr16 => 16,
            Self::Rgb8 => 24,
        }
    }

    /// Whether the payload is raw Bayer mosaic data.
    pub const fn is_bayer(self) -> bool {
        !matches!(self, Self::Mono8 | Self::Mono16 | Self::Rgb8)
    }

    const fn bayer(phase: BayerPhase, sixteen_bit: bool) -> Self {
        match (phase, sixteen_bit) {
            (BayerPhase::Rg, false) => Self::BayerRggb8,
            (BayerPhase::Gr, false) => Self::BayerGrbg8,
            (BayerPhase::Gb, false) => Self::BayerGbrg8,
            (BayerPhase::Bg, false) => Self::BayerBggr8,
            (BayerPhase::Rg, true) => Self::BayerRggb16,
            (BayerPhase::Gr, true) => Self::BayerGrbg16,
            (BayerPhase::Gb, true) => Self::BayerGbrg16,
            (BayerPhase::Bg, true) => Self::BayerBggr16,
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the encoding for a frame.
///
/// With no color filter the bit depth alone decides: 16 is mono16, 24 is
/// rgb8 and anything else is mono8. With a Bayer filter only 8 and 16 bits
/// are defined.
pub fn resolve_encoding(color_filter: &str, bits_per_pixel: u32) -> Result<ImageEncoding> {
    if color_filter == NO_COLOR_FILTER {
        return Ok(match bits_per_pixel {
            16 => ImageEncoding::Mono16,
            24 => ImageEncoding::Rgb8,
            _ => ImageEncoding::Mono8,
        });
    }

    let unsupported = || CameraError::UnsupportedFormat {
        color_filter: color_filter.to_owned(),
        bits_per_pixel,
    };

    let phase = BayerPhase::from_filter(color_filter).ok_or_else(unsupported)?;
    match bits_per_pixel {
        8 => Ok(ImageEncoding::bayer(phase, false)),
        16 => Ok(ImageEncoding::bayer(phase, true)),
        _ => Err(unsupported()),
    }
}
