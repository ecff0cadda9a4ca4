//! Frame validation utilities.
//!
//! Geometry checks run on every accepted frame before its bytes are copied;
//! the sequence check is used to verify acquisition loops.

use crate::error::{CameraError, Result};
use crate::image::Image;
use crate::traits::RawImage;

/// Validates that a frame's buffer can hold the layout it claims.
///
/// # Errors
///
/// Returns `InvalidFrame` if:
/// - Width, height or bit depth is zero
/// - The stride is shorter than one row of pixels
/// - The buffer is shorter than `stride * height`
pub fn validate_geometry(raw: &RawImage<'_>) -> Result<()> {
    if raw.width == 0 || raw.height == 0 || raw.bits_per_pixel == 0 {
        return Err(CameraError::InvalidFrame(format!(
            "empty layout {}x{} at {} bits per pixel",
            raw.width, raw.height, raw.bits_per_pixel
        )));
    }

    let row_bytes = (u64::from(raw.width) * u64::from(raw.bits_per_pixel)).div_ceil(8);
    if u64::from(raw.stride) < row_bytes {
        return Err(CameraError::InvalidFrame(format!(
            "stride {} is shorter than a row of {row_bytes} bytes",
            raw.stride
        )));
    }

    let required = u64::from(raw.stride) * u64::from(raw.height);
    let available = raw.data.len() as u64;
    if available < required {
        return Err(CameraError::InvalidFrame(format!(
            "buffer holds {available} bytes, layout needs {required}"
        )));
    }

    Ok(())
}

/// Validates that a sequence of images has strictly increasing timestamps.
///
/// # Errors
///
/// Returns `InvalidFrame` if:
/// - The images slice is empty
/// - Any stamp is not later than the previous one
pub fn validate_stamp_sequence(images: &[Image]) -> Result<()> {
    if images.is_empty() {
        return Err(CameraError::InvalidFrame(
            "Cannot validate empty image sequence".to_owned(),
        ));
    }

    for (i, pair) in images.windows(2).enumerate() {
        if let [prev, curr] = pair {
            if curr.header.stamp <= prev.header.stamp {
                return Err(CameraError::InvalidFrame(format!(
                    "Stamp not increasing at index {}: {:?} after {:?}",
                    i + 1,
                    curr.header.stamp,
                    prev.header.stamp
                )));
            }
        }
    }

    Ok(())
}
