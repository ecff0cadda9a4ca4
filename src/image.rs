//! Standardized image output.

use crate::encoding::ImageEncoding;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Capture time split into seconds and nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stamp {
    /// Whole seconds.
    pub sec: u64,
    /// Nanoseconds within the second.
    pub nanosec: u32,
}

impl Stamp {
    /// Split a nanosecond counter. Both fields come from the same reading.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self {
            sec: nanos / NANOS_PER_SEC,
            nanosec: (nanos % NANOS_PER_SEC) as u32,
        }
    }
}

/// Per-image header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Capture time.
    pub stamp: Stamp,
    /// Caller-supplied coordinate frame label.
    pub frame_id: String,
}

/// A raw image with its interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    /// Header.
    pub header: Header,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub step: u32,
    /// Pixel layout, `None` until the image has been filled once.
    pub encoding: Option<ImageEncoding>,
    /// Row-major pixel data, `step * height` bytes.
    pub data: Vec<u8>,
}

impl Image {
    /// Overwrite this image with a copy of `data`, reusing the allocation.
    ///
    /// Only the first `step * height` bytes of `data` are copied.
    pub fn fill(&mut self, encoding: ImageEncoding, width: u32, height: u32, step: u32, data: &[u8]) {
        let len = (step as usize * height as usize).min(data.len());
        self.encoding = Some(encoding);
        self.width = width;
        self.height = height;
        self.step = step;
        self.data.clear();
        self.data.extend_from_slice(data.get(..len).unwrap_or(data));
    }
}
