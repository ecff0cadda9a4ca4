//! Frame acquisition.

use tracing::{error, trace};

use crate::encoding::{resolve_encoding, COLOR_FILTER_NODE};
use crate::error::{CameraError, Result};
use crate::image::{Image, Stamp};
use crate::nodes::NodeMap;
use crate::session::DeviceSession;
use crate::traits::{CameraDevice, DeviceRegistry};
use crate::validation::validate_geometry;

/// Pulls frames from a streaming [`DeviceSession`].
///
/// Acquisition holds the session lock for the duration of the frame wait, so
/// it never overlaps reconfiguration or start/stop.
pub struct FrameAcquirer<'s, R: DeviceRegistry> {
    session: &'s DeviceSession<R>,
}

impl<'s, R: DeviceRegistry> FrameAcquirer<'s, R> {
    /// Acquirer for `session`.
    pub const fn new(session: &'s DeviceSession<R>) -> Self {
        Self { session }
    }

    /// Wait for the next frame and copy it into `image`.
    ///
    /// Returns `Ok(false)` for an incomplete frame; `image` is left untouched
    /// in that case.
    pub fn grab_frame(&self, image: &mut Image, frame_id: &str) -> Result<bool> {
        let mut inner = self.session.lock();
        let timeout = inner.frame_timeout;
        let serial = inner.serial;

        let conn = match inner.connection.as_mut() {
            None => return Err(CameraError::NotConnected),
            Some(conn) if !conn.streaming => return Err(CameraError::NotRunning),
            Some(conn) => conn,
        };

        // The frame borrows the device, so the filter is read first and its
        // fault only surfaces for a complete frame.
        let color_filter = conn
            .device
            .nodes()
            .get(COLOR_FILTER_NODE)
            .map(|value| value.to_string())
            .map_err(|err| CameraError::node(COLOR_FILTER_NODE, err));

        let raw = match conn.device.next_image(timeout) {
            Ok(raw) => raw,
            Err(err) => {
                error!("Failed to retrieve buffer: {err}");
                return Err(CameraError::RetrieveBuffer(err));
            }
        };

        if raw.incomplete {
            error!(
                "Image received from camera {serial} is incomplete. Status: {}",
                raw.status
            );
            return Ok(false);
        }

        let encoding = resolve_encoding(&color_filter?, raw.bits_per_pixel)?;
        validate_geometry(&raw)?;
        trace!(
            "Frame {}x{} stride {} as {encoding}",
            raw.width,
            raw.height,
            raw.stride
        );

        image.fill(encoding, raw.width, raw.height, raw.stride, raw.data);
        image.header.stamp = Stamp::from_nanos(raw.timestamp_ns);
        image.header.frame_id.clear();
        image.header.frame_id.push_str(frame_id);
        Ok(true)
    }
}

impl<R: DeviceRegistry> DeviceSession<R> {
    /// Acquirer bound to this session.
    pub const fn acquirer(&self) -> FrameAcquirer<'_, R> {
        FrameAcquirer::new(self)
    }

    /// Shorthand for `self.acquirer().grab_frame(image, frame_id)`.
    pub fn grab_frame(&self, image: &mut Image, frame_id: &str) -> Result<bool> {
        self.acquirer().grab_frame(image, frame_id)
    }
}
