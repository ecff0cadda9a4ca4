//! Vision-cam-driver binary: connects to a camera and streams frames.
//!
//! Usage: `vision-cam-driver [config.toml]`. Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vision_cam_driver::{
    DeviceSession, DriverConfig, Image, ReconfigureLevel, SessionState, V4l2Registry,
};

const FRAME_REPORT_INTERVAL: u64 = 100;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vision_cam_driver=info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = DriverConfig::load(path.as_deref())?;

    let session = DeviceSession::new(V4l2Registry::new(), &config.session);
    connect(&session)?;

    if !config.camera.is_empty() {
        session.set_new_configuration(&config.camera, ReconfigureLevel::STOP)?;
    }
    session.start()?;
    info!(
        "Streaming from camera {} ({:?})",
        session.serial(),
        session.profile()
    );

    let acquirer = session.acquirer();
    let mut image = Image::default();
    let mut frames: u64 = 0;
    loop {
        match acquirer.grab_frame(&mut image, &config.session.frame_id) {
            Ok(true) => {
                frames += 1;
                if frames % FRAME_REPORT_INTERVAL == 0 {
                    info!(
                        "Frame {frames}: {}x{} {:?} at {}.{:09}",
                        image.width,
                        image.height,
                        image.encoding,
                        image.header.stamp.sec,
                        image.header.stamp.nanosec
                    );
                }
            }
            Ok(false) => {}
            Err(err) if err.is_recoverable() => warn!("{err}"),
            Err(err) => {
                if session.state() != SessionState::Disconnected {
                    if let Err(disconnect) = session.disconnect() {
                        warn!("{disconnect}");
                    }
                }
                return Err(err.into());
            }
        }
    }
}

/// Connect, retrying while the failure is one a retry can fix.
fn connect(session: &DeviceSession<V4l2Registry>) -> vision_cam_driver::Result<()> {
    loop {
        match session.connect() {
            Ok(()) => return Ok(()),
            Err(err) if err.is_recoverable() => warn!("{err}, retrying"),
            Err(err) => return Err(err),
        }
    }
}
