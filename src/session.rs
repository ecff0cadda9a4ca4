//! Connection lifecycle of a single camera.
//!
//! A [`DeviceSession`] owns a [`DeviceRegistry`] and at most one open device.
//! Operations that touch the device run under one session-wide lock. Discovery
//! takes that lock once per poll and sleeps without it, so a pending connect
//! never stalls acquisition or accessors.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{CameraError, Result, SdkError, SdkErrorKind};
use crate::nodes::{read_if_readable, NodeMap, NodeValue};
use crate::profile::{classify, write_node, CameraProfile};
use crate::settings::{CameraSettings, ReconfigureLevel};
use crate::traits::{CameraDevice, DeviceRegistry, StreamBuffering};

const SERIAL_NODE: &str = "DeviceSerialNumber";
const DEVICE_TYPE_NODE: &str = "DeviceType";
const LINK_SPEED_NODE: &str = "DeviceCurrentSpeed";
const MODEL_NAME_NODE: &str = "DeviceModelName";
const FORCE_IP_NODE: &str = "GevDeviceAutoForceIP";
const SUPER_SPEED: &str = "SuperSpeed";

const CHUNK_MODE_NODE: &str = "ChunkModeActive";
const CHUNK_SELECTOR_NODE: &str = "ChunkSelector";
const CHUNK_ENABLE_NODE: &str = "ChunkEnable";

const NOT_FOUND_LOG_PERIOD: Duration = Duration::from_secs(10);

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device handle held.
    Disconnected,
    /// Discovery is polling for the device.
    Connecting,
    /// Device initialized, not streaming.
    Idle,
    /// Device streaming; frames can be grabbed.
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Idle => "idle",
            Self::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Outcome of looking for the target device.
#[derive(Debug)]
pub(crate) enum Discovery<D> {
    /// The device is attached and its handle is valid.
    Found(D),
    /// Nothing matching is attached yet.
    NotYetVisible,
    /// The connection budget ran out.
    TimedOut,
}

/// Transport family read from the `DeviceType` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportKind {
    /// USB3 Vision.
    Usb3Vision,
    /// GigE Vision.
    GigEVision,
    /// Anything else, with the reported name.
    Other(String),
}

impl TransportKind {
    fn from_node(value: &NodeValue) -> Self {
        match value.as_str() {
            Some("U3V" | "USB3Vision") => Self::Usb3Vision,
            Some("GEV" | "GigEVision") => Self::GigEVision,
            Some(other) => Self::Other(other.to_owned()),
            None => Self::Other(value.to_string()),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb3Vision => f.write_str("USB3 Vision"),
            Self::GigEVision => f.write_str("GigE Vision"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Result of enabling one chunk data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// The entry is (now) enabled.
    Enabled,
    /// The entry exists but cannot be enabled.
    NotWritable,
    /// The entry is not available in the current device state.
    NotAvailable,
}

/// Chunk data entry reported by [`DeviceSession::enable_chunk_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Chunk selector entry name.
    pub name: String,
    /// Outcome.
    pub state: ChunkState,
}

/// Log limiter for repeated messages.
#[derive(Debug)]
struct Throttle {
    period: Duration,
    last: Option<Instant>,
}

impl Throttle {
    const fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection<D> {
    pub(crate) device: D,
    pub(crate) profile: CameraProfile,
    pub(crate) streaming: bool,
}

pub(crate) struct Inner<R: DeviceRegistry> {
    registry: R,
    pub(crate) connection: Option<Connection<R::Device>>,
    pub(crate) serial: u32,
    connection_timeout: Duration,
    pub(crate) frame_timeout: Duration,
    poll_interval: Duration,
    connecting: bool,
    not_found_log: Throttle,
}

/// A camera session bound to one physical device.
pub struct DeviceSession<R: DeviceRegistry> {
    inner: Mutex<Inner<R>>,
    // Serializes connect attempts.
    connect_gate: Mutex<()>,
}

impl<R: DeviceRegistry> DeviceSession<R> {
    /// Create a disconnected session on top of `registry`.
    pub fn new(registry: R, config: &SessionConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry,
                connection: None,
                serial: config.serial,
                connection_timeout: config.connection_timeout(),
                frame_timeout: config.frame_timeout(),
                poll_interval: config.poll_interval(),
                connecting: false,
                not_found_log: Throttle::new(NOT_FOUND_LOG_PERIOD),
            }),
            connect_gate: Mutex::new(()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind to a serial number; 0 binds to the first device found.
    pub fn set_desired_camera(&self, serial: u32) {
        self.lock().serial = serial;
    }

    /// Set the frame wait bound in seconds, rounded to milliseconds.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_timeout(&self, seconds: f64) {
        let millis = (seconds * 1000.0).round().max(0.0) as u64;
        self.set_frame_timeout(Duration::from_millis(millis));
    }

    /// Set the frame wait bound.
    pub fn set_frame_timeout(&self, timeout: Duration) {
        self.lock().frame_timeout = timeout;
    }

    /// Set the discovery budget of [`DeviceSession::connect`].
    pub fn set_connection_timeout(&self, timeout: Duration) {
        self.lock().connection_timeout = timeout;
    }

    /// Serial the session is bound to, 0 if none has been pinned yet.
    pub fn serial(&self) -> u32 {
        self.lock().serial
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        let inner = self.lock();
        match &inner.connection {
            None if inner.connecting => SessionState::Connecting,
            None => SessionState::Disconnected,
            Some(conn) if conn.streaming => SessionState::Streaming,
            Some(_) => SessionState::Idle,
        }
    }

    /// Profile of the connected camera.
    pub fn profile(&self) -> Option<CameraProfile> {
        self.lock().connection.as_ref().map(|conn| conn.profile)
    }

    /// Connect to the target device, polling until it appears.
    ///
    /// Succeeds immediately when already connected. The session lock is
    /// released between polls.
    pub fn connect(&self) -> Result<()> {
        let _gate = self.connect_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let (budget, poll_interval) = {
            let mut inner = self.lock();
            if inner.connection.is_some() {
                return Ok(());
            }
            inner.connecting = true;
            (inner.connection_timeout, inner.poll_interval)
        };

        let result = match self.discover(budget, poll_interval) {
            Discovery::Found(device) => self.lock().attach(device),
            Discovery::NotYetVisible | Discovery::TimedOut => Err(CameraError::ConnectionTimeout(budget)),
        };
        self.lock().connecting = false;
        result
    }

    /// Poll the registry until the device shows up or the budget runs out.
    fn discover(&self, budget: Duration, poll_interval: Duration) -> Discovery<R::Device> {
        let started = Instant::now();
        loop {
            let found = self.lock().lookup();
            if matches!(found, Discovery::Found(_)) {
                return found;
            }
            thread::sleep(poll_interval);
            if started.elapsed() > budget {
                error!("Cannot connect to the device within {budget:?}");
                return Discovery::TimedOut;
            }
        }
    }

    /// Release the device and refresh the enumeration.
    pub fn disconnect(&self) -> Result<()> {
        self.lock().disconnect()
    }

    /// Begin streaming. No-op while already streaming.
    pub fn start(&self) -> Result<()> {
        self.lock().start()
    }

    /// End streaming. No-op unless streaming.
    pub fn stop(&self) -> Result<()> {
        self.lock().stop()
    }

    /// Apply a parameter set, connecting first if needed.
    ///
    /// Levels that require a restart first run the device through a
    /// start/stop cycle, then apply, then resume streaming if the session was
    /// streaming before.
    pub fn set_new_configuration(&self, settings: &CameraSettings, level: ReconfigureLevel) -> Result<()> {
        self.connect()?;
        let mut inner = self.lock();

        if !level.requires_restart() {
            return inner.apply(settings);
        }

        debug!("Reconfigure stop");
        let was_streaming = inner.is_streaming();
        inner
            .start()
            .and_then(|()| inner.stop())
            .map_err(|err| CameraError::Restart(Box::new(err)))?;

        let applied = inner.apply(settings);

        if was_streaming {
            if let Err(err) = inner.start() {
                if applied.is_ok() {
                    return Err(err);
                }
                warn!("Failed to resume streaming after a rejected configuration: {err}");
            }
        }
        applied
    }

    /// Switch to manual gain and set it.
    pub fn set_gain(&self, gain_db: f64) -> Result<()> {
        let mut inner = self.lock();
        let conn = inner.connection.as_mut().ok_or(CameraError::NotConnected)?;
        conn.profile.set_gain(conn.device.nodes_mut(), gain_db)
    }

    /// Maximum sensor width, 0 when disconnected.
    pub fn width_max(&self) -> Result<i64> {
        self.read_integer("WidthMax")
    }

    /// Maximum sensor height, 0 when disconnected.
    pub fn height_max(&self) -> Result<i64> {
        self.read_integer("HeightMax")
    }

    /// Read any device node by name.
    ///
    /// Returns `None` when disconnected or when the node is not readable.
    pub fn read_property(&self, name: &str) -> Result<Option<NodeValue>> {
        let inner = self.lock();
        let Some(conn) = inner.connection.as_ref() else {
            return Ok(None);
        };
        read_if_readable(conn.device.nodes(), name).map_err(|err| CameraError::node(name, err))
    }

    fn read_integer(&self, name: &str) -> Result<i64> {
        let inner = self.lock();
        let Some(conn) = inner.connection.as_ref() else {
            return Ok(0);
        };
        let value = conn
            .device
            .nodes()
            .get(name)
            .map_err(|err| CameraError::node(name, err))?;
        value.as_integer().ok_or_else(|| {
            CameraError::node(
                name,
                SdkError::new(SdkErrorKind::InvalidParameter, format!("'{value}' is not an integer")),
            )
        })
    }

    /// Turn on chunk mode and enable every available chunk entry.
    pub fn enable_chunk_data(&self) -> Result<Vec<ChunkEntry>> {
        let mut inner = self.lock();
        let conn = inner.connection.as_mut().ok_or(CameraError::NotConnected)?;
        let nodes = conn.device.nodes_mut();

        info!("Configuring chunk data");
        write_node(nodes, CHUNK_MODE_NODE, NodeValue::Bool(true))?;

        if !nodes.access(CHUNK_SELECTOR_NODE).is_readable() {
            return Err(CameraError::NodeNotReadable {
                name: CHUNK_SELECTOR_NODE.to_owned(),
            });
        }
        let entries = nodes
            .entries(CHUNK_SELECTOR_NODE)
            .map_err(|err| CameraError::node(CHUNK_SELECTOR_NODE, err))?;

        let mut report = Vec::with_capacity(entries.len());
        for name in entries {
            write_node(nodes, CHUNK_SELECTOR_NODE, NodeValue::Enum(name.clone()))?;
            let state = enable_chunk(nodes)?;
            info!("{name} chunk: {state:?}");
            report.push(ChunkEntry { name, state });
        }
        Ok(report)
    }
}

fn enable_chunk<M: NodeMap + ?Sized>(nodes: &mut M) -> Result<ChunkState> {
    let access = nodes.access(CHUNK_ENABLE_NODE);
    if !access.is_available() {
        return Ok(ChunkState::NotAvailable);
    }
    let enabled = read_if_readable(nodes, CHUNK_ENABLE_NODE)
        .map_err(|err| CameraError::node(CHUNK_ENABLE_NODE, err))?
        .and_then(|value| value.as_bool())
        .unwrap_or(false);
    if enabled {
        return Ok(ChunkState::Enabled);
    }
    if !access.is_writable() {
        return Ok(ChunkState::NotWritable);
    }
    write_node(nodes, CHUNK_ENABLE_NODE, NodeValue::Bool(true))?;
    Ok(ChunkState::Enabled)
}

impl<R: DeviceRegistry> Inner<R> {
    fn is_streaming(&self) -> bool {
        self.connection.as_ref().is_some_and(|conn| conn.streaming)
    }

    /// Probe and initialize a discovered device, making it the connection.
    fn attach(&mut self, mut device: R::Device) -> Result<()> {
        let kind = self.probe(&device)?;
        let profile = self.initialize(&mut device, kind.as_ref())?;

        self.connection = Some(Connection {
            device,
            profile,
            streaming: false,
        });
        Ok(())
    }

    fn lookup(&mut self) -> Discovery<R::Device> {
        let found = self.registry.refresh().and_then(|()| {
            if self.serial == 0 {
                self.registry.by_index(0)
            } else {
                self.registry.by_serial(&self.serial.to_string())
            }
        });

        match found {
            Ok(Some(device)) if device.is_valid() => return Discovery::Found(device),
            Ok(_) => {
                if self.not_found_log.ready() {
                    if self.serial == 0 {
                        info!("No camera found, is one plugged in?");
                    } else {
                        info!("Could not find camera with serial {}, is it plugged in?", self.serial);
                    }
                }
            }
            Err(err) => {
                if self.not_found_log.ready() {
                    info!("Could not enumerate cameras: {err}");
                }
            }
        }
        Discovery::NotYetVisible
    }

    /// Read transport information, pinning the serial if unset.
    fn probe(&mut self, device: &R::Device) -> Result<Option<TransportKind>> {
        let transport = device.transport_nodes();

        if self.serial == 0 {
            let serial = read_if_readable(transport, SERIAL_NODE)
                .map_err(CameraError::DeviceInfo)?
                .as_ref()
                .and_then(NodeValue::as_str)
                .and_then(|text| text.trim().parse::<u32>().ok())
                .filter(|&serial| serial != 0)
                .ok_or(CameraError::SerialUnavailable)?;
            debug!("Using serial {serial}");
            self.serial = serial;
        }

        let kind = read_if_readable(transport, DEVICE_TYPE_NODE)
            .map_err(CameraError::DeviceInfo)?
            .map(|value| TransportKind::from_node(&value));

        if kind == Some(TransportKind::Usb3Vision) {
            let speed = read_if_readable(transport, LINK_SPEED_NODE).map_err(CameraError::DeviceInfo)?;
            match speed {
                Some(speed) if speed.as_str() == Some(SUPER_SPEED) => {}
                Some(speed) => warn!(
                    "USB3 camera {} is running at {speed}, not {SUPER_SPEED}. Check the cable and port.",
                    self.serial
                ),
                None => warn!("Unable to read the link speed of camera {}", self.serial),
            }
        }

        Ok(kind)
    }

    fn initialize(&mut self, device: &mut R::Device, kind: Option<&TransportKind>) -> Result<CameraProfile> {
        if let Err(err) = device
            .configure_stream(StreamBuffering::REAL_TIME)
            .and_then(|()| device.init())
        {
            if err.kind == SdkErrorKind::InvalidAddress && kind == Some(&TransportKind::GigEVision) {
                warn!("Camera {} is on a wrong subnet, running auto force IP", self.serial);
                auto_force_ip(device, self.serial);
                return Err(CameraError::WrongSubnet {
                    serial: self.serial,
                    source: err,
                });
            }
            error!("Failed to initialize camera {}: {err}", self.serial);
            return Err(CameraError::Initialize(err));
        }

        let model = match device.nodes().get(MODEL_NAME_NODE) {
            Ok(model) => model.to_string(),
            Err(err) => {
                if let Err(deinit) = device.deinit() {
                    warn!("Failed to release camera {}: {deinit}", self.serial);
                }
                return Err(CameraError::Initialize(err));
            }
        };

        let kind = kind.map_or_else(|| "unknown".to_owned(), ToString::to_string);
        info!(
            "Detected device type: {kind}. Camera model name: '{model}' with serial '{}'",
            self.serial
        );
        Ok(classify(&model))
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(mut conn) = self.connection.take() {
            if conn.streaming {
                if let Err(err) = conn.device.end_acquisition() {
                    first_error.get_or_insert(err);
                }
            }
            if let Err(err) = conn.device.deinit() {
                first_error.get_or_insert(err);
            }
            drop(conn);
            if let Err(err) = self.registry.remove_by_serial(&self.serial.to_string()) {
                first_error.get_or_insert(err);
            }
            info!("Disconnected camera {}", self.serial);
        }

        if let Err(err) = self.registry.refresh() {
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => {
                error!("Failed to disconnect camera {}: {err}", self.serial);
                Err(CameraError::Disconnect(err))
            }
            None => Ok(()),
        }
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        let conn = self.connection.as_mut().ok_or(CameraError::NotConnected)?;
        if !conn.streaming {
            conn.device.begin_acquisition().map_err(CameraError::Start)?;
            conn.streaming = true;
            debug!("Acquisition started");
        }
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.as_mut() {
            if conn.streaming {
                conn.streaming = false;
                conn.device.end_acquisition().map_err(CameraError::Stop)?;
                debug!("Acquisition stopped");
            }
        }
        Ok(())
    }

    fn apply(&mut self, settings: &CameraSettings) -> Result<()> {
        let conn = self.connection.as_mut().ok_or(CameraError::NotConnected)?;
        conn.profile.apply(conn.device.nodes_mut(), settings)
    }
}

/// Ask a GigE device to pick an address on the host's subnet.
fn auto_force_ip<D: CameraDevice>(device: &mut D, serial: u32) {
    let nodes = device.transport_nodes_mut();
    if !nodes.access(FORCE_IP_NODE).is_writable() {
        warn!("{FORCE_IP_NODE} is not available for camera {serial}");
        return;
    }
    match nodes.execute(FORCE_IP_NODE) {
        Ok(()) => info!("{FORCE_IP_NODE} executed for camera {serial}, retry the connection"),
        Err(err) => warn!("{FORCE_IP_NODE} failed for camera {serial}: {err}"),
    }
}
