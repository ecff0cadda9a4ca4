//! Mock SDK backend for testing without hardware.
//!
//! Cameras share their state with the test through `Arc`s, so a test can keep
//! a clone of a [`MockCamera`] and inspect call counts after handing another
//! clone to the registry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{SdkError, SdkErrorKind};
use crate::nodes::{NodeAccess, NodeMap, NodeTable, NodeValue};
use crate::traits::{CameraDevice, DeviceRegistry, ImageStatus, RawImage, StreamBuffering};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct NodeState {
    table: NodeTable,
    faults: HashMap<String, SdkError>,
}

/// Shared node map with fault injection.
#[derive(Debug, Clone, Default)]
pub struct MockNodes {
    state: Arc<Mutex<NodeState>>,
}

impl MockNodes {
    /// Wrap a node table.
    #[must_use]
    pub fn new(table: NodeTable) -> Self {
        Self {
            state: Arc::new(Mutex::new(NodeState {
                table,
                faults: HashMap::new(),
            })),
        }
    }

    /// Run `f` against the underlying table.
    pub fn with_table<T, F: FnOnce(&mut NodeTable) -> T>(&self, f: F) -> T {
        f(&mut lock(&self.state).table)
    }

    /// Make every access to `name` fail with `err`.
    pub fn fail(&self, name: &str, err: SdkError) {
        lock(&self.state).faults.insert(name.to_owned(), err);
    }

    fn fault(&self, name: &str) -> Result<(), SdkError> {
        lock(&self.state)
            .faults
            .get(name)
            .map_or(Ok(()), |err| Err(err.clone()))
    }
}

impl NodeMap for MockNodes {
    fn access(&self, name: &str) -> NodeAccess {
        lock(&self.state).table.access(name)
    }

    fn get(&self, name: &str) -> Result<NodeValue, SdkError> {
        self.fault(name)?;
        lock(&self.state).table.get(name)
    }

    fn set(&mut self, name: &str, value: NodeValue) -> Result<(), SdkError> {
        self.fault(name)?;
        lock(&self.state).table.set(name, value)
    }

    fn execute(&mut self, name: &str) -> Result<(), SdkError> {
        self.fault(name)?;
        lock(&self.state).table.execute(name)
    }

    fn entries(&self, name: &str) -> Result<Vec<String>, SdkError> {
        self.fault(name)?;
        lock(&self.state).table.entries(name)
    }
}

/// Outcome of a single `next_image` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shot {
    /// A complete frame.
    Complete,
    /// A frame flagged incomplete with the given status.
    Incomplete(ImageStatus),
    /// No frame within the timeout.
    Timeout,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Horizontal byte ramp from 0 to 255 across each row.
    Gradient,
    /// Every byte set to the given value.
    Solid(u8),
}

/// Call counters and flags of a mock camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    /// `init` calls.
    pub init_calls: u32,
    /// `deinit` calls.
    pub deinit_calls: u32,
    /// `begin_acquisition` calls.
    pub begin_calls: u32,
    /// `end_acquisition` calls.
    pub end_calls: u32,
    /// Last stream buffering applied.
    pub buffering: Option<StreamBuffering>,
    /// Currently initialized.
    pub initialized: bool,
    /// Currently streaming.
    pub streaming: bool,
    /// Lifecycle calls made while a frame wait was in flight.
    pub overlaps: u32,
}

#[derive(Debug)]
struct CameraState {
    stats: MockStats,
    valid: bool,
    init_fault: Option<SdkError>,
    begin_fault: Option<SdkError>,
    deinit_fault: Option<SdkError>,
    shots: VecDeque<Shot>,
    width: u32,
    height: u32,
    bits_per_pixel: u32,
    pattern: TestPattern,
    frame_count: u64,
    frame_delay: Duration,
    in_flight: bool,
}

impl CameraState {
    fn note_lifecycle_call(&mut self) {
        if self.in_flight {
            self.stats.overlaps += 1;
        }
    }
}

/// Mock camera handle.
#[derive(Debug, Clone)]
pub struct MockCamera {
    serial: Option<String>,
    state: Arc<Mutex<CameraState>>,
    transport: MockNodes,
    nodes: MockNodes,
    buffer: Vec<u8>,
}

const AUTO_ENTRIES: [&str; 3] = ["Off", "Once", "Continuous"];
const FILTER_ENTRIES: [&str; 5] = ["None", "BayerRG", "BayerGR", "BayerGB", "BayerBG"];

impl MockCamera {
    /// A 640x480 8-bit monochrome USB3 Vision camera running at SuperSpeed.
    #[must_use]
    pub fn new(serial: &str, model: &str) -> Self {
        let mut transport = NodeTable::new()
            .with(
                "DeviceSerialNumber",
                NodeValue::String(serial.to_owned()),
                NodeAccess::ReadOnly,
            )
            .with_enum("DeviceType", "U3V", &["U3V", "GigEVision"])
            .with_enum(
                "DeviceCurrentSpeed",
                "SuperSpeed",
                &["LowSpeed", "FullSpeed", "HighSpeed", "SuperSpeed"],
            );
        transport.set_access("DeviceType", NodeAccess::ReadOnly);
        transport.set_access("DeviceCurrentSpeed", NodeAccess::ReadOnly);

        let mut nodes = NodeTable::new()
            .with(
                "DeviceModelName",
                NodeValue::String(model.to_owned()),
                NodeAccess::ReadOnly,
            )
            .with_enum("PixelColorFilter", "None", &FILTER_ENTRIES)
            .with("WidthMax", NodeValue::Integer(1440), NodeAccess::ReadOnly)
            .with("HeightMax", NodeValue::Integer(1080), NodeAccess::ReadOnly)
            .with("Width", NodeValue::Integer(640), NodeAccess::ReadWrite)
            .with("Height", NodeValue::Integer(480), NodeAccess::ReadWrite)
            .with_enum("ExposureAuto", "Continuous", &AUTO_ENTRIES)
            .with("ExposureTime", NodeValue::Float(10_000.0), NodeAccess::ReadWrite)
            .with_enum("GainAuto", "Continuous", &AUTO_ENTRIES)
            .with("Gain", NodeValue::Float(0.0), NodeAccess::ReadWrite)
            .with("AcquisitionFrameRateEnable", NodeValue::Bool(false), NodeAccess::ReadWrite)
            .with("AcquisitionFrameRate", NodeValue::Float(30.0), NodeAccess::ReadWrite)
            .with("ChunkModeActive", NodeValue::Bool(false), NodeAccess::ReadWrite)
            .with_enum("ChunkSelector", "Timestamp", &["Timestamp", "FrameID", "ExposureTime"])
            .with("ChunkEnable", NodeValue::Bool(false), NodeAccess::ReadWrite);
        nodes.set_access("PixelColorFilter", NodeAccess::ReadOnly);

        Self {
            serial: Some(serial.to_owned()),
            state: Arc::new(Mutex::new(CameraState {
                stats: MockStats::default(),
                valid: true,
                init_fault: None,
                begin_fault: None,
                deinit_fault: None,
                shots: VecDeque::new(),
                width: 640,
                height: 480,
                bits_per_pixel: 8,
                pattern: TestPattern::Gradient,
                frame_count: 0,
                frame_delay: Duration::ZERO,
                in_flight: false,
            })),
            transport: MockNodes::new(transport),
            nodes: MockNodes::new(nodes),
            buffer: Vec::new(),
        }
    }

    /// A GigE Vision camera with a force IP command.
    #[must_use]
    pub fn gige(serial: &str, model: &str) -> Self {
        let camera = Self::new(serial, model);
        camera.transport.with_table(|table| {
            table.insert("DeviceType", NodeValue::Enum("GigEVision".to_owned()), NodeAccess::ReadOnly);
            table.remove("DeviceCurrentSpeed");
            table.insert("GevDeviceAutoForceIP", NodeValue::Command, NodeAccess::WriteOnly);
        });
        camera
    }

    /// Set the negotiated USB link speed.
    #[must_use]
    pub fn with_speed(self, speed: &str) -> Self {
        self.transport.with_table(|table| {
            table.insert("DeviceCurrentSpeed", NodeValue::Enum(speed.to_owned()), NodeAccess::ReadOnly);
        });
        self
    }

    /// Hide the serial number node.
    #[must_use]
    pub fn without_serial_node(self) -> Self {
        self.transport
            .with_table(|table| table.set_access("DeviceSerialNumber", NodeAccess::NotAvailable));
        self
    }

    /// Set the frame layout delivered by `next_image`.
    #[must_use]
    pub fn with_format(self, width: u32, height: u32, bits_per_pixel: u32) -> Self {
        {
            let mut state = lock(&self.state);
            state.width = width;
            state.height = height;
            state.bits_per_pixel = bits_per_pixel;
        }
        self
    }

    /// Set the pattern of generated frames.
    #[must_use]
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        lock(&self.state).pattern = pattern;
        self
    }

    /// Make every `next_image` call block for `delay`.
    #[must_use]
    pub fn with_frame_delay(self, delay: Duration) -> Self {
        lock(&self.state).frame_delay = delay;
        self
    }

    /// Change the reported color filter.
    pub fn set_color_filter(&self, filter: &str) {
        self.nodes.with_table(|table| {
            table.insert("PixelColorFilter", NodeValue::Enum(filter.to_owned()), NodeAccess::ReadOnly);
        });
    }

    /// Change the reported bit depth.
    pub fn set_bits_per_pixel(&self, bits_per_pixel: u32) {
        lock(&self.state).bits_per_pixel = bits_per_pixel;
    }

    /// Queue outcomes for upcoming `next_image` calls; complete frames follow.
    pub fn queue_shots<I: IntoIterator<Item = Shot>>(&self, shots: I) {
        lock(&self.state).shots.extend(shots);
    }

    /// Make `init` fail.
    pub fn fail_init(&self, err: SdkError) {
        lock(&self.state).init_fault = Some(err);
    }

    /// Make `begin_acquisition` fail.
    pub fn fail_begin(&self, err: Option<SdkError>) {
        lock(&self.state).begin_fault = err;
    }

    /// Make `deinit` fail.
    pub fn fail_deinit(&self, err: SdkError) {
        lock(&self.state).deinit_fault = Some(err);
    }

    /// Mark the handle as (in)valid.
    pub fn set_valid(&self, valid: bool) {
        lock(&self.state).valid = valid;
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MockStats {
        lock(&self.state).stats.clone()
    }

    /// Shared handle to the device node map.
    pub fn device_nodes(&self) -> MockNodes {
        self.nodes.clone()
    }

    /// Shared handle to the transport node map.
    pub fn tl_nodes(&self) -> MockNodes {
        self.transport.clone()
    }

    fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }
}

impl CameraDevice for MockCamera {
    type TransportNodes = MockNodes;
    type Nodes = MockNodes;

    fn is_valid(&self) -> bool {
        lock(&self.state).valid
    }

    fn transport_nodes(&self) -> &MockNodes {
        &self.transport
    }

    fn transport_nodes_mut(&mut self) -> &mut MockNodes {
        &mut self.transport
    }

    fn nodes(&self) -> &MockNodes {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut MockNodes {
        &mut self.nodes
    }

    fn configure_stream(&mut self, buffering: StreamBuffering) -> Result<(), SdkError> {
        lock(&self.state).stats.buffering = Some(buffering);
        Ok(())
    }

    fn init(&mut self) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        state.note_lifecycle_call();
        state.stats.init_calls += 1;
        if let Some(err) = state.init_fault.clone() {
            return Err(err);
        }
        state.stats.initialized = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        state.note_lifecycle_call();
        state.stats.deinit_calls += 1;
        state.stats.initialized = false;
        state.stats.streaming = false;
        state.deinit_fault.clone().map_or(Ok(()), Err)
    }

    fn begin_acquisition(&mut self) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        state.note_lifecycle_call();
        state.stats.begin_calls += 1;
        if let Some(err) = state.begin_fault.clone() {
            return Err(err);
        }
        if state.stats.streaming {
            return Err(SdkError::new(SdkErrorKind::ResourceInUse, "Stream has been started already."));
        }
        state.stats.streaming = true;
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), SdkError> {
        let mut state = lock(&self.state);
        state.note_lifecycle_call();
        state.stats.end_calls += 1;
        if !state.stats.streaming {
            return Err(SdkError::new(SdkErrorKind::Error, "Camera is not started."));
        }
        state.stats.streaming = false;
        Ok(())
    }

    fn next_image(&mut self, timeout: Duration) -> Result<RawImage<'_>, SdkError> {
        let delay = lock(&self.state).frame_delay;
        if !delay.is_zero() {
            lock(&self.state).in_flight = true;
            thread::sleep(delay);
            lock(&self.state).in_flight = false;
        }

        let (shot, width, height, bits_per_pixel, pattern, sequence) = {
            let mut state = lock(&self.state);
            if !state.stats.streaming {
                return Err(SdkError::new(SdkErrorKind::NotInitialized, "Stream has not been started."));
            }
            let shot = state.shots.pop_front().unwrap_or(Shot::Complete);
            let sequence = state.frame_count;
            if shot != Shot::Timeout {
                state.frame_count += 1;
            }
            (shot, state.width, state.height, state.bits_per_pixel, state.pattern, sequence)
        };

        let status = match shot {
            Shot::Timeout => {
                return Err(SdkError::new(
                    SdkErrorKind::Timeout,
                    format!("Failed waiting for EventData on NEW_BUFFER_DATA event ({timeout:?})"),
                ))
            }
            Shot::Complete => ImageStatus::NoError,
            Shot::Incomplete(status) => status,
        };

        let stride = (width * bits_per_pixel).div_ceil(8);
        generate_test_frame(&mut self.buffer, stride, height, pattern);

        Ok(RawImage {
            data: &self.buffer,
            width,
            height,
            stride,
            bits_per_pixel,
            // ~30fps on a counter starting at one second
            timestamp_ns: 1_000_000_000 + sequence * 33_333_333,
            incomplete: shot != Shot::Complete,
            status,
        })
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(data: &mut Vec<u8>, stride: u32, height: u32, pattern: TestPattern) {
    data.clear();
    data.resize(stride as usize * height as usize, 0);

    match pattern {
        TestPattern::Gradient => {
            let stride = stride.max(1) as usize;
            for row in data.chunks_mut(stride) {
                for (x, byte) in row.iter_mut().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let value = ((x * 255) / stride) as u8;
                    *byte = value;
                }
            }
        }
        TestPattern::Solid(value) => data.fill(value),
    }
}

#[derive(Debug, Default)]
struct Bus {
    attached: Vec<MockCamera>,
    pending: Vec<(u32, MockCamera)>,
    cache: Vec<MockCamera>,
    refreshes: u32,
    removed: Vec<String>,
}

/// Mock device registry.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    bus: Arc<Mutex<Bus>>,
}

impl MockRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a camera in; it shows up at the next refresh.
    pub fn attach(&self, camera: MockCamera) {
        lock(&self.bus).attached.push(camera);
    }

    /// Plug a camera in once `refreshes` enumerations have happened in total.
    pub fn attach_after(&self, refreshes: u32, camera: MockCamera) {
        lock(&self.bus).pending.push((refreshes, camera));
    }

    /// Unplug a camera.
    pub fn detach(&self, serial: &str) {
        lock(&self.bus)
            .attached
            .retain(|camera| camera.serial() != Some(serial));
    }

    /// Number of enumerations performed so far.
    pub fn refreshes(&self) -> u32 {
        lock(&self.bus).refreshes
    }

    /// Serials passed to `remove_by_serial`, in order.
    pub fn removed(&self) -> Vec<String> {
        lock(&self.bus).removed.clone()
    }
}

impl DeviceRegistry for MockRegistry {
    type Device = MockCamera;

    fn refresh(&mut self) -> Result<(), SdkError> {
        let mut bus = lock(&self.bus);
        bus.refreshes += 1;
        let now = bus.refreshes;
        let (due, later): (Vec<_>, Vec<_>) = bus.pending.drain(..).partition(|(at, _)| *at <= now);
        bus.pending = later;
        bus.attached.extend(due.into_iter().map(|(_, camera)| camera));
        bus.cache = bus.attached.clone();
        Ok(())
    }

    fn len(&self) -> usize {
        lock(&self.bus).cache.len()
    }

    fn by_serial(&mut self, serial: &str) -> Result<Option<MockCamera>, SdkError> {
        Ok(lock(&self.bus)
            .cache
            .iter()
            .find(|camera| camera.serial() == Some(serial))
            .cloned())
    }

    fn by_index(&mut self, index: usize) -> Result<Option<MockCamera>, SdkError> {
        Ok(lock(&self.bus).cache.get(index).cloned())
    }

    fn remove_by_serial(&mut self, serial: &str) -> Result<(), SdkError> {
        let mut bus = lock(&self.bus);
        bus.cache.retain(|camera| camera.serial() != Some(serial));
        bus.removed.push(serial.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_camera_creation() {
        let camera = MockCamera::new("1234", "Blackfly S BFS-U3-04S2M");
        assert!(camera.is_valid());
        assert_eq!(
            camera.transport_nodes().get("DeviceSerialNumber").expect("serial"),
            NodeValue::String("1234".to_owned())
        );
        assert_eq!(
            camera.nodes().get("PixelColorFilter").expect("filter"),
            NodeValue::Enum("None".to_owned())
        );
    }

    #[test]
    fn test_mock_stream_capture() {
        let mut camera = MockCamera::new("1", "Mock").with_format(64, 8, 16);
        assert!(camera.next_image(Duration::from_millis(5)).is_err());

        camera.begin_acquisition().expect("begin should succeed");
        let first = camera
            .next_image(Duration::from_millis(5))
            .expect("next_image should succeed")
            .timestamp_ns;
        let frame = camera
            .next_image(Duration::from_millis(5))
            .expect("next_image should succeed");
        assert_eq!(frame.stride, 128);
        assert_eq!(frame.data.len(), 128 * 8);
        assert!(frame.timestamp_ns > first);
    }

    #[test]
    fn test_queued_shots() {
        let mut camera = MockCamera::new("1", "Mock");
        camera.begin_acquisition().expect("begin should succeed");
        camera.queue_shots([Shot::Timeout, Shot::Incomplete(ImageStatus::MissingPackets)]);

        let err = camera
            .next_image(Duration::from_millis(5))
            .expect_err("first shot times out");
        assert_eq!(err.kind, SdkErrorKind::Timeout);

        let frame = camera
            .next_image(Duration::from_millis(5))
            .expect("incomplete frames are still delivered");
        assert!(frame.incomplete);
        assert_eq!(frame.status, ImageStatus::MissingPackets);

        let frame = camera
            .next_image(Duration::from_millis(5))
            .expect("queue drained");
        assert!(!frame.incomplete);
    }

    #[test]
    fn test_gradient_pattern() {
        let mut data = Vec::new();
        generate_test_frame(&mut data, 256, 2, TestPattern::Gradient);
        assert_eq!(data.len(), 512);
        assert_eq!(data.first(), Some(&0));
        assert!(data.get(255).is_some_and(|&last| last > 250));
        assert_eq!(data.get(256), Some(&0));
    }

    #[test]
    fn test_solid_pattern() {
        let mut data = vec![1, 2, 3];
        generate_test_frame(&mut data, 4, 4, TestPattern::Solid(77));
        assert_eq!(data, vec![77; 16]);
    }

    #[test]
    fn test_registry_attach_after() {
        let mut registry = MockRegistry::new();
        registry.attach_after(2, MockCamera::new("42", "Mock"));

        registry.refresh().expect("refresh");
        assert!(registry.is_empty());

        registry.refresh().expect("refresh");
        assert_eq!(registry.len(), 1);
        assert!(registry.by_serial("42").expect("lookup").is_some());

        registry.remove_by_serial("42").expect("remove");
        assert!(registry.by_index(0).expect("lookup").is_none());
        assert_eq!(registry.removed(), vec!["42".to_owned()]);
    }
}
