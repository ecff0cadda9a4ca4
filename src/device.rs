//! V4L2 backend using the v4l crate.
//!
//! Capture nodes under `/dev/video*` are exposed through the same registry
//! and node map abstractions as GenICam cameras. The transport map is built
//! from sysfs and the capability query; the device map wraps the negotiated
//! format, the frame interval and every V4L2 control by name.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use v4l::buffer::{Flags as BufferFlags, Type};
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Flags as ControlFlags, Type as ControlType, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::encoding::{COLOR_FILTER_NODE, NO_COLOR_FILTER};
use crate::error::{SdkError, SdkErrorKind};
use crate::nodes::{NodeAccess, NodeMap, NodeTable, NodeValue};
use crate::traits::{
    BufferHandling, CameraDevice, DeviceRegistry, ImageStatus, RawImage, StreamBuffering,
};

const SYSFS_ROOT: &str = "/sys/class/video4linux";
const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Raw pixel layouts the driver can stream without decoding.
#[derive(Debug, Clone, Copy)]
struct RawFormat {
    fourcc: [u8; 4],
    bits_per_pixel: u32,
    color_filter: &'static str,
}

const RAW_FORMATS: [RawFormat; 11] = [
    RawFormat { fourcc: *b"GREY", bits_per_pixel: 8, color_filter: NO_COLOR_FILTER },
    RawFormat { fourcc: *b"Y16 ", bits_per_pixel: 16, color_filter: NO_COLOR_FILTER },
    RawFormat { fourcc: *b"RGB3", bits_per_pixel: 24, color_filter: NO_COLOR_FILTER },
    RawFormat { fourcc: *b"BA81", bits_per_pixel: 8, color_filter: "BayerBG" },
    RawFormat { fourcc: *b"GBRG", bits_per_pixel: 8, color_filter: "BayerGB" },
    RawFormat { fourcc: *b"GRBG", bits_per_pixel: 8, color_filter: "BayerGR" },
    RawFormat { fourcc: *b"RGGB", bits_per_pixel: 8, color_filter: "BayerRG" },
    RawFormat { fourcc: *b"BYR2", bits_per_pixel: 16, color_filter: "BayerBG" },
    RawFormat { fourcc: *b"GB16", bits_per_pixel: 16, color_filter: "BayerGB" },
    RawFormat { fourcc: *b"GR16", bits_per_pixel: 16, color_filter: "BayerGR" },
    RawFormat { fourcc: *b"RG16", bits_per_pixel: 16, color_filter: "BayerRG" },
];

fn raw_format(fourcc: FourCC) -> Option<RawFormat> {
    RAW_FORMATS.iter().copied().find(|raw| raw.fourcc == fourcc.repr)
}

fn raw_format_by_name(name: &str) -> Option<RawFormat> {
    RAW_FORMATS
        .iter()
        .copied()
        .find(|raw| raw.fourcc.as_slice() == name.as_bytes())
}

fn fourcc_name(fourcc: FourCC) -> String {
    fourcc
        .str()
        .map_or_else(|_| format!("{:?}", fourcc.repr), ToOwned::to_owned)
}

/// 32-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Numeric serial of a device. USB serials that are not numeric, and devices
/// without one, get a stable hash of the serial or bus string instead.
fn derive_serial(usb_serial: Option<&str>, bus_info: &str) -> u32 {
    let usb_serial = usb_serial.map(str::trim).filter(|serial| !serial.is_empty());
    if let Some(serial) = usb_serial
        .and_then(|serial| serial.parse::<u32>().ok())
        .filter(|&serial| serial != 0)
    {
        return serial;
    }
    fnv1a(usb_serial.unwrap_or(bus_info).as_bytes()).max(1)
}

fn read_usb_serial(path: &Path) -> Option<String> {
    let node = path.file_name()?;
    let attr = Path::new(SYSFS_ROOT).join(node).join("device/../serial");
    fs::read_to_string(attr).ok()
}

/// `"White Balance Temperature, Auto"` becomes `"WhiteBalanceTemperatureAuto"`.
fn control_node_name(label: &str) -> String {
    label
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect()
}

fn not_initialized() -> SdkError {
    SdkError::new(SdkErrorKind::NotInitialized, "Camera is not initialized.")
}

fn unknown_node(name: &str) -> SdkError {
    SdkError::new(SdkErrorKind::InvalidId, format!("no node named '{name}'"))
}

fn wrong_type(name: &str, value: &NodeValue) -> SdkError {
    SdkError::new(
        SdkErrorKind::InvalidParameter,
        format!("'{value}' has the wrong type for node '{name}'"),
    )
}

/// A capture node found during enumeration.
#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    serial: String,
    card: String,
    driver: String,
    bus: String,
}

impl Entry {
    fn probe(path: &Path) -> Option<Self> {
        let device = Device::with_path(path).ok()?;
        let caps = device.query_caps().ok()?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE)
            || !caps.capabilities.contains(CapFlags::STREAMING)
        {
            return None;
        }
        let usb_serial = read_usb_serial(path);
        let serial = derive_serial(usb_serial.as_deref(), &caps.bus);
        Some(Self {
            path: path.to_path_buf(),
            serial: serial.to_string(),
            card: caps.card,
            driver: caps.driver,
            bus: caps.bus,
        })
    }
}

/// Registry of V4L2 capture devices.
#[derive(Debug, Default)]
pub struct V4l2Registry {
    cache: Vec<Entry>,
}

impl V4l2Registry {
    /// Empty registry; call [`DeviceRegistry::refresh`] to enumerate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceRegistry for V4l2Registry {
    type Device = V4l2Camera;

    fn refresh(&mut self) -> Result<(), SdkError> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(v4l::context::Node::index);

        self.cache.clear();
        for node in nodes {
            let Some(entry) = Entry::probe(node.path()) else {
                continue;
            };
            // UVC cameras expose a metadata node next to the capture node.
            if self.cache.iter().any(|known| known.serial == entry.serial) {
                continue;
            }
            debug!(
                "Found {} '{}' with serial {}",
                entry.path.display(),
                entry.card,
                entry.serial
            );
            self.cache.push(entry);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn by_serial(&mut self, serial: &str) -> Result<Option<V4l2Camera>, SdkError> {
        Ok(self
            .cache
            .iter()
            .find(|entry| entry.serial == serial)
            .map(V4l2Camera::new))
    }

    fn by_index(&mut self, index: usize) -> Result<Option<V4l2Camera>, SdkError> {
        Ok(self.cache.get(index).map(V4l2Camera::new))
    }

    fn remove_by_serial(&mut self, serial: &str) -> Result<(), SdkError> {
        self.cache.retain(|entry| entry.serial != serial);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    Integer,
    Boolean,
    Menu,
    Button,
    Text,
    Unsupported,
}

#[derive(Debug, Clone)]
struct ControlInfo {
    id: u32,
    kind: ControlKind,
    flags: ControlFlags,
    menu: Vec<(u32, String)>,
}

impl ControlInfo {
    fn access(&self) -> NodeAccess {
        if self.kind == ControlKind::Unsupported {
            NodeAccess::NotImplemented
        } else if self.flags.intersects(ControlFlags::DISABLED | ControlFlags::INACTIVE) {
            NodeAccess::NotAvailable
        } else if self.kind == ControlKind::Button || self.flags.contains(ControlFlags::WRITE_ONLY) {
            NodeAccess::WriteOnly
        } else if self.flags.intersects(ControlFlags::READ_ONLY | ControlFlags::GRABBED) {
            NodeAccess::ReadOnly
        } else {
            NodeAccess::ReadWrite
        }
    }

    fn to_node(&self, value: Value) -> NodeValue {
        match (self.kind, value) {
            (ControlKind::Menu, Value::Integer(index)) => self
                .menu
                .iter()
                .find(|(item, _)| i64::from(*item) == index)
                .map_or(NodeValue::Integer(index), |(_, name)| NodeValue::Enum(name.clone())),
            (ControlKind::Button, _) => NodeValue::Command,
            (_, Value::Integer(value)) => NodeValue::Integer(value),
            (_, Value::Boolean(value)) => NodeValue::Bool(value),
            (_, Value::String(value)) => NodeValue::String(value),
            (_, _) => NodeValue::String(String::new()),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn to_value(&self, name: &str, value: &NodeValue) -> Result<Value, SdkError> {
        match (self.kind, value) {
            (ControlKind::Menu, NodeValue::Enum(entry)) => self
                .menu
                .iter()
                .find(|(_, item)| item == entry)
                .map(|(index, _)| Value::Integer(i64::from(*index)))
                .ok_or_else(|| {
                    SdkError::new(
                        SdkErrorKind::InvalidParameter,
                        format!("'{entry}' is not an entry of '{name}'"),
                    )
                }),
            (ControlKind::Integer | ControlKind::Menu, NodeValue::Integer(value)) => Ok(Value::Integer(*value)),
            (ControlKind::Integer, NodeValue::Float(value)) => Ok(Value::Integer(value.round() as i64)),
            (ControlKind::Boolean, NodeValue::Bool(value)) => Ok(Value::Boolean(*value)),
            (ControlKind::Text, NodeValue::String(value)) => Ok(Value::String(value.clone())),
            _ => Err(wrong_type(name, value)),
        }
    }
}

/// Device node map of a V4L2 camera.
#[derive(Default)]
pub struct V4l2Nodes {
    device: Option<Device>,
    format: Option<Format>,
    model: String,
    vendor: String,
    controls: HashMap<String, ControlInfo>,
}

impl V4l2Nodes {
    fn device(&self) -> Result<&Device, SdkError> {
        self.device.as_ref().ok_or_else(not_initialized)
    }

    fn format(&self) -> Result<&Format, SdkError> {
        self.format.as_ref().ok_or_else(not_initialized)
    }

    fn raw(&self) -> Result<RawFormat, SdkError> {
        let fourcc = self.format()?.fourcc;
        raw_format(fourcc).ok_or_else(|| {
            SdkError::new(
                SdkErrorKind::NotAvailable,
                format!("pixel format {} cannot be streamed raw", fourcc_name(fourcc)),
            )
        })
    }

    fn max_size(&self) -> Result<(u32, u32), SdkError> {
        let format = self.format()?;
        let sizes = self.device()?.enum_framesizes(format.fourcc)?;
        let max = sizes.iter().fold((format.width, format.height), |(w, h), size| {
            match &size.size {
                FrameSizeEnum::Discrete(discrete) => (w.max(discrete.width), h.max(discrete.height)),
                FrameSizeEnum::Stepwise(stepwise) => (w.max(stepwise.max_width), h.max(stepwise.max_height)),
            }
        });
        Ok(max)
    }

    fn frame_rate(&self) -> Result<f64, SdkError> {
        let interval = self.device()?.params()?.interval;
        if interval.numerator == 0 {
            return Err(SdkError::new(SdkErrorKind::NoData, "frame interval is not reported"));
        }
        Ok(f64::from(interval.denominator) / f64::from(interval.numerator))
    }

    fn supported_formats(&self) -> Result<Vec<String>, SdkError> {
        Ok(self
            .device()?
            .enum_formats()?
            .into_iter()
            .filter(|desc| raw_format(desc.fourcc).is_some())
            .map(|desc| fourcc_name(desc.fourcc))
            .collect())
    }

    fn apply_format(&mut self, format: &Format) -> Result<(), SdkError> {
        let applied = self.device()?.set_format(format)?;
        debug!(
            "Format is now {}x{} {}",
            applied.width,
            applied.height,
            fourcc_name(applied.fourcc)
        );
        self.format = Some(applied);
        Ok(())
    }

    fn set_size(&mut self, width: Option<i64>, height: Option<i64>) -> Result<(), SdkError> {
        let mut format = *self.format()?;
        let convert = |value: i64| {
            u32::try_from(value)
                .map_err(|_| SdkError::new(SdkErrorKind::InvalidParameter, format!("{value} is out of range")))
        };
        if let Some(width) = width {
            format.width = convert(width)?;
        }
        if let Some(height) = height {
            format.height = convert(height)?;
        }
        self.apply_format(&format)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn set_frame_rate(&self, rate: f64) -> Result<(), SdkError> {
        if !rate.is_finite() || rate < 1.0 {
            return Err(SdkError::new(
                SdkErrorKind::InvalidParameter,
                format!("{rate} is not a valid frame rate"),
            ));
        }
        let applied = self.device()?.set_params(&Parameters::with_fps(rate.round() as u32))?;
        debug!(
            "Frame interval is now {}/{}",
            applied.interval.numerator, applied.interval.denominator
        );
        Ok(())
    }

    fn load_controls(&mut self) -> Result<(), SdkError> {
        let descriptions = self.device()?.query_controls()?;
        self.controls = descriptions
            .into_iter()
            .filter(|desc| !matches!(desc.typ, ControlType::CtrlClass))
            .map(|desc| {
                let kind = match desc.typ {
                    ControlType::Integer | ControlType::Integer64 => ControlKind::Integer,
                    ControlType::Boolean => ControlKind::Boolean,
                    ControlType::Menu | ControlType::IntegerMenu => ControlKind::Menu,
                    ControlType::Button => ControlKind::Button,
                    ControlType::String => ControlKind::Text,
                    _ => ControlKind::Unsupported,
                };
                let menu = desc
                    .items
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(index, item)| (index, item.to_string()))
                    .collect();
                let info = ControlInfo {
                    id: desc.id,
                    kind,
                    flags: desc.flags,
                    menu,
                };
                (control_node_name(&desc.name), info)
            })
            .collect();
        debug!("Loaded {} controls", self.controls.len());
        Ok(())
    }
}

impl NodeMap for V4l2Nodes {
    fn access(&self, name: &str) -> NodeAccess {
        if self.device.is_none() {
            return NodeAccess::NotAvailable;
        }
        match name {
            "DeviceModelName" | "DeviceVendorName" | "WidthMax" | "HeightMax" | COLOR_FILTER_NODE => {
                NodeAccess::ReadOnly
            }
            "Width" | "Height" | "PixelFormat" | "AcquisitionFrameRate" | "AcquisitionFrameRateEnable" => {
                NodeAccess::ReadWrite
            }
            _ => self
                .controls
                .get(name)
                .map_or(NodeAccess::NotImplemented, ControlInfo::access),
        }
    }

    fn get(&self, name: &str) -> Result<NodeValue, SdkError> {
        let device = self.device()?;
        let value = match name {
            "DeviceModelName" => NodeValue::String(self.model.clone()),
            "DeviceVendorName" => NodeValue::String(self.vendor.clone()),
            "Width" => NodeValue::Integer(i64::from(self.format()?.width)),
            "Height" => NodeValue::Integer(i64::from(self.format()?.height)),
            "WidthMax" => NodeValue::Integer(i64::from(self.max_size()?.0)),
            "HeightMax" => NodeValue::Integer(i64::from(self.max_size()?.1)),
            "PixelFormat" => NodeValue::Enum(fourcc_name(self.format()?.fourcc)),
            COLOR_FILTER_NODE => NodeValue::Enum(self.raw()?.color_filter.to_owned()),
            "AcquisitionFrameRate" => NodeValue::Float(self.frame_rate()?),
            "AcquisitionFrameRateEnable" => NodeValue::Bool(true),
            _ => {
                let info = self.controls.get(name).ok_or_else(|| unknown_node(name))?;
                if !info.access().is_readable() {
                    return Err(SdkError::new(
                        SdkErrorKind::AccessDenied,
                        format!("node '{name}' is not readable"),
                    ));
                }
                info.to_node(device.control(info.id)?.value)
            }
        };
        Ok(value)
    }

    fn set(&mut self, name: &str, value: NodeValue) -> Result<(), SdkError> {
        self.device()?;
        match (name, &value) {
            ("Width", NodeValue::Integer(width)) => self.set_size(Some(*width), None),
            ("Height", NodeValue::Integer(height)) => self.set_size(None, Some(*height)),
            ("PixelFormat", NodeValue::Enum(entry)) => {
                let raw = raw_format_by_name(entry).ok_or_else(|| {
                    SdkError::new(
                        SdkErrorKind::InvalidParameter,
                        format!("'{entry}' is not a raw pixel format"),
                    )
                })?;
                let mut format = *self.format()?;
                format.fourcc = FourCC::new(&raw.fourcc);
                self.apply_format(&format)?;
                if self.format()?.fourcc.repr != raw.fourcc {
                    return Err(SdkError::new(
                        SdkErrorKind::InvalidParameter,
                        format!("device refused pixel format {entry}"),
                    ));
                }
                Ok(())
            }
            ("AcquisitionFrameRate", NodeValue::Float(rate)) => self.set_frame_rate(*rate),
            // The frame interval is always honored.
            ("AcquisitionFrameRateEnable", NodeValue::Bool(true)) => Ok(()),
            (
                "Width" | "Height" | "PixelFormat" | "AcquisitionFrameRate" | "AcquisitionFrameRateEnable",
                _,
            ) => Err(wrong_type(name, &value)),
            _ => {
                let info = self.controls.get(name).ok_or_else(|| unknown_node(name))?;
                if !info.access().is_writable() || info.kind == ControlKind::Button {
                    return Err(SdkError::new(
                        SdkErrorKind::AccessDenied,
                        format!("node '{name}' is not writable"),
                    ));
                }
                let control = Control {
                    id: info.id,
                    value: info.to_value(name, &value)?,
                };
                self.device()?.set_control(control)?;
                Ok(())
            }
        }
    }

    fn execute(&mut self, name: &str) -> Result<(), SdkError> {
        let info = self.controls.get(name).ok_or_else(|| unknown_node(name))?;
        if info.kind != ControlKind::Button || !info.access().is_writable() {
            return Err(SdkError::new(
                SdkErrorKind::AccessDenied,
                format!("node '{name}' is not an executable command"),
            ));
        }
        let control = Control {
            id: info.id,
            value: Value::Integer(1),
        };
        self.device()?.set_control(control)?;
        Ok(())
    }

    fn entries(&self, name: &str) -> Result<Vec<String>, SdkError> {
        match name {
            "PixelFormat" => self.supported_formats(),
            _ => {
                let info = self.controls.get(name).ok_or_else(|| unknown_node(name))?;
                Ok(info.menu.iter().map(|(_, item)| item.clone()).collect())
            }
        }
    }
}

/// A V4L2 capture device.
pub struct V4l2Camera {
    path: PathBuf,
    transport: NodeTable,
    nodes: V4l2Nodes,
    buffering: StreamBuffering,
    stream: Option<MmapStream<'static>>,
}

impl V4l2Camera {
    fn new(entry: &Entry) -> Self {
        let transport = NodeTable::new()
            .with("DeviceSerialNumber", NodeValue::String(entry.serial.clone()), NodeAccess::ReadOnly)
            .with("DeviceModelName", NodeValue::String(entry.card.clone()), NodeAccess::ReadOnly)
            .with("DeviceVendorName", NodeValue::String(entry.driver.clone()), NodeAccess::ReadOnly)
            .with("DeviceType", NodeValue::Enum("V4L2".to_owned()), NodeAccess::ReadOnly)
            .with(
                "DeviceID",
                NodeValue::String(entry.path.display().to_string()),
                NodeAccess::ReadOnly,
            )
            .with("DeviceBusInfo", NodeValue::String(entry.bus.clone()), NodeAccess::ReadOnly);

        Self {
            path: entry.path.clone(),
            transport,
            nodes: V4l2Nodes {
                model: entry.card.clone(),
                vendor: entry.driver.clone(),
                ..V4l2Nodes::default()
            },
            buffering: StreamBuffering::REAL_TIME,
            stream: None,
        }
    }

    /// Pick a raw format, preferring the current one.
    fn negotiate_format(device: &Device) -> Result<Format, SdkError> {
        let current = device.format()?;
        if raw_format(current.fourcc).is_some() {
            return Ok(current);
        }

        let candidate = device
            .enum_formats()?
            .into_iter()
            .find(|desc| raw_format(desc.fourcc).is_some())
            .ok_or_else(|| {
                SdkError::new(
                    SdkErrorKind::NotAvailable,
                    format!(
                        "no raw pixel format available, device is set to {}",
                        fourcc_name(current.fourcc)
                    ),
                )
            })?;

        let format = device.set_format(&Format::new(current.width, current.height, candidate.fourcc))?;
        info!(
            "Switched pixel format from {} to {}",
            fourcc_name(current.fourcc),
            fourcc_name(format.fourcc)
        );
        Ok(format)
    }
}

impl CameraDevice for V4l2Camera {
    type TransportNodes = NodeTable;
    type Nodes = V4l2Nodes;

    fn is_valid(&self) -> bool {
        self.path.exists()
    }

    fn transport_nodes(&self) -> &NodeTable {
        &self.transport
    }

    fn transport_nodes_mut(&mut self) -> &mut NodeTable {
        &mut self.transport
    }

    fn nodes(&self) -> &V4l2Nodes {
        &self.nodes
    }

    fn nodes_mut(&mut self) -> &mut V4l2Nodes {
        &mut self.nodes
    }

    fn configure_stream(&mut self, buffering: StreamBuffering) -> Result<(), SdkError> {
        if self.stream.is_some() {
            return Err(SdkError::new(
                SdkErrorKind::ResourceInUse,
                "Stream buffering cannot change while streaming.",
            ));
        }
        if buffering.handling != BufferHandling::NewestFirst {
            warn!(
                "V4L2 delivers buffers in queue order, {:?} is approximated by the buffer count",
                buffering.handling
            );
        }
        self.buffering = buffering;
        Ok(())
    }

    fn init(&mut self) -> Result<(), SdkError> {
        if self.nodes.device.is_some() {
            return Ok(());
        }
        let device = Device::with_path(&self.path)?;
        let format = Self::negotiate_format(&device)?;

        self.nodes.device = Some(device);
        self.nodes.format = Some(format);
        if let Err(err) = self.nodes.load_controls() {
            self.nodes.device = None;
            self.nodes.format = None;
            return Err(err);
        }
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), SdkError> {
        let stopped = self.stream.take().map_or(Ok(()), |mut stream| stream.stop());
        self.nodes.device = None;
        self.nodes.format = None;
        self.nodes.controls.clear();
        stopped.map_err(SdkError::from)
    }

    fn begin_acquisition(&mut self) -> Result<(), SdkError> {
        if self.stream.is_some() {
            return Err(SdkError::new(
                SdkErrorKind::ResourceInUse,
                "Stream has been started already.",
            ));
        }
        let count = self.buffering.buffer_count(DEFAULT_BUFFER_COUNT);
        let mut stream = MmapStream::with_buffers(self.nodes.device()?, Type::VideoCapture, count)?;
        stream.start()?;
        debug!("Streaming {} with {count} buffers", self.path.display());
        self.stream = Some(stream);
        Ok(())
    }

    fn end_acquisition(&mut self) -> Result<(), SdkError> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| SdkError::new(SdkErrorKind::Error, "Camera is not started."))?;
        stream.stop()?;
        Ok(())
    }

    fn next_image(&mut self, timeout: Duration) -> Result<RawImage<'_>, SdkError> {
        let format = *self.nodes.format()?;
        let raw = self.nodes.raw()?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SdkError::new(SdkErrorKind::NotInitialized, "Stream has not been started."))?;

        stream.set_timeout(timeout);
        let (buf, meta) = CaptureStream::next(stream)?;

        let expected = u64::from(format.stride) * u64::from(format.height);
        let used = buf.len().min(meta.bytesused as usize);
        let status = if meta.flags.contains(BufferFlags::ERROR) {
            ImageStatus::CrcCheckFailed
        } else if (used as u64) < expected {
            ImageStatus::DataIncomplete
        } else {
            ImageStatus::NoError
        };

        // V4L2 timestamps are never negative in practice
        #[allow(clippy::cast_sign_loss)]
        let timestamp_ns = (meta.timestamp.sec.max(0) as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add((meta.timestamp.usec.max(0) as u64).saturating_mul(1000));

        Ok(RawImage {
            data: buf.get(..used).unwrap_or(buf),
            width: format.width,
            height: format.height,
            stride: format.stride,
            bits_per_pixel: raw.bits_per_pixel,
            timestamp_ns,
            incomplete: status != ImageStatus::NoError,
            status,
        })
    }
}
