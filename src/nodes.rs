//! GenICam-style typed property trees.

use std::collections::HashMap;
use std::fmt;

use crate::error::{SdkError, SdkErrorKind};

/// Access mode of a node in the current device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAccess {
    /// The node does not exist on this device.
    NotImplemented,
    /// The node exists but is currently unavailable.
    NotAvailable,
    /// Read only.
    ReadOnly,
    /// Write only.
    WriteOnly,
    /// Read and write.
    ReadWrite,
}

impl NodeAccess {
    /// The node exists and is currently available.
    pub const fn is_available(self) -> bool {
        matches!(self, Self::ReadOnly | Self::WriteOnly | Self::ReadWrite)
    }

    /// The node can be read.
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::ReadOnly | Self::ReadWrite)
    }

    /// The node can be written (or executed, for commands).
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// Value of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// String node.
    String(String),
    /// Enumeration node, identified by the symbolic name of its current entry.
    Enum(String),
    /// Boolean node.
    Bool(bool),
    /// Integer node.
    Integer(i64),
    /// Float node.
    Float(f64),
    /// Command node.
    Command,
}

impl NodeValue {
    /// Textual value of string and enumeration nodes.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::Enum(value) => Some(value),
            _ => None,
        }
    }

    /// Integer value, widening booleans.
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Bool(value) => Some(*value as i64),
            _ => None,
        }
    }

    /// Boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Float value, widening integers.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) | Self::Enum(value) => f.write_str(value),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Command => f.write_str("<command>"),
        }
    }
}

/// A named, typed property tree exposed by a device.
pub trait NodeMap {
    /// Access mode of the named node.
    fn access(&self, name: &str) -> NodeAccess;

    /// Read the current value of the named node.
    fn get(&self, name: &str) -> Result<NodeValue, SdkError>;

    /// Write a value to the named node.
    fn set(&mut self, name: &str, value: NodeValue) -> Result<(), SdkError>;

    /// Execute a command node.
    fn execute(&mut self, name: &str) -> Result<(), SdkError>;

    /// Symbolic names of the available entries of an enumeration node.
    fn entries(&self, name: &str) -> Result<Vec<String>, SdkError>;
}

/// Read a node only if it is available and readable.
pub fn read_if_readable<M: NodeMap + ?Sized>(
    map: &M,
    name: &str,
) -> Result<Option<NodeValue>, SdkError> {
    if map.access(name).is_readable() {
        map.get(name).map(Some)
    } else {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct Node {
    value: NodeValue,
    access: NodeAccess,
    entries: Vec<String>,
}

/// In-memory node map.
///
/// Backends use it for synthesised transport-layer maps where the values are
/// known at enumeration time.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: HashMap<String, Node>,
    executed: HashMap<String, u32>,
}

impl NodeTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`NodeTable::insert`].
    #[must_use]
    pub fn with(mut self, name: &str, value: NodeValue, access: NodeAccess) -> Self {
        self.insert(name, value, access);
        self
    }

    /// Builder form of [`NodeTable::insert_enum`].
    #[must_use]
    pub fn with_enum(mut self, name: &str, current: &str, entries: &[&str]) -> Self {
        self.insert_enum(name, current, entries);
        self
    }

    /// Insert or replace a node.
    pub fn insert(&mut self, name: &str, value: NodeValue, access: NodeAccess) {
        self.nodes.insert(
            name.to_owned(),
            Node {
                value,
                access,
                entries: Vec::new(),
            },
        );
    }

    /// Insert or replace a read-write enumeration node.
    pub fn insert_enum(&mut self, name: &str, current: &str, entries: &[&str]) {
        self.nodes.insert(
            name.to_owned(),
            Node {
                value: NodeValue::Enum(current.to_owned()),
                access: NodeAccess::ReadWrite,
                entries: entries.iter().map(|&entry| entry.to_owned()).collect(),
            },
        );
    }

    /// Change the access mode of an existing node.
    pub fn set_access(&mut self, name: &str, access: NodeAccess) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.access = access;
        }
    }

    /// Remove a node.
    pub fn remove(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    /// How many times a command node has been executed.
    pub fn executions(&self, name: &str) -> u32 {
        self.executed.get(name).copied().unwrap_or(0)
    }

    fn lookup(&self, name: &str) -> Result<&Node, SdkError> {
        self.nodes
            .get(name)
            .ok_or_else(|| SdkError::new(SdkErrorKind::InvalidId, format!("no node named '{name}'")))
    }
}

impl NodeMap for NodeTable {
    fn access(&self, name: &str) -> NodeAccess {
        self.nodes
            .get(name)
            .map_or(NodeAccess::NotImplemented, |node| node.access)
    }

    fn get(&self, name: &str) -> Result<NodeValue, SdkError> {
        let node = self.lookup(name)?;
        if !node.access.is_readable() {
            return Err(SdkError::new(
                SdkErrorKind::AccessDenied,
                format!("node '{name}' is not readable"),
            ));
        }
        Ok(node.value.clone())
    }

    fn set(&mut self, name: &str, value: NodeValue) -> Result<(), SdkError> {
        let node = self.nodes.get_mut(name).ok_or_else(|| {
            SdkError::new(SdkErrorKind::InvalidId, format!("no node named '{name}'"))
        })?;
        if !node.access.is_writable() {
            return Err(SdkError::new(
                SdkErrorKind::AccessDenied,
                format!("node '{name}' is not writable"),
            ));
        }
        if let (NodeValue::Enum(entry), false) = (&value, node.entries.is_empty()) {
            if !node.entries.contains(entry) {
                return Err(SdkError::new(
                    SdkErrorKind::InvalidParameter,
                    format!("'{entry}' is not an entry of '{name}'"),
                ));
            }
        }
        node.value = value;
        Ok(())
    }

    fn execute(&mut self, name: &str) -> Result<(), SdkError> {
        let node = self.lookup(name)?;
        if node.value != NodeValue::Command || !node.access.is_writable() {
            return Err(SdkError::new(
                SdkErrorKind::AccessDenied,
                format!("node '{name}' is not an executable command"),
            ));
        }
        *self.executed.entry(name.to_owned()).or_insert(0) += 1;
        Ok(())
    }

    fn entries(&self, name: &str) -> Result<Vec<String>, SdkError> {
        Ok(self.lookup(name)?.entries.clone())
    }
}
