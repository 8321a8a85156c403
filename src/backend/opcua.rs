//! OPC UA backend: per-group session lifecycle over a client library
//!
//! The client library is modelled by two traits: [`OpcUaConnector`] creates
//! and connects a session, [`OpcUaSession`] reports its state and reads or
//! writes a node's value attribute.
//!
//! # Session lifecycle
//!
//! A group's session is created lazily on its first pass. A failed connect
//! leaves the session absent, so every later pass retries from scratch. The
//! session state is re-checked at the start of every pass; a non-good state
//! short-circuits the pass and drops the session so the next pass reconnects.
//!
//! # Tags
//!
//! Each tag's node id (namespace from the group path, tag name as string
//! identifier) is derived once and marks the tag initialized. Reads store
//! the returned [`UaVariant`] in the tag's typed container. Writes marshal the
//! value into a container of the matching variant type first and are refused,
//! without any remote call, when the server last reported a different type.

use super::{PassContext, ReadPass, WriteOutcome};
use crate::engine::registry::{CachedValue, GroupEntry, TagCell};
use crate::error::{CommsError, Result};
use crate::types::{GroupSpec, ScalarKind, ScalarValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// OPC UA status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UaStatusCode(pub u32);

impl UaStatusCode {
    pub const GOOD: UaStatusCode = UaStatusCode(0);
    pub const BAD_UNEXPECTED_ERROR: UaStatusCode = UaStatusCode(0x8001_0000);
    pub const BAD_COMMUNICATION_ERROR: UaStatusCode = UaStatusCode(0x8005_0000);
    pub const BAD_TIMEOUT: UaStatusCode = UaStatusCode(0x800A_0000);
    pub const BAD_SERVER_NOT_CONNECTED: UaStatusCode = UaStatusCode(0x800D_0000);
    pub const BAD_NODE_ID_UNKNOWN: UaStatusCode = UaStatusCode(0x8034_0000);
    pub const BAD_TYPE_MISMATCH: UaStatusCode = UaStatusCode(0x8074_0000);
    pub const BAD_NOT_CONNECTED: UaStatusCode = UaStatusCode(0x808A_0000);
    pub const BAD_CONNECTION_CLOSED: UaStatusCode = UaStatusCode(0x80AE_0000);

    /// Good codes have both severity bits clear
    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Symbolic name of the code
    pub fn name(self) -> &'static str {
        match self {
            Self::GOOD => "Good",
            Self::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            Self::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            Self::BAD_TIMEOUT => "BadTimeout",
            Self::BAD_SERVER_NOT_CONNECTED => "BadServerNotConnected",
            Self::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            Self::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            Self::BAD_NOT_CONNECTED => "BadNotConnected",
            Self::BAD_CONNECTION_CLOSED => "BadConnectionClosed",
            _ if self.is_good() => "Good",
            _ => "Bad",
        }
    }
}

impl std::fmt::Display for UaStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

/// String node identifier in a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: String,
}

impl NodeId {
    /// Create a string node id
    pub fn string(namespace: u16, identifier: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: identifier.into(),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ns={};s={}", self.namespace, self.identifier)
    }
}

/// Typed scalar container exchanged with the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum UaVariant {
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
}

impl UaVariant {
    /// Marshal a scalar into its wire container
    ///
    /// OPC UA clients commonly expose no 8-bit integer setters, so `u8` and
    /// `i8` travel as `UInt16` and `Int16`.
    pub fn from_scalar(value: ScalarValue) -> Self {
        match value {
            ScalarValue::Bit(v) => UaVariant::Boolean(v),
            ScalarValue::U64(v) => UaVariant::UInt64(v),
            ScalarValue::I64(v) => UaVariant::Int64(v),
            ScalarValue::U32(v) => UaVariant::UInt32(v),
            ScalarValue::I32(v) => UaVariant::Int32(v),
            ScalarValue::U16(v) => UaVariant::UInt16(v),
            ScalarValue::I16(v) => UaVariant::Int16(v),
            ScalarValue::U8(v) => UaVariant::UInt16(v as u16),
            ScalarValue::I8(v) => UaVariant::Int16(v as i16),
            ScalarValue::F64(v) => UaVariant::Double(v),
            ScalarValue::F32(v) => UaVariant::Float(v),
        }
    }

    /// Marshal a scalar to match the container a node already holds
    ///
    /// Nodes declared as `Byte` or `SByte` keep their 8-bit type; everything
    /// else goes through [`from_scalar`](Self::from_scalar).
    pub fn from_scalar_like(value: ScalarValue, current: &UaVariant) -> Self {
        match (value, current) {
            (ScalarValue::U8(v), UaVariant::Byte(_)) => UaVariant::Byte(v),
            (ScalarValue::I8(v), UaVariant::SByte(_)) => UaVariant::SByte(v),
            _ => Self::from_scalar(value),
        }
    }

    /// Interpret the container as `kind`; `None` on type mismatch
    pub fn to_scalar(&self, kind: ScalarKind) -> Option<ScalarValue> {
        match (kind, self) {
            (ScalarKind::Bit, UaVariant::Boolean(v)) => Some(ScalarValue::Bit(*v)),
            (ScalarKind::U64, UaVariant::UInt64(v)) => Some(ScalarValue::U64(*v)),
            (ScalarKind::I64, UaVariant::Int64(v)) => Some(ScalarValue::I64(*v)),
            (ScalarKind::U32, UaVariant::UInt32(v)) => Some(ScalarValue::U32(*v)),
            (ScalarKind::I32, UaVariant::Int32(v)) => Some(ScalarValue::I32(*v)),
            (ScalarKind::U16, UaVariant::UInt16(v)) => Some(ScalarValue::U16(*v)),
            (ScalarKind::I16, UaVariant::Int16(v)) => Some(ScalarValue::I16(*v)),
            (ScalarKind::U8, UaVariant::UInt16(v)) => u8::try_from(*v).ok().map(ScalarValue::U8),
            (ScalarKind::U8, UaVariant::Byte(v)) => Some(ScalarValue::U8(*v)),
            (ScalarKind::I8, UaVariant::Int16(v)) => i8::try_from(*v).ok().map(ScalarValue::I8),
            (ScalarKind::I8, UaVariant::SByte(v)) => Some(ScalarValue::I8(*v)),
            (ScalarKind::F64, UaVariant::Double(v)) => Some(ScalarValue::F64(*v)),
            (ScalarKind::F32, UaVariant::Float(v)) => Some(ScalarValue::F32(*v)),
            _ => None,
        }
    }

    /// Name of the contained type
    pub fn type_name(&self) -> &'static str {
        match self {
            UaVariant::Empty => "Empty",
            UaVariant::Boolean(_) => "Boolean",
            UaVariant::SByte(_) => "SByte",
            UaVariant::Byte(_) => "Byte",
            UaVariant::Int16(_) => "Int16",
            UaVariant::UInt16(_) => "UInt16",
            UaVariant::Int32(_) => "Int32",
            UaVariant::UInt32(_) => "UInt32",
            UaVariant::Int64(_) => "Int64",
            UaVariant::UInt64(_) => "UInt64",
            UaVariant::Float(_) => "Float",
            UaVariant::Double(_) => "Double",
            UaVariant::String(_) => "String",
        }
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        matches!(self, UaVariant::Empty)
    }

    /// Same variant type, ignoring the value
    pub fn same_type(&self, other: &UaVariant) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Factory for connected client sessions
#[cfg_attr(test, mockall::automock)]
pub trait OpcUaConnector: Send {
    /// Create a client and connect it to `endpoint`
    fn connect(&mut self, endpoint: &str) -> std::result::Result<Box<dyn OpcUaSession>, UaStatusCode>;
}

/// A connected client session
#[cfg_attr(test, mockall::automock)]
pub trait OpcUaSession: Send {
    /// Current connection status
    fn state(&self) -> UaStatusCode;

    /// Read the value attribute of a node
    fn read_value(&mut self, node: &NodeId) -> std::result::Result<UaVariant, UaStatusCode>;

    /// Write the value attribute of a node
    fn write_value(&mut self, node: &NodeId, value: &UaVariant) -> std::result::Result<(), UaStatusCode>;

    /// Close the session
    fn disconnect(&mut self);
}

/// Worker-side state of one OPC UA tag
#[derive(Debug)]
pub struct OpcUaTag {
    initialized: bool,
    node_id: Option<NodeId>,
    value: UaVariant,
    cell: Arc<TagCell>,
}

impl OpcUaTag {
    fn new(cell: Arc<TagCell>) -> Self {
        Self {
            initialized: false,
            node_id: None,
            value: UaVariant::Empty,
            cell,
        }
    }

    /// Whether the node id has been derived
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The node id, once derived
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Typed container holding the last value read or marshalled
    pub fn value(&self) -> &UaVariant {
        &self.value
    }
}

/// Worker-side state of an OPC UA tag group
pub struct OpcUaGroup {
    group: String,
    endpoint: String,
    namespace: u16,
    session: Option<Box<dyn OpcUaSession>>,
    tags: BTreeMap<String, OpcUaTag>,
}

impl std::fmt::Debug for OpcUaGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcUaGroup")
            .field("group", &self.group)
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("connected", &self.session.is_some())
            .field("tags", &self.tags)
            .finish()
    }
}

impl OpcUaGroup {
    /// Create the group state from its registration
    pub fn new(group: &str, spec: &GroupSpec) -> Self {
        let namespace = spec.path.trim().parse::<u16>().unwrap_or_else(|_| {
            tracing::warn!(
                "Tag group {} has non-numeric namespace '{}', using 0",
                group,
                spec.path
            );
            0
        });
        Self {
            group: group.to_string(),
            endpoint: spec.gateway.clone(),
            namespace,
            session: None,
            tags: BTreeMap::new(),
        }
    }

    /// Namespace index used for every node id of the group
    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    /// Whether a session object currently exists
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Look up a tag's worker-side state
    pub fn tag(&self, name: &str) -> Option<&OpcUaTag> {
        self.tags.get(name)
    }

    /// Pick up tags registered since the last pass
    pub fn sync_tags(&mut self, entry: &GroupEntry) {
        for (name, cell) in entry.tags() {
            self.tags.entry(name).or_insert_with(|| OpcUaTag::new(cell));
        }
    }

    fn ensure_connected(&mut self, connector: &mut dyn OpcUaConnector) -> Result<&mut Box<dyn OpcUaSession>> {
        if self.session.is_none() {
            let session = connector
                .connect(&self.endpoint)
                .map_err(|status| CommsError::OpcUaConnect {
                    endpoint: self.endpoint.clone(),
                    status,
                })?;
            tracing::debug!("OPC UA session opened for {} at {}", self.group, self.endpoint);
            self.session = Some(session);
        }

        let status = match self.session.as_ref() {
            Some(session) => session.state(),
            None => UaStatusCode::BAD_NOT_CONNECTED,
        };
        if !status.is_good() {
            if let Some(mut session) = self.session.take() {
                session.disconnect();
            }
            return Err(CommsError::NotConnected {
                group: self.group.clone(),
                status,
            });
        }

        self.session.as_mut().ok_or_else(|| CommsError::NotConnected {
            group: self.group.clone(),
            status,
        })
    }

    /// Connect if needed, then read every tag
    ///
    /// A failing tag is recorded in the returned pass and does not stop the
    /// remaining tags; a connection problem fails the whole pass.
    pub fn read_all(&mut self, connector: &mut dyn OpcUaConnector, ctx: &PassContext<'_>) -> Result<ReadPass> {
        let namespace = self.namespace;
        let mut pass = ReadPass::default();

        self.ensure_connected(connector)?;
        let Some(session) = self.session.as_mut() else {
            return Err(CommsError::NotConnected {
                group: self.group.clone(),
                status: UaStatusCode::BAD_NOT_CONNECTED,
            });
        };

        for (name, tag) in self.tags.iter_mut() {
            if !tag.initialized {
                tag.value = UaVariant::Empty;
                tag.node_id = Some(NodeId::string(namespace, name.clone()));
                tag.initialized = true;
            }

            let Some(node) = tag.node_id.as_ref() else {
                continue;
            };

            match session.read_value(node) {
                Ok(value) => {
                    tag.cell.store(CachedValue::Variant(value.clone()));
                    tag.value = value;
                    if tag.cell.mark_initialized() {
                        ctx.entry.note_tag_initialized();
                    }
                    pass.tags_read += 1;
                }
                Err(status) => pass.failures.push(CommsError::OpcUaRead {
                    tag: name.clone(),
                    status,
                }),
            }
        }

        Ok(pass)
    }

    /// Marshal a value into the tag's container and write it
    pub fn write_one(&mut self, ctx: &PassContext<'_>, tag_name: &str, value: ScalarValue) -> Result<WriteOutcome> {
        let tag = self.tags.get_mut(tag_name).ok_or_else(|| CommsError::UnknownTag {
            group: ctx.entry.name().to_string(),
            tag: tag_name.to_string(),
        })?;

        // Nothing to marshal into before the first successful read
        let Some(node) = tag.node_id.clone().filter(|_| tag.initialized) else {
            tracing::debug!(tag = tag_name, "OPC UA tag not initialized, write skipped");
            return Ok(WriteOutcome::Skipped);
        };

        let marshalled = UaVariant::from_scalar_like(value, &tag.value);
        if !tag.value.is_empty() && !tag.value.same_type(&marshalled) {
            return Err(CommsError::TypeMismatch {
                tag: tag_name.to_string(),
                expected: value.kind(),
                actual: tag.value.type_name().to_string(),
            });
        }

        let Some(session) = self.session.as_mut() else {
            return Err(CommsError::NotConnected {
                group: self.group.clone(),
                status: UaStatusCode::BAD_NOT_CONNECTED,
            });
        };
        let status = session.state();
        if !status.is_good() {
            return Err(CommsError::NotConnected {
                group: self.group.clone(),
                status,
            });
        }

        tag.value = marshalled;
        session
            .write_value(&node, &tag.value)
            .map_err(|status| CommsError::OpcUaWrite {
                tag: tag_name.to_string(),
                status,
            })?;

        Ok(WriteOutcome::Applied)
    }

    /// Release every container and the session; reset counters
    pub fn teardown(&mut self, entry: &GroupEntry) {
        for tag in self.tags.values_mut() {
            tag.value = UaVariant::Empty;
            tag.node_id = None;
            tag.initialized = false;
            tag.cell.reset();
        }
        if let Some(mut session) = self.session.take() {
            session.disconnect();
        }
        entry.reset_initialized_tags();
    }
}
