//! Core data types for the tag communication engine
//!
//! This module contains the fundamental data structures shared by the
//! registry, the protocol backends and the public entry points.
//!
//! # Main Types
//!
//! - [`ScalarKind`] - The eleven supported scalar kinds and their instruction codes
//! - [`ScalarValue`] - A value of one of those kinds (closed tagged union)
//! - [`Scalar`] - Maps Rust primitives onto kinds for the generic read/write API
//! - [`DynamicValue`] - Loosely-typed input coming from a scripting layer
//! - [`Protocol`] / [`GroupSpec`] - How a tag group reaches its endpoint
//!
//! # Byte Layout
//!
//! PLC tag buffers are little-endian. A bit lives in bit 0 of the first byte,
//! every other kind occupies its natural width starting at offset 0.

use serde::{Deserialize, Serialize};

/// One of the eleven scalar kinds a tag can be read or written as
///
/// The discriminant is the write instruction code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// Single bit / boolean
    Bit = 0,
    /// 64-bit unsigned integer
    U64 = 1,
    /// 64-bit signed integer
    I64 = 2,
    /// 32-bit unsigned integer
    U32 = 3,
    /// 32-bit signed integer
    I32 = 4,
    /// 16-bit unsigned integer
    U16 = 5,
    /// 16-bit signed integer
    I16 = 6,
    /// 8-bit unsigned integer
    U8 = 7,
    /// 8-bit signed integer
    I8 = 8,
    /// 64-bit floating point
    F64 = 9,
    /// 32-bit floating point
    F32 = 10,
}

impl ScalarKind {
    /// Every kind, in instruction code order
    pub const ALL: [ScalarKind; 11] = [
        ScalarKind::Bit,
        ScalarKind::U64,
        ScalarKind::I64,
        ScalarKind::U32,
        ScalarKind::I32,
        ScalarKind::U16,
        ScalarKind::I16,
        ScalarKind::U8,
        ScalarKind::I8,
        ScalarKind::F64,
        ScalarKind::F32,
    ];

    /// The write instruction code of this kind
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look a kind up by its instruction code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Returns the size in bytes of this kind inside a tag buffer
    pub fn size_bytes(self) -> usize {
        match self {
            ScalarKind::Bit | ScalarKind::U8 | ScalarKind::I8 => 1,
            ScalarKind::U16 | ScalarKind::I16 => 2,
            ScalarKind::U32 | ScalarKind::I32 | ScalarKind::F32 => 4,
            ScalarKind::U64 | ScalarKind::I64 | ScalarKind::F64 => 8,
        }
    }

    /// The value returned when nothing valid has been read
    pub fn default_value(self) -> ScalarValue {
        match self {
            ScalarKind::Bit => ScalarValue::Bit(false),
            ScalarKind::U64 => ScalarValue::U64(0),
            ScalarKind::I64 => ScalarValue::I64(0),
            ScalarKind::U32 => ScalarValue::U32(0),
            ScalarKind::I32 => ScalarValue::I32(0),
            ScalarKind::U16 => ScalarValue::U16(0),
            ScalarKind::I16 => ScalarValue::I16(0),
            ScalarKind::U8 => ScalarValue::U8(0),
            ScalarKind::I8 => ScalarValue::I8(0),
            ScalarKind::F64 => ScalarValue::F64(0.0),
            ScalarKind::F32 => ScalarValue::F32(0.0),
        }
    }

    /// Decode a little-endian tag buffer into a value of this kind
    ///
    /// Returns `None` when the buffer is shorter than the kind.
    pub fn decode_le(self, bytes: &[u8]) -> Option<ScalarValue> {
        if bytes.len() < self.size_bytes() {
            return None;
        }

        Some(match self {
            ScalarKind::Bit => ScalarValue::Bit(bytes[0] & 0x01 != 0),
            ScalarKind::U8 => ScalarValue::U8(bytes[0]),
            ScalarKind::I8 => ScalarValue::I8(bytes[0] as i8),
            ScalarKind::U16 => ScalarValue::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
            ScalarKind::I16 => ScalarValue::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
            ScalarKind::U32 => {
                ScalarValue::U32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ScalarKind::I32 => {
                ScalarValue::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ScalarKind::F32 => {
                ScalarValue::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ScalarKind::U64 => ScalarValue::U64(u64::from_le_bytes(word(bytes))),
            ScalarKind::I64 => ScalarValue::I64(i64::from_le_bytes(word(bytes))),
            ScalarKind::F64 => ScalarValue::F64(f64::from_le_bytes(word(bytes))),
        })
    }
}

fn word(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

impl std::fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScalarKind::Bit => "bit",
            ScalarKind::U64 => "uint64",
            ScalarKind::I64 => "int64",
            ScalarKind::U32 => "uint32",
            ScalarKind::I32 => "int32",
            ScalarKind::U16 => "uint16",
            ScalarKind::I16 => "int16",
            ScalarKind::U8 => "uint8",
            ScalarKind::I8 => "int8",
            ScalarKind::F64 => "float64",
            ScalarKind::F32 => "float32",
        };
        f.write_str(name)
    }
}

/// A scalar value tagged with its kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    Bit(bool),
    U64(u64),
    I64(i64),
    U32(u32),
    I32(i32),
    U16(u16),
    I16(i16),
    U8(u8),
    I8(i8),
    F64(f64),
    F32(f32),
}

impl ScalarValue {
    /// The kind of this value
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Bit(_) => ScalarKind::Bit,
            ScalarValue::U64(_) => ScalarKind::U64,
            ScalarValue::I64(_) => ScalarKind::I64,
            ScalarValue::U32(_) => ScalarKind::U32,
            ScalarValue::I32(_) => ScalarKind::I32,
            ScalarValue::U16(_) => ScalarKind::U16,
            ScalarValue::I16(_) => ScalarKind::I16,
            ScalarValue::U8(_) => ScalarKind::U8,
            ScalarValue::I8(_) => ScalarKind::I8,
            ScalarValue::F64(_) => ScalarKind::F64,
            ScalarValue::F32(_) => ScalarKind::F32,
        }
    }

    /// Little-endian encoding at the kind's natural width
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            ScalarValue::Bit(v) => vec![v as u8],
            ScalarValue::U64(v) => v.to_le_bytes().to_vec(),
            ScalarValue::I64(v) => v.to_le_bytes().to_vec(),
            ScalarValue::U32(v) => v.to_le_bytes().to_vec(),
            ScalarValue::I32(v) => v.to_le_bytes().to_vec(),
            ScalarValue::U16(v) => v.to_le_bytes().to_vec(),
            ScalarValue::I16(v) => v.to_le_bytes().to_vec(),
            ScalarValue::U8(v) => vec![v],
            ScalarValue::I8(v) => vec![v as u8],
            ScalarValue::F64(v) => v.to_le_bytes().to_vec(),
            ScalarValue::F32(v) => v.to_le_bytes().to_vec(),
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Bit(v) => write!(f, "{}", v),
            ScalarValue::U64(v) => write!(f, "{}", v),
            ScalarValue::I64(v) => write!(f, "{}", v),
            ScalarValue::U32(v) => write!(f, "{}", v),
            ScalarValue::I32(v) => write!(f, "{}", v),
            ScalarValue::U16(v) => write!(f, "{}", v),
            ScalarValue::I16(v) => write!(f, "{}", v),
            ScalarValue::U8(v) => write!(f, "{}", v),
            ScalarValue::I8(v) => write!(f, "{}", v),
            ScalarValue::F64(v) => write!(f, "{}", v),
            ScalarValue::F32(v) => write!(f, "{}", v),
        }
    }
}

/// A Rust primitive that maps onto exactly one [`ScalarKind`]
pub trait Scalar: Copy + Default + Send + 'static {
    /// The kind this primitive is read and written as
    const KIND: ScalarKind;

    /// Wrap into a tagged value
    fn into_value(self) -> ScalarValue;

    /// Unwrap a tagged value of the same kind
    fn from_value(value: ScalarValue) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($ty:ty, $kind:ident) => {
        impl Scalar for $ty {
            const KIND: ScalarKind = ScalarKind::$kind;

            fn into_value(self) -> ScalarValue {
                ScalarValue::$kind(self)
            }

            fn from_value(value: ScalarValue) -> Option<Self> {
                match value {
                    ScalarValue::$kind(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_scalar!(bool, Bit);
impl_scalar!(u64, U64);
impl_scalar!(i64, I64);
impl_scalar!(u32, U32);
impl_scalar!(i32, I32);
impl_scalar!(u16, U16);
impl_scalar!(i16, I16);
impl_scalar!(u8, U8);
impl_scalar!(i8, I8);
impl_scalar!(f64, F64);
impl_scalar!(f32, F32);

/// Loosely-typed value handed over by a scripting or binding layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DynamicValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl DynamicValue {
    /// Name of the runtime type, used in mismatch reports
    pub fn type_name(&self) -> &'static str {
        match self {
            DynamicValue::Nil => "Nil",
            DynamicValue::Bool(_) => "Bool",
            DynamicValue::Int(_) => "Int",
            DynamicValue::Float(_) => "Float",
            DynamicValue::Str(_) => "String",
        }
    }

    /// Convert into a value of `kind`
    ///
    /// Booleans only satisfy [`ScalarKind::Bit`], integers only the integer
    /// kinds (and must fit), floats only the float kinds.
    pub fn coerce(&self, kind: ScalarKind) -> Option<ScalarValue> {
        match (kind, self) {
            (ScalarKind::Bit, DynamicValue::Bool(v)) => Some(ScalarValue::Bit(*v)),
            (ScalarKind::U64, DynamicValue::Int(v)) => u64::try_from(*v).ok().map(ScalarValue::U64),
            (ScalarKind::I64, DynamicValue::Int(v)) => Some(ScalarValue::I64(*v)),
            (ScalarKind::U32, DynamicValue::Int(v)) => u32::try_from(*v).ok().map(ScalarValue::U32),
            (ScalarKind::I32, DynamicValue::Int(v)) => i32::try_from(*v).ok().map(ScalarValue::I32),
            (ScalarKind::U16, DynamicValue::Int(v)) => u16::try_from(*v).ok().map(ScalarValue::U16),
            (ScalarKind::I16, DynamicValue::Int(v)) => i16::try_from(*v).ok().map(ScalarValue::I16),
            (ScalarKind::U8, DynamicValue::Int(v)) => u8::try_from(*v).ok().map(ScalarValue::U8),
            (ScalarKind::I8, DynamicValue::Int(v)) => i8::try_from(*v).ok().map(ScalarValue::I8),
            (ScalarKind::F64, DynamicValue::Float(v)) => Some(ScalarValue::F64(*v)),
            (ScalarKind::F32, DynamicValue::Float(v)) => Some(ScalarValue::F32(*v as f32)),
            _ => None,
        }
    }
}

/// How a tag group talks to its endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// A PLC family understood by the tag-handle library (e.g. `ab_eip`)
    Plc(String),
    /// An OPC UA server reached through a client session
    OpcUa,
}

impl Protocol {
    /// Parse the protocol string used at registration
    ///
    /// `opc_ua` (and the spellings `opc-ua`, `opcua`) select OPC UA; anything
    /// else is passed to the PLC library verbatim.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "opc_ua" | "opc-ua" | "opcua" => Protocol::OpcUa,
            _ => Protocol::Plc(s.trim().to_string()),
        }
    }

    /// Check if this is an OPC UA group
    pub fn is_opc_ua(&self) -> bool {
        matches!(self, Protocol::OpcUa)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Plc(family) => f.write_str(family),
            Protocol::OpcUa => f.write_str("opc_ua"),
        }
    }
}

/// Connection settings of a tag group, as given at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Protocol backing every tag of the group
    pub protocol: Protocol,
    /// Gateway address or OPC UA endpoint URL
    pub gateway: String,
    /// Rack/slot path, or the OPC UA namespace index
    pub path: String,
    /// Controller model; ignored by OPC UA
    pub cpu: String,
    /// Polling interval in milliseconds
    pub polling_interval_ms: u64,
}

impl GroupSpec {
    /// Create a new group spec
    pub fn new(
        protocol: Protocol,
        gateway: impl Into<String>,
        path: impl Into<String>,
        cpu: impl Into<String>,
        polling_interval_ms: u64,
    ) -> Self {
        Self {
            protocol,
            gateway: gateway.into(),
            path: path.into(),
            cpu: cpu.into(),
            polling_interval_ms,
        }
    }
}
