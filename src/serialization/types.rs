//! Data type definitions
//!
//! A [`DataType`] is the self-describing tag written in front of every value.

use std::fmt;

use bytes::BufMut;

use super::buffer::{put_string, Chopper};
use super::codec::MAX_DECODE_DEPTH;
use super::CodecError;

/// Primary kind identifiers on the wire
pub mod tags {
    pub const UNKNOWN: u8 = 0x00;
    pub const INT32: u8 = 0x01;
    pub const INT64: u8 = 0x02;
    pub const DOUBLE: u8 = 0x03;
    pub const BOOL: u8 = 0x04;
    pub const STRING: u8 = 0x05;
    pub const BYTE_ARRAY: u8 = 0x06;
    pub const STRUCTURE: u8 = 0x0B;
    pub const LIST: u8 = 0x0C;
    pub const OBJECT_HANDLE: u8 = 0x0D;
    pub const INLINE_OBJECT: u8 = 0x0E;
    pub const VOID: u8 = 0x64;
}

/// Shape of a value: a primitive kind or a composite kind.
///
/// Equality is structural. Two list types are equal when their element types
/// are equal; two structure or handle types are equal when their names are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Unknown,
    Int32,
    Int64,
    Double,
    Bool,
    String,
    ByteArray,
    Void,
    /// Named structure resolved through the structure factory
    Structure(String),
    /// Homogeneous list; the element tag is written once for the whole list
    List(Box<DataType>),
    /// Reference to a remote object, resolved through the handle factory
    ObjectHandle(String),
    /// Object passed by identifier in place, resolved like a handle
    InlineObject(String),
}

impl DataType {
    pub fn list_of(element: DataType) -> Self {
        DataType::List(Box::new(element))
    }

    pub fn structure(name: impl Into<String>) -> Self {
        DataType::Structure(name.into())
    }

    pub fn object_handle(name: impl Into<String>) -> Self {
        DataType::ObjectHandle(name.into())
    }

    /// The one-byte primary kind
    pub fn primary_tag(&self) -> u8 {
        match self {
            DataType::Unknown => tags::UNKNOWN,
            DataType::Int32 => tags::INT32,
            DataType::Int64 => tags::INT64,
            DataType::Double => tags::DOUBLE,
            DataType::Bool => tags::BOOL,
            DataType::String => tags::STRING,
            DataType::ByteArray => tags::BYTE_ARRAY,
            DataType::Void => tags::VOID,
            DataType::Structure(_) => tags::STRUCTURE,
            DataType::List(_) => tags::LIST,
            DataType::ObjectHandle(_) => tags::OBJECT_HANDLE,
            DataType::InlineObject(_) => tags::INLINE_OBJECT,
        }
    }

    /// Write the tag: primary byte, then the secondary name or nested element tag
    pub fn write_to<B: BufMut>(&self, buf: &mut B) -> Result<(), CodecError> {
        buf.put_u8(self.primary_tag());
        match self {
            DataType::Structure(name)
            | DataType::ObjectHandle(name)
            | DataType::InlineObject(name) => put_string(buf, name),
            DataType::List(element) => element.write_to(buf),
            _ => Ok(()),
        }
    }

    /// Read a tag. List prefixes are counted iteratively and capped at
    /// [`MAX_DECODE_DEPTH`].
    pub fn read_from(chopper: &mut Chopper<'_>) -> Result<Self, CodecError> {
        let mut lists = 0;
        let mut tag = chopper.read_u8()?;
        while tag == tags::LIST {
            lists += 1;
            if lists > MAX_DECODE_DEPTH {
                return Err(CodecError::TooDeep(MAX_DECODE_DEPTH));
            }
            tag = chopper.read_u8()?;
        }

        let mut data_type = match tag {
            tags::UNKNOWN => DataType::Unknown,
            tags::INT32 => DataType::Int32,
            tags::INT64 => DataType::Int64,
            tags::DOUBLE => DataType::Double,
            tags::BOOL => DataType::Bool,
            tags::STRING => DataType::String,
            tags::BYTE_ARRAY => DataType::ByteArray,
            tags::VOID => DataType::Void,
            tags::STRUCTURE => DataType::Structure(chopper.read_string()?),
            tags::OBJECT_HANDLE => DataType::ObjectHandle(chopper.read_string()?),
            tags::INLINE_OBJECT => DataType::InlineObject(chopper.read_string()?),
            other => return Err(CodecError::UnknownTypeTag(other)),
        };
        for _ in 0..lists {
            data_type = DataType::list_of(data_type);
        }
        Ok(data_type)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Unknown => write!(f, "unknown"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Double => write!(f, "double"),
            DataType::Bool => write!(f, "bool"),
            DataType::String => write!(f, "string"),
            DataType::ByteArray => write!(f, "byte-array"),
            DataType::Void => write!(f, "void"),
            DataType::Structure(name) => write!(f, "structure<{}>", name),
            DataType::List(element) => write!(f, "list<{}>", element),
            DataType::ObjectHandle(name) => write!(f, "handle<{}>", name),
            DataType::InlineObject(name) => write!(f, "inline<{}>", name),
        }
    }
}
