//! Serialization module - Byte codec and self-describing typed values
//!
//! Provides:
//! - Fixed-width big-endian primitives and the [`Chopper`] cursor reader
//! - [`DataType`] tags and the [`Value`] model
//! - [`ValueCodec`], which writes `[tag][validity][value]` and resolves named
//!   structures and handles through an injected [`TypeRegistry`]

mod buffer;
mod codec;
mod registry;
mod types;
mod value;

pub use buffer::*;
pub use codec::*;
pub use registry::*;
pub use types::*;
pub use value::*;

use thiserror::Error;

/// Serialization faults. Fatal to the single message being processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Trailing bytes after value: {0}")]
    TrailingBytes(usize),

    #[error("Invalid boolean byte: {0:#04x}")]
    InvalidBool(u8),

    #[error("Invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("Unknown type tag: {0:#04x}")]
    UnknownTypeTag(u8),

    #[error("Invalid validity byte: {0:#04x}")]
    InvalidValidity(u8),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Required field {field} of structure '{structure}' is not set")]
    MissingField { structure: String, field: u32 },

    #[error("Length {0} does not fit the 4-byte length prefix")]
    TooLong(usize),

    #[error("Circular reference through structure '{0}'")]
    CircularReference(String),

    #[error("Unregistered object handle type: {0}")]
    UnregisteredHandle(String),

    #[error("Value nesting deeper than {0}")]
    TooDeep(usize),

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),
}
