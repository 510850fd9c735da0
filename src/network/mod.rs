//! Network module - Frame transport over bidirectional streams
//!
//! Provides:
//! - The 12-byte frame header and [`SequenceGenerator`]
//! - [`FrameReader`] / [`FrameWriter`] halves of a framed connection
//! - The [`Connector`] seam and its TCP implementation

mod connection;
mod frame;

pub use connection::*;
pub use frame::*;

use thiserror::Error;

/// Transport faults. The connection that produced one must be treated as dead.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Connection closed after {received} of {expected} content bytes")]
    Truncated { expected: usize, received: usize },

    #[error("Invalid magic bytes: {0:02x?}")]
    InvalidMagic([u8; 2]),

    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Stream accepted zero bytes")]
    ZeroWrite,

    #[error("Failed to connect to {remote}: {source}")]
    ConnectFailed {
        remote: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("Socket already disconnected")]
    Disconnected,
}

pub type TransportResult<T> = Result<T, TransportError>;
