//! Protocol module - Defines the ORC message protocol
//!
//! Every message travels in one data frame:
//! - 1 byte message type
//! - 4 bytes sequence number (big-endian, same as the frame's)
//! - Message body, fixed per type

mod call;
mod codec;
mod message;

pub use call::*;
pub use codec::*;
pub use message::*;

/// Default port of an ORC application server
pub const DEFAULT_PORT: u16 = 7520;
