//! Frame format and sequence numbering
//!
//! Header (12 bytes, big-endian integers):
//! `[0x46][0x54][type][reserved][sequence: i32][content length: i32]`

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

use super::TransportError;

/// Magic bytes opening every frame ("FT")
pub const FRAME_MAGIC: [u8; 2] = [0x46, 0x54];

/// Fixed header size
pub const FRAME_HEADER_SIZE: usize = 12;

/// Default upper bound for sequence numbers
pub const DEFAULT_SEQUENCE_MAX: u32 = i32::MAX as u32;

/// Frame type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Carries a protocol message
    Data = 0x01,
    /// Liveness probe; dropped by the receiver
    Probe = 0x02,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Result<Self, TransportError> {
        match byte {
            0x01 => Ok(FrameType::Data),
            0x02 => Ok(FrameType::Probe),
            other => Err(TransportError::UnknownFrameType(other)),
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub sequence: u32,
    pub content_length: u32,
}

impl FrameHeader {
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u8(self.frame_type as u8);
        buf.put_u8(0x00);
        buf.put_u32(self.sequence);
        buf.put_u32(self.content_length);
    }

    /// Parse a header, rejecting anything not opened by the magic pair
    pub fn parse(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, TransportError> {
        if bytes[0..2] != FRAME_MAGIC {
            return Err(TransportError::InvalidMagic([bytes[0], bytes[1]]));
        }

        let frame_type = FrameType::from_byte(bytes[2])?;
        let sequence = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let content_length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        Ok(Self {
            frame_type,
            sequence,
            content_length,
        })
    }
}

/// Smallest unit exchanged on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub sequence: u32,
    pub content: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, sequence: u32, content: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            sequence,
            content: content.into(),
        }
    }

    pub fn data(sequence: u32, content: impl Into<Bytes>) -> Self {
        Self::new(FrameType::Data, sequence, content)
    }

    pub fn probe(sequence: u32) -> Self {
        Self::new(FrameType::Probe, sequence, Bytes::new())
    }

    /// Fails when the content does not fit the 4-byte length field
    pub fn header(&self) -> Result<FrameHeader, TransportError> {
        Ok(FrameHeader {
            frame_type: self.frame_type,
            sequence: self.sequence,
            content_length: content_length(self.content.len())?,
        })
    }

    /// Header followed by content
    pub fn encode(&self) -> Result<BytesMut, TransportError> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.content.len());
        header.write_to(&mut buf);
        buf.put_slice(&self.content);
        Ok(buf)
    }
}

fn content_length(len: usize) -> Result<u32, TransportError> {
    u32::try_from(len).map_err(|_| TransportError::FrameTooLarge(len, u32::MAX as usize))
}

/// Thread-safe generator emitting `1, 2, ..., max, 1, 2, ...`; never 0.
#[derive(Debug)]
pub struct SequenceGenerator {
    current: AtomicU32,
    max: u32,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::with_max(DEFAULT_SEQUENCE_MAX)
    }

    pub fn with_max(max: u32) -> Self {
        Self {
            current: AtomicU32::new(0),
            max: max.max(1),
        }
    }

    pub fn next(&self) -> u32 {
        let max = self.max;
        let step = |current: u32| if current >= max { 1 } else { current + 1 };
        // The closure never returns None, so both arms carry the previous value.
        match self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| Some(step(current)))
        {
            Ok(previous) | Err(previous) => step(previous),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
