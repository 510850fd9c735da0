//! Byte codec
//!
//! Fixed-width, big-endian primitives and length-prefixed buffers.
//! Writing goes through [`bytes::BufMut`]; reading goes through [`Chopper`],
//! a cursor that consumes a fixed number of bytes per read and fails on
//! underflow instead of panicking.

use bytes::BufMut;

use super::CodecError;

/// Boolean wire values
const TRUE_BYTE: u8 = 0x01;
const FALSE_BYTE: u8 = 0x00;

/// Append a boolean as a single byte
pub fn put_bool<B: BufMut>(buf: &mut B, value: bool) {
    buf.put_u8(if value { TRUE_BYTE } else { FALSE_BYTE });
}

/// Append a 4-byte big-endian length or element count
pub fn put_length<B: BufMut>(buf: &mut B, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len).map_err(|_| CodecError::TooLong(len))?;
    buf.put_u32(len);
    Ok(())
}

/// Append a length-prefixed byte array (4-byte big-endian length + bytes)
pub fn put_byte_array<B: BufMut>(buf: &mut B, value: &[u8]) -> Result<(), CodecError> {
    put_length(buf, value.len())?;
    buf.put_slice(value);
    Ok(())
}

/// Append a length-prefixed UTF-8 string
pub fn put_string<B: BufMut>(buf: &mut B, value: &str) -> Result<(), CodecError> {
    put_byte_array(buf, value.as_bytes())
}

/// Cursor-based reader over a borrowed byte slice.
///
/// Every read checks the remaining length first; reading past the end yields
/// [`CodecError::Truncated`] and leaves the offset untouched.
#[derive(Debug, Clone)]
pub struct Chopper<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Chopper<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Current read offset
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to consume
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume exactly `count` bytes
    pub fn chop(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if count > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    fn chop_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.chop(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.chop_array::<1>()?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.chop_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.chop_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.chop_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.chop_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            FALSE_BYTE => Ok(false),
            TRUE_BYTE => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    /// Read a length-prefixed byte array, borrowing from the input
    pub fn read_byte_slice(&mut self) -> Result<&'a [u8], CodecError> {
        let length = self.read_u32()? as usize;
        self.chop(length)
    }

    pub fn read_byte_array(&mut self) -> Result<Vec<u8>, CodecError> {
        Ok(self.read_byte_slice()?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let raw = self.read_byte_slice()?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Fail unless every byte has been consumed
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes(self.remaining()))
        }
    }
}
