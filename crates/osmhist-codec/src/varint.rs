//! Variable-length integers.
//!
//! Unsigned values use 7 bits per byte, least significant group first, with
//! the high bit set on every byte but the last. Signed values are zigzag
//! mapped first so small magnitudes of either sign stay short.

use crate::error::{CodecError, CodecResult};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Map a signed value onto an unsigned one: 0, -1, 1, -2, ... → 0, 1, 2, 3, ...
#[inline]
#[must_use]
pub const fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag`].
#[inline]
#[must_use]
pub const fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Write a signed value with zigzag mapping.
pub fn write_varint(out: &mut Vec<u8>, value: i64) {
    write_uvarint(out, zigzag(value));
}

/// Cursor over a byte slice that reports positions in its errors.
#[derive(Clone, Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Start reading at `pos` instead of the beginning.
    #[must_use]
    pub const fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_uvarint(&mut self) -> CodecResult<u64> {
        let start = self.pos;
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            // the tenth byte only has room for the top bit
            if shift == 63 && byte > 1 {
                return Err(CodecError::VarIntTooLong { offset: start });
            }
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 64 {
                return Err(CodecError::VarIntTooLong { offset: start });
            }
        }
        Ok(result)
    }

    /// Read a zigzag-mapped signed value.
    pub fn read_varint(&mut self) -> CodecResult<i64> {
        self.read_uvarint().map(unzigzag)
    }

    /// Read an unsigned value that must fit in a `u32`.
    pub fn read_u32_varint(&mut self, field: &'static str) -> CodecResult<u32> {
        let value = self.read_uvarint()?;
        u32::try_from(value).map_err(|_| CodecError::OutOfRange {
            field,
            value: value as i64,
        })
    }

    /// Borrow the next `len` bytes.
    pub fn read_slice(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(CodecError::Truncated { offset: self.buf.len() })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}
