//! Cursor over a voice packet payload
//!
//! Reads the single-byte headers and Mumble-style variable-length integers
//! that frame voice subframes. Every read is bounds checked; running off the
//! end of the payload is reported as [`FramingError::Overrun`] instead of the
//! silently-invalid stream flag older clients relied on.

use bytes::BufMut;
use std::ops::Range;

use crate::error::FramingError;

/// Read cursor over an immutable payload
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn ensure(&self, needed: usize) -> Result<(), FramingError> {
        if self.remaining() < needed {
            return Err(FramingError::Overrun {
                offset: self.offset,
                needed,
            });
        }
        Ok(())
    }

    /// Read one byte
    pub fn next_byte(&mut self) -> Result<u8, FramingError> {
        self.ensure(1)?;
        let byte = self.data[self.offset];
        self.offset += 1;
        Ok(byte)
    }

    /// Claim the next `len` bytes and return their position in the payload
    pub fn block(&mut self, len: usize) -> Result<Range<usize>, FramingError> {
        self.ensure(len)?;
        let start = self.offset;
        self.offset += len;
        Ok(start..self.offset)
    }

    fn read_be(&mut self, bytes: usize) -> Result<u64, FramingError> {
        self.ensure(bytes)?;
        let mut value = 0u64;
        for _ in 0..bytes {
            value = (value << 8) | u64::from(self.next_byte()?);
        }
        Ok(value)
    }

    /// Read a variable-length integer.
    ///
    /// The prefix of the first byte selects the width:
    ///
    /// | prefix      | value                               |
    /// |-------------|-------------------------------------|
    /// | `0xxxxxxx`  | 7-bit                               |
    /// | `10xxxxxx`  | 14-bit, one more byte               |
    /// | `110xxxxx`  | 21-bit, two more bytes              |
    /// | `1110xxxx`  | 28-bit, three more bytes            |
    /// | `111100__`  | 32-bit, four more bytes             |
    /// | `111101__`  | 64-bit, eight more bytes            |
    /// | `111110__`  | negated varint follows              |
    /// | `111111xx`  | inverted two-bit value              |
    ///
    /// Negative values come back in two's complement. A negated varint may
    /// not itself be negated.
    pub fn read_varint(&mut self) -> Result<u64, FramingError> {
        self.read_varint_inner(true)
    }

    fn read_varint_inner(&mut self, allow_negation: bool) -> Result<u64, FramingError> {
        let start = self.offset;
        let v = u64::from(self.next_byte()?);

        if v & 0x80 == 0x00 {
            Ok(v & 0x7f)
        } else if v & 0xc0 == 0x80 {
            Ok(((v & 0x3f) << 8) | self.read_be(1)?)
        } else if v & 0xf0 == 0xf0 {
            match v & 0xfc {
                0xf0 => self.read_be(4),
                0xf4 => self.read_be(8),
                0xf8 if allow_negation => Ok(!self.read_varint_inner(false)?),
                0xf8 => Err(FramingError::NestedNegation { offset: start }),
                _ => Ok(!(v & 0x03)),
            }
        } else if v & 0xf0 == 0xe0 {
            Ok(((v & 0x0f) << 24) | self.read_be(3)?)
        } else {
            Ok(((v & 0x1f) << 16) | self.read_be(2)?)
        }
    }
}

/// Append a non-negative variable-length integer in the format
/// [`PacketReader::read_varint`] understands.
pub fn put_varint<B: BufMut>(buf: &mut B, value: u64) {
    if value < 0x80 {
        buf.put_u8(value as u8);
    } else if value < 0x4000 {
        buf.put_u8(((value >> 8) as u8) | 0x80);
        buf.put_u8(value as u8);
    } else if value < 0x20_0000 {
        buf.put_u8(((value >> 16) as u8) | 0xc0);
        buf.put_u16(value as u16);
    } else if value < 0x1000_0000 {
        buf.put_u8(((value >> 24) as u8) | 0xe0);
        buf.put_u8((value >> 16) as u8);
        buf.put_u16(value as u16);
    } else if value <= u64::from(u32::MAX) {
        buf.put_u8(0xf0);
        buf.put_u32(value as u32);
    } else {
        buf.put_u8(0xf4);
        buf.put_u64(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    #[test]
    fn test_short_varints() {
        let mut reader = PacketReader::new(&[0x05, 0x81, 0x02, 0xfd]);
        assert_eq!(reader.read_varint().unwrap(), 5);
        assert_eq!(reader.read_varint().unwrap(), 0x0102);
        // 111111xx: inverted two-bit value, ~1 == -2
        assert_eq!(reader.read_varint().unwrap() as i64, -2);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncated_varint_is_overrun() {
        let mut reader = PacketReader::new(&[0xe0, 0x01]);
        assert!(matches!(
            reader.read_varint(),
            Err(FramingError::Overrun { .. })
        ));
    }

    #[test]
    fn test_block_bounds() {
        let data = [1u8, 2, 3, 4];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.next_byte().unwrap(), 1);
        assert_eq!(reader.block(2).unwrap(), 1..3);
        assert!(reader.block(2).is_err());
        assert_eq!(reader.offset(), 3);
    }

    #[test]
    fn test_single_negation() {
        let mut reader = PacketReader::new(&[0xf8, 0x05]);
        assert_eq!(reader.read_varint().unwrap(), !5);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_nested_negation_is_rejected() {
        let mut reader = PacketReader::new(&[0xf8, 0xf8, 0x01]);
        assert!(matches!(
            reader.read_varint(),
            Err(FramingError::NestedNegation { offset: 1 })
        ));
    }

    #[test]
    fn test_long_negation_run_stops_at_second_prefix() {
        let data = vec![0xf8u8; 100_000];
        let mut reader = PacketReader::new(&data);
        assert!(reader.read_varint().is_err());
        assert_eq!(reader.offset(), 2);
    }

    proptest! {
        #[test]
        fn varint_reads_back_what_was_written(value in any::<u64>()) {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            let mut reader = PacketReader::new(&buf);
            prop_assert_eq!(reader.read_varint().unwrap(), value);
            prop_assert_eq!(reader.remaining(), 0);
        }
    }
}
