//! Unsigned LEB128-style varint codec.
//!
//! Seven data bits per byte, continuation bit (`0x80`) on every byte but
//! the last. A `u64` needs at most 10 bytes.

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Longest possible encoding of a `u64`.
pub const MAX_LEN: usize = 10;

/// Number of bytes `write` will produce for `value`.
#[must_use]
pub fn size_of(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append the encoding of `value` to `buf`, returning the byte count.
pub fn write(mut value: u64, buf: &mut impl BufMut) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
        len += 1;
    }
    buf.put_u8(value as u8);
    len
}

/// Decode a varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
///
/// [`ProtocolError::TruncatedVarint`] if the input ends before a byte
/// without the continuation bit, or if the continuation bit is still set
/// on the tenth byte.
pub fn read(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().take(MAX_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ProtocolError::TruncatedVarint)
}

/// Decode a varint from the front of `buf`, consuming its bytes.
pub fn take(buf: &mut Bytes) -> Result<u64> {
    let (value, len) = read(buf)?;
    bytes::Buf::advance(buf, len);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn round_trip(value: u64) {
        let mut buf = BytesMut::new();
        let written = write(value, &mut buf);
        assert_eq!(written, size_of(value));
        assert_eq!(read(&buf).unwrap(), (value, written));
    }

    #[test]
    fn small_values_are_one_byte() {
        for v in 0..0x80 {
            assert_eq!(size_of(v), 1);
            round_trip(v);
        }
    }

    #[test]
    fn boundary_values() {
        for v in [0x80, 0x3fff, 0x4000, u64::from(u32::MAX), u64::MAX] {
            round_trip(v);
        }
        assert_eq!(size_of(u64::MAX), MAX_LEN);
    }

    #[test]
    fn known_encoding() {
        let mut buf = BytesMut::new();
        write(300, &mut buf);
        assert_eq!(&buf[..], &[0xac, 0x02]);
    }

    #[test]
    fn empty_input_is_truncated() {
        assert_eq!(read(&[]), Err(ProtocolError::TruncatedVarint));
    }

    #[test]
    fn unterminated_input_is_truncated() {
        assert_eq!(read(&[0x80, 0x80]), Err(ProtocolError::TruncatedVarint));
    }

    #[test]
    fn continuation_on_tenth_byte_is_truncated() {
        let bytes = [0xff; 11];
        assert_eq!(read(&bytes), Err(ProtocolError::TruncatedVarint));
    }

    #[test]
    fn take_advances_the_buffer() {
        let mut buf = BytesMut::new();
        write(300, &mut buf);
        buf.extend_from_slice(b"tail");
        let mut buf = buf.freeze();
        assert_eq!(take(&mut buf).unwrap(), 300);
        assert_eq!(&buf[..], b"tail");
    }
}
