//! Property block encoding.
//!
//! A message's properties are an ordered list of string pairs. On the wire
//! they appear at the start of the decoded payload as a varint byte count
//! followed by that many bytes of alternating NUL-terminated keys and
//! values:
//!
//! ```text
//! varint len ┃ key\0 value\0 key\0 value\0 …
//! ```
//!
//! Keys and values must not contain NUL; that is enforced at encode time
//! since it would corrupt the framing for every later pair.

use bytes::{BufMut, BytesMut};

/// Property naming the request handler.
pub const PROFILE: &str = "Profile";
/// Property carrying the numeric code of an error response.
pub const ERROR_CODE: &str = "Error-Code";
/// Property carrying the domain of an error response.
pub const ERROR_DOMAIN: &str = "Error-Domain";

/// Domain of protocol-level error responses.
pub const BLIP_ERROR_DOMAIN: &str = "BLIP";
/// Reserved domain for HTTP-style application errors.
pub const HTTP_ERROR_DOMAIN: &str = "HTTP";

/// Error code for a request whose profile has no registered handler.
pub const ERROR_NO_HANDLER: i64 = 404;
/// Error code for a handler that failed while processing a request.
pub const ERROR_HANDLER_FAILED: i64 = 501;
/// Error code delivered to response waiters when the connection dies.
pub const ERROR_DISCONNECTED: i64 = 502;

/// Append one encoded key/value pair to `buf`.
///
/// # Panics
///
/// Panics if `key` or `value` contains a NUL byte; both are programmer
/// errors that would desynchronize the pair framing.
pub fn encode_pair(buf: &mut BytesMut, key: &str, value: &str) {
    assert!(!key.contains('\0'), "property key must not contain NUL");
    assert!(!value.contains('\0'), "property value must not contain NUL");
    buf.reserve(key.len() + value.len() + 2);
    buf.put_slice(key.as_bytes());
    buf.put_u8(0);
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Iterate the pairs of an encoded property block, in wire order.
///
/// Iteration stops at the first malformed pair (missing terminator or
/// invalid UTF-8); a block produced by [`encode_pair`] always parses in
/// full.
#[must_use]
pub fn iter(bytes: &[u8]) -> PropertyIter<'_> {
    PropertyIter { rest: bytes }
}

/// Look up the value of `key`, scanning pairs in order.
#[must_use]
pub fn get<'a>(bytes: &'a [u8], key: &str) -> Option<&'a str> {
    iter(bytes).find(|(k, _)| *k == key).map(|(_, v)| v)
}

/// Iterator over the `(key, value)` pairs of an encoded property block.
pub struct PropertyIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for PropertyIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let Some((key, rest)) = split_string(self.rest) else {
            self.rest = &[];
            return None;
        };
        let Some((value, rest)) = split_string(rest) else {
            self.rest = &[];
            return None;
        };
        self.rest = rest;
        Some((key, value))
    }
}

fn split_string(bytes: &[u8]) -> Option<(&str, &[u8])> {
    let nul = bytes.iter().position(|&b| b == 0)?;
    let s = std::str::from_utf8(&bytes[..nul]).ok()?;
    Some((s, &bytes[nul + 1..]))
}
