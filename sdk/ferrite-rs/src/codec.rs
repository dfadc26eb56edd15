//! RESP2 framing for `tokio_util::codec`.
//!
//! Commands go out as arrays of bulk strings; replies come back as [`Value`]s.
//! The decoder is incremental: it returns `Ok(None)` until a whole frame is
//! buffered and never consumes a partial one.
//!
//! # Example wire format
//! ```text
//! *3\r\n$4\r\nXACK\r\n$6\r\norders\r\n$3\r\n1-0\r\n
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::types::Value;

/// Largest bulk string accepted from the server (512 MB, the Redis limit).
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted before the frame is rejected.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Codec that writes commands and reads RESP2 values.
#[derive(Debug, Clone)]
pub struct RespCodec {
    max_bulk_len: usize,
}

impl Default for RespCodec {
    fn default() -> Self {
        Self {
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
        }
    }
}

impl RespCodec {
    /// Create a codec with a custom bulk string limit.
    pub fn with_max_bulk_len(max_bulk_len: usize) -> Self {
        Self { max_bulk_len }
    }

    fn parse(&self, buf: &[u8], pos: usize, depth: usize) -> Result<Option<(Value, usize)>> {
        let Some(&tag) = buf.get(pos) else {
            return Ok(None);
        };
        let Some((line, next)) = read_line(buf, pos + 1) else {
            return Ok(None);
        };

        match tag {
            b'+' => Ok(Some((Value::Status(utf8(line)?), next))),
            b'-' => Ok(Some((Value::Error(utf8(line)?), next))),
            b':' => Ok(Some((Value::Integer(decimal(line)?), next))),
            b'$' => {
                let len = decimal(line)?;
                if len == -1 {
                    return Ok(Some((Value::Nil, next)));
                }
                if len < 0 {
                    return Err(Error::Protocol("negative bulk string length".into()));
                }
                let len = len as usize;
                if len > self.max_bulk_len {
                    return Err(Error::Protocol(format!(
                        "bulk string of {} bytes exceeds limit of {}",
                        len, self.max_bulk_len
                    )));
                }
                let end = next + len;
                if buf.len() < end + 2 {
                    return Ok(None);
                }
                if &buf[end..end + 2] != b"\r\n" {
                    return Err(Error::Protocol("expected CRLF after bulk string".into()));
                }
                Ok(Some((
                    Value::String(Bytes::copy_from_slice(&buf[next..end])),
                    end + 2,
                )))
            }
            b'*' => {
                let count = decimal(line)?;
                if count == -1 {
                    return Ok(Some((Value::Nil, next)));
                }
                if count < 0 {
                    return Err(Error::Protocol("negative array length".into()));
                }
                if depth >= MAX_NESTING_DEPTH {
                    return Err(Error::Protocol("array nesting too deep".into()));
                }
                let count = count as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                let mut cursor = next;
                for _ in 0..count {
                    match self.parse(buf, cursor, depth + 1)? {
                        Some((value, after)) => {
                            items.push(value);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((Value::Array(items), cursor)))
            }
            byte => Err(Error::Protocol(format!("unexpected byte: 0x{:02x}", byte))),
        }
    }
}

impl Decoder for RespCodec {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        match self.parse(&src[..], 0, 0)? {
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<Vec<Bytes>> for RespCodec {
    type Error = Error;

    fn encode(&mut self, args: Vec<Bytes>, dst: &mut BytesMut) -> Result<()> {
        encode_command(&args, dst);
        Ok(())
    }
}

/// Encode a command as a RESP2 array of bulk strings.
pub fn encode_command(args: &[Bytes], buf: &mut BytesMut) {
    let payload: usize = args.iter().map(|a| a.len() + 16).sum();
    buf.reserve(payload + 16);
    put_header(buf, b'*', args.len() as i64);
    for arg in args {
        put_bulk(buf, arg);
    }
}

/// Encode a reply value. Used by servers and test doubles speaking RESP2.
pub fn encode_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Status(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        Value::Error(s) => {
            buf.put_u8(b'-');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        Value::Integer(n) => put_header(buf, b':', *n),
        Value::String(b) => put_bulk(buf, b),
        Value::Nil => buf.put_slice(b"$-1\r\n"),
        Value::Array(items) => {
            put_header(buf, b'*', items.len() as i64);
            for item in items {
                encode_value(item, buf);
            }
        }
    }
}

fn put_header(buf: &mut BytesMut, tag: u8, n: i64) {
    buf.put_u8(tag);
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(b"\r\n");
}

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    put_header(buf, b'$', data.len() as i64);
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    if start > buf.len() {
        return None;
    }
    buf[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|offset| (&buf[start..start + offset], start + offset + 2))
}

fn utf8(line: &[u8]) -> Result<String> {
    String::from_utf8(line.to_vec()).map_err(|e| Error::Protocol(format!("invalid UTF-8: {}", e)))
}

fn decimal(line: &[u8]) -> Result<i64> {
    let s = std::str::from_utf8(line)
        .map_err(|_| Error::Protocol("invalid UTF-8 in integer".into()))?;
    s.parse::<i64>()
        .map_err(|_| Error::Protocol(format!("invalid integer: {}", s)))
}
