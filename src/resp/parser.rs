//! Streaming RESP2 frame parser.
//!
//! [`parse`] takes a byte buffer and returns `Ok((RespValue, bytes_consumed))`
//! or `Err(Incomplete)` when more data is needed, or `Err(Protocol(…))` on
//! malformed input. The parser keeps no state; buffering across socket reads
//! lives in [`RespDecoder`](crate::resp::decoder::RespDecoder).

use bytes::Bytes;
use crate::error::{RedisError, Result};
use crate::resp::types::RespValue;
use memchr::memchr;

/// Deepest array nesting accepted before the input is declared malformed.
const MAX_DEPTH: usize = 512;

/// Parse one RESP value from the front of `buf`.
///
/// Bulk strings are extracted with zero-copy `slice()` on the shared buffer.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    parse_at(buf, 0, 0)
}

/// Convenience wrapper: parse from a byte slice (copies into `Bytes` first).
pub fn parse_slice(buf: &[u8]) -> Result<(RespValue, usize)> {
    parse(&Bytes::copy_from_slice(buf))
}

/// Parse the value starting at `buf[start]`; the consumed count is relative
/// to `start`.
fn parse_at(buf: &Bytes, start: usize, depth: usize) -> Result<(RespValue, usize)> {
    if start >= buf.len() {
        return Err(RedisError::Incomplete);
    }
    let (value, end) = match buf[start] {
        b'+' => parse_simple_string(buf, start)?,
        b'-' => parse_error(buf, start)?,
        b':' => parse_integer(buf, start)?,
        b'$' => parse_bulk_string(buf, start)?,
        b'*' => parse_array(buf, start, depth)?,
        other => {
            return Err(RedisError::Protocol(format!(
                "unknown RESP type byte: 0x{other:02x}"
            )))
        }
    };
    Ok((value, end - start))
}

// ── Helpers ────────────────────────────────────────────────────────

/// Read the line starting at `buf[offset]` up to `\r\n`.
/// Returns `(line_bytes, index_after_crlf)`.
#[inline]
fn read_line(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let search = &buf[offset..];
    match memchr(b'\r', search) {
        Some(pos) => {
            let cr = offset + pos;
            if cr + 1 >= buf.len() {
                Err(RedisError::Incomplete)
            } else if buf[cr + 1] == b'\n' {
                Ok((&buf[offset..cr], cr + 2))
            } else {
                Err(RedisError::Protocol("expected \\n after \\r".into()))
            }
        }
        None => Err(RedisError::Incomplete),
    }
}

/// Parse an integer from a byte slice (no allocations).
fn parse_int_from_bytes(bytes: &[u8]) -> Result<i64> {
    let (negative, digits) = match bytes.first() {
        None => return Err(RedisError::Protocol("empty integer".into())),
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        Some(_) => (false, bytes),
    };

    if digits.is_empty() {
        return Err(RedisError::Protocol("integer has no digits".into()));
    }

    // Accumulate as negative so i64::MIN round-trips.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RedisError::Protocol(format!(
                "invalid byte in integer: 0x{b:02x}"
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| RedisError::Protocol("integer overflow".into()))?;
    }

    if negative {
        Ok(n)
    } else {
        n.checked_neg()
            .ok_or_else(|| RedisError::Protocol("integer overflow".into()))
    }
}

fn utf8_line(line: &[u8], what: &str) -> Result<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| RedisError::Protocol(format!("invalid UTF-8 in {what}: {e}")))
}

// ── Type parsers ──────────────────────────────────────────────────

/// `+<string>\r\n`
fn parse_simple_string(buf: &Bytes, start: usize) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, start + 1)?;
    let s = match line {
        b"OK" => "OK".to_string(),
        b"PONG" => "PONG".to_string(),
        _ => utf8_line(line, "simple string")?,
    };
    Ok((RespValue::SimpleString(s), next))
}

/// `-<error message>\r\n`
fn parse_error(buf: &Bytes, start: usize) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, start + 1)?;
    Ok((RespValue::Error(utf8_line(line, "error")?), next))
}

/// `:<integer>\r\n`
fn parse_integer(buf: &Bytes, start: usize) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, start + 1)?;
    Ok((RespValue::Integer(parse_int_from_bytes(line)?), next))
}

/// `$<length>\r\n<data>\r\n`  or  `$-1\r\n`
fn parse_bulk_string(buf: &Bytes, start: usize) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, start + 1)?;
    let len = parse_int_from_bytes(line)?;

    if len == -1 {
        return Ok((RespValue::Null, next));
    }
    if len < 0 {
        return Err(RedisError::Protocol(format!("invalid bulk length: {len}")));
    }

    let data_end = next + len as usize;
    if buf.len() < data_end + 2 {
        return Err(RedisError::Incomplete);
    }
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err(RedisError::Protocol(
            "bulk string not terminated by \\r\\n".into(),
        ));
    }

    Ok((RespValue::BulkString(buf.slice(next..data_end)), data_end + 2))
}

/// `*<count>\r\n<elements>`  or  `*-1\r\n`
fn parse_array(buf: &Bytes, start: usize, depth: usize) -> Result<(RespValue, usize)> {
    if depth >= MAX_DEPTH {
        return Err(RedisError::Protocol("array nesting too deep".into()));
    }
    let (line, mut next) = read_line(buf, start + 1)?;
    let count = parse_int_from_bytes(line)?;

    if count == -1 {
        return Ok((RespValue::Null, next));
    }
    if count < 0 {
        return Err(RedisError::Protocol(format!("invalid array length: {count}")));
    }

    // Cap the preallocation; a hostile length must not reserve gigabytes.
    let mut elements = Vec::with_capacity((count as usize).min(1024));
    for _ in 0..count {
        let (val, consumed) = parse_at(buf, next, depth + 1)?;
        elements.push(val);
        next += consumed;
    }
    Ok((RespValue::Array(elements), next))
}

// ── Tests ──────────────────────────────────────────────────────────
