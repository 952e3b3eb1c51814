//! RESP command serializer.
//!
//! Encodes a command name plus its arguments into the RESP bulk string
//! array wire format: `*<N>\r\n$<len>\r\nNAME\r\n$<len>\r\narg1\r\n…`.
//! Arguments are opaque bytes; no coercion happens here.

use bytes::BytesMut;
use itoa::Buffer;

/// Worst-case framing overhead per element: `$` + digits + `\r\n` + `\r\n`.
const ELEMENT_OVERHEAD: usize = 1 + 20 + 2 + 2;

/// Encode one request frame.
///
/// # Example
/// ```ignore
/// let bytes = encode_command(b"SET", &[b"key", b"value"]);
/// // → *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
/// ```
pub fn encode_command<A: AsRef<[u8]>>(name: &[u8], args: &[A]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(encoded_len_hint(name, args));
    encode_command_into(&mut buf, name, args);
    buf.to_vec()
}

/// Append one request frame to `buf`, so pipelined commands share one write.
pub fn encode_command_into<A: AsRef<[u8]>>(buf: &mut BytesMut, name: &[u8], args: &[A]) {
    buf.reserve(encoded_len_hint(name, args));
    let mut itoa_buf = Buffer::new();

    // *<N>\r\n
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(itoa_buf.format(args.len() + 1).as_bytes());
    buf.extend_from_slice(b"\r\n");

    write_bulk(buf, &mut itoa_buf, name);
    for arg in args {
        write_bulk(buf, &mut itoa_buf, arg.as_ref());
    }
}

/// `$<len>\r\n<data>\r\n`
#[inline]
fn write_bulk(buf: &mut BytesMut, itoa_buf: &mut Buffer, data: &[u8]) {
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(itoa_buf.format(data.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

fn encoded_len_hint<A: AsRef<[u8]>>(name: &[u8], args: &[A]) -> usize {
    let payload: usize = args.iter().map(|a| a.as_ref().len()).sum::<usize>() + name.len();
    1 + 20 + 2 + (args.len() + 1) * ELEMENT_OVERHEAD + payload
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::parser::parse_slice;
    use crate::resp::types::RespValue;
    use bytes::Bytes;

    const NO_ARGS: &[&[u8]] = &[];

    #[test]
    fn encode_name_only() {
        assert_eq!(encode_command(b"PING", NO_ARGS), b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn encode_with_args() {
        let result = encode_command(b"SET", &[&b"key"[..], &b"value"[..]]);
        assert_eq!(result, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
    }

    #[test]
    fn encode_empty_arg() {
        let result = encode_command(b"SET", &["key", ""]);
        assert_eq!(result, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$0\r\n\r\n");
    }

    #[test]
    fn encode_binary_arg() {
        let result = encode_command(b"SET", &[&b"key"[..], &[0x00u8, 0x01, 0xFF][..]]);
        let expected = b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\n\x00\x01\xFF\r\n";
        assert_eq!(result, expected.as_ref());
    }

    #[test]
    fn encode_arg_with_crlf() {
        let result = encode_command(b"SET", &["key", "val\r\nue"]);
        assert_eq!(
            result,
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$7\r\nval\r\nue\r\n"
        );
    }

    #[test]
    fn encode_large_arg() {
        let big = vec![b'x'; 10_000];
        let result = encode_command(b"SET", &[&b"key"[..], &big[..]]);
        assert!(result.starts_with(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$10000\r\n"));
        assert!(result.ends_with(b"\r\n"));
    }

    #[test]
    fn encode_into_appends_frames() {
        let mut buf = BytesMut::new();
        encode_command_into(&mut buf, b"SET", &["k", "v"]);
        encode_command_into(&mut buf, b"GET", &["k"]);
        assert_eq!(
            &buf[..],
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"
        );
    }

    #[test]
    fn encoded_frame_parses_as_bulk_array() {
        let wire = encode_command(b"SUBSCRIBE", &[Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let (val, consumed) = parse_slice(&wire).unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(
            val,
            RespValue::Array(vec![
                RespValue::from("SUBSCRIBE"),
                RespValue::from("a"),
                RespValue::from("b"),
            ])
        );
    }
}
