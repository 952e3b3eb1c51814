//! Incremental reply decoding.
//!
//! The connection driver only talks to the [`ReplyDecoder`] trait: raw socket
//! bytes go in, complete replies come out in wire order, each tagged with the
//! number of bytes it consumed. Partial frames stay buffered inside the
//! decoder until the rest arrives.

use bytes::{Bytes, BytesMut};

use crate::config::DEFAULT_MAX_BUF_SIZE;
use crate::error::{RedisError, Result};
use crate::resp::parser::parse;
use crate::resp::types::RespValue;

/// Default initial buffer capacity (64 KB).
const DEFAULT_BUF_CAPACITY: usize = 64 * 1024;

/// Pluggable reply decoder.
pub trait ReplyDecoder: Send {
    /// Append `data` and return every reply that is now complete.
    ///
    /// An `Err` means the stream can no longer be trusted; callers drop the
    /// connection.
    fn feed(&mut self, data: &[u8]) -> Result<Vec<(RespValue, usize)>>;

    /// Discard buffered bytes (new socket).
    fn reset(&mut self);

    /// Bytes held back waiting for the rest of a frame.
    fn buffered(&self) -> usize;
}

/// Buffering RESP2 decoder backed by [`parse`].
pub struct RespDecoder {
    buf: BytesMut,
    max_buf_size: usize,
}

impl RespDecoder {
    pub fn new() -> Self {
        Self::with_max_buf(DEFAULT_MAX_BUF_SIZE)
    }

    /// Decoder that refuses to hold more than `max_buf_size` unparsed bytes.
    pub fn with_max_buf(max_buf_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY.min(max_buf_size)),
            max_buf_size,
        }
    }
}

impl Default for RespDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyDecoder for RespDecoder {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<(RespValue, usize)>> {
        if self.buf.len() + data.len() > self.max_buf_size {
            return Err(RedisError::Protocol(format!(
                "RESP message too large: buffer would exceed {} bytes",
                self.max_buf_size
            )));
        }
        self.buf.extend_from_slice(data);

        let mut replies = Vec::new();
        if self.buf.is_empty() {
            return Ok(replies);
        }

        // Freeze so bulk strings can be sliced out without copying; the
        // unconsumed tail is copied back afterwards.
        let snapshot: Bytes = self.buf.split().freeze();
        let mut offset = 0;
        let outcome = loop {
            if offset == snapshot.len() {
                break Ok(());
            }
            match parse(&snapshot.slice(offset..)) {
                Ok((value, consumed)) => {
                    offset += consumed;
                    replies.push((value, consumed));
                }
                Err(RedisError::Incomplete) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.buf.extend_from_slice(&snapshot[offset..]);
        outcome.map(|()| replies)
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
