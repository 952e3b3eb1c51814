//! Connection handshake: AUTH, SELECT and the readiness probe.
//!
//! Runs on a freshly opened transport before any caller command is written.
//! Each step is a plain request/response exchange bounded by the connect
//! timeout; pipelining only starts once the connection is ready.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::connection::transport::Transport;
use crate::error::{RedisError, Result};
use crate::resp::decoder::ReplyDecoder;
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command_into;

/// Longest single wait while the server loads its dataset.
const MAX_LOADING_WAIT: Duration = Duration::from_secs(1);

/// Server metadata learned from `INFO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    fields: HashMap<String, String>,
    version: (u32, u32, u32),
}

impl ServerInfo {
    /// Parse the `key:value` text of an INFO reply.
    pub fn parse(text: &str) -> Self {
        let fields: HashMap<String, String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut parts = fields
            .get("redis_version")
            .map(|v| v.split('.').map(|p| p.parse().unwrap_or(0)).collect::<Vec<u32>>())
            .unwrap_or_default()
            .into_iter();
        let version = (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        );
        Self { fields, version }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// `(major, minor, patch)`; zeros when unknown.
    pub fn version(&self) -> (u32, u32, u32) {
        self.version
    }

    pub fn version_at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        self.version >= (major, minor, patch)
    }

    pub fn role(&self) -> Option<&str> {
        self.get("role")
    }

    pub fn is_loading(&self) -> bool {
        self.get("loading") == Some("1")
    }

    /// How long to wait before probing again while loading.
    pub fn loading_wait(&self) -> Duration {
        let eta = self
            .get("loading_eta_seconds")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        Duration::from_secs(eta).min(MAX_LOADING_WAIT)
    }
}

/// Request/response exchange over a transport that is not yet pipelined.
struct Exchange<'a> {
    transport: &'a mut Transport,
    decoder: &'a mut dyn ReplyDecoder,
    replies: VecDeque<RespValue>,
    buf: BytesMut,
    /// Bound on each request/response round trip.
    timeout: Duration,
}

impl<'a> Exchange<'a> {
    fn new(
        transport: &'a mut Transport,
        decoder: &'a mut dyn ReplyDecoder,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            decoder,
            replies: VecDeque::new(),
            buf: BytesMut::with_capacity(4096),
            timeout,
        }
    }

    /// Send one command and read its reply. Error replies come back as
    /// `RespValue::Error`. A server that stays silent past the timeout
    /// yields a retryable [`RedisError::Timeout`].
    async fn execute(&mut self, name: &str, args: &[&str]) -> Result<RespValue> {
        let limit = self.timeout;
        match tokio::time::timeout(limit, self.round_trip(name, args)).await {
            Ok(result) => result,
            Err(_) => Err(RedisError::Timeout(format!(
                "no {name} reply during handshake within {limit:?}"
            ))),
        }
    }

    async fn round_trip(&mut self, name: &str, args: &[&str]) -> Result<RespValue> {
        let mut frame = BytesMut::new();
        encode_command_into(&mut frame, name.as_bytes(), args);
        self.transport.write_all(&frame).await?;

        loop {
            if let Some(reply) = self.replies.pop_front() {
                return Ok(reply);
            }
            self.buf.clear();
            let n = self.transport.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(RedisError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by server during handshake",
                )));
            }
            let decoded = self.decoder.feed(&self.buf)?;
            self.replies.extend(decoded.into_iter().map(|(value, _)| value));
        }
    }

    async fn expect_ok(&mut self, name: &str, args: &[&str]) -> Result<()> {
        match self.execute(name, args).await? {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            RespValue::Error(msg) => Err(RedisError::server(msg)),
            other => Err(RedisError::Protocol(format!(
                "unexpected {name} response: {:?}",
                other.type_name()
            ))),
        }
    }
}

/// Run the handshake for `config`. Returns server metadata when the INFO
/// probe was used and succeeded.
pub async fn handshake(
    transport: &mut Transport,
    decoder: &mut dyn ReplyDecoder,
    config: &ConnectionConfig,
) -> Result<Option<ServerInfo>> {
    let mut ex = Exchange::new(transport, decoder, config.connect_timeout());

    if let Some(password) = config.password.as_deref() {
        debug!(addr = %config.display_addr(), "authenticating");
        match config.username.as_deref() {
            Some(user) => ex.expect_ok("AUTH", &[user, password]).await?,
            None => ex.expect_ok("AUTH", &[password]).await?,
        }
    }

    if config.db != 0 {
        let db = config.db.to_string();
        ex.expect_ok("SELECT", &[db.as_str()]).await?;
    }

    let info = if config.ready_check {
        ready_check(&mut ex).await?
    } else {
        ping(&mut ex).await?;
        None
    };

    if !ex.replies.is_empty() {
        return Err(RedisError::Protocol(format!(
            "{} unsolicited replies during handshake",
            ex.replies.len()
        )));
    }
    Ok(info)
}

async fn ping(ex: &mut Exchange<'_>) -> Result<()> {
    match ex.execute("PING", &[]).await? {
        RespValue::Error(msg) => Err(RedisError::server(msg)),
        _ => Ok(()),
    }
}

/// Probe with INFO, waiting while the server is still loading.
async fn ready_check(ex: &mut Exchange<'_>) -> Result<Option<ServerInfo>> {
    loop {
        let reply = ex.execute("INFO", &[]).await?;
        let text = match &reply {
            RespValue::Error(msg) => {
                warn!(error = %msg, "ready check failed, continuing without server info");
                return Ok(None);
            }
            other => other.as_str().ok_or_else(|| {
                RedisError::Protocol(format!(
                    "unexpected INFO response: {:?}",
                    other.type_name()
                ))
            })?,
        };

        let info = ServerInfo::parse(text);
        if !info.is_loading() {
            debug!(version = ?info.version(), role = ?info.role(), "server ready");
            return Ok(Some(info));
        }
        let wait = info.loading_wait();
        debug!(?wait, "server is loading its dataset");
        tokio::time::sleep(wait).await;
    }
}

// ── Tests ──────────────────────────────────────────────────────────
