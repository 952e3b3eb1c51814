//! Connection configuration.
//!
//! A [`ConnectionConfig`] is handed to every [`Client`](crate::client::Client)
//! at construction; nothing here is process-wide.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default maximum decoder buffer size (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// How the delay grows between reconnection attempts.
#[derive(Clone)]
pub enum Backoff {
    /// Always wait `initial_delay`.
    Fixed,
    /// `initial_delay * factor^attempt`.
    Exponential { factor: f64 },
    /// Caller supplied: receives the zero-based retry index.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::Exponential { factor } => write!(f, "Exponential {{ factor: {factor} }}"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Reconnection policy settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth function.
    pub backoff: Backoff,
    /// Fraction (0.0–1.0) of each delay that is randomized away.
    pub jitter: f64,
    /// Maximum connection attempts between two successful handshakes.
    /// `Some(1)` means a single attempt and no retry.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the first failed attempt.
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff: Backoff::Exponential { factor: 1.7 },
            jitter: 0.2,
            max_attempts: None,
            max_elapsed_ms: None,
        }
    }
}

/// Full connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Unix domain socket path; takes precedence over host/port.
    pub unix_path: Option<PathBuf>,
    /// Optional username (Redis 6+ ACL).
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Database index selected after every (re)connect.
    pub db: u16,
    /// Transport capability flag. TLS is not implemented; `true` fails fast.
    pub tls: bool,
    /// Disable Nagle's algorithm on TCP sockets.
    pub nodelay: bool,
    /// Per-attempt connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Probe readiness with INFO (waiting out `loading:1`) instead of PING.
    pub ready_check: bool,
    /// Buffer commands issued while disconnected.
    pub enable_offline_queue: bool,
    /// Optional bound on the offline queue.
    pub offline_queue_limit: Option<usize>,
    /// Reconnect after the connection is lost. `false` closes instead.
    pub reconnect: bool,
    /// Reconnection policy.
    pub retry: RetryConfig,
    /// Upper bound on a graceful close drain in milliseconds (0 = unbounded).
    pub close_timeout_ms: u64,
    /// Maximum decoder buffer size per connection in bytes.
    pub max_buffer_size: usize,
    /// Capacity of the event and message broadcast channels.
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            unix_path: None,
            username: None,
            password: None,
            db: 0,
            tls: false,
            nodelay: true,
            connect_timeout_ms: 5000,
            ready_check: true,
            enable_offline_queue: true,
            offline_queue_limit: None,
            reconnect: true,
            retry: RetryConfig::default(),
            close_timeout_ms: 5000,
            max_buffer_size: DEFAULT_MAX_BUF_SIZE,
            event_capacity: 1024,
        }
    }
}

impl ConnectionConfig {
    /// Config for a TCP server at `host:port`, defaults elsewhere.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Config for a Unix domain socket, defaults elsewhere.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            unix_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Human readable address, used in logs and errors.
    pub fn display_addr(&self) -> String {
        match &self.unix_path {
            Some(path) => path.display().to_string(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when the drain is unbounded.
    pub fn close_timeout(&self) -> Option<Duration> {
        (self.close_timeout_ms > 0).then(|| Duration::from_millis(self.close_timeout_ms))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
