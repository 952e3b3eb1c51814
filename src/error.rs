use std::fmt;
use std::io;

// ── Error taxonomy ─────────────────────────────────────────────────
//
//  RedisError
//  ├── Transport            connect refused, reset, EOF (reconnects)
//  ├── ConnectionBroken     in-flight command lost with its socket
//  ├── Protocol             malformed or unexpected reply (fatal)
//  ├── Server               error reply, local to one command
//  │   ├── Err / WrongType / NoAuth / WrongPass
//  │   └── Loading / ReadOnly / NoScript / Busy / Other
//  ├── QueueRejected        not connected and not queueable
//  ├── ReconnectExhausted   retry budget spent
//  ├── Closed               caller closed the connection
//  ├── Timeout
//  └── InvalidConfig        unusable configuration (fatal)

/// Structured server error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// NOAUTH Authentication required
    NoAuth,
    /// WRONGPASS invalid username-password pair
    WrongPass,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY Redis is busy running a script
    Busy,
    /// Any other error prefix
    Other(String),
}

impl ServerErrorKind {
    /// Parse the kind from a server error line (e.g. "WRONGTYPE Operation against…").
    pub fn from_error_msg(msg: &str) -> Self {
        let prefix = msg.split_whitespace().next().unwrap_or("");
        match prefix {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "NOAUTH" => Self::NoAuth,
            "WRONGPASS" => Self::WrongPass,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            "" => Self::Other("UNKNOWN".to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

/// All error variants surfaced by the connection engine.
#[derive(Debug)]
pub enum RedisError {
    /// Socket level errors.
    Transport(io::Error),
    /// The command was written (or about to be) when its connection died.
    /// Delivery is unknown, so it is never retried.
    ConnectionBroken(String),
    /// RESP protocol violations.
    Protocol(String),
    /// RESP parser needs more data; control flow only, never surfaced.
    Incomplete,
    /// The server answered with an error reply.
    Server {
        kind: ServerErrorKind,
        message: String,
    },
    /// The command could not be admitted while disconnected.
    QueueRejected(String),
    /// The reconnection policy gave up.
    ReconnectExhausted { attempts: u32 },
    /// The connection was closed by the caller.
    Closed,
    /// Connect or drain timed out.
    Timeout(String),
    /// The configuration asks for something this client cannot do.
    InvalidConfig(String),
}

impl RedisError {
    /// Create a server error from a raw error line, auto-parsing the kind.
    pub fn server(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = ServerErrorKind::from_error_msg(&message);
        Self::Server { kind, message }
    }

    /// Whether a failed connection attempt ending in this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectionBroken(_) | Self::Timeout(_)
        )
    }

    /// Whether this is an authentication failure reported by the server.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Server { kind, message } => {
                matches!(kind, ServerErrorKind::NoAuth | ServerErrorKind::WrongPass)
                    || message.contains("invalid password")
                    || message.contains("invalid username-password")
            }
            _ => false,
        }
    }

    /// Server error kind, if this is a server error.
    pub fn server_kind(&self) -> Option<&ServerErrorKind> {
        match self {
            Self::Server { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::ConnectionBroken(msg) => write!(f, "connection broken: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Incomplete => write!(f, "incomplete RESP message"),
            Self::Server { message, .. } => write!(f, "server error: {message}"),
            Self::QueueRejected(msg) => write!(f, "command rejected: {msg}"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "reconnection gave up after {attempts} attempts")
            }
            Self::Closed => write!(f, "connection closed"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for RedisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// One failure is often reported to many commands at once; `io::Error` is
/// rebuilt from its kind and message.
impl Clone for RedisError {
    fn clone(&self) -> Self {
        match self {
            Self::Transport(e) => Self::Transport(io::Error::new(e.kind(), e.to_string())),
            Self::ConnectionBroken(msg) => Self::ConnectionBroken(msg.clone()),
            Self::Protocol(msg) => Self::Protocol(msg.clone()),
            Self::Incomplete => Self::Incomplete,
            Self::Server { kind, message } => Self::Server {
                kind: kind.clone(),
                message: message.clone(),
            },
            Self::QueueRejected(msg) => Self::QueueRejected(msg.clone()),
            Self::ReconnectExhausted { attempts } => Self::ReconnectExhausted {
                attempts: *attempts,
            },
            Self::Closed => Self::Closed,
            Self::Timeout(msg) => Self::Timeout(msg.clone()),
            Self::InvalidConfig(msg) => Self::InvalidConfig(msg.clone()),
        }
    }
}

impl From<io::Error> for RedisError {
    fn from(e: io::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, RedisError>;

// ── Tests ──────────────────────────────────────────────────────────
