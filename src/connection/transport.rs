//! Byte stream to a Redis server.
//!
//! TCP or a Unix domain socket behind one type, so the driver reads and
//! writes without caring which.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::config::ConnectionConfig;
use crate::error::{RedisError, Result};

/// An open connection to the server.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Open a transport for `config`, bounded by its connect timeout.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if config.tls {
            return Err(RedisError::InvalidConfig(
                "TLS transport is not supported".into(),
            ));
        }
        let timeout = config.connect_timeout();
        match tokio::time::timeout(timeout, Self::open(config)).await {
            Ok(result) => result,
            Err(_) => Err(RedisError::Timeout(format!(
                "connection to {} timed out after {timeout:?}",
                config.display_addr()
            ))),
        }
    }

    async fn open(config: &ConnectionConfig) -> Result<Self> {
        if let Some(path) = &config.unix_path {
            return Self::open_unix(path).await;
        }
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(config.nodelay)?;
        Ok(Self::Tcp(stream))
    }

    #[cfg(unix)]
    async fn open_unix(path: &std::path::Path) -> Result<Self> {
        Ok(Self::Unix(UnixStream::connect(path).await?))
    }

    #[cfg(not(unix))]
    async fn open_unix(path: &std::path::Path) -> Result<Self> {
        Err(RedisError::InvalidConfig(format!(
            "unix sockets are not available on this platform: {}",
            path.display()
        )))
    }

    /// Whether Nagle's algorithm is disabled (always `false` off TCP).
    pub fn nodelay(&self) -> bool {
        match self {
            Self::Tcp(s) => s.nodelay().unwrap_or(false),
            #[cfg(unix)]
            Self::Unix(_) => false,
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
