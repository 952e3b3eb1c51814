//! Async Redis client connection engine.
//!
//! One [`Client`] drives one persistent connection: commands are pipelined
//! and matched to replies in order, buffered while disconnected, and
//! subscriptions and MONITOR mode survive reconnects.

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod monitor;
pub mod pubsub;
pub mod queue;
pub mod resp;
pub mod retry;

pub use client::Client;
pub use command::Pending;
pub use config::{Backoff, ConnectionConfig, RetryConfig};
pub use connection::{ConnectionEvent, ConnectionState, ServerInfo};
pub use error::{RedisError, Result, ServerErrorKind};
pub use monitor::MonitorEvent;
pub use pubsub::{PubSubMessage, SubscriptionAck, SubscriptionKind};
pub use resp::{ReplyDecoder, RespDecoder, RespValue};
