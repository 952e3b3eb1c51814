//! Command queues.
//!
//! Two FIFOs per connection: [`CommandQueue`] holds commands written to the
//! live socket and awaiting replies; [`OfflineQueue`] holds commands issued
//! while no connection was usable, in submission order.

use std::collections::VecDeque;

use crate::command::Command;
use crate::error::RedisError;

/// Commands written to the current socket, oldest first.
#[derive(Debug, Default)]
pub struct CommandQueue {
    inner: VecDeque<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cmd: Command) {
        self.inner.push_back(cmd);
    }

    pub fn pop_front(&mut self) -> Option<Command> {
        self.inner.pop_front()
    }

    pub fn front(&self) -> Option<&Command> {
        self.inner.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut Command> {
        self.inner.front_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Fail every queued command, oldest first. Returns how many were failed.
    pub fn flush_with(&mut self, err: impl Fn() -> RedisError) -> usize {
        let n = self.inner.len();
        for cmd in self.inner.drain(..) {
            cmd.resolve(Err(err()));
        }
        n
    }
}

/// Commands waiting for a connection, in submission order.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    inner: VecDeque<Command>,
    limit: Option<usize>,
}

impl OfflineQueue {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            inner: VecDeque::new(),
            limit,
        }
    }

    /// Append a command. Hands it back if the queue is at its limit.
    pub fn push(&mut self, cmd: Command) -> Result<(), Command> {
        if self.limit.is_some_and(|limit| self.inner.len() >= limit) {
            return Err(cmd);
        }
        self.inner.push_back(cmd);
        Ok(())
    }

    /// Append regardless of the limit. Used when commands already admitted
    /// to the connection are moved back here after a disconnect.
    pub fn push_admitted(&mut self, cmd: Command) {
        self.inner.push_back(cmd);
    }

    /// Remove and return every command in order.
    pub fn take_all(&mut self) -> Vec<Command> {
        self.inner.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Fail every queued command. Returns how many were failed.
    pub fn flush_with(&mut self, err: impl Fn() -> RedisError) -> usize {
        let n = self.inner.len();
        for cmd in self.inner.drain(..) {
            cmd.resolve(Err(err()));
        }
        n
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Pending;

    #[test]
    fn command_queue_is_fifo() {
        let mut q = CommandQueue::new();
        q.push(Command::internal("SET", ["k", "v"]));
        q.push(Command::internal("GET", ["k"]));
        assert_eq!(q.len(), 2);
        assert_eq!(q.front().map(Command::name), Some("SET"));
        assert_eq!(q.pop_front().map(|c| c.name().to_string()), Some("SET".into()));
        assert_eq!(q.pop_front().map(|c| c.name().to_string()), Some("GET".into()));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn flush_fails_every_waiter() {
        let mut q = CommandQueue::new();
        let (a, rx_a) = Command::new("GET", ["a"]);
        let (b, rx_b) = Command::new("GET", ["b"]);
        q.push(a);
        q.push(b);
        let n = q.flush_with(|| RedisError::ConnectionBroken("reset".into()));
        assert_eq!(n, 2);
        assert!(q.is_empty());
        for rx in [rx_a, rx_b] {
            let err = Pending::new(rx).await.unwrap_err();
            assert!(matches!(err, RedisError::ConnectionBroken(_)));
        }
    }

    #[test]
    fn offline_queue_respects_limit() {
        let mut q = OfflineQueue::new(Some(2));
        assert!(q.push(Command::internal("INCR", ["a"])).is_ok());
        assert!(q.push(Command::internal("INCR", ["b"])).is_ok());
        let rejected = q.push(Command::internal("INCR", ["c"])).unwrap_err();
        assert_eq!(rejected.args()[0].as_ref(), b"c");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn push_admitted_ignores_limit() {
        let mut q = OfflineQueue::new(Some(0));
        q.push_admitted(Command::internal("PING", Vec::<&str>::new()));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn take_all_preserves_order() {
        let mut q = OfflineQueue::new(None);
        for key in ["1", "2", "3"] {
            q.push(Command::internal("INCR", [key])).unwrap();
        }
        let order: Vec<_> = q.take_all().iter().map(|c| c.args()[0].clone()).collect();
        assert_eq!(order, vec!["1", "2", "3"]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn offline_flush_reports_reason() {
        let mut q = OfflineQueue::new(None);
        let (cmd, rx) = Command::new("INCR", ["ctr"]);
        q.push(cmd).unwrap();
        assert_eq!(q.flush_with(|| RedisError::ReconnectExhausted { attempts: 4 }), 1);
        let err = Pending::new(rx).await.unwrap_err();
        assert!(matches!(err, RedisError::ReconnectExhausted { attempts: 4 }));
    }
}
