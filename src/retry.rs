//! Reconnection policy.
//!
//! Attempts are counted between two successful handshakes. Every delay is
//! computed from the backoff, clamped to `max_delay`, then jittered
//! downwards, so no delay ever exceeds `max_delay`.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::{Backoff, RetryConfig};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Stop reconnecting.
    Exhausted,
}

/// Tracks attempts and hands out delays.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: RetryConfig,
    attempts: u32,
    started: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            started: None,
        }
    }

    /// Connection attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count a connection attempt about to be made.
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// The connection became ready.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.started = None;
    }

    /// Decide after a failure, measured from now.
    pub fn next_delay(&mut self) -> RetryDecision {
        self.next_delay_at(Instant::now())
    }

    /// Decide after a failure observed at `now`.
    pub fn next_delay_at(&mut self, now: Instant) -> RetryDecision {
        let started = *self.started.get_or_insert(now);

        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                return RetryDecision::Exhausted;
            }
        }
        if let Some(max_ms) = self.config.max_elapsed_ms {
            if now.duration_since(started) >= Duration::from_millis(max_ms) {
                return RetryDecision::Exhausted;
            }
        }

        let retry_index = self.attempts.saturating_sub(1);
        RetryDecision::Retry(self.jittered(self.delay_for(retry_index)))
    }

    /// Unjittered delay before retry number `retry_index` (zero-based),
    /// clamped to `max_delay`.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let initial = Duration::from_millis(self.config.initial_delay_ms);
        let max = Duration::from_millis(self.config.max_delay_ms);
        let raw = match &self.config.backoff {
            Backoff::Fixed => initial,
            Backoff::Exponential { factor } => {
                let ms = self.config.initial_delay_ms as f64 * factor.powi(retry_index as i32);
                if ms.is_finite() && ms < max.as_millis() as f64 {
                    Duration::from_millis(ms as u64)
                } else {
                    max
                }
            }
            Backoff::Custom(f) => f(retry_index),
        };
        raw.min(max)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=1.0);
        delay.mul_f64(factor)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
