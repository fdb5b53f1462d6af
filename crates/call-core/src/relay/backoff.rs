//! Reconnect backoff for the relay connection
//!
//! Exponential growth capped at `max_delay_ms`, with optional ±10% jitter so a
//! relay restart does not see every client reconnect in lockstep. Unlike a
//! bounded retry loop, reconnection never gives up: the policy only shapes
//! the delay between attempts.

use crate::error::{CallError, CallResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay policy between relay reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub use_jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Fast, deterministic policy for tests
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    pub fn validate(&self) -> CallResult<()> {
        // A zero delay would redial in a tight loop
        if self.initial_delay_ms == 0 {
            return Err(CallError::config("reconnect.initial_delay_ms must be > 0"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(CallError::config("reconnect.backoff_multiplier must be >= 1.0"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(CallError::config(
                "reconnect.max_delay_ms must not be smaller than reconnect.initial_delay_ms",
            ));
        }
        Ok(())
    }

    /// Start a fresh delay sequence
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            next: Duration::from_millis(self.initial_delay_ms),
            attempt: 0,
        }
    }
}

/// Iterator-like delay sequence; reset after every successful connect
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    next: Duration,
    attempt: u32,
}

impl Backoff {
    /// Attempts made since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.next;

        let next_ms = (delay.as_millis() as f64 * self.policy.backoff_multiplier) as u64;
        self.next = Duration::from_millis(next_ms).min(Duration::from_millis(self.policy.max_delay_ms));

        if self.policy.use_jitter {
            let jitter = (rand::random::<f64>() - 0.5) * 0.2;
            let millis = delay.as_millis() as f64;
            Duration::from_millis((millis * (1.0 + jitter)) as u64)
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next = Duration::from_millis(self.policy.initial_delay_ms);
    }
}
