//! Configuration for the call controller and relay client
//!
//! All structs deserialize with `#[serde(default)]` so they can be embedded
//! as optional sections of an application's TOML file.

use crate::error::{CallError, CallResult};
use crate::relay::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay endpoint, e.g. `wss://relay.example.com/socket`
    pub url: String,
    /// Interval between `ping` frames; 0 disables the heartbeat
    pub heartbeat_interval_secs: u64,
    /// Backoff between reconnect attempts
    pub reconnect: ReconnectPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/socket".to_string(),
            heartbeat_interval_secs: 25,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RelayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    pub fn validate(&self) -> CallResult<()> {
        if self.url.trim().is_empty() {
            return Err(CallError::config("relay url must not be empty"));
        }
        self.reconnect.validate()
    }
}

/// Call session policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Hang up unanswered calls after this many seconds; `None` rings forever
    pub ring_timeout_secs: Option<u64>,
    /// Give up on a negotiation that produced no remote stream after this many seconds
    pub negotiation_timeout_secs: Option<u64>,
    /// How long a live call survives without a relay connection
    pub relay_loss_grace_secs: u64,
    /// Refuse to call peers the presence tracker does not list as online
    pub require_peer_online: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: Some(45),
            negotiation_timeout_secs: Some(30),
            relay_loss_grace_secs: 10,
            require_peer_online: true,
        }
    }
}

impl CallConfig {
    pub fn ring_timeout(&self) -> Option<Duration> {
        self.ring_timeout_secs.map(Duration::from_secs)
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_secs.map(Duration::from_secs)
    }

    pub fn relay_loss_grace(&self) -> Duration {
        Duration::from_secs(self.relay_loss_grace_secs)
    }

    /// Builder: set the ring timeout
    pub fn with_ring_timeout(mut self, secs: Option<u64>) -> Self {
        self.ring_timeout_secs = secs;
        self
    }

    /// Builder: set the negotiation timeout
    pub fn with_negotiation_timeout(mut self, secs: Option<u64>) -> Self {
        self.negotiation_timeout_secs = secs;
        self
    }

    /// Builder: set the relay loss grace period
    pub fn with_relay_loss_grace(mut self, secs: u64) -> Self {
        self.relay_loss_grace_secs = secs;
        self
    }

    pub fn validate(&self) -> CallResult<()> {
        if self.ring_timeout_secs == Some(0) {
            return Err(CallError::config("ring_timeout_secs must be positive (omit it to disable)"));
        }
        if self.negotiation_timeout_secs == Some(0) {
            return Err(CallError::config(
                "negotiation_timeout_secs must be positive (omit it to disable)",
            ));
        }
        Ok(())
    }
}
