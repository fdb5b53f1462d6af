//! Core types shared across the signaling core
//!
//! Identifiers, the call state enum, media kinds and the opaque signal blob.
//! Everything here is plain data: no behaviour beyond conversions and
//! display.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque user identifier issued by the authentication service
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Human-readable identifier used to add a contact out-of-band
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(pub String);

impl ShareId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The local user's identity. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub share_id: ShareId,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, share_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            share_id: ShareId::new(share_id),
        }
    }
}

/// Locally generated token identifying one call attempt
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("call-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media requested for a call
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio only
    Voice,
    /// Audio and video
    Video,
}

impl MediaKind {
    pub fn wants_video(&self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Voice => write!(f, "voice"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Which side started the call
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// State of the (single) call session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallState {
    /// No live session; ready for the next call
    Idle,
    /// Local user started a call, waiting for the peer to accept
    OutgoingRinging,
    /// Peer offered a call, waiting for the local user to answer or decline
    IncomingPending,
    /// Both sides agreed; the media transport is exchanging signals
    Negotiating,
    /// Remote stream is flowing
    Active,
}

impl CallState {
    /// Whether a session exists in this state
    pub fn is_live(&self) -> bool {
        !matches!(self, CallState::Idle)
    }

    /// Ringing on either side
    pub fn is_ringing(&self) -> bool {
        matches!(self, CallState::OutgoingRinging | CallState::IncomingPending)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::OutgoingRinging => "outgoing-ringing",
            CallState::IncomingPending => "incoming-pending",
            CallState::Negotiating => "negotiating",
            CallState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Opaque negotiation payload produced by the media transport.
///
/// The core never looks inside; it is relayed unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signal(pub serde_json::Value);

impl Signal {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Local user hung up
    LocalHangup,
    /// Peer hung up or disconnected
    RemoteHangup,
    /// Local user declined an incoming call
    Declined,
    /// Local media could not be acquired
    DeviceError(String),
    /// Nobody answered in time
    RingTimeout,
    /// The transport never produced a remote stream in time
    NegotiationTimeout,
    /// The relay stayed unreachable for longer than the grace period
    RelayLost,
    /// The media transport failed or closed underneath us
    TransportFailed(String),
    /// The controller shut down with a call in progress
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::LocalHangup => write!(f, "local hangup"),
            EndReason::RemoteHangup => write!(f, "remote hangup"),
            EndReason::Declined => write!(f, "declined"),
            EndReason::DeviceError(e) => write!(f, "device error: {}", e),
            EndReason::RingTimeout => write!(f, "ring timeout"),
            EndReason::NegotiationTimeout => write!(f, "negotiation timeout"),
            EndReason::RelayLost => write!(f, "relay lost"),
            EndReason::TransportFailed(e) => write!(f, "transport failed: {}", e),
            EndReason::Shutdown => write!(f, "shutdown"),
        }
    }
}
