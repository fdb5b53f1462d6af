//! Relay Client
//!
//! One persistent connection to the signaling relay. The client registers the
//! local identity on every (re)connect, encodes typed outbound messages into
//! frames, decodes inbound frames into [`RelayEvent`]s and hands them to
//! subscribers on the [`EventBus`].
//!
//! The physical link is pluggable through [`RelayConnector`]; the WebSocket
//! implementation lives in its own crate and [`MemoryRelay`] provides an
//! in-process relay for tests.

pub mod backoff;
pub mod bus;
pub mod client;
pub mod memory;
pub mod protocol;

use crate::presence::PresenceRecord;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub use backoff::{Backoff, ReconnectPolicy};
pub use bus::{EventBus, SubscriptionId};
pub use client::RelayClient;
pub use memory::{MemoryConnector, MemoryRelay};
pub use protocol::{
    AcceptPayload, AnswerPayload, ClientMessage, CodecError, HangupPayload, IncomingAccepted,
    IncomingAnswer, IncomingHangup, IncomingOffer, OfferPayload, RegisterPayload, ServerMessage,
};

/// Relay connection errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Could not establish the link
    #[error("connect failed: {0}")]
    Connect(String),
    /// The link closed underneath us
    #[error("connection closed")]
    Closed,
    /// Writing a frame failed
    #[error("send failed: {0}")]
    Send(String),
    /// The relay spoke something we could not understand
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No live connection; the message was dropped
    #[error("not connected to relay")]
    NotConnected,
    /// The client was shut down
    #[error("relay client shut down")]
    Shutdown,
}

impl RelayError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RelayError::Protocol(_) | RelayError::Shutdown)
    }
}

/// Link state published on the bus as [`RelayEvent::ConnectionStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay_ms: u64 },
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected { reason } => write!(f, "disconnected ({})", reason),
            ConnectionStatus::Reconnecting { attempt, delay_ms } => {
                write!(f, "reconnecting (attempt {} in {}ms)", attempt, delay_ms)
            }
            ConnectionStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Typed inbound event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    RosterUpdate(Vec<PresenceRecord>),
    CallOffer(IncomingOffer),
    CallAccepted(IncomingAccepted),
    CallAnswer(IncomingAnswer),
    CallHangup(IncomingHangup),
    CallEnded,
    /// Local-only; never appears on the wire
    ConnectionStatus(ConnectionStatus),
}

impl RelayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RelayEvent::RosterUpdate(_) => EventKind::RosterUpdate,
            RelayEvent::CallOffer(_) => EventKind::CallOffer,
            RelayEvent::CallAccepted(_) => EventKind::CallAccepted,
            RelayEvent::CallAnswer(_) => EventKind::CallAnswer,
            RelayEvent::CallHangup(_) => EventKind::CallHangup,
            RelayEvent::CallEnded => EventKind::CallEnded,
            RelayEvent::ConnectionStatus(_) => EventKind::ConnectionStatus,
        }
    }

    /// Map a decoded frame to an event. `pong` carries nothing for subscribers.
    pub fn from_server(message: ServerMessage) -> Option<Self> {
        match message {
            ServerMessage::RosterUpdate(roster) => Some(RelayEvent::RosterUpdate(roster)),
            ServerMessage::CallOffer(offer) => Some(RelayEvent::CallOffer(offer)),
            ServerMessage::CallAccepted(accepted) => Some(RelayEvent::CallAccepted(accepted)),
            ServerMessage::CallAnswer(answer) => Some(RelayEvent::CallAnswer(answer)),
            ServerMessage::CallHangup(hangup) => Some(RelayEvent::CallHangup(hangup)),
            ServerMessage::CallEnded => Some(RelayEvent::CallEnded),
            ServerMessage::Pong => None,
        }
    }
}

/// Subscription key on the [`EventBus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RosterUpdate,
    CallOffer,
    CallAccepted,
    CallAnswer,
    CallHangup,
    CallEnded,
    ConnectionStatus,
}

impl EventKind {
    /// Kinds the call state machine consumes
    pub const CALL_EVENTS: [EventKind; 6] = [
        EventKind::CallOffer,
        EventKind::CallAccepted,
        EventKind::CallAnswer,
        EventKind::CallHangup,
        EventKind::CallEnded,
        EventKind::ConnectionStatus,
    ];
}

/// Writing half of a relay link
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: String) -> Result<(), RelayError>;

    async fn close(&mut self);
}

/// Reading half of a relay link. `None` means the link closed.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>>;
}

/// A connected link, already split into halves
pub struct RelayLink {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl RelayLink {
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

/// Opens links to the relay; called again on every reconnect
#[async_trait]
pub trait RelayConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<RelayLink, RelayError>;
}

/// Outbound side of the relay as seen by the state machine
pub trait RelaySender: Send + Sync + 'static {
    /// Fire-and-forget send. Fails with [`RelayError::NotConnected`] while the link is down.
    fn send(&self, message: ClientMessage) -> Result<(), RelayError>;

    fn is_connected(&self) -> bool;
}
