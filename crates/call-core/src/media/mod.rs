//! Media Transport Adapter contract
//!
//! The capture devices and the peer-connection transport are external
//! collaborators. This module fixes the capability surface the state machine
//! depends on:
//!
//! | Capability | Rust surface |
//! |---|---|
//! | `acquire(kind)` | [`MediaTransport::acquire`] (async, may prompt for permission) |
//! | `createSession(initiator, media)` | [`MediaTransport::create_session`] |
//! | `onLocalSignal` / `onRemoteStream` | [`TransportEvent`]s pushed into the [`TransportEventSink`] given at creation |
//! | `signal(session, remote)` | [`MediaTransport::signal`] |
//! | `close(session)` | [`MediaTransport::close`] |
//!
//! Negotiation payloads are [`Signal`]s: opaque JSON relayed unchanged.

pub mod mock;

use crate::state_machine::CallInput;
use crate::types::{MediaKind, SessionId, Signal};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

pub use mock::{MockBehavior, MockMediaTransport};

/// Local media could not be acquired
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The user (or platform policy) refused camera/microphone access
    #[error("permission denied")]
    PermissionDenied,
    /// No capture device for the requested media kind
    #[error("no {0} capture device available")]
    NotFound(MediaKind),
    /// Device is held exclusively by another application
    #[error("device busy: {0}")]
    Busy(String),
    #[error("{0}")]
    Other(String),
}

/// The peer-connection transport rejected an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport session {0} not found")]
    UnknownSession(String),
    #[error("transport session {0} is closed")]
    Closed(String),
    #[error("transport rejected signal: {0}")]
    InvalidSignal(String),
    #[error("{0}")]
    Other(String),
}

/// Handle to acquired local capture devices
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaHandle {
    pub id: String,
    pub kind: MediaKind,
}

impl MediaHandle {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self { id: id.into(), kind }
    }

    /// Presentation handle for the local preview stream
    pub fn stream(&self) -> StreamHandle {
        StreamHandle(self.id.clone())
    }
}

/// Opaque handle a presentation layer can attach to a renderer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(pub String);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a peer-connection object owned by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportSessionId(pub String);

impl fmt::Display for TransportSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications a transport session reports back to the core
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local offer/answer is ready to be relayed to the peer
    LocalSignal(Signal),
    /// The remote stream is connected
    RemoteStream(StreamHandle),
    /// Negotiation or the connection failed
    Failed(String),
    /// The transport closed on its own
    Closed,
}

/// Callback channel bound to one call session.
///
/// Everything pushed here re-enters the state machine's input queue tagged
/// with the owning session, so events from a torn-down session are
/// recognisable as stale.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<CallInput>,
}

impl TransportEventSink {
    pub(crate) fn new(session_id: SessionId, tx: mpsc::UnboundedSender<CallInput>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Report an event. Returns `false` once the state machine is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        trace!("Transport event for {}: {:?}", self.session_id, event);
        self.tx
            .send(CallInput::Transport {
                session_id: self.session_id.clone(),
                event,
            })
            .is_ok()
    }

    pub fn local_signal(&self, signal: Signal) -> bool {
        self.emit(TransportEvent::LocalSignal(signal))
    }

    pub fn remote_stream(&self, stream: StreamHandle) -> bool {
        self.emit(TransportEvent::RemoteStream(stream))
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Failed(reason.into()))
    }
}

/// Capability surface of the media capture + peer-connection collaborator
///
/// `release` and `close` must be idempotent; the state machine guarantees it
/// calls each at most once per handle, but adapters are shared with other
/// code paths.
#[async_trait]
pub trait MediaTransport: Send + Sync + 'static {
    /// Acquire local capture devices for `kind`. May suspend on a permission prompt.
    async fn acquire(&self, kind: MediaKind) -> Result<MediaHandle, DeviceError>;

    /// Stop all tracks of an acquired handle
    fn release(&self, media: &MediaHandle);

    /// Create a peer-connection object. `initiator` produces the offer.
    fn create_session(
        &self,
        initiator: bool,
        media: &MediaHandle,
        events: TransportEventSink,
    ) -> Result<TransportSessionId, TransportError>;

    /// Feed a remote offer/answer into the session
    fn signal(&self, session: &TransportSessionId, remote: Signal) -> Result<(), TransportError>;

    /// Destroy the peer-connection object
    fn close(&self, session: &TransportSessionId);
}
