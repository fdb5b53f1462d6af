//! Presentation-facing events and snapshots

use crate::media::StreamHandle;
use crate::types::{CallDirection, CallState, EndReason, MediaKind, SessionId, UserId};
use std::time::Duration;

/// Point-in-time view of the call, published after every transition
#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    pub state: CallState,
    pub session_id: Option<SessionId>,
    pub direction: Option<CallDirection>,
    pub peer_user_id: Option<UserId>,
    pub media_kind: Option<MediaKind>,
    pub local_stream: Option<StreamHandle>,
    pub remote_stream: Option<StreamHandle>,
}

impl CallSnapshot {
    pub fn idle() -> Self {
        Self {
            state: CallState::Idle,
            session_id: None,
            direction: None,
            peer_user_id: None,
            media_kind: None,
            local_stream: None,
            remote_stream: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == CallState::Idle
    }
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// A peer is calling; answer or decline
    IncomingCall {
        session_id: SessionId,
        from: UserId,
        media_kind: MediaKind,
    },
    StateChanged {
        session_id: SessionId,
        from: CallState,
        to: CallState,
    },
    /// The peer's media is connected
    RemoteStream {
        session_id: SessionId,
        stream: StreamHandle,
    },
    /// The session is gone and its resources released
    CallEnded {
        session_id: SessionId,
        peer: UserId,
        reason: EndReason,
        /// Time spent `Active`, if the call ever connected
        duration: Option<Duration>,
    },
}

impl CallEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            CallEvent::IncomingCall { session_id, .. }
            | CallEvent::StateChanged { session_id, .. }
            | CallEvent::RemoteStream { session_id, .. }
            | CallEvent::CallEnded { session_id, .. } => session_id,
        }
    }
}
