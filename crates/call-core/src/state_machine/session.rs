//! The single live call session and the resources it owns

use crate::error::CallResult;
use crate::events::CallSnapshot;
use crate::media::{MediaHandle, StreamHandle, TransportSessionId};
use crate::types::{CallDirection, CallState, MediaKind, SessionId, Signal, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Session-scoped timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Ring,
    Negotiation,
    RelayLoss,
}

struct ArmedTimer {
    epoch: u64,
    task: JoinHandle<()>,
}

/// Reply channel of the intent waiting on media acquisition
pub type PendingReply = oneshot::Sender<CallResult<SessionId>>;

pub struct CallSession {
    pub session_id: SessionId,
    /// Wire correlation token; `None` for incoming offers that carried none
    pub call_id: Option<String>,
    pub direction: CallDirection,
    pub peer: UserId,
    pub media_kind: MediaKind,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<Instant>,

    /// Remote offer/answer that arrived before the transport existed
    pub pending_remote_signal: Option<Signal>,
    pub remote_signal_applied: bool,
    pub local_signal_sent: bool,
    /// Whether the peer has heard of this session
    pub offer_sent: bool,

    pub media: Option<MediaHandle>,
    pub transport: Option<TransportSessionId>,
    pub remote_stream: Option<StreamHandle>,

    pub reply: Option<PendingReply>,
    timers: HashMap<TimerKind, ArmedTimer>,
    next_epoch: u64,
}

impl CallSession {
    pub fn outgoing(peer: UserId, media_kind: MediaKind, reply: PendingReply) -> Self {
        let session_id = SessionId::new();
        let call_id = Some(session_id.as_str().to_string());
        let mut session = Self::new(session_id, call_id, CallDirection::Outgoing, peer, media_kind);
        session.state = CallState::OutgoingRinging;
        session.reply = Some(reply);
        session
    }

    pub fn incoming(peer: UserId, media_kind: MediaKind, call_id: Option<String>, offer: Signal) -> Self {
        let mut session = Self::new(SessionId::new(), call_id, CallDirection::Incoming, peer, media_kind);
        session.state = CallState::IncomingPending;
        session.pending_remote_signal = Some(offer);
        // The caller told us about the call
        session.offer_sent = true;
        session
    }

    fn new(
        session_id: SessionId,
        call_id: Option<String>,
        direction: CallDirection,
        peer: UserId,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            session_id,
            call_id,
            direction,
            peer,
            media_kind,
            state: CallState::Idle,
            started_at: Utc::now(),
            connected_at: None,
            pending_remote_signal: None,
            remote_signal_applied: false,
            local_signal_sent: false,
            offer_sent: false,
            media: None,
            transport: None,
            remote_stream: None,
            reply: None,
            timers: HashMap::new(),
            next_epoch: 0,
        }
    }

    /// Whether an inbound event carrying `from`/`call_id` belongs to this session
    pub fn matches(&self, from: Option<&UserId>, call_id: Option<&str>) -> bool {
        if let Some(from) = from {
            if from != &self.peer {
                return false;
            }
        }
        match (call_id, self.call_id.as_deref()) {
            (Some(theirs), Some(ours)) => theirs == ours,
            _ => true,
        }
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.state,
            session_id: Some(self.session_id.clone()),
            direction: Some(self.direction),
            peer_user_id: Some(self.peer.clone()),
            media_kind: Some(self.media_kind),
            local_stream: self.media.as_ref().map(|m| m.stream()),
            remote_stream: self.remote_stream.clone(),
        }
    }

    /// Reserve an epoch for a timer about to be armed
    pub fn next_timer_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    /// Store an armed timer, aborting any previous timer of the same kind
    pub fn set_timer(&mut self, kind: TimerKind, epoch: u64, task: JoinHandle<()>) {
        if let Some(previous) = self.timers.insert(kind, ArmedTimer { epoch, task }) {
            previous.task.abort();
        }
    }

    pub fn has_timer(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    pub fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(timer) = self.timers.remove(&kind) {
            timer.task.abort();
        }
    }

    /// Consume a fired timer. `false` if it was cancelled or re-armed since.
    pub fn take_fired_timer(&mut self, kind: TimerKind, epoch: u64) -> bool {
        match self.timers.get(&kind) {
            Some(timer) if timer.epoch == epoch => {
                self.timers.remove(&kind);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.cancel_all_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outgoing_uses_session_id_as_call_id() {
        let (tx, _rx) = oneshot::channel();
        let session = CallSession::outgoing("bob".into(), MediaKind::Video, tx);
        assert_eq!(session.call_id.as_deref(), Some(session.session_id.as_str()));
        assert_eq!(session.state, CallState::OutgoingRinging);
        assert!(!session.offer_sent);
    }

    #[test]
    fn test_matching_rules() {
        let session = CallSession::incoming(
            "alice".into(),
            MediaKind::Voice,
            Some("c1".into()),
            Signal::new(json!({})),
        );
        assert!(session.matches(Some(&"alice".into()), Some("c1")));
        assert!(session.matches(None, None));
        assert!(session.matches(Some(&"alice".into()), None));
        assert!(!session.matches(Some(&"mallory".into()), Some("c1")));
        assert!(!session.matches(None, Some("c0")));

        let no_call_id = CallSession::incoming("alice".into(), MediaKind::Voice, None, Signal::new(json!({})));
        assert!(no_call_id.matches(Some(&"alice".into()), Some("anything")));
    }

    #[test]
    fn test_snapshot_reflects_session() {
        let session = CallSession::incoming("alice".into(), MediaKind::Voice, None, Signal::new(json!({})));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, CallState::IncomingPending);
        assert_eq!(snapshot.peer_user_id, Some(UserId::from("alice")));
        assert_eq!(snapshot.direction, Some(CallDirection::Incoming));
        assert!(snapshot.local_stream.is_none());
    }
}
