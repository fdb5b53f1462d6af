//! Shared fixtures for the call-core integration tests
#![allow(dead_code)]

use parking_lot::Mutex;
use peercall_core::media::{MockMediaTransport, TransportSessionId};
use peercall_core::relay::{ClientMessage, IncomingAccepted, IncomingOffer, RelaySender};
use peercall_core::{
    CallConfig, CallController, CallEvent, CallHandle, CallSnapshot, CallState, Identity, MediaKind,
    PresenceRecord, PresenceTracker, RelayError, RelayEvent, SessionId, Signal, UserId,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const ME: &str = "u1";
pub const WAIT: Duration = Duration::from_secs(5);

/// Relay stand-in that records every outbound message
pub struct RecordingRelay {
    sent: Mutex<Vec<ClientMessage>>,
    connected: AtomicBool,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_events(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|m| m.event_name()).collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.sent_events().into_iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl RelaySender for RecordingRelay {
    fn send(&self, message: ClientMessage) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub calls: CallHandle,
    pub controller: CallController,
    pub media: Arc<MockMediaTransport>,
    pub relay: Arc<RecordingRelay>,
    pub presence: PresenceTracker,
    pub events: broadcast::Receiver<CallEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CallConfig::default(), MockMediaTransport::new())
    }

    pub fn with(config: CallConfig, media: MockMediaTransport) -> Self {
        let media = Arc::new(media);
        let relay = Arc::new(RecordingRelay::new());
        let presence = PresenceTracker::new();
        presence.apply_roster(&[
            PresenceRecord::new(ME),
            PresenceRecord::new("u2"),
            PresenceRecord::new("u3"),
        ]);

        let controller = CallController::spawn(
            Identity::new(ME, "share-u1"),
            config,
            media.clone(),
            relay.clone(),
            presence.clone(),
        );
        let calls = controller.handle();
        let events = calls.subscribe_events();

        Self {
            calls,
            controller,
            media,
            relay,
            presence,
            events,
        }
    }

    pub fn deliver(&self, event: RelayEvent) {
        assert!(self.calls.deliver_relay_event(event), "controller is gone");
    }

    pub async fn wait_for_state(&self, state: CallState) -> CallSnapshot {
        self.wait_for_state_within(state, WAIT).await
    }

    pub async fn wait_for_state_within(&self, state: CallState, within: Duration) -> CallSnapshot {
        let mut snapshots = self.calls.watch_snapshots();
        let reached = match tokio::time::timeout(within, snapshots.wait_for(|s| s.state == state)).await {
            Ok(Ok(snapshot)) => snapshot.clone(),
            _ => panic!("timed out waiting for {}; last snapshot {:?}", state, self.calls.snapshot()),
        };
        reached
    }

    /// Wait until the relay has seen `event`, returning the latest such message
    pub async fn wait_for_sent(&self, event: &str) -> ClientMessage {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(message) = self.relay.sent().into_iter().rev().find(|m| m.event_name() == event) {
                return message;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("{} never sent; sent so far: {:?}", event, self.relay.sent_events());
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Wait for the next event matching `pred`
    pub async fn next_event(&mut self, pred: impl Fn(&CallEvent) -> bool) -> CallEvent {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, self.events.recv()).await {
                Ok(Ok(event)) if pred(&event) => return event,
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                _ => panic!("expected event never arrived"),
            }
        }
    }

    /// Let queued inputs drain
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Drive an outgoing call to `Active`
    pub async fn establish_outgoing(&self, peer: &str) -> (SessionId, TransportSessionId) {
        let session_id = self.calls.start_call(peer, MediaKind::Video).await.expect("start_call");
        self.wait_for_sent("call-offer").await;
        self.deliver(accepted_from(peer, &session_id, Some(answer_signal())));
        self.wait_for_state(CallState::Negotiating).await;

        let transport = self.media.last_session().expect("transport created");
        self.media.emit_remote_stream(&transport);
        self.wait_for_state(CallState::Active).await;
        (session_id, transport)
    }
}

pub fn offer_signal() -> Signal {
    Signal::new(json!({"type": "offer", "sdp": "remote-offer"}))
}

pub fn answer_signal() -> Signal {
    Signal::new(json!({"type": "answer", "sdp": "remote-answer"}))
}

pub fn offer_from(peer: &str, kind: MediaKind, call_id: Option<&str>) -> RelayEvent {
    RelayEvent::CallOffer(IncomingOffer {
        from: UserId::from(peer),
        signal: offer_signal(),
        media_kind: kind,
        call_id: call_id.map(str::to_string),
    })
}

pub fn accepted_from(peer: &str, session_id: &SessionId, signal: Option<Signal>) -> RelayEvent {
    RelayEvent::CallAccepted(IncomingAccepted {
        signal,
        from: Some(UserId::from(peer)),
        call_id: Some(session_id.as_str().to_string()),
    })
}
