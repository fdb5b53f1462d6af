//! Scriptable in-memory media transport
//!
//! Records every call made by the state machine so tests can assert on the
//! exact resource lifecycle (acquire/release/create/close counts), and can be
//! told to fail acquisition, delay it, or emit transport events on demand.

use super::{
    DeviceError, MediaHandle, MediaTransport, StreamHandle, TransportError, TransportEvent,
    TransportEventSink, TransportSessionId,
};
use crate::types::{MediaKind, Signal};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// How the mock reacts to calls
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Fail every `acquire` with this error
    pub fail_acquire: Option<DeviceError>,
    /// Sleep this long inside `acquire` (simulates a permission prompt)
    pub acquire_delay: Option<Duration>,
    /// Fail every `create_session` with this error
    pub fail_create: Option<TransportError>,
    /// Initiators emit an offer on creation; responders emit an answer on the first remote signal
    pub auto_local_signal: bool,
    /// Emit a remote stream as soon as a remote signal has been fed in
    pub auto_remote_stream: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_acquire: None,
            acquire_delay: None,
            fail_create: None,
            auto_local_signal: true,
            auto_remote_stream: false,
        }
    }
}

struct MockSession {
    initiator: bool,
    media_id: String,
    sink: TransportEventSink,
    open: bool,
    remote_signals: Vec<Signal>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    acquire_calls: usize,
    acquired: Vec<MediaHandle>,
    release_calls: Vec<String>,
    close_calls: Vec<TransportSessionId>,
    sessions: HashMap<TransportSessionId, MockSession>,
    created: Vec<TransportSessionId>,
}

/// In-memory [`MediaTransport`] for tests and demos
pub struct MockMediaTransport {
    behavior: Mutex<MockBehavior>,
    state: Mutex<MockState>,
}

impl MockMediaTransport {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            state: Mutex::new(MockState::default()),
        }
    }

    /// A mock whose `acquire` always fails with `error`
    pub fn failing(error: DeviceError) -> Self {
        Self::with_behavior(MockBehavior {
            fail_acquire: Some(error),
            ..Default::default()
        })
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn update_behavior(&self, update: impl FnOnce(&mut MockBehavior)) {
        update(&mut self.behavior.lock());
    }

    pub fn acquire_count(&self) -> usize {
        self.state.lock().acquire_calls
    }

    /// Number of `release` calls, duplicates included
    pub fn release_count(&self) -> usize {
        self.state.lock().release_calls.len()
    }

    /// Number of `close` calls, duplicates included
    pub fn close_count(&self) -> usize {
        self.state.lock().close_calls.len()
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().created.len()
    }

    /// Handles acquired and not yet released
    pub fn held_media(&self) -> Vec<MediaHandle> {
        let state = self.state.lock();
        state
            .acquired
            .iter()
            .filter(|h| !state.release_calls.contains(&h.id))
            .cloned()
            .collect()
    }

    pub fn open_sessions(&self) -> Vec<TransportSessionId> {
        let state = self.state.lock();
        let mut open: Vec<_> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.open)
            .map(|(id, _)| id.clone())
            .collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        open
    }

    /// Most recently created transport session
    pub fn last_session(&self) -> Option<TransportSessionId> {
        self.state.lock().created.last().cloned()
    }

    pub fn is_initiator(&self, session: &TransportSessionId) -> Option<bool> {
        self.state.lock().sessions.get(session).map(|s| s.initiator)
    }

    /// Media handle the session was created with
    pub fn session_media(&self, session: &TransportSessionId) -> Option<String> {
        self.state.lock().sessions.get(session).map(|s| s.media_id.clone())
    }

    /// Remote signals fed into `session`, in order
    pub fn remote_signals(&self, session: &TransportSessionId) -> Vec<Signal> {
        self.state
            .lock()
            .sessions
            .get(session)
            .map(|s| s.remote_signals.clone())
            .unwrap_or_default()
    }

    /// Push an arbitrary event through the session's sink
    pub fn emit(&self, session: &TransportSessionId, event: TransportEvent) -> bool {
        let sink = self.state.lock().sessions.get(session).map(|s| s.sink.clone());
        match sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    pub fn emit_remote_stream(&self, session: &TransportSessionId) -> bool {
        self.emit(session, TransportEvent::RemoteStream(StreamHandle(format!("remote-{}", session))))
    }

    pub fn emit_local_signal(&self, session: &TransportSessionId, signal: Signal) -> bool {
        self.emit(session, TransportEvent::LocalSignal(signal))
    }

    pub fn emit_failure(&self, session: &TransportSessionId, reason: &str) -> bool {
        self.emit(session, TransportEvent::Failed(reason.to_string()))
    }
}

impl Default for MockMediaTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTransport for MockMediaTransport {
    async fn acquire(&self, kind: MediaKind) -> Result<MediaHandle, DeviceError> {
        let (delay, failure) = {
            let behavior = self.behavior.lock();
            (behavior.acquire_delay, behavior.fail_acquire.clone())
        };
        self.state.lock().acquire_calls += 1;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            debug!("Mock acquire({}) failing: {}", kind, error);
            return Err(error);
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = MediaHandle::new(format!("mock-media-{}", state.next_id), kind);
        state.acquired.push(handle.clone());
        Ok(handle)
    }

    fn release(&self, media: &MediaHandle) {
        self.state.lock().release_calls.push(media.id.clone());
    }

    fn create_session(
        &self,
        initiator: bool,
        media: &MediaHandle,
        events: TransportEventSink,
    ) -> Result<TransportSessionId, TransportError> {
        let (failure, auto_signal) = {
            let behavior = self.behavior.lock();
            (behavior.fail_create.clone(), behavior.auto_local_signal)
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = TransportSessionId(format!("mock-transport-{}", state.next_id));
            state.sessions.insert(
                id.clone(),
                MockSession {
                    initiator,
                    media_id: media.id.clone(),
                    sink: events.clone(),
                    open: true,
                    remote_signals: Vec::new(),
                },
            );
            state.created.push(id.clone());
            id
        };

        if initiator && auto_signal {
            events.local_signal(Signal::new(json!({ "type": "offer", "sdp": format!("offer-{}", id) })));
        }
        Ok(id)
    }

    fn signal(&self, session: &TransportSessionId, remote: Signal) -> Result<(), TransportError> {
        let (auto_signal, auto_stream) = {
            let behavior = self.behavior.lock();
            (behavior.auto_local_signal, behavior.auto_remote_stream)
        };

        let (sink, first_remote, initiator) = {
            let mut state = self.state.lock();
            let entry = state
                .sessions
                .get_mut(session)
                .ok_or_else(|| TransportError::UnknownSession(session.0.clone()))?;
            if !entry.open {
                return Err(TransportError::Closed(session.0.clone()));
            }
            entry.remote_signals.push(remote);
            (entry.sink.clone(), entry.remote_signals.len() == 1, entry.initiator)
        };

        if first_remote && !initiator && auto_signal {
            sink.local_signal(Signal::new(json!({ "type": "answer", "sdp": format!("answer-{}", session) })));
        }
        if first_remote && auto_stream {
            sink.remote_stream(StreamHandle(format!("remote-{}", session)));
        }
        Ok(())
    }

    fn close(&self, session: &TransportSessionId) {
        let mut state = self.state.lock();
        state.close_calls.push(session.clone());
        if let Some(entry) = state.sessions.get_mut(session) {
            entry.open = false;
        }
    }
}
