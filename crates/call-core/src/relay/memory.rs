//! In-process relay
//!
//! Mirrors the forwarding rules of the real relay server: `register` binds a
//! user to a connection and broadcasts the roster to everyone, call messages
//! are forwarded to the connection registered as `to` with `from` filled in,
//! and a dropped connection triggers a fresh roster broadcast. Tests use it to
//! run two or more clients against each other without a network.

use super::protocol::{
    ClientMessage, IncomingAccepted, IncomingAnswer, IncomingHangup, IncomingOffer, ServerMessage,
};
use super::{FrameSink, FrameStream, RelayConnector, RelayError, RelayLink};
use crate::presence::PresenceRecord;
use crate::types::UserId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type ConnId = u64;

struct Connection {
    user: Option<UserId>,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct RelayState {
    next_conn: ConnId,
    connections: BTreeMap<ConnId, Connection>,
    refuse_connections: bool,
    received: Vec<(Option<UserId>, ClientMessage)>,
    connects: usize,
}

impl RelayState {
    fn roster(&self) -> Vec<PresenceRecord> {
        let mut users: Vec<UserId> = self
            .connections
            .values()
            .filter_map(|c| c.user.clone())
            .collect();
        users.sort();
        users.dedup();
        users.into_iter().map(PresenceRecord::new).collect()
    }

    fn broadcast_roster(&self) {
        let frame = match ServerMessage::RosterUpdate(self.roster()).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode roster: {}", e);
                return;
            }
        };
        for connection in self.connections.values() {
            let _ = connection.tx.send(frame.clone());
        }
    }

    /// Latest connection registered as `user`
    fn route(&self, user: &UserId) -> Option<&Connection> {
        self.connections
            .values()
            .rev()
            .find(|c| c.user.as_ref() == Some(user))
    }

    fn deliver(&self, to: &UserId, message: ServerMessage) {
        let Some(connection) = self.route(to) else {
            debug!("Memory relay: {} is offline, dropping {}", to, message.event_name());
            return;
        };
        match message.to_frame() {
            Ok(frame) => {
                let _ = connection.tx.send(frame);
            }
            Err(e) => warn!("Failed to encode {}: {}", message.event_name(), e),
        }
    }
}

/// Shared in-memory relay; clone freely
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            relay: self.clone(),
        }
    }

    /// Users with at least one registered connection, sorted
    pub fn online_users(&self) -> Vec<UserId> {
        self.state.lock().roster().into_iter().map(|r| r.user_id).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Total successful connects since creation
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Every client message the relay has handled, with the sender's registered user
    pub fn received(&self) -> Vec<(Option<UserId>, ClientMessage)> {
        self.state.lock().received.clone()
    }

    /// Event names received from `user`, in order
    pub fn received_events_from(&self, user: &UserId) -> Vec<&'static str> {
        self.state
            .lock()
            .received
            .iter()
            .filter(|(from, _)| from.as_ref() == Some(user))
            .map(|(_, m)| m.event_name())
            .collect()
    }

    /// Refuse (or accept again) new connections
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Drop every connection, as if the relay went away
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        state.connections.clear();
    }

    /// Drop the connections registered as `user`, then broadcast the roster
    pub fn disconnect_user(&self, user: &UserId) {
        let mut state = self.state.lock();
        state.connections.retain(|_, c| c.user.as_ref() != Some(user));
        state.broadcast_roster();
    }

    /// Push a server message straight to `user`
    pub fn inject(&self, user: &UserId, message: ServerMessage) {
        self.state.lock().deliver(user, message);
    }

    /// Push a raw text frame straight to `user`
    pub fn inject_raw(&self, user: &UserId, frame: &str) {
        if let Some(connection) = self.state.lock().route(user) {
            let _ = connection.tx.send(frame.to_string());
        }
    }

    /// Poll until `user` is registered or `timeout` elapses
    pub async fn wait_for_user(&self, user: &UserId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.online_users().contains(user) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn open(&self) -> Result<(ConnId, mpsc::UnboundedReceiver<String>), RelayError> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(RelayError::Connect("memory relay refusing connections".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.next_conn += 1;
        let id = state.next_conn;
        state.connections.insert(id, Connection { user: None, tx });
        state.connects += 1;
        Ok((id, rx))
    }

    fn close(&self, id: ConnId) {
        let mut state = self.state.lock();
        if let Some(connection) = state.connections.remove(&id) {
            if connection.user.is_some() {
                state.broadcast_roster();
            }
        }
    }

    fn handle_frame(&self, id: ConnId, frame: &str) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        let Some(sender) = state.connections.get(&id).map(|c| c.user.clone()) else {
            return Err(RelayError::Closed);
        };

        let message = match ClientMessage::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Memory relay: malformed client frame: {}", e);
                return Ok(());
            }
        };
        state.received.push((sender.clone(), message.clone()));

        match message {
            ClientMessage::Register(payload) => {
                if let Some(connection) = state.connections.get_mut(&id) {
                    connection.user = Some(payload.user_id);
                }
                state.broadcast_roster();
            }
            ClientMessage::Ping => {
                if let Some(connection) = state.connections.get(&id) {
                    if let Ok(frame) = ServerMessage::Pong.to_frame() {
                        let _ = connection.tx.send(frame);
                    }
                }
            }
            ClientMessage::CallOffer(offer) => {
                state.deliver(
                    &offer.to,
                    ServerMessage::CallOffer(IncomingOffer {
                        from: offer.from,
                        signal: offer.signal,
                        media_kind: offer.media_kind,
                        call_id: offer.call_id,
                    }),
                );
            }
            ClientMessage::CallAccepted(accepted) => {
                state.deliver(
                    &accepted.to,
                    ServerMessage::CallAccepted(IncomingAccepted {
                        signal: accepted.signal,
                        from: sender,
                        call_id: accepted.call_id,
                    }),
                );
            }
            ClientMessage::CallAnswer(answer) => {
                state.deliver(
                    &answer.to,
                    ServerMessage::CallAnswer(IncomingAnswer {
                        signal: answer.signal,
                        from: sender,
                        call_id: answer.call_id,
                    }),
                );
            }
            ClientMessage::CallHangup(hangup) => {
                state.deliver(
                    &hangup.to,
                    ServerMessage::CallHangup(IncomingHangup {
                        from: sender,
                        call_id: hangup.call_id,
                    }),
                );
            }
        }
        Ok(())
    }
}

/// [`RelayConnector`] handing out links to a [`MemoryRelay`]
#[derive(Clone)]
pub struct MemoryConnector {
    relay: MemoryRelay,
}

#[async_trait]
impl RelayConnector for MemoryConnector {
    async fn connect(&self) -> Result<RelayLink, RelayError> {
        let (id, rx) = self.relay.open()?;
        Ok(RelayLink::new(
            MemorySink {
                relay: self.relay.clone(),
                id,
            },
            MemoryStream { rx },
        ))
    }
}

struct MemorySink {
    relay: MemoryRelay,
    id: ConnId,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> Result<(), RelayError> {
        self.relay.handle_frame(self.id, &frame)
    }

    async fn close(&mut self) {
        self.relay.close(self.id);
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::OfferPayload;
    use crate::types::{MediaKind, Signal};
    use serde_json::json;

    async fn connect_as(relay: &MemoryRelay, user: &str) -> RelayLink {
        let mut link = relay.connector().connect().await.unwrap();
        link.sink
            .send(ClientMessage::register(user.into()).to_frame().unwrap())
            .await
            .unwrap();
        link
    }

    async fn next_message(link: &mut RelayLink) -> ServerMessage {
        let frame = link.stream.next_frame().await.unwrap().unwrap();
        ServerMessage::from_frame(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_register_broadcasts_roster() {
        let relay = MemoryRelay::new();
        let mut alice = connect_as(&relay, "alice").await;
        assert_eq!(
            next_message(&mut alice).await,
            ServerMessage::RosterUpdate(vec![PresenceRecord::new("alice")])
        );

        let _bob = connect_as(&relay, "bob").await;
        assert_eq!(
            next_message(&mut alice).await,
            ServerMessage::RosterUpdate(vec![PresenceRecord::new("alice"), PresenceRecord::new("bob")])
        );
    }

    #[tokio::test]
    async fn test_offer_forwarded_and_hangup_gets_sender() {
        let relay = MemoryRelay::new();
        let mut alice = connect_as(&relay, "alice").await;
        let mut bob = connect_as(&relay, "bob").await;
        next_message(&mut bob).await; // roster

        let offer = ClientMessage::CallOffer(OfferPayload {
            to: "bob".into(),
            from: "alice".into(),
            signal: Signal::new(json!({"type": "offer"})),
            media_kind: MediaKind::Voice,
            call_id: Some("c1".into()),
        });
        alice.sink.send(offer.to_frame().unwrap()).await.unwrap();
        match next_message(&mut bob).await {
            ServerMessage::CallOffer(offer) => {
                assert_eq!(offer.from, UserId::from("alice"));
                assert_eq!(offer.call_id.as_deref(), Some("c1"));
            }
            other => panic!("unexpected {:?}", other),
        }

        bob.sink
            .send(ClientMessage::hangup("alice".into(), Some("c1".into())).to_frame().unwrap())
            .await
            .unwrap();
        loop {
            match next_message(&mut alice).await {
                ServerMessage::RosterUpdate(_) => continue,
                ServerMessage::CallHangup(hangup) => {
                    assert_eq!(hangup.from, Some(UserId::from("bob")));
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(relay.received_events_from(&"bob".into()), vec!["call-hangup"]);
    }

    #[tokio::test]
    async fn test_close_rebroadcasts_and_refusal() {
        let relay = MemoryRelay::new();
        let mut alice = connect_as(&relay, "alice").await;
        let mut bob = connect_as(&relay, "bob").await;
        bob.sink.close().await;
        assert_eq!(relay.online_users(), vec![UserId::from("alice")]);

        // roster(alice), roster(alice,bob), roster(alice)
        next_message(&mut alice).await;
        next_message(&mut alice).await;
        assert_eq!(
            next_message(&mut alice).await,
            ServerMessage::RosterUpdate(vec![PresenceRecord::new("alice")])
        );

        relay.set_refuse_connections(true);
        assert!(relay.connector().connect().await.is_err());

        relay.disconnect_all();
        assert_eq!(relay.connection_count(), 0);
        assert!(alice.stream.next_frame().await.is_none());
    }
}
