//! Call session state machine
//!
//! Owns the at-most-one live [`CallSession`] and reacts to one [`CallInput`]
//! at a time. Every transition is checked against [`TRANSITIONS`]; every
//! input that refers to another session (by local session id, wire call id
//! or peer) is logged and dropped.

use super::session::{CallSession, PendingReply, TimerKind};
use super::table::{Trigger, TRANSITIONS};
use super::CallInput;
use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::{CallEvent, CallSnapshot};
use crate::media::{DeviceError, MediaHandle, MediaTransport, TransportEvent, TransportEventSink};
use crate::presence::PresenceTracker;
use crate::relay::{
    AcceptPayload, AnswerPayload, ClientMessage, ConnectionStatus, IncomingAccepted, IncomingAnswer,
    IncomingHangup, IncomingOffer, OfferPayload, RelayError, RelayEvent, RelaySender,
};
use crate::types::{CallDirection, CallState, EndReason, Identity, MediaKind, SessionId, Signal, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

pub struct CallStateMachine {
    identity: Identity,
    config: CallConfig,
    media: Arc<dyn MediaTransport>,
    relay: Arc<dyn RelaySender>,
    presence: PresenceTracker,
    inputs: mpsc::UnboundedSender<CallInput>,
    snapshots: watch::Sender<CallSnapshot>,
    events: broadcast::Sender<CallEvent>,
    relay_connected: bool,
    session: Option<CallSession>,
}

impl CallStateMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Identity,
        config: CallConfig,
        media: Arc<dyn MediaTransport>,
        relay: Arc<dyn RelaySender>,
        presence: PresenceTracker,
        inputs: mpsc::UnboundedSender<CallInput>,
        snapshots: watch::Sender<CallSnapshot>,
        events: broadcast::Sender<CallEvent>,
    ) -> Self {
        let relay_connected = relay.is_connected();
        Self {
            identity,
            config,
            media,
            relay,
            presence,
            inputs,
            snapshots,
            events,
            relay_connected,
            session: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.session.as_ref().map(|s| s.state).unwrap_or(CallState::Idle)
    }

    /// Handle one input to completion. Returns `false` once shut down.
    pub fn handle(&mut self, input: CallInput) -> bool {
        match input {
            CallInput::StartCall { peer, kind, reply } => self.on_start_call(peer, kind, reply),
            CallInput::AnswerCall { reply } => self.on_answer_call(reply),
            CallInput::DeclineCall { reply } => {
                let _ = reply.send(self.on_decline_call());
            }
            CallInput::HangUp { reply } => {
                let _ = reply.send(self.on_hang_up());
            }
            CallInput::Relay(event) => self.on_relay_event(event),
            CallInput::MediaAcquired { session_id, result } => self.on_media_acquired(session_id, result),
            CallInput::Transport { session_id, event } => self.on_transport_event(session_id, event),
            CallInput::Timer { session_id, kind, epoch } => self.on_timer(session_id, kind, epoch),
            CallInput::Shutdown => {
                self.on_shutdown();
                return false;
            }
        }
        true
    }

    // ---- intents -------------------------------------------------------

    fn on_start_call(&mut self, peer: UserId, kind: MediaKind, reply: PendingReply) {
        if let Some(session) = &self.session {
            debug!("Rejecting call to {}: busy with {}", peer, session.peer);
            let _ = reply.send(Err(CallError::Busy {
                peer: session.peer.clone(),
                state: session.state,
            }));
            return;
        }
        if peer == self.identity.user_id {
            let _ = reply.send(Err(CallError::invalid_state("cannot call yourself")));
            return;
        }
        if !self.relay_connected {
            let _ = reply.send(Err(CallError::Relay(RelayError::NotConnected)));
            return;
        }
        if self.config.require_peer_online && !self.presence.is_online(&peer) {
            let _ = reply.send(Err(CallError::PeerOffline { peer }));
            return;
        }
        if !TRANSITIONS.allows(CallState::Idle, Trigger::StartCall) {
            let _ = reply.send(Err(CallError::invalid_state("start_call not allowed")));
            return;
        }

        let session = CallSession::outgoing(peer, kind, reply);
        info!("Calling {} ({}) as {}", session.peer, kind, session.session_id);
        let session_id = session.session_id.clone();
        self.session = Some(session);
        self.state_changed(&session_id, CallState::Idle, CallState::OutgoingRinging);
        self.spawn_acquire(session_id, kind);
    }

    fn on_answer_call(&mut self, reply: PendingReply) {
        let Some(session) = self.session.as_mut() else {
            let _ = reply.send(Err(CallError::NoActiveCall));
            return;
        };
        let Some(next) = TRANSITIONS.next(session.state, Trigger::AnswerCall) else {
            let _ = reply.send(Err(CallError::invalid_state(format!(
                "cannot answer while {}",
                session.state
            ))));
            return;
        };

        let from = session.state;
        session.state = next;
        session.reply = Some(reply);
        session.cancel_timer(TimerKind::Ring);
        let session_id = session.session_id.clone();
        let kind = session.media_kind;
        info!("Answering call from {} ({})", session.peer, session_id);

        self.state_changed(&session_id, from, next);
        self.spawn_acquire(session_id, kind);
    }

    fn on_decline_call(&mut self) -> CallResult<()> {
        let Some(session) = &self.session else {
            debug!("decline_call with no call in progress");
            return Ok(());
        };
        // Past IncomingPending only while the answer's media is still pending
        let undecided = session.state == CallState::IncomingPending
            || (session.direction == CallDirection::Incoming && session.media.is_none());
        if !undecided || !TRANSITIONS.allows(session.state, Trigger::Decline) {
            return Err(CallError::invalid_state(format!(
                "cannot decline while {}; use hang_up",
                session.state
            )));
        }
        self.notify_hangup();
        self.teardown(EndReason::Declined);
        Ok(())
    }

    fn on_hang_up(&mut self) -> CallResult<()> {
        if self.session.is_none() {
            debug!("hang_up with no call in progress");
            return Ok(());
        }
        self.notify_hangup();
        self.teardown(EndReason::LocalHangup);
        Ok(())
    }

    fn on_shutdown(&mut self) {
        if self.session.is_some() {
            self.notify_hangup();
            self.teardown(EndReason::Shutdown);
        }
        info!("Call state machine stopped");
    }

    // ---- media ---------------------------------------------------------

    fn spawn_acquire(&mut self, session_id: SessionId, kind: MediaKind) {
        let media = self.media.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = media.acquire(kind).await;
            if let Err(mpsc::error::SendError(CallInput::MediaAcquired { result: Ok(handle), .. })) =
                inputs.send(CallInput::MediaAcquired { session_id, result })
            {
                // Machine is gone; nobody else will release it
                media.release(&handle);
            }
        });
    }

    fn on_media_acquired(&mut self, session_id: SessionId, result: Result<MediaHandle, DeviceError>) {
        if !self.is_current(&session_id) {
            debug!("Media acquired for stale session {}", session_id);
            if let Ok(handle) = result {
                self.media.release(&handle);
            }
            return;
        }

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Media acquisition failed for {}: {}", session_id, e);
                self.reply(Err(CallError::Device(e.clone())));
                // An incoming caller must hear that we will not pick up
                if self.direction() == Some(CallDirection::Incoming) {
                    self.notify_hangup();
                }
                self.teardown(EndReason::DeviceError(e.to_string()));
                return;
            }
        };

        let sink = TransportEventSink::new(session_id.clone(), self.inputs.clone());
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let initiator = session.direction == CallDirection::Outgoing;
        let created = self.media.create_session(initiator, &handle, sink);
        session.media = Some(handle);

        let transport = match created {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to create transport for {}: {}", session_id, e);
                self.reply(Err(CallError::Transport(e.clone())));
                if self.direction() == Some(CallDirection::Incoming) {
                    self.notify_hangup();
                }
                self.teardown(EndReason::TransportFailed(e.to_string()));
                return;
            }
        };
        debug!("Transport {} created for {}", transport, session_id);
        session.transport = Some(transport);
        let direction = session.direction;
        let to = session.peer.clone();
        let call_id = session.call_id.clone();

        self.reply(Ok(session_id.clone()));
        self.publish_snapshot();

        if direction == CallDirection::Incoming {
            self.send(ClientMessage::CallAccepted(AcceptPayload {
                to,
                signal: None,
                call_id,
            }));
        }

        if let Some(signal) = self.session.as_mut().and_then(|s| s.pending_remote_signal.take()) {
            self.apply_remote_signal(signal);
        }
        self.arm_negotiation_timer();
        // Bounded even if the transport never produces an offer
        if direction == CallDirection::Outgoing && self.state() == CallState::OutgoingRinging {
            self.arm_timer(TimerKind::Ring, self.config.ring_timeout());
        }
    }

    fn on_transport_event(&mut self, session_id: SessionId, event: TransportEvent) {
        if !self.is_current(&session_id) {
            debug!("Dropping transport event for stale session {}: {:?}", session_id, event);
            return;
        }

        match event {
            TransportEvent::LocalSignal(signal) => self.on_local_signal(signal),
            TransportEvent::RemoteStream(stream) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let Some(next) = TRANSITIONS.next(session.state, Trigger::RemoteStream) else {
                    debug!("Remote stream while {}; ignored", session.state);
                    return;
                };
                let from = session.state;
                session.state = next;
                session.remote_stream = Some(stream.clone());
                session.connected_at = Some(tokio::time::Instant::now());
                session.cancel_timer(TimerKind::Negotiation);
                info!("Call {} with {} is active", session_id, session.peer);

                self.state_changed(&session_id, from, next);
                self.emit(CallEvent::RemoteStream { session_id, stream });
            }
            TransportEvent::Failed(reason) => {
                warn!("Transport failed for {}: {}", session_id, reason);
                self.notify_hangup();
                self.teardown(EndReason::TransportFailed(reason));
            }
            TransportEvent::Closed => {
                warn!("Transport closed underneath {}", session_id);
                self.notify_hangup();
                self.teardown(EndReason::TransportFailed("transport closed".to_string()));
            }
        }
    }

    fn on_local_signal(&mut self, signal: Signal) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.local_signal_sent {
            debug!("Extra local signal for {} dropped", session.session_id);
            return;
        }
        session.local_signal_sent = true;
        let to = session.peer.clone();
        let call_id = session.call_id.clone();

        match session.direction {
            CallDirection::Outgoing => {
                session.offer_sent = true;
                let media_kind = session.media_kind;
                debug!("Sending offer to {}", to);
                self.send(ClientMessage::CallOffer(OfferPayload {
                    to,
                    from: self.identity.user_id.clone(),
                    signal,
                    media_kind,
                    call_id,
                }));
            }
            CallDirection::Incoming => {
                debug!("Sending answer to {}", to);
                self.send(ClientMessage::CallAnswer(AnswerPayload { to, signal, call_id }));
            }
        }
    }

    fn apply_remote_signal(&mut self, signal: Signal) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(transport) = session.transport.clone() else {
            debug!("Buffering remote signal for {} until the transport exists", session.session_id);
            session.pending_remote_signal = Some(signal);
            return;
        };
        session.remote_signal_applied = true;
        if let Err(e) = self.media.signal(&transport, signal) {
            warn!("Transport rejected remote signal: {}", e);
            self.notify_hangup();
            self.teardown(EndReason::TransportFailed(e.to_string()));
        }
    }

    // ---- relay ---------------------------------------------------------

    fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::CallOffer(offer) => self.on_remote_offer(offer),
            RelayEvent::CallAccepted(accepted) => self.on_remote_accepted(accepted),
            RelayEvent::CallAnswer(answer) => self.on_remote_answer(answer),
            RelayEvent::CallHangup(hangup) => self.on_remote_hangup(hangup),
            RelayEvent::CallEnded => {
                if self.session.is_some() {
                    info!("Peer ended the call");
                    self.teardown(EndReason::RemoteHangup);
                } else {
                    debug!("call-ended with no call in progress");
                }
            }
            RelayEvent::ConnectionStatus(status) => self.on_connection_status(status),
            RelayEvent::RosterUpdate(_) => {}
        }
    }

    fn on_remote_offer(&mut self, offer: IncomingOffer) {
        if let Some(session) = &self.session {
            debug!(
                "Dropping call-offer from {} while {} with {}",
                offer.from, session.state, session.peer
            );
            return;
        }
        if offer.from == self.identity.user_id {
            debug!("Dropping call-offer from ourselves");
            return;
        }
        if !TRANSITIONS.allows(CallState::Idle, Trigger::IncomingOffer) {
            return;
        }

        let session = CallSession::incoming(offer.from.clone(), offer.media_kind, offer.call_id, offer.signal);
        let session_id = session.session_id.clone();
        info!("Incoming {} call from {} ({})", offer.media_kind, offer.from, session_id);
        self.session = Some(session);

        self.state_changed(&session_id, CallState::Idle, CallState::IncomingPending);
        self.emit(CallEvent::IncomingCall {
            session_id,
            from: offer.from,
            media_kind: offer.media_kind,
        });
        self.arm_timer(TimerKind::Ring, self.config.ring_timeout());
    }

    fn on_remote_accepted(&mut self, accepted: IncomingAccepted) {
        if !self.accepts_from_peer(accepted.from.as_ref(), accepted.call_id.as_deref(), "call-accepted") {
            return;
        }
        self.enter_negotiating(Trigger::RemoteAccepted, accepted.signal);
    }

    fn on_remote_answer(&mut self, answer: IncomingAnswer) {
        if !self.accepts_from_peer(answer.from.as_ref(), answer.call_id.as_deref(), "call-answer") {
            return;
        }
        self.enter_negotiating(Trigger::RemoteAnswer, Some(answer.signal));
    }

    /// Caller side: the callee accepted and/or answered
    fn enter_negotiating(&mut self, trigger: Trigger, signal: Option<Signal>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.direction != CallDirection::Outgoing {
            debug!("Ignoring {:?} on an incoming call", trigger);
            return;
        }

        if let Some(next) = TRANSITIONS.next(session.state, trigger) {
            let from = session.state;
            session.state = next;
            session.cancel_timer(TimerKind::Ring);
            let session_id = session.session_id.clone();
            info!("{} accepted call {}", session.peer, session_id);
            self.state_changed(&session_id, from, next);
            self.arm_negotiation_timer();
        } else if session.state != CallState::Negotiating {
            debug!("{:?} while {}; ignored", trigger, session.state);
            return;
        }

        let Some(signal) = signal else {
            return;
        };
        let already_applied = self
            .session
            .as_ref()
            .map(|s| s.remote_signal_applied || s.pending_remote_signal.is_some())
            .unwrap_or(true);
        if already_applied {
            debug!("Duplicate remote answer dropped");
            return;
        }
        self.apply_remote_signal(signal);
    }

    fn on_remote_hangup(&mut self, hangup: IncomingHangup) {
        if !self.accepts_from_peer(hangup.from.as_ref(), hangup.call_id.as_deref(), "call-hangup") {
            return;
        }
        info!("Peer hung up");
        self.teardown(EndReason::RemoteHangup);
    }

    fn accepts_from_peer(&self, from: Option<&UserId>, call_id: Option<&str>, event: &str) -> bool {
        match &self.session {
            None => {
                debug!("{} with no call in progress", event);
                false
            }
            Some(session) if !session.matches(from, call_id) => {
                debug!(
                    "Stale {} (from {:?}, callId {:?}) for session with {}",
                    event, from, call_id, session.peer
                );
                false
            }
            Some(_) => true,
        }
    }

    fn on_connection_status(&mut self, status: ConnectionStatus) {
        if status.is_connected() {
            self.relay_connected = true;
            if let Some(session) = self.session.as_mut() {
                if session.has_timer(TimerKind::RelayLoss) {
                    info!("Relay back; keeping call {}", session.session_id);
                    session.cancel_timer(TimerKind::RelayLoss);
                }
            }
            return;
        }

        self.relay_connected = false;
        let needs_timer = self
            .session
            .as_ref()
            .map(|s| !s.has_timer(TimerKind::RelayLoss))
            .unwrap_or(false);
        if needs_timer {
            warn!("Relay {} during a call; grace period started", status);
            self.arm_timer(TimerKind::RelayLoss, Some(self.config.relay_loss_grace()));
        }
    }

    // ---- timers --------------------------------------------------------

    fn arm_negotiation_timer(&mut self) {
        let ready = self
            .session
            .as_ref()
            .map(|s| s.state == CallState::Negotiating && s.transport.is_some())
            .unwrap_or(false);
        if ready {
            self.arm_timer(TimerKind::Negotiation, self.config.negotiation_timeout());
        }
    }

    fn arm_timer(&mut self, kind: TimerKind, after: Option<Duration>) {
        let Some(after) = after else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let epoch = session.next_timer_epoch();
        let session_id = session.session_id.clone();
        let inputs = self.inputs.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inputs.send(CallInput::Timer { session_id, kind, epoch });
        });
        session.set_timer(kind, epoch, task);
    }

    fn on_timer(&mut self, session_id: SessionId, kind: TimerKind, epoch: u64) {
        if !self.is_current(&session_id) {
            debug!("{:?} timer for stale session {}", kind, session_id);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.take_fired_timer(kind, epoch) {
            debug!("{:?} timer was re-armed or cancelled", kind);
            return;
        }
        let state = session.state;

        match kind {
            TimerKind::Ring if TRANSITIONS.allows(state, Trigger::RingTimeout) => {
                warn!("No answer within ring timeout; ending {}", session_id);
                self.notify_hangup();
                self.teardown(EndReason::RingTimeout);
            }
            TimerKind::Negotiation if TRANSITIONS.allows(state, Trigger::NegotiationTimeout) => {
                warn!("Negotiation for {} timed out", session_id);
                self.notify_hangup();
                self.teardown(EndReason::NegotiationTimeout);
            }
            TimerKind::RelayLoss if !self.relay_connected => {
                warn!("Relay still unreachable; ending {}", session_id);
                self.teardown(EndReason::RelayLost);
            }
            _ => debug!("{:?} timer fired while {}; nothing to do", kind, state),
        }
    }

    // ---- teardown ------------------------------------------------------

    /// Tell the peer we are leaving, if it ever heard of the session
    fn notify_hangup(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        if !session.offer_sent {
            debug!("Peer never saw {}; no hangup sent", session.session_id);
            return;
        }
        let message = ClientMessage::hangup(session.peer.clone(), session.call_id.clone());
        self.send(message);
    }

    /// Return to `Idle`, releasing everything the session owns exactly once
    fn teardown(&mut self, reason: EndReason) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let from = session.state;
        if TRANSITIONS.next(from, Trigger::from(&reason)) != Some(CallState::Idle) {
            error!("Teardown ({}) from {} is not in the transition table", reason, from);
        }

        session.cancel_all_timers();
        if let Some(transport) = session.transport.take() {
            self.media.close(&transport);
        }
        if let Some(media) = session.media.take() {
            self.media.release(&media);
        }
        if let Some(reply) = session.reply.take() {
            let _ = reply.send(Err(CallError::Cancelled { reason: reason.clone() }));
        }

        let duration = session.connected_at.map(|t| t.elapsed());
        info!("Call {} with {} ended: {}", session.session_id, session.peer, reason);

        self.state_changed(&session.session_id, from, CallState::Idle);
        self.emit(CallEvent::CallEnded {
            session_id: session.session_id.clone(),
            peer: session.peer.clone(),
            reason,
            duration,
        });
    }

    // ---- helpers -------------------------------------------------------

    fn is_current(&self, session_id: &SessionId) -> bool {
        self.session.as_ref().map(|s| &s.session_id == session_id).unwrap_or(false)
    }

    fn direction(&self) -> Option<CallDirection> {
        self.session.as_ref().map(|s| s.direction)
    }

    fn reply(&mut self, result: CallResult<SessionId>) {
        if let Some(reply) = self.session.as_mut().and_then(|s| s.reply.take()) {
            let _ = reply.send(result);
        }
    }

    fn send(&self, message: ClientMessage) {
        let event = message.event_name();
        if let Err(e) = self.relay.send(message) {
            warn!("Could not send {}: {}", event, e);
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self
            .session
            .as_ref()
            .map(|s| s.snapshot())
            .unwrap_or_else(CallSnapshot::idle);
        self.snapshots.send_replace(snapshot);
    }

    fn state_changed(&self, session_id: &SessionId, from: CallState, to: CallState) {
        debug!("{}: {} -> {}", session_id, from, to);
        self.publish_snapshot();
        self.emit(CallEvent::StateChanged {
            session_id: session_id.clone(),
            from,
            to,
        });
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
