//! Call flow tests
//!
//! Drives the controller through the caller and callee paths with a
//! recording relay and the mock media transport, checking the state,
//! outbound messages and resource lifecycle at every step.

mod common;

use common::*;
use peercall_core::media::{MockBehavior, MockMediaTransport};
use peercall_core::relay::{ClientMessage, IncomingAnswer, IncomingHangup};
use peercall_core::{
    CallConfig, CallDirection, CallError, CallEvent, CallState, DeviceError, EndReason, MediaKind,
    RelayEvent, UserId,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_outgoing_call_reaches_active() {
    let h = Harness::new();

    let session_id = h.calls.start_call("u2", MediaKind::Video).await.unwrap();
    assert_eq!(h.calls.snapshot().state, CallState::OutgoingRinging);

    match h.wait_for_sent("call-offer").await {
        ClientMessage::CallOffer(offer) => {
            assert_eq!(offer.to, UserId::from("u2"));
            assert_eq!(offer.from, UserId::from(ME));
            assert_eq!(offer.media_kind, MediaKind::Video);
            assert_eq!(offer.call_id.as_deref(), Some(session_id.as_str()));
        }
        other => panic!("unexpected {:?}", other),
    }

    h.deliver(accepted_from("u2", &session_id, Some(answer_signal())));
    h.wait_for_state(CallState::Negotiating).await;

    let transport = h.media.last_session().unwrap();
    assert_eq!(h.media.is_initiator(&transport), Some(true));
    assert_eq!(h.media.remote_signals(&transport), vec![answer_signal()]);

    h.media.emit_remote_stream(&transport);
    let snapshot = h.wait_for_state(CallState::Active).await;
    assert_eq!(snapshot.direction, Some(CallDirection::Outgoing));
    assert_eq!(snapshot.peer_user_id, Some(UserId::from("u2")));
    assert!(snapshot.local_stream.is_some());
    assert!(snapshot.remote_stream.is_some());
}

#[tokio::test]
async fn test_incoming_call_declined() {
    let h = Harness::new();

    h.deliver(offer_from("u3", MediaKind::Voice, Some("c-3")));
    let snapshot = h.wait_for_state(CallState::IncomingPending).await;
    assert_eq!(snapshot.peer_user_id, Some(UserId::from("u3")));
    assert_eq!(snapshot.media_kind, Some(MediaKind::Voice));

    h.calls.decline_call().await.unwrap();
    assert_eq!(h.calls.snapshot().state, CallState::Idle);

    match h.wait_for_sent("call-hangup").await {
        ClientMessage::CallHangup(hangup) => {
            assert_eq!(hangup.to, UserId::from("u3"));
            assert_eq!(hangup.call_id.as_deref(), Some("c-3"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.media.acquire_count(), 0);
    assert_eq!(h.media.created_count(), 0);
}

#[tokio::test]
async fn test_remote_call_ended_tears_down_silently() {
    let h = Harness::new();
    let (_, transport) = h.establish_outgoing("u2").await;
    h.relay.clear();

    h.deliver(RelayEvent::CallEnded);
    h.wait_for_state(CallState::Idle).await;

    assert_eq!(h.media.close_count(), 1);
    assert_eq!(h.media.release_count(), 1);
    assert!(h.media.open_sessions().is_empty());
    assert!(h.media.held_media().is_empty());
    assert!(!h.media.open_sessions().contains(&transport));

    h.settle().await;
    assert!(h.relay.sent().is_empty(), "unexpected: {:?}", h.relay.sent_events());
}

#[tokio::test]
async fn test_device_failure_while_answering() {
    let h = Harness::with(CallConfig::default(), MockMediaTransport::failing(DeviceError::PermissionDenied));

    h.deliver(offer_from("u3", MediaKind::Video, None));
    h.wait_for_state(CallState::IncomingPending).await;

    let result = h.calls.answer_call().await;
    assert!(matches!(result, Err(CallError::Device(DeviceError::PermissionDenied))));
    assert_eq!(h.calls.snapshot().state, CallState::Idle);

    h.settle().await;
    assert_eq!(h.relay.count("call-accepted"), 0);
    assert_eq!(h.relay.count("call-hangup"), 1);
    assert_eq!(h.media.created_count(), 0);
}

#[tokio::test]
async fn test_incoming_call_answered() {
    let mut h = Harness::new();

    h.deliver(offer_from("u3", MediaKind::Voice, Some("c-9")));
    match h.next_event(|e| matches!(e, CallEvent::IncomingCall { .. })).await {
        CallEvent::IncomingCall { from, media_kind, .. } => {
            assert_eq!(from, UserId::from("u3"));
            assert_eq!(media_kind, MediaKind::Voice);
        }
        other => panic!("unexpected {:?}", other),
    }

    let session_id = h.calls.answer_call().await.unwrap();
    assert_eq!(h.calls.snapshot().session_id, Some(session_id));
    assert_eq!(h.calls.snapshot().state, CallState::Negotiating);

    let transport = h.media.last_session().unwrap();
    assert_eq!(h.media.is_initiator(&transport), Some(false));
    assert_eq!(h.media.remote_signals(&transport), vec![offer_signal()]);

    match h.wait_for_sent("call-answer").await {
        ClientMessage::CallAnswer(answer) => {
            assert_eq!(answer.to, UserId::from("u3"));
            assert_eq!(answer.call_id.as_deref(), Some("c-9"));
        }
        other => panic!("unexpected {:?}", other),
    }
    // Accept goes out before the answer
    assert_eq!(h.relay.sent_events(), vec!["call-accepted", "call-answer"]);

    h.media.emit_remote_stream(&transport);
    h.wait_for_state(CallState::Active).await;
}

#[tokio::test]
async fn test_accept_then_answer_feeds_signal_once() {
    let h = Harness::new();
    let session_id = h.calls.start_call("u2", MediaKind::Voice).await.unwrap();
    h.wait_for_sent("call-offer").await;

    h.deliver(accepted_from("u2", &session_id, None));
    h.wait_for_state(CallState::Negotiating).await;

    let answer = RelayEvent::CallAnswer(IncomingAnswer {
        signal: answer_signal(),
        from: Some("u2".into()),
        call_id: Some(session_id.as_str().to_string()),
    });
    h.deliver(answer.clone());
    h.deliver(answer);
    h.settle().await;

    let transport = h.media.last_session().unwrap();
    assert_eq!(h.media.remote_signals(&transport), vec![answer_signal()]);
    assert_eq!(h.calls.snapshot().state, CallState::Negotiating);
}

#[tokio::test]
async fn test_auto_remote_stream_completes_negotiation() {
    let media = MockMediaTransport::with_behavior(MockBehavior {
        auto_remote_stream: true,
        ..Default::default()
    });
    let mut h = Harness::with(CallConfig::default(), media);

    let session_id = h.calls.start_call("u2", MediaKind::Video).await.unwrap();
    h.wait_for_sent("call-offer").await;
    h.deliver(accepted_from("u2", &session_id, Some(answer_signal())));

    h.wait_for_state(CallState::Active).await;
    let event = h.next_event(|e| matches!(e, CallEvent::RemoteStream { .. })).await;
    assert_eq!(event.session_id(), &session_id);
}

#[tokio::test]
async fn test_local_hangup_reports_duration() {
    let mut h = Harness::new();
    let (session_id, _) = h.establish_outgoing("u2").await;

    h.calls.hang_up().await.unwrap();
    match h.next_event(|e| matches!(e, CallEvent::CallEnded { .. })).await {
        CallEvent::CallEnded {
            session_id: ended,
            peer,
            reason,
            duration,
        } => {
            assert_eq!(ended, session_id);
            assert_eq!(peer, UserId::from("u2"));
            assert_eq!(reason, EndReason::LocalHangup);
            assert!(duration.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.relay.count("call-hangup"), 1);
}

#[tokio::test]
async fn test_remote_hangup_while_ringing() {
    let h = Harness::new();
    let session_id = h.calls.start_call("u2", MediaKind::Voice).await.unwrap();
    h.wait_for_sent("call-offer").await;

    h.deliver(RelayEvent::CallHangup(IncomingHangup {
        from: Some("u2".into()),
        call_id: Some(session_id.as_str().to_string()),
    }));
    h.wait_for_state(CallState::Idle).await;

    assert_eq!(h.media.release_count(), 1);
    assert_eq!(h.media.close_count(), 1);
    assert_eq!(h.relay.count("call-hangup"), 0);
}

#[tokio::test]
async fn test_transport_failure_ends_call() {
    let mut h = Harness::new();
    let (_, transport) = h.establish_outgoing("u2").await;

    h.media.emit_failure(&transport, "ice failed");
    h.wait_for_state(CallState::Idle).await;

    match h.next_event(|e| matches!(e, CallEvent::CallEnded { .. })).await {
        CallEvent::CallEnded { reason, .. } => {
            assert_eq!(reason, EndReason::TransportFailed("ice failed".to_string()));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.relay.count("call-hangup"), 1);
    assert!(h.media.held_media().is_empty());
}

#[tokio::test]
async fn test_next_call_after_teardown() {
    let h = Harness::new();
    h.establish_outgoing("u2").await;
    h.calls.hang_up().await.unwrap();
    h.wait_for_state(CallState::Idle).await;

    h.relay.clear();
    let second = h.calls.start_call("u3", MediaKind::Voice).await.unwrap();
    match h.wait_for_sent("call-offer").await {
        ClientMessage::CallOffer(offer) => {
            assert_eq!(offer.to, UserId::from("u3"));
            assert_eq!(offer.call_id.as_deref(), Some(second.as_str()));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.media.created_count(), 2);
}

#[tokio::test]
async fn test_shutdown_ends_live_call() {
    let h = Harness::new();
    h.establish_outgoing("u2").await;

    let calls = h.calls.clone();
    let relay = h.relay.clone();
    let media = h.media.clone();
    h.controller.shutdown().await;

    assert_eq!(calls.snapshot().state, CallState::Idle);
    assert_eq!(relay.count("call-hangup"), 1);
    assert!(media.held_media().is_empty());
    assert!(matches!(
        calls.start_call("u2", MediaKind::Voice).await,
        Err(CallError::ControllerClosed)
    ));
}
