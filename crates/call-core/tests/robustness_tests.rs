//! Duplicate, stale and racing inputs
//!
//! None of these may change the session beyond what the transition table
//! allows, and resources must be released exactly once no matter how many
//! teardown paths fire.

mod common;

use common::*;
use peercall_core::media::{MockBehavior, MockMediaTransport};
use peercall_core::relay::{IncomingAccepted, IncomingHangup};
use peercall_core::{
    CallConfig, CallError, CallEvent, CallState, EndReason, MediaKind, RelayError, RelayEvent, UserId,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_double_hangup_is_idempotent() {
    let h = Harness::new();
    h.establish_outgoing("u2").await;

    h.calls.hang_up().await.unwrap();
    h.calls.hang_up().await.unwrap();
    assert_eq!(h.calls.snapshot().state, CallState::Idle);

    assert_eq!(h.media.release_count(), 1);
    assert_eq!(h.media.close_count(), 1);
    assert_eq!(h.relay.count("call-hangup"), 1);
}

#[tokio::test]
async fn test_call_ended_after_local_hangup_is_ignored() {
    let h = Harness::new();
    h.establish_outgoing("u2").await;
    h.calls.hang_up().await.unwrap();

    h.deliver(RelayEvent::CallEnded);
    h.deliver(RelayEvent::CallHangup(IncomingHangup::default()));
    h.settle().await;

    assert_eq!(h.calls.snapshot().state, CallState::Idle);
    assert_eq!(h.media.release_count(), 1);
    assert_eq!(h.media.close_count(), 1);
}

#[tokio::test]
async fn test_stale_call_id_is_dropped() {
    let h = Harness::new();
    let (session_id, _) = h.establish_outgoing("u2").await;

    h.deliver(RelayEvent::CallHangup(IncomingHangup {
        from: Some("u2".into()),
        call_id: Some("call-from-an-earlier-attempt".to_string()),
    }));
    h.settle().await;

    let snapshot = h.calls.snapshot();
    assert_eq!(snapshot.state, CallState::Active);
    assert_eq!(snapshot.session_id, Some(session_id));
    assert_eq!(h.media.close_count(), 0);
}

#[tokio::test]
async fn test_events_from_other_peers_are_dropped() {
    let h = Harness::new();
    let session_id = h.calls.start_call("u2", MediaKind::Voice).await.unwrap();
    h.wait_for_sent("call-offer").await;

    h.deliver(RelayEvent::CallAccepted(IncomingAccepted {
        signal: Some(answer_signal()),
        from: Some("u9".into()),
        call_id: None,
    }));
    h.deliver(RelayEvent::CallHangup(IncomingHangup {
        from: Some("u9".into()),
        call_id: Some(session_id.as_str().to_string()),
    }));
    h.settle().await;

    assert_eq!(h.calls.snapshot().state, CallState::OutgoingRinging);
    let transport = h.media.last_session().unwrap();
    assert!(h.media.remote_signals(&transport).is_empty());
}

#[tokio::test]
async fn test_busy_while_negotiating() {
    let h = Harness::new();
    let session_id = h.calls.start_call("u2", MediaKind::Video).await.unwrap();
    h.wait_for_sent("call-offer").await;
    h.deliver(accepted_from("u2", &session_id, Some(answer_signal())));
    h.wait_for_state(CallState::Negotiating).await;

    match h.calls.start_call("u3", MediaKind::Voice).await {
        Err(CallError::Busy { peer, state }) => {
            assert_eq!(peer, UserId::from("u2"));
            assert_eq!(state, CallState::Negotiating);
        }
        other => panic!("expected busy, got {:?}", other),
    }

    let snapshot = h.calls.snapshot();
    assert_eq!(snapshot.state, CallState::Negotiating);
    assert_eq!(snapshot.session_id, Some(session_id));
    assert_eq!(h.media.acquire_count(), 1);
    assert_eq!(h.relay.count("call-offer"), 1);
}

#[tokio::test]
async fn test_racing_start_calls_second_is_busy() {
    let media = MockMediaTransport::with_behavior(MockBehavior {
        acquire_delay: Some(Duration::from_millis(30)),
        ..Default::default()
    });
    let h = Harness::with(CallConfig::default(), media);

    let (first, second) = tokio::join!(
        h.calls.start_call("u2", MediaKind::Video),
        h.calls.start_call("u3", MediaKind::Video),
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(CallError::Busy { .. })));
    assert_eq!(h.media.acquire_count(), 1);
}

#[tokio::test]
async fn test_duplicate_offer_while_live_is_dropped() {
    let mut h = Harness::new();
    h.deliver(offer_from("u3", MediaKind::Voice, Some("c-1")));
    h.next_event(|e| matches!(e, CallEvent::IncomingCall { .. })).await;

    h.deliver(offer_from("u3", MediaKind::Voice, Some("c-1")));
    h.deliver(offer_from("u2", MediaKind::Video, Some("c-2")));
    h.settle().await;

    let snapshot = h.calls.snapshot();
    assert_eq!(snapshot.state, CallState::IncomingPending);
    assert_eq!(snapshot.peer_user_id, Some(UserId::from("u3")));
    while let Ok(event) = h.events.try_recv() {
        assert!(!matches!(event, CallEvent::IncomingCall { .. }), "second IncomingCall surfaced");
    }
}

#[tokio::test]
async fn test_hangup_during_acquisition_releases_late_media() {
    let media = MockMediaTransport::with_behavior(MockBehavior {
        acquire_delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let h = Harness::with(CallConfig::default(), media);

    let calls = h.calls.clone();
    let pending = tokio::spawn(async move { calls.start_call("u2", MediaKind::Video).await });
    h.wait_for_state(CallState::OutgoingRinging).await;

    h.calls.hang_up().await.unwrap();
    assert_eq!(h.calls.snapshot().state, CallState::Idle);

    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(CallError::Cancelled {
            reason: EndReason::LocalHangup
        })
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.media.acquire_count(), 1);
    assert_eq!(h.media.release_count(), 1);
    assert!(h.media.held_media().is_empty());
    assert_eq!(h.media.created_count(), 0);
    // The peer never heard of this call
    assert_eq!(h.relay.count("call-hangup"), 0);
    assert_eq!(h.relay.count("call-offer"), 0);
}

#[tokio::test]
async fn test_decline_while_answer_media_is_pending() {
    let media = MockMediaTransport::with_behavior(MockBehavior {
        acquire_delay: Some(Duration::from_millis(200)),
        ..Default::default()
    });
    let mut h = Harness::with(CallConfig::default(), media);
    h.deliver(offer_from("u3", MediaKind::Voice, None));
    h.wait_for_state(CallState::IncomingPending).await;

    let calls = h.calls.clone();
    let pending = tokio::spawn(async move { calls.answer_call().await });
    h.wait_for_state(CallState::Negotiating).await;

    h.calls.decline_call().await.unwrap();
    assert_eq!(h.calls.snapshot().state, CallState::Idle);
    match h.next_event(|e| matches!(e, CallEvent::CallEnded { .. })).await {
        CallEvent::CallEnded { reason, .. } => assert_eq!(reason, EndReason::Declined),
        other => panic!("unexpected {:?}", other),
    }

    let result = pending.await.unwrap();
    assert!(matches!(
        result,
        Err(CallError::Cancelled {
            reason: EndReason::Declined
        })
    ));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.relay.count("call-hangup"), 1);
    assert_eq!(h.relay.count("call-accepted"), 0);
    assert_eq!(h.relay.count("call-answer"), 0);
    assert_eq!(h.media.acquire_count(), 1);
    assert_eq!(h.media.release_count(), 1);
    assert!(h.media.held_media().is_empty());
    assert_eq!(h.media.created_count(), 0);
}

#[tokio::test]
async fn test_decline_after_answer_media_arrived_is_rejected() {
    let h = Harness::new();
    h.deliver(offer_from("u3", MediaKind::Voice, None));
    h.wait_for_state(CallState::IncomingPending).await;
    h.calls.answer_call().await.unwrap();
    assert_eq!(h.calls.snapshot().state, CallState::Negotiating);

    assert!(matches!(h.calls.decline_call().await, Err(CallError::InvalidState { .. })));
    assert_eq!(h.calls.snapshot().state, CallState::Negotiating);
}

#[tokio::test]
async fn test_start_call_guards() {
    let h = Harness::new();

    assert!(matches!(
        h.calls.start_call(ME, MediaKind::Voice).await,
        Err(CallError::InvalidState { .. })
    ));
    assert!(matches!(
        h.calls.start_call("nobody", MediaKind::Voice).await,
        Err(CallError::PeerOffline { .. })
    ));

    h.relay.set_connected(false);
    h.deliver(RelayEvent::ConnectionStatus(peercall_core::ConnectionStatus::Disconnected {
        reason: "test".into(),
    }));
    assert!(matches!(
        h.calls.start_call("u2", MediaKind::Voice).await,
        Err(CallError::Relay(RelayError::NotConnected))
    ));
    assert_eq!(h.media.acquire_count(), 0);
}

#[tokio::test]
async fn test_offline_peer_allowed_when_presence_not_required() {
    let config = CallConfig {
        require_peer_online: false,
        ..Default::default()
    };
    let h = Harness::with(config, MockMediaTransport::new());
    assert!(h.calls.start_call("nobody", MediaKind::Voice).await.is_ok());
}

#[tokio::test]
async fn test_intent_misuse() {
    let h = Harness::new();

    assert!(matches!(h.calls.answer_call().await, Err(CallError::NoActiveCall)));
    assert!(h.calls.decline_call().await.is_ok());
    assert!(h.calls.hang_up().await.is_ok());

    h.calls.start_call("u2", MediaKind::Voice).await.unwrap();
    assert!(matches!(h.calls.answer_call().await, Err(CallError::InvalidState { .. })));
    assert!(matches!(h.calls.decline_call().await, Err(CallError::InvalidState { .. })));
    assert_eq!(h.calls.snapshot().state, CallState::OutgoingRinging);
}

#[tokio::test]
async fn test_stale_transport_events_after_teardown() {
    let h = Harness::new();
    let (_, transport) = h.establish_outgoing("u2").await;
    h.calls.hang_up().await.unwrap();

    // The mock keeps the sink; events now carry a dead session id
    h.media.emit_remote_stream(&transport);
    h.media.emit_failure(&transport, "late");
    h.settle().await;

    assert_eq!(h.calls.snapshot().state, CallState::Idle);
    assert_eq!(h.media.close_count(), 1);
    assert_eq!(h.relay.count("call-hangup"), 1);
}
