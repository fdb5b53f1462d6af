//! Process-scoped wiring of relay, presence and controller
//!
//! [`CallContext`] is the explicit owner of the three long-lived pieces. It
//! attaches the relay subscriptions before the relay connects, so the first
//! roster and any early offer are never missed.

use crate::config::{CallConfig, RelayConfig};
use crate::controller::{CallController, CallHandle};
use crate::error::CallResult;
use crate::media::MediaTransport;
use crate::presence::PresenceTracker;
use crate::relay::{EventKind, RelayClient, RelayConnector, RelayEvent, SubscriptionId};
use crate::types::Identity;
use std::sync::Arc;
use tracing::info;

pub struct CallContext {
    identity: Identity,
    relay: RelayClient,
    presence: PresenceTracker,
    controller: CallController,
    subscriptions: Vec<SubscriptionId>,
}

impl CallContext {
    /// Validate configuration, wire everything up and connect to the relay
    pub fn start(
        identity: Identity,
        relay_config: RelayConfig,
        call_config: CallConfig,
        connector: Arc<dyn RelayConnector>,
        media: Arc<dyn MediaTransport>,
    ) -> CallResult<Self> {
        relay_config.validate()?;
        call_config.validate()?;

        let relay = RelayClient::new(connector, relay_config);
        let presence = PresenceTracker::new();
        let controller = CallController::spawn(
            identity.clone(),
            call_config,
            media,
            Arc::new(relay.clone()),
            presence.clone(),
        );

        let mut subscriptions = Vec::new();

        let roster = presence.clone();
        subscriptions.push(relay.subscribe(EventKind::RosterUpdate, move |event| {
            if let RelayEvent::RosterUpdate(records) = event {
                roster.apply_roster(records);
            }
        }));

        let stale = presence.clone();
        subscriptions.push(relay.subscribe(EventKind::ConnectionStatus, move |event| {
            if let RelayEvent::ConnectionStatus(status) = event {
                if !status.is_connected() {
                    stale.clear();
                }
            }
        }));

        for kind in EventKind::CALL_EVENTS {
            let handle = controller.handle();
            subscriptions.push(relay.subscribe(kind, move |event| {
                handle.deliver_relay_event(event.clone());
            }));
        }

        relay.register(identity.user_id.clone());
        relay.start();
        info!("Call context started for {}", identity.user_id);

        Ok(Self {
            identity,
            relay,
            presence,
            controller,
            subscriptions,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn handle(&self) -> CallHandle {
        self.controller.handle()
    }

    pub fn relay(&self) -> &RelayClient {
        &self.relay
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// End any live call, then disconnect from the relay
    pub async fn shutdown(self) {
        info!("Shutting down call context for {}", self.identity.user_id);
        // The controller says goodbye to the peer while the relay is still up
        self.controller.shutdown().await;
        for id in self.subscriptions {
            self.relay.unsubscribe(id);
        }
        self.relay.shutdown().await;
    }
}
