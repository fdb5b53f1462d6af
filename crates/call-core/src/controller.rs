//! Controller task and the cloneable handle used to drive it

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::{CallEvent, CallSnapshot};
use crate::media::MediaTransport;
use crate::presence::PresenceTracker;
use crate::relay::{RelayEvent, RelaySender};
use crate::state_machine::{CallInput, CallStateMachine};
use crate::types::{Identity, MediaKind, SessionId, UserId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const EVENT_CAPACITY: usize = 64;

/// Runs the state machine on its own task until shut down
pub struct CallController {
    handle: CallHandle,
    task: JoinHandle<()>,
}

impl CallController {
    /// Spawn the controller task. Must be called inside a tokio runtime.
    pub fn spawn(
        identity: Identity,
        config: CallConfig,
        media: Arc<dyn MediaTransport>,
        relay: Arc<dyn RelaySender>,
        presence: PresenceTracker,
    ) -> Self {
        let (inputs, mut rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(CallSnapshot::idle());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!("Starting call controller for {}", identity.user_id);
        let mut machine = CallStateMachine::new(
            identity,
            config,
            media,
            relay,
            presence,
            inputs.clone(),
            snapshots,
            events.clone(),
        );

        let task = tokio::spawn(async move {
            while let Some(input) = rx.recv().await {
                if !machine.handle(input) {
                    break;
                }
            }
            debug!("Call controller loop exited");
        });

        Self {
            handle: CallHandle {
                inputs,
                snapshots: snapshot_rx,
                events,
            },
            task,
        }
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    /// Stop the task, ending any live call with [`EndReason::Shutdown`](crate::types::EndReason::Shutdown)
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(e) = self.task.await {
            error!("Call controller task failed: {}", e);
        }
    }
}

/// Cloneable front door to the controller
#[derive(Clone)]
pub struct CallHandle {
    inputs: mpsc::UnboundedSender<CallInput>,
    snapshots: watch::Receiver<CallSnapshot>,
    events: broadcast::Sender<CallEvent>,
}

impl CallHandle {
    /// Call `peer`. Resolves once local media is acquired.
    pub async fn start_call(&self, peer: impl Into<UserId>, kind: MediaKind) -> CallResult<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.submit(CallInput::StartCall {
            peer: peer.into(),
            kind,
            reply,
        })?;
        rx.await.map_err(|_| CallError::ControllerClosed)?
    }

    /// Answer the pending incoming call. Resolves once local media is acquired.
    pub async fn answer_call(&self) -> CallResult<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.submit(CallInput::AnswerCall { reply })?;
        rx.await.map_err(|_| CallError::ControllerClosed)?
    }

    pub async fn decline_call(&self) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(CallInput::DeclineCall { reply })?;
        rx.await.map_err(|_| CallError::ControllerClosed)?
    }

    /// End the call in any state. A no-op when idle.
    pub async fn hang_up(&self) -> CallResult<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(CallInput::HangUp { reply })?;
        rx.await.map_err(|_| CallError::ControllerClosed)?
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Feed a relay event into the queue. Returns `false` once the controller is gone.
    pub fn deliver_relay_event(&self, event: RelayEvent) -> bool {
        self.inputs.send(CallInput::Relay(event)).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.inputs.send(CallInput::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.inputs.is_closed()
    }

    fn submit(&self, input: CallInput) -> CallResult<()> {
        self.inputs.send(input).map_err(|_| CallError::ControllerClosed)
    }
}
