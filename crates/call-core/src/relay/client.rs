//! Relay connection supervisor
//!
//! A single background task owns the link. It connects, registers, pumps
//! outbound messages and heartbeats, decodes inbound frames onto the bus and
//! reconnects with backoff whenever the link drops. Callers only ever touch
//! the cheap [`RelayClient`] handle.

use super::{
    ClientMessage, ConnectionStatus, EventBus, EventKind, RelayConnector, RelayError, RelayEvent,
    RelayLink, RelaySender, ServerMessage, SubscriptionId,
};
use crate::config::RelayConfig;
use crate::types::UserId;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

enum Command {
    Send(ClientMessage),
    /// Announce a new identity; the link skips it if already announced
    Register(UserId),
    Shutdown,
}

/// Why a link stopped
enum LinkEnd {
    Lost(String),
    Shutdown,
}

struct Shared {
    bus: EventBus,
    status: watch::Sender<ConnectionStatus>,
    registered: RwLock<Option<UserId>>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status.clone());
        self.bus.publish(&RelayEvent::ConnectionStatus(status));
    }
}

/// Handle to the relay connection. Cloning shares the same connection.
#[derive(Clone)]
pub struct RelayClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    pending: Arc<Mutex<Option<Supervisor>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RelayClient {
    /// Create a client. Nothing connects until [`start`](Self::start), so
    /// subscribers can be attached first.
    pub fn new(connector: Arc<dyn RelayConnector>, config: RelayConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Closed);
        let shared = Arc::new(Shared {
            bus: EventBus::new(),
            status,
            registered: RwLock::new(None),
        });
        let (commands, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            shared: shared.clone(),
            connector,
            config,
            commands: rx,
        };

        Self {
            shared,
            commands,
            pending: Arc::new(Mutex::new(Some(supervisor))),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the connection supervisor. Later calls are no-ops.
    pub fn start(&self) {
        let Some(supervisor) = self.pending.lock().take() else {
            debug!("Relay client already started");
            return;
        };
        let handle = tokio::spawn(supervisor.run());
        *self.task.lock() = Some(handle);
    }

    /// Register the local identity. Idempotent; re-sent after every reconnect.
    pub fn register(&self, user_id: UserId) {
        let changed = {
            let mut registered = self.shared.registered.write();
            let changed = registered.as_ref() != Some(&user_id);
            *registered = Some(user_id.clone());
            changed
        };
        if !changed {
            debug!("Already registered as {}", user_id);
            return;
        }
        // Queued regardless of status: the link may be between reading
        // `registered` and reporting Connected
        let _ = self.commands.send(Command::Register(user_id));
    }

    pub fn registered_user(&self) -> Option<UserId> {
        self.shared.registered.read().clone()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&RelayEvent) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    /// Watch connection status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the link is up, or `timeout` elapses
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), RelayError> {
        let mut status = self.watch_status();
        let result = match tokio::time::timeout(timeout, status.wait_for(|s| s.is_connected())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(RelayError::Shutdown),
            Err(_) => Err(RelayError::NotConnected),
        };
        result
    }

    /// Stop the supervisor and close the link
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Relay supervisor task failed: {}", e);
            }
        }
    }
}

impl RelaySender for RelayClient {
    fn send(&self, message: ClientMessage) -> Result<(), RelayError> {
        if !self.is_connected() {
            debug!("Dropping {} while disconnected", message.event_name());
            return Err(RelayError::NotConnected);
        }
        self.commands
            .send(Command::Send(message))
            .map_err(|_| RelayError::Shutdown)
    }

    fn is_connected(&self) -> bool {
        self.shared.status.borrow().is_connected()
    }
}

struct Supervisor {
    shared: Arc<Shared>,
    connector: Arc<dyn RelayConnector>,
    config: RelayConfig,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut backoff = self.config.reconnect.backoff();
        info!("Relay client starting for {}", self.config.url);

        loop {
            self.shared.set_status(ConnectionStatus::Connecting);
            match self.connector.connect().await {
                Ok(link) => {
                    backoff.reset();
                    match self.drive(link).await {
                        LinkEnd::Shutdown => break,
                        LinkEnd::Lost(reason) => {
                            warn!("Relay connection lost: {}", reason);
                            self.shared.set_status(ConnectionStatus::Disconnected { reason });
                        }
                    }
                }
                Err(e) => {
                    warn!("Relay connect to {} failed: {}", self.config.url, e);
                    self.shared
                        .set_status(ConnectionStatus::Disconnected { reason: e.to_string() });
                }
            }

            let delay = backoff.next_delay();
            self.shared.set_status(ConnectionStatus::Reconnecting {
                attempt: backoff.attempt(),
                delay_ms: delay.as_millis() as u64,
            });
            if !self.wait_before_retry(delay).await {
                break;
            }
        }

        self.shared.set_status(ConnectionStatus::Closed);
        info!("Relay client stopped");
    }

    /// Sleep out the backoff delay. Returns `false` on shutdown.
    async fn wait_before_retry(&mut self, delay: Duration) -> bool {
        let deadline = sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        debug!("Dropping {} queued while disconnected", message.event_name());
                    }
                    // The next link registers from `registered`
                    Some(Command::Register(_)) => {}
                    Some(Command::Shutdown) | None => return false,
                }
            }
        }
    }

    async fn drive(&mut self, link: RelayLink) -> LinkEnd {
        let RelayLink { mut sink, mut stream } = link;

        // Anything still queued was addressed to the previous connection
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(message) => {
                    debug!("Discarding stale {} from previous connection", message.event_name());
                }
                // Superseded by the read of `registered` below
                Command::Register(_) => {}
                Command::Shutdown => {
                    sink.close().await;
                    return LinkEnd::Shutdown;
                }
            }
        }

        // Identity announced on this link
        let mut announced: Option<UserId> = None;
        let registered = self.shared.registered.read().clone();
        if let Some(user_id) = registered {
            if let Err(e) = send_message(&mut *sink, &ClientMessage::register(user_id.clone())).await {
                return LinkEnd::Lost(format!("register failed: {}", e));
            }
            debug!("Registered as {}", user_id);
            announced = Some(user_id);
        }

        info!("Connected to relay {}", self.config.url);
        self.shared.set_status(ConnectionStatus::Connected);

        let period = self.config.heartbeat_interval().unwrap_or(Duration::from_secs(3600));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat_enabled = self.config.heartbeat_interval().is_some();

        loop {
            tokio::select! {
                frame = stream.next_frame() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => return LinkEnd::Lost(e.to_string()),
                    None => return LinkEnd::Lost("closed by relay".to_string()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = send_message(&mut *sink, &message).await {
                            warn!("Failed to send {}: {}", message.event_name(), e);
                            return LinkEnd::Lost(e.to_string());
                        }
                    }
                    Some(Command::Register(user_id)) => {
                        if announced.as_ref() == Some(&user_id) {
                            debug!("{} already registered on this link", user_id);
                            continue;
                        }
                        if let Err(e) = send_message(&mut *sink, &ClientMessage::register(user_id.clone())).await {
                            return LinkEnd::Lost(format!("register failed: {}", e));
                        }
                        debug!("Registered as {}", user_id);
                        announced = Some(user_id);
                    }
                    Some(Command::Shutdown) | None => {
                        sink.close().await;
                        return LinkEnd::Shutdown;
                    }
                },
                _ = heartbeat.tick(), if heartbeat_enabled => {
                    if let Err(e) = send_message(&mut *sink, &ClientMessage::Ping).await {
                        return LinkEnd::Lost(format!("heartbeat failed: {}", e));
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match ServerMessage::from_frame(text) {
            Ok(message) => {
                debug!("Relay -> {}", message.event_name());
                if let Some(event) = RelayEvent::from_server(message) {
                    self.shared.bus.publish(&event);
                }
            }
            Err(e) => warn!("Dropping relay frame: {}", e),
        }
    }
}

async fn send_message(
    sink: &mut dyn super::FrameSink,
    message: &ClientMessage,
) -> Result<(), RelayError> {
    let frame = message
        .to_frame()
        .map_err(|e| RelayError::Protocol(e.to_string()))?;
    sink.send(frame).await
}
