//! # PeerCall Core
//!
//! Call-session signaling for one-to-one audio/video calls between identified
//! users. A relay only forwards small JSON messages; media flows directly
//! between the peers once the transport has negotiated.
//!
//! The crate is made of:
//!
//! - **Relay Client** ([`relay`]): persistent relay connection with
//!   registration, reconnect/backoff, heartbeat and a typed event bus
//! - **Presence Tracker** ([`presence`]): who is online, replaced on every roster
//! - **Media Transport Adapter** ([`media`]): the capability surface the core
//!   needs from capture devices and the peer connection, plus a mock
//! - **Call Session State Machine** ([`state_machine`]): at most one live
//!   session, driven by a static transition table
//! - **Controller / Context** ([`controller`], [`context`]): the task that runs
//!   the machine and the object that wires everything together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peercall_core::{CallContext, CallConfig, Identity, MediaKind, RelayConfig};
//! use peercall_core::media::MockMediaTransport;
//! use peercall_core::relay::MemoryRelay;
//! use std::sync::Arc;
//!
//! # async fn example() -> peercall_core::CallResult<()> {
//! let relay = MemoryRelay::new();
//! let context = CallContext::start(
//!     Identity::new("alice", "alice-share"),
//!     RelayConfig::new("memory://relay"),
//!     CallConfig::default(),
//!     Arc::new(relay.connector()),
//!     Arc::new(MockMediaTransport::new()),
//! )?;
//!
//! let calls = context.handle();
//! let session = calls.start_call("bob", MediaKind::Video).await?;
//! println!("calling as {}", session);
//! calls.hang_up().await?;
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod media;
pub mod presence;
pub mod relay;
pub mod state_machine;
pub mod types;

pub use config::{CallConfig, RelayConfig};
pub use context::CallContext;
pub use controller::{CallController, CallHandle};
pub use error::{CallError, CallResult};
pub use events::{CallEvent, CallSnapshot};
pub use media::{DeviceError, MediaHandle, MediaTransport, StreamHandle, TransportError, TransportEvent};
pub use presence::{PresenceRecord, PresenceTracker};
pub use relay::{ConnectionStatus, ReconnectPolicy, RelayClient, RelayConnector, RelayError, RelayEvent};
pub use state_machine::CallInput;
pub use types::{
    CallDirection, CallState, EndReason, Identity, MediaKind, SessionId, ShareId, Signal, UserId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
