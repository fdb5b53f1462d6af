//! # PeerCall Relay WebSocket transport
//!
//! Implements [`RelayConnector`](peercall_core::RelayConnector) over a
//! WebSocket, one JSON text frame per relay message. Plug a [`WsConnector`]
//! into a [`RelayClient`](peercall_core::RelayClient) or a
//! [`CallContext`](peercall_core::CallContext):
//!
//! ```rust,no_run
//! use peercall_core::{CallConfig, CallContext, Identity, RelayConfig};
//! use peercall_core::media::MockMediaTransport;
//! use peercall_relay_ws::WsConnector;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let relay_config = RelayConfig::new("ws://127.0.0.1:8080/relay");
//! let connector = WsConnector::from_config(&relay_config)?;
//! let context = CallContext::start(
//!     Identity::new("alice", "alice-share"),
//!     relay_config,
//!     CallConfig::default(),
//!     Arc::new(connector),
//!     Arc::new(MockMediaTransport::new()),
//! )?;
//! # context.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! `wss://` URLs need the `tls` feature.

pub mod connector;

pub use connector::{ConnectorError, WsConnector, DEFAULT_CONNECT_TIMEOUT};
