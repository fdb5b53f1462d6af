//! Error types for the signaling core
//!
//! Only device and busy errors (plus intent misuse such as answering with no
//! incoming call) ever reach the caller of an intent. Stale relay events are
//! not errors at all: they are logged and dropped inside the state machine.

use crate::media::{DeviceError, TransportError};
use crate::relay::RelayError;
use crate::types::{CallState, EndReason, UserId};
use thiserror::Error;

/// Result type for call operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors surfaced by call intents and the relay client
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// Local media acquisition failed; the attempted session is gone
    #[error("Media device error: {0}")]
    Device(#[from] DeviceError),

    /// A call is already in progress
    #[error("Busy: call with {peer} is {state}")]
    Busy { peer: UserId, state: CallState },

    /// The callee has no relay connection
    #[error("Peer {peer} is not online")]
    PeerOffline { peer: UserId },

    /// The intent does not apply to the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// No call to act on
    #[error("No call in progress")]
    NoActiveCall,

    /// The session ended before the intent completed
    #[error("Call ended before the request completed: {reason}")]
    Cancelled { reason: EndReason },

    /// Media transport rejected an operation
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Relay connection problem
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// The controller task is gone
    #[error("Call controller has shut down")]
    ControllerClosed,

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl CallError {
    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether retrying the same intent later can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallError::Busy { .. }
            | CallError::PeerOffline { .. }
            | CallError::Cancelled { .. }
            | CallError::NoActiveCall => true,
            CallError::Relay(e) => e.is_recoverable(),
            CallError::Device(DeviceError::Busy(_)) => true,
            CallError::Device(_)
            | CallError::InvalidState { .. }
            | CallError::Transport(_)
            | CallError::ControllerClosed
            | CallError::Configuration { .. } => false,
        }
    }

    /// Short category name for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            CallError::Device(_) => "device",
            CallError::Busy { .. } => "busy",
            CallError::PeerOffline { .. } => "presence",
            CallError::InvalidState { .. } | CallError::NoActiveCall => "state",
            CallError::Cancelled { .. } => "cancelled",
            CallError::Transport(_) => "transport",
            CallError::Relay(_) => "relay",
            CallError::ControllerClosed => "controller",
            CallError::Configuration { .. } => "config",
        }
    }
}
