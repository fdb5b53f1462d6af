//! Call Session State Machine
//!
//! Everything that can affect the call funnels into one queue of
//! [`CallInput`]s: local intents, relay events, media acquisition
//! completions, transport callbacks and timers. The machine handles them one
//! at a time, so there is never a second writer to the session.

pub mod machine;
pub mod session;
pub mod table;

use crate::error::CallResult;
use crate::media::{DeviceError, MediaHandle, TransportEvent};
use crate::relay::RelayEvent;
use crate::types::{MediaKind, SessionId, UserId};
use tokio::sync::oneshot;

pub use machine::CallStateMachine;
pub use session::{CallSession, TimerKind};
pub use table::{Trigger, TransitionTable, TRANSITIONS};

/// One unit of work for the state machine
#[derive(Debug)]
pub enum CallInput {
    /// Replies once local media is acquired (or the attempt failed)
    StartCall {
        peer: UserId,
        kind: MediaKind,
        reply: oneshot::Sender<CallResult<SessionId>>,
    },
    /// Replies once local media is acquired (or the attempt failed)
    AnswerCall {
        reply: oneshot::Sender<CallResult<SessionId>>,
    },
    DeclineCall {
        reply: oneshot::Sender<CallResult<()>>,
    },
    HangUp {
        reply: oneshot::Sender<CallResult<()>>,
    },
    Relay(RelayEvent),
    MediaAcquired {
        session_id: SessionId,
        result: Result<MediaHandle, DeviceError>,
    },
    Transport {
        session_id: SessionId,
        event: TransportEvent,
    },
    Timer {
        session_id: SessionId,
        kind: TimerKind,
        epoch: u64,
    },
    Shutdown,
}
