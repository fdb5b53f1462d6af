//! Static transition table
//!
//! Single source of truth for which state a trigger may move the session to.
//! Teardown triggers are registered as wildcards: they apply to every live
//! state but never to `Idle`.

use crate::types::{CallState, EndReason};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Everything that can move the session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Local `start_call` intent
    StartCall,
    /// Relay delivered a `call-offer`
    IncomingOffer,
    /// Local `answer_call` intent
    AnswerCall,
    /// Relay delivered a `call-accepted`
    RemoteAccepted,
    /// Relay delivered a `call-answer`
    RemoteAnswer,
    /// Transport reported the remote stream
    RemoteStream,
    /// Local `hang_up` intent
    LocalHangup,
    /// Relay delivered `call-hangup` or `call-ended`
    RemoteHangup,
    /// Local `decline_call` intent
    Decline,
    /// Media acquisition failed
    DeviceFailure,
    RingTimeout,
    NegotiationTimeout,
    /// Relay unreachable for longer than the grace period
    RelayLost,
    /// Transport failed or closed on its own
    TransportFailed,
    /// Controller shutting down
    Shutdown,
}

impl Trigger {
    pub const ALL: [Trigger; 15] = [
        Trigger::StartCall,
        Trigger::IncomingOffer,
        Trigger::AnswerCall,
        Trigger::RemoteAccepted,
        Trigger::RemoteAnswer,
        Trigger::RemoteStream,
        Trigger::LocalHangup,
        Trigger::RemoteHangup,
        Trigger::Decline,
        Trigger::DeviceFailure,
        Trigger::RingTimeout,
        Trigger::NegotiationTimeout,
        Trigger::RelayLost,
        Trigger::TransportFailed,
        Trigger::Shutdown,
    ];
}

impl From<&EndReason> for Trigger {
    fn from(reason: &EndReason) -> Self {
        match reason {
            EndReason::LocalHangup => Trigger::LocalHangup,
            EndReason::RemoteHangup => Trigger::RemoteHangup,
            EndReason::Declined => Trigger::Decline,
            EndReason::DeviceError(_) => Trigger::DeviceFailure,
            EndReason::RingTimeout => Trigger::RingTimeout,
            EndReason::NegotiationTimeout => Trigger::NegotiationTimeout,
            EndReason::RelayLost => Trigger::RelayLost,
            EndReason::TransportFailed(_) => Trigger::TransportFailed,
            EndReason::Shutdown => Trigger::Shutdown,
        }
    }
}

pub const ALL_STATES: [CallState; 5] = [
    CallState::Idle,
    CallState::OutgoingRinging,
    CallState::IncomingPending,
    CallState::Negotiating,
    CallState::Active,
];

#[derive(Debug, Default)]
pub struct TransitionTable {
    transitions: HashMap<(CallState, Trigger), CallState>,
    /// Apply to any live state
    wildcard: HashMap<Trigger, CallState>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: CallState, trigger: Trigger, to: CallState) {
        self.transitions.insert((from, trigger), to);
    }

    pub fn insert_wildcard(&mut self, trigger: Trigger, to: CallState) {
        self.wildcard.insert(trigger, to);
    }

    /// Next state for `trigger` in `state`, or `None` if the table forbids it
    pub fn next(&self, state: CallState, trigger: Trigger) -> Option<CallState> {
        if let Some(to) = self.transitions.get(&(state, trigger)) {
            return Some(*to);
        }
        if state.is_live() {
            return self.wildcard.get(&trigger).copied();
        }
        None
    }

    pub fn allows(&self, state: CallState, trigger: Trigger) -> bool {
        self.next(state, trigger).is_some()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len() + self.wildcard.len()
    }

    /// Every live state must be able to reach `Idle`, and every state the
    /// table can enter must be reachable from `Idle`
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for state in ALL_STATES.iter().filter(|s| s.is_live()) {
            let exits_to_idle = Trigger::ALL
                .iter()
                .any(|t| self.next(*state, *t) == Some(CallState::Idle));
            if !exits_to_idle {
                errors.push(format!("{} has no path back to idle", state));
            }
        }

        let mut reachable = HashSet::from([CallState::Idle]);
        let mut frontier = vec![CallState::Idle];
        while let Some(state) = frontier.pop() {
            for trigger in Trigger::ALL {
                if let Some(next) = self.next(state, trigger) {
                    if reachable.insert(next) {
                        frontier.push(next);
                    }
                }
            }
        }
        for state in ALL_STATES {
            if !reachable.contains(&state) {
                errors.push(format!("{} is unreachable from idle", state));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// The call session transition table
pub static TRANSITIONS: Lazy<TransitionTable> = Lazy::new(build_table);

fn build_table() -> TransitionTable {
    use CallState::*;
    let mut table = TransitionTable::new();

    // Caller side
    table.insert(Idle, Trigger::StartCall, OutgoingRinging);
    table.insert(OutgoingRinging, Trigger::RemoteAccepted, Negotiating);
    table.insert(OutgoingRinging, Trigger::RemoteAnswer, Negotiating);
    table.insert(OutgoingRinging, Trigger::DeviceFailure, Idle);
    table.insert(OutgoingRinging, Trigger::RingTimeout, Idle);

    // Callee side
    table.insert(Idle, Trigger::IncomingOffer, IncomingPending);
    table.insert(IncomingPending, Trigger::AnswerCall, Negotiating);
    table.insert(IncomingPending, Trigger::Decline, Idle);
    table.insert(IncomingPending, Trigger::RingTimeout, Idle);

    // Shared
    table.insert(Negotiating, Trigger::RemoteStream, Active);
    table.insert(Negotiating, Trigger::DeviceFailure, Idle);
    table.insert(Negotiating, Trigger::NegotiationTimeout, Idle);
    // Callee still acquiring media for the answer
    table.insert(Negotiating, Trigger::Decline, Idle);

    // Teardown from any live state
    table.insert_wildcard(Trigger::LocalHangup, Idle);
    table.insert_wildcard(Trigger::RemoteHangup, Idle);
    table.insert_wildcard(Trigger::RelayLost, Idle);
    table.insert_wildcard(Trigger::TransportFailed, Idle);
    table.insert_wildcard(Trigger::Shutdown, Idle);

    table
}
