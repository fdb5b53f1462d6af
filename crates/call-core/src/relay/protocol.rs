//! Relay wire format
//!
//! Every frame is a JSON text message `{"event": "<kind>", "data": {...}}`
//! with camelCase payload fields. Outbound frames are [`ClientMessage`]s,
//! inbound frames are [`ServerMessage`]s. Decoding inbound frames is lenient
//! about missing `data` (e.g. `call-ended`) and reports unknown events as a
//! distinct error so the client can log and drop them.

use crate::presence::PresenceRecord;
use crate::types::{MediaKind, Signal, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `register` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub user_id: UserId,
}

/// Outbound `call-offer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub to: UserId,
    pub from: UserId,
    pub signal: Signal,
    pub media_kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Outbound `call-accepted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptPayload {
    pub to: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Outbound `call-answer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub to: UserId,
    pub signal: Signal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Outbound `call-hangup`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupPayload {
    pub to: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Messages the client sends to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    Register(RegisterPayload),
    CallOffer(OfferPayload),
    CallAccepted(AcceptPayload),
    CallAnswer(AnswerPayload),
    CallHangup(HangupPayload),
    Ping,
}

impl ClientMessage {
    pub fn register(user_id: UserId) -> Self {
        ClientMessage::Register(RegisterPayload { user_id })
    }

    pub fn hangup(to: UserId, call_id: Option<String>) -> Self {
        ClientMessage::CallHangup(HangupPayload { to, call_id })
    }

    /// Wire name of the event
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Register(_) => "register",
            ClientMessage::CallOffer(_) => "call-offer",
            ClientMessage::CallAccepted(_) => "call-accepted",
            ClientMessage::CallAnswer(_) => "call-answer",
            ClientMessage::CallHangup(_) => "call-hangup",
            ClientMessage::Ping => "ping",
        }
    }

    /// Recipient, for messages addressed to a peer
    pub fn recipient(&self) -> Option<&UserId> {
        match self {
            ClientMessage::CallOffer(p) => Some(&p.to),
            ClientMessage::CallAccepted(p) => Some(&p.to),
            ClientMessage::CallAnswer(p) => Some(&p.to),
            ClientMessage::CallHangup(p) => Some(&p.to),
            ClientMessage::Register(_) | ClientMessage::Ping => None,
        }
    }

    pub fn to_frame(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(frame: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Inbound `call-offer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingOffer {
    pub from: UserId,
    pub signal: Signal,
    #[serde(default = "default_media_kind")]
    pub media_kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

fn default_media_kind() -> MediaKind {
    MediaKind::Video
}

/// Inbound `call-accepted`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingAccepted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Inbound `call-answer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingAnswer {
    pub signal: Signal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Inbound `call-hangup`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingHangup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Messages the relay delivers to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    RosterUpdate(Vec<PresenceRecord>),
    CallOffer(IncomingOffer),
    CallAccepted(IncomingAccepted),
    CallAnswer(IncomingAnswer),
    CallHangup(IncomingHangup),
    CallEnded,
    Pong,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::RosterUpdate(_) => "roster-update",
            ServerMessage::CallOffer(_) => "call-offer",
            ServerMessage::CallAccepted(_) => "call-accepted",
            ServerMessage::CallAnswer(_) => "call-answer",
            ServerMessage::CallHangup(_) => "call-hangup",
            ServerMessage::CallEnded => "call-ended",
            ServerMessage::Pong => "pong",
        }
    }

    pub fn to_frame(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an inbound text frame
    pub fn from_frame(frame: &str) -> Result<Self, CodecError> {
        let raw: RawFrame = serde_json::from_str(frame)?;
        let message = match raw.event.as_str() {
            "roster-update" => ServerMessage::RosterUpdate(payload(raw.data)?),
            "call-offer" => ServerMessage::CallOffer(payload(raw.data)?),
            "call-accepted" => ServerMessage::CallAccepted(payload_or_default(raw.data)?),
            "call-answer" => ServerMessage::CallAnswer(payload(raw.data)?),
            "call-hangup" => ServerMessage::CallHangup(payload_or_default(raw.data)?),
            "call-ended" => ServerMessage::CallEnded,
            "pong" => ServerMessage::Pong,
            _ => return Err(CodecError::UnknownEvent(raw.event)),
        };
        Ok(message)
    }
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, CodecError> {
    Ok(serde_json::from_value(data)?)
}

fn payload_or_default<T: DeserializeOwned + Default>(data: Value) -> Result<T, CodecError> {
    if data.is_null() {
        return Ok(T::default());
    }
    payload(data)
}

/// Frame encode/decode failure
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
}
