//! Signaling wire protocol
//!
//! Every frame is a JSON envelope `{type, from?, to?, room_id?, data?, timestamp}`.
//! Decoding happens in two steps: the envelope is parsed with `data` left
//! untyped, then `data` is decoded into the [`Payload`] variant selected by
//! `type`. Handlers only ever see typed payloads.

use chrono::{DateTime, Utc};
use huddle_sfu::{IceCandidate, SdpType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Reserved `to` value addressing every other participant
pub const BROADCAST_TARGET: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Join,
    Leave,
    Knock,
    Allow,
    Deny,
    Offer,
    Answer,
    IceCandidate,
    Participants,
    KeyExchange,
    PublicKeys,
    EncryptedData,
    Error,
}

impl MessageKind {
    pub const ALL: [Self; 13] = [
        Self::Join,
        Self::Leave,
        Self::Knock,
        Self::Allow,
        Self::Deny,
        Self::Offer,
        Self::Answer,
        Self::IceCandidate,
        Self::Participants,
        Self::KeyExchange,
        Self::PublicKeys,
        Self::EncryptedData,
        Self::Error,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Knock => "knock",
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice_candidate",
            Self::Participants => "participants",
            Self::KeyExchange => "key_exchange",
            Self::PublicKeys => "public_keys",
            Self::EncryptedData => "encrypted_data",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Participant role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Guest,
}

/// Participant admission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Connected,
    Knocking,
    InRoom,
    Disconnected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpData {
    pub sdp: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sdp_type: Option<SdpType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<ParticipantInfo>,
    #[serde(default)]
    pub guests: BTreeMap<String, ParticipantInfo>,
    /// Number of guests
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeData {
    pub public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeysData {
    pub keys: BTreeMap<String, String>,
}

/// End-to-end encrypted payload; the server only reads `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub to: String,
    pub data: String,
    #[serde(default)]
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: String,
    pub message: String,
}

/// Typed message payload, one variant per message kind
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Join(JoinData),
    Leave,
    Knock,
    /// Guest ID to admit
    Allow(String),
    /// Guest ID to reject
    Deny(String),
    Offer(SdpData),
    Answer(SdpData),
    IceCandidate(IceCandidate),
    Participants(ParticipantsData),
    KeyExchange(KeyExchangeData),
    PublicKeys(PublicKeysData),
    EncryptedData(EncryptedData),
    Error(ErrorData),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("{0} message requires a payload")]
    MissingPayload(MessageKind),

    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: MessageKind,
        source: serde_json::Error,
    },
}

fn typed<T: serde::de::DeserializeOwned>(
    kind: MessageKind,
    data: Option<Value>,
) -> Result<T, ProtocolError> {
    let data = data.ok_or(ProtocolError::MissingPayload(kind))?;
    serde_json::from_value(data).map_err(|source| ProtocolError::MalformedPayload { kind, source })
}

impl Payload {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Join(_) => MessageKind::Join,
            Self::Leave => MessageKind::Leave,
            Self::Knock => MessageKind::Knock,
            Self::Allow(_) => MessageKind::Allow,
            Self::Deny(_) => MessageKind::Deny,
            Self::Offer(_) => MessageKind::Offer,
            Self::Answer(_) => MessageKind::Answer,
            Self::IceCandidate(_) => MessageKind::IceCandidate,
            Self::Participants(_) => MessageKind::Participants,
            Self::KeyExchange(_) => MessageKind::KeyExchange,
            Self::PublicKeys(_) => MessageKind::PublicKeys,
            Self::EncryptedData(_) => MessageKind::EncryptedData,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Decode the untyped `data` field for `kind`
    pub fn decode(kind: MessageKind, data: Option<Value>) -> Result<Self, ProtocolError> {
        let data = data.filter(|v| !v.is_null());
        Ok(match kind {
            MessageKind::Join => match data {
                Some(_) => Self::Join(typed(kind, data)?),
                None => Self::Join(JoinData::default()),
            },
            MessageKind::Leave => Self::Leave,
            MessageKind::Knock => Self::Knock,
            MessageKind::Allow => Self::Allow(typed(kind, data)?),
            MessageKind::Deny => Self::Deny(typed(kind, data)?),
            MessageKind::Offer => Self::Offer(typed(kind, data)?),
            MessageKind::Answer => Self::Answer(typed(kind, data)?),
            MessageKind::IceCandidate => Self::IceCandidate(typed(kind, data)?),
            MessageKind::Participants => Self::Participants(typed(kind, data)?),
            MessageKind::KeyExchange => Self::KeyExchange(typed(kind, data)?),
            MessageKind::PublicKeys => Self::PublicKeys(typed(kind, data)?),
            MessageKind::EncryptedData => Self::EncryptedData(typed(kind, data)?),
            MessageKind::Error => Self::Error(typed(kind, data)?),
        })
    }

    fn to_value(&self) -> Result<Option<Value>, serde_json::Error> {
        let value = match self {
            Self::Leave | Self::Knock => return Ok(None),
            Self::Join(d) => serde_json::to_value(d)?,
            Self::Allow(id) | Self::Deny(id) => Value::String(id.clone()),
            Self::Offer(d) | Self::Answer(d) => serde_json::to_value(d)?,
            Self::IceCandidate(d) => serde_json::to_value(d)?,
            Self::Participants(d) => serde_json::to_value(d)?,
            Self::KeyExchange(d) => serde_json::to_value(d)?,
            Self::PublicKeys(d) => serde_json::to_value(d)?,
            Self::EncryptedData(d) => serde_json::to_value(d)?,
            Self::Error(d) => serde_json::to_value(d)?,
        };
        Ok(Some(value))
    }
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    timestamp: DateTime<Utc>,
}

/// A decoded signaling message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub from: Option<String>,
    pub to: Option<String>,
    pub room_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Message {
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            from: None,
            to: None,
            room_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(Payload::Error(ErrorData {
            code: code.to_string(),
            message: message.into(),
        }))
    }

    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Decode a text frame. The client's timestamp is discarded and replaced
    /// with the time of receipt.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: InboundEnvelope = serde_json::from_str(text)?;
        let kind = MessageKind::parse(&envelope.kind)
            .ok_or_else(|| ProtocolError::UnknownType(envelope.kind.clone()))?;
        let payload = Payload::decode(kind, envelope.data)?;

        Ok(Self {
            from: non_empty(envelope.from),
            to: non_empty(envelope.to),
            room_id: non_empty(envelope.room_id),
            timestamp: Utc::now(),
            payload,
        })
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let envelope = OutboundEnvelope {
            kind: self.kind().as_str(),
            from: self.from.as_deref(),
            to: self.to.as_deref(),
            room_id: self.room_id.as_deref(),
            data: self.payload.to_value()?,
            timestamp: self.timestamp,
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}
