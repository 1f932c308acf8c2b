//! JSON envelopes exchanged with clients over the live connection.
//!
//! Inbound frames carry a `type` discriminator; [`InboundEvent::decode`]
//! classifies them. Outbound frames are either a typed [`ServerEvent`] or a
//! call-signaling payload relayed verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{DEFAULT_REACTION, MAX_PEAKS, MAX_PEAK_VALUE};
use crate::error::ProtocolError;
use crate::types::{ChatId, Message, MessageId, MessageKind, PresenceStatus, Reactions, UserId};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SendMessage(SendMessage),
    React(ReactMessage),
    Typing(TypingUpdate),
    Signal(SignalFrame),
    /// A known type whose fields have the wrong shape.
    Malformed { kind: String, reason: String },
    /// Missing or unrecognised `type`.
    Unknown(Option<String>),
}

impl InboundEvent {
    /// Decode a text frame. Fails only when the frame is not a JSON object.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(Self::classify(map)),
            _ => Err(ProtocolError::NotAnObject),
        }
    }

    pub fn classify(map: Map<String, Value>) -> Self {
        let kind = match map.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Self::Unknown(None),
        };

        if let Some(signal) = SignalKind::parse(&kind) {
            return Self::Signal(SignalFrame {
                kind: signal,
                chat_id: chat_id_field(&map),
                payload: map,
            });
        }

        match kind.as_str() {
            "send_message" => decode_fields(&kind, map, Self::SendMessage),
            "react_message" | "react" => decode_fields(&kind, map, Self::React),
            "typing" | "typing_status" | "is_typing" => {
                Self::Typing(TypingUpdate::from_fields(&map))
            }
            other => Self::Unknown(Some(other.to_string())),
        }
    }
}

fn decode_fields<T, F>(kind: &str, map: Map<String, Value>, wrap: F) -> InboundEvent
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T) -> InboundEvent,
{
    match serde_json::from_value::<T>(Value::Object(map)) {
        Ok(fields) => wrap(fields),
        Err(e) => InboundEvent::Malformed {
            kind: kind.to_string(),
            reason: e.to_string(),
        },
    }
}

fn chat_id_field(map: &Map<String, Value>) -> Option<ChatId> {
    match map.get("chatId") {
        Some(Value::String(id)) if !id.is_empty() => Some(ChatId::new(id.clone())),
        _ => None,
    }
}

/// String form of a loosely-typed id field (clients send either numbers or strings).
fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `send_message`. Only `chatId` and `text` are strictly typed; the audio and
/// reply decorations are interpreted leniently and ignored when unusable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub duration: Option<Value>,
    #[serde(default)]
    pub peaks: Option<Value>,
    #[serde(default)]
    pub reply_to: Option<Value>,
}

impl SendMessage {
    /// Target chat and payload, if both are present and non-empty.
    pub fn target(&self) -> Option<(&ChatId, &str)> {
        let chat_id = self.chat_id.as_ref().filter(|id| !id.as_str().is_empty())?;
        let text = self.text.as_deref().filter(|t| !t.is_empty())?;
        Some((chat_id, text))
    }

    /// Explicit kind when recognised, otherwise sniffed from the payload.
    pub fn resolved_kind(&self) -> Option<MessageKind> {
        self.kind
            .as_ref()
            .and_then(Value::as_str)
            .and_then(MessageKind::parse)
            .or_else(|| self.text.as_deref().and_then(MessageKind::sniff))
    }

    pub fn audio_duration(&self) -> Option<i64> {
        self.duration.as_ref().and_then(Value::as_f64).map(|d| d as i64)
    }

    /// Waveform peaks clamped to `[0, MAX_PEAK_VALUE]` and capped at
    /// `MAX_PEAKS` entries. Entries that are not numeric are skipped.
    pub fn clean_peaks(&self) -> Option<Vec<u16>> {
        let Some(Value::Array(raw)) = &self.peaks else {
            return None;
        };

        let peaks = raw
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            })
            .map(|p| p.clamp(0, MAX_PEAK_VALUE) as u16)
            .take(MAX_PEAKS)
            .collect();
        Some(peaks)
    }

    /// Id of the message being replied to, in string form.
    pub fn reply_target(&self) -> Option<String> {
        match &self.reply_to {
            Some(Value::Object(reply)) => reply.get("id").and_then(id_key),
            _ => None,
        }
    }
}

/// `react_message` (also accepted as `react`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactMessage {
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    #[serde(default)]
    pub message_id: Option<Value>,
    #[serde(default)]
    pub reaction: Option<Value>,
}

impl ReactMessage {
    pub fn target(&self) -> Option<(&ChatId, String)> {
        let chat_id = self.chat_id.as_ref().filter(|id| !id.as_str().is_empty())?;
        let message_id = self.message_id.as_ref().and_then(id_key)?;
        Some((chat_id, message_id))
    }

    pub fn reaction_name(&self) -> String {
        match &self.reaction {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => DEFAULT_REACTION.to_string(),
        }
    }
}

/// Typing indicator. Three field spellings exist for the flag; the first
/// one present wins.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingUpdate {
    pub chat_id: Option<ChatId>,
    pub is_typing: bool,
}

impl TypingUpdate {
    const FLAG_FIELDS: [&'static str; 3] = ["isTyping", "is_typing", "typing"];

    pub fn from_fields(map: &Map<String, Value>) -> Self {
        let is_typing = Self::FLAG_FIELDS
            .iter()
            .find_map(|field| map.get(*field))
            .map(truthy)
            .unwrap_or(false);

        Self {
            chat_id: chat_id_field(map),
            is_typing,
        }
    }
}

/// The call-signaling event kinds relayed between the two participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    CallInvite,
    CallAccept,
    CallDecline,
    CallBusy,
    CallHangup,
    WebrtcOffer,
    WebrtcAnswer,
    WebrtcIce,
    CallMuteState,
}

impl SignalKind {
    pub const ALL: [SignalKind; 9] = [
        Self::CallInvite,
        Self::CallAccept,
        Self::CallDecline,
        Self::CallBusy,
        Self::CallHangup,
        Self::WebrtcOffer,
        Self::WebrtcAnswer,
        Self::WebrtcIce,
        Self::CallMuteState,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallInvite => "call_invite",
            Self::CallAccept => "call_accept",
            Self::CallDecline => "call_decline",
            Self::CallBusy => "call_busy",
            Self::CallHangup => "call_hangup",
            Self::WebrtcOffer => "webrtc_offer",
            Self::WebrtcAnswer => "webrtc_answer",
            Self::WebrtcIce => "webrtc_ice",
            Self::CallMuteState => "call_mute_state",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

/// A call-signaling frame. The payload is kept whole so it can be forwarded
/// unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFrame {
    pub kind: SignalKind,
    pub chat_id: Option<ChatId>,
    pub payload: Map<String, Value>,
}

impl SignalFrame {
    /// The payload with the sender's id injected as `fromId`.
    pub fn forwarded_from(&self, sender: &UserId) -> Map<String, Value> {
        let mut payload = self.payload.clone();
        payload.insert("fromId".to_string(), Value::String(sender.to_string()));
        payload
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Events produced by the server itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    PresenceSnapshot { online_user_ids: Vec<UserId> },

    #[serde(rename_all = "camelCase")]
    UserStatus {
        user_id: UserId,
        status: PresenceStatus,
    },

    #[serde(rename_all = "camelCase")]
    NewMessage { chat_id: ChatId, message: Message },

    #[serde(rename_all = "camelCase")]
    MessageReaction {
        chat_id: ChatId,
        message_id: MessageId,
        reaction: String,
        user_id: UserId,
        active: bool,
        reactions: Reactions,
    },

    #[serde(rename_all = "camelCase")]
    TypingStatus {
        chat_id: ChatId,
        from_id: UserId,
        is_typing: bool,
    },

    #[serde(rename_all = "camelCase")]
    CallUnavailable { chat_id: ChatId, reason: String },

    #[serde(rename_all = "camelCase")]
    ChatDeleted { chat_id: ChatId },

    Banned,

    StoriesUpdated,
}

/// Anything that can be written to a client connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    Server(ServerEvent),
    /// Call-signaling payload forwarded as received, plus `fromId`.
    Relayed(Map<String, Value>),
}

impl OutboundEvent {
    pub fn status(user_id: UserId, status: PresenceStatus) -> Self {
        Self::Server(ServerEvent::UserStatus { user_id, status })
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Server(event) => match event {
                ServerEvent::PresenceSnapshot { .. } => "presence_snapshot",
                ServerEvent::UserStatus { .. } => "user_status",
                ServerEvent::NewMessage { .. } => "new_message",
                ServerEvent::MessageReaction { .. } => "message_reaction",
                ServerEvent::TypingStatus { .. } => "typing_status",
                ServerEvent::CallUnavailable { .. } => "call_unavailable",
                ServerEvent::ChatDeleted { .. } => "chat_deleted",
                ServerEvent::Banned => "banned",
                ServerEvent::StoriesUpdated => "stories_updated",
            },
            Self::Relayed(payload) => payload
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("relayed"),
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ServerEvent> for OutboundEvent {
    fn from(event: ServerEvent) -> Self {
        Self::Server(event)
    }
}
