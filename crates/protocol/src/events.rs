//! Event-Vokabular (Client <-> Relay)
//!
//! ## Design
//! - Ein Frame ist immer `{"event": <name>, "data": <payload>}`
//! - Eingehende Frames werden zweistufig gelesen: erst der Umschlag
//!   (`RawEvent`), dann der Payload passend zum Event-Namen. So laesst sich
//!   ein unbekanntes Event sauber von einem kaputten Payload unterscheiden.
//! - Ausgehende Events sind ein adjacently-tagged Enum (`ServerEvent`)

use fumble_core::types::{MessageId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ProtokollFehler;

// ---------------------------------------------------------------------------
// Event-Namen
// ---------------------------------------------------------------------------

pub const EVENT_JOIN: &str = "join";
pub const EVENT_SEND_MESSAGE: &str = "send_message";
pub const EVENT_GET_MESSAGES: &str = "get_messages";
pub const EVENT_SWIPE: &str = "swipe";
pub const EVENT_GET_SWIPES: &str = "get_swipes";

// ---------------------------------------------------------------------------
// Umschlag
// ---------------------------------------------------------------------------

/// Roher Event-Umschlag, wie er vom Transport kommt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawEvent {
    /// Erstellt einen Umschlag aus Name und Payload
    pub fn neu(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Liest einen Umschlag aus JSON-Bytes
    pub fn aus_slice(bytes: &[u8]) -> Result<Self, ProtokollFehler> {
        serde_json::from_slice(bytes).map_err(|e| ProtokollFehler::UngueltigesJson(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Eingehende Payloads
// ---------------------------------------------------------------------------

/// `join` – akzeptiert die nackte ID oder `{"userId": ...}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum JoinPayload {
    Direkt(UserId),
    Objekt {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
}

impl JoinPayload {
    fn into_user_id(self) -> UserId {
        match self {
            Self::Direkt(id) | Self::Objekt { user_id: id } => id,
        }
    }
}

/// `send_message`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub to: UserId,
    pub message: String,
    /// Client-lokale ID der optimistisch angezeigten Nachricht
    #[serde(rename = "tempId", default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<serde_json::Value>,
}

/// `get_messages`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMessagesRequest {
    #[serde(rename = "otherUserId")]
    pub other_user_id: UserId,
}

/// Swipe-Richtung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeRichtung {
    Left,
    Right,
}

impl SwipeRichtung {
    /// Name wie auf dem Draht (auch als Metrik-Label)
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// `swipe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwipeRequest {
    pub to: UserId,
    pub direction: SwipeRichtung,
}

/// Alle Events, die ein Client senden darf
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join(UserId),
    SendMessage(SendMessageRequest),
    GetMessages(GetMessagesRequest),
    Swipe(SwipeRequest),
    GetSwipes,
}

impl ClientEvent {
    /// Interpretiert einen Umschlag anhand des Event-Namens
    pub fn aus_roh(roh: RawEvent) -> Result<Self, ProtokollFehler> {
        let RawEvent { event, data } = roh;
        match event.as_str() {
            EVENT_JOIN => payload::<JoinPayload>(&event, data).map(|p| Self::Join(p.into_user_id())),
            EVENT_SEND_MESSAGE => payload(&event, data).map(Self::SendMessage),
            EVENT_GET_MESSAGES => payload(&event, data).map(Self::GetMessages),
            EVENT_SWIPE => payload(&event, data).map(Self::Swipe),
            // Payload wird ignoriert (Client sendet nichts oder `{}`)
            EVENT_GET_SWIPES => Ok(Self::GetSwipes),
            _ => Err(ProtokollFehler::UnbekanntesEvent(event)),
        }
    }

    /// Liest Umschlag und Payload in einem Schritt
    pub fn aus_slice(bytes: &[u8]) -> Result<Self, ProtokollFehler> {
        Self::aus_roh(RawEvent::aus_slice(bytes)?)
    }

    /// Event-Name fuer Logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => EVENT_JOIN,
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
            Self::GetMessages(_) => EVENT_GET_MESSAGES,
            Self::Swipe(_) => EVENT_SWIPE,
            Self::GetSwipes => EVENT_GET_SWIPES,
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, ProtokollFehler> {
    serde_json::from_value(data).map_err(|e| ProtokollFehler::payload(event, e))
}

// ---------------------------------------------------------------------------
// Ausgehende Events
// ---------------------------------------------------------------------------

/// `receive_message` – zugestellte Chat-Nachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveMessage {
    pub from: UserId,
    pub message: String,
    /// Unix-Millisekunden (UTC)
    pub timestamp: i64,
    pub id: MessageId,
}

/// Ein Eintrag in `messages_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: MessageId,
    pub text: String,
    pub from: UserId,
    pub timestamp: i64,
}

/// `new_match`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMatch {
    pub with: UserId,
}

/// `receive_swipe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveSwipe {
    pub from: UserId,
    pub direction: SwipeRichtung,
}

/// `message_ack` – Bestaetigung an den Absender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAck {
    #[serde(rename = "tempId")]
    pub temp_id: Option<serde_json::Value>,
    pub id: MessageId,
    pub timestamp: i64,
}

/// Alle Events, die der Relay an Clients sendet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(ReceiveMessage),
    MessagesHistory(Vec<HistoryEntry>),
    SwipesHistory(Vec<UserId>),
    NewMatch(NewMatch),
    ReceiveSwipe(ReceiveSwipe),
    MessageAck(MessageAck),
}

impl ServerEvent {
    /// Event-Name fuer Logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessagesHistory(_) => "messages_history",
            Self::SwipesHistory(_) => "swipes_history",
            Self::NewMatch(_) => "new_match",
            Self::ReceiveSwipe(_) => "receive_swipe",
            Self::MessageAck(_) => "message_ack",
        }
    }

    /// Serialisiert das Event als JSON-String
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
