//! Fehlertypen fuer den Relay
//!
//! Keiner dieser Fehler ist fatal. Der Dispatcher wandelt jeden Fehler in
//! eine Log-Zeile und einen Metrik-Zaehler um, der Client sieht nichts.

use fumble_core::types::{ConnectionId, UserId};
use fumble_protocol::ProtokollFehler;
use thiserror::Error;

/// Fehlertyp fuer den Relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Event von einer Verbindung ohne `join`
    #[error("Absender unbekannt: '{event}' vor join empfangen")]
    UnresolvedSender { event: &'static str },

    /// Empfaenger hat keine Live-Verbindung
    #[error("Empfaenger offline: {0}")]
    RecipientOffline(UserId),

    /// Event oder Payload ungueltig
    #[error("Ungueltiges Event: {0}")]
    MalformedEvent(String),

    /// Send-Queue des Empfaengers ist voll
    #[error("Send-Queue voll: {0}")]
    QueueVoll(ConnectionId),

    /// Send-Queue des Empfaengers ist geschlossen (Verbindung beendet)
    #[error("Senden fehlgeschlagen: {0} geschlossen")]
    SendFehler(ConnectionId),
}

impl RelayError {
    /// Erstellt einen Fehler fuer ein ungueltiges Event
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Grund als Metrik-Label
    pub fn grund(&self) -> &'static str {
        match self {
            Self::UnresolvedSender { .. } => "unresolved_sender",
            Self::RecipientOffline(_) => "recipient_offline",
            Self::MalformedEvent(_) => "malformed",
            Self::QueueVoll(_) => "queue_full",
            Self::SendFehler(_) => "queue_closed",
        }
    }
}

impl From<ProtokollFehler> for RelayError {
    fn from(e: ProtokollFehler) -> Self {
        Self::MalformedEvent(e.to_string())
    }
}

/// Result-Typ fuer den Relay
pub type RelayResult<T> = Result<T, RelayError>;
