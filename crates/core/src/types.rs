//! Gemeinsame Identifikationstypen fuer Fumble
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Stabile Benutzer-Identitaet (Profil-ID)
///
/// Clients senden die ID teils als String, teils als Zahl. Beide Formen
/// werden beim Deserialisieren auf denselben String normalisiert, `7` und
/// `"7"` bezeichnen also denselben Benutzer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Erstellt eine UserId aus einem beliebigen String
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::neu(id)
    }
}

/// Rohform einer ID auf dem Draht
#[derive(Deserialize)]
#[serde(untagged)]
enum RohId {
    Text(String),
    Zahl(serde_json::Number),
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = match RohId::deserialize(deserializer)? {
            RohId::Text(s) => s,
            RohId::Zahl(n) => n.to_string(),
        };
        if text.trim().is_empty() {
            return Err(serde::de::Error::custom("Benutzer-ID darf nicht leer sein"));
        }
        Ok(Self(text))
    }
}

/// Eindeutige ID einer Live-Verbindung
///
/// Identifiziert genau eine Transport-Verbindung fuer ihre gesamte
/// Lebensdauer. Wird nie wiederverwendet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Prozessweit eindeutige, aufsteigende Nachrichten-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_aus_string_und_zahl_gleich() {
        let a: UserId = serde_json::from_str("\"7\"").unwrap();
        let b: UserId = serde_json::from_str("7").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "7");
    }

    #[test]
    fn leere_user_id_abgelehnt() {
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
        assert!(serde_json::from_str::<UserId>("\"   \"").is_err());
    }

    #[test]
    fn user_id_wird_als_string_serialisiert() {
        let json = serde_json::to_string(&UserId::neu("42")).unwrap();
        assert_eq!(json, "\"42\"");
    }

    #[test]
    fn connection_id_eindeutig() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b, "Zwei neue ConnectionIds muessen verschieden sein");
    }

    #[test]
    fn connection_id_display() {
        let id = ConnectionId(Uuid::nil());
        assert!(id.to_string().starts_with("conn:"));
    }

    #[test]
    fn message_id_transparent() {
        assert_eq!(serde_json::to_string(&MessageId(12)).unwrap(), "12");
    }
}
