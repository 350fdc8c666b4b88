//! Fehlertypen fuer das Event-Protokoll

use thiserror::Error;

/// Fehler beim Interpretieren eines eingehenden Frames
///
/// Alle Varianten sind nicht-fatal: der Frame wird verworfen, die
/// Verbindung bleibt bestehen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtokollFehler {
    /// Frame ist kein gueltiges Event-Objekt
    #[error("Ungueltiges JSON: {0}")]
    UngueltigesJson(String),

    /// Event-Name ist nicht Teil des Vokabulars
    #[error("Unbekanntes Event: {0}")]
    UnbekanntesEvent(String),

    /// Payload passt nicht zum Event
    #[error("Ungueltiger Payload fuer '{event}': {grund}")]
    UngueltigerPayload { event: String, grund: String },
}

impl ProtokollFehler {
    /// Erstellt einen Payload-Fehler
    pub fn payload(event: impl Into<String>, grund: impl std::fmt::Display) -> Self {
        Self::UngueltigerPayload {
            event: event.into(),
            grund: grund.to_string(),
        }
    }
}
