//! Fehlertypen fuer Fumble
//!
//! Zentraler Fehler-Enum fuer Zustaende, die crate-uebergreifend
//! auftreten koennen. Untermodule definieren eigene Fehler und
//! konvertieren bei Bedarf via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Fumble
pub type Result<T> = std::result::Result<T, FumbleError>;

/// Crate-uebergreifende Fehler im Fumble-System
#[derive(Debug, Error)]
pub enum FumbleError {
    // --- Netzwerk ---
    #[error("Bind fehlgeschlagen auf {adresse}: {grund}")]
    Bind { adresse: String, grund: String },

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl FumbleError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler den ganzen Prozess beendet
    ///
    /// Nur ein fehlgeschlagener Bind des Listeners ist fatal, alles andere
    /// betrifft hoechstens eine einzelne Verbindung.
    pub fn ist_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Konfiguration(_))
    }
}
