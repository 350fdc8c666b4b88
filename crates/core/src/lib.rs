//! fumble-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Identitaeten bereit, die von allen anderen
//! Fumble-Crates gemeinsam genutzt werden: Benutzer, Verbindungen und
//! Nachrichten-IDs.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{FumbleError, Result};
pub use types::{ConnectionId, MessageId, UserId};
