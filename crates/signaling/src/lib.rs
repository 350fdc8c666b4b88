//! fumble-signaling – Echtzeit-Relay fuer Chat, Swipes und Matches
//!
//! Dieser Crate implementiert den Relay-Kern von Fumble. Er verwaltet, welcher
//! Benutzer unter welcher Live-Verbindung erreichbar ist, und leitet
//! Punkt-zu-Punkt-Events (Chat-Nachrichten, Swipes, Match-Meldungen) zwischen
//! beliebig vielen gleichzeitig verbundenen Clients weiter.
//!
//! ## Architektur
//!
//! ```text
//! WsRelayServer (GET /ws)        TcpRelayServer (optional)
//!     |                              |
//!     +--------------+---------------+
//!                    v
//! Sitzung (pro Verbindung ein Task, strikt serielle Verarbeitung)
//!     |  State Machine: Unbound -> Bound(user) -> Terminated
//!     |
//!     v
//! RelayDispatcher
//!     |
//!     +-- on_chat_message  (ablegen, zustellen)
//!     +-- on_swipe         (aufzeichnen, optional weiterleiten / Match)
//!     +-- on_get_messages  (Verlauf eines Paares)
//!     +-- on_get_swipes    (bisherige Swipe-Ziele)
//!
//! ConnectionRegistry – Identitaet <-> Live-Verbindung (letzter join gewinnt)
//! RelayHistory       – In-Memory-Verlauf fuer Nachrichten und Swipes
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod registry;
pub mod server_state;
pub mod session;
pub mod tcp;
pub mod ws;

// Bequeme Re-Exporte
pub use connection::TcpVerbindung;
pub use dispatcher::{DispatchKontext, RelayDispatcher};
pub use error::{RelayError, RelayResult};
pub use history::RelayHistory;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use server_state::{RelayConfig, RelayState};
pub use session::{Sitzung, SitzungsZustand};
pub use tcp::TcpRelayServer;
pub use ws::{ws_router, WsRelayServer};
