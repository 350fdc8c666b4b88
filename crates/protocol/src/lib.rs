//! fumble-protocol – Event-Vokabular des Relay
//!
//! Dieses Crate definiert alle Events, die zwischen Client und Relay
//! ausgetauscht werden, sowie das Frame-Format fuer TCP-Verbindungen.
//!
//! Jeder Frame ist ein JSON-Objekt `{"event": <name>, "data": <payload>}`.

pub mod error;
pub mod events;
pub mod wire;

pub use error::ProtokollFehler;
pub use events::{ClientEvent, RawEvent, ServerEvent, SwipeRichtung};
pub use wire::FrameCodec;
