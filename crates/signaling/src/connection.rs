//! TCP-Verbindung – Verarbeitet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt einen eigenen tokio-Task. Frames werden
//! ueber `FrameCodec` gelesen (u32-Laenge + JSON) und strikt nacheinander
//! an die `Sitzung` uebergeben. Ausgehende Events kommen aus der Send-Queue
//! der Sitzung und werden im selben Task geschrieben.
//!
//! ## Abbruch
//! - Client schliesst die Verbindung
//! - Frame-Lesefehler (z.B. zu grosser Frame)
//! - Shutdown-Signal
//!
//! In jedem Fall wird die Sitzung beendet.

use futures_util::{SinkExt, StreamExt};
use fumble_protocol::{wire::FrameCodec, RawEvent, ServerEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use crate::server_state::RelayState;
use crate::session::Sitzung;

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct TcpVerbindung {
    state: Arc<RelayState>,
    peer_addr: SocketAddr,
}

impl TcpVerbindung {
    /// Erstellt eine neue TcpVerbindung
    pub fn neu(state: Arc<RelayState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Verbindungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht. `sitzung` muss bereits geoeffnet sein.
    pub async fn verarbeiten(
        self,
        stream: TcpStream,
        mut sitzung: Sitzung,
        mut sende_rx: mpsc::Receiver<ServerEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let peer_addr = self.peer_addr;
        tracing::info!(peer = %peer_addr, verbindung = %sitzung.verbindung(), "Neue TCP-Verbindung");

        let codec = FrameCodec::<RawEvent>::with_max_size(self.state.config.max_frame_groesse);
        let mut framed = Framed::new(stream, codec);

        loop {
            tokio::select! {
                frame = framed.next() => {
                    match frame {
                        Some(Ok(Ok(roh))) => {
                            tracing::trace!(peer = %peer_addr, event = %roh.event, "Frame empfangen");
                            sitzung.verarbeiten_roh(roh);
                        }
                        Some(Ok(Err(e))) => {
                            // Kaputtes JSON beendet die Verbindung nicht
                            tracing::debug!(peer = %peer_addr, fehler = %e, "Ungueltiger Frame");
                            self.state.metriken.verworfen("malformed");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::debug!(peer = %peer_addr, "Verbindung vom Client geschlossen");
                            break;
                        }
                    }
                }

                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                        break;
                    }
                }

                Ok(()) = async { shutdown_rx.wait_for(|beendet| *beendet).await.map(|_| ()) } => {
                    tracing::debug!(peer = %peer_addr, "Shutdown-Signal, Verbindung wird getrennt");
                    break;
                }
            }
        }

        sitzung.beenden();
    }
}
