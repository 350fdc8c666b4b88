//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `TcpRelayServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer `TcpVerbindung`.
//! Alle geteilten Zustaende sind `Send + Sync`, die Tasks laufen daher auf
//! dem normalen Multi-Thread-Executor.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::connection::TcpVerbindung;
use crate::server_state::RelayState;
use crate::session::Sitzung;

/// TCP-Relay-Server
pub struct TcpRelayServer {
    state: Arc<RelayState>,
    listener: TcpListener,
}

impl TcpRelayServer {
    /// Bindet den TCP-Socket
    ///
    /// Getrennt von `starten`, damit ein Bind-Fehler beim Start sichtbar wird
    /// und Tests Port 0 verwenden koennen.
    pub async fn binden(state: Arc<RelayState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept-Loop
    ///
    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
    pub async fn starten(self, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Relay-Server gestartet");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Some((sitzung, sende_rx)) = Sitzung::oeffnen(Arc::clone(&self.state)) else {
                                tracing::warn!(peer = %peer_addr, "Server voll, Verbindung abgelehnt");
                                drop(stream);
                                continue;
                            };

                            let verbindung = TcpVerbindung::neu(Arc::clone(&self.state), peer_addr);
                            let shutdown_rx_clone = shutdown_rx.clone();
                            tokio::spawn(async move {
                                verbindung
                                    .verarbeiten(stream, sitzung, sende_rx, shutdown_rx_clone)
                                    .await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = async { shutdown_rx.wait_for(|beendet| *beendet).await.map(|_| ()) } => {
                    tracing::info!("TCP Relay-Server: Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        tracing::info!("TCP Relay-Server gestoppt");
        Ok(())
    }
}
