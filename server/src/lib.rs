//! fumble-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use fumble_core::FumbleError;
use fumble_observability::{observability_server_starten, FumbleMetrics, HealthState};
use fumble_signaling::{RelayState, TcpRelayServer, WsRelayServer};
use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        self.laufen(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Ctrl-C-Handler konnte nicht installiert werden");
            }
        })
        .await
    }

    /// Startet alle Subsysteme und laeuft bis `signal` fertig ist
    ///
    /// Reihenfolge:
    /// 1. Metriken, Health-State und Relay-State anlegen
    /// 2. WebSocket-Listener binden (Fehler ist fatal)
    /// 3. Optional TCP-Listener binden
    /// 4. Observability-Server starten
    /// 5. Auf Signal oder Ende eines Subsystems warten, dann alle stoppen
    pub async fn laufen(self, signal: impl Future<Output = ()>) -> Result<()> {
        let config = self.config;
        tracing::info!(
            server_name = %config.server.name,
            max_clients = config.server.max_clients,
            "Server startet"
        );

        let metriken = FumbleMetrics::neu()?;
        let health = HealthState::neu(metriken.clone());
        let relay = RelayState::neu(config.relay_config(), metriken.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut aufgaben: JoinSet<Result<()>> = JoinSet::new();

        // WebSocket (primaer)
        let ws_addr = config.ws_bind_adresse()?;
        let ws = WsRelayServer::binden(relay.clone(), ws_addr)
            .await
            .map_err(|e| bind_fehler(ws_addr, e))?;
        let rx = shutdown_rx.clone();
        aufgaben.spawn(async move { ws.starten(rx).await.map_err(anyhow::Error::from) });

        // TCP (optional)
        if config.netzwerk.tcp_aktiviert {
            let tcp_addr = config.tcp_bind_adresse()?;
            let tcp = TcpRelayServer::binden(relay.clone(), tcp_addr)
                .await
                .map_err(|e| bind_fehler(tcp_addr, e))?;
            let rx = shutdown_rx.clone();
            aufgaben.spawn(async move { tcp.starten(rx).await.map_err(anyhow::Error::from) });
        }

        // Observability (Metriken + Health)
        if config.observability.aktiviert {
            let obs_addr = config.observability_bind_adresse()?;
            let rx = shutdown_rx.clone();
            let metriken = metriken.clone();
            let health = health.clone();
            aufgaben.spawn(async move {
                observability_server_starten(obs_addr, metriken, health, rx).await
            });
        }

        health.relay_status_setzen(true);
        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");

        let mut fehler = None;
        tokio::select! {
            _ = signal => {
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
            }
            Some(ergebnis) = aufgaben.join_next() => {
                fehler = match ergebnis {
                    Ok(Ok(())) => Some(FumbleError::intern("Subsystem unerwartet beendet").into()),
                    Ok(Err(e)) => Some(e),
                    Err(e) => Some(FumbleError::intern(format!("Subsystem-Task abgebrochen: {e}")).into()),
                };
                tracing::error!(fehler = ?fehler, "Subsystem ausgefallen, Server wird beendet");
            }
        }

        health.relay_status_setzen(false);
        let _ = shutdown_tx.send(true);

        while let Some(ergebnis) = aufgaben.join_next().await {
            match ergebnis {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(fehler = %e, "Subsystem mit Fehler beendet"),
                Err(e) => tracing::error!(fehler = %e, "Subsystem-Task abgebrochen"),
            }
        }

        tracing::info!(
            laufzeit_sek = relay.start_time.elapsed().as_secs(),
            "Server gestoppt"
        );
        match fehler {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn bind_fehler(adresse: SocketAddr, e: std::io::Error) -> FumbleError {
    FumbleError::Bind {
        adresse: adresse.to_string(),
        grund: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lokale_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.netzwerk.bind_adresse = "127.0.0.1".into();
        config.netzwerk.ws_port = 0;
        config.netzwerk.tcp_port = 0;
        config.observability.port = 0;
        config
    }

    #[tokio::test]
    async fn startet_und_stoppt_sauber() {
        let mut config = lokale_config();
        config.netzwerk.tcp_aktiviert = true;

        let ergebnis = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            Server::neu(config).laufen(tokio::time::sleep(std::time::Duration::from_millis(50))),
        )
        .await
        .expect("Server stoppt nicht");
        assert!(ergebnis.is_ok(), "{ergebnis:?}");
    }

    #[tokio::test]
    async fn belegter_port_ist_bind_fehler() {
        let belegt = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = lokale_config();
        config.netzwerk.ws_port = belegt.local_addr().unwrap().port();
        config.observability.aktiviert = false;

        let err = Server::neu(config)
            .laufen(std::future::pending())
            .await
            .unwrap_err();
        let fumble = err.downcast_ref::<FumbleError>().expect("FumbleError erwartet");
        assert!(matches!(fumble, FumbleError::Bind { .. }));
        assert!(fumble.ist_fatal());
    }
}
