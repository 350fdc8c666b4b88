//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use fumble_core::FumbleError;
use fumble_observability::logging::{log_format_gueltig, log_level_gueltig};
use fumble_signaling::RelayConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Relay-Verhalten
    pub relay: RelayEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers (nur fuer Logs)
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_clients: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Fumble Relay".into(),
            max_clients: 512,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Port fuer WebSocket (`GET /ws`)
    pub ws_port: u16,
    /// Zusaetzlichen TCP-Transport starten
    pub tcp_aktiviert: bool,
    /// Port fuer den TCP-Transport
    pub tcp_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            ws_port: 3000,
            tcp_aktiviert: false,
            tcp_port: 3001,
        }
    }
}

/// Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Groesse der ausgehenden Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Maximale Nachrichtenlaenge in Bytes
    pub max_nachrichten_laenge: usize,
    /// Obergrenze fuer den Verlauf pro Benutzerpaar (fehlt = unbegrenzt)
    pub max_verlauf_pro_paar: Option<usize>,
    /// `message_ack` an den Absender senden
    pub sende_bestaetigung: bool,
    /// Gegenseitige Rechts-Swipes als `new_match` melden
    pub match_erkennung: bool,
    /// Swipes als `receive_swipe` an das Ziel weiterleiten
    pub swipes_weiterleiten: bool,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        let relay = RelayConfig::default();
        Self {
            send_queue_groesse: relay.send_queue_groesse,
            max_nachrichten_laenge: relay.max_nachrichten_laenge,
            max_verlauf_pro_paar: relay.max_verlauf_pro_paar,
            sende_bestaetigung: relay.sende_bestaetigung,
            match_erkennung: relay.match_erkennung,
            swipes_weiterleiten: relay.swipes_weiterleiten,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> fumble_core::Result<()> {
        if self.server.max_clients == 0 {
            return Err(FumbleError::Konfiguration(
                "server.max_clients muss groesser als 0 sein".into(),
            ));
        }
        if self.relay.send_queue_groesse == 0 {
            return Err(FumbleError::Konfiguration(
                "relay.send_queue_groesse muss groesser als 0 sein".into(),
            ));
        }
        if self.relay.max_nachrichten_laenge == 0 {
            return Err(FumbleError::Konfiguration(
                "relay.max_nachrichten_laenge muss groesser als 0 sein".into(),
            ));
        }
        if self.relay.max_verlauf_pro_paar == Some(0) {
            return Err(FumbleError::Konfiguration(
                "relay.max_verlauf_pro_paar darf nicht 0 sein".into(),
            ));
        }
        if self.netzwerk.tcp_aktiviert && self.netzwerk.tcp_port == self.netzwerk.ws_port {
            return Err(FumbleError::Konfiguration(format!(
                "netzwerk.tcp_port und netzwerk.ws_port sind beide {}",
                self.netzwerk.ws_port
            )));
        }
        if !log_level_gueltig(&self.logging.level) {
            return Err(FumbleError::Konfiguration(format!(
                "Unbekanntes Log-Level '{}'",
                self.logging.level
            )));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(FumbleError::Konfiguration(format!(
                "Unbekanntes Log-Format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Relay-Konfiguration fuer `fumble-signaling`
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_clients: self.server.max_clients,
            send_queue_groesse: self.relay.send_queue_groesse,
            max_nachrichten_laenge: self.relay.max_nachrichten_laenge,
            max_verlauf_pro_paar: self.relay.max_verlauf_pro_paar,
            sende_bestaetigung: self.relay.sende_bestaetigung,
            match_erkennung: self.relay.match_erkennung,
            swipes_weiterleiten: self.relay.swipes_weiterleiten,
            ..RelayConfig::default()
        }
    }

    /// Gibt die Bind-Adresse fuer den WebSocket-Listener zurueck
    pub fn ws_bind_adresse(&self) -> fumble_core::Result<SocketAddr> {
        self.adresse(self.netzwerk.ws_port)
    }

    /// Gibt die Bind-Adresse fuer den TCP-Listener zurueck
    pub fn tcp_bind_adresse(&self) -> fumble_core::Result<SocketAddr> {
        self.adresse(self.netzwerk.tcp_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> fumble_core::Result<SocketAddr> {
        self.adresse(self.observability.port)
    }

    fn adresse(&self, port: u16) -> fumble_core::Result<SocketAddr> {
        let text = format!("{}:{}", self.netzwerk.bind_adresse, port);
        text.parse().map_err(|e| {
            FumbleError::Konfiguration(format!("Ungueltige Bind-Adresse '{text}': {e}"))
        })
    }
}
