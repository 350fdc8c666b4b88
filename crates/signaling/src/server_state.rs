//! Gemeinsamer Relay-Zustand
//!
//! Haelt Registry, Verlauf und Metriken als geteilte Referenzen, die sicher
//! zwischen tokio-Tasks geteilt werden koennen.

use fumble_observability::FumbleMetrics;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::history::RelayHistory;
use crate::registry::ConnectionRegistry;

/// Konfiguration fuer den Relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximale gleichzeitige Transport-Verbindungen
    pub max_clients: usize,
    /// Groesse der ausgehenden Queue pro Verbindung
    pub send_queue_groesse: usize,
    /// Maximale Nachrichtenlaenge in Bytes
    pub max_nachrichten_laenge: usize,
    /// Obergrenze fuer den Verlauf pro Benutzerpaar (None = unbegrenzt)
    pub max_verlauf_pro_paar: Option<usize>,
    /// `message_ack` an den Absender senden
    pub sende_bestaetigung: bool,
    /// Gegenseitige Rechts-Swipes als Match melden
    pub match_erkennung: bool,
    /// Swipes als `receive_swipe` an das Ziel weiterleiten
    pub swipes_weiterleiten: bool,
    /// Maximale Frame-Groesse fuer den TCP-Transport
    pub max_frame_groesse: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_clients: 512,
            send_queue_groesse: 64,
            max_nachrichten_laenge: 4096,
            max_verlauf_pro_paar: None,
            sende_bestaetigung: false,
            match_erkennung: false,
            swipes_weiterleiten: false,
            max_frame_groesse: fumble_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Gemeinsamer Relay-Zustand (thread-safe, Arc-geteilt)
pub struct RelayState {
    /// Relay-Konfiguration
    pub config: Arc<RelayConfig>,
    /// Wer ist unter welcher Verbindung erreichbar
    pub registry: ConnectionRegistry,
    /// Nachrichten- und Swipe-Verlauf
    pub history: RelayHistory,
    /// Prometheus-Metriken
    pub metriken: FumbleMetrics,
    /// Anzahl offener Transport-Sitzungen (gebunden oder nicht)
    sitzungen: AtomicUsize,
    /// Startzeitpunkt (fuer Uptime-Logs)
    pub start_time: Instant,
}

impl RelayState {
    /// Erstellt einen neuen RelayState
    pub fn neu(config: RelayConfig, metriken: FumbleMetrics) -> Arc<Self> {
        let history = RelayHistory::neu(config.max_verlauf_pro_paar);
        let registry = ConnectionRegistry::mit_gauge(metriken.connected_clients.clone());
        metriken.open_connections.set(0.0);
        Arc::new(Self {
            config: Arc::new(config),
            registry,
            history,
            metriken,
            sitzungen: AtomicUsize::new(0),
            start_time: Instant::now(),
        })
    }

    /// Reserviert einen Sitzungsplatz, `false` wenn `max_clients` erreicht ist
    pub fn sitzung_reservieren(&self) -> bool {
        let max = self.config.max_clients;
        let ergebnis = self
            .sitzungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            });
        if ergebnis.is_ok() {
            self.metriken.open_connections.inc();
        }
        ergebnis.is_ok()
    }

    /// Gibt einen Sitzungsplatz wieder frei
    pub fn sitzung_freigeben(&self) {
        let ergebnis = self
            .sitzungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if ergebnis.is_ok() {
            self.metriken.open_connections.dec();
        }
    }

    /// Anzahl offener Sitzungen
    pub fn sitzungen(&self) -> usize {
        self.sitzungen.load(Ordering::Acquire)
    }
}
