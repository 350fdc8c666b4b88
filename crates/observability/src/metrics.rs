//! Prometheus-kompatible Metriken fuer Fumble
//!
//! Registrierte Metriken:
//! - `fumble_connected_clients` – Gauge: Aktuell gebundene Identitaeten
//! - `fumble_open_connections` – Gauge: Offene Transport-Verbindungen
//! - `fumble_messages_relayed_total` – Counter: Zugestellte Chat-Nachrichten
//! - `fumble_events_dropped_total` – Counter: Verworfene Events (grund)
//! - `fumble_swipes_total` – Counter: Erfasste Swipes (direction)
//! - `fumble_matches_total` – Counter: Erkannte Matches
//! - `fumble_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `fumble_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Fumble-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Metrik-Handles.
#[derive(Clone)]
pub struct FumbleMetrics {
    pub registry: Arc<Registry>,

    // Relay-Metriken
    pub connected_clients: Gauge,
    pub open_connections: Gauge,
    pub messages_relayed_total: IntCounter,
    pub events_dropped_total: IntCounterVec,
    pub swipes_total: IntCounterVec,
    pub matches_total: IntCounter,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl FumbleMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Relay-Metriken ---
        let connected_clients = Gauge::with_opts(Opts::new(
            "fumble_connected_clients",
            "Anzahl aktuell gebundener Benutzer-Identitaeten",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let open_connections = Gauge::with_opts(Opts::new(
            "fumble_open_connections",
            "Anzahl offener Transport-Verbindungen (gebunden oder nicht)",
        ))?;
        registry.register(Box::new(open_connections.clone()))?;

        let messages_relayed_total = IntCounter::with_opts(Opts::new(
            "fumble_messages_relayed_total",
            "Gesamtanzahl zugestellter Chat-Nachrichten",
        ))?;
        registry.register(Box::new(messages_relayed_total.clone()))?;

        let events_dropped_total = IntCounterVec::new(
            Opts::new(
                "fumble_events_dropped_total",
                "Gesamtanzahl verworfener Events nach Grund",
            ),
            &["grund"],
        )?;
        registry.register(Box::new(events_dropped_total.clone()))?;

        let swipes_total = IntCounterVec::new(
            Opts::new("fumble_swipes_total", "Gesamtanzahl erfasster Swipes"),
            &["direction"],
        )?;
        registry.register(Box::new(swipes_total.clone()))?;

        let matches_total = IntCounter::with_opts(Opts::new(
            "fumble_matches_total",
            "Gesamtanzahl erkannter gegenseitiger Matches",
        ))?;
        registry.register(Box::new(matches_total.clone()))?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new("fumble_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fumble_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            open_connections,
            messages_relayed_total,
            events_dropped_total,
            swipes_total,
            matches_total,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Zaehlt ein verworfenes Event
    pub fn verworfen(&self, grund: &str) {
        self.events_dropped_total.with_label_values(&[grund]).inc();
    }

    /// Liest den Zaehlerstand fuer einen Verwerfungsgrund
    pub fn verworfen_anzahl(&self, grund: &str) -> u64 {
        self.events_dropped_total.with_label_values(&[grund]).get()
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: FumbleMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<FumbleMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
