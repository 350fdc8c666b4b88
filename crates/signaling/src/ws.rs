//! WebSocket-Transport (`GET /ws`)
//!
//! Jeder Text-Frame ist ein Event-Umschlag `{"event", "data"}`. Pro
//! Verbindung laufen zwei Haelften:
//! - Writer-Task: besitzt den Sink und leert die Send-Queue der Sitzung
//! - Reader-Loop: liest Frames und uebergibt sie strikt nacheinander an
//!   die Sitzung
//!
//! Pings beantwortet axum selbst. Binaere Frames werden ignoriert.
//!
//! Endet eine Haelfte, endet die Sitzung: ein Writer, der nicht mehr in
//! den Socket schreiben kann, darf nicht als erreichbare Verbindung in der
//! Registry stehen bleiben.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, Stream, StreamExt};
use fumble_observability::{request_timing_layer, timing_middleware};
use fumble_protocol::ServerEvent;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::server_state::RelayState;
use crate::session::Sitzung;

/// Wartezeit auf den Writer-Task nach Ende der Sitzung
const WRITER_NACHLAUF: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct WsState {
    relay: Arc<RelayState>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Router mit der `/ws`-Route
pub fn ws_router(relay: Arc<RelayState>, shutdown_rx: watch::Receiver<bool>) -> Router {
    let metriken = relay.metriken.clone();
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(WsState { relay, shutdown_rx })
        .layer(axum::middleware::from_fn_with_state(
            metriken,
            timing_middleware,
        ))
        .layer(request_timing_layer())
}

/// GET /ws – Upgrade auf WebSocket
///
/// Der Sitzungsplatz wird vor dem Upgrade reserviert. Ist das Limit
/// erreicht, antwortet der Server mit 503 statt zu upgraden.
async fn ws_upgrade(State(state): State<WsState>, ws: WebSocketUpgrade) -> Response {
    let Some((sitzung, sende_rx)) = Sitzung::oeffnen(Arc::clone(&state.relay)) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server voll").into_response();
    };

    let max_groesse = state.relay.config.max_frame_groesse;
    ws.max_message_size(max_groesse)
        .on_upgrade(move |socket| verbindung_verarbeiten(socket, sitzung, sende_rx, state.shutdown_rx))
}

/// Verarbeitet eine WebSocket-Verbindung bis zum Ende
async fn verbindung_verarbeiten(
    socket: WebSocket,
    sitzung: Sitzung,
    sende_rx: mpsc::Receiver<ServerEvent>,
    shutdown_rx: watch::Receiver<bool>,
) {
    tracing::info!(verbindung = %sitzung.verbindung(), "WebSocket verbunden");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(writer_task(sink, sende_rx));
    sitzung_fuehren(stream, sitzung, writer, shutdown_rx).await;
}

/// Reader-Loop einer Sitzung
///
/// Endet bei Close, Lesefehler, Shutdown oder wenn der Writer-Task vorzeitig
/// fertig ist. Danach wird die Sitzung beendet.
async fn sitzung_fuehren<S, E>(
    mut stream: S,
    mut sitzung: Sitzung,
    mut writer: JoinHandle<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let verbindung = sitzung.verbindung();
    let mut writer_beendet = false;

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => sitzung.verarbeiten_bytes(text.as_bytes()),
                    Some(Ok(Message::Binary(daten))) => {
                        tracing::debug!(verbindung = %verbindung, laenge = daten.len(), "Binaerer Frame ignoriert");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(verbindung = %verbindung, "WebSocket vom Client geschlossen");
                        break;
                    }
                    // Ping/Pong beantwortet axum
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(verbindung = %verbindung, fehler = %e, "WebSocket-Lesefehler");
                        break;
                    }
                }
            }

            _ = &mut writer => {
                tracing::debug!(verbindung = %verbindung, "Writer-Task beendet, WebSocket wird getrennt");
                writer_beendet = true;
                break;
            }

            // Greift auch, wenn das Signal schon vor dem Upgrade kam
            Ok(_) = shutdown_rx.wait_for(|beendet| *beendet) => {
                tracing::debug!(verbindung = %verbindung, "Shutdown-Signal, WebSocket wird getrennt");
                break;
            }
        }
    }

    // Beendet die Sitzung und laesst damit die Send-Queue auslaufen
    sitzung.beenden();
    if !writer_beendet && tokio::time::timeout(WRITER_NACHLAUF, writer).await.is_err() {
        tracing::warn!(verbindung = %verbindung, "Writer-Task beendet sich nicht");
    }
}

/// Leert die Send-Queue in den WebSocket-Sink
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut sende_rx: mpsc::Receiver<ServerEvent>,
) {
    while let Some(event) = sende_rx.recv().await {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(event = event.name(), fehler = %e, "Serialisierung fehlgeschlagen");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json)).await {
            tracing::debug!(fehler = %e, "WebSocket-Senden fehlgeschlagen");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// WebSocket-Relay-Server
pub struct WsRelayServer {
    state: Arc<RelayState>,
    listener: TcpListener,
}

impl WsRelayServer {
    /// Bindet den HTTP-Socket
    pub async fn binden(state: Arc<RelayState>, bind_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Bedient `/ws` bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let adresse = self.listener.local_addr()?;
        let app = ws_router(self.state, shutdown_rx.clone());
        tracing::info!(adresse = %adresse, "WebSocket Relay-Server gestartet");

        let mut rx = shutdown_rx;
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.wait_for(|beendet| *beendet).await;
            })
            .await?;

        tracing::info!("WebSocket Relay-Server gestoppt");
        Ok(())
    }
}
