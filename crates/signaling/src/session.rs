//! Sitzung – Lebenszyklus einer einzelnen Verbindung
//!
//! Jede Transport-Verbindung (WebSocket oder TCP) besitzt genau eine
//! `Sitzung`. Die Sitzung verarbeitet die eingehenden Events strikt in
//! Ankunftsreihenfolge und haelt den Zustand der Verbindung.
//!
//! ## State Machine
//! ```text
//! Unbound --join(user)--> Bound(user) --join(other)--> Bound(other)
//!    |                        |
//!    +------ disconnect ------+-----> Terminated
//! ```
//!
//! `beenden()` konsumiert die Sitzung. Der Abbau (Registry-Eintrag
//! entfernen, Sitzungsplatz freigeben) laeuft damit genau einmal, auch wenn
//! der Transport-Task ohne `beenden()` endet (Drop).

use fumble_core::types::{ConnectionId, UserId};
use fumble_protocol::{ClientEvent, RawEvent, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::dispatcher::{DispatchKontext, RelayDispatcher};
use crate::error::RelayError;
use crate::registry::ConnectionHandle;
use crate::server_state::RelayState;

/// Zustand einer Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitzungsZustand {
    /// Verbunden, noch kein `join`
    Unbound,
    /// Identitaet gebunden
    Bound(UserId),
    /// Verbindung beendet
    Terminated,
}

/// Eine Sitzung pro Live-Verbindung
pub struct Sitzung {
    dispatcher: RelayDispatcher,
    ctx: DispatchKontext,
    beendet: bool,
}

impl Sitzung {
    /// Oeffnet eine Sitzung samt Send-Queue
    ///
    /// Gibt `None` zurueck wenn `max_clients` erreicht ist.
    pub fn oeffnen(state: Arc<RelayState>) -> Option<(Self, mpsc::Receiver<ServerEvent>)> {
        if !state.sitzung_reservieren() {
            tracing::warn!(
                max_clients = state.config.max_clients,
                "Verbindungslimit erreicht, Sitzung abgelehnt"
            );
            return None;
        }

        let (handle, rx) = ConnectionHandle::neu(state.config.send_queue_groesse);
        tracing::debug!(verbindung = %handle.id(), "Sitzung geoeffnet");

        Some((
            Self {
                dispatcher: RelayDispatcher::neu(state),
                ctx: DispatchKontext::neu(handle),
                beendet: false,
            },
            rx,
        ))
    }

    /// ID der zugrundeliegenden Verbindung
    pub fn verbindung(&self) -> ConnectionId {
        self.ctx.verbindung.id()
    }

    /// Aktueller Zustand
    pub fn zustand(&self) -> SitzungsZustand {
        if self.beendet {
            return SitzungsZustand::Terminated;
        }
        match &self.ctx.user_id {
            Some(user) => SitzungsZustand::Bound(user.clone()),
            None => SitzungsZustand::Unbound,
        }
    }

    /// Verarbeitet einen rohen Frame (JSON-Bytes)
    pub fn verarbeiten_bytes(&mut self, bytes: &[u8]) {
        match RawEvent::aus_slice(bytes) {
            Ok(roh) => self.verarbeiten_roh(roh),
            Err(e) => self
                .dispatcher
                .fehler_verbuchen("?", &self.ctx, &RelayError::from(e)),
        }
    }

    /// Verarbeitet einen Event-Umschlag
    pub fn verarbeiten_roh(&mut self, roh: RawEvent) {
        let name = roh.event.clone();
        match ClientEvent::aus_roh(roh) {
            Ok(event) => self.verarbeiten(event),
            Err(e) => self
                .dispatcher
                .fehler_verbuchen(&name, &self.ctx, &RelayError::from(e)),
        }
    }

    /// Verarbeitet ein geparstes Event
    ///
    /// `join` wird hier behandelt, alles andere geht an den Dispatcher.
    /// Antworten an den Absender landen in der eigenen Send-Queue, damit
    /// sie in Reihenfolge mit zugestellten Events geschrieben werden.
    pub fn verarbeiten(&mut self, event: ClientEvent) {
        if let ClientEvent::Join(user) = event {
            self.join(user);
            return;
        }

        if let Some(antwort) = self.dispatcher.dispatch(event, &self.ctx) {
            let name = antwort.name();
            if let Err(e) = self.ctx.verbindung.senden(antwort) {
                self.dispatcher.fehler_verbuchen(name, &self.ctx, &e);
            }
        }
    }

    /// Bindet die Verbindung an `user` (letzter `join` gewinnt)
    pub fn join(&mut self, user: UserId) {
        let state = self.dispatcher.state();
        let verdraengt = state.registry.bind(user.clone(), self.ctx.verbindung.clone());

        if let Some(alt) = &self.ctx.user_id {
            if *alt != user {
                tracing::info!(
                    verbindung = %self.verbindung(),
                    alt = %alt,
                    neu = %user,
                    "Verbindung wechselt Identitaet"
                );
            }
        }
        if let Some(alte_verbindung) = verdraengt {
            tracing::debug!(
                user_id = %user,
                alt = %alte_verbindung.id(),
                neu = %self.verbindung(),
                "Aeltere Verbindung verdraengt"
            );
        }

        tracing::info!(user_id = %user, verbindung = %self.verbindung(), "join");
        self.ctx.user_id = Some(user);
    }

    /// Beendet die Sitzung
    ///
    /// Gibt die Identitaet zurueck, deren Registry-Eintrag entfernt wurde.
    /// Eine verdraengte Verbindung entfernt nichts.
    pub fn beenden(mut self) -> Option<UserId> {
        self.abbauen()
    }

    fn abbauen(&mut self) -> Option<UserId> {
        if self.beendet {
            return None;
        }
        self.beendet = true;

        let entfernt = self.dispatcher.client_cleanup(&self.ctx.verbindung);
        self.dispatcher.state().sitzung_freigeben();

        match &self.ctx.user_id {
            Some(user) => {
                tracing::info!(user_id = %user, verbindung = %self.verbindung(), "Getrennt")
            }
            None => tracing::debug!(verbindung = %self.verbindung(), "Getrennt ohne join"),
        }
        entfernt
    }
}

impl Drop for Sitzung {
    fn drop(&mut self) {
        self.abbauen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::RelayConfig;
    use fumble_observability::FumbleMetrics;
    use fumble_protocol::events::ReceiveMessage;
    use serde_json::json;

    fn state() -> Arc<RelayState> {
        RelayState::neu(RelayConfig::default(), FumbleMetrics::neu().unwrap())
    }

    fn roh(event: &str, data: serde_json::Value) -> RawEvent {
        RawEvent::neu(event, data)
    }

    #[test]
    fn zustandsuebergaenge() {
        let s = state();
        let (mut sitzung, _rx) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        assert_eq!(sitzung.zustand(), SitzungsZustand::Unbound);

        sitzung.verarbeiten_roh(roh("join", json!("u1")));
        assert_eq!(sitzung.zustand(), SitzungsZustand::Bound(UserId::neu("u1")));
        assert!(s.registry.ist_online(&UserId::neu("u1")));
        assert_eq!(s.metriken.connected_clients.get(), 1.0);

        assert_eq!(sitzung.beenden(), Some(UserId::neu("u1")));
        assert!(!s.registry.ist_online(&UserId::neu("u1")));
        assert_eq!(s.sitzungen(), 0);
        assert_eq!(s.metriken.connected_clients.get(), 0.0);
    }

    #[test]
    fn beenden_ohne_join_ist_noop() {
        let s = state();
        let (sitzung, _rx) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        assert_eq!(sitzung.beenden(), None);
        assert_eq!(s.sitzungen(), 0);
    }

    #[test]
    fn drop_baut_genau_einmal_ab() {
        let s = state();
        {
            let (mut sitzung, _rx) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
            sitzung.verarbeiten_roh(roh("join", json!({"userId": 7})));
        }
        assert!(!s.registry.ist_online(&UserId::neu("7")));
        assert_eq!(s.sitzungen(), 0);
        assert_eq!(s.metriken.open_connections.get(), 0.0);
    }

    #[test]
    fn rejoin_mit_anderer_identitaet() {
        let s = state();
        let (mut sitzung, _rx) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        sitzung.verarbeiten(ClientEvent::Join(UserId::neu("u1")));
        sitzung.verarbeiten(ClientEvent::Join(UserId::neu("u2")));

        assert_eq!(sitzung.zustand(), SitzungsZustand::Bound(UserId::neu("u2")));
        assert!(!s.registry.ist_online(&UserId::neu("u1")));
        assert!(s.registry.ist_online(&UserId::neu("u2")));
    }

    #[test]
    fn verdraengte_sitzung_entfernt_neuere_nicht() {
        let s = state();
        let (mut c1, _rx1) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        let (mut c2, _rx2) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        c1.verarbeiten(ClientEvent::Join(UserId::neu("u1")));
        c2.verarbeiten(ClientEvent::Join(UserId::neu("u1")));

        assert_eq!(c1.beenden(), None);
        assert_eq!(
            s.registry.lookup(&UserId::neu("u1")).map(|h| h.id()),
            Some(c2.verbindung())
        );
    }

    #[test]
    fn antworten_landen_in_eigener_queue() {
        let s = state();
        let (mut sitzung, mut rx) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        sitzung.verarbeiten_roh(roh("join", json!("u1")));
        sitzung.verarbeiten_roh(roh("get_swipes", serde_json::Value::Null));

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::SwipesHistory(Vec::new()));
    }

    #[test]
    fn kaputte_frames_werden_gezaehlt() {
        let s = state();
        let (mut sitzung, mut rx) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        sitzung.verarbeiten_bytes(b"{kein json");
        sitzung.verarbeiten_roh(roh("poke", json!({})));
        sitzung.verarbeiten_roh(roh("send_message", json!({"message": "ohne ziel"})));

        assert_eq!(s.metriken.verworfen_anzahl("malformed"), 3);
        assert!(rx.try_recv().is_err());
        assert_eq!(sitzung.zustand(), SitzungsZustand::Unbound);
    }

    #[test]
    fn verbindungslimit() {
        let s = RelayState::neu(
            RelayConfig {
                max_clients: 1,
                ..Default::default()
            },
            FumbleMetrics::neu().unwrap(),
        );
        let erste = Sitzung::oeffnen(Arc::clone(&s));
        assert!(erste.is_some());
        assert!(Sitzung::oeffnen(Arc::clone(&s)).is_none());
        drop(erste);
        assert!(Sitzung::oeffnen(Arc::clone(&s)).is_some());
    }

    #[test]
    fn nachricht_zwischen_zwei_sitzungen() {
        let s = state();
        let (mut a, mut rx_a) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        let (mut b, mut rx_b) = Sitzung::oeffnen(Arc::clone(&s)).unwrap();
        a.verarbeiten_bytes(br#"{"event":"join","data":"u1"}"#);
        b.verarbeiten_bytes(br#"{"event":"join","data":"u2"}"#);

        a.verarbeiten_bytes(br#"{"event":"send_message","data":{"to":"u2","message":"hi"}}"#);

        match rx_b.try_recv().unwrap() {
            ServerEvent::ReceiveMessage(ReceiveMessage { from, message, .. }) => {
                assert_eq!(from, UserId::neu("u1"));
                assert_eq!(message, "hi");
            }
            anderes => panic!("Unerwartet: {anderes:?}"),
        }
        assert!(rx_a.try_recv().is_err());
    }
}
