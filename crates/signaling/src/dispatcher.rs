//! Relay-Dispatcher – Routet Client-Events an die richtigen Empfaenger
//!
//! Der Dispatcher empfaengt bereits geparste `ClientEvent`s einer Sitzung,
//! loest den Empfaenger ueber die Registry auf und stellt das ausgehende
//! Event in dessen Send-Queue. Eine Antwort an den Absender selbst (Verlauf,
//! Bestaetigung) wird als Rueckgabewert geliefert.
//!
//! ## Zustellung
//! Best effort: Ist der Empfaenger offline oder seine Queue voll, wird das
//! Event verworfen. Der Absender erfaehrt davon nichts, es bleibt bei einer
//! Log-Zeile und einem Metrik-Zaehler.
//!
//! ## Absender
//! Der Absender wird aus dem Sitzungskontext aufgeloest, nicht aus der
//! Registry. Eine durch einen spaeteren `join` verdraengte Verbindung darf
//! weiter unter ihrer Identitaet senden, ist aber nicht mehr erreichbar.

use fumble_core::types::UserId;
use fumble_protocol::events::{
    GetMessagesRequest, MessageAck, NewMatch, ReceiveMessage, ReceiveSwipe, SendMessageRequest,
    SwipeRequest,
};
use fumble_protocol::{ClientEvent, ServerEvent, SwipeRichtung};
use std::sync::Arc;

use crate::error::{RelayError, RelayResult};
use crate::registry::ConnectionHandle;
use crate::server_state::RelayState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatchKontext {
    /// Handle der eigenen Verbindung
    pub verbindung: ConnectionHandle,
    /// Gebundene Identitaet (None vor dem ersten `join`)
    pub user_id: Option<UserId>,
}

impl DispatchKontext {
    pub fn neu(verbindung: ConnectionHandle) -> Self {
        Self {
            verbindung,
            user_id: None,
        }
    }

    fn absender(&self, event: &'static str) -> RelayResult<&UserId> {
        self.user_id
            .as_ref()
            .ok_or(RelayError::UnresolvedSender { event })
    }
}

/// Zentraler Relay-Dispatcher
#[derive(Clone)]
pub struct RelayDispatcher {
    state: Arc<RelayState>,
}

impl RelayDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<RelayState>) -> Self {
        Self { state }
    }

    /// Geteilter Relay-Zustand
    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Verarbeitet ein eingehendes Event und gibt die Antwort an den Absender zurueck
    ///
    /// Gibt `None` zurueck wenn keine Antwort gesendet werden soll. Fehler
    /// werden hier geloggt und gezaehlt, nie an den Client gemeldet.
    pub fn dispatch(&self, event: ClientEvent, ctx: &DispatchKontext) -> Option<ServerEvent> {
        let name = event.name();
        let ergebnis = match event {
            ClientEvent::SendMessage(req) => self.on_chat_message(ctx, req),
            ClientEvent::Swipe(req) => self.on_swipe(ctx, req).map(|()| None),
            ClientEvent::GetMessages(req) => self.on_get_messages(ctx, req).map(Some),
            ClientEvent::GetSwipes => self.on_get_swipes(ctx).map(Some),
            ClientEvent::Join(user_id) => {
                // Join gehoert der Sitzung, nicht dem Dispatcher
                tracing::warn!(
                    verbindung = %ctx.verbindung.id(),
                    user_id = %user_id,
                    "join am Dispatcher ignoriert"
                );
                Ok(None)
            }
        };

        match ergebnis {
            Ok(antwort) => antwort,
            Err(e) => {
                self.fehler_verbuchen(name, ctx, &e);
                None
            }
        }
    }

    /// Loggt und zaehlt einen verworfenen Event
    pub fn fehler_verbuchen(&self, event: &str, ctx: &DispatchKontext, fehler: &RelayError) {
        match fehler {
            RelayError::UnresolvedSender { .. } => tracing::warn!(
                verbindung = %ctx.verbindung.id(),
                event = event,
                "Event vor join verworfen"
            ),
            RelayError::MalformedEvent(grund) => tracing::debug!(
                verbindung = %ctx.verbindung.id(),
                event = event,
                grund = %grund,
                "Ungueltiges Event verworfen"
            ),
            andere => tracing::debug!(
                verbindung = %ctx.verbindung.id(),
                event = event,
                fehler = %andere,
                "Event verworfen"
            ),
        }
        self.state.metriken.verworfen(fehler.grund());
    }

    // -----------------------------------------------------------------------
    // Operationen
    // -----------------------------------------------------------------------

    /// `send_message` – Nachricht ablegen und an den Empfaenger zustellen
    ///
    /// Liefert `message_ack` fuer den Absender wenn Bestaetigungen aktiv sind.
    pub fn on_chat_message(
        &self,
        ctx: &DispatchKontext,
        req: SendMessageRequest,
    ) -> RelayResult<Option<ServerEvent>> {
        let from = ctx.absender("send_message")?;
        self.text_pruefen(&req.message)?;

        let nachricht = self.state.history.nachricht_anhaengen(from, &req.to, req.message);

        let event = ServerEvent::ReceiveMessage(ReceiveMessage {
            from: from.clone(),
            message: nachricht.text.clone(),
            timestamp: nachricht.timestamp,
            id: nachricht.id,
        });
        if self.zustellen(ctx, &req.to, event) {
            self.state.metriken.messages_relayed_total.inc();
            tracing::debug!(
                from = %from,
                to = %req.to,
                id = %nachricht.id,
                "Nachricht zugestellt"
            );
        }

        if !self.state.config.sende_bestaetigung {
            return Ok(None);
        }
        Ok(Some(ServerEvent::MessageAck(MessageAck {
            temp_id: req.temp_id,
            id: nachricht.id,
            timestamp: nachricht.timestamp,
        })))
    }

    /// `swipe` – Swipe aufzeichnen, optional weiterleiten und Match melden
    pub fn on_swipe(&self, ctx: &DispatchKontext, req: SwipeRequest) -> RelayResult<()> {
        let from = ctx.absender("swipe")?;
        if *from == req.to {
            return Err(RelayError::malformed("Swipe auf sich selbst"));
        }

        let gegenseitig = self
            .state
            .history
            .swipe_erfassen(from, &req.to, req.direction);
        self.state
            .metriken
            .swipes_total
            .with_label_values(&[req.direction.als_str()])
            .inc();
        tracing::debug!(
            from = %from,
            to = %req.to,
            direction = req.direction.als_str(),
            "Swipe aufgezeichnet"
        );

        if self.state.config.swipes_weiterleiten {
            self.zustellen(
                ctx,
                &req.to,
                ServerEvent::ReceiveSwipe(ReceiveSwipe {
                    from: from.clone(),
                    direction: req.direction,
                }),
            );
        }

        if gegenseitig && self.state.config.match_erkennung {
            debug_assert_eq!(req.direction, SwipeRichtung::Right);
            self.state.metriken.matches_total.inc();
            tracing::info!(a = %from, b = %req.to, "Match");

            // Der Absender bekommt das Match ueber die eigene Queue
            if let Err(e) = ctx.verbindung.senden(ServerEvent::NewMatch(NewMatch {
                with: req.to.clone(),
            })) {
                self.fehler_verbuchen("new_match", ctx, &e);
            }
            self.zustellen(
                ctx,
                &req.to,
                ServerEvent::NewMatch(NewMatch { with: from.clone() }),
            );
        }
        Ok(())
    }

    /// `get_messages` – Verlauf zwischen Absender und `otherUserId`
    pub fn on_get_messages(
        &self,
        ctx: &DispatchKontext,
        req: GetMessagesRequest,
    ) -> RelayResult<ServerEvent> {
        let from = ctx.absender("get_messages")?;
        let verlauf = self.state.history.verlauf(from, &req.other_user_id);
        tracing::debug!(
            user_id = %from,
            other = %req.other_user_id,
            anzahl = verlauf.len(),
            "Verlauf angefragt"
        );
        Ok(ServerEvent::MessagesHistory(
            verlauf.iter().map(|m| m.als_eintrag()).collect(),
        ))
    }

    /// `get_swipes` – alle bisherigen Swipe-Ziele des Absenders
    pub fn on_get_swipes(&self, ctx: &DispatchKontext) -> RelayResult<ServerEvent> {
        let from = ctx.absender("get_swipes")?;
        Ok(ServerEvent::SwipesHistory(self.state.history.swipes_von(from)))
    }

    /// Entfernt die Verbindung aus der Registry
    ///
    /// Gibt die Identitaet zurueck, falls die Verbindung noch gebunden war.
    pub fn client_cleanup(&self, verbindung: &ConnectionHandle) -> Option<UserId> {
        let entfernt = self.state.registry.unbind(verbindung);
        if let Some(user_id) = &entfernt {
            tracing::debug!(user_id = %user_id, verbindung = %verbindung.id(), "Registry-Eintrag entfernt");
        }
        entfernt
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn text_pruefen(&self, text: &str) -> RelayResult<()> {
        if text.trim().is_empty() {
            return Err(RelayError::malformed("Leere Nachricht"));
        }
        let max = self.state.config.max_nachrichten_laenge;
        if text.len() > max {
            return Err(RelayError::malformed(format!(
                "Nachricht zu lang ({} > {max} Bytes)",
                text.len()
            )));
        }
        Ok(())
    }

    /// Stellt ein Event an die aktuelle Verbindung von `to` zu
    ///
    /// Gibt `true` zurueck wenn das Event in der Queue des Empfaengers liegt.
    fn zustellen(&self, ctx: &DispatchKontext, to: &UserId, event: ServerEvent) -> bool {
        let name = event.name();
        let ergebnis = self
            .state
            .registry
            .lookup(to)
            .ok_or_else(|| RelayError::RecipientOffline(to.clone()))
            .and_then(|empfaenger| empfaenger.senden(event));

        match ergebnis {
            Ok(()) => true,
            Err(e) => {
                self.fehler_verbuchen(name, ctx, &e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::RelayConfig;
    use fumble_observability::FumbleMetrics;
    use tokio::sync::mpsc;

    struct Client {
        ctx: DispatchKontext,
        rx: mpsc::Receiver<ServerEvent>,
    }

    fn dispatcher(config: RelayConfig) -> RelayDispatcher {
        RelayDispatcher::neu(RelayState::neu(config, FumbleMetrics::neu().unwrap()))
    }

    fn verbinden(d: &RelayDispatcher, user: &str) -> Client {
        let (handle, rx) = ConnectionHandle::neu(16);
        let user = UserId::neu(user);
        d.state().registry.bind(user.clone(), handle.clone());
        Client {
            ctx: DispatchKontext {
                verbindung: handle,
                user_id: Some(user),
            },
            rx,
        }
    }

    fn nachricht(to: &str, text: &str) -> ClientEvent {
        ClientEvent::SendMessage(SendMessageRequest {
            to: UserId::neu(to),
            message: text.into(),
            temp_id: None,
        })
    }

    fn swipe(to: &str, direction: SwipeRichtung) -> ClientEvent {
        ClientEvent::Swipe(SwipeRequest {
            to: UserId::neu(to),
            direction,
        })
    }

    #[test]
    fn nachricht_wird_zugestellt() {
        let d = dispatcher(RelayConfig::default());
        let mut a = verbinden(&d, "u1");
        let mut b = verbinden(&d, "u2");

        assert!(d.dispatch(nachricht("u2", "hi"), &a.ctx).is_none());

        match b.rx.try_recv().unwrap() {
            ServerEvent::ReceiveMessage(m) => {
                assert_eq!(m.from, UserId::neu("u1"));
                assert_eq!(m.message, "hi");
                assert_eq!(m.id.0, 1);
            }
            anderes => panic!("Unerwartet: {anderes:?}"),
        }
        assert!(b.rx.try_recv().is_err());
        assert!(a.rx.try_recv().is_err());
        assert_eq!(d.state().metriken.messages_relayed_total.get(), 1);
    }

    #[test]
    fn offline_empfaenger_wird_still_verworfen() {
        let d = dispatcher(RelayConfig::default());
        let mut a = verbinden(&d, "u1");

        assert!(d.dispatch(nachricht("u2", "hallo?"), &a.ctx).is_none());
        assert!(a.rx.try_recv().is_err());
        assert_eq!(d.state().metriken.verworfen_anzahl("recipient_offline"), 1);
        // Verlauf enthaelt die Nachricht trotzdem
        assert_eq!(
            d.state()
                .history
                .verlauf(&UserId::neu("u1"), &UserId::neu("u2"))
                .len(),
            1
        );
    }

    #[test]
    fn ungebundener_absender_wird_verworfen() {
        let d = dispatcher(RelayConfig::default());
        let mut b = verbinden(&d, "u2");
        let (handle, _rx) = ConnectionHandle::neu(4);
        let ctx = DispatchKontext::neu(handle);

        assert!(d.dispatch(nachricht("u2", "hi"), &ctx).is_none());
        assert!(d.dispatch(ClientEvent::GetSwipes, &ctx).is_none());
        assert!(b.rx.try_recv().is_err());
        assert_eq!(d.state().metriken.verworfen_anzahl("unresolved_sender"), 2);
    }

    #[test]
    fn leere_und_zu_lange_nachrichten_sind_ungueltig() {
        let d = dispatcher(RelayConfig {
            max_nachrichten_laenge: 8,
            ..Default::default()
        });
        let a = verbinden(&d, "u1");
        let mut b = verbinden(&d, "u2");

        d.dispatch(nachricht("u2", "   "), &a.ctx);
        d.dispatch(nachricht("u2", "viel zu lang"), &a.ctx);

        assert!(b.rx.try_recv().is_err());
        assert_eq!(d.state().metriken.verworfen_anzahl("malformed"), 2);
        assert!(d
            .state()
            .history
            .verlauf(&UserId::neu("u1"), &UserId::neu("u2"))
            .is_empty());
    }

    #[test]
    fn bestaetigung_traegt_temp_id() {
        let d = dispatcher(RelayConfig {
            sende_bestaetigung: true,
            ..Default::default()
        });
        let a = verbinden(&d, "u1");
        let _b = verbinden(&d, "u2");

        let event = ClientEvent::SendMessage(SendMessageRequest {
            to: UserId::neu("u2"),
            message: "hi".into(),
            temp_id: Some(serde_json::json!("tmp-1")),
        });
        match d.dispatch(event, &a.ctx) {
            Some(ServerEvent::MessageAck(ack)) => {
                assert_eq!(ack.temp_id, Some(serde_json::json!("tmp-1")));
                assert_eq!(ack.id.0, 1);
            }
            anderes => panic!("Unerwartet: {anderes:?}"),
        }
    }

    #[test]
    fn verlauf_und_swipes_abfragen() {
        let d = dispatcher(RelayConfig::default());
        let a = verbinden(&d, "u1");
        let b = verbinden(&d, "u2");

        d.dispatch(nachricht("u2", "eins"), &a.ctx);
        d.dispatch(nachricht("u1", "zwei"), &b.ctx);
        d.dispatch(swipe("u2", SwipeRichtung::Right), &a.ctx);
        d.dispatch(swipe("u3", SwipeRichtung::Left), &a.ctx);

        let verlauf = d.dispatch(
            ClientEvent::GetMessages(GetMessagesRequest {
                other_user_id: UserId::neu("u2"),
            }),
            &a.ctx,
        );
        match verlauf {
            Some(ServerEvent::MessagesHistory(eintraege)) => {
                let texte: Vec<_> = eintraege.iter().map(|e| e.text.as_str()).collect();
                assert_eq!(texte, ["eins", "zwei"]);
            }
            anderes => panic!("Unerwartet: {anderes:?}"),
        }

        assert_eq!(
            d.dispatch(ClientEvent::GetSwipes, &a.ctx),
            Some(ServerEvent::SwipesHistory(vec![
                UserId::neu("u2"),
                UserId::neu("u3")
            ]))
        );
    }

    #[test]
    fn kein_match_ohne_match_erkennung() {
        let d = dispatcher(RelayConfig::default());
        let mut a = verbinden(&d, "u1");
        let mut b = verbinden(&d, "u2");

        d.dispatch(swipe("u1", SwipeRichtung::Right), &b.ctx);
        d.dispatch(swipe("u2", SwipeRichtung::Right), &a.ctx);

        assert!(a.rx.try_recv().is_err());
        assert!(b.rx.try_recv().is_err());
        assert_eq!(d.state().metriken.matches_total.get(), 0);
    }

    #[test]
    fn match_erkennung_benachrichtigt_beide() {
        let d = dispatcher(RelayConfig {
            match_erkennung: true,
            ..Default::default()
        });
        let mut a = verbinden(&d, "u1");
        let mut b = verbinden(&d, "u2");

        d.dispatch(swipe("u1", SwipeRichtung::Right), &b.ctx);
        d.dispatch(swipe("u2", SwipeRichtung::Right), &a.ctx);

        assert_eq!(
            a.rx.try_recv().unwrap(),
            ServerEvent::NewMatch(NewMatch {
                with: UserId::neu("u2")
            })
        );
        assert_eq!(
            b.rx.try_recv().unwrap(),
            ServerEvent::NewMatch(NewMatch {
                with: UserId::neu("u1")
            })
        );
        assert_eq!(d.state().metriken.matches_total.get(), 1);
    }

    #[test]
    fn swipe_weiterleitung() {
        let d = dispatcher(RelayConfig {
            swipes_weiterleiten: true,
            ..Default::default()
        });
        let a = verbinden(&d, "u1");
        let mut b = verbinden(&d, "u2");

        d.dispatch(swipe("u2", SwipeRichtung::Left), &a.ctx);
        assert_eq!(
            b.rx.try_recv().unwrap(),
            ServerEvent::ReceiveSwipe(ReceiveSwipe {
                from: UserId::neu("u1"),
                direction: SwipeRichtung::Left,
            })
        );
        assert_eq!(
            d.state()
                .metriken
                .swipes_total
                .with_label_values(&["left"])
                .get(),
            1
        );
    }

    #[test]
    fn swipe_auf_sich_selbst_ist_ungueltig() {
        let d = dispatcher(RelayConfig::default());
        let a = verbinden(&d, "u1");
        d.dispatch(swipe("u1", SwipeRichtung::Right), &a.ctx);
        assert!(d.state().history.swipes_von(&UserId::neu("u1")).is_empty());
        assert_eq!(d.state().metriken.verworfen_anzahl("malformed"), 1);
    }

    #[test]
    fn volle_queue_des_empfaengers_blockiert_nicht() {
        let d = dispatcher(RelayConfig::default());
        let a = verbinden(&d, "u1");
        let (handle, _rx) = ConnectionHandle::neu(1);
        d.state().registry.bind(UserId::neu("u2"), handle);

        d.dispatch(nachricht("u2", "eins"), &a.ctx);
        d.dispatch(nachricht("u2", "zwei"), &a.ctx);

        assert_eq!(d.state().metriken.messages_relayed_total.get(), 1);
        assert_eq!(d.state().metriken.verworfen_anzahl("queue_full"), 1);
    }

    #[test]
    fn cleanup_entfernt_nur_eigene_verbindung() {
        let d = dispatcher(RelayConfig::default());
        let alt = verbinden(&d, "u1");
        let neu = verbinden(&d, "u1");

        assert!(d.client_cleanup(&alt.ctx.verbindung).is_none());
        assert_eq!(
            d.state().registry.lookup(&UserId::neu("u1")),
            Some(neu.ctx.verbindung.clone())
        );
        assert_eq!(d.client_cleanup(&neu.ctx.verbindung), Some(UserId::neu("u1")));
        assert!(!d.state().registry.ist_online(&UserId::neu("u1")));
    }
}
