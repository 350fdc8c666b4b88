//! Verbindungs-Registry – Wer ist gerade erreichbar?
//!
//! Bildet jede Benutzer-Identitaet auf genau eine Live-Verbindung ab.
//! Die Registry ist die einzige geteilte, veraenderliche Ressource des
//! Relay und die einzige Quelle fuer "ist dieser Benutzer erreichbar".
//!
//! ## Regeln
//! - `bind` ersetzt eine bestehende Zuordnung (letzter `join` gewinnt).
//!   Die verdraengte Verbindung bleibt offen, ist aber nicht mehr
//!   ueber die Identitaet auffindbar.
//! - `unbind` entfernt nach Verbindung, nie nach Identitaet. Ein spaetes
//!   `unbind` einer verdraengten Verbindung laesst die neuere Zuordnung
//!   deshalb unberuehrt.
//! - Alle Operationen laufen unter einem einzigen Lock ueber beide
//!   Richtungen (Identitaet -> Verbindung, Verbindung -> Identitaet) und
//!   sind O(1). Kein IO, kein Warten auf andere Verbindungen.
//! - Die optionale Gauge wird noch unter dem Lock gesetzt und zeigt damit
//!   immer den Stand der letzten Aenderung.

use fumble_core::types::{ConnectionId, UserId};
use fumble_protocol::ServerEvent;
use parking_lot::Mutex;
use prometheus::Gauge;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{RelayError, RelayResult};

// ---------------------------------------------------------------------------
// ConnectionHandle
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Live-Verbindung
///
/// Gleichheit ist ausschliesslich ueber die `ConnectionId` definiert.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Erstellt ein Handle samt Empfangs-Queue
    ///
    /// Der Transport liest aus der Queue und schreibt in den Socket.
    pub fn neu(queue_groesse: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(queue_groesse.max(1));
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    /// ID der Verbindung
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Reiht ein Event nicht-blockierend in die Send-Queue ein
    pub fn senden(&self, event: ServerEvent) -> RelayResult<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(RelayError::QueueVoll(self.id)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RelayError::SendFehler(self.id)),
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Zentrale Registry aller gebundenen Verbindungen
///
/// Thread-safe via Arc + Mutex. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    gauge: Option<Gauge>,
}

#[derive(Default)]
struct RegistryInner {
    nach_user: HashMap<UserId, ConnectionHandle>,
    nach_verbindung: HashMap<ConnectionId, UserId>,
}

impl ConnectionRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        Self::default()
    }

    /// Erstellt eine leere Registry, die `gauge` auf die Anzahl gebundener
    /// Identitaeten haelt
    pub fn mit_gauge(gauge: Gauge) -> Self {
        gauge.set(0.0);
        Self {
            inner: Arc::default(),
            gauge: Some(gauge),
        }
    }

    fn gauge_setzen(&self, inner: &RegistryInner) {
        if let Some(gauge) = &self.gauge {
            gauge.set(inner.nach_user.len() as f64);
        }
    }

    /// Bindet `user` an `handle` und gibt eine verdraengte Verbindung zurueck
    ///
    /// War die Verbindung vorher an eine andere Identitaet gebunden, wird
    /// diese Zuordnung aufgeloest: eine Verbindung gehoert hoechstens einer
    /// Identitaet.
    pub fn bind(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let id = handle.id();
        let mut inner = self.inner.lock();

        if let Some(alter_user) = inner.nach_verbindung.remove(&id) {
            if alter_user != user && inner.nach_user.get(&alter_user).map(|h| h.id()) == Some(id) {
                inner.nach_user.remove(&alter_user);
            }
        }

        let verdraengt = inner.nach_user.insert(user.clone(), handle);
        inner.nach_verbindung.insert(id, user);
        self.gauge_setzen(&inner);

        match verdraengt {
            Some(alt) if alt.id() != id => {
                inner.nach_verbindung.remove(&alt.id());
                Some(alt)
            }
            _ => None,
        }
    }

    /// Sucht die aktuelle Verbindung eines Benutzers
    pub fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.inner.lock().nach_user.get(user).cloned()
    }

    /// Entfernt die Zuordnung, deren Wert `handle` ist
    ///
    /// Idempotent: ein unbekanntes oder bereits entferntes Handle ist ein
    /// No-op. Gibt die Identitaet zurueck, die tatsaechlich entfernt wurde.
    pub fn unbind(&self, handle: &ConnectionHandle) -> Option<UserId> {
        let id = handle.id();
        let mut inner = self.inner.lock();

        let user = inner.nach_verbindung.remove(&id)?;
        if inner.nach_user.get(&user).map(|h| h.id()) == Some(id) {
            inner.nach_user.remove(&user);
        }
        self.gauge_setzen(&inner);
        Some(user)
    }

    /// Prueft ob ein Benutzer erreichbar ist
    pub fn ist_online(&self, user: &UserId) -> bool {
        self.inner.lock().nach_user.contains_key(user)
    }

    /// Anzahl gebundener Identitaeten
    pub fn anzahl(&self) -> usize {
        self.inner.lock().nach_user.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fumble_protocol::events::{NewMatch, ServerEvent};

    fn handle() -> ConnectionHandle {
        ConnectionHandle::neu(8).0
    }

    fn u(id: &str) -> UserId {
        UserId::neu(id)
    }

    #[test]
    fn bind_und_lookup() {
        let reg = ConnectionRegistry::neu();
        let h = handle();

        assert!(reg.bind(u("u1"), h.clone()).is_none());
        assert_eq!(reg.lookup(&u("u1")), Some(h.clone()));
        assert!(reg.ist_online(&u("u1")));
        assert_eq!(reg.anzahl(), 1);
    }

    #[test]
    fn lookup_unbekannt_ist_none() {
        let reg = ConnectionRegistry::neu();
        assert!(reg.lookup(&u("niemand")).is_none());
    }

    #[test]
    fn letzter_join_gewinnt() {
        let reg = ConnectionRegistry::neu();
        let c1 = handle();
        let c2 = handle();

        reg.bind(u("u1"), c1.clone());
        let verdraengt = reg.bind(u("u1"), c2.clone());

        assert_eq!(verdraengt, Some(c1.clone()));
        assert_eq!(reg.lookup(&u("u1")), Some(c2.clone()));
        // c1 ist keiner Identitaet mehr zugeordnet
        assert!(reg.unbind(&c1).is_none());
    }

    #[test]
    fn spaetes_unbind_der_alten_verbindung_laesst_neue_stehen() {
        let reg = ConnectionRegistry::neu();
        let c1 = handle();
        let c2 = handle();

        reg.bind(u("u1"), c1.clone());
        reg.bind(u("u1"), c2.clone());

        assert!(reg.unbind(&c1).is_none());
        assert_eq!(reg.lookup(&u("u1")), Some(c2));
    }

    #[test]
    fn unbind_ist_idempotent() {
        let reg = ConnectionRegistry::neu();
        let c1 = handle();
        let fremd = handle();
        reg.bind(u("u1"), c1.clone());
        reg.bind(u("u2"), handle());

        assert_eq!(reg.unbind(&c1), Some(u("u1")));
        assert_eq!(reg.unbind(&c1), None);
        assert_eq!(reg.unbind(&fremd), None);

        assert!(reg.lookup(&u("u1")).is_none());
        assert!(reg.ist_online(&u("u2")), "Unbeteiligter Eintrag muss bleiben");
    }

    #[test]
    fn rebind_derselben_verbindung_auf_andere_identitaet() {
        let reg = ConnectionRegistry::neu();
        let c = handle();

        reg.bind(u("u1"), c.clone());
        assert!(reg.bind(u("u2"), c.clone()).is_none());

        assert!(reg.lookup(&u("u1")).is_none());
        assert_eq!(reg.lookup(&u("u2")), Some(c.clone()));
        assert_eq!(reg.anzahl(), 1);

        assert_eq!(reg.unbind(&c), Some(u("u2")));
        assert_eq!(reg.anzahl(), 0);
    }

    #[test]
    fn doppelter_join_auf_derselben_verbindung() {
        let reg = ConnectionRegistry::neu();
        let c = handle();
        reg.bind(u("u1"), c.clone());
        assert!(reg.bind(u("u1"), c.clone()).is_none());
        assert_eq!(reg.anzahl(), 1);
        assert_eq!(reg.unbind(&c), Some(u("u1")));
    }

    #[test]
    fn clone_teilt_inneren_state() {
        let a = ConnectionRegistry::neu();
        let b = a.clone();
        a.bind(u("shared"), handle());
        assert!(b.ist_online(&u("shared")));
    }

    #[test]
    fn zufaellige_sequenz_entspricht_modell() {
        // Modell: lookup(user) = Handle des letzten bind(user, _), solange
        // dieses Handle nicht selbst wieder entfernt wurde.
        let reg = ConnectionRegistry::neu();
        let users: Vec<UserId> = (0..4).map(|i| u(&format!("u{i}"))).collect();
        let handles: Vec<ConnectionHandle> = (0..6).map(|_| handle()).collect();
        let mut modell: HashMap<UserId, ConnectionId> = HashMap::new();

        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut naechste = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..2_000 {
            let h = &handles[(naechste() % handles.len() as u64) as usize];
            if naechste() % 3 == 0 {
                reg.unbind(h);
                modell.retain(|_, id| *id != h.id());
            } else {
                let user = users[(naechste() % users.len() as u64) as usize].clone();
                reg.bind(user.clone(), h.clone());
                modell.retain(|_, id| *id != h.id());
                modell.insert(user, h.id());
            }

            for user in &users {
                assert_eq!(
                    reg.lookup(user).map(|h| h.id()),
                    modell.get(user).copied(),
                    "Abweichung fuer {user}"
                );
            }
        }
    }

    #[test]
    fn nebenlaeufiges_reconnect_rennen() {
        // Jeder Thread verbindet sich neu und trennt danach die alte
        // Verbindung. Am Ende muss genau die zuletzt gebundene bleiben.
        let reg = ConnectionRegistry::neu();
        let user = u("u1");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                let user = user.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let alt = handle();
                        let neu = handle();
                        reg.bind(user.clone(), alt.clone());
                        reg.bind(user.clone(), neu.clone());
                        reg.unbind(&alt);
                        assert_ne!(reg.lookup(&user).map(|h| h.id()), Some(alt.id()));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let aktuell = reg.lookup(&user).expect("Eine Verbindung muss gebunden bleiben");
        assert_eq!(reg.anzahl(), 1);
        assert_eq!(reg.unbind(&aktuell), Some(user));
    }

    #[test]
    fn gauge_folgt_bind_und_unbind() {
        let gauge = Gauge::new("test_clients", "Gebundene Identitaeten").unwrap();
        let reg = ConnectionRegistry::mit_gauge(gauge.clone());
        let c1 = handle();
        let c2 = handle();

        reg.bind(u("u1"), c1.clone());
        reg.bind(u("u2"), c2.clone());
        assert_eq!(gauge.get(), 2.0);

        // Reconnect aendert die Anzahl nicht
        reg.bind(u("u1"), handle());
        assert_eq!(gauge.get(), 2.0);

        reg.unbind(&c2);
        assert_eq!(gauge.get(), 1.0);
    }

    #[test]
    fn gauge_bleibt_bei_nebenlaeufigen_aenderungen_aktuell() {
        let gauge = Gauge::new("test_clients_rennen", "Gebundene Identitaeten").unwrap();
        let reg = ConnectionRegistry::mit_gauge(gauge.clone());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for runde in 0..200 {
                        let h = handle();
                        reg.bind(u(&format!("t{i}-{}", runde % 3)), h.clone());
                        if runde % 2 == 0 {
                            reg.unbind(&h);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(gauge.get(), reg.anzahl() as f64);
    }

    #[tokio::test]
    async fn senden_und_queue_voll() {
        let (h, mut rx) = ConnectionHandle::neu(1);
        let ev = ServerEvent::NewMatch(NewMatch { with: u("x") });

        h.senden(ev.clone()).unwrap();
        let err = h.senden(ev.clone()).unwrap_err();
        assert!(matches!(err, RelayError::QueueVoll(id) if id == h.id()));

        assert_eq!(rx.recv().await, Some(ev));
    }

    #[test]
    fn senden_an_geschlossene_queue() {
        let (h, rx) = ConnectionHandle::neu(4);
        drop(rx);
        let err = h
            .senden(ServerEvent::SwipesHistory(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, RelayError::SendFehler(_)));
    }
}
