//! In-Memory-Verlauf fuer Nachrichten und Swipes
//!
//! Lebt genau so lange wie der Prozess. Nachrichten werden pro Benutzerpaar
//! abgelegt (Schluessel ist das geordnete Paar, Reihenfolge der Beteiligten
//! egal), Swipes pro Absender als geordnetes Log.

use chrono::Utc;
use dashmap::DashMap;
use fumble_core::types::{MessageId, UserId};
use fumble_protocol::events::HistoryEntry;
use fumble_protocol::SwipeRichtung;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ungeordnetes Benutzerpaar als Map-Schluessel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaarSchluessel(UserId, UserId);

impl PaarSchluessel {
    pub fn neu(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self(a.clone(), b.clone())
        } else {
            Self(b.clone(), a.clone())
        }
    }
}

/// Eine abgelegte Chat-Nachricht
#[derive(Debug, Clone, PartialEq)]
pub struct GespeicherteNachricht {
    pub id: MessageId,
    pub from: UserId,
    pub to: UserId,
    pub text: String,
    /// Unix-Millisekunden (UTC)
    pub timestamp: i64,
}

impl GespeicherteNachricht {
    pub fn als_eintrag(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id,
            text: self.text.clone(),
            from: self.from.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Ein Swipe im Log des Absenders
#[derive(Debug, Clone, PartialEq)]
pub struct SwipeEintrag {
    pub to: UserId,
    pub direction: SwipeRichtung,
    pub timestamp: i64,
}

/// Verlaufsspeicher des Relay
pub struct RelayHistory {
    nachrichten: DashMap<PaarSchluessel, Vec<GespeicherteNachricht>>,
    swipes: Mutex<HashMap<UserId, Vec<SwipeEintrag>>>,
    naechste_id: AtomicU64,
    max_pro_paar: Option<usize>,
}

impl RelayHistory {
    /// Erstellt einen leeren Speicher
    ///
    /// `max_pro_paar` begrenzt den Verlauf pro Paar auf die neuesten N
    /// Nachrichten, `None` heisst unbegrenzt.
    pub fn neu(max_pro_paar: Option<usize>) -> Self {
        Self {
            nachrichten: DashMap::new(),
            swipes: Mutex::new(HashMap::new()),
            naechste_id: AtomicU64::new(1),
            max_pro_paar,
        }
    }

    /// Legt eine Nachricht ab und vergibt ID und Zeitstempel
    ///
    /// ID-Vergabe und Anhaengen passieren unter dem Eintrags-Lock des
    /// Paares, der Verlauf eines Paares ist damit immer nach ID sortiert.
    pub fn nachricht_anhaengen(
        &self,
        from: &UserId,
        to: &UserId,
        text: impl Into<String>,
    ) -> GespeicherteNachricht {
        let mut log = self
            .nachrichten
            .entry(PaarSchluessel::neu(from, to))
            .or_default();

        let nachricht = GespeicherteNachricht {
            id: MessageId(self.naechste_id.fetch_add(1, Ordering::Relaxed)),
            from: from.clone(),
            to: to.clone(),
            text: text.into(),
            timestamp: Utc::now().timestamp_millis(),
        };
        log.push(nachricht.clone());

        if let Some(max) = self.max_pro_paar {
            let ueberschuss = log.len().saturating_sub(max);
            if ueberschuss > 0 {
                log.drain(..ueberschuss);
            }
        }
        nachricht
    }

    /// Verlauf zwischen zwei Benutzern, aelteste zuerst
    pub fn verlauf(&self, a: &UserId, b: &UserId) -> Vec<GespeicherteNachricht> {
        self.nachrichten
            .get(&PaarSchluessel::neu(a, b))
            .map(|log| log.value().clone())
            .unwrap_or_default()
    }

    /// Zeichnet einen Swipe auf
    ///
    /// Gibt `true` zurueck, wenn dieser Swipe ein Match begruendet: er geht
    /// nach rechts, das Ziel hat den Absender bereits nach rechts geswiped
    /// und es ist der erste Rechts-Swipe des Absenders auf dieses Ziel.
    pub fn swipe_erfassen(&self, from: &UserId, to: &UserId, direction: SwipeRichtung) -> bool {
        let mut swipes = self.swipes.lock();

        let rechts = |log: Option<&Vec<SwipeEintrag>>, ziel: &UserId| {
            log.map(|l| {
                l.iter()
                    .any(|s| s.to == *ziel && s.direction == SwipeRichtung::Right)
            })
            .unwrap_or(false)
        };

        let gegenseitig = direction == SwipeRichtung::Right
            && !rechts(swipes.get(from), to)
            && rechts(swipes.get(to), from);

        swipes.entry(from.clone()).or_default().push(SwipeEintrag {
            to: to.clone(),
            direction,
            timestamp: Utc::now().timestamp_millis(),
        });

        gegenseitig
    }

    /// Ziele aller Swipes eines Benutzers in Swipe-Reihenfolge
    pub fn swipes_von(&self, user: &UserId) -> Vec<UserId> {
        self.swipes
            .lock()
            .get(user)
            .map(|log| log.iter().map(|s| s.to.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for RelayHistory {
    fn default() -> Self {
        Self::neu(None)
    }
}
