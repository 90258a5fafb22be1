//! Download sessions.
//!
//! Each download attempt for a pack gets a session id that increases
//! monotonically per pack. At most one session per pack is live. A session
//! goes stale the moment a newer one begins or the pack is paused, cancelled
//! or removed; asynchronous work consults [`SessionManager::is_live`] at every
//! checkpoint and stops mutating shared state once it is stale.
//!
//! Every session also carries a [`CancellationToken`] that is cancelled when
//! the session goes stale, so a transfer parked on a network read wakes up
//! instead of waiting for the next chunk. The version a session downloads is
//! fixed when it begins; a catalog swap mid-flight does not change it.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifier of one download attempt for one pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Raw sequence number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A begun session, handed to the task that performs the download.
#[derive(Debug, Clone)]
pub struct Session {
    pack_id: String,
    id: SessionId,
    target: String,
    token: CancellationToken,
}

impl Session {
    /// Pack this session downloads.
    pub fn pack_id(&self) -> &str {
        &self.pack_id
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Version this session downloads.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Token cancelled when the session goes stale.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Debug, Default)]
struct Slot {
    latest: u64,
    live: Option<Session>,
}

/// Tracks the live session of every pack.
#[derive(Debug, Default)]
pub struct SessionManager {
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionManager {
    /// Create an empty session manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new session for `pack_id` downloading `target`, evicting any
    /// live one.
    pub fn begin(&self, pack_id: &str, target: &str) -> Session {
        let mut slots = self.slots.lock();
        let slot = slots.entry(pack_id.to_string()).or_default();
        if let Some(previous) = slot.live.take() {
            previous.token.cancel();
            debug!(pack_id, session = %previous.id, "Session evicted");
        }
        Self::open(pack_id, target, slot)
    }

    /// Begin a new session unless one is already live.
    ///
    /// The check and the registration happen under one lock, so two callers
    /// racing for the same pack cannot both succeed.
    pub fn try_begin(&self, pack_id: &str, target: &str) -> Option<Session> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(pack_id.to_string()).or_default();
        if slot.live.is_some() {
            return None;
        }
        Some(Self::open(pack_id, target, slot))
    }

    fn open(pack_id: &str, target: &str, slot: &mut Slot) -> Session {
        slot.latest += 1;
        let session = Session {
            pack_id: pack_id.to_string(),
            id: SessionId(slot.latest),
            target: target.to_string(),
            token: CancellationToken::new(),
        };
        slot.live = Some(session.clone());
        debug!(pack_id, session = slot.latest, version = target, "Session begun");
        session
    }

    /// Whether `session` is still the live session of `pack_id`.
    pub fn is_live(&self, pack_id: &str, session: SessionId) -> bool {
        self.slots
            .lock()
            .get(pack_id)
            .and_then(|slot| slot.live.as_ref())
            .is_some_and(|live| live.id == session)
    }

    /// Whether any session is live for `pack_id`.
    pub fn is_active(&self, pack_id: &str) -> bool {
        self.live_session(pack_id).is_some()
    }

    /// The live session of `pack_id`, if any.
    pub fn live_session(&self, pack_id: &str) -> Option<SessionId> {
        self.slots
            .lock()
            .get(pack_id)
            .and_then(|slot| slot.live.as_ref())
            .map(|live| live.id)
    }

    /// The most recently begun session of `pack_id`, live or not.
    pub fn latest(&self, pack_id: &str) -> Option<SessionId> {
        self.slots
            .lock()
            .get(pack_id)
            .filter(|slot| slot.latest > 0)
            .map(|slot| SessionId(slot.latest))
    }

    /// Make the live session of `pack_id` stale (pause, cancel, remove).
    ///
    /// Returns the session that was live, with its target version.
    pub fn invalidate(&self, pack_id: &str) -> Option<Session> {
        let mut slots = self.slots.lock();
        let live = slots.get_mut(pack_id)?.live.take()?;
        live.token.cancel();
        debug!(pack_id, session = %live.id, "Session invalidated");
        Some(live)
    }

    /// End `session` normally.
    ///
    /// Clears the live marker only if it still belongs to `session`, so a late
    /// finisher cannot clobber a newer session. Returns whether it did.
    pub fn end(&self, pack_id: &str, session: SessionId) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(pack_id) else {
            return false;
        };
        match &slot.live {
            Some(live) if live.id == session => {
                slot.live = None;
                debug!(pack_id, session = session.0, "Session ended");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase_per_pack() {
        let sessions = SessionManager::new();
        let a1 = sessions.begin("a", "1.0.0");
        let b1 = sessions.begin("b", "1.0.0");
        let a2 = sessions.begin("a", "1.0.0");

        assert_eq!(a1.id().get(), 1);
        assert_eq!(b1.id().get(), 1);
        assert_eq!(a2.id().get(), 2);
        assert_eq!(sessions.latest("a"), Some(a2.id()));
    }

    #[test]
    fn test_newer_session_evicts_older() {
        let sessions = SessionManager::new();
        let first = sessions.begin("p1", "1.0.0");
        let second = sessions.begin("p1", "1.0.0");

        assert!(!sessions.is_live("p1", first.id()));
        assert!(first.token().is_cancelled());
        assert!(sessions.is_live("p1", second.id()));
        assert!(!second.token().is_cancelled());
    }

    #[test]
    fn test_try_begin_rejects_live() {
        let sessions = SessionManager::new();
        let first = sessions.try_begin("p1", "1.0.0").unwrap();
        assert!(sessions.try_begin("p1", "1.0.0").is_none());
        assert!(sessions.is_live("p1", first.id()));

        sessions.end("p1", first.id());
        assert!(sessions.try_begin("p1", "1.0.0").is_some());
    }

    #[test]
    fn test_invalidate_makes_stale() {
        let sessions = SessionManager::new();
        let session = sessions.begin("p1", "1.0.0");

        assert_eq!(sessions.invalidate("p1").map(|s| s.id()), Some(session.id()));
        assert!(!sessions.is_live("p1", session.id()));
        assert!(!sessions.is_active("p1"));
        assert!(session.token().is_cancelled());
        assert!(sessions.invalidate("p1").is_none());
        assert!(sessions.invalidate("unknown").is_none());
    }

    #[test]
    fn test_invalidate_reports_session_target() {
        let sessions = SessionManager::new();
        let session = sessions.begin("p1", "1.0.0");
        assert_eq!(session.target(), "1.0.0");

        let stale = sessions.invalidate("p1").unwrap();
        assert_eq!(stale.id(), session.id());
        assert_eq!(stale.target(), "1.0.0");

        let next = sessions.begin("p1", "2.0.0");
        assert_eq!(sessions.invalidate("p1").unwrap().target(), next.target());
    }

    #[test]
    fn test_stale_end_does_not_clobber_newer() {
        let sessions = SessionManager::new();
        let old = sessions.begin("p1", "1.0.0");
        let new = sessions.begin("p1", "1.0.0");

        assert!(!sessions.end("p1", old.id()));
        assert!(sessions.is_live("p1", new.id()));
        assert!(sessions.end("p1", new.id()));
        assert!(!sessions.is_active("p1"));
    }

    #[test]
    fn test_unknown_pack_not_live() {
        let sessions = SessionManager::new();
        assert!(!sessions.is_live("p1", SessionId(1)));
        assert_eq!(sessions.latest("p1"), None);
        assert!(!sessions.end("p1", SessionId(1)));
    }
}
