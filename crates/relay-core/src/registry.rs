//! Call-id keyed session registry
//!
//! Several sessions can live under one call id (re-INVITEs, multiple media
//! streams). The registry owns one reference to every stored session; the
//! reference is given back on removal, outside of any map lock, so that a
//! session destructor never runs while the map is locked.

use dashmap::DashMap;
use tracing::debug;

use crate::refcnt::Rco;
use crate::session::Session;

/// What a [`SessionRegistry::foreach_key`] visitor wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchAction {
    /// Keep scanning
    Continue,
    /// Stop the scan
    Break,
}

/// Sessions grouped by call id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Vec<Rco<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session` under `call_id`, taking a reference
    pub fn append(&self, call_id: &str, session: &Rco<Session>) {
        self.sessions
            .entry(call_id.to_string())
            .or_default()
            .push(session.incref());
    }

    /// Remove `session` from `call_id`'s set and release the registry's reference
    ///
    /// Returns whether the session was stored. Releasing may run the session
    /// destructor on the calling thread.
    pub fn remove(&self, call_id: &str, session: &Rco<Session>) -> bool {
        let removed = {
            let Some(mut entry) = self.sessions.get_mut(call_id) else {
                return false;
            };
            let pos = entry.iter().position(|s| Rco::ptr_eq(s, session));
            pos.map(|pos| entry.swap_remove(pos))
        };
        self.sessions.remove_if(call_id, |_, set| set.is_empty());

        match removed {
            Some(held) => {
                debug!(call_id, "session removed from registry");
                held.decref();
                true
            }
            None => false,
        }
    }

    /// Visit the sessions stored under `call_id` until `visit` breaks
    ///
    /// Visiting order is unspecified. The visitor runs under the map's read
    /// lock and must not touch the registry itself.
    pub fn foreach_key<F>(&self, call_id: &str, mut visit: F)
    where
        F: FnMut(&Rco<Session>) -> MatchAction,
    {
        if let Some(entry) = self.sessions.get(call_id) {
            for session in entry.iter() {
                if visit(session) == MatchAction::Break {
                    break;
                }
            }
        }
    }

    /// Counted handles to every stored session; the caller releases them
    pub fn all(&self) -> Vec<Rco<Session>> {
        self.sessions
            .iter()
            .flat_map(|entry| entry.value().iter().map(Rco::incref).collect::<Vec<_>>())
            .collect()
    }

    /// Release every stored session
    pub fn clear(&self) {
        let keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, set)) = self.sessions.remove(&key) {
                for session in set {
                    session.decref();
                }
            }
        }
    }

    /// Number of sessions stored under `call_id`
    pub fn count_key(&self, call_id: &str) -> usize {
        self.sessions.get(call_id).map(|e| e.len()).unwrap_or(0)
    }

    /// Total number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
