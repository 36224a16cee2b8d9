//! Sticky session table
//!
//! [`SessionStore`] is the only shared mutable state of the sticky strategy.
//! It is written from two independent places: elections on the request path
//! and eviction checks running in the background. Each operation below runs
//! under the shard lock of its key, so a lookup-and-touch, a check-and-insert
//! or a check-and-delete is atomic with respect to every other operation on
//! the same key. Nothing spans more than one key.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use affinity_common::ids::{ClientKey, SessionId};

use crate::types::Backend;

/// Deadline the pending eviction check for a session will fire at
///
/// Informational only; there is no way to cancel a scheduled check. It is
/// updated every time the check reschedules itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionHandle {
    pub session_id: SessionId,
    pub deadline: Instant,
}

/// Affinity record for one client
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    backend: Arc<Backend>,
    last_touch: Instant,
    eviction: EvictionHandle,
}

impl Session {
    fn new(backend: Arc<Backend>, now: Instant, idle: Duration) -> Self {
        let id = SessionId::next();
        Self {
            id,
            backend,
            last_touch: now,
            eviction: EvictionHandle {
                session_id: id,
                deadline: now + idle,
            },
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn last_touch(&self) -> Instant {
        self.last_touch
    }

    pub fn eviction(&self) -> EvictionHandle {
        self.eviction
    }

    fn touch(&mut self, now: Instant) {
        // Concurrent elections may take `now` in a different order than they
        // acquire the lock; never move the touch backwards.
        self.last_touch = self.last_touch.max(now);
    }

    /// Rebind to the candidate with the same address, if any
    ///
    /// The candidate list may hold a newer object for the bound address, so
    /// the session always switches to the instance from the list. The touch
    /// is skipped while that backend is draining, which lets the session run
    /// out its idle period even though the client keeps coming back.
    fn rebind_matching(
        &mut self,
        backends: &[Arc<Backend>],
        now: Instant,
    ) -> Option<(Arc<Backend>, bool)> {
        let matched = backends
            .iter()
            .find(|candidate| candidate.same_address(&self.backend))?;

        self.backend = Arc::clone(matched);
        let touched = !matched.is_draining();
        if touched {
            self.touch(now);
        }
        Some((Arc::clone(matched), touched))
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            backend: Arc::clone(&self.backend),
            last_touch: self.last_touch,
            eviction: self.eviction,
        }
    }
}

/// Point-in-time copy of a session, for inspection
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub backend: Arc<Backend>,
    pub last_touch: Instant,
    pub eviction: EvictionHandle,
}

/// Result of looking a client up before any election
#[derive(Debug)]
pub(crate) enum Lookup {
    /// Bound backend is still a candidate; the session now points at it
    Hit { backend: Arc<Backend>, touched: bool },
    /// A session exists but its backend is gone from the candidate list
    Stale { bound: String },
    /// No session for this client
    Miss,
}

/// Result of storing a freshly elected backend
#[derive(Debug)]
pub(crate) enum Binding {
    /// New session inserted; its eviction chain must be started
    Created {
        backend: Arc<Backend>,
        session_id: SessionId,
        deadline: Instant,
    },
    /// Another election created or rebound the session first and its backend
    /// is a valid candidate, so that binding is kept
    Joined { backend: Arc<Backend>, touched: bool },
    /// Existing session moved to the elected backend
    Rebound {
        backend: Arc<Backend>,
        previous: String,
    },
}

/// Outcome of an eviction check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Check {
    /// Nothing stored under the key
    Absent,
    /// The key holds a different generation of session
    Replaced,
    /// Idle deadline passed; the session was removed
    Expired { idle_for: Duration },
    /// Session was touched since scheduling; check again at `deadline`
    Pending { deadline: Instant },
}

/// Mapping from client key to sticky session
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<ClientKey, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copy of the session stored for `key`
    pub fn get(&self, key: &ClientKey) -> Option<SessionSnapshot> {
        self.sessions.get(key).map(|session| session.snapshot())
    }

    /// Keys of all live sessions
    pub fn keys(&self) -> Vec<ClientKey> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Find the session for `key` and revalidate it against `backends`
    pub(crate) fn lookup(
        &self,
        key: &ClientKey,
        backends: &[Arc<Backend>],
        now: Instant,
    ) -> Lookup {
        let Some(mut session) = self.sessions.get_mut(key) else {
            return Lookup::Miss;
        };

        match session.rebind_matching(backends, now) {
            Some((backend, touched)) => Lookup::Hit { backend, touched },
            None => Lookup::Stale {
                bound: session.backend.address(),
            },
        }
    }

    /// Store an elected backend for `key`
    ///
    /// Inserts a new session when the key is vacant. When a session appeared
    /// or survived in the meantime, it is revalidated first and only rebound
    /// to `elected` if its own backend is not a candidate; a rebind always
    /// refreshes the touch, whatever the drain state of `elected`.
    pub(crate) fn bind(
        &self,
        key: ClientKey,
        elected: Arc<Backend>,
        backends: &[Arc<Backend>],
        now: Instant,
        idle: Duration,
    ) -> Binding {
        match self.sessions.entry(key) {
            Entry::Vacant(vacant) => {
                let session = Session::new(Arc::clone(&elected), now, idle);
                let session_id = session.id;
                let deadline = session.eviction.deadline;
                vacant.insert(session);
                Binding::Created {
                    backend: elected,
                    session_id,
                    deadline,
                }
            }
            Entry::Occupied(mut occupied) => {
                let session = occupied.get_mut();
                if let Some((backend, touched)) = session.rebind_matching(backends, now) {
                    return Binding::Joined { backend, touched };
                }

                let previous = session.backend.address();
                session.backend = Arc::clone(&elected);
                session.touch(now);
                Binding::Rebound {
                    backend: elected,
                    previous,
                }
            }
        }
    }

    /// Decide the fate of the session an eviction chain was started for
    ///
    /// The deadline is always recomputed from the live touch time, so any
    /// number of touches between scheduling and firing is accounted for.
    pub(crate) fn check_expiry(
        &self,
        key: &ClientKey,
        session_id: SessionId,
        now: Instant,
        idle: Duration,
    ) -> Check {
        let Entry::Occupied(mut occupied) = self.sessions.entry(key.clone()) else {
            return Check::Absent;
        };

        let session = occupied.get_mut();
        if session.id != session_id {
            return Check::Replaced;
        }

        let deadline = session.last_touch + idle;
        if now >= deadline {
            let idle_for = now.duration_since(session.last_touch);
            occupied.remove();
            trace!(client = %key, session = %session_id, "Removed idle session");
            Check::Expired { idle_for }
        } else {
            session.eviction.deadline = deadline;
            Check::Pending { deadline }
        }
    }
}
