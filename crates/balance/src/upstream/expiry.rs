//! Idle expiry for sticky sessions
//!
//! Every session gets one background task when it is created. The task sleeps
//! until the session's deadline, then re-reads the session: if the deadline
//! (recomputed from the live touch time) has passed the session is removed,
//! otherwise the task sleeps again until the new deadline. Touches never
//! re-arm anything synchronously.
//!
//! Tasks only hold a weak reference to the store, so dropping the balancer
//! ends every chain at its next wake-up.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use affinity_common::ids::{ClientKey, SessionId};

use super::session::{Check, SessionStore};
use super::sticky_priority::StickyStats;

/// Spawns and runs the self-rescheduling eviction checks
#[derive(Debug, Clone)]
pub struct ExpiryScheduler {
    store: Weak<SessionStore>,
    idle_duration: Duration,
    stats: Arc<StickyStats>,
}

impl ExpiryScheduler {
    pub fn new(
        store: &Arc<SessionStore>,
        idle_duration: Duration,
        stats: Arc<StickyStats>,
    ) -> Self {
        Self {
            store: Arc::downgrade(store),
            idle_duration,
            stats,
        }
    }

    /// Start the eviction chain for a newly created session
    ///
    /// A deadline already in the past fires on the next poll of the task.
    /// The returned handle cannot be used to cancel the session's expiry in
    /// any meaningful way and is only useful for awaiting the chain's end.
    pub fn schedule(
        &self,
        key: ClientKey,
        session_id: SessionId,
        deadline: Instant,
    ) -> JoinHandle<()> {
        trace!(
            client = %key,
            session = %session_id,
            "Setting expiry check timer"
        );

        let store = self.store.clone();
        let idle = self.idle_duration;
        let stats = Arc::clone(&self.stats);

        tokio::spawn(run_chain(store, key, session_id, deadline, idle, stats))
    }
}

async fn run_chain(
    store: Weak<SessionStore>,
    key: ClientKey,
    session_id: SessionId,
    mut deadline: Instant,
    idle: Duration,
    stats: Arc<StickyStats>,
) {
    loop {
        tokio::time::sleep_until(deadline).await;

        let Some(live) = store.upgrade() else {
            trace!(
                client = %key,
                session = %session_id,
                "Session store dropped, ending expiry chain"
            );
            return;
        };

        match live.check_expiry(&key, session_id, Instant::now(), idle) {
            Check::Absent => {
                debug!(client = %key, session = %session_id, "Expiry check found no session");
                return;
            }
            Check::Replaced => {
                debug!(
                    client = %key,
                    session = %session_id,
                    "Expiry check found a newer session, leaving it to its own chain"
                );
                return;
            }
            Check::Expired { idle_for } => {
                stats.sessions_expired.fetch_add(1, Ordering::Relaxed);
                info!(
                    client = %key,
                    session = %session_id,
                    idle_for = ?idle_for,
                    "Sticky session expired"
                );
                return;
            }
            Check::Pending { deadline: next } => {
                stats.expiry_reschedules.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client = %key,
                    session = %session_id,
                    remaining = ?next.saturating_duration_since(Instant::now()),
                    "Session touched since check was scheduled, rescheduling"
                );
                deadline = next;
            }
        }
    }
}
