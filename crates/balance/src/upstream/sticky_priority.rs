//! Client-address sticky sessions over priority election
//!
//! New clients are placed by the fallback elector (normally priority). The
//! chosen backend is remembered per client IP and reused for as long as it
//! stays in the candidate list and the client keeps coming back within the
//! idle period. A backend flagged as draining keeps serving its clients, but
//! their activity no longer extends the session, so they move elsewhere once
//! the idle period since their last regular touch runs out.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use affinity_common::ids::ClientKey;
use affinity_config::BalanceConfig;

use super::expiry::ExpiryScheduler;
use super::session::{Binding, Lookup, SessionSnapshot, SessionStore};
use super::Elector;
use crate::types::{AffinityError, AffinityResult, Backend, ClientContext};

/// Idle expiry used when none is configured explicitly
pub const DEFAULT_SESSION_IDLE_EXPIRY: Duration = Duration::from_secs(300);

/// Runtime configuration for sticky priority balancing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyPriorityRuntimeConfig {
    /// Idle period after which a session is dropped
    pub session_idle_expiry: Duration,
}

impl StickyPriorityRuntimeConfig {
    pub fn new(session_idle_expiry: Duration) -> Self {
        Self {
            session_idle_expiry,
        }
    }

    /// Create runtime config from parsed config
    ///
    /// Fails when the idle expiry is missing or unparseable, so the problem
    /// surfaces at startup rather than on the first request.
    pub fn from_config(config: &BalanceConfig) -> AffinityResult<Self> {
        let session_idle_expiry = config.session_idle_expiry()?.ok_or_else(|| {
            AffinityError::config(
                "sticky-priority balancing requires 'sticky-priority-session-idle-expiry'",
            )
        })?;
        Ok(Self::new(session_idle_expiry))
    }
}

impl Default for StickyPriorityRuntimeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_IDLE_EXPIRY)
    }
}

/// Sticky table counters
#[derive(Debug, Default)]
pub struct StickyStats {
    /// Sessions created for first-contact clients
    pub sessions_created: AtomicU64,
    /// Elections answered from an existing session
    pub session_hits: AtomicU64,
    /// Sessions moved because their backend left the candidate list
    pub forced_rebinds: AtomicU64,
    /// Sessions removed by idle expiry
    pub sessions_expired: AtomicU64,
    /// Expiry checks that found the session touched and went back to sleep
    pub expiry_reschedules: AtomicU64,
}

/// Plain copy of [`StickyStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StickyStatsSnapshot {
    pub sessions_created: u64,
    pub session_hits: u64,
    pub forced_rebinds: u64,
    pub sessions_expired: u64,
    pub expiry_reschedules: u64,
}

impl StickyStats {
    pub fn snapshot(&self) -> StickyStatsSnapshot {
        StickyStatsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            session_hits: self.session_hits.load(Ordering::Relaxed),
            forced_rebinds: self.forced_rebinds.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            expiry_reschedules: self.expiry_reschedules.load(Ordering::Relaxed),
        }
    }
}

/// Sticky priority load balancer
///
/// Wraps a fallback elector and pins each client to the backend it elected.
/// The fallback is consulted for first contact, after a session expired, and
/// when the pinned backend is no longer among the candidates.
pub struct StickyPriorityBalancer {
    config: StickyPriorityRuntimeConfig,
    store: Arc<SessionStore>,
    scheduler: ExpiryScheduler,
    fallback: Arc<dyn Elector>,
    stats: Arc<StickyStats>,
}

impl StickyPriorityBalancer {
    /// Create a sticky balancer with its own session table
    pub fn new(config: StickyPriorityRuntimeConfig, fallback: Arc<dyn Elector>) -> Self {
        Self::with_store(config, Arc::new(SessionStore::new()), fallback)
    }

    /// Create a sticky balancer over an existing session table
    pub fn with_store(
        config: StickyPriorityRuntimeConfig,
        store: Arc<SessionStore>,
        fallback: Arc<dyn Elector>,
    ) -> Self {
        trace!(
            idle_expiry = ?config.session_idle_expiry,
            fallback = fallback.name(),
            "Creating sticky priority balancer"
        );

        let stats = Arc::new(StickyStats::default());
        let scheduler =
            ExpiryScheduler::new(&store, config.session_idle_expiry, Arc::clone(&stats));

        Self {
            config,
            store,
            scheduler,
            fallback,
            stats,
        }
    }

    pub fn config(&self) -> &StickyPriorityRuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Number of live sticky sessions
    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Current session of a client, if any
    pub fn session(&self, key: &ClientKey) -> Option<SessionSnapshot> {
        self.store.get(key)
    }

    pub fn stats(&self) -> StickyStatsSnapshot {
        self.stats.snapshot()
    }
}

#[async_trait]
impl Elector for StickyPriorityBalancer {
    async fn elect(
        &self,
        context: &ClientContext,
        backends: &[Arc<Backend>],
    ) -> AffinityResult<Arc<Backend>> {
        if backends.is_empty() {
            warn!(
                client = %context.client_addr,
                algorithm = "sticky_priority",
                "Can't elect backend, backend set is empty"
            );
            return Err(AffinityError::EmptyBackendSet);
        }

        let key = context.key();
        trace!(
            client = %key,
            candidates = backends.len(),
            "Sticky priority elect called"
        );

        match self.store.lookup(&key, backends, Instant::now()) {
            Lookup::Hit { backend, touched } => {
                self.stats.session_hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client = %key,
                    backend = %backend,
                    touched = touched,
                    "Sticky session hit"
                );
                return Ok(backend);
            }
            Lookup::Stale { bound } => {
                debug!(
                    client = %key,
                    previous = %bound,
                    "Existing backend not valid, electing a new one"
                );
            }
            Lookup::Miss => {}
        }

        let elected = self.fallback.elect(context, backends).await?;

        let binding = self.store.bind(
            key.clone(),
            elected,
            backends,
            Instant::now(),
            self.config.session_idle_expiry,
        );

        match binding {
            Binding::Created {
                backend,
                session_id,
                deadline,
            } => {
                self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
                info!(
                    client = %key,
                    session = %session_id,
                    backend = %backend,
                    "New sticky session"
                );
                self.scheduler.schedule(key, session_id, deadline);
                Ok(backend)
            }
            Binding::Joined { backend, touched } => {
                self.stats.session_hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client = %key,
                    backend = %backend,
                    touched = touched,
                    "Concurrent election already bound this client, keeping its backend"
                );
                Ok(backend)
            }
            Binding::Rebound { backend, previous } => {
                self.stats.forced_rebinds.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client = %key,
                    previous = %previous,
                    backend = %backend,
                    "Sticky session rebound to newly elected backend"
                );
                Ok(backend)
            }
        }
    }

    fn name(&self) -> &'static str {
        "sticky_priority"
    }
}
