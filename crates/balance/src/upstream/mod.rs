//! Backend election strategies
//!
//! Every strategy implements [`Elector`], so the dispatcher can swap one for
//! another without knowing which it holds. Strategies that fall back to
//! another strategy receive it as an injected `Arc<dyn Elector>`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use affinity_config::{BalanceAlgorithm, BalanceConfig};

use crate::types::{AffinityResult, Backend, ClientContext};

// Election algorithm implementations
pub mod expiry;
pub mod priority;
pub mod session;
pub mod sticky_priority;

// Re-export commonly used types from sub-modules
pub use expiry::ExpiryScheduler;
pub use priority::PriorityBalancer;
pub use session::{EvictionHandle, Session, SessionSnapshot, SessionStore};
pub use sticky_priority::{StickyPriorityBalancer, StickyPriorityRuntimeConfig, StickyStats};

/// Backend election strategy
#[async_trait]
pub trait Elector: Send + Sync {
    /// Choose one backend out of `backends` for this client
    ///
    /// Implementations return [`crate::types::AffinityError::EmptyBackendSet`]
    /// when `backends` is empty.
    async fn elect(
        &self,
        context: &ClientContext,
        backends: &[Arc<Backend>],
    ) -> AffinityResult<Arc<Backend>>;

    /// Algorithm name, used in logs
    fn name(&self) -> &'static str;
}

/// Build the elector described by a balance configuration
///
/// Sticky priority wraps a fresh priority elector as its fallback. Must be
/// called inside a tokio runtime when the sticky strategy is selected, since
/// its eviction checks are spawned as tasks.
pub fn create_elector(config: &BalanceConfig) -> AffinityResult<Arc<dyn Elector>> {
    config.check()?;

    let elector: Arc<dyn Elector> = match config.algorithm {
        BalanceAlgorithm::Priority => Arc::new(PriorityBalancer::new()),
        BalanceAlgorithm::StickyPriority => {
            let runtime = StickyPriorityRuntimeConfig::from_config(config)?;
            Arc::new(StickyPriorityBalancer::new(
                runtime,
                Arc::new(PriorityBalancer::new()),
            ))
        }
    };

    debug!(algorithm = elector.name(), "Created elector");
    Ok(elector)
}
