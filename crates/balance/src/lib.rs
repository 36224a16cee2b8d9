//! Affinity Balance Library
//!
//! Backend election strategies for a connection dispatcher:
//!
//! - **Priority**: the lowest priority tier wins, weighted random inside it
//! - **Sticky priority**: priority election pinned per client address until
//!   the client goes idle, with draining backends phased out
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use affinity_balance::{Backend, ClientContext, Elector, create_elector};
//! use affinity_config::BalanceConfig;
//!
//! let elector = create_elector(&BalanceConfig::sticky_priority("5m"))?;
//! let backends = vec![Arc::new(Backend::new("10.0.0.1", 8080, 1, 100))];
//! let context = ClientContext::new("192.0.2.7:51234".parse()?);
//! let backend = elector.elect(&context, &backends).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod types;
pub mod upstream;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use types::{AffinityError, AffinityResult, Backend, ClientContext};
pub use upstream::{
    create_elector, Elector, ExpiryScheduler, PriorityBalancer, SessionSnapshot, SessionStore,
    StickyPriorityBalancer, StickyPriorityRuntimeConfig, StickyStats,
};
pub use upstream::sticky_priority::StickyStatsSnapshot;
