//! Common utilities and shared components for the affinity balancer
//!
//! # Module Organization
//!
//! - [`errors`]: Error types and result aliases
//! - [`ids`]: Type-safe identifier newtypes (ClientKey, SessionId)
//! - [`observability`]: Logging and tracing setup

pub mod errors;
pub mod ids;
pub mod observability;

pub use errors::{AffinityError, AffinityResult};
pub use ids::{ClientKey, SessionId};
pub use observability::init_tracing;
