//! Configuration for the affinity balancer
//!
//! # Module Organization
//!
//! - [`balance`]: Balancing algorithm selection and sticky session settings
//! - [`duration`]: Duration text parsing (`"5s"`, `"1m30s"`)
//! - [`kdl`]: KDL format parsing
//!
//! Configuration is parsed and checked when a balancer is built. Nothing in
//! here runs on the request path.

use anyhow::{Context, Result};
use std::path::Path;

use affinity_common::errors::{AffinityError, AffinityResult};

// ============================================================================
// Module Declarations
// ============================================================================

pub mod balance;
pub mod duration;
pub mod kdl;

// ============================================================================
// Re-exports
// ============================================================================

pub use balance::{BalanceAlgorithm, BalanceConfig};
pub use duration::parse_duration;

// ============================================================================
// Loading
// ============================================================================

impl BalanceConfig {
    /// Load configuration from a `.kdl` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("kdl");

        let config = match extension {
            "kdl" => Self::from_kdl(&content),
            "json" => Self::from_json(&content),
            _ => return Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        };

        config.with_context(|| format!("Invalid configuration in {:?}", path))
    }

    /// Parse and check configuration from KDL text
    pub fn from_kdl(content: &str) -> AffinityResult<Self> {
        let config = kdl::parse_balance_document(content)?;
        config.check()?;
        Ok(config)
    }

    /// Parse and check configuration from JSON text
    pub fn from_json(content: &str) -> AffinityResult<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| {
            AffinityError::config_with_source("JSON configuration parse error", e)
        })?;
        config.check()?;
        Ok(config)
    }
}
