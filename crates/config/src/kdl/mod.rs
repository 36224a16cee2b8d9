//! KDL configuration parsing.
//!
//! The balance block looks like:
//!
//! ```kdl
//! balance {
//!     algorithm "sticky-priority"
//!     sticky-priority-session-idle-expiry "5m"
//! }
//! ```

mod helpers;

pub use helpers::{get_first_arg_string, node_location, offset_to_line_col};

use tracing::trace;

use affinity_common::errors::{AffinityError, AffinityResult};

use crate::balance::{BalanceAlgorithm, BalanceConfig};

/// Parse KDL text into a [`BalanceConfig`]
pub fn parse_balance_document(content: &str) -> AffinityResult<BalanceConfig> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        AffinityError::config_with_source("KDL configuration parse error", e)
    })?;

    let node = doc.get("balance").ok_or_else(|| {
        AffinityError::config(
            "Missing required 'balance' configuration block\n\
             Example:\n\
             balance {\n    \
                 algorithm \"sticky-priority\"\n    \
                 sticky-priority-session-idle-expiry \"5m\"\n\
             }",
        )
    })?;

    parse_balance_node(content, node)
}

/// Parse the children of a `balance` node
pub fn parse_balance_node(content: &str, node: &kdl::KdlNode) -> AffinityResult<BalanceConfig> {
    trace!("Parsing balance configuration block");
    let mut config = BalanceConfig::default();

    let Some(children) = node.children() else {
        return Ok(config);
    };

    for child in children.nodes() {
        let name = child.name().value();
        match name {
            "algorithm" => {
                let value = get_first_arg_string(child).ok_or_else(|| {
                    AffinityError::config(format!(
                        "'algorithm' requires a string argument at {}",
                        node_location(content, child)
                    ))
                })?;
                config.algorithm = value.parse::<BalanceAlgorithm>().map_err(|e| {
                    AffinityError::config_with_source(
                        format!("invalid algorithm at {}", node_location(content, child)),
                        e,
                    )
                })?;
            }
            "sticky-priority-session-idle-expiry" => {
                let value = get_first_arg_string(child).ok_or_else(|| {
                    AffinityError::config(format!(
                        "'sticky-priority-session-idle-expiry' requires a duration string, e.g. \"5m\", at {}",
                        node_location(content, child)
                    ))
                })?;
                config.sticky_priority_session_idle_expiry = Some(value);
            }
            other => {
                return Err(AffinityError::config(format!(
                    "Unknown balance option '{}' at {}\n\
                     Valid options are: algorithm, sticky-priority-session-idle-expiry",
                    other,
                    node_location(content, child)
                )));
            }
        }
    }

    trace!(
        algorithm = %config.algorithm,
        idle_expiry = ?config.sticky_priority_session_idle_expiry,
        "Parsed balance configuration"
    );
    Ok(config)
}
