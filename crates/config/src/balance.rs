//! Balancing strategy configuration
//!
//! Only the shape of the configuration lives here. Turning the idle expiry
//! text into a [`std::time::Duration`] happens once, when the strategy is
//! built, so a bad value stops startup instead of failing requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

use affinity_common::errors::{AffinityError, AffinityResult};

use crate::duration::parse_duration;

/// Balancing algorithm selected for a backend group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceAlgorithm {
    /// Lowest priority value wins, weighted random among equals
    #[default]
    Priority,
    /// Priority election pinned per client until it goes idle
    StickyPriority,
}

impl BalanceAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::StickyPriority => "sticky-priority",
        }
    }
}

impl fmt::Display for BalanceAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceAlgorithm {
    type Err = AffinityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(Self::Priority),
            "sticky-priority" | "sticky_priority" => Ok(Self::StickyPriority),
            other => Err(AffinityError::config(format!(
                "Unknown balance algorithm '{}'. Valid algorithms are: priority, sticky-priority",
                other
            ))),
        }
    }
}

/// Balance configuration for one backend group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BalanceConfig {
    /// Balancing algorithm
    #[serde(default)]
    pub algorithm: BalanceAlgorithm,

    /// Idle period after which a sticky binding is dropped (e.g. "5m")
    #[serde(default)]
    #[validate(custom(function = "validate_duration_text"))]
    pub sticky_priority_session_idle_expiry: Option<String>,
}

#[allow(clippy::ptr_arg)]
fn validate_duration_text(text: &String) -> Result<(), ValidationError> {
    parse_duration(text).map(|_| ()).map_err(|e| {
        let mut err = ValidationError::new("duration");
        err.message = Some(e.to_string().into());
        err
    })
}

impl BalanceConfig {
    /// Configuration for the sticky priority strategy
    pub fn sticky_priority(idle_expiry: impl Into<String>) -> Self {
        Self {
            algorithm: BalanceAlgorithm::StickyPriority,
            sticky_priority_session_idle_expiry: Some(idle_expiry.into()),
        }
    }

    /// Run field validation plus the cross-field rules of the chosen algorithm
    pub fn check(&self) -> AffinityResult<()> {
        self.validate().map_err(|e| {
            AffinityError::config_with_source("invalid balance configuration", e)
        })?;

        if self.algorithm == BalanceAlgorithm::StickyPriority
            && self.sticky_priority_session_idle_expiry.is_none()
        {
            return Err(AffinityError::config(
                "sticky-priority balancing requires 'sticky-priority-session-idle-expiry'",
            ));
        }
        Ok(())
    }

    /// Parsed sticky session idle expiry, if configured
    pub fn session_idle_expiry(&self) -> AffinityResult<Option<Duration>> {
        self.sticky_priority_session_idle_expiry
            .as_deref()
            .map(|text| {
                parse_duration(text).map_err(|e| {
                    AffinityError::config_with_source(
                        format!("invalid sticky-priority-session-idle-expiry '{}'", text),
                        e,
                    )
                })
            })
            .transpose()
    }
}
