//! Error types for the affinity balancer
//!
//! A single error enum is shared by every balancing strategy so that a
//! strategy can hand a delegate's error back to its caller untouched.

use thiserror::Error;

/// Main error type for balancer operations
#[derive(Error, Debug)]
pub enum AffinityError {
    /// The candidate backend list handed to an elector was empty
    #[error("Can't elect backend, backend set is empty")]
    EmptyBackendSet,

    /// Candidates were supplied but none of them can receive traffic
    #[error("No electable backend among {candidates} candidates")]
    NoElectableBackend { candidates: usize },

    /// Configuration errors, raised at startup
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Parsing errors (durations, KDL documents)
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        input: Option<String>,
    },
}

/// Result type alias for balancer operations
pub type AffinityResult<T> = Result<T, AffinityError>;

impl AffinityError {
    /// Create a configuration error without an underlying source
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error wrapping another error
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a parse error, remembering the offending input
    pub fn parse(message: impl Into<String>, input: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            input: Some(input.into()),
        }
    }

    /// Whether the caller should try another strategy or reject the connection
    ///
    /// Configuration and parse errors happen before any traffic is served,
    /// so only the election failures are meaningful at request time.
    pub fn is_election_failure(&self) -> bool {
        matches!(
            self,
            Self::EmptyBackendSet | Self::NoElectableBackend { .. }
        )
    }
}
