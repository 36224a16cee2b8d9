//! Backend and client types shared by every balancing strategy

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use affinity_common::ids::ClientKey;

// Re-export common error types
pub use affinity_common::errors::{AffinityError, AffinityResult};

/// A backend server as seen by the balancers
///
/// Identity is the `host:port` address. The same address may show up as a
/// fresh `Backend` object in a later candidate list, carrying updated state.
#[derive(Debug)]
pub struct Backend {
    /// Target IP address or hostname
    pub host: String,
    /// Target port
    pub port: u16,
    /// Election priority, lower values are preferred
    pub priority: u32,
    /// Weight for weighted selection among equal priorities
    pub weight: u32,
    /// Set by the control plane when the backend should shed sticky clients
    draining: AtomicBool,
}

impl Backend {
    /// Create a new backend
    pub fn new(host: impl Into<String>, port: u16, priority: u32, weight: u32) -> Self {
        Self {
            host: host.into(),
            port,
            priority,
            weight,
            draining: AtomicBool::new(false),
        }
    }

    /// Builder-style drain flag, for backends discovered already draining
    pub fn with_draining(self, draining: bool) -> Self {
        self.set_draining(draining);
        self
    }

    /// Get the full address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether two backends refer to the same server
    pub fn same_address(&self, other: &Backend) -> bool {
        self.port == other.port && self.host == other.host
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Release);
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-connection context handed to an elector
#[derive(Debug, Clone, Copy)]
pub struct ClientContext {
    pub client_addr: SocketAddr,
}

impl ClientContext {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self { client_addr }
    }

    /// Sticky table key for this client; the source port is not part of it
    pub fn key(&self) -> ClientKey {
        ClientKey::from_ip(self.client_addr.ip())
    }
}
