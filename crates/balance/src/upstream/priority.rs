//! Priority load balancer
//!
//! Only backends sharing the lowest `priority` value are eligible; one of them
//! is picked by weighted random selection. Higher priority values act as
//! standby capacity that is used only when the preferred tier is absent from
//! the candidate list.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{trace, warn};

use super::Elector;
use crate::types::{AffinityError, AffinityResult, Backend, ClientContext};

/// Priority election with weighted random tie-breaking
pub struct PriorityBalancer {
    rng: Mutex<StdRng>,
}

impl PriorityBalancer {
    /// Create a balancer seeded from the thread RNG
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_rng(&mut rand::rng())),
        }
    }

    /// Create a balancer with a fixed seed, for reproducible selection
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Pick the index of the elected backend
    fn select_index(&self, backends: &[Arc<Backend>]) -> AffinityResult<usize> {
        let top_priority = backends
            .iter()
            .map(|b| b.priority)
            .min()
            .ok_or(AffinityError::EmptyBackendSet)?;

        let tier: Vec<usize> = backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.priority == top_priority && b.weight > 0)
            .map(|(i, _)| i)
            .collect();

        let total_weight: u64 = tier.iter().map(|&i| backends[i].weight as u64).sum();
        if total_weight == 0 {
            warn!(
                candidates = backends.len(),
                priority = top_priority,
                "All backends in the preferred priority tier have zero weight"
            );
            return Err(AffinityError::NoElectableBackend {
                candidates: backends.len(),
            });
        }

        let threshold = self.rng.lock().random_range(0..total_weight);
        let mut cumulative = 0u64;
        for &idx in &tier {
            cumulative += backends[idx].weight as u64;
            if cumulative > threshold {
                trace!(
                    target_index = idx,
                    priority = top_priority,
                    threshold = threshold,
                    "Selected target via weighted random"
                );
                return Ok(idx);
            }
        }

        // Unreachable while threshold < total_weight; keep the last tier member
        Ok(tier[tier.len() - 1])
    }
}

impl Default for PriorityBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Elector for PriorityBalancer {
    async fn elect(
        &self,
        context: &ClientContext,
        backends: &[Arc<Backend>],
    ) -> AffinityResult<Arc<Backend>> {
        trace!(
            client = %context.client_addr,
            total_targets = backends.len(),
            algorithm = "priority",
            "Selecting upstream target"
        );

        if backends.is_empty() {
            warn!(
                client = %context.client_addr,
                algorithm = "priority",
                "Can't elect backend, backend set is empty"
            );
            return Err(AffinityError::EmptyBackendSet);
        }

        let index = self.select_index(backends)?;
        Ok(Arc::clone(&backends[index]))
    }

    fn name(&self) -> &'static str {
        "priority"
    }
}
