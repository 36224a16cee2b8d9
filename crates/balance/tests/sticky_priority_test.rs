//! Integration tests for sticky priority balancing
//!
//! Timing tests run on tokio's paused clock, so the idle expiry plays out on
//! virtual time and the assertions at each instant are deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use affinity_balance::{
    create_elector, AffinityError, AffinityResult, Backend, ClientContext, Elector,
    PriorityBalancer, StickyPriorityBalancer, StickyPriorityRuntimeConfig,
};
use affinity_common::ids::ClientKey;
use affinity_config::BalanceConfig;

const IDLE: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

/// Elects the first candidate and counts how often it was asked
struct FirstBalancer {
    calls: AtomicUsize,
}

impl FirstBalancer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Elector for FirstBalancer {
    async fn elect(
        &self,
        _context: &ClientContext,
        backends: &[Arc<Backend>],
    ) -> AffinityResult<Arc<Backend>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        backends.first().cloned().ok_or(AffinityError::EmptyBackendSet)
    }

    fn name(&self) -> &'static str {
        "first"
    }
}

/// Hands out candidates in turn and yields first, so concurrent callers
/// interleave inside the election
struct RotatingBalancer {
    next: AtomicUsize,
}

#[async_trait]
impl Elector for RotatingBalancer {
    async fn elect(
        &self,
        _context: &ClientContext,
        backends: &[Arc<Backend>],
    ) -> AffinityResult<Arc<Backend>> {
        tokio::task::yield_now().await;
        let index = self.next.fetch_add(1, Ordering::SeqCst) % backends.len();
        Ok(Arc::clone(&backends[index]))
    }

    fn name(&self) -> &'static str {
        "rotating"
    }
}

fn backend(host: &str) -> Arc<Backend> {
    Arc::new(Backend::new(host, 8080, 1, 1))
}

fn client_k() -> ClientContext {
    ClientContext::new("198.51.100.20:50000".parse().unwrap())
}

fn key_k() -> ClientKey {
    client_k().key()
}

fn sticky(fallback: Arc<FirstBalancer>) -> StickyPriorityBalancer {
    StickyPriorityBalancer::new(StickyPriorityRuntimeConfig::new(IDLE), fallback)
}

/// Sleep until `offset` after `start` on the paused clock
async fn at(start: Instant, offset: Duration) {
    tokio::time::sleep_until(start + offset).await;
}

// ============================================================================
// Affinity and Expiry
// ============================================================================

mod expiry_scenarios {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_expires_then_reelects() {
        let fallback = FirstBalancer::new();
        let balancer = sticky(Arc::clone(&fallback));
        let b1 = backend("10.0.0.1");
        let b2 = backend("10.0.0.2");
        let backends = vec![Arc::clone(&b1), Arc::clone(&b2)];
        let start = Instant::now();

        // t=0: first contact
        let chosen = balancer.elect(&client_k(), &backends).await.unwrap();
        assert!(Arc::ptr_eq(&chosen, &b1));
        let created = balancer.session(&key_k()).unwrap();
        assert_eq!(created.last_touch, start);

        // t=2: same list, same backend, touch advances
        at(start, Duration::from_secs(2)).await;
        let chosen = balancer.elect(&client_k(), &backends).await.unwrap();
        assert!(Arc::ptr_eq(&chosen, &b1));
        let touched = balancer.session(&key_k()).unwrap();
        assert_eq!(touched.id, created.id);
        assert_eq!(touched.last_touch, start + Duration::from_secs(2));
        assert_eq!(fallback.calls(), 1);

        // t=6.9: the check at t=5 only rescheduled
        at(start, Duration::from_millis(6_900)).await;
        assert_eq!(balancer.session_count(), 1);

        // t=7.1: five seconds after the last touch the session is gone
        at(start, Duration::from_millis(7_100)).await;
        assert_eq!(balancer.session_count(), 0);

        // t=8: treated as first contact
        at(start, Duration::from_secs(8)).await;
        let chosen = balancer.elect(&client_k(), &backends).await.unwrap();
        assert!(Arc::ptr_eq(&chosen, &b1));
        assert_eq!(fallback.calls(), 2);

        let recreated = balancer.session(&key_k()).unwrap();
        assert_ne!(recreated.id, created.id);

        let stats = balancer.stats();
        assert_eq!(stats.sessions_created, 2);
        assert_eq!(stats.sessions_expired, 1);
        assert_eq!(stats.expiry_reschedules, 1);
        assert_eq!(stats.session_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continued_activity_never_evicts() {
        let fallback = FirstBalancer::new();
        let balancer = sticky(Arc::clone(&fallback));
        let backends = vec![backend("10.0.0.1"), backend("10.0.0.2")];
        let start = Instant::now();

        balancer.elect(&client_k(), &backends).await.unwrap();
        let original = balancer.session(&key_k()).unwrap().id;

        for step in 1..=15u64 {
            at(start, Duration::from_secs(4 * step)).await;
            balancer.elect(&client_k(), &backends).await.unwrap();
            assert_eq!(balancer.session(&key_k()).unwrap().id, original);
        }

        assert_eq!(fallback.calls(), 1);
        let stats = balancer.stats();
        assert_eq!(stats.sessions_expired, 0);
        assert!(stats.expiry_reschedules >= 10, "stats: {:?}", stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_reelects_even_if_backend_present() {
        struct LastBalancer;

        #[async_trait]
        impl Elector for LastBalancer {
            async fn elect(
                &self,
                _context: &ClientContext,
                backends: &[Arc<Backend>],
            ) -> AffinityResult<Arc<Backend>> {
                backends.last().cloned().ok_or(AffinityError::EmptyBackendSet)
            }

            fn name(&self) -> &'static str {
                "last"
            }
        }

        let balancer = StickyPriorityBalancer::new(
            StickyPriorityRuntimeConfig::new(IDLE),
            Arc::new(LastBalancer),
        );
        let b1 = backend("10.0.0.1");
        let b2 = backend("10.0.0.2");
        let start = Instant::now();

        // Bound to b1 while it was the only candidate
        balancer.elect(&client_k(), &[Arc::clone(&b1)]).await.unwrap();

        // Within the idle period b1 sticks even though the delegate prefers b2
        at(start, Duration::from_secs(1)).await;
        let chosen = balancer
            .elect(&client_k(), &[Arc::clone(&b1), Arc::clone(&b2)])
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&chosen, &b1));

        // After expiry the delegate decides again
        at(start, Duration::from_millis(6_100)).await;
        assert_eq!(balancer.session_count(), 0);
        let chosen = balancer
            .elect(&client_k(), &[Arc::clone(&b1), Arc::clone(&b2)])
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&chosen, &b2));
    }
}

// ============================================================================
// Draining
// ============================================================================

mod drain_scenarios {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_draining_backend_stops_extending_session() {
        let fallback = FirstBalancer::new();
        let balancer = sticky(Arc::clone(&fallback));
        let b1 = backend("10.0.0.1");
        let backends = vec![Arc::clone(&b1), backend("10.0.0.2")];
        let start = Instant::now();

        balancer.elect(&client_k(), &backends).await.unwrap();

        // t=2: last regular touch
        at(start, Duration::from_secs(2)).await;
        balancer.elect(&client_k(), &backends).await.unwrap();
        let last_regular_touch = balancer.session(&key_k()).unwrap().last_touch;

        at(start, Duration::from_secs(3)).await;
        b1.set_draining(true);

        // t=4 and t=6: still served by b1, but the touch stays at t=2
        for secs in [4, 6] {
            at(start, Duration::from_secs(secs)).await;
            let chosen = balancer.elect(&client_k(), &backends).await.unwrap();
            assert!(Arc::ptr_eq(&chosen, &b1));
            assert_eq!(
                balancer.session(&key_k()).unwrap().last_touch,
                last_regular_touch
            );
        }

        // t=7.1: five seconds after the last regular touch
        at(start, Duration::from_millis(7_100)).await;
        assert_eq!(balancer.session_count(), 0);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_client_expires_despite_connecting() {
        let fallback = FirstBalancer::new();
        let balancer = sticky(Arc::clone(&fallback));
        let b1 = backend("10.0.0.1");
        let backends = vec![Arc::clone(&b1), backend("10.0.0.2")];
        let start = Instant::now();

        balancer.elect(&client_k(), &backends).await.unwrap();
        let first = balancer.session(&key_k()).unwrap();

        at(start, Duration::from_secs(1)).await;
        b1.set_draining(true);

        for secs in [2, 4] {
            at(start, Duration::from_secs(secs)).await;
            let chosen = balancer.elect(&client_k(), &backends).await.unwrap();
            assert!(Arc::ptr_eq(&chosen, &b1));
        }
        assert_eq!(balancer.session(&key_k()).unwrap().last_touch, start);

        at(start, Duration::from_millis(5_100)).await;
        assert_eq!(balancer.session_count(), 0);

        // t=6: the client comes back and goes through election again
        at(start, Duration::from_secs(6)).await;
        balancer.elect(&client_k(), &backends).await.unwrap();
        assert_eq!(fallback.calls(), 2);
        assert_ne!(balancer.session(&key_k()).unwrap().id, first.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_backend_object_carries_drain_state() {
        let fallback = FirstBalancer::new();
        let balancer = sticky(Arc::clone(&fallback));
        let start = Instant::now();

        balancer
            .elect(&client_k(), &[backend("10.0.0.1")])
            .await
            .unwrap();

        // The control plane publishes a new object for the same address
        at(start, Duration::from_secs(2)).await;
        let refreshed = Arc::new(Backend::new("10.0.0.1", 8080, 1, 1).with_draining(true));
        let chosen = balancer
            .elect(&client_k(), &[Arc::clone(&refreshed)])
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&chosen, &refreshed));
        let session = balancer.session(&key_k()).unwrap();
        assert!(Arc::ptr_eq(&session.backend, &refreshed));
        assert_eq!(session.last_touch, start);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_rebind_touches_regardless_of_drain() {
        let fallback = FirstBalancer::new();
        let balancer = sticky(Arc::clone(&fallback));
        let start = Instant::now();

        balancer
            .elect(&client_k(), &[backend("10.0.0.1")])
            .await
            .unwrap();

        // b1 disappears; the only candidate is already draining
        at(start, Duration::from_secs(4)).await;
        let draining = Arc::new(Backend::new("10.0.0.2", 8080, 1, 1).with_draining(true));
        let chosen = balancer
            .elect(&client_k(), &[Arc::clone(&draining)])
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&chosen, &draining));
        assert_eq!(
            balancer.session(&key_k()).unwrap().last_touch,
            start + Duration::from_secs(4)
        );

        // Survives past the original deadline because the rebind touched it
        at(start, Duration::from_millis(8_900)).await;
        assert_eq!(balancer.session_count(), 1);

        at(start, Duration::from_millis(9_100)).await;
        assert_eq!(balancer.session_count(), 0);
        assert_eq!(balancer.stats().forced_rebinds, 1);
    }
}

// ============================================================================
// Concurrency
// ============================================================================

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_contact_creates_one_session() {
        let balancer = Arc::new(StickyPriorityBalancer::new(
            StickyPriorityRuntimeConfig::new(Duration::from_secs(60)),
            Arc::new(RotatingBalancer {
                next: AtomicUsize::new(0),
            }),
        ));
        let backends: Arc<Vec<Arc<Backend>>> = Arc::new(
            (1..=4)
                .map(|i| backend(&format!("10.0.0.{}", i)))
                .collect(),
        );

        let mut handles = Vec::new();
        for port in 0..64u16 {
            let balancer = Arc::clone(&balancer);
            let backends = Arc::clone(&backends);
            handles.push(tokio::spawn(async move {
                let addr = format!("198.51.100.20:{}", 40000 + port);
                let context = ClientContext::new(addr.parse().unwrap());
                balancer.elect(&context, &backends).await.unwrap()
            }));
        }

        let mut chosen = Vec::new();
        for handle in handles {
            chosen.push(handle.await.unwrap().address());
        }

        assert_eq!(balancer.session_count(), 1);
        assert_eq!(balancer.stats().sessions_created, 1);

        // Every caller ends up on the binding that won the insert
        let bound = balancer.session(&key_k()).unwrap().backend.address();
        assert!(chosen.iter().all(|address| *address == bound), "chosen: {:?}", chosen);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients_get_one_session_each() {
        let balancer = Arc::new(StickyPriorityBalancer::new(
            StickyPriorityRuntimeConfig::new(Duration::from_secs(60)),
            Arc::new(PriorityBalancer::with_seed(11)),
        ));
        let backends: Arc<Vec<Arc<Backend>>> = Arc::new(
            (1..=3)
                .map(|i| backend(&format!("10.0.1.{}", i)))
                .collect(),
        );

        let mut handles = Vec::new();
        for client in 0..50u8 {
            for attempt in 0..8u16 {
                let balancer = Arc::clone(&balancer);
                let backends = Arc::clone(&backends);
                handles.push(tokio::spawn(async move {
                    let addr = format!("203.0.113.{}:{}", client, 30000 + attempt);
                    let context = ClientContext::new(addr.parse().unwrap());
                    let chosen = balancer.elect(&context, &backends).await.unwrap();
                    (context.key(), chosen.address())
                }));
            }
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(balancer.session_count(), 50);
        assert_eq!(balancer.stats().sessions_created, 50);
        for (key, address) in results {
            let session = balancer.session(&key).unwrap();
            assert_eq!(session.backend.address(), address);
        }
    }
}

// ============================================================================
// Construction from Configuration
// ============================================================================

mod configuration {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elector_from_kdl_config() {
        let config = BalanceConfig::from_kdl(
            r#"
            balance {
                algorithm "sticky-priority"
                sticky-priority-session-idle-expiry "2s"
            }
            "#,
        )
        .unwrap();
        let elector = create_elector(&config).unwrap();
        assert_eq!(elector.name(), "sticky_priority");

        let primary = Arc::new(Backend::new("10.0.0.1", 8080, 1, 10));
        let standby = Arc::new(Backend::new("10.0.0.2", 8080, 5, 10));
        let backends = vec![Arc::clone(&standby), Arc::clone(&primary)];

        let chosen = elector.elect(&client_k(), &backends).await.unwrap();
        assert!(Arc::ptr_eq(&chosen, &primary));

        // Primary leaves; the client is moved to standby and stays there
        let only_standby = vec![Arc::clone(&standby)];
        let chosen = elector.elect(&client_k(), &only_standby).await.unwrap();
        assert!(Arc::ptr_eq(&chosen, &standby));

        let chosen = elector.elect(&client_k(), &backends).await.unwrap();
        assert!(Arc::ptr_eq(&chosen, &standby));

        // Once idle, priority applies again
        sleep(Duration::from_millis(2_100)).await;
        let chosen = elector.elect(&client_k(), &backends).await.unwrap();
        assert!(Arc::ptr_eq(&chosen, &primary));
    }

    #[tokio::test]
    async fn test_empty_backend_set_from_config_built_elector() {
        let elector = create_elector(&BalanceConfig::sticky_priority("5s")).unwrap();
        let result = elector.elect(&client_k(), &[]).await;
        assert!(matches!(result, Err(AffinityError::EmptyBackendSet)));
    }

    #[test]
    fn test_bad_idle_expiry_fails_at_startup() {
        let result = BalanceConfig::from_kdl(
            r#"
            balance {
                algorithm "sticky-priority"
                sticky-priority-session-idle-expiry "-5s"
            }
            "#,
        );
        assert!(matches!(result, Err(AffinityError::Config { .. })));
    }
}
