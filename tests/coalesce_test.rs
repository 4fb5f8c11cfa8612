//! Tests for in-flight request coalescing: K concurrent callers sharing a
//! fingerprint produce exactly one backend invocation and identical
//! outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use garmr::config::{EndpointConfig, GarmrConfig};
use garmr::{
    AdmissionController, BackendInvoker, CacheStatus, Garmr, GarmrError, Identity,
    IdentityResolver, Result, Tier,
};

// ============================================================================
// Mock collaborators
// ============================================================================

struct StaticResolver;

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, credentials: &str) -> Result<Identity> {
        Ok(Identity::new(credentials, Tier::Free))
    }
}

/// Backend with a fixed latency and an invocation counter.
struct SlowBackend {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl BackendInvoker for SlowBackend {
    async fn invoke(&self, _endpoint: &str, input: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(GarmrError::Backend("inference worker crashed".to_string()));
        }
        Ok(json!({ "echo": input }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn controller(delay: Duration, fail: bool, calls: Arc<AtomicUsize>) -> Arc<AdmissionController> {
    let mut config = GarmrConfig::default();
    config.endpoints.insert(
        "predict".to_string(),
        EndpointConfig {
            model: "model-a".to_string(),
            cost: 1.0,
            cache_ttl_secs: 300,
            cacheable: true,
        },
    );
    let controller = Garmr::builder()
        .config(config)
        .resolver(StaticResolver)
        .backend(SlowBackend { calls, delay, fail })
        .model_version("model-a", "v3")
        .build()
        .expect("controller builds");
    Arc::new(controller)
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn two_requests_five_ms_apart_share_one_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = controller(Duration::from_millis(200), false, Arc::clone(&calls));

    let input = json!({"x": 1});
    let first = {
        let controller = Arc::clone(&controller);
        let input = input.clone();
        tokio::spawn(async move { controller.admit("alice", "predict", &input).await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = {
        let controller = Arc::clone(&controller);
        let input = input.clone();
        tokio::spawn(async move { controller.admit("bob", "predict", &input).await })
    };

    let first = first.await.unwrap().expect("leader admitted");
    let second = second.await.unwrap().expect("follower resolved");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*first.value, *second.value);
    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(second.cache_status, CacheStatus::Miss);
}

#[tokio::test(start_paused = true)]
async fn k_concurrent_requests_one_invocation_identical_results() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = controller(Duration::from_millis(200), false, Arc::clone(&calls));

    let mut handles = Vec::new();
    for i in 0..16 {
        let controller = Arc::clone(&controller);
        handles.push(tokio::spawn(async move {
            controller
                .admit(&format!("caller-{i}"), "predict", &json!({"x": 1}))
                .await
        }));
    }

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap().expect("resolved").value);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for value in &values[1..] {
        assert_eq!(**value, *values[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn coalescing_consumes_quota_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = controller(Duration::from_millis(200), false, Arc::clone(&calls));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let controller = Arc::clone(&controller);
        handles.push(tokio::spawn(async move {
            controller.admit("alice", "predict", &json!({"x": 1})).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("resolved");
    }

    // One leader debit; seven followers attached for free. Refill for the
    // 200ms of backend latency trickles back, so bound rather than pin.
    let quota = controller
        .ledger()
        .snapshot(&Identity::new("alice", Tier::Free))
        .await;
    assert!(quota.remaining >= 9.0 - 1e-6 && quota.remaining < 9.5);
}

#[tokio::test(start_paused = true)]
async fn different_fingerprints_do_not_coalesce() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = controller(Duration::from_millis(200), false, Arc::clone(&calls));

    let mut handles = Vec::new();
    for i in 0..4 {
        let controller = Arc::clone(&controller);
        handles.push(tokio::spawn(async move {
            controller.admit("alice", "predict", &json!({"x": i})).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().expect("resolved");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn shared_failure_resolves_all_waiters_identically() {
    let calls = Arc::new(AtomicUsize::new(0));
    let controller = controller(Duration::from_millis(200), true, Arc::clone(&calls));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let controller = Arc::clone(&controller);
        handles.push(tokio::spawn(async move {
            controller.admit("alice", "predict", &json!({"x": 1})).await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().expect_err("shared failure");
        assert_eq!(err.reason(), "backend_error");
        assert!(err.to_string().contains("inference worker crashed"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn quota_denial_settles_waiters_without_spending_more() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = GarmrConfig::default();
    config.endpoints.insert(
        "predict".to_string(),
        EndpointConfig {
            model: "model-a".to_string(),
            cost: 1.0,
            cache_ttl_secs: 300,
            cacheable: true,
        },
    );
    // Near-zero refill so the 200ms backend sleeps during draining don't
    // trickle tokens back
    config.tiers.free.refill_per_sec = 0.001;
    let controller = Arc::new(
        Garmr::builder()
            .config(config)
            .resolver(StaticResolver)
            .backend(SlowBackend {
                calls: Arc::clone(&calls),
                delay: Duration::from_millis(200),
                fail: false,
            })
            .model_version("model-a", "v3")
            .build()
            .unwrap(),
    );

    // Drain alice with distinct inputs
    for i in 0..10 {
        controller
            .admit("alice", "predict", &json!({"drain": i}))
            .await
            .expect("within quota");
    }

    // Concurrent duplicates over quota: the leader's denial is shared
    let mut handles = Vec::new();
    for _ in 0..4 {
        let controller = Arc::clone(&controller);
        handles.push(tokio::spawn(async move {
            controller
                .admit("alice", "predict", &json!({"x": 99}))
                .await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().expect_err("denied");
        assert_eq!(err.reason(), "quota_exceeded");
    }
    // The denial itself did not reach the backend
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

// ============================================================================
// Caller timeout vs shared invocation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn caller_timeout_does_not_cancel_the_shared_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = GarmrConfig::default();
    config.endpoints.insert(
        "predict".to_string(),
        EndpointConfig {
            model: "model-a".to_string(),
            cost: 1.0,
            cache_ttl_secs: 300,
            cacheable: true,
        },
    );
    // Caller gives up after 1s; the backend needs 5s but stays under its
    // own 60s deadline
    config.limits.wait_timeout_secs = 1;
    config.limits.backend_timeout_secs = 60;
    let controller = Garmr::builder()
        .config(config)
        .resolver(StaticResolver)
        .backend(SlowBackend {
            calls: Arc::clone(&calls),
            delay: Duration::from_secs(5),
            fail: false,
        })
        .model_version("model-a", "v3")
        .build()
        .unwrap();

    let err = controller
        .admit("alice", "predict", &json!({"x": 1}))
        .await
        .expect_err("caller wait expired");
    assert!(matches!(err, GarmrError::BackendTimeout { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Let the detached invocation finish and publish to the cache
    tokio::time::sleep(Duration::from_secs(10)).await;

    let late = controller
        .admit("alice", "predict", &json!({"x": 1}))
        .await
        .expect("served from the completed invocation");
    assert_eq!(late.cache_status, CacheStatus::Hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "backend ran exactly once");
}
