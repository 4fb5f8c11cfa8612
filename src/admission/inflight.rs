//! In-flight request coalescing.
//!
//! [`InFlightRegistry`] indexes pending backend invocations by fingerprint.
//! The first caller for a fingerprint becomes the *leader* and receives a
//! [`FlightHandle`]; everyone else arriving before the handle settles
//! becomes a *follower* holding a receiver on the same handle. The leader's
//! settle resolves every waiter with one shared outcome — first-writer-
//! resolves, whether that outcome is a value, a backend failure, or a quota
//! denial. The handle is removed from the index once settled.
//!
//! A waiter that times out abandons only its own wait; the detached
//! invocation task keeps running and later waiters (and the cache) still
//! benefit from its result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::Fingerprint;

/// The one shared resolution of an in-flight fingerprint.
///
/// Cloneable so a single settle can fan out to every waiter.
#[derive(Debug, Clone)]
pub(crate) enum FlightOutcome {
    Value(Arc<Value>),
    QuotaDenied { retry_after: Duration },
    CostExceedsCapacity { cost: f64, capacity: f64 },
    Backend(String),
    BackendTimeout { elapsed: Duration },
}

type OutcomeReceiver = watch::Receiver<Option<FlightOutcome>>;

/// Position of a caller relative to an in-flight invocation.
pub(crate) enum Flight {
    /// First caller for this fingerprint; responsible for settling.
    Leader(FlightHandle),
    /// A backend call is already pending; wait for its outcome.
    Follower(OutcomeReceiver),
}

/// Index of pending invocations by fingerprint.
pub(crate) struct InFlightRegistry {
    flights: Mutex<HashMap<Fingerprint, OutcomeReceiver>>,
}

impl InFlightRegistry {
    pub(crate) fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Attach to the pending flight for `fingerprint`, or lead a new one.
    pub(crate) fn join_or_lead(self: &Arc<Self>, fingerprint: &Fingerprint) -> Flight {
        let mut flights = self.lock();
        if let Some(rx) = flights.get(fingerprint) {
            debug!(%fingerprint, "coalescing onto in-flight invocation");
            return Flight::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        flights.insert(fingerprint.clone(), rx.clone());
        Flight::Leader(FlightHandle {
            registry: Arc::clone(self),
            fingerprint: fingerprint.clone(),
            tx,
            rx,
            settled: false,
        })
    }

    /// Number of fingerprints currently in flight.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, fingerprint: &Fingerprint) {
        self.lock().remove(fingerprint);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, OutcomeReceiver>> {
        // Poisoning can only happen if a holder panicked between two map
        // operations; the map itself stays coherent.
        self.flights.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Leader-side handle for one pending fingerprint.
///
/// Dropping an unsettled handle settles it with a backend failure so no
/// follower waits out its full timeout on an abandoned flight.
pub(crate) struct FlightHandle {
    registry: Arc<InFlightRegistry>,
    fingerprint: Fingerprint,
    tx: watch::Sender<Option<FlightOutcome>>,
    rx: OutcomeReceiver,
    settled: bool,
}

impl FlightHandle {
    /// Receiver for the leader's own wait on the shared outcome.
    pub(crate) fn subscribe(&self) -> OutcomeReceiver {
        self.rx.clone()
    }

    /// Resolve every waiter with `outcome` and retire the handle.
    ///
    /// Publishes before removing the index entry, so a caller that joined
    /// a moment ago still observes the outcome; a caller arriving after
    /// removal leads a fresh flight and re-checks the cache first.
    pub(crate) fn settle(mut self, outcome: FlightOutcome) {
        self.settled = true;
        let _ = self.tx.send(Some(outcome));
        self.registry.remove(&self.fingerprint);
    }
}

impl Drop for FlightHandle {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self.tx.send(Some(FlightOutcome::Backend(
                "invocation abandoned before completion".to_string(),
            )));
            self.registry.remove(&self.fingerprint);
        }
    }
}

/// Wait for a flight to settle, bounded by `wait_timeout`.
///
/// Returns `None` on timeout — the caller gives up, the flight does not.
pub(crate) async fn await_outcome(
    mut rx: OutcomeReceiver,
    wait_timeout: Duration,
) -> Option<FlightOutcome> {
    tokio::time::timeout(wait_timeout, async move {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender gone without a settle; Drop normally prevents
                // this, so treat it as an abandoned invocation.
                return FlightOutcome::Backend("invocation abandoned before completion".to_string());
            }
        }
    })
    .await
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelVersion;
    use serde_json::json;

    fn fp(n: u64) -> Fingerprint {
        Fingerprint::compute("predict", &ModelVersion::new("v1"), &json!({ "n": n }))
    }

    #[tokio::test]
    async fn first_caller_leads_second_follows() {
        let registry = Arc::new(InFlightRegistry::new());
        let Flight::Leader(handle) = registry.join_or_lead(&fp(1)) else {
            panic!("first caller should lead");
        };
        assert!(matches!(registry.join_or_lead(&fp(1)), Flight::Follower(_)));
        // A different fingerprint gets its own flight
        assert!(matches!(registry.join_or_lead(&fp(2)), Flight::Leader(_)));
        drop(handle);
    }

    #[tokio::test]
    async fn settle_resolves_all_waiters_identically() {
        let registry = Arc::new(InFlightRegistry::new());
        let Flight::Leader(handle) = registry.join_or_lead(&fp(1)) else {
            panic!("expected leader");
        };
        let Flight::Follower(rx_a) = registry.join_or_lead(&fp(1)) else {
            panic!("expected follower");
        };
        let Flight::Follower(rx_b) = registry.join_or_lead(&fp(1)) else {
            panic!("expected follower");
        };

        let value = Arc::new(json!({"label": "cat"}));
        handle.settle(FlightOutcome::Value(Arc::clone(&value)));

        for rx in [rx_a, rx_b] {
            match await_outcome(rx, Duration::from_secs(1)).await {
                Some(FlightOutcome::Value(v)) => assert_eq!(v, value),
                other => panic!("expected shared value, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn settle_removes_the_handle() {
        let registry = Arc::new(InFlightRegistry::new());
        let Flight::Leader(handle) = registry.join_or_lead(&fp(1)) else {
            panic!("expected leader");
        };
        assert_eq!(registry.len(), 1);
        handle.settle(FlightOutcome::Backend("boom".to_string()));
        assert_eq!(registry.len(), 0);
        // Next caller for the fingerprint leads a fresh flight
        assert!(matches!(registry.join_or_lead(&fp(1)), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn dropped_handle_settles_waiters_with_failure() {
        let registry = Arc::new(InFlightRegistry::new());
        let Flight::Leader(handle) = registry.join_or_lead(&fp(1)) else {
            panic!("expected leader");
        };
        let Flight::Follower(rx) = registry.join_or_lead(&fp(1)) else {
            panic!("expected follower");
        };
        drop(handle);
        assert_eq!(registry.len(), 0);
        assert!(matches!(
            await_outcome(rx, Duration::from_secs(1)).await,
            Some(FlightOutcome::Backend(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_timeout_returns_none() {
        let registry = Arc::new(InFlightRegistry::new());
        let Flight::Leader(handle) = registry.join_or_lead(&fp(1)) else {
            panic!("expected leader");
        };
        let Flight::Follower(rx) = registry.join_or_lead(&fp(1)) else {
            panic!("expected follower");
        };
        let outcome = await_outcome(rx, Duration::from_millis(50)).await;
        assert!(outcome.is_none());
        // The flight itself is still pending
        assert_eq!(registry.len(), 1);
        drop(handle);
    }
}
