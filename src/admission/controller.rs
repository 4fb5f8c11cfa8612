//! Request admission orchestration.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use super::inflight::{Flight, FlightHandle, FlightOutcome, InFlightRegistry, await_outcome};
use crate::bus::InvalidationBus;
use crate::cache::{Fingerprint, Lookup, PredictionCache};
use crate::config::{EndpointConfig, GarmrConfig};
use crate::quota::{Consumption, QuotaLedger};
use crate::telemetry;
use crate::traits::{BackendInvoker, IdentityResolver};
use crate::types::{Admitted, CacheStatus, Identity, ModelVersion, QuotaInfo};
use crate::{GarmrError, Result};

/// Admission front for a shared inference backend.
///
/// For every request the controller decides, in bounded time, between
/// serving a cached result, admitting the request against the caller's
/// quota and invoking the backend, or rejecting it cheaply. Duplicate
/// concurrent requests coalesce onto a single backend invocation.
///
/// The bucket map and the cache map live behind [`QuotaLedger`] and
/// [`PredictionCache`]; request handling only ever goes through their
/// methods, so invariant enforcement stays centralised. Background tasks
/// (idle-bucket sweeper, invalidation apply) start with the controller and
/// stop at [`shutdown`](AdmissionController::shutdown).
///
/// # Refund policy
///
/// Tokens debited for an admitted request are **not** refunded when the
/// backend fails. A refund would make retries free exactly when the
/// backend is struggling.
pub struct AdmissionController {
    config: GarmrConfig,
    resolver: Arc<dyn IdentityResolver>,
    backend: Arc<dyn BackendInvoker>,
    ledger: Arc<QuotaLedger>,
    cache: Arc<PredictionCache>,
    bus: InvalidationBus,
    inflight: Arc<InFlightRegistry>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AdmissionController {
    pub(crate) fn new(
        config: GarmrConfig,
        resolver: Arc<dyn IdentityResolver>,
        backend: Arc<dyn BackendInvoker>,
    ) -> Self {
        let ledger = Arc::new(QuotaLedger::new(config.tiers.clone(), &config.quota));
        let cache = Arc::new(PredictionCache::new(config.cache.max_entries));
        let bus = InvalidationBus::new();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            ledger.spawn_sweeper(config.quota.sweep_interval(), shutdown_rx.clone()),
            bus.spawn_apply(Arc::clone(&cache), shutdown_rx),
        ];

        Self {
            config,
            resolver,
            backend,
            ledger,
            cache,
            bus,
            inflight: Arc::new(InFlightRegistry::new()),
            shutdown_tx,
            tasks: Mutex::new(tasks),
        }
    }

    /// Decide one request: cached value, fresh backend result, or rejection.
    ///
    /// `input` should be the caller's decoded request body; it is
    /// canonicalized before fingerprinting, so field order is irrelevant.
    pub async fn admit(&self, credentials: &str, endpoint: &str, input: &Value) -> Result<Admitted> {
        let started = Instant::now();
        let result = self.admit_inner(credentials, endpoint, input).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "endpoint" => endpoint.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "endpoint" => endpoint.to_owned(),
        )
        .record(started.elapsed().as_secs_f64());
        result
    }

    /// The invalidation bus; deployment tooling publishes version changes
    /// here.
    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    /// The quota ledger (read access for operational tooling).
    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// The prediction cache (read access for operational tooling).
    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    /// Stop background tasks and wait for them to exit.
    ///
    /// Idempotent. In-flight admissions are unaffected; only the sweeper
    /// and the invalidation apply task stop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn admit_inner(&self, credentials: &str, endpoint: &str, input: &Value) -> Result<Admitted> {
        let identity = self.resolver.resolve(credentials).await?;
        let ep = self
            .config
            .endpoint(endpoint)
            .ok_or_else(|| GarmrError::UnknownEndpoint(endpoint.to_string()))?;

        if !ep.cacheable {
            return self.admit_uncached(&identity, endpoint, ep, input).await;
        }

        let version = self.cache.active_version(&ep.model);
        let fingerprint = Fingerprint::compute(endpoint, &version, input);

        if let Lookup::Hit(value) = self.cache.lookup(endpoint, &fingerprint) {
            let quota = self.charge_hit(&identity, endpoint).await?;
            return Ok(Admitted {
                value,
                cache_status: CacheStatus::Hit,
                quota,
            });
        }

        let wait_timeout = self.config.limits.wait_timeout();
        match self.inflight.join_or_lead(&fingerprint) {
            Flight::Follower(rx) => {
                metrics::counter!(telemetry::COALESCED_WAITERS_TOTAL,
                    "endpoint" => endpoint.to_owned(),
                )
                .increment(1);
                let outcome = await_outcome(rx, wait_timeout).await;
                let quota = self.ledger.snapshot(&identity).await;
                translate(outcome, quota, endpoint, wait_timeout)
            }
            Flight::Leader(handle) => {
                match self.ledger.try_consume(&identity, ep.cost).await {
                    Consumption::Allowed {
                        remaining,
                        reset_after,
                    } => {
                        let rx = handle.subscribe();
                        self.spawn_invocation(handle, endpoint, ep, fingerprint, version, input);
                        let outcome = await_outcome(rx, wait_timeout).await;
                        let quota = QuotaInfo {
                            remaining,
                            reset_after,
                        };
                        translate(outcome, quota, endpoint, wait_timeout)
                    }
                    Consumption::Denied { retry_after } => {
                        // First-writer-resolves applies to denials too:
                        // coalesced waiters share this rejection instead of
                        // each spending quota.
                        handle.settle(FlightOutcome::QuotaDenied { retry_after });
                        Err(GarmrError::QuotaExceeded { retry_after })
                    }
                    Consumption::CostExceedsCapacity { cost, capacity } => {
                        handle.settle(FlightOutcome::CostExceedsCapacity { cost, capacity });
                        Err(GarmrError::CostExceedsCapacity {
                            endpoint: endpoint.to_string(),
                            cost,
                            capacity,
                        })
                    }
                }
            }
        }
    }

    /// Quota handling for a cache hit: bypass the ledger unless the
    /// `quota.hit_cost` extension charges a reduced cost.
    async fn charge_hit(&self, identity: &Identity, endpoint: &str) -> Result<QuotaInfo> {
        let Some(hit_cost) = self.config.quota.hit_cost.filter(|c| *c > 0.0) else {
            return Ok(self.ledger.snapshot(identity).await);
        };
        match self.ledger.try_consume(identity, hit_cost).await {
            Consumption::Allowed {
                remaining,
                reset_after,
            } => Ok(QuotaInfo {
                remaining,
                reset_after,
            }),
            Consumption::Denied { retry_after } => Err(GarmrError::QuotaExceeded { retry_after }),
            Consumption::CostExceedsCapacity { cost, capacity } => {
                Err(GarmrError::CostExceedsCapacity {
                    endpoint: endpoint.to_string(),
                    cost,
                    capacity,
                })
            }
        }
    }

    /// Quota check plus a direct, uncoalesced backend call for endpoints
    /// marked non-cacheable (non-deterministic results must not be shared
    /// between callers).
    async fn admit_uncached(
        &self,
        identity: &Identity,
        endpoint: &str,
        ep: &EndpointConfig,
        input: &Value,
    ) -> Result<Admitted> {
        let (remaining, reset_after) = match self.ledger.try_consume(identity, ep.cost).await {
            Consumption::Allowed {
                remaining,
                reset_after,
            } => (remaining, reset_after),
            Consumption::Denied { retry_after } => {
                return Err(GarmrError::QuotaExceeded { retry_after });
            }
            Consumption::CostExceedsCapacity { cost, capacity } => {
                return Err(GarmrError::CostExceedsCapacity {
                    endpoint: endpoint.to_string(),
                    cost,
                    capacity,
                });
            }
        };

        metrics::counter!(telemetry::BACKEND_INVOCATIONS_TOTAL,
            "endpoint" => endpoint.to_owned(),
        )
        .increment(1);
        let started = Instant::now();
        let backend_timeout = self.config.limits.backend_timeout();
        match tokio::time::timeout(backend_timeout, self.backend.invoke(endpoint, input)).await {
            Ok(Ok(value)) => Ok(Admitted {
                value: Arc::new(value),
                cache_status: CacheStatus::Miss,
                quota: QuotaInfo {
                    remaining,
                    reset_after,
                },
            }),
            Ok(Err(e)) => {
                metrics::counter!(telemetry::BACKEND_ERRORS_TOTAL,
                    "endpoint" => endpoint.to_owned(),
                )
                .increment(1);
                warn!(endpoint, error = %e, "backend invocation failed");
                Err(backend_failure(e))
            }
            Err(_) => {
                metrics::counter!(telemetry::BACKEND_ERRORS_TOTAL,
                    "endpoint" => endpoint.to_owned(),
                )
                .increment(1);
                warn!(endpoint, "backend invocation timed out");
                Err(GarmrError::BackendTimeout {
                    elapsed: started.elapsed(),
                })
            }
        }
    }

    /// Dispatch the backend call as a detached task.
    ///
    /// Detached so a waiter's timeout never cancels it — later callers and
    /// the cache still benefit from the eventual result. Exactly one
    /// attempt; on success the result is published to the cache before the
    /// flight settles.
    fn spawn_invocation(
        &self,
        handle: FlightHandle,
        endpoint: &str,
        ep: &EndpointConfig,
        fingerprint: Fingerprint,
        version: ModelVersion,
        input: &Value,
    ) {
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let backend_timeout = self.config.limits.backend_timeout();
        let endpoint = endpoint.to_string();
        let model = ep.model.clone();
        let ttl = ep.cache_ttl();
        let input = input.clone();

        tokio::spawn(async move {
            metrics::counter!(telemetry::BACKEND_INVOCATIONS_TOTAL,
                "endpoint" => endpoint.clone(),
            )
            .increment(1);
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(backend_timeout, backend.invoke(&endpoint, &input)).await
                {
                    Ok(Ok(value)) => {
                        let value = Arc::new(value);
                        cache.store(fingerprint, Arc::clone(&value), model, version, ttl);
                        FlightOutcome::Value(value)
                    }
                    Ok(Err(e)) => {
                        metrics::counter!(telemetry::BACKEND_ERRORS_TOTAL,
                            "endpoint" => endpoint.clone(),
                        )
                        .increment(1);
                        warn!(endpoint = %endpoint, error = %e, "backend invocation failed");
                        match backend_failure(e) {
                            GarmrError::Backend(message) => FlightOutcome::Backend(message),
                            GarmrError::BackendTimeout { elapsed } => {
                                FlightOutcome::BackendTimeout { elapsed }
                            }
                            // backend_failure only returns the two above.
                            other => FlightOutcome::Backend(other.to_string()),
                        }
                    }
                    Err(_) => {
                        metrics::counter!(telemetry::BACKEND_ERRORS_TOTAL,
                            "endpoint" => endpoint.clone(),
                        )
                        .increment(1);
                        warn!(endpoint = %endpoint, "backend invocation timed out");
                        FlightOutcome::BackendTimeout {
                            elapsed: started.elapsed(),
                        }
                    }
                };
            handle.settle(outcome);
        });
    }
}

impl Drop for AdmissionController {
    fn drop(&mut self) {
        // Background tasks exit on their own once the flag flips; nothing
        // to await in Drop.
        let _ = self.shutdown_tx.send(true);
    }
}

/// Map a shared flight outcome onto this caller's response.
fn translate(
    outcome: Option<FlightOutcome>,
    quota: QuotaInfo,
    endpoint: &str,
    wait_timeout: Duration,
) -> Result<Admitted> {
    match outcome {
        Some(FlightOutcome::Value(value)) => Ok(Admitted {
            value,
            cache_status: CacheStatus::Miss,
            quota,
        }),
        Some(FlightOutcome::QuotaDenied { retry_after }) => {
            Err(GarmrError::QuotaExceeded { retry_after })
        }
        Some(FlightOutcome::CostExceedsCapacity { cost, capacity }) => {
            Err(GarmrError::CostExceedsCapacity {
                endpoint: endpoint.to_string(),
                cost,
                capacity,
            })
        }
        Some(FlightOutcome::Backend(message)) => Err(GarmrError::Backend(message)),
        Some(FlightOutcome::BackendTimeout { elapsed }) => {
            Err(GarmrError::BackendTimeout { elapsed })
        }
        // This caller's wait expired; the invocation itself carries on.
        None => Err(GarmrError::BackendTimeout {
            elapsed: wait_timeout,
        }),
    }
}

/// Keep backend-shaped errors as they are; wrap anything else an invoker
/// returns so the caller always sees a backend failure.
fn backend_failure(e: GarmrError) -> GarmrError {
    match e {
        GarmrError::Backend(_) | GarmrError::BackendTimeout { .. } => e,
        other => GarmrError::Backend(other.to_string()),
    }
}
