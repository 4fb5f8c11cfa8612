//! Per-identity token-bucket quota accounting.
//!
//! [`QuotaLedger`] owns one [`bucket::TokenBucket`] per identity, created
//! lazily on first request and evicted by a periodic sweep once idle. Refill
//! is lazy (computed from elapsed time at access), so no timer thread runs
//! on the request path.
//!
//! # Concurrency
//!
//! The bucket map is behind a `tokio::sync::RwLock`; each bucket behind its
//! own `tokio::sync::Mutex`. Consumption for a single identity is linearized
//! by the bucket lock (no double-spend); buckets for different identities
//! are fully independent — there is no global lock on the consume path, only
//! a short map read to clone the bucket handle.
//!
//! # Cross-node deployments
//!
//! Buckets are single-process in-memory state. Horizontally scaled
//! deployments must route each identity to one node (sticky routing) for
//! the limits to hold exactly; without it, per-node buckets make the quota
//! an approximation.

mod bucket;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{QuotaSettings, TierTable};
use crate::telemetry;
use crate::types::{Identity, QuotaInfo};
use bucket::{BucketDecision, TokenBucket};

/// Outcome of a consumption attempt.
///
/// A sentinel, not an error: only the admission controller translates
/// `Denied` and `CostExceedsCapacity` into caller-facing responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Consumption {
    /// Tokens debited.
    Allowed {
        /// Tokens left after the debit.
        remaining: f64,
        /// Time until the bucket refills back to capacity.
        reset_after: Duration,
    },
    /// Not enough tokens right now; retry once refill covers the deficit.
    Denied { retry_after: Duration },
    /// The cost exceeds the tier's capacity — permanent misconfiguration,
    /// never retryable.
    CostExceedsCapacity { cost: f64, capacity: f64 },
}

/// Per-identity token-bucket rate limiter with tier-based limits.
pub struct QuotaLedger {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    tiers: TierTable,
    idle_ttl: Duration,
}

impl QuotaLedger {
    pub fn new(tiers: TierTable, settings: &QuotaSettings) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            tiers,
            idle_ttl: settings.idle_bucket_ttl(),
        }
    }

    /// Attempt to debit `cost` tokens from `identity`'s bucket.
    ///
    /// Capacity and refill rate come from the tier table, never from the
    /// caller. A cost above the tier capacity is terminal
    /// ([`Consumption::CostExceedsCapacity`]) at any refill state.
    pub async fn try_consume(&self, identity: &Identity, cost: f64) -> Consumption {
        let now = Instant::now();
        let limits = self.tiers.limits(identity.tier);
        let bucket = self.bucket_for(identity, now).await;
        let mut bucket = bucket.lock().await;
        bucket.reconfigure(limits);
        match bucket.try_consume(cost, now) {
            BucketDecision::Granted => Consumption::Allowed {
                remaining: bucket.tokens(),
                reset_after: bucket.reset_after(),
            },
            BucketDecision::Insufficient { retry_after } => {
                metrics::counter!(telemetry::QUOTA_DENIALS_TOTAL,
                    "tier" => identity.tier.as_str(),
                )
                .increment(1);
                debug!(
                    identity = %identity.id,
                    tier = %identity.tier,
                    cost,
                    retry_after_secs = retry_after.as_secs(),
                    "quota denied"
                );
                Consumption::Denied { retry_after }
            }
            BucketDecision::ExceedsCapacity => Consumption::CostExceedsCapacity {
                cost,
                capacity: limits.capacity,
            },
        }
    }

    /// Current standing for `identity` without consuming anything.
    ///
    /// Used for responses that bypassed the ledger (cache hits, coalesced
    /// waiters). Creates the bucket if the identity has none yet.
    pub async fn snapshot(&self, identity: &Identity) -> QuotaInfo {
        let now = Instant::now();
        let limits = self.tiers.limits(identity.tier);
        let bucket = self.bucket_for(identity, now).await;
        let mut bucket = bucket.lock().await;
        bucket.reconfigure(limits);
        bucket.observe(now);
        QuotaInfo {
            remaining: bucket.tokens(),
            reset_after: bucket.reset_after(),
        }
    }

    /// Number of live buckets.
    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Remove buckets idle past the TTL.
    ///
    /// Only full buckets are removed: recreating a bucket hands out a full
    /// reservoir, so evicting a drained one would mint tokens. An idle
    /// bucket refills to capacity on its own, so this only delays eviction
    /// for buckets with very slow refill. Returns the number evicted.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            // A held lock means the bucket is being accessed right now —
            // by definition not idle.
            let Ok(mut bucket) = bucket.try_lock() else {
                return true;
            };
            bucket.refill(now);
            let idle = now.saturating_duration_since(bucket.idle_since()) > self.idle_ttl;
            !(idle && bucket.is_full())
        });
        let evicted = before - buckets.len();
        if evicted > 0 {
            metrics::counter!(telemetry::BUCKETS_EVICTED_TOTAL).increment(evicted as u64);
            debug!(evicted, remaining = buckets.len(), "swept idle buckets");
        }
        evicted
    }

    /// Spawn the periodic idle-bucket sweeper.
    ///
    /// Runs until `shutdown` flips to true. Each sweep holds the map write
    /// lock only for the retain pass (pure bookkeeping, no awaits), so it
    /// cannot starve the request path.
    pub(crate) fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ledger.sweep_idle().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn bucket_for(&self, identity: &Identity, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().await.get(&identity.id) {
            return Arc::clone(bucket);
        }
        let limits = self.tiers.limits(identity.tier);
        let mut buckets = self.buckets.write().await;
        // Re-check under the write lock; another task may have won the race.
        Arc::clone(
            buckets
                .entry(identity.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(limits, now)))),
        )
    }
}
