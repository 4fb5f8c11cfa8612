//! Token bucket refill and consumption arithmetic.
//!
//! Pure bookkeeping — every method takes `now` explicitly so the ledger
//! decides the clock and tests can replay arbitrary schedules. Refill is
//! computed lazily at access time from the elapsed interval; no background
//! timer touches a bucket.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::TierLimits;

/// Tolerance for treating a bucket as refilled to capacity. Refill math is
/// f64; exact equality would keep an idle bucket alive forever.
const FULL_EPSILON: f64 = 1e-9;

/// Decision for a single consumption attempt against one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BucketDecision {
    Granted,
    /// Not enough tokens right now; refill will cover the deficit after
    /// `retry_after`.
    Insufficient { retry_after: Duration },
    /// The cost can never fit, at any refill state.
    ExceedsCapacity,
}

/// One identity's token reservoir.
///
/// Invariant: `0 <= tokens <= capacity` at every observation point.
#[derive(Debug)]
pub(crate) struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    /// A fresh bucket starts full.
    pub(crate) fn new(limits: TierLimits, now: Instant) -> Self {
        Self {
            capacity: limits.capacity,
            refill_rate: limits.refill_per_sec,
            tokens: limits.capacity,
            last_refill: now,
            last_access: now,
        }
    }

    /// Credit tokens for the time elapsed since the last refill, capped at
    /// capacity.
    pub(crate) fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Attempt to debit `cost` tokens, refilling first.
    pub(crate) fn try_consume(&mut self, cost: f64, now: Instant) -> BucketDecision {
        self.last_access = now;
        if cost > self.capacity {
            return BucketDecision::ExceedsCapacity;
        }
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            BucketDecision::Granted
        } else {
            BucketDecision::Insufficient {
                retry_after: self.retry_after(cost),
            }
        }
    }

    /// Refill without consuming; used for read-only quota reporting.
    pub(crate) fn observe(&mut self, now: Instant) {
        self.last_access = now;
        self.refill(now);
    }

    /// Tier limits may change between requests (plan upgrade); rebind the
    /// bucket, clamping stored tokens to the new capacity.
    pub(crate) fn reconfigure(&mut self, limits: TierLimits) {
        if self.capacity != limits.capacity || self.refill_rate != limits.refill_per_sec {
            self.capacity = limits.capacity;
            self.refill_rate = limits.refill_per_sec;
            self.tokens = self.tokens.min(self.capacity);
        }
    }

    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Time until the bucket is back at capacity.
    pub(crate) fn reset_after(&self) -> Duration {
        let deficit = self.capacity - self.tokens;
        if deficit <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(deficit / self.refill_rate)
    }

    /// Whole-second retry hint for a denial: the time refill needs to cover
    /// the deficit, rounded up, never less than one second.
    fn retry_after(&self, cost: f64) -> Duration {
        let deficit = cost - self.tokens;
        let secs = (deficit / self.refill_rate).ceil().max(1.0);
        Duration::from_secs(secs as u64)
    }

    pub(crate) fn is_full(&self) -> bool {
        self.tokens >= self.capacity - FULL_EPSILON
    }

    pub(crate) fn idle_since(&self) -> Instant {
        self.last_access
    }
}
