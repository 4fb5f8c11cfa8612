//! Admission outcomes returned to callers.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Whether a response was served from cache or computed fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Uppercase wire form for response metadata (`HIT` / `MISS`).
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Quota standing reported alongside a successful response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaInfo {
    /// Tokens left in the identity's bucket after this request.
    pub remaining: f64,
    /// Time until the bucket refills back to capacity.
    pub reset_after: Duration,
}

/// A successfully admitted (or cache-served) request.
///
/// The value is shared — coalesced callers receive clones of the same
/// `Arc`, and the cache holds another.
#[derive(Debug, Clone)]
pub struct Admitted {
    /// The prediction result, cached or fresh.
    pub value: Arc<Value>,
    /// Whether the value came from the cache.
    pub cache_status: CacheStatus,
    /// Quota standing of the caller after this request.
    pub quota: QuotaInfo,
}
