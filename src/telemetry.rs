//! Telemetry metric name constants.
//!
//! Centralised metric names for garmr operations. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `garmr_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `endpoint` — endpoint name from the request
//! - `tier` — quota tier of the resolved identity
//! - `status` — outcome: "ok" or "error"

/// Total admission decisions taken by the controller.
///
/// Labels: `endpoint`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "garmr_requests_total";

/// End-to-end admission latency in seconds (resolve through respond).
///
/// Labels: `endpoint`.
pub const REQUEST_DURATION_SECONDS: &str = "garmr_request_duration_seconds";

/// Total cache hits.
///
/// Labels: `endpoint`.
pub const CACHE_HITS_TOTAL: &str = "garmr_cache_hits_total";

/// Total cache misses. Expired and version-stale entries count as misses.
///
/// Labels: `endpoint`.
pub const CACHE_MISSES_TOTAL: &str = "garmr_cache_misses_total";

/// Total entries dropped because their model version no longer matches.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "garmr_cache_invalidations_total";

/// Total entries discarded as corrupt (invariant violation on read).
pub const CACHE_CORRUPTIONS_TOTAL: &str = "garmr_cache_corruptions_total";

/// Total quota denials (retryable).
///
/// Labels: `tier`.
pub const QUOTA_DENIALS_TOTAL: &str = "garmr_quota_denials_total";

/// Total idle buckets removed by the ledger sweeper.
pub const BUCKETS_EVICTED_TOTAL: &str = "garmr_buckets_evicted_total";

/// Total backend invocations actually dispatched (after coalescing).
///
/// Labels: `endpoint`.
pub const BACKEND_INVOCATIONS_TOTAL: &str = "garmr_backend_invocations_total";

/// Total backend failures, timeouts included.
///
/// Labels: `endpoint`.
pub const BACKEND_ERRORS_TOTAL: &str = "garmr_backend_errors_total";

/// Total callers that attached to an already in-flight invocation instead
/// of spending quota and dispatching their own.
///
/// Labels: `endpoint`.
pub const COALESCED_WAITERS_TOTAL: &str = "garmr_coalesced_waiters_total";
