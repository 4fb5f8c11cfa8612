//! Garmr error types

use std::time::Duration;

/// Garmr error types
///
/// Only the [`AdmissionController`](crate::AdmissionController) produces
/// these; the ledger and the cache return sentinel result enums that the
/// controller translates. See the crate docs for the taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum GarmrError {
    /// Identity resolution failed. Terminal — short-circuits before any
    /// cache or quota work.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The identity's bucket has too few tokens right now. Retryable after
    /// `retry_after`.
    #[error("quota exceeded, retry after {retry_after:?}")]
    QuotaExceeded { retry_after: Duration },

    /// The endpoint's cost exceeds the tier's bucket capacity. Terminal
    /// misconfiguration — no amount of refill can ever admit this request,
    /// so clients must not retry.
    #[error("cost {cost} for endpoint '{endpoint}' exceeds tier capacity {capacity}")]
    CostExceedsCapacity {
        endpoint: String,
        cost: f64,
        capacity: f64,
    },

    /// The backend invocation failed. Transient from this layer's point of
    /// view; retry policy belongs to the caller, not here.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend invocation (or a coalesced wait on one) exceeded its
    /// deadline. The shared invocation itself is not cancelled.
    #[error("backend timed out after {elapsed:?}")]
    BackendTimeout { elapsed: Duration },

    /// Request named an endpoint with no configuration entry.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GarmrError {
    /// Whether retrying this request can never succeed.
    ///
    /// Terminal errors must not be retried by clients; everything else is
    /// either retryable after a delay (`QuotaExceeded`) or transient.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GarmrError::Authentication(_)
                | GarmrError::CostExceedsCapacity { .. }
                | GarmrError::UnknownEndpoint(_)
                | GarmrError::Configuration(_)
        )
    }

    /// Retry hint for retryable denials, if one applies.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GarmrError::QuotaExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Transport-agnostic machine-readable reason for response bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            GarmrError::Authentication(_) => "authentication_failed",
            GarmrError::QuotaExceeded { .. } => "quota_exceeded",
            GarmrError::CostExceedsCapacity { .. } => "cost_exceeds_capacity",
            GarmrError::Backend(_) | GarmrError::BackendTimeout { .. } => "backend_error",
            GarmrError::UnknownEndpoint(_) => "unknown_endpoint",
            GarmrError::Configuration(_) => "configuration_error",
        }
    }
}

/// Result type alias for Garmr operations
pub type Result<T> = std::result::Result<T, GarmrError>;
