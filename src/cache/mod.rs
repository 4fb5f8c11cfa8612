//! Caching subsystem.
//!
//! Two pieces:
//!
//! - [`fingerprint::Fingerprint`] — deterministic SHA-256 cache key over
//!   (endpoint, active model version, canonicalized input). Stable across
//!   process restarts.
//!
//! - [`store::PredictionCache`] — bounded LRU + per-entry TTL store mapping
//!   fingerprints to computed results, with model-version staleness checks
//!   on every read. Sits in [`AdmissionController`](crate::AdmissionController)
//!   ahead of quota accounting — a cache hit bypasses the ledger (unless
//!   the `quota.hit_cost` extension is configured) and never reaches the
//!   backend.
//!
//! The cache never produces caller-facing errors: lookups return the
//! [`Lookup`] sentinel and corrupt entries self-heal as misses.

mod fingerprint;
mod store;

pub use fingerprint::Fingerprint;
pub use store::{Lookup, PredictionCache};
