//! Garmr - admission control and response caching for ML inference backends
//!
//! Garmr sits in front of a shared, expensive compute resource and decides,
//! for every request, whether to serve a previously computed result, admit
//! the request against the caller's per-identity quota and invoke the
//! backend, or reject it cheaply. It is transport-agnostic: callers plug in
//! an [`IdentityResolver`] and a [`BackendInvoker`] and map [`Admitted`] /
//! [`GarmrError`] onto their own wire format.
//!
//! # Request flow
//!
//! ```text
//! request ──► resolve identity ──► cache lookup ── HIT ──► respond
//!                                       │
//!                                      MISS
//!                                       ▼
//!                          join or lead in-flight handle
//!                                       │
//!                      follower ◄───────┴───────► leader
//!                         │                         │
//!                  wait on handle            quota tryConsume
//!                                                   │
//!                                       DENY ──► reject (settles waiters)
//!                                       ALLOW ──► backend (detached task)
//!                                                   │
//!                                    success ──► cache store ──► settle
//!                                    failure ──► settle (no cache write,
//!                                                        no token refund)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use garmr::{EndpointConfig, Garmr};
//!
//! let controller = Garmr::builder()
//!     .resolver(MyApiKeyResolver::new())
//!     .backend(MyInferenceClient::new("http://model-server:8500"))
//!     .endpoint("predict", EndpointConfig {
//!         model: "image-classifier".into(),
//!         cost: 1.0,
//!         cache_ttl_secs: 300,
//!         cacheable: true,
//!     })
//!     .model_version("image-classifier", "v3")
//!     .build()?;
//!
//! let admitted = controller.admit(api_key, "predict", &body).await?;
//! println!("{} ({})", admitted.value, admitted.cache_status.as_str());
//! ```
//!
//! # Error taxonomy
//!
//! [`GarmrError::QuotaExceeded`] is retryable after its hint;
//! [`GarmrError::CostExceedsCapacity`] is a terminal misconfiguration that
//! clients must not retry; backend failures are transient and carry no
//! retry loop here — one backend attempt per admitted request. The ledger
//! and the cache never error at callers directly; they return sentinel
//! enums the controller translates.

pub mod admission;
pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod quota;
pub mod telemetry;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use admission::{AdmissionController, Garmr, GarmrBuilder};
pub use bus::InvalidationBus;
pub use cache::{Fingerprint, Lookup, PredictionCache};
pub use config::{
    CacheSettings, EndpointConfig, GarmrConfig, LimitsConfig, QuotaSettings, TierLimits, TierTable,
};
pub use error::{GarmrError, Result};
pub use quota::{Consumption, QuotaLedger};
pub use traits::{BackendInvoker, IdentityResolver};

// Re-export all types
pub use types::{
    Admitted, CacheStatus, Identity, InvalidationEvent, ModelVersion, QuotaInfo, Tier,
};
