//! Public types for the Garmr API.

mod identity;
mod outcome;
mod version;

pub use identity::{Identity, Tier};
pub use outcome::{Admitted, CacheStatus, QuotaInfo};
pub use version::{InvalidationEvent, ModelVersion};
