//! Model versions and invalidation events.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Version tag of a deployed model.
///
/// Opaque to garmr; compared only for equality. Cache entries carry the
/// version they were computed under and stop being servable the moment the
/// active version for their model differs. Models with no registered
/// version are treated as [`ModelVersion::default`] (`"0"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(String);

impl ModelVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModelVersion {
    fn default() -> Self {
        Self("0".to_string())
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelVersion {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}

impl From<String> for ModelVersion {
    fn from(version: String) -> Self {
        Self(version)
    }
}

/// A "model version changed" notification from the backend's deployment
/// lifecycle.
///
/// Published on the [`InvalidationBus`](crate::InvalidationBus); applying
/// one makes every cache entry computed under an older version of `model`
/// unservable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    /// Name of the redeployed model.
    pub model: String,
    /// Version now active for that model.
    pub version: ModelVersion,
    /// When the deployment happened, as reported by the publisher.
    pub at: SystemTime,
}

impl InvalidationEvent {
    pub fn new(model: impl Into<String>, version: impl Into<ModelVersion>) -> Self {
        Self {
            model: model.into(),
            version: version.into(),
            at: SystemTime::now(),
        }
    }
}
