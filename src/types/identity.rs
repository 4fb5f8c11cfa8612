//! Caller identity and quota tiers.

use serde::{Deserialize, Serialize};

/// Quota tier of a caller.
///
/// Each tier maps to a bucket capacity and refill rate in
/// [`TierTable`](crate::config::TierTable); capacities are looked up from
/// configuration, never hardcoded per caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Stable lowercase name, used for config keys and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved caller identity.
///
/// Produced by an [`IdentityResolver`](crate::IdentityResolver) from request
/// credentials; opaque to garmr beyond the stable `id` string and the tier.
/// Immutable for the lifetime of the request that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable opaque identifier the quota bucket is keyed on.
    pub id: String,
    /// Quota tier the identity belongs to.
    pub tier: Tier,
}

impl Identity {
    pub fn new(id: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: id.into(),
            tier,
        }
    }
}
