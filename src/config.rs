//! Configuration loading for garmr.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (builder / caller supplied)
//! 2. `~/.garmr/config.toml` (user)
//! 3. `/etc/garmr/config.toml` (system)
//!
//! All of it can equally be constructed in code and handed to
//! [`GarmrBuilder::config()`](crate::GarmrBuilder::config); the file layer
//! exists for deployments that configure tiers and endpoints out-of-band.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::Tier;
use crate::{GarmrError, Result};

/// Top-level garmr configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GarmrConfig {
    /// Per-tier bucket capacity and refill rate.
    #[serde(default)]
    pub tiers: TierTable,
    /// Endpoint name → cost/caching parameters. Requests naming an endpoint
    /// absent from this map are rejected with `UnknownEndpoint`.
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub quota: QuotaSettings,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for GarmrConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            endpoints: HashMap::new(),
            cache: CacheSettings::default(),
            quota: QuotaSettings::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Capacity and refill rate for one tier's buckets.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TierLimits {
    /// Maximum tokens a bucket can hold.
    pub capacity: f64,
    /// Tokens added per second of elapsed time.
    pub refill_per_sec: f64,
}

/// Per-tier limits table.
#[derive(Debug, Clone, Deserialize)]
pub struct TierTable {
    #[serde(default = "default_free")]
    pub free: TierLimits,
    #[serde(default = "default_pro")]
    pub pro: TierLimits,
    #[serde(default = "default_enterprise")]
    pub enterprise: TierLimits,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            free: default_free(),
            pro: default_pro(),
            enterprise: default_enterprise(),
        }
    }
}

impl TierTable {
    /// Limits for a tier. Total — every tier has an entry.
    pub fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }
}

fn default_free() -> TierLimits {
    TierLimits {
        capacity: 10.0,
        refill_per_sec: 1.0,
    }
}

fn default_pro() -> TierLimits {
    TierLimits {
        capacity: 100.0,
        refill_per_sec: 10.0,
    }
}

fn default_enterprise() -> TierLimits {
    TierLimits {
        capacity: 1000.0,
        refill_per_sec: 100.0,
    }
}

/// Cost and caching parameters for one endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Model this endpoint serves; invalidation events are matched on it.
    pub model: String,
    /// Token cost debited per admitted request (default: 1).
    #[serde(default = "default_cost")]
    pub cost: f64,
    /// Time-to-live for cached results in seconds (default: 300).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Whether results may be cached and coalesced at all (default: true).
    /// Non-deterministic endpoints set this to false.
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

impl EndpointConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_cost() -> f64 {
    1.0
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cacheable() -> bool {
    true
}

/// Prediction cache sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of cached entries; least-recently-used entries are
    /// evicted beyond this bound (default: 10,000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> u64 {
    10_000
}

/// Ledger housekeeping and the cache-hit charging extension.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaSettings {
    /// Buckets idle longer than this are eligible for eviction (default: 3600).
    #[serde(default = "default_idle_bucket_ttl")]
    pub idle_bucket_ttl_secs: u64,
    /// Interval between idle-bucket sweeps (default: 60).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Reduced token cost charged on a cache hit. Absent (the default)
    /// means hits bypass the ledger entirely.
    #[serde(default)]
    pub hit_cost: Option<f64>,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            idle_bucket_ttl_secs: default_idle_bucket_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            hit_cost: None,
        }
    }
}

impl QuotaSettings {
    pub fn idle_bucket_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_bucket_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_idle_bucket_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

/// Request path deadlines.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// How long a caller waits on cache, quota, and an in-flight handle
    /// before giving up (default: 30). Giving up never cancels a shared
    /// backend invocation other callers wait on.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Deadline applied to the backend invocation itself (default: 120).
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: default_wait_timeout(),
            backend_timeout_secs: default_backend_timeout(),
        }
    }
}

impl LimitsConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

fn default_wait_timeout() -> u64 {
    30
}

fn default_backend_timeout() -> u64 {
    120
}

impl GarmrConfig {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.garmr/config.toml`
    /// 3. `/etc/garmr/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            GarmrError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: GarmrConfig = toml::from_str(&content).map_err(|e| {
            GarmrError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the ledger and cache cannot operate under.
    pub fn validate(&self) -> Result<()> {
        for (tier, limits) in [
            ("free", self.tiers.free),
            ("pro", self.tiers.pro),
            ("enterprise", self.tiers.enterprise),
        ] {
            if limits.capacity <= 0.0 || !limits.capacity.is_finite() {
                return Err(GarmrError::Configuration(format!(
                    "tier '{tier}' capacity must be positive, got {}",
                    limits.capacity
                )));
            }
            if limits.refill_per_sec <= 0.0 || !limits.refill_per_sec.is_finite() {
                return Err(GarmrError::Configuration(format!(
                    "tier '{tier}' refill_per_sec must be positive, got {}",
                    limits.refill_per_sec
                )));
            }
        }
        for (name, endpoint) in &self.endpoints {
            if endpoint.cost <= 0.0 || !endpoint.cost.is_finite() {
                return Err(GarmrError::Configuration(format!(
                    "endpoint '{name}' cost must be positive, got {}",
                    endpoint.cost
                )));
            }
            if endpoint.model.is_empty() {
                return Err(GarmrError::Configuration(format!(
                    "endpoint '{name}' must name a model"
                )));
            }
        }
        if let Some(hit_cost) = self.quota.hit_cost {
            if hit_cost < 0.0 || !hit_cost.is_finite() {
                return Err(GarmrError::Configuration(format!(
                    "quota.hit_cost must be non-negative, got {hit_cost}"
                )));
            }
        }
        Ok(())
    }

    /// Endpoint configuration by name, if registered.
    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(name)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(GarmrError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".garmr").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/garmr/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(GarmrError::Configuration(
            "No config file found. Create ~/.garmr/config.toml or /etc/garmr/config.toml"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = GarmrConfig::default();
        assert_eq!(config.tiers.free.capacity, 10.0);
        assert_eq!(config.tiers.enterprise.refill_per_sec, 100.0);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.quota.idle_bucket_ttl_secs, 3600);
        assert_eq!(config.limits.backend_timeout_secs, 120);
        assert!(config.quota.hit_cost.is_none());
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [endpoints.predict]
            model = "classifier"
        "#;
        let config: GarmrConfig = toml::from_str(toml).unwrap();
        let ep = config.endpoint("predict").unwrap();
        assert_eq!(ep.model, "classifier");
        // Defaults preserved
        assert_eq!(ep.cost, 1.0);
        assert_eq!(ep.cache_ttl_secs, 300);
        assert!(ep.cacheable);
        assert_eq!(config.tiers.free.capacity, 10.0);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [tiers.free]
            capacity = 20.0
            refill_per_sec = 2.0

            [tiers.pro]
            capacity = 200.0
            refill_per_sec = 20.0

            [endpoints.predict]
            model = "classifier"
            cost = 2.5
            cache_ttl_secs = 60

            [endpoints.sample]
            model = "generator"
            cacheable = false

            [cache]
            max_entries = 500

            [quota]
            idle_bucket_ttl_secs = 120
            sweep_interval_secs = 10
            hit_cost = 0.1

            [limits]
            wait_timeout_secs = 5
            backend_timeout_secs = 15
        "#;
        let config: GarmrConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.tiers.free.capacity, 20.0);
        // Unlisted tier keeps its default
        assert_eq!(config.tiers.enterprise.capacity, 1000.0);
        assert_eq!(config.endpoint("predict").unwrap().cost, 2.5);
        assert!(!config.endpoint("sample").unwrap().cacheable);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.quota.hit_cost, Some(0.1));
        assert_eq!(config.limits.wait_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn validate_rejects_non_positive_cost() {
        let toml = r#"
            [endpoints.predict]
            model = "classifier"
            cost = 0.0
        "#;
        let config: GarmrConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cost must be positive"));
    }

    #[test]
    fn validate_rejects_empty_model() {
        let toml = r#"
            [endpoints.predict]
            model = ""
        "#;
        let config: GarmrConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_refill() {
        let mut config = GarmrConfig::default();
        config.tiers.free.refill_per_sec = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = GarmrConfig::load(Some(Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn tier_lookup_is_total() {
        let table = TierTable::default();
        assert_eq!(table.limits(crate::Tier::Free).capacity, 10.0);
        assert_eq!(table.limits(crate::Tier::Pro).capacity, 100.0);
        assert_eq!(table.limits(crate::Tier::Enterprise).capacity, 1000.0);
    }
}
