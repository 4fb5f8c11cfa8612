//! Builder for configuring admission controllers

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::{EndpointConfig, GarmrConfig};
use crate::traits::{BackendInvoker, IdentityResolver};
use crate::types::ModelVersion;
use crate::{GarmrError, Result};

/// Main entry point for creating admission controllers.
pub struct Garmr;

impl Garmr {
    /// Create a new builder for configuring the controller.
    pub fn builder() -> GarmrBuilder {
        GarmrBuilder::new()
    }
}

/// Builder for configuring admission controllers.
pub struct GarmrBuilder {
    config: GarmrConfig,
    resolver: Option<Arc<dyn IdentityResolver>>,
    backend: Option<Arc<dyn BackendInvoker>>,
    model_versions: Vec<(String, ModelVersion)>,
}

impl GarmrBuilder {
    pub fn new() -> Self {
        Self {
            config: GarmrConfig::default(),
            resolver: None,
            backend: None,
            model_versions: Vec::new(),
        }
    }

    /// Use a complete configuration (e.g. from [`GarmrConfig::load`]).
    ///
    /// Replaces tiers, endpoints, cache, quota, and limit settings
    /// wholesale; endpoints added earlier via
    /// [`endpoint()`](GarmrBuilder::endpoint) are discarded.
    pub fn config(mut self, config: GarmrConfig) -> Self {
        self.config = config;
        self
    }

    /// Register one endpoint in code.
    pub fn endpoint(mut self, name: impl Into<String>, endpoint: EndpointConfig) -> Self {
        self.config.endpoints.insert(name.into(), endpoint);
        self
    }

    /// Seed the active version for a model.
    ///
    /// Later version changes arrive through the
    /// [`InvalidationBus`](crate::InvalidationBus).
    pub fn model_version(
        mut self,
        model: impl Into<String>,
        version: impl Into<ModelVersion>,
    ) -> Self {
        self.model_versions.push((model.into(), version.into()));
        self
    }

    /// Set the identity resolver (required).
    pub fn resolver(mut self, resolver: impl IdentityResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Set the identity resolver from a shared handle.
    pub fn resolver_arc(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the backend invoker (required).
    pub fn backend(mut self, backend: impl BackendInvoker + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Set the backend invoker from a shared handle.
    pub fn backend_arc(mut self, backend: Arc<dyn BackendInvoker>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the controller and start its background tasks.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context (the idle-bucket sweeper and the
    /// invalidation apply task are spawned here).
    pub fn build(self) -> Result<AdmissionController> {
        let resolver = self
            .resolver
            .ok_or_else(|| GarmrError::Configuration("no identity resolver configured".into()))?;
        let backend = self
            .backend
            .ok_or_else(|| GarmrError::Configuration("no backend invoker configured".into()))?;
        if self.config.endpoints.is_empty() {
            return Err(GarmrError::Configuration("no endpoints configured".into()));
        }
        self.config.validate()?;

        let controller = AdmissionController::new(self.config, resolver, backend);
        for (model, version) in self.model_versions {
            controller.cache().set_active_version(model, version);
        }
        Ok(controller)
    }
}

impl Default for GarmrBuilder {
    fn default() -> Self {
        Self::new()
    }
}
