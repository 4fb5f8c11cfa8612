//! External collaborator traits.
//!
//! Garmr sits between a transport it never sees and a backend it never
//! implements. Both seams are traits so consumers plug in their own
//! implementations; tests use in-process mocks.

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::types::Identity;

/// Resolves request credentials to a stable identity and tier.
///
/// External collaborator — garmr performs no verification of its own. A
/// resolution failure is terminal ([`GarmrError::Authentication`](crate::GarmrError::Authentication))
/// and short-circuits before any cache or quota work.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credentials: &str) -> Result<Identity>;
}

/// Invokes the shared, expensive compute resource.
///
/// Receives the canonicalized input for an endpoint and returns the fully
/// materialized result, possibly after significant latency. The admission
/// controller applies its own deadline around this call and treats a
/// timeout as a backend error; it never retries — one attempt per admitted
/// request, retry policy belongs to the caller or the invoker itself.
#[async_trait]
pub trait BackendInvoker: Send + Sync {
    async fn invoke(&self, endpoint: &str, input: &Value) -> Result<Value>;
}
