use std::sync::Arc;

use async_trait::async_trait;
use resbridge_core::{ResError, ResourceState};
use serde_json::value::RawValue;

use crate::bridge::session::SessionScope;

/// Live handle to one resource's current state, owned by the resolver.
///
/// Handles are acquired through [`Resolver::subscribe`] and must be
/// released exactly once via [`Subscription::release`]; the ephemeral
/// session does this at disposal for every handle it tracked.
pub trait Subscription: Send + Sync {
    /// RID of the resource this handle observes.
    fn rid(&self) -> &str;

    /// Snapshot of the current state.
    fn state(&self) -> ResourceState;

    /// Resolves a reference held by this resource to the referenced handle.
    /// Returns `None` if the resolver has no such resource loaded.
    fn child(&self, rid: &str) -> Option<Arc<dyn Subscription>>;

    /// Gives the handle back to the resolver.
    fn release(&self);
}

/// Access to the resource cache/backend, addressed by RID.
///
/// Every method receives the calling session's [`SessionScope`], which
/// carries the request context and tracks acquired subscriptions.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Acquires a live subscription for `rid`.
    ///
    /// The session tracks the returned handle itself; implementations only
    /// call [`SessionScope::track`] for additional handles they acquire on
    /// the session's behalf.
    async fn subscribe(
        &self,
        scope: &SessionScope,
        rid: &str,
    ) -> Result<Arc<dyn Subscription>, ResError>;

    /// Returns a single non-graph representation of `rid`, with references
    /// rendered as links under `api_path`. `None` means no content.
    async fn get_resource(
        &self,
        scope: &SessionScope,
        rid: &str,
        api_path: &str,
    ) -> Result<Option<serde_json::Value>, ResError>;

    /// Invokes `action` on `rid` with optional parameters.
    async fn call(
        &self,
        scope: &SessionScope,
        rid: &str,
        action: &str,
        params: Option<&RawValue>,
    ) -> Result<Option<serde_json::Value>, ResError>;

    /// Creates a new resource under collection `rid` and returns its href
    /// under `api_path`.
    async fn create(
        &self,
        scope: &SessionScope,
        rid: &str,
        api_path: &str,
        params: Option<&RawValue>,
    ) -> Result<String, ResError>;

    /// Issues an authentication action on behalf of the session.
    async fn auth(
        &self,
        scope: &SessionScope,
        rid: &str,
        action: &str,
        params: Option<&RawValue>,
    ) -> Result<Option<serde_json::Value>, ResError>;
}
