//! Pod → top-level workload controller resolution.
//!
//! The resolver answers "which Deployment/StatefulSet/DaemonSet/CronJob owns
//! this pod" from bounded in-memory caches that a pod watch keeps warm. When
//! the Kubernetes client lacks the required list permissions the exporter
//! installs the no-op variant instead, which uniformly answers "not found".

mod active;
mod watch;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tracing::{error, info, warn};

pub use active::{Resolver, ResolverOptions};
pub use watch::run_pod_watch;

/// Sentinel filling every field of a ref for pods without owner references.
pub const ORPHAN_SENTINEL: &str = "ORPHAN";

/// Compact reference to the top-level controller of a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRef {
    pub uid: String,
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ControllerRef {
    /// The "pod currently has no owner" answer. Never cached; the pod may
    /// be adopted later.
    pub fn orphan() -> Self {
        ControllerRef {
            uid: ORPHAN_SENTINEL.to_string(),
            api_version: ORPHAN_SENTINEL.to_string(),
            kind: ORPHAN_SENTINEL.to_string(),
            namespace: ORPHAN_SENTINEL.to_string(),
            name: ORPHAN_SENTINEL.to_string(),
        }
    }
}

/// Contract shared by the active and no-op resolver shapes.
///
/// `get_by_uid` is the synchronous read used on the collection path;
/// `resolve` performs owner walks and is only driven by the pod watch.
#[async_trait]
pub trait PodControllerResolver: Send + Sync {
    /// False for the no-op variant; controller labels are omitted then.
    fn active(&self) -> bool;

    /// Cached controller ref for the pod with this UID, if present.
    fn get_by_uid(&self, uid: &str) -> Option<ControllerRef>;

    /// Resolves and caches the top-level controller for the pod.
    async fn resolve(&self, pod: &Pod) -> Result<ControllerRef>;

    /// Evicts the cached entry for the pod.
    fn forget(&self, pod: &Pod);
}

/// Resolver that never resolves anything, installed when permissions are
/// missing so call sites need no conditional.
pub struct NoopResolver;

#[async_trait]
impl PodControllerResolver for NoopResolver {
    fn active(&self) -> bool {
        false
    }

    fn get_by_uid(&self, _uid: &str) -> Option<ControllerRef> {
        None
    }

    async fn resolve(&self, _pod: &Pod) -> Result<ControllerRef> {
        Err(anyhow!(
            "no-op resolver does not resolve pod controller references"
        ))
    }

    fn forget(&self, _pod: &Pod) {}
}

/// Builds the resolver and starts its pod watch.
///
/// Degrades to [`NoopResolver`] when the client cannot be built or lacks
/// list permissions on pods, replica-sets or jobs; degraded startup is a
/// warning, never an exit.
pub async fn install(opts: ResolverOptions) -> Arc<dyn PodControllerResolver> {
    let client = match kube::Client::try_default().await {
        Ok(client) => client,
        Err(err) => {
            warn!(err = %err, "failed to build kubernetes client");
            error!("current resolver won't resolve any controller, please add necessary permissions (list Pods, ReplicaSets, Jobs across all namespaces)");
            return Arc::new(NoopResolver);
        }
    };

    if let Err(errs) = active::check_client_permissions(&client).await {
        for err in errs {
            warn!(err = %err, "client permission error");
        }
        error!("current resolver won't resolve any controller, please add necessary permissions (list Pods, ReplicaSets, Jobs across all namespaces)");
        return Arc::new(NoopResolver);
    }

    let node_name = opts.node_name.clone();
    let resolver: Arc<Resolver> = Arc::new(Resolver::new(client.clone(), &opts));
    let watched = resolver.clone();
    let (sync_tx, sync_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        run_pod_watch(watched, client, node_name, sync_tx).await;
    });

    // Startup waits for the first resync so the caches are warm before
    // the first scrape.
    let _ = sync_rx.await;
    info!("initial pod sync complete");

    resolver
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphan_ref_uses_the_sentinel_everywhere() {
        let orphan = ControllerRef::orphan();
        assert_eq!(orphan.uid, ORPHAN_SENTINEL);
        assert_eq!(orphan.api_version, ORPHAN_SENTINEL);
        assert_eq!(orphan.kind, ORPHAN_SENTINEL);
        assert_eq!(orphan.namespace, ORPHAN_SENTINEL);
        assert_eq!(orphan.name, ORPHAN_SENTINEL);
    }

    #[test]
    fn noop_resolver_finds_nothing() {
        let noop = NoopResolver;
        assert!(!noop.active());
        assert!(noop.get_by_uid("some-uid").is_none());
    }

    #[tokio::test]
    async fn noop_resolver_refuses_to_resolve() {
        let noop = NoopResolver;
        let pod = Pod::default();
        assert!(noop.resolve(&pod).await.is_err());
    }
}
