//! The cache-backed resolver used when list permissions are available.

use std::num::NonZeroUsize;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use super::{ControllerRef, PodControllerResolver};

// 500 is a reasonable pod count per node, 750 bounds the owner cache
// without consuming much RAM while still protecting the api server.
const DEFAULT_POD_CACHE_CAPACITY: usize = 500;
const DEFAULT_OWNER_CACHE_CAPACITY: usize = 750;

/// Tuning knobs for the resolver caches plus the node identity used by the
/// pod watch.
#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Capacity of the pod-uid → ref cache; 0 selects the default.
    pub pod_cache_capacity: usize,
    /// Capacity of the owner → ref cache; 0 selects the default.
    pub owner_cache_capacity: usize,
    /// Node this exporter runs on; empty watches all nodes.
    pub node_name: String,
}

fn capacity_or(value: usize, default: usize) -> NonZeroUsize {
    let capacity = if value == 0 { default } else { value };
    NonZeroUsize::new(capacity).expect("default capacities are non-zero")
}

/// Probes list permissions on pods, replica-sets and jobs across all
/// namespaces. Returns every failure so startup can log them all.
pub(super) async fn check_client_permissions(client: &Client) -> Result<(), Vec<kube::Error>> {
    let params = ListParams::default().limit(1);
    let mut errors = Vec::new();

    if let Err(err) = Api::<Pod>::all(client.clone()).list_metadata(&params).await {
        errors.push(err);
    }
    if let Err(err) = Api::<ReplicaSet>::all(client.clone())
        .list_metadata(&params)
        .await
    {
        errors.push(err);
    }
    if let Err(err) = Api::<Job>::all(client.clone()).list_metadata(&params).await {
        errors.push(err);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Resolver holding the two bounded LRU caches.
///
/// Writes come from the pod watch task, reads from the pinned worker; both
/// caches hold immutable value objects behind a mutex.
pub struct Resolver {
    client: Client,
    pod_cache: Mutex<LruCache<String, ControllerRef>>,
    owner_cache: Mutex<LruCache<String, ControllerRef>>,
}

impl Resolver {
    pub fn new(client: Client, opts: &ResolverOptions) -> Self {
        Resolver {
            client,
            pod_cache: Mutex::new(LruCache::new(capacity_or(
                opts.pod_cache_capacity,
                DEFAULT_POD_CACHE_CAPACITY,
            ))),
            owner_cache: Mutex::new(LruCache::new(capacity_or(
                opts.owner_cache_capacity,
                DEFAULT_OWNER_CACHE_CAPACITY,
            ))),
        }
    }

    /// Walks one hop up from a ReplicaSet or Job owner; any other kind is
    /// already top-level and returned as-is. Results are memoized.
    async fn owner_detail(
        &self,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<ControllerRef> {
        let cache_key = owner_cache_key(namespace, owner);
        if let Some(cached) = self.owner_cache.lock().get(&cache_key) {
            debug!(key = %cache_key, "owner cache hit");
            return Ok(cached.clone());
        }
        debug!(key = %cache_key, kind = %owner.kind, name = %owner.name, "owner cache miss");

        let parents: Vec<OwnerReference> = match owner.kind.as_str() {
            "ReplicaSet" => {
                // Seek the underlying Deployment.
                let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
                api.get(&owner.name).await?.owner_references().to_vec()
            }
            "Job" => {
                // Seek the possible CronJob.
                let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
                api.get(&owner.name).await?.owner_references().to_vec()
            }
            _ => {
                let result = ref_from_owner(owner, namespace);
                self.owner_cache.lock().put(cache_key, result.clone());
                return Ok(result);
            }
        };

        let result = match controlling_owner(&parents) {
            Some(controlling) => ref_from_owner(controlling, namespace),
            None => ref_from_owner(owner, namespace),
        };
        self.owner_cache.lock().put(cache_key, result.clone());
        Ok(result)
    }
}

#[async_trait]
impl PodControllerResolver for Resolver {
    fn active(&self) -> bool {
        true
    }

    fn get_by_uid(&self, uid: &str) -> Option<ControllerRef> {
        if uid.is_empty() {
            return None;
        }
        self.pod_cache.lock().get(uid).cloned()
    }

    async fn resolve(&self, pod: &Pod) -> Result<ControllerRef> {
        let uid = pod.uid().context("pod carries no uid")?;

        if let Some(cached) = self.pod_cache.lock().get(&uid) {
            debug!(uid = %uid, "pod cache hit");
            return Ok(cached.clone());
        }

        let namespace = pod.namespace().unwrap_or_default();
        let owner_refs = pod.owner_references();

        let Some(owner) = controlling_owner(owner_refs) else {
            debug!(
                pod = %pod.name_any(),
                namespace = %namespace,
                reason = "no owner references found",
                "orphan pod"
            );
            // Orphans are not cached, the pod could be adopted later on.
            return Ok(ControllerRef::orphan());
        };

        let resolved = match owner.kind.as_str() {
            "StatefulSet" | "DaemonSet" | "Deployment" | "CronJob" => {
                ref_from_owner(owner, &namespace)
            }
            // Static pods are owned by their Node, which is cluster-scoped.
            "Node" => ref_from_owner(owner, ""),
            _ => self.owner_detail(&namespace, owner).await?,
        };

        self.pod_cache.lock().put(uid, resolved.clone());
        Ok(resolved)
    }

    fn forget(&self, pod: &Pod) {
        if let Some(uid) = pod.uid() {
            self.pod_cache.lock().pop(&uid);
        }
    }
}

/// Selects the controlling owner reference: the first with the controller
/// flag set, the first reference otherwise.
fn controlling_owner(refs: &[OwnerReference]) -> Option<&OwnerReference> {
    refs.iter()
        .find(|r| r.controller.unwrap_or(false))
        .or_else(|| refs.first())
}

fn ref_from_owner(owner: &OwnerReference, namespace: &str) -> ControllerRef {
    ControllerRef {
        uid: owner.uid.clone(),
        api_version: owner.api_version.clone(),
        kind: owner.kind.clone(),
        namespace: namespace.to_string(),
        name: owner.name.clone(),
    }
}

fn owner_cache_key(namespace: &str, owner: &OwnerReference) -> String {
    format!(
        "owner:{}={}={}={}={}",
        owner.uid, owner.api_version, owner.kind, namespace, owner.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(kind: &str, name: &str, controller: Option<bool>) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            controller,
            ..OwnerReference::default()
        }
    }

    #[test]
    fn controlling_owner_prefers_controller_flag() {
        let refs = vec![
            owner("ReplicaSet", "first", Some(false)),
            owner("Deployment", "second", Some(true)),
        ];
        assert_eq!(controlling_owner(&refs).unwrap().name, "second");
    }

    #[test]
    fn controlling_owner_falls_back_to_first() {
        let refs = vec![
            owner("ReplicaSet", "first", None),
            owner("Deployment", "second", None),
        ];
        assert_eq!(controlling_owner(&refs).unwrap().name, "first");
    }

    #[test]
    fn controlling_owner_of_nothing_is_none() {
        assert!(controlling_owner(&[]).is_none());
    }

    #[test]
    fn ref_from_owner_takes_the_pod_namespace() {
        let deployment = owner("Deployment", "web", Some(true));
        let controller_ref = ref_from_owner(&deployment, "prod");
        assert_eq!(controller_ref.kind, "Deployment");
        assert_eq!(controller_ref.namespace, "prod");
        assert_eq!(controller_ref.name, "web");
        assert_eq!(controller_ref.uid, "uid-web");
    }

    #[test]
    fn owner_cache_key_is_fully_qualified() {
        let job = owner("Job", "backup", Some(true));
        assert_eq!(
            owner_cache_key("ops", &job),
            "owner:uid-backup=apps/v1=Job=ops=backup"
        );
    }

    #[test]
    fn owner_cache_never_exceeds_capacity() {
        let mut cache: LruCache<String, ControllerRef> =
            LruCache::new(NonZeroUsize::new(3).unwrap());
        for i in 0..10 {
            let reference = ref_from_owner(&owner("Deployment", &format!("d{i}"), None), "ns");
            cache.put(format!("key-{i}"), reference);
        }
        assert_eq!(cache.len(), 3);
    }
}
