//! Pod watch keeping the resolver caches warm.
//!
//! Admission mirrors the node filter semantics the exporter has always had:
//! a pod is resolved when it first appears already assigned to this node,
//! or when a later update shows it transitioning from unassigned to
//! assigned here. Unassigned pods are never admitted on first sight, even
//! when watching all nodes.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

use super::PodControllerResolver;

/// What the watch should do with one pod event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Resolve,
    Ignore,
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("")
}

fn pod_node(pod: &Pod) -> &str {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .unwrap_or("")
}

/// Admission rules for one pod event.
///
/// `prev_node` is the node name seen on the previous event for this pod,
/// `None` when the pod is new to the watch. An empty `configured_node`
/// means "all nodes".
fn admit(phase: &str, prev_node: Option<&str>, node: &str, configured_node: &str) -> Admission {
    if phase != "Running" && phase != "Pending" {
        return Admission::Ignore;
    }
    let all_nodes = configured_node.is_empty();

    match prev_node {
        // First sight: only pods already assigned to a matching node.
        None => {
            if node.is_empty() {
                Admission::Ignore
            } else if all_nodes || node == configured_node {
                Admission::Resolve
            } else {
                Admission::Ignore
            }
        }
        // Update: only the unassigned → assigned-here transition.
        Some(prev) => {
            if prev.is_empty() && !node.is_empty() && (all_nodes || node == configured_node) {
                Admission::Resolve
            } else {
                Admission::Ignore
            }
        }
    }
}

/// Runs the watch until the stream ends. Errors back off and resume.
///
/// `initial_sync` fires once the first resync completed, so startup can
/// wait for warm caches.
pub async fn run_pod_watch(
    resolver: Arc<dyn PodControllerResolver>,
    client: Client,
    node_name: String,
    initial_sync: tokio::sync::oneshot::Sender<()>,
) {
    let api: Api<Pod> = Api::all(client);
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    pin_mut!(stream);

    // Last node assignment seen per pod uid, for transition detection.
    let mut seen_nodes: HashMap<String, String> = HashMap::new();
    let mut initial_sync = Some(initial_sync);

    loop {
        let event = match stream.try_next().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                warn!(err = %err, "pod watch error");
                continue;
            }
        };

        match event {
            Event::Init => {
                debug!("pod watch resync starting");
            }
            Event::InitDone => {
                info!("pod controller cache ready");
                if let Some(sync) = initial_sync.take() {
                    let _ = sync.send(());
                }
            }
            Event::InitApply(pod) | Event::Apply(pod) => {
                handle_pod(resolver.as_ref(), &mut seen_nodes, &node_name, pod).await;
            }
            Event::Delete(pod) => {
                if let Some(uid) = pod.uid() {
                    seen_nodes.remove(&uid);
                }
                resolver.forget(&pod);
            }
        }
    }
    warn!("pod watch stream ended");
}

async fn handle_pod(
    resolver: &dyn PodControllerResolver,
    seen_nodes: &mut HashMap<String, String>,
    configured_node: &str,
    pod: Pod,
) {
    let Some(uid) = pod.uid() else {
        return;
    };
    let node = pod_node(&pod).to_string();
    let prev_node = seen_nodes.get(&uid).map(String::as_str);
    let admission = admit(pod_phase(&pod), prev_node, &node, configured_node);
    seen_nodes.insert(uid, node);

    if admission == Admission::Resolve {
        if let Err(err) = resolver.resolve(&pod).await {
            warn!(
                pod = %pod.name_any(),
                namespace = %pod.namespace().unwrap_or_default(),
                err = %err,
                "issue while resolving pod's controller"
            );
        }
    }
}
