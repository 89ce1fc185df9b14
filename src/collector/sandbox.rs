//! Sandbox inventory over the container-runtime CRI socket.
//!
//! Lists ready pod sandboxes and resolves each one to its init pid and
//! network-namespace path by parsing the verbose status info document.

use std::env;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::net::UnixStream;
use tonic::transport::{Endpoint, Uri};
use tower::service_fn;
use tracing::{error, info, warn};

use super::cri::{
    ListPodSandboxRequest, PodSandboxFilter, PodSandboxStateValue, PodSandboxStatusRequest,
    RuntimeServiceClient, SANDBOX_READY,
};

/// Sentinel for sandboxes sharing the host network namespace, and for the
/// synthesized host pseudo-sandbox.
pub const HOST_SENTINEL: &str = "HOST";

/// Well-known CRI socket locations, probed in order: k3s containerd,
/// containerd, dockershim, cri-o.
const SOCKET_PATHS: [&str; 5] = [
    "/run/k3s/containerd/containerd.sock",
    "/var/run/containerd/containerd.sock",
    "/run/containerd/containerd.sock",
    "/var/run/dockershim.sock",
    "/run/crio/crio.sock",
];

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("no CRI socket found in usual places or provided path")]
    SocketNotFound,
    #[error("failed to connect to CRI socket: {0}")]
    Connect(#[from] tonic::transport::Error),
    #[error("CRI call failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// Identity of one ready pod sandbox, rebuilt on every scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRecord {
    pub pid: i32,
    pub name: String,
    pub namespace: String,
    pub netns_path: String,
    pub netns_name: String,
    pub pod_uid: String,
}

impl SandboxRecord {
    /// Pseudo-record for collecting in the host namespace without a switch.
    pub fn host() -> Self {
        SandboxRecord {
            pid: 0,
            name: String::new(),
            namespace: HOST_SENTINEL.to_string(),
            netns_path: HOST_SENTINEL.to_string(),
            netns_name: HOST_SENTINEL.to_string(),
            pod_uid: String::new(),
        }
    }

    /// `<namespace>/<name>`, the identity the pod filter is tested against.
    pub fn composed_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Shape of the JSON document embedded in the verbose status response.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SandboxStatusInfo {
    pid: i32,
    #[serde(rename = "runtimeSpec")]
    runtime_spec: RuntimeSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RuntimeSpec {
    linux: LinuxSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LinuxSpec {
    namespaces: Vec<NamespaceEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamespaceEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

impl SandboxStatusInfo {
    fn network_namespace_path(&self) -> String {
        self.runtime_spec
            .linux
            .namespaces
            .iter()
            .find(|ns| ns.kind == "network")
            .map(|ns| ns.path.clone())
            .unwrap_or_else(|| HOST_SENTINEL.to_string())
    }

    fn network_namespace_name(&self) -> String {
        let path = self.network_namespace_path();
        match path.rfind('/') {
            Some(idx) => path[idx + 1..].to_string(),
            None => path,
        }
    }
}

/// Picks the CRI socket path: `CRI_SOCKET` when set, first existing socket
/// from the well-known list otherwise.
pub fn discover_socket_path() -> Result<PathBuf, InventoryError> {
    if let Ok(provided) = env::var("CRI_SOCKET") {
        info!(path = %provided, "searching for cri socket: using provided path");
        return probe_socket_paths(&[PathBuf::from(provided)]).ok_or(InventoryError::SocketNotFound);
    }
    let candidates: Vec<PathBuf> = SOCKET_PATHS.iter().map(PathBuf::from).collect();
    probe_socket_paths(&candidates).ok_or(InventoryError::SocketNotFound)
}

fn probe_socket_paths(paths: &[PathBuf]) -> Option<PathBuf> {
    for path in paths {
        match std::fs::metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                info!(path = %path.display(), "found CRI socket");
                return Some(path.clone());
            }
            _ => {}
        }
    }
    None
}

async fn connect(socket_path: &Path) -> Result<RuntimeServiceClient<tonic::transport::Channel>, InventoryError> {
    let path = socket_path.to_path_buf();
    // The URI is ignored; the connector always dials the unix socket.
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(service_fn(move |_: Uri| {
            UnixStream::connect(path.clone())
        }))
        .await?;
    Ok(RuntimeServiceClient::new(channel))
}

/// Lists all ready sandboxes and resolves their pod identity and network
/// namespace. A per-sandbox status failure skips that sandbox; a malformed
/// info document keeps whatever parsed and defaults the rest.
pub async fn list_ready_sandboxes(socket_path: &Path) -> Result<Vec<SandboxRecord>, InventoryError> {
    let mut client = connect(socket_path).await?;

    let request = ListPodSandboxRequest {
        filter: Some(PodSandboxFilter {
            id: String::new(),
            state: Some(PodSandboxStateValue {
                state: SANDBOX_READY,
            }),
        }),
    };
    let response = client.list_pod_sandbox(request).await?.into_inner();

    let mut records = Vec::with_capacity(response.items.len());
    for sandbox in response.items {
        let status = match client
            .pod_sandbox_status(PodSandboxStatusRequest {
                pod_sandbox_id: sandbox.id.clone(),
                verbose: true,
            })
            .await
        {
            Ok(response) => response.into_inner(),
            Err(status) => {
                error!(sandbox = %sandbox.id, err = %status, "failed to get pod sandbox status");
                continue;
            }
        };

        let info: SandboxStatusInfo = match status.info.get("info") {
            Some(payload) => serde_json::from_str(payload).unwrap_or_else(|err| {
                warn!(sandbox = %sandbox.id, err = %err, "unable to decode CRI sandbox info");
                SandboxStatusInfo::default()
            }),
            None => {
                warn!(sandbox = %sandbox.id, "verbose status carried no info document");
                SandboxStatusInfo::default()
            }
        };

        let metadata = status
            .status
            .and_then(|s| s.metadata)
            .unwrap_or_default();

        records.push(SandboxRecord {
            pid: info.pid,
            netns_path: info.network_namespace_path(),
            netns_name: info.network_namespace_name(),
            name: metadata.name,
            namespace: metadata.namespace,
            pod_uid: metadata.uid,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_DOC: &str = r#"{
        "pid": 4242,
        "runtimeSpec": {
            "linux": {
                "namespaces": [
                    {"type": "pid"},
                    {"type": "network", "path": "/var/run/netns/cni-0b34"},
                    {"type": "ipc", "path": "/proc/4242/ns/ipc"}
                ]
            }
        }
    }"#;

    #[test]
    fn info_document_resolves_network_namespace() {
        let info: SandboxStatusInfo = serde_json::from_str(INFO_DOC).unwrap();
        assert_eq!(info.pid, 4242);
        assert_eq!(info.network_namespace_path(), "/var/run/netns/cni-0b34");
        assert_eq!(info.network_namespace_name(), "cni-0b34");
    }

    #[test]
    fn info_document_without_network_entry_is_host() {
        let info: SandboxStatusInfo =
            serde_json::from_str(r#"{"pid": 1, "runtimeSpec": {"linux": {"namespaces": []}}}"#)
                .unwrap();
        assert_eq!(info.network_namespace_path(), HOST_SENTINEL);
        assert_eq!(info.network_namespace_name(), HOST_SENTINEL);
    }

    #[test]
    fn separatorless_path_is_its_own_name() {
        let info: SandboxStatusInfo = serde_json::from_str(
            r#"{"runtimeSpec": {"linux": {"namespaces": [{"type": "network", "path": "nsname"}]}}}"#,
        )
        .unwrap();
        assert_eq!(info.network_namespace_name(), "nsname");
    }

    #[test]
    fn malformed_info_document_defaults_to_host() {
        let info: SandboxStatusInfo =
            serde_json::from_str("{not json").unwrap_or_default();
        assert_eq!(info.pid, 0);
        assert_eq!(info.network_namespace_path(), HOST_SENTINEL);
    }

    #[test]
    fn probe_skips_regular_files_and_finds_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not-a-socket.sock");
        std::fs::write(&file_path, b"").unwrap();
        let socket_path = dir.path().join("runtime.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket_path).unwrap();

        let missing = dir.path().join("missing.sock");
        let found = probe_socket_paths(&[missing, file_path, socket_path.clone()]);
        assert_eq!(found, Some(socket_path));
    }

    #[test]
    fn probe_with_no_candidates_is_none() {
        assert_eq!(probe_socket_paths(&[]), None);
    }

    #[test]
    fn host_record_uses_sentinels() {
        let host = SandboxRecord::host();
        assert_eq!(host.pid, 0);
        assert_eq!(host.netns_name, HOST_SENTINEL);
        assert_eq!(host.composed_name(), "HOST/");
    }
}
