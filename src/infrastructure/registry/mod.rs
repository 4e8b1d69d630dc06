use crate::cmd::docker::{ContainerRunOpts, ContainerState, Docker, DockerError};
use crate::constants::{KSAIL_CLUSTER_NAME_LABEL, KSAIL_OWNED_LABEL, KSAIL_REGISTRY_UPSTREAM_LABEL};
use crate::errors::CommandError;
use crate::infrastructure::models::provider::docker::NODE_LABEL_KEYS;
use crate::io_models::KsailIdentifier;
use crate::io_models::cluster::MirrorSpec;
use crate::services::oci::OciRegistryClient;
use std::collections::{BTreeSet, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use url::Url;

/// Image used for local and mirror registries.
pub const REGISTRY_IMAGE: &str = "registry:3";
/// Container-side port of the registry API.
pub const REGISTRY_CONTAINER_PORT: u16 = 5000;
/// First host port candidate of the deterministic scan.
pub const REGISTRY_BASE_PORT: u16 = 5000;
/// Upper bound of the port scan.
const REGISTRY_PORT_SCAN_END: u16 = 5999;
/// Label carrying the allocated host port, read back on reuse.
const KSAIL_REGISTRY_PORT_LABEL: &str = "ksail.registry.port";

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error("no free host port between {base} and {end}")]
    NoFreePort { base: u16, end: u16 },

    #[error("registry `{name}` exists with upstream `{existing}`, requested `{requested}`")]
    UpstreamMismatch {
        name: String,
        existing: String,
        requested: String,
    },
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        CommandError::new("Registry error".to_string(), Some(err.to_string()), None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryStatus {
    NotProvisioned,
    Created,
    Running,
    Stopped,
}

impl Display for RegistryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RegistryStatus::NotProvisioned => "not-provisioned",
            RegistryStatus::Created => "created",
            RegistryStatus::Running => "running",
            RegistryStatus::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatusReport {
    pub status: RegistryStatus,
    pub port: Option<u16>,
    pub endpoint: Option<String>,
}

/// Derived registry facts the rest of the engine consumes read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub network: Option<String>,
    pub upstream: Option<String>,
    /// Image host this registry mirrors (e.g. `docker.io`), None for the
    /// cluster-local registry.
    pub mirror_of: Option<String>,
    pub insecure: bool,
    pub creds_ref: Option<String>,
}

impl RegistryInfo {
    /// A registry operated elsewhere, built from the descriptor's external
    /// declaration. External registries are always reached over TLS.
    pub fn new_external(host: String, creds_ref: Option<String>) -> RegistryInfo {
        RegistryInfo {
            name: host.clone(),
            host,
            port: 443,
            network: None,
            upstream: None,
            mirror_of: None,
            insecure: false,
            creds_ref,
        }
    }

    pub fn local_registry_name(cluster: &KsailIdentifier) -> String {
        format!("{cluster}-local-registry")
    }

    pub fn mirror_registry_name(cluster: &KsailIdentifier, host: &str) -> String {
        format!("{cluster}-{}", host.replace(['.', ':'], "-"))
    }

    /// Endpoint as reachable from the host.
    pub fn host_endpoint(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Endpoint as reachable from inside the cluster network, where the
    /// container name resolves and the container port applies.
    pub fn cluster_endpoint(&self) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{scheme}://{}:{}", self.name, REGISTRY_CONTAINER_PORT)
    }
}

/// PortPlanner: deterministic host-port allocation from 5000 upward, skipping
/// ports bound in Docker and ports already handed out in the same planning
/// pass. Thread-safe so concurrent allocations stay distinct.
#[derive(Default)]
pub struct PortPlanner {
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortPlanner {
    pub fn new() -> Self {
        PortPlanner {
            reserved: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn allocate(&self, ports_in_use: &HashSet<u16>) -> Result<u16, RegistryError> {
        let mut reserved = self.reserved.lock().unwrap_or_else(|e| e.into_inner());
        for candidate in REGISTRY_BASE_PORT..=REGISTRY_PORT_SCAN_END {
            if ports_in_use.contains(&candidate) || reserved.contains(&candidate) {
                continue;
            }
            reserved.insert(candidate);
            return Ok(candidate);
        }

        Err(RegistryError::NoFreePort {
            base: REGISTRY_BASE_PORT,
            end: REGISTRY_PORT_SCAN_END,
        })
    }

    /// A port observed on an existing container counts as used for the rest
    /// of the pass.
    pub fn mark_reserved(&self, port: u16) {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner()).insert(port);
    }
}

/// CRUD over registry containers backed by the Docker daemon.
pub trait RegistryService: Send + Sync {
    fn provision_local_registry(
        &self,
        cluster: &KsailIdentifier,
        network: Option<&str>,
    ) -> Result<RegistryInfo, RegistryError>;

    fn provision_mirror_registry(
        &self,
        cluster: &KsailIdentifier,
        mirror: &MirrorSpec,
        network: Option<&str>,
    ) -> Result<RegistryInfo, RegistryError>;

    fn status(&self, name: &str) -> Result<RegistryStatusReport, RegistryError>;

    /// True when the registry serves at least one running container of
    /// another cluster on one of its networks.
    fn is_in_use(&self, name: &str, by_cluster: &KsailIdentifier) -> Result<bool, RegistryError>;

    fn remove_registry(&self, name: &str, delete_volumes: bool) -> Result<(), RegistryError>;

    /// HTTP probe of the registry API from the host.
    fn endpoint_reachable(&self, info: &RegistryInfo) -> bool;
}

pub struct DockerRegistryService {
    docker: Arc<Docker>,
    port_planner: PortPlanner,
}

impl DockerRegistryService {
    pub fn new(docker: Arc<Docker>) -> Self {
        DockerRegistryService {
            docker,
            port_planner: PortPlanner::new(),
        }
    }

    fn reuse_existing(
        &self,
        name: &str,
        cluster_network: Option<&str>,
        requested_upstream: Option<&str>,
        mirror_of: Option<&str>,
    ) -> Result<Option<RegistryInfo>, RegistryError> {
        if !self.docker.container_exists(name)? {
            return Ok(None);
        }

        let labels = self.docker.container_labels(name)?;
        let existing_upstream = labels.get(KSAIL_REGISTRY_UPSTREAM_LABEL).cloned();
        if existing_upstream.as_deref() != requested_upstream {
            return Err(RegistryError::UpstreamMismatch {
                name: name.to_string(),
                existing: existing_upstream.unwrap_or_else(|| "<none>".to_string()),
                requested: requested_upstream.unwrap_or("<none>").to_string(),
            });
        }

        if self.docker.container_state(name)? != Some(ContainerState::Running) {
            self.docker.start_container(name)?;
        }

        let port = labels
            .get(KSAIL_REGISTRY_PORT_LABEL)
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(REGISTRY_BASE_PORT);
        self.port_planner.mark_reserved(port);

        Ok(Some(RegistryInfo {
            name: name.to_string(),
            host: "localhost".to_string(),
            port,
            network: cluster_network.map(|n| n.to_string()),
            upstream: requested_upstream.map(|u| u.to_string()),
            mirror_of: mirror_of.map(|h| h.to_string()),
            insecure: true,
            creds_ref: None,
        }))
    }

    fn provision(
        &self,
        cluster: &KsailIdentifier,
        name: &str,
        network: Option<&str>,
        upstream: Option<&str>,
        mirror_of: Option<&str>,
    ) -> Result<RegistryInfo, RegistryError> {
        if let Some(existing) = self.reuse_existing(name, network, upstream, mirror_of)? {
            return Ok(existing);
        }

        let ports_in_use = self.docker.used_host_ports()?;
        let port = self.port_planner.allocate(&ports_in_use)?;

        let mut labels = std::collections::BTreeMap::new();
        labels.insert(KSAIL_OWNED_LABEL.to_string(), "true".to_string());
        labels.insert(KSAIL_CLUSTER_NAME_LABEL.to_string(), cluster.to_string());
        labels.insert(KSAIL_REGISTRY_PORT_LABEL.to_string(), port.to_string());

        let mut envs = vec![];
        if let Some(upstream) = upstream {
            labels.insert(KSAIL_REGISTRY_UPSTREAM_LABEL.to_string(), upstream.to_string());
            envs.push(("REGISTRY_PROXY_REMOTEURL".to_string(), upstream.to_string()));
        }

        self.docker.run_container(&ContainerRunOpts {
            name: name.to_string(),
            image: REGISTRY_IMAGE.to_string(),
            network: network.map(|n| n.to_string()),
            port_binding: Some((port, REGISTRY_CONTAINER_PORT)),
            envs,
            labels,
            volumes: vec![],
            restart_unless_stopped: true,
        })?;

        Ok(RegistryInfo {
            name: name.to_string(),
            host: "localhost".to_string(),
            port,
            network: network.map(|n| n.to_string()),
            upstream: upstream.map(|u| u.to_string()),
            mirror_of: mirror_of.map(|h| h.to_string()),
            insecure: true,
            creds_ref: None,
        })
    }
}

impl RegistryService for DockerRegistryService {
    fn provision_local_registry(
        &self,
        cluster: &KsailIdentifier,
        network: Option<&str>,
    ) -> Result<RegistryInfo, RegistryError> {
        let name = RegistryInfo::local_registry_name(cluster);
        self.provision(cluster, &name, network, None, None)
    }

    fn provision_mirror_registry(
        &self,
        cluster: &KsailIdentifier,
        mirror: &MirrorSpec,
        network: Option<&str>,
    ) -> Result<RegistryInfo, RegistryError> {
        let name = RegistryInfo::mirror_registry_name(cluster, &mirror.host);
        self.provision(cluster, &name, network, Some(&mirror.upstream), Some(&mirror.host))
    }

    fn status(&self, name: &str) -> Result<RegistryStatusReport, RegistryError> {
        if !self.docker.container_exists(name)? {
            return Ok(RegistryStatusReport {
                status: RegistryStatus::NotProvisioned,
                port: None,
                endpoint: None,
            });
        }

        let labels = self.docker.container_labels(name)?;
        let port = labels
            .get(KSAIL_REGISTRY_PORT_LABEL)
            .and_then(|p| p.parse::<u16>().ok());

        let status = match self.docker.container_state(name)? {
            Some(ContainerState::Running) => RegistryStatus::Running,
            Some(ContainerState::Created) => RegistryStatus::Created,
            Some(_) => RegistryStatus::Stopped,
            None => RegistryStatus::NotProvisioned,
        };

        let endpoint = match (status, port) {
            (RegistryStatus::Running, Some(port)) => Some(format!("http://localhost:{port}")),
            _ => None,
        };

        Ok(RegistryStatusReport { status, port, endpoint })
    }

    fn is_in_use(&self, name: &str, by_cluster: &KsailIdentifier) -> Result<bool, RegistryError> {
        for network in self.docker.container_networks(name)? {
            if network == "bridge" {
                continue;
            }
            for container in self.docker.network_containers(&network)? {
                if container == name {
                    continue;
                }
                let labels = self.docker.container_labels(&container)?;
                let owner = NODE_LABEL_KEYS.iter().find_map(|key| labels.get(*key));
                if let Some(owner) = owner {
                    let running = self.docker.container_state(&container)? == Some(ContainerState::Running);
                    if running && owner != by_cluster.as_str() {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    fn remove_registry(&self, name: &str, delete_volumes: bool) -> Result<(), RegistryError> {
        if !self.docker.container_exists(name)? {
            return Ok(());
        }

        self.docker.remove_container(name, delete_volumes)?;
        Ok(())
    }

    fn endpoint_reachable(&self, info: &RegistryInfo) -> bool {
        let endpoint = match Url::parse(&info.host_endpoint()) {
            Ok(endpoint) => endpoint,
            Err(_) => return false,
        };

        match OciRegistryClient::new(endpoint) {
            Ok(client) => client.ping().unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_registry_names() {
        // setup:
        let cluster = KsailIdentifier::from("demo");

        // execute & verify:
        assert_eq!("demo-local-registry", RegistryInfo::local_registry_name(&cluster));
        assert_eq!(
            "demo-docker-io",
            RegistryInfo::mirror_registry_name(&cluster, "docker.io")
        );
    }

    #[test]
    fn test_port_planner_skips_bound_and_reserved_ports() {
        // setup:
        let planner = PortPlanner::new();
        let mut in_use = HashSet::new();
        in_use.insert(5000);
        in_use.insert(5002);

        // execute:
        let first = planner.allocate(&in_use).unwrap();
        let second = planner.allocate(&in_use).unwrap();

        // verify: 5000 and 5002 skipped, planner never re-hands 5001
        assert_eq!(5001, first);
        assert_eq!(5003, second);
    }

    #[test]
    fn test_port_planner_concurrent_allocations_are_distinct() {
        // setup:
        let planner = Arc::new(PortPlanner::new());
        let in_use = HashSet::new();

        // execute: eight concurrent allocations in one planning pass
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let planner = planner.clone();
                let in_use = in_use.clone();
                thread::spawn(move || planner.allocate(&in_use).unwrap())
            })
            .collect();
        let mut ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // verify:
        ports.sort_unstable();
        let mut deduped = ports.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), ports.len(), "allocated ports must be distinct: {ports:?}");
    }

    #[test]
    fn test_registry_endpoints() {
        // setup:
        let info = RegistryInfo {
            name: "demo-local-registry".to_string(),
            host: "localhost".to_string(),
            port: 5001,
            network: Some("k3d-demo".to_string()),
            upstream: None,
            mirror_of: None,
            insecure: true,
            creds_ref: None,
        };

        // execute & verify:
        assert_eq!("http://localhost:5001", info.host_endpoint());
        assert_eq!("http://demo-local-registry:5000", info.cluster_endpoint());
    }

    #[test]
    fn test_external_registry_is_never_insecure() {
        // setup:
        let info = RegistryInfo::new_external("registry.example.com".to_string(), Some("REGISTRY_CREDS".to_string()));

        // execute & verify:
        assert!(!info.insecure);
        assert_eq!("https://registry.example.com:443", info.host_endpoint());
        assert_eq!(Some("REGISTRY_CREDS".to_string()), info.creds_ref);
    }
}
