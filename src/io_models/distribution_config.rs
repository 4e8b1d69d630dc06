use crate::io_models::cluster::{ClusterDescriptor, Distribution, MirrorSpec};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Node filter K3d applies a server-side extra arg to.
pub const K3D_SERVER_NODE_FILTER: &str = "server:*";
/// K3s flag disabling the bundled metrics-server addon.
pub const K3S_DISABLE_METRICS_SERVER_ARG: &str = "--disable=metrics-server";
/// Kubelet flag making Talos nodes request serving-cert rotation.
pub const TALOS_KUBELET_CERT_ROTATION_ARG: &str = "rotate-server-certificates";

/// DistributionConfig: tagged per-distribution config. The orchestrator holds
/// it opaquely; only the matching provisioner reads or mutates it, and only
/// before cluster creation.
#[derive(Debug, Clone, PartialEq)]
pub enum DistributionConfig {
    Kind(KindClusterConfig),
    K3d(K3dSimpleConfig),
    Talos(TalosConfig),
    VCluster(VclusterConfig),
}

impl DistributionConfig {
    /// Loads the distribution config for a descriptor: parses the referenced
    /// file when given, otherwise derives a default from the descriptor.
    pub fn load(descriptor: &ClusterDescriptor) -> Result<DistributionConfig, String> {
        let raw = match &descriptor.distribution_config_ref {
            Some(config_ref) => match fs::read_to_string(Path::new(config_ref)) {
                Ok(raw) => Some(raw),
                Err(e) => return Err(format!("cannot read `{config_ref}`: {e}")),
            },
            None => None,
        };

        match descriptor.distribution {
            Distribution::Vanilla => {
                let mut config = match raw {
                    Some(raw) => serde_yaml::from_str::<KindClusterConfig>(&raw).map_err(|e| e.to_string())?,
                    None => KindClusterConfig::default(),
                };
                config.name = Some(descriptor.name.to_string());
                config.ensure_node_counts(descriptor.control_planes, descriptor.workers);
                Ok(DistributionConfig::Kind(config))
            }
            Distribution::K3s => {
                let mut config = match raw {
                    Some(raw) => serde_yaml::from_str::<K3dSimpleConfig>(&raw).map_err(|e| e.to_string())?,
                    None => K3dSimpleConfig::default(),
                };
                config.metadata.name = descriptor.name.to_string();
                if config.servers == 0 {
                    config.servers = descriptor.control_planes.max(1);
                }
                if config.agents == 0 {
                    config.agents = descriptor.workers;
                }
                Ok(DistributionConfig::K3d(config))
            }
            Distribution::Talos => {
                let config = match raw {
                    Some(raw) => serde_yaml::from_str::<TalosConfig>(&raw).map_err(|e| e.to_string())?,
                    None => TalosConfig::default(),
                };
                Ok(DistributionConfig::Talos(config))
            }
            Distribution::VCluster => {
                let config = match raw {
                    Some(raw) => VclusterConfig {
                        values: serde_yaml::from_str(&raw).map_err(|e| e.to_string())?,
                    },
                    None => VclusterConfig::default(),
                };
                Ok(DistributionConfig::VCluster(config))
            }
        }
    }

    pub fn as_kind_mut(&mut self) -> Option<&mut KindClusterConfig> {
        match self {
            DistributionConfig::Kind(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_k3d_mut(&mut self) -> Option<&mut K3dSimpleConfig> {
        match self {
            DistributionConfig::K3d(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_talos_mut(&mut self) -> Option<&mut TalosConfig> {
        match self {
            DistributionConfig::Talos(c) => Some(c),
            _ => None,
        }
    }
}

// ---------- kind ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindClusterConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<KindNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containerd_config_patches: Vec<String>,
}

impl Default for KindClusterConfig {
    fn default() -> Self {
        KindClusterConfig {
            api_version: "kind.x-k8s.io/v1alpha4".to_string(),
            kind: "Cluster".to_string(),
            name: None,
            nodes: vec![],
            containerd_config_patches: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindNode {
    pub role: String,
}

impl KindClusterConfig {
    /// Aligns the node list with the requested control-plane and worker
    /// counts, keeping any explicitly declared nodes when counts match.
    pub fn ensure_node_counts(&mut self, control_planes: u32, workers: u32) {
        let current_cp = self.nodes.iter().filter(|n| n.role == "control-plane").count() as u32;
        let current_workers = self.nodes.iter().filter(|n| n.role == "worker").count() as u32;
        if current_cp == control_planes && current_workers == workers {
            return;
        }

        self.nodes.clear();
        for _ in 0..control_planes {
            self.nodes.push(KindNode {
                role: "control-plane".to_string(),
            });
        }
        for _ in 0..workers {
            self.nodes.push(KindNode {
                role: "worker".to_string(),
            });
        }
    }

    /// Points containerd at a hosts directory so mirror registries resolve;
    /// appended only once.
    pub fn ensure_containerd_hosts_dir(&mut self, hosts_dir: &str) {
        let patch = format!(
            "[plugins.\"io.containerd.grpc.v1.cri\".registry]\n  config_path = \"{hosts_dir}\""
        );
        if !self.containerd_config_patches.contains(&patch) {
            self.containerd_config_patches.push(patch);
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

// ---------- k3d ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K3dSimpleConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: K3dMetadata,
    #[serde(default)]
    pub servers: u32,
    #[serde(default)]
    pub agents: u32,
    #[serde(default)]
    pub options: K3dOptions,
    #[serde(default, skip_serializing_if = "K3dRegistries::is_empty")]
    pub registries: K3dRegistries,
}

impl Default for K3dSimpleConfig {
    fn default() -> Self {
        K3dSimpleConfig {
            api_version: "k3d.io/v1alpha5".to_string(),
            kind: "Simple".to_string(),
            metadata: K3dMetadata { name: String::new() },
            servers: 0,
            agents: 0,
            options: K3dOptions::default(),
            registries: K3dRegistries::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct K3dMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct K3dOptions {
    #[serde(default)]
    pub k3s: K3dK3sOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K3dK3sOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<K3dExtraArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K3dExtraArg {
    pub arg: String,
    pub node_filters: Vec<String>,
}

/// The k3d `registries` block; `use` connects pre-existing registries
/// natively during cluster create.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct K3dRegistries {
    #[serde(default, rename = "use", skip_serializing_if = "Vec::is_empty")]
    pub use_registries: Vec<String>,
}

impl K3dRegistries {
    fn is_empty(&self) -> bool {
        self.use_registries.is_empty()
    }
}

impl K3dSimpleConfig {
    /// Appends a K3s server extra arg with the `server:*` node filter,
    /// only if absent; safe to call on every create.
    pub fn ensure_server_extra_arg(&mut self, arg: &str) {
        let already_present = self.options.k3s.extra_args.iter().any(|e| e.arg == arg);
        if already_present {
            return;
        }

        self.options.k3s.extra_args.push(K3dExtraArg {
            arg: arg.to_string(),
            node_filters: vec![K3D_SERVER_NODE_FILTER.to_string()],
        });
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

// ---------- talos ----------

/// In-memory Talos machine-config patch. Serialized as a strategic-merge
/// patch handed to `talosctl cluster create`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TalosConfig {
    #[serde(default)]
    pub machine: TalosMachine,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TalosMachine {
    #[serde(default)]
    pub kubelet: TalosKubelet,
    #[serde(default, skip_serializing_if = "TalosRegistries::is_empty")]
    pub registries: TalosRegistries,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalosKubelet {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TalosRegistries {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mirrors: BTreeMap<String, TalosMirror>,
}

impl TalosRegistries {
    fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TalosMirror {
    pub endpoints: Vec<String>,
}

impl TalosConfig {
    /// Kubelet serving-cert rotation, required for metrics-server to pass TLS
    /// verification against Talos kubelets. Idempotent.
    pub fn ensure_kubelet_cert_rotation(&mut self) {
        self.machine
            .kubelet
            .extra_args
            .insert(TALOS_KUBELET_CERT_ROTATION_ARG.to_string(), "true".to_string());
    }

    pub fn has_kubelet_cert_rotation(&self) -> bool {
        self.machine
            .kubelet
            .extra_args
            .get(TALOS_KUBELET_CERT_ROTATION_ARG)
            .is_some_and(|v| v == "true")
    }

    /// Merges a mirror endpoint for a host; endpoints are deduplicated.
    pub fn merge_mirror(&mut self, host: &str, endpoint: &str) {
        let mirror = self.machine.registries.mirrors.entry(host.to_string()).or_default();
        if !mirror.endpoints.iter().any(|e| e == endpoint) {
            mirror.endpoints.push(endpoint.to_string());
        }
    }

    /// Merges mirror blocks from both the descriptor and an on-disk overlay.
    pub fn merge_mirrors(&mut self, declared: &[MirrorSpec], overlay: &TalosConfig) {
        for (host, mirror) in &overlay.machine.registries.mirrors {
            for endpoint in &mirror.endpoints {
                self.merge_mirror(host, endpoint);
            }
        }
        for spec in declared {
            self.merge_mirror(&spec.host, &spec.upstream);
        }
    }

    pub fn to_patch_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

// ---------- vcluster ----------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VclusterConfig {
    /// Free-form vcluster.yaml values; vcluster owns the schema.
    pub values: serde_yaml::Value,
}

impl VclusterConfig {
    pub fn to_values_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k3d_extra_arg_appended_only_once() {
        // setup:
        let mut config = K3dSimpleConfig::default();

        // execute: two consecutive creates both run the pre-create tweak
        config.ensure_server_extra_arg(K3S_DISABLE_METRICS_SERVER_ARG);
        config.ensure_server_extra_arg(K3S_DISABLE_METRICS_SERVER_ARG);

        // verify:
        assert_eq!(1, config.options.k3s.extra_args.len());
        assert_eq!(K3S_DISABLE_METRICS_SERVER_ARG, config.options.k3s.extra_args[0].arg);
        assert_eq!(vec![K3D_SERVER_NODE_FILTER.to_string()], config.options.k3s.extra_args[0].node_filters);
    }

    #[test]
    fn test_talos_kubelet_cert_rotation_is_idempotent() {
        // setup:
        let mut config = TalosConfig::default();
        assert!(!config.has_kubelet_cert_rotation());

        // execute:
        config.ensure_kubelet_cert_rotation();
        config.ensure_kubelet_cert_rotation();

        // verify:
        assert!(config.has_kubelet_cert_rotation());
        assert_eq!(1, config.machine.kubelet.extra_args.len());
    }

    #[test]
    fn test_talos_mirror_merge_from_overlay_and_descriptor() {
        // setup:
        let mut overlay = TalosConfig::default();
        overlay.merge_mirror("ghcr.io", "http://mirror:5001");

        let declared = vec![MirrorSpec {
            host: "docker.io".to_string(),
            upstream: "https://registry-1.docker.io".to_string(),
        }];

        // execute:
        let mut config = TalosConfig::default();
        config.merge_mirrors(&declared, &overlay);
        // merging again must not duplicate endpoints
        config.merge_mirrors(&declared, &overlay);

        // verify:
        assert_eq!(2, config.machine.registries.mirrors.len());
        assert_eq!(
            vec!["http://mirror:5001".to_string()],
            config.machine.registries.mirrors["ghcr.io"].endpoints
        );
        assert_eq!(
            vec!["https://registry-1.docker.io".to_string()],
            config.machine.registries.mirrors["docker.io"].endpoints
        );
    }

    #[test]
    fn test_kind_node_counts() {
        // setup:
        let mut config = KindClusterConfig::default();

        // execute:
        config.ensure_node_counts(1, 2);

        // verify:
        assert_eq!(3, config.nodes.len());
        assert_eq!(1, config.nodes.iter().filter(|n| n.role == "control-plane").count());
        assert_eq!(2, config.nodes.iter().filter(|n| n.role == "worker").count());
    }

    #[test]
    fn test_kind_containerd_hosts_dir_appended_once() {
        let mut config = KindClusterConfig::default();
        config.ensure_containerd_hosts_dir("/etc/containerd/certs.d");
        config.ensure_containerd_hosts_dir("/etc/containerd/certs.d");
        assert_eq!(1, config.containerd_config_patches.len());
    }

    #[test]
    fn test_k3d_yaml_round_trip_keeps_extra_args() {
        // setup:
        let mut config = K3dSimpleConfig::default();
        config.metadata.name = "demo".to_string();
        config.servers = 1;
        config.agents = 2;
        config.ensure_server_extra_arg(K3S_DISABLE_METRICS_SERVER_ARG);

        // execute:
        let yaml = config.to_yaml().unwrap();
        let parsed: K3dSimpleConfig = serde_yaml::from_str(&yaml).unwrap();

        // verify:
        assert_eq!(config, parsed);
        assert!(yaml.contains("--disable=metrics-server"));
    }
}
