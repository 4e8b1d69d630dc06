use crate::constants::KUBECONFIG;
use crate::infrastructure::models::provider::Kind as ProviderKind;
use crate::io_models::KsailIdentifier;
use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;
use strum_macros::EnumIter;

pub const CLUSTER_MANIFEST_API_VERSION: &str = "ksail.dev/v1alpha1";
pub const CLUSTER_MANIFEST_KIND: &str = "Cluster";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum Distribution {
    Vanilla,
    K3s,
    Talos,
    VCluster,
}

impl Distribution {
    /// VCluster nests inside a host cluster and provisions no control-plane
    /// node of its own.
    pub fn allows_zero_control_planes(&self) -> bool {
        matches!(self, Distribution::VCluster)
    }
}

impl Display for Distribution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Distribution::Vanilla => "vanilla",
            Distribution::K3s => "k3s",
            Distribution::Talos => "talos",
            Distribution::VCluster => "vcluster",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CniOption {
    #[default]
    Default,
    Cilium,
    Calico,
}

impl Display for CniOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CniOption::Default => "default",
            CniOption::Cilium => "cilium",
            CniOption::Calico => "calico",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CsiOption {
    #[default]
    Default,
    Enabled,
    LocalPathStorage,
}

impl Display for CsiOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CsiOption::Default => "default",
            CsiOption::Enabled => "enabled",
            CsiOption::LocalPathStorage => "local-path-storage",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricsServerOption {
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl Display for MetricsServerOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MetricsServerOption::Default => "default",
            MetricsServerOption::Enabled => "enabled",
            MetricsServerOption::Disabled => "disabled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadBalancerOption {
    #[default]
    Default,
    Enabled,
}

impl Display for LoadBalancerOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LoadBalancerOption::Default => "default",
            LoadBalancerOption::Enabled => "enabled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CertManagerOption {
    #[default]
    Disabled,
    Enabled,
}

impl Display for CertManagerOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CertManagerOption::Disabled => "disabled",
            CertManagerOption::Enabled => "enabled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolicyEngineOption {
    #[default]
    None,
    Kyverno,
    Gatekeeper,
}

impl Display for PolicyEngineOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PolicyEngineOption::None => "none",
            PolicyEngineOption::Kyverno => "kyverno",
            PolicyEngineOption::Gatekeeper => "gatekeeper",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GitOpsEngineOption {
    #[default]
    None,
    Flux,
    ArgoCD,
}

impl Display for GitOpsEngineOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GitOpsEngineOption::None => "none",
            GitOpsEngineOption::Flux => "flux",
            GitOpsEngineOption::ArgoCD => "argocd",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LocalRegistryOption {
    #[default]
    Disabled,
    /// A registry container provisioned next to the cluster on the Docker host.
    LocalDocker,
    /// A registry operated elsewhere; always reached over TLS.
    #[serde(rename_all = "camelCase")]
    External {
        host: String,
        #[serde(default)]
        path: String,
        #[serde(default)]
        creds_ref: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSpec {
    /// Host being mirrored, e.g. `docker.io`.
    pub host: String,
    /// Upstream URL the mirror proxies, e.g. `https://registry-1.docker.io`.
    pub upstream: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkloadSpec {
    pub source_directory: PathBuf,
    pub validate_on_push: bool,
}

/// Cloud placement options, only meaningful for the Hetzner provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudOptions {
    /// Ordered location candidates, primary first.
    pub locations: Vec<String>,
    pub server_type: String,
    pub allow_placement_fallback: bool,
    pub network_cidr: String,
}

impl Default for CloudOptions {
    fn default() -> Self {
        CloudOptions {
            locations: vec!["fsn1".to_string(), "nbg1".to_string(), "hel1".to_string()],
            server_type: "cx22".to_string(),
            allow_placement_fallback: true,
            network_cidr: "10.0.0.0/16".to_string(),
        }
    }
}

// ---------- ksail.yaml wire format ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: ManifestSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestSpec {
    pub distribution: Option<Distribution>,
    /// Path to the distribution-native config file (kind.yaml, k3d.yaml, ...).
    pub distribution_config: Option<String>,
    pub connection: ConnectionSpec,
    pub cluster: ClusterSpec,
    pub workload: WorkloadSpec,
    pub cloud: Option<CloudOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSpec {
    pub context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSpec {
    pub provider: Option<ProviderKind>,
    pub control_planes: Option<u32>,
    pub workers: Option<u32>,
    pub cni: CniOption,
    pub csi: CsiOption,
    pub metrics_server: MetricsServerOption,
    pub load_balancer: LoadBalancerOption,
    pub cert_manager: CertManagerOption,
    pub policy_engine: PolicyEngineOption,
    pub git_ops_engine: GitOpsEngineOption,
    pub local_registry: LocalRegistryOption,
    pub mirrors: Vec<MirrorSpec>,
    /// Readiness timeout override, e.g. `10m`.
    pub timeout: Option<String>,
}

// ---------- descriptor ----------

/// ClusterDescriptor: the user intent for one cluster, immutable for a given
/// invocation. Built from `ksail.yaml` at the boundary, the rest of the
/// engine never touches free-form YAML.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDescriptor {
    pub name: KsailIdentifier,
    pub distribution: Distribution,
    pub provider: ProviderKind,
    pub connection_context: String,
    pub kubeconfig_path: PathBuf,
    pub distribution_config_ref: Option<String>,
    pub control_planes: u32,
    pub workers: u32,
    pub cni: CniOption,
    pub csi: CsiOption,
    pub metrics_server: MetricsServerOption,
    pub load_balancer: LoadBalancerOption,
    pub cert_manager: CertManagerOption,
    pub policy_engine: PolicyEngineOption,
    pub gitops_engine: GitOpsEngineOption,
    pub local_registry: LocalRegistryOption,
    pub mirrors: Vec<MirrorSpec>,
    pub workload: WorkloadSpec,
    pub timeout_override: Option<Duration>,
    pub cloud: Option<CloudOptions>,
}

impl ClusterDescriptor {
    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        let manifest: ClusterManifest = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
        ClusterDescriptor::from_manifest(manifest)
    }

    pub fn from_manifest(manifest: ClusterManifest) -> Result<Self, String> {
        if manifest.api_version != CLUSTER_MANIFEST_API_VERSION {
            return Err(format!(
                "unsupported apiVersion `{}`, expected `{}`",
                manifest.api_version, CLUSTER_MANIFEST_API_VERSION
            ));
        }
        if manifest.kind != CLUSTER_MANIFEST_KIND {
            return Err(format!(
                "unsupported kind `{}`, expected `{}`",
                manifest.kind, CLUSTER_MANIFEST_KIND
            ));
        }

        let name = KsailIdentifier::new(manifest.metadata.name);
        let spec = manifest.spec;
        let distribution = spec.distribution.unwrap_or(Distribution::Vanilla);
        let cluster = spec.cluster;

        let timeout_override = match &cluster.timeout {
            None => None,
            Some(raw) => Some(duration_str::parse(raw).map_err(|e| format!("invalid timeout `{raw}`: {e}"))?),
        };

        let kubeconfig_path = spec
            .connection
            .kubeconfig
            .or_else(|| std::env::var(KUBECONFIG).ok().map(PathBuf::from))
            .unwrap_or_else(|| default_kubeconfig_path(&name));

        let connection_context = spec
            .connection
            .context
            .unwrap_or_else(|| default_connection_context(distribution, &name));

        let descriptor = ClusterDescriptor {
            name,
            distribution,
            provider: cluster.provider.unwrap_or(ProviderKind::Docker),
            connection_context,
            kubeconfig_path,
            distribution_config_ref: spec.distribution_config,
            control_planes: cluster
                .control_planes
                .unwrap_or(if distribution.allows_zero_control_planes() { 0 } else { 1 }),
            workers: cluster.workers.unwrap_or(0),
            cni: cluster.cni,
            csi: cluster.csi,
            metrics_server: cluster.metrics_server,
            load_balancer: cluster.load_balancer,
            cert_manager: cluster.cert_manager,
            policy_engine: cluster.policy_engine,
            gitops_engine: cluster.git_ops_engine,
            local_registry: cluster.local_registry,
            mirrors: cluster.mirrors,
            workload: spec.workload,
            timeout_override,
            cloud: spec.cloud,
        };

        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Checks the descriptor invariants. All violations are reported at once.
    pub fn validate(&self) -> Result<(), String> {
        let mut violations: Vec<String> = vec![];

        if self.control_planes == 0 && !self.distribution.allows_zero_control_planes() {
            violations.push(format!(
                "distribution `{}` requires at least one control plane",
                self.distribution
            ));
        }

        if self.provider.is_cloud() && matches!(self.local_registry, LocalRegistryOption::LocalDocker) {
            violations.push("cloud provider requires external registry".to_string());
        }

        let mut mirror_hosts: Vec<&str> = self.mirrors.iter().map(|m| m.host.as_str()).collect();
        mirror_hosts.sort_unstable();
        mirror_hosts.dedup();
        if mirror_hosts.len() != self.mirrors.len() {
            violations.push("mirror hosts must be unique".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations.join("; "))
        }
    }

    /// Docker network the cluster nodes live on, following each distribution's
    /// own naming rules.
    pub fn cluster_network_name(&self) -> String {
        match self.distribution {
            // kind puts every cluster on a shared bridge
            Distribution::Vanilla => "kind".to_string(),
            Distribution::K3s => format!("k3d-{}", self.name),
            Distribution::Talos => self.name.to_string(),
            Distribution::VCluster => format!("vcluster.{}", self.name),
        }
    }

    pub fn uses_custom_cni(&self) -> bool {
        !matches!(self.cni, CniOption::Default)
    }

    /// The kubelet CSR approver ships automatically when metrics-server is
    /// enabled, on every distribution except Talos which approves serving
    /// certs during bootstrap.
    pub fn requires_kubelet_csr_approver(&self) -> bool {
        self.metrics_server == MetricsServerOption::Enabled && self.distribution != Distribution::Talos
    }
}

fn default_kubeconfig_path(name: &KsailIdentifier) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kube")
        .join(format!("ksail-{name}.yaml"))
}

fn default_connection_context(distribution: Distribution, name: &KsailIdentifier) -> String {
    match distribution {
        Distribution::Vanilla => format!("kind-{name}"),
        Distribution::K3s => format!("k3d-{name}"),
        Distribution::Talos => format!("admin@{name}"),
        Distribution::VCluster => format!("vcluster_{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: K3s
  distributionConfig: k3d.yaml
  connection:
    kubeconfig: /tmp/demo-kubeconfig.yaml
  cluster:
    provider: Docker
    controlPlanes: 1
    workers: 2
    cni: Default
    metricsServer: Disabled
    gitOpsEngine: Flux
    localRegistry:
      type: localDocker
    mirrors:
      - host: docker.io
        upstream: https://registry-1.docker.io
  workload:
    sourceDirectory: ./k8s
    validateOnPush: true
"#;

    #[test]
    fn test_descriptor_from_yaml() {
        // execute:
        let descriptor = ClusterDescriptor::from_yaml(MANIFEST).expect("parsable manifest");

        // verify:
        assert_eq!("demo", descriptor.name.as_str());
        assert_eq!(Distribution::K3s, descriptor.distribution);
        assert_eq!(2, descriptor.workers);
        assert_eq!(MetricsServerOption::Disabled, descriptor.metrics_server);
        assert_eq!(GitOpsEngineOption::Flux, descriptor.gitops_engine);
        assert_eq!(LocalRegistryOption::LocalDocker, descriptor.local_registry);
        assert_eq!(1, descriptor.mirrors.len());
        assert_eq!("k3d-demo", descriptor.cluster_network_name());
    }

    #[test]
    fn test_rejects_wrong_api_version() {
        let raw = MANIFEST.replace("ksail.dev/v1alpha1", "ksail.dev/v1beta1");
        assert!(ClusterDescriptor::from_yaml(&raw).is_err());
    }

    #[test]
    fn test_validate_cloud_provider_with_local_registry() {
        // setup:
        let mut descriptor = ClusterDescriptor::from_yaml(MANIFEST).unwrap();
        descriptor.provider = ProviderKind::Hetzner;

        // execute:
        let res = descriptor.validate();

        // verify:
        assert!(res.unwrap_err().contains("cloud provider requires external registry"));
    }

    #[test]
    fn test_validate_control_planes() {
        // setup:
        let mut descriptor = ClusterDescriptor::from_yaml(MANIFEST).unwrap();
        descriptor.control_planes = 0;

        // execute & verify: k3s needs at least one server
        assert!(descriptor.validate().is_err());

        // vcluster allows zero
        descriptor.distribution = Distribution::VCluster;
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_network_names_per_distribution() {
        // setup:
        struct TestCase {
            distribution: Distribution,
            expected: &'static str,
        }

        let test_cases = vec![
            TestCase {
                distribution: Distribution::Vanilla,
                expected: "kind",
            },
            TestCase {
                distribution: Distribution::K3s,
                expected: "k3d-demo",
            },
            TestCase {
                distribution: Distribution::Talos,
                expected: "demo",
            },
            TestCase {
                distribution: Distribution::VCluster,
                expected: "vcluster.demo",
            },
        ];

        for tc in test_cases {
            // execute:
            let mut descriptor = ClusterDescriptor::from_yaml(MANIFEST).unwrap();
            descriptor.distribution = tc.distribution;

            // verify:
            assert_eq!(tc.expected, descriptor.cluster_network_name());
        }
    }

    #[test]
    fn test_kubelet_csr_approver_talos_exception() {
        let mut descriptor = ClusterDescriptor::from_yaml(MANIFEST).unwrap();
        descriptor.metrics_server = MetricsServerOption::Enabled;

        descriptor.distribution = Distribution::Vanilla;
        assert!(descriptor.requires_kubelet_csr_approver());

        descriptor.distribution = Distribution::Talos;
        assert!(!descriptor.requires_kubelet_csr_approver());
    }
}
