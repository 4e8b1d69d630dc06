use crate::cmd::command::CommandKiller;
use crate::cmd::docker::Docker;
use crate::cmd::kind::Kind;
use crate::infrastructure::models::distribution::{
    ClusterInfo, ClusterProvisioner, ProvisionTarget, ProvisionerError, abort_as_canceled,
};
use crate::infrastructure::models::provider::docker::DockerInfrastructureProvider;
use crate::infrastructure::models::provider::{InfrastructureProvider, NodeState, ProviderError};
use crate::infrastructure::registry::RegistryInfo;
use crate::io_models::cluster::Distribution;
use crate::io_models::distribution_config::{DistributionConfig, KindClusterConfig, KindNode};
use crate::io_models::update::Change;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Directory containerd reads per-host mirror declarations from.
const CONTAINERD_CERTS_DIR: &str = "/etc/containerd/certs.d";
const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Vanilla Kubernetes through kind. Nodes live on the shared `kind` bridge;
/// mirrors are declared per node through containerd hosts files after
/// creation.
pub struct VanillaProvisioner {
    kind: Kind,
    docker: Arc<Docker>,
    provider: DockerInfrastructureProvider,
}

impl VanillaProvisioner {
    pub fn new(docker: Arc<Docker>) -> Self {
        VanillaProvisioner {
            kind: Kind::new(vec![]),
            provider: DockerInfrastructureProvider::new(docker.clone()),
            docker,
        }
    }

    /// Writes the containerd hosts.toml of every mirror into every node.
    fn inject_mirror_hosts_dirs(
        &self,
        target: &ProvisionTarget,
        mirrors: &[RegistryInfo],
    ) -> Result<(), ProvisionerError> {
        if mirrors.is_empty() {
            return Ok(());
        }

        let nodes = self
            .kind
            .get_nodes(target.descriptor.name.as_str())
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        for node in nodes {
            for mirror in mirrors {
                let mirrored_host = match &mirror.mirror_of {
                    Some(host) => host,
                    None => continue,
                };
                let upstream = mirror.upstream.as_deref().unwrap_or_default();
                let host_dir = format!("{CONTAINERD_CERTS_DIR}/{mirrored_host}");
                let hosts_toml = format!(
                    "server = \"{upstream}\"\n\n[host.\"{}\"]\n  capabilities = [\"pull\", \"resolve\"]\n  skip_verify = true\n",
                    mirror.cluster_endpoint(),
                );
                let script = format!("mkdir -p {host_dir} && cat > {host_dir}/hosts.toml << 'EOF'\n{hosts_toml}EOF");

                self.docker
                    .exec_in_container(&node, &["sh", "-c", &script])
                    .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;
            }
        }

        Ok(())
    }

    fn write_config_file(config: &KindClusterConfig) -> Result<tempfile::NamedTempFile, ProvisionerError> {
        let yaml = config
            .to_yaml()
            .map_err(|e| ProvisionerError::InvalidConfig { message: e.to_string() })?;
        let mut file = tempfile::NamedTempFile::new().map_err(|e| ProvisionerError::CommandFailed {
            message: e.to_string(),
        })?;
        file.write_all(yaml.as_bytes())
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        Ok(file)
    }
}

impl ClusterProvisioner for VanillaProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::Vanilla
    }

    fn prepare_config(
        &self,
        target: &ProvisionTarget,
        config: &mut DistributionConfig,
    ) -> Result<(), ProvisionerError> {
        let kind_config = config.as_kind_mut().ok_or_else(|| ProvisionerError::InvalidConfig {
            message: "expected a kind cluster config".to_string(),
        })?;

        kind_config.ensure_node_counts(target.descriptor.control_planes, target.descriptor.workers);
        if !target.mirror_registries.is_empty() {
            kind_config.ensure_containerd_hosts_dir(CONTAINERD_CERTS_DIR);
        }

        Ok(())
    }

    fn create(&self, target: &ProvisionTarget, config: &DistributionConfig) -> Result<(), ProvisionerError> {
        abort_as_canceled(&target.abort)?;

        let kind_config = match config {
            DistributionConfig::Kind(c) => c,
            _ => {
                return Err(ProvisionerError::InvalidConfig {
                    message: "expected a kind cluster config".to_string(),
                });
            }
        };

        let config_file = Self::write_config_file(kind_config)?;
        let cmd_killer = CommandKiller::from(CREATE_TIMEOUT, target.abort.clone());

        self.kind
            .create_cluster(
                target.descriptor.name.as_str(),
                config_file.path(),
                &target.descriptor.kubeconfig_path,
                &cmd_killer,
            )
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        // Mirror declarations go in after the nodes exist.
        self.inject_mirror_hosts_dirs(target, target.mirror_registries)
    }

    fn delete(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        if !self.exists(target)? {
            return Err(ProvisionerError::ClusterNotFound {
                cluster: target.descriptor.name.to_string(),
            });
        }

        self.kind
            .delete_cluster(target.descriptor.name.as_str(), &target.descriptor.kubeconfig_path)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn start(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        match self.provider.start_nodes(&target.descriptor.name) {
            Ok(()) | Err(ProviderError::SkipAction) => Ok(()),
            Err(e) => Err(ProvisionerError::CommandFailed { message: e.to_string() }),
        }
    }

    fn stop(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        match self.provider.stop_nodes(&target.descriptor.name) {
            Ok(()) | Err(ProviderError::SkipAction) => Ok(()),
            Err(e) => Err(ProvisionerError::CommandFailed { message: e.to_string() }),
        }
    }

    fn list(&self) -> Result<Vec<ClusterInfo>, ProvisionerError> {
        let clusters = self
            .kind
            .get_clusters()
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        let mut infos = vec![];
        for name in clusters {
            let running = self
                .provider
                .list_nodes(&crate::io_models::KsailIdentifier::new(name.clone()))
                .map(|nodes| nodes.iter().any(|n| n.state == NodeState::Running))
                .unwrap_or(false);
            infos.push(ClusterInfo {
                name,
                distribution: Distribution::Vanilla,
                running,
            });
        }

        Ok(infos)
    }

    fn exists(&self, target: &ProvisionTarget) -> Result<bool, ProvisionerError> {
        let clusters = self
            .kind
            .get_clusters()
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        Ok(clusters.iter().any(|c| c == target.descriptor.name.as_str()))
    }

    fn update(&self, _target: &ProvisionTarget, change: &Change) -> Result<(), ProvisionerError> {
        Err(ProvisionerError::Unsupported {
            operation: format!("update {}", change.field),
            distribution: Distribution::Vanilla,
        })
    }

    fn current_config(&self, target: &ProvisionTarget) -> Result<DistributionConfig, ProvisionerError> {
        let nodes = self
            .kind
            .get_nodes(target.descriptor.name.as_str())
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        let mut config = KindClusterConfig {
            name: Some(target.descriptor.name.to_string()),
            ..Default::default()
        };
        for node in nodes {
            config.nodes.push(KindNode {
                role: if node.contains("control-plane") {
                    "control-plane".to_string()
                } else {
                    "worker".to_string()
                },
            });
        }

        Ok(DistributionConfig::Kind(config))
    }

    fn diff_config(
        &self,
        target: &ProvisionTarget,
        desired: &DistributionConfig,
    ) -> Result<Vec<String>, ProvisionerError> {
        let current = match self.current_config(target)? {
            DistributionConfig::Kind(c) => c,
            _ => unreachable!("vanilla current_config always yields a kind config"),
        };
        let desired = match desired {
            DistributionConfig::Kind(c) => c,
            _ => {
                return Err(ProvisionerError::InvalidConfig {
                    message: "expected a kind cluster config".to_string(),
                });
            }
        };

        let mut diffs = vec![];
        let count =
            |nodes: &[KindNode], role: &str| -> usize { nodes.iter().filter(|n| n.role == role).count() };
        if count(&current.nodes, "control-plane") != count(&desired.nodes, "control-plane") {
            diffs.push(format!(
                "control-plane nodes: {} -> {}",
                count(&current.nodes, "control-plane"),
                count(&desired.nodes, "control-plane")
            ));
        }
        if count(&current.nodes, "worker") != count(&desired.nodes, "worker") {
            diffs.push(format!(
                "worker nodes: {} -> {}",
                count(&current.nodes, "worker"),
                count(&desired.nodes, "worker")
            ));
        }

        Ok(diffs)
    }
}
