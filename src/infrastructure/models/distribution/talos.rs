use crate::cmd::command::CommandKiller;
use crate::cmd::docker::Docker;
use crate::cmd::talosctl::{TalosClusterCreateOpts, Talosctl};
use crate::infrastructure::models::distribution::{
    ClusterInfo, ClusterProvisioner, ProvisionTarget, ProvisionerError, abort_as_canceled,
};
use crate::infrastructure::models::provider::docker::DockerInfrastructureProvider;
use crate::infrastructure::models::provider::{InfrastructureProvider, ProviderError};
use crate::infrastructure::network::TALOS_NETWORK_CIDR;
use crate::io_models::cluster::{Distribution, MetricsServerOption};
use crate::io_models::distribution_config::{DistributionConfig, TalosConfig};
use crate::io_models::update::Change;
use std::sync::Arc;
use std::time::Duration;

const CREATE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Talos in Docker through talosctl. Mirrors are wired during creation, the
/// kubelet cert-rotation patch is merged into the in-memory config before.
pub struct TalosProvisioner {
    talosctl: Talosctl,
    docker: Arc<Docker>,
    provider: DockerInfrastructureProvider,
}

impl TalosProvisioner {
    pub fn new(docker: Arc<Docker>) -> Self {
        TalosProvisioner {
            talosctl: Talosctl::new(vec![]),
            provider: DockerInfrastructureProvider::new(docker.clone()),
            docker,
        }
    }
}

impl ClusterProvisioner for TalosProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::Talos
    }

    fn prepare_config(
        &self,
        target: &ProvisionTarget,
        config: &mut DistributionConfig,
    ) -> Result<(), ProvisionerError> {
        patch_talos_config(target, config)
    }

    fn create(&self, target: &ProvisionTarget, config: &DistributionConfig) -> Result<(), ProvisionerError> {
        abort_as_canceled(&target.abort)?;

        let talos_config = match config {
            DistributionConfig::Talos(c) => c,
            _ => {
                return Err(ProvisionerError::InvalidConfig {
                    message: "expected a talos config".to_string(),
                });
            }
        };

        let patch = talos_config
            .to_patch_yaml()
            .map_err(|e| ProvisionerError::InvalidConfig { message: e.to_string() })?;

        let registry_mirrors = target
            .mirror_registries
            .iter()
            .filter_map(|m| m.mirror_of.as_ref().map(|host| (host.clone(), m.cluster_endpoint())))
            .collect();

        let opts = TalosClusterCreateOpts {
            name: target.descriptor.name.to_string(),
            controlplanes: target.descriptor.control_planes,
            workers: target.descriptor.workers,
            cidr: Some(TALOS_NETWORK_CIDR.to_string()),
            config_patches: vec![patch],
            registry_mirrors,
            kubeconfig_path: Some(target.descriptor.kubeconfig_path.to_string_lossy().to_string()),
        };

        let cmd_killer = CommandKiller::from(CREATE_TIMEOUT, target.abort.clone());

        self.talosctl
            .cluster_create(&opts, &cmd_killer)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        self.talosctl
            .kubeconfig(
                target.descriptor.name.as_str(),
                &target.descriptor.kubeconfig_path.to_string_lossy(),
            )
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn delete(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        if !self.exists(target)? {
            return Err(ProvisionerError::ClusterNotFound {
                cluster: target.descriptor.name.to_string(),
            });
        }

        self.talosctl
            .cluster_destroy(target.descriptor.name.as_str())
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
        let containers = self
            .docker
            .list_containers_with_label("talos.cluster.name")
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        let mut clusters: Vec<String> = vec![];
        for container in containers {
            let labels = self
                .docker
                .container_labels(&container)
                .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;
            if let Some(cluster) = labels.get("talos.cluster.name") {
                clusters.push(cluster.clone());
            }
        }
        clusters.sort_unstable();
        clusters.dedup();

        let mut infos = vec![];
        for name in clusters {
            let running = self
                .provider
                .list_nodes(&crate::io_models::KsailIdentifier::new(name.clone()))
                .map(|nodes| {
                    nodes
                        .iter()
                        .any(|n| n.state == crate::infrastructure::models::provider::NodeState::Running)
                })
                .unwrap_or(false);
            infos.push(ClusterInfo {
                name,
                distribution: Distribution::Talos,
                running,
            });
        }

        Ok(infos)
    }

    fn exists(&self, target: &ProvisionTarget) -> Result<bool, ProvisionerError> {
        self.talosctl
            .cluster_exists(target.descriptor.name.as_str())
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn update(&self, _target: &ProvisionTarget, change: &Change) -> Result<(), ProvisionerError> {
        Err(ProvisionerError::Unsupported {
            operation: format!("update {}", change.field),
            distribution: Distribution::Talos,
        })
    }

    fn current_config(&self, _target: &ProvisionTarget) -> Result<DistributionConfig, ProvisionerError> {
        // Talos machine configs are write-only from here; reading them back
        // needs the talosconfig credentials of the running cluster.
        Ok(DistributionConfig::Talos(TalosConfig::default()))
    }

    fn diff_config(
        &self,
        target: &ProvisionTarget,
        desired: &DistributionConfig,
    ) -> Result<Vec<String>, ProvisionerError> {
        let current = match self.current_config(target)? {
            DistributionConfig::Talos(c) => c,
            _ => unreachable!("talos current_config always yields a talos config"),
        };
        let desired = match desired {
            DistributionConfig::Talos(c) => c,
            _ => {
                return Err(ProvisionerError::InvalidConfig {
                    message: "expected a talos config".to_string(),
                });
            }
        };

        let mut diffs = vec![];
        if current.has_kubelet_cert_rotation() != desired.has_kubelet_cert_rotation() {
            diffs.push(format!(
                "kubelet cert rotation: {} -> {}",
                current.has_kubelet_cert_rotation(),
                desired.has_kubelet_cert_rotation()
            ));
        }

        Ok(diffs)
    }
}

/// Distribution-specific pre-create mutations of the in-memory Talos config.
fn patch_talos_config(target: &ProvisionTarget, config: &mut DistributionConfig) -> Result<(), ProvisionerError> {
    let talos_config = config.as_talos_mut().ok_or_else(|| ProvisionerError::InvalidConfig {
        message: "expected a talos config".to_string(),
    })?;

    // Without serving-cert rotation metrics-server fails TLS verification
    // against the kubelets.
    if target.descriptor.metrics_server == MetricsServerOption::Enabled {
        talos_config.ensure_kubelet_cert_rotation();
    }

    // The on-disk overlay is already in `talos_config`; the provisioned
    // mirror containers come on top.
    for mirror in target.mirror_registries {
        if let Some(host) = &mirror.mirror_of {
            talos_config.merge_mirror(host, &mirror.cluster_endpoint());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::registry::RegistryInfo;
    use crate::io_models::cluster::ClusterDescriptor;
    use crate::io_models::context::AbortHandle;

    fn descriptor() -> ClusterDescriptor {
        ClusterDescriptor::from_yaml(
            r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: Talos
  connection:
    kubeconfig: /tmp/kubeconfig
  cluster:
    metricsServer: Enabled
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_config_patches_cert_rotation_and_mirrors() {
        // setup:
        let descriptor = descriptor();
        let mirrors = vec![RegistryInfo {
            name: "demo-docker-io".to_string(),
            host: "localhost".to_string(),
            port: 5001,
            network: Some("demo".to_string()),
            upstream: Some("https://registry-1.docker.io".to_string()),
            mirror_of: Some("docker.io".to_string()),
            insecure: true,
            creds_ref: None,
        }];
        let target = ProvisionTarget {
            descriptor: &descriptor,
            local_registry: None,
            mirror_registries: &mirrors,
            abort: AbortHandle::new(),
        };
        let mut config = DistributionConfig::Talos(TalosConfig::default());

        // execute: run twice, the mutation must stay idempotent
        patch_talos_config(&target, &mut config).unwrap();
        patch_talos_config(&target, &mut config).unwrap();

        // verify:
        let talos = match config {
            DistributionConfig::Talos(c) => c,
            _ => unreachable!(),
        };
        assert!(talos.has_kubelet_cert_rotation());
        assert_eq!(
            vec!["http://demo-docker-io:5000".to_string()],
            talos.machine.registries.mirrors["docker.io"].endpoints
        );
    }
}
