use crate::cmd::command::CommandKiller;
use crate::cmd::k3d::K3d;
use crate::constants::KUBECONFIG;
use crate::infrastructure::models::distribution::{
    ClusterInfo, ClusterProvisioner, ProvisionTarget, ProvisionerError, abort_as_canceled,
};
use crate::io_models::cluster::{Distribution, MetricsServerOption};
use crate::io_models::distribution_config::{DistributionConfig, K3S_DISABLE_METRICS_SERVER_ARG, K3dSimpleConfig};
use crate::io_models::update::Change;
use std::io::Write;
use std::time::Duration;

const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const START_STOP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Field name of the in-place agent scaling change.
pub const K3D_AGENTS_FIELD: &str = "k3d.agents";

/// K3s through k3d. Agent count scales in place through native node
/// create/delete; server count changes always require recreation.
pub struct K3sProvisioner {}

impl K3sProvisioner {
    pub fn new() -> Self {
        K3sProvisioner {}
    }

    fn k3d_for(&self, target: &ProvisionTarget) -> K3d {
        K3d::new(vec![(
            KUBECONFIG.to_string(),
            target.descriptor.kubeconfig_path.to_string_lossy().to_string(),
        )])
    }

    fn agent_nodes(&self, k3d: &K3d, cluster: &str) -> Result<Vec<String>, ProvisionerError> {
        let nodes = k3d
            .node_list(cluster)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        let mut agents: Vec<String> = nodes
            .into_iter()
            .filter(|n| n.role == "agent")
            .map(|n| n.name)
            .collect();
        agents.sort_unstable();
        Ok(agents)
    }

    /// Scales agents to the desired count: create the missing ones, delete
    /// the highest-numbered surplus ones. A matching count is a no-op.
    fn scale_agents(&self, target: &ProvisionTarget, desired: u32) -> Result<(), ProvisionerError> {
        let cluster = target.descriptor.name.as_str();
        let k3d = self.k3d_for(target);
        let current_agents = self.agent_nodes(&k3d, cluster)?;
        let current = current_agents.len() as u32;

        if current == desired {
            return Ok(());
        }

        if desired > current {
            for index in current..desired {
                let node_name = format!("{cluster}-agent-{index}");
                k3d.node_create(&node_name, cluster, "agent")
                    .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;
            }
            return Ok(());
        }

        for node_name in current_agents.iter().rev().take((current - desired) as usize) {
            k3d.node_delete(node_name)
                .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;
        }

        Ok(())
    }
}

impl Default for K3sProvisioner {
    fn default() -> Self {
        K3sProvisioner::new()
    }
}

impl ClusterProvisioner for K3sProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::K3s
    }

    fn prepare_config(
        &self,
        target: &ProvisionTarget,
        config: &mut DistributionConfig,
    ) -> Result<(), ProvisionerError> {
        let k3d_config = config.as_k3d_mut().ok_or_else(|| ProvisionerError::InvalidConfig {
            message: "expected a k3d simple config".to_string(),
        })?;

        if target.descriptor.metrics_server == MetricsServerOption::Disabled {
            k3d_config.ensure_server_extra_arg(K3S_DISABLE_METRICS_SERVER_ARG);
        }

        // k3d connects referenced registries natively during create, no
        // attach stage needed afterwards.
        if let Some(local_registry) = target.local_registry {
            let already_used = k3d_config
                .registries
                .use_registries
                .iter()
                .any(|name| name == &local_registry.name);
            if !already_used {
                k3d_config.registries.use_registries.push(local_registry.name.clone());
            }
        }

        Ok(())
    }

    fn create(&self, target: &ProvisionTarget, config: &DistributionConfig) -> Result<(), ProvisionerError> {
        abort_as_canceled(&target.abort)?;

        let k3d_config = match config {
            DistributionConfig::K3d(c) => c,
            _ => {
                return Err(ProvisionerError::InvalidConfig {
                    message: "expected a k3d simple config".to_string(),
                });
            }
        };

        let yaml = k3d_config
            .to_yaml()
            .map_err(|e| ProvisionerError::InvalidConfig { message: e.to_string() })?;
        let mut config_file = tempfile::NamedTempFile::new().map_err(|e| ProvisionerError::CommandFailed {
            message: e.to_string(),
        })?;
        config_file
            .write_all(yaml.as_bytes())
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        let cmd_killer = CommandKiller::from(CREATE_TIMEOUT, target.abort.clone());

        self.k3d_for(target)
            .cluster_create(config_file.path(), &cmd_killer)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn delete(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        if !self.exists(target)? {
            return Err(ProvisionerError::ClusterNotFound {
                cluster: target.descriptor.name.to_string(),
            });
        }

        self.k3d_for(target)
            .cluster_delete(target.descriptor.name.as_str())
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn start(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        let cmd_killer = CommandKiller::from(START_STOP_TIMEOUT, target.abort.clone());

        self.k3d_for(target)
            .cluster_start(target.descriptor.name.as_str(), &cmd_killer)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn stop(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        let cmd_killer = CommandKiller::from(START_STOP_TIMEOUT, target.abort.clone());

        self.k3d_for(target)
            .cluster_stop(target.descriptor.name.as_str(), &cmd_killer)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn list(&self) -> Result<Vec<ClusterInfo>, ProvisionerError> {
        let clusters = K3d::new(vec![])
            .cluster_list()
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        Ok(clusters
            .into_iter()
            .map(|c| ClusterInfo {
                running: c.servers_running > 0,
                name: c.name,
                distribution: Distribution::K3s,
            })
            .collect())
    }

    fn exists(&self, target: &ProvisionTarget) -> Result<bool, ProvisionerError> {
        Ok(self
            .list()?
            .iter()
            .any(|c| c.name == target.descriptor.name.as_str()))
    }

    fn update(&self, target: &ProvisionTarget, change: &Change) -> Result<(), ProvisionerError> {
        if change.field != K3D_AGENTS_FIELD {
            return Err(ProvisionerError::Unsupported {
                operation: format!("update {}", change.field),
                distribution: Distribution::K3s,
            });
        }

        let desired: u32 = change
            .new_value
            .parse()
            .map_err(|_| ProvisionerError::InvalidConfig {
                message: format!("invalid agent count `{}`", change.new_value),
            })?;

        self.scale_agents(target, desired)
    }

    fn current_config(&self, target: &ProvisionTarget) -> Result<DistributionConfig, ProvisionerError> {
        let clusters = K3d::new(vec![])
            .cluster_list()
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;
        let observed = clusters
            .iter()
            .find(|c| c.name == target.descriptor.name.as_str())
            .ok_or_else(|| ProvisionerError::ClusterNotFound {
                cluster: target.descriptor.name.to_string(),
            })?;

        let mut config = K3dSimpleConfig::default();
        config.metadata.name = observed.name.clone();
        config.servers = observed.servers_count;
        config.agents = observed.agents_count;

        Ok(DistributionConfig::K3d(config))
    }

    fn diff_config(
        &self,
        target: &ProvisionTarget,
        desired: &DistributionConfig,
    ) -> Result<Vec<String>, ProvisionerError> {
        let current = match self.current_config(target)? {
            DistributionConfig::K3d(c) => c,
            _ => unreachable!("k3s current_config always yields a k3d config"),
        };
        let desired = match desired {
            DistributionConfig::K3d(c) => c,
            _ => {
                return Err(ProvisionerError::InvalidConfig {
                    message: "expected a k3d simple config".to_string(),
                });
            }
        };

        let mut diffs = vec![];
        if current.servers != desired.servers {
            diffs.push(format!("servers: {} -> {}", current.servers, desired.servers));
        }
        if current.agents != desired.agents {
            diffs.push(format!("agents: {} -> {}", current.agents, desired.agents));
        }

        Ok(diffs)
    }
}
