use crate::cmd::command::CommandKiller;
use crate::cmd::docker::Docker;
use crate::cmd::vcluster::Vcluster;
use crate::infrastructure::models::distribution::{
    ClusterInfo, ClusterProvisioner, ProvisionTarget, ProvisionerError, abort_as_canceled,
};
use crate::io_models::cluster::Distribution;
use crate::io_models::distribution_config::{DistributionConfig, VclusterConfig};
use crate::io_models::update::Change;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const CREATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const PAUSE_RESUME_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Virtual clusters through the vcluster CLI. Start/stop map to
/// resume/pause. CoreDNS inside the virtual cluster cannot resolve Docker
/// container names, so GitOps registry references use container IPs (handled
/// in the GitOps configuration step).
pub struct VclusterProvisioner {
    vcluster: Vcluster,
    _docker: Arc<Docker>,
}

impl VclusterProvisioner {
    pub fn new(docker: Arc<Docker>) -> Self {
        VclusterProvisioner {
            vcluster: Vcluster::new(vec![]),
            _docker: docker,
        }
    }
}

impl ClusterProvisioner for VclusterProvisioner {
    fn distribution(&self) -> Distribution {
        Distribution::VCluster
    }

    fn prepare_config(
        &self,
        _target: &ProvisionTarget,
        _config: &mut DistributionConfig,
    ) -> Result<(), ProvisionerError> {
        // vcluster values are user-owned; nothing is mutated before create.
        Ok(())
    }

    fn create(&self, target: &ProvisionTarget, config: &DistributionConfig) -> Result<(), ProvisionerError> {
        abort_as_canceled(&target.abort)?;

        let vcluster_config = match config {
            DistributionConfig::VCluster(c) => c,
            _ => {
                return Err(ProvisionerError::InvalidConfig {
                    message: "expected a vcluster config".to_string(),
                });
            }
        };

        let values_file = if vcluster_config.values.is_null() {
            None
        } else {
            let yaml = vcluster_config
                .to_values_yaml()
                .map_err(|e| ProvisionerError::InvalidConfig { message: e.to_string() })?;
            let mut file = tempfile::NamedTempFile::new().map_err(|e| ProvisionerError::CommandFailed {
                message: e.to_string(),
            })?;
            file.write_all(yaml.as_bytes())
                .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;
            Some(file)
        };

        let cmd_killer = CommandKiller::from(CREATE_TIMEOUT, target.abort.clone());

        self.vcluster
            .create(
                target.descriptor.name.as_str(),
                values_file.as_ref().map(|f| f.path()),
                &target.descriptor.kubeconfig_path,
                &cmd_killer,
            )
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn delete(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        if !self.exists(target)? {
            return Err(ProvisionerError::ClusterNotFound {
                cluster: target.descriptor.name.to_string(),
            });
        }

        self.vcluster
            .delete(target.descriptor.name.as_str())
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn start(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        let cmd_killer = CommandKiller::from(PAUSE_RESUME_TIMEOUT, target.abort.clone());

        self.vcluster
            .resume(target.descriptor.name.as_str(), &cmd_killer)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn stop(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        let cmd_killer = CommandKiller::from(PAUSE_RESUME_TIMEOUT, target.abort.clone());

        self.vcluster
            .pause(target.descriptor.name.as_str(), &cmd_killer)
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })
    }

    fn list(&self) -> Result<Vec<ClusterInfo>, ProvisionerError> {
        let clusters = self
            .vcluster
            .list()
            .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        Ok(clusters
            .into_iter()
            .map(|c| ClusterInfo {
                running: c.status == "Running",
                name: c.name,
                distribution: Distribution::VCluster,
            })
            .collect())
    }

    fn exists(&self, target: &ProvisionTarget) -> Result<bool, ProvisionerError> {
        Ok(self
            .list()?
            .iter()
            .any(|c| c.name == target.descriptor.name.as_str()))
    }

    fn update(&self, _target: &ProvisionTarget, change: &Change) -> Result<(), ProvisionerError> {
        Err(ProvisionerError::Unsupported {
            operation: format!("update {}", change.field),
            distribution: Distribution::VCluster,
        })
    }

    fn current_config(&self, _target: &ProvisionTarget) -> Result<DistributionConfig, ProvisionerError> {
        Ok(DistributionConfig::VCluster(VclusterConfig::default()))
    }

    fn diff_config(
        &self,
        _target: &ProvisionTarget,
        _desired: &DistributionConfig,
    ) -> Result<Vec<String>, ProvisionerError> {
        // vcluster values are opaque here, descriptor-level diffs cover the
        // rest.
        Ok(vec![])
    }
}
