pub mod k3s;
pub mod talos;
pub mod vanilla;
pub mod vcluster;

use crate::cmd::docker::Docker;
use crate::errors::CommandError;
use crate::infrastructure::registry::RegistryInfo;
use crate::io_models::cluster::{ClusterDescriptor, Distribution};
use crate::io_models::context::AbortHandle;
use crate::io_models::distribution_config::DistributionConfig;
use crate::io_models::update::Change;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum ProvisionerError {
    /// Sentinel: delete on an absent cluster.
    #[error("cluster `{cluster}` doesn't exist")]
    ClusterNotFound { cluster: String },

    #[error("cluster `{cluster}` already exists")]
    ClusterAlreadyExists { cluster: String },

    #[error("invalid distribution config: {message}")]
    InvalidConfig { message: String },

    #[error("operation `{operation}` is not supported by distribution `{distribution}`")]
    Unsupported {
        operation: String,
        distribution: Distribution,
    },

    #[error("distribution command failed: {message}")]
    CommandFailed { message: String },

    #[error("operation aborted")]
    Aborted,
}

impl From<ProvisionerError> for CommandError {
    fn from(err: ProvisionerError) -> Self {
        CommandError::new("Provisioner error".to_string(), Some(err.to_string()), None)
    }
}

/// One cluster as seen by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    pub distribution: Distribution,
    pub running: bool,
}

/// Everything a provisioner needs about the cluster being acted on, beyond
/// the opaque distribution config it owns.
pub struct ProvisionTarget<'a> {
    pub descriptor: &'a ClusterDescriptor,
    pub local_registry: Option<&'a RegistryInfo>,
    pub mirror_registries: &'a [RegistryInfo],
    pub abort: AbortHandle,
}

/// Per-distribution lifecycle operations. One implementation per
/// distribution, each wrapping its native tooling.
pub trait ClusterProvisioner: Send + Sync {
    fn distribution(&self) -> Distribution;

    /// Distribution-specific pre-create mutations of the (owned) config:
    /// K3s disable flags, Talos kubelet cert rotation and mirror blocks,
    /// Kind containerd hosts directory. Must be idempotent.
    fn prepare_config(&self, target: &ProvisionTarget, config: &mut DistributionConfig)
    -> Result<(), ProvisionerError>;

    fn create(&self, target: &ProvisionTarget, config: &DistributionConfig) -> Result<(), ProvisionerError>;

    /// Yields the `ClusterNotFound` sentinel when the cluster is absent.
    fn delete(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError>;

    fn start(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError>;

    fn stop(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError>;

    fn list(&self) -> Result<Vec<ClusterInfo>, ProvisionerError>;

    fn exists(&self, target: &ProvisionTarget) -> Result<bool, ProvisionerError>;

    /// Applies one in-place classified change (K3s agent scaling). Other
    /// changes and distributions answer `Unsupported`.
    fn update(&self, target: &ProvisionTarget, change: &Change) -> Result<(), ProvisionerError>;

    /// Config view reconstructed from the observed cluster.
    fn current_config(&self, target: &ProvisionTarget) -> Result<DistributionConfig, ProvisionerError>;

    /// Human-readable differences between the observed state and a desired
    /// config.
    fn diff_config(
        &self,
        target: &ProvisionTarget,
        desired: &DistributionConfig,
    ) -> Result<Vec<String>, ProvisionerError>;
}

pub trait ProvisionerFactory: Send + Sync {
    fn provisioner_for(&self, distribution: Distribution) -> Arc<dyn ClusterProvisioner>;
}

/// Production wiring: CLI-backed provisioners sharing one Docker wrapper.
pub struct DefaultProvisionerFactory {
    docker: Arc<Docker>,
}

impl DefaultProvisionerFactory {
    pub fn new(docker: Arc<Docker>) -> Self {
        DefaultProvisionerFactory { docker }
    }
}

impl ProvisionerFactory for DefaultProvisionerFactory {
    fn provisioner_for(&self, distribution: Distribution) -> Arc<dyn ClusterProvisioner> {
        match distribution {
            Distribution::Vanilla => Arc::new(vanilla::VanillaProvisioner::new(self.docker.clone())),
            Distribution::K3s => Arc::new(k3s::K3sProvisioner::new()),
            Distribution::Talos => Arc::new(talos::TalosProvisioner::new(self.docker.clone())),
            Distribution::VCluster => Arc::new(vcluster::VclusterProvisioner::new(self.docker.clone())),
        }
    }
}

pub(crate) fn abort_as_canceled(abort: &AbortHandle) -> Result<(), ProvisionerError> {
    if abort.is_cancel_requested() {
        return Err(ProvisionerError::Aborted);
    }
    Ok(())
}
