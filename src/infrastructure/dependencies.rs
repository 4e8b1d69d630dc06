use crate::cmd::docker::Docker;
use crate::constants::HCLOUD_TOKEN;
use crate::errors::{CommandError, EngineError};
use crate::events::Stage::Infrastructure;
use crate::events::{EventDetails, InfrastructureStep, Transmitter};
use crate::infrastructure::action::gitops::{DefaultGitOpsConfigurator, GitOpsConfigurator};
use crate::infrastructure::helm_charts::{DefaultInstallerCatalog, InstallerCatalog};
use crate::infrastructure::models::distribution::{DefaultProvisionerFactory, ProvisionerFactory};
use crate::infrastructure::models::provider::docker::DockerInfrastructureProvider;
use crate::infrastructure::models::provider::hetzner::HetznerInfrastructureProvider;
use crate::infrastructure::models::provider::{InfrastructureProvider, Kind as ProviderKind};
use crate::infrastructure::network::{DockerNetworkBroker, NetworkBroker};
use crate::infrastructure::registry::{DockerRegistryService, RegistryService};
use crate::io_models::cluster::ClusterDescriptor;
use crate::logger::Logger;
use crate::services::hetzner::HetznerApi;
use std::sync::Arc;

/// Dependencies: the explicit record of collaborators injected into every
/// orchestrator entry point. No mutable package-level state; tests override
/// individual members with in-memory fakes.
pub struct Dependencies {
    pub docker: Option<Arc<Docker>>,
    pub provisioner_factory: Arc<dyn ProvisionerFactory>,
    pub registry_service: Arc<dyn RegistryService>,
    pub network_broker: Arc<dyn NetworkBroker>,
    pub installer_catalog: Arc<dyn InstallerCatalog>,
    pub provider: Arc<dyn InfrastructureProvider>,
    pub gitops_configurator: Arc<dyn GitOpsConfigurator>,
    pub logger: Box<dyn Logger>,
}

impl Dependencies {
    /// Production wiring for a descriptor: the Docker daemon, CLI-backed
    /// provisioners and the matching infrastructure provider.
    pub fn default_for(descriptor: &ClusterDescriptor, logger: Box<dyn Logger>) -> Result<Dependencies, Box<EngineError>> {
        let event_details = EventDetails::new(
            Some(descriptor.provider),
            descriptor.name.clone(),
            "bootstrap".to_string(),
            Infrastructure(InfrastructureStep::LoadConfiguration),
            Transmitter::Orchestrator("dependencies".to_string()),
        );

        let docker = Arc::new(Docker::new(None).map_err(|e| {
            Box::new(EngineError::new_docker_daemon_unavailable(
                event_details.clone(),
                CommandError::from(e),
            ))
        })?);

        let provider: Arc<dyn InfrastructureProvider> = match descriptor.provider {
            ProviderKind::Docker => Arc::new(DockerInfrastructureProvider::new(docker.clone())),
            ProviderKind::Hetzner => {
                let token = std::env::var(HCLOUD_TOKEN).map_err(|_| {
                    Box::new(EngineError::new_missing_required_env_variable(
                        event_details.clone(),
                        HCLOUD_TOKEN.to_string(),
                    ))
                })?;
                let api = HetznerApi::new(token).map_err(|e| {
                    Box::new(EngineError::new_cloud_provider_error(
                        event_details.clone(),
                        CommandError::new_from_safe_message(e.to_string()),
                    ))
                })?;
                Arc::new(HetznerInfrastructureProvider::new(api))
            }
        };

        Ok(Dependencies {
            provisioner_factory: Arc::new(DefaultProvisionerFactory::new(docker.clone())),
            registry_service: Arc::new(DockerRegistryService::new(docker.clone())),
            network_broker: Arc::new(DockerNetworkBroker::new(docker.clone())),
            installer_catalog: Arc::new(DefaultInstallerCatalog::default()),
            provider,
            gitops_configurator: Arc::new(DefaultGitOpsConfigurator::new()),
            docker: Some(docker),
            logger,
        })
    }
}
