use crate::errors::EngineError;
use crate::events::Stage::Infrastructure;
use crate::events::{EventDetails, InfrastructureStep, Stage, Transmitter};
use crate::infrastructure::dependencies::Dependencies;
use crate::infrastructure::models::distribution::ClusterProvisioner;
use crate::infrastructure::models::provider::InfrastructureProvider;
use crate::io_models::cluster::ClusterDescriptor;
use crate::io_models::context::Context;
use crate::logger::Logger;
use crate::services::kube_client::KubeClient;
use std::sync::Arc;

/// InfrastructureContext: one engine invocation against one cluster. Owns
/// the descriptor and the injected dependencies; the distribution config
/// pointer lives inside the running plan, never here.
pub struct InfrastructureContext {
    context: Context,
    descriptor: ClusterDescriptor,
    dependencies: Dependencies,
}

impl InfrastructureContext {
    pub fn new(context: Context, descriptor: ClusterDescriptor, dependencies: Dependencies) -> Self {
        InfrastructureContext {
            context,
            descriptor,
            dependencies,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn logger(&self) -> Box<dyn Logger> {
        self.dependencies.logger.clone()
    }

    pub fn provisioner(&self) -> Arc<dyn ClusterProvisioner> {
        self.dependencies
            .provisioner_factory
            .provisioner_for(self.descriptor.distribution)
    }

    pub fn provider(&self) -> Arc<dyn InfrastructureProvider> {
        self.dependencies.provider.clone()
    }

    pub fn event_details(&self, stage: Stage) -> EventDetails {
        EventDetails::new(
            Some(self.descriptor.provider),
            self.descriptor.name.clone(),
            self.context.execution_id().to_string(),
            stage,
            Transmitter::Orchestrator("orchestrator".to_string()),
        )
    }

    /// Builds a per-cluster kubernetes client from the descriptor kubeconfig.
    pub fn mk_kube_client(&self) -> Result<Arc<KubeClient>, Box<EngineError>> {
        let event_details = self.event_details(Infrastructure(InfrastructureStep::LoadConfiguration));
        KubeClient::new(&self.descriptor.kubeconfig_path, Some(&self.descriptor.connection_context))
            .map(Arc::new)
            .map_err(|e| {
                Box::new(EngineError::new_cannot_connect_to_k8s_cluster(
                    event_details,
                    crate::errors::CommandError::new_from_safe_message(e.to_string()),
                ))
            })
    }
}
