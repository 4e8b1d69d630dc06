use crate::constants::DEFAULT_WORKLOAD_TAG;
use crate::errors::CommandError;
use crate::infrastructure::action::InfraLogger;
use crate::infrastructure::helm_charts::{ComponentKind, effective_timeout};
use crate::infrastructure::registry::{REGISTRY_CONTAINER_PORT, RegistryInfo};
use crate::infrastructure::workload::{package_empty_kustomization, workload_repository_name};
use crate::io_models::cluster::{ClusterDescriptor, LocalRegistryOption};
use crate::io_models::context::AbortHandle;
use crate::services::kube_client::{KubeClient, KubeClientError};
use crate::services::oci::OciRegistryClient;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Everything the post-install GitOps configuration acts on.
pub struct GitOpsTarget<'a> {
    pub descriptor: &'a ClusterDescriptor,
    pub local_registry: Option<&'a RegistryInfo>,
    /// Registry host as resolvable from inside the cluster: the container
    /// name, or its IP address for VCluster whose CoreDNS cannot resolve
    /// container names.
    pub cluster_registry_host: Option<String>,
    pub kube: Option<Arc<KubeClient>>,
    pub abort: AbortHandle,
    pub timeout_override: Option<Duration>,
}

impl GitOpsTarget<'_> {
    /// `oci://<registryHost>:<port>/<repo>` as reachable from inside the
    /// cluster. External registries carry their own path and standard port.
    fn cluster_repo_url(&self) -> Result<String, CommandError> {
        let repository = workload_repository_name(self.descriptor);

        if let LocalRegistryOption::External { host, path, .. } = &self.descriptor.local_registry {
            let prefix = match path.trim_matches('/') {
                "" => String::new(),
                trimmed => format!("{trimmed}/"),
            };
            return Ok(format!("oci://{host}/{prefix}{repository}"));
        }

        let host = self.cluster_registry_host.as_ref().ok_or_else(|| {
            CommandError::new_from_safe_message("no cluster-reachable registry host available".to_string())
        })?;

        Ok(format!("oci://{host}:{REGISTRY_CONTAINER_PORT}/{repository}"))
    }

    fn kube(&self) -> Result<&Arc<KubeClient>, CommandError> {
        self.kube.as_ref().ok_or_else(|| {
            CommandError::new_from_safe_message("no kubernetes client available for GitOps configuration".to_string())
        })
    }
}

/// Configures the GitOps resources once the engines are installed.
pub trait GitOpsConfigurator: Send + Sync {
    /// Ensures the default ArgoCD Application referencing the local OCI repo.
    fn configure_argocd(&self, target: &GitOpsTarget, logger: &dyn InfraLogger) -> Result<(), CommandError>;

    /// Creates the FluxInstance, ensures an OCI artifact exists (pushing an
    /// empty kustomization when absent), then waits for Flux readiness.
    fn configure_flux(&self, target: &GitOpsTarget, logger: &dyn InfraLogger) -> Result<(), CommandError>;
}

#[derive(Default)]
pub struct DefaultGitOpsConfigurator {}

impl DefaultGitOpsConfigurator {
    pub fn new() -> Self {
        DefaultGitOpsConfigurator {}
    }

    fn ensure_artifact(&self, target: &GitOpsTarget, logger: &dyn InfraLogger) -> Result<(), CommandError> {
        // External registries are user-managed, including their artifacts.
        let registry = match target.local_registry {
            Some(registry) => registry,
            None => return Ok(()),
        };

        let endpoint = Url::parse(&registry.host_endpoint())
            .map_err(|e| CommandError::new_from_safe_message(e.to_string()))?;
        let client =
            OciRegistryClient::new(endpoint).map_err(|e| CommandError::new_from_safe_message(e.to_string()))?;

        let repository = workload_repository_name(target.descriptor);
        let tag = DEFAULT_WORKLOAD_TAG;
        let exists = client
            .artifact_exists(&repository, tag)
            .map_err(|e| CommandError::new_from_safe_message(e.to_string()))?;
        if exists {
            return Ok(());
        }

        let content = package_empty_kustomization()?;
        client
            .push_artifact(&repository, tag, &content)
            .map_err(|e| CommandError::new_from_safe_message(e.to_string()))?;
        logger.info(format!("pushed empty kustomization to {repository}:{tag}").into());

        Ok(())
    }
}

impl GitOpsConfigurator for DefaultGitOpsConfigurator {
    fn configure_argocd(&self, target: &GitOpsTarget, logger: &dyn InfraLogger) -> Result<(), CommandError> {
        let repo_url = target.cluster_repo_url()?;
        let kube = target.kube()?;

        logger.activity(format!("ensuring default ArgoCD application on {repo_url}").into());
        let manifest = serde_json::json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": {"name": "default", "namespace": "argocd"},
            "spec": {
                "project": "default",
                "source": {
                    "repoURL": repo_url,
                    "targetRevision": DEFAULT_WORKLOAD_TAG,
                    "path": ".",
                },
                "destination": {
                    "server": "https://kubernetes.default.svc",
                    "namespace": "default",
                },
                "syncPolicy": {"automated": {"prune": true, "selfHeal": true}},
            },
        });

        kube.apply_dynamic("argoproj.io/v1alpha1", "Application", "applications", "argocd", "default", manifest)
            .map_err(|e| CommandError::new("cannot apply ArgoCD application".to_string(), Some(e.to_string()), None))
    }

    fn configure_flux(&self, target: &GitOpsTarget, logger: &dyn InfraLogger) -> Result<(), CommandError> {
        let repo_url = target.cluster_repo_url()?;
        let kube = target.kube()?;

        logger.activity(format!("creating FluxInstance syncing {repo_url}").into());
        let manifest = serde_json::json!({
            "apiVersion": "fluxcd.controlplane.io/v1",
            "kind": "FluxInstance",
            "metadata": {"name": "flux", "namespace": "flux-system"},
            "spec": {
                "distribution": {"version": "2.x", "registry": "ghcr.io/fluxcd"},
                "sync": {
                    "kind": "OCIRepository",
                    "url": repo_url,
                    "ref": DEFAULT_WORKLOAD_TAG,
                    "path": ".",
                },
            },
        });
        kube.apply_dynamic(
            "fluxcd.controlplane.io/v1",
            "FluxInstance",
            "fluxinstances",
            "flux-system",
            "flux",
            manifest,
        )
        .map_err(|e| CommandError::new("cannot apply FluxInstance".to_string(), Some(e.to_string()), None))?;

        // Flux needs an artifact to reconcile; seed one when the user has
        // pushed nothing yet.
        self.ensure_artifact(target, logger)?;

        let timeout = effective_timeout(ComponentKind::Flux, target.timeout_override);
        match kube.wait_for_deployment_ready("flux-system", "source-controller", timeout, &target.abort) {
            Ok(()) => Ok(()),
            Err(KubeClientError::Timeout { .. }) => {
                let failing = kube
                    .list_failing_pods(&["flux-system".to_string()])
                    .unwrap_or_default()
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");
                Err(CommandError::new_from_safe_message(format!(
                    "flux did not become ready within {}s; failing pods: {failing}",
                    timeout.as_secs()
                )))
            }
            Err(e) => Err(CommandError::new(
                "error while waiting for flux readiness".to_string(),
                Some(e.to_string()),
                None,
            )),
        }
    }
}
