use ksail_engine::errors::CommandError;
use ksail_engine::events::bus::EventBus;
use ksail_engine::infrastructure::action::InfraLogger;
use ksail_engine::infrastructure::action::gitops::{GitOpsConfigurator, GitOpsTarget};
use ksail_engine::infrastructure::dependencies::Dependencies;
use ksail_engine::infrastructure::helm_charts::{
    CniInstaller, ComponentKind, DefaultInstallerCatalog, InstallTarget, Installer, InstallerCatalog,
};
use ksail_engine::infrastructure::infrastructure_context::InfrastructureContext;
use ksail_engine::infrastructure::models::distribution::{
    ClusterInfo, ClusterProvisioner, ProvisionTarget, ProvisionerError, ProvisionerFactory,
};
use ksail_engine::infrastructure::models::provider::{
    InfrastructureProvider, Kind as ProviderKind, NodeInfo, ProviderError,
};
use ksail_engine::infrastructure::network::{NetworkBroker, NetworkError, NetworkSpec};
use ksail_engine::infrastructure::registry::{
    RegistryError, RegistryInfo, RegistryService, RegistryStatus, RegistryStatusReport,
};
use ksail_engine::io_models::KsailIdentifier;
use ksail_engine::io_models::cluster::{ClusterDescriptor, Distribution, MirrorSpec};
use ksail_engine::io_models::context::Context;
use ksail_engine::io_models::distribution_config::DistributionConfig;
use ksail_engine::io_models::update::Change;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Everything the fakes record during a plan run, inspected by the tests.
#[derive(Default)]
pub struct Recorded {
    pub cluster_exists: Mutex<bool>,
    pub workers: Mutex<u32>,
    pub prepared_config: Mutex<Option<DistributionConfig>>,
    pub provisioner_updates: Mutex<Vec<Change>>,
    pub installed: Mutex<Vec<String>>,
    pub uninstalled: Mutex<Vec<String>>,
    pub readiness_waited: Mutex<Vec<String>>,
    pub provisioned_registries: Mutex<Vec<String>>,
    pub removed_registries: Mutex<Vec<String>>,
    pub ensured_networks: Mutex<Vec<String>>,
    pub attachments: Mutex<Vec<(String, String)>>,
    pub gitops_calls: Mutex<Vec<String>>,
    /// Registries reported as used by another running cluster.
    pub registries_in_use: Mutex<Vec<String>>,
}

pub struct FakeProvisioner {
    distribution: Distribution,
    recorded: Arc<Recorded>,
}

impl ClusterProvisioner for FakeProvisioner {
    fn distribution(&self) -> Distribution {
        self.distribution
    }

    fn prepare_config(
        &self,
        _target: &ProvisionTarget,
        config: &mut DistributionConfig,
    ) -> Result<(), ProvisionerError> {
        *self.recorded.prepared_config.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    fn create(&self, target: &ProvisionTarget, _config: &DistributionConfig) -> Result<(), ProvisionerError> {
        // The real provisioners leave a kubeconfig behind; the plan verifies it.
        let kubeconfig = &target.descriptor.kubeconfig_path;
        if let Some(parent) = kubeconfig.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(
            kubeconfig,
            format!(
                "apiVersion: v1\nkind: Config\ncurrent-context: {}\nclusters: []\ncontexts: []\nusers: []\n",
                target.descriptor.connection_context
            ),
        )
        .map_err(|e| ProvisionerError::CommandFailed { message: e.to_string() })?;

        *self.recorded.cluster_exists.lock().unwrap() = true;
        Ok(())
    }

    fn delete(&self, target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        let mut exists = self.recorded.cluster_exists.lock().unwrap();
        if !*exists {
            return Err(ProvisionerError::ClusterNotFound {
                cluster: target.descriptor.name.to_string(),
            });
        }
        *exists = false;
        Ok(())
    }

    fn start(&self, _target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        Ok(())
    }

    fn stop(&self, _target: &ProvisionTarget) -> Result<(), ProvisionerError> {
        Ok(())
    }

    fn list(&self) -> Result<Vec<ClusterInfo>, ProvisionerError> {
        Ok(vec![])
    }

    fn exists(&self, _target: &ProvisionTarget) -> Result<bool, ProvisionerError> {
        Ok(*self.recorded.cluster_exists.lock().unwrap())
    }

    fn update(&self, _target: &ProvisionTarget, change: &Change) -> Result<(), ProvisionerError> {
        if let Ok(desired) = change.new_value.parse::<u32>() {
            *self.recorded.workers.lock().unwrap() = desired;
        }
        self.recorded.provisioner_updates.lock().unwrap().push(change.clone());
        Ok(())
    }

    fn current_config(&self, _target: &ProvisionTarget) -> Result<DistributionConfig, ProvisionerError> {
        Err(ProvisionerError::Unsupported {
            operation: "current_config".to_string(),
            distribution: self.distribution,
        })
    }

    fn diff_config(
        &self,
        _target: &ProvisionTarget,
        _desired: &DistributionConfig,
    ) -> Result<Vec<String>, ProvisionerError> {
        Ok(vec![])
    }
}

pub struct FakeProvisionerFactory {
    recorded: Arc<Recorded>,
}

impl ProvisionerFactory for FakeProvisionerFactory {
    fn provisioner_for(&self, distribution: Distribution) -> Arc<dyn ClusterProvisioner> {
        Arc::new(FakeProvisioner {
            distribution,
            recorded: self.recorded.clone(),
        })
    }
}

pub struct FakeRegistryService {
    recorded: Arc<Recorded>,
}

impl RegistryService for FakeRegistryService {
    fn provision_local_registry(
        &self,
        cluster: &KsailIdentifier,
        network: Option<&str>,
    ) -> Result<RegistryInfo, RegistryError> {
        let name = RegistryInfo::local_registry_name(cluster);
        self.recorded.provisioned_registries.lock().unwrap().push(name.clone());
        Ok(RegistryInfo {
            name,
            host: "localhost".to_string(),
            port: 5000,
            network: network.map(|n| n.to_string()),
            upstream: None,
            mirror_of: None,
            insecure: true,
            creds_ref: None,
        })
    }

    fn provision_mirror_registry(
        &self,
        cluster: &KsailIdentifier,
        mirror: &MirrorSpec,
        network: Option<&str>,
    ) -> Result<RegistryInfo, RegistryError> {
        let name = RegistryInfo::mirror_registry_name(cluster, &mirror.host);
        self.recorded.provisioned_registries.lock().unwrap().push(name.clone());
        Ok(RegistryInfo {
            name,
            host: "localhost".to_string(),
            port: 5001,
            network: network.map(|n| n.to_string()),
            upstream: Some(mirror.upstream.clone()),
            mirror_of: Some(mirror.host.clone()),
            insecure: true,
            creds_ref: None,
        })
    }

    fn status(&self, _name: &str) -> Result<RegistryStatusReport, RegistryError> {
        Ok(RegistryStatusReport {
            status: RegistryStatus::Running,
            port: Some(5000),
            endpoint: Some("http://localhost:5000".to_string()),
        })
    }

    fn is_in_use(&self, name: &str, _by_cluster: &KsailIdentifier) -> Result<bool, RegistryError> {
        Ok(self
            .recorded
            .registries_in_use
            .lock()
            .unwrap()
            .iter()
            .any(|n| n == name))
    }

    fn remove_registry(&self, name: &str, _delete_volumes: bool) -> Result<(), RegistryError> {
        self.recorded.removed_registries.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn endpoint_reachable(&self, _info: &RegistryInfo) -> bool {
        true
    }
}

pub struct FakeNetworkBroker {
    recorded: Arc<Recorded>,
}

impl NetworkBroker for FakeNetworkBroker {
    fn ensure_network(&self, spec: &NetworkSpec) -> Result<(), NetworkError> {
        self.recorded.ensured_networks.lock().unwrap().push(spec.name.clone());
        Ok(())
    }

    fn attach(&self, container: &str, network: &str, _static_ip: Option<&str>) -> Result<(), NetworkError> {
        self.recorded
            .attachments
            .lock()
            .unwrap()
            .push((container.to_string(), network.to_string()));
        Ok(())
    }

    fn network_exists(&self, _name: &str) -> Result<bool, NetworkError> {
        Ok(true)
    }

    fn container_ip(&self, _container: &str, _network: &str) -> Result<Option<String>, NetworkError> {
        Ok(Some("10.89.0.5".to_string()))
    }
}

/// Installer double recording install/readiness/uninstall by component kind.
pub struct FakeInstaller {
    kind: ComponentKind,
    recorded: Arc<Recorded>,
}

impl Installer for FakeInstaller {
    fn component_kind(&self) -> ComponentKind {
        self.kind
    }

    fn install(&self, _target: &InstallTarget) -> Result<(), CommandError> {
        self.recorded.installed.lock().unwrap().push(self.kind.to_string());
        Ok(())
    }

    fn wait_for_readiness(&self, _target: &InstallTarget) -> Result<(), CommandError> {
        self.recorded.readiness_waited.lock().unwrap().push(self.kind.to_string());
        Ok(())
    }

    fn uninstall(&self, _target: &InstallTarget) -> Result<(), CommandError> {
        self.recorded.uninstalled.lock().unwrap().push(self.kind.to_string());
        Ok(())
    }
}

impl CniInstaller for FakeInstaller {
    fn cni_namespaces(&self) -> Vec<String> {
        vec!["kube-system".to_string()]
    }
}

/// Catalog double: same component selection rules as the production catalog,
/// recording fakes as execution.
pub struct FakeInstallerCatalog {
    selector: DefaultInstallerCatalog,
    recorded: Arc<Recorded>,
}

impl InstallerCatalog for FakeInstallerCatalog {
    fn cni_installer(&self, descriptor: &ClusterDescriptor) -> Option<Box<dyn CniInstaller>> {
        self.selector.cni_installer(descriptor).map(|real| {
            Box::new(FakeInstaller {
                kind: real.component_kind(),
                recorded: self.recorded.clone(),
            }) as Box<dyn CniInstaller>
        })
    }

    fn infrastructure_installers(&self, descriptor: &ClusterDescriptor) -> Vec<Box<dyn Installer>> {
        self.selector
            .infrastructure_installers(descriptor)
            .into_iter()
            .map(|real| {
                Box::new(FakeInstaller {
                    kind: real.component_kind(),
                    recorded: self.recorded.clone(),
                }) as Box<dyn Installer>
            })
            .collect()
    }

    fn gitops_installers(&self, descriptor: &ClusterDescriptor) -> Vec<Box<dyn Installer>> {
        self.selector
            .gitops_installers(descriptor)
            .into_iter()
            .map(|real| {
                Box::new(FakeInstaller {
                    kind: real.component_kind(),
                    recorded: self.recorded.clone(),
                }) as Box<dyn Installer>
            })
            .collect()
    }
}

pub struct FakeProvider {}

impl InfrastructureProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Docker
    }

    fn list_nodes(&self, _cluster: &KsailIdentifier) -> Result<Vec<NodeInfo>, ProviderError> {
        Ok(vec![])
    }

    fn start_nodes(&self, _cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        Ok(())
    }

    fn stop_nodes(&self, _cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        Ok(())
    }

    fn delete_nodes(&self, _cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        Ok(())
    }
}

pub struct FakeGitOpsConfigurator {
    recorded: Arc<Recorded>,
}

impl GitOpsConfigurator for FakeGitOpsConfigurator {
    fn configure_argocd(&self, target: &GitOpsTarget, _logger: &dyn InfraLogger) -> Result<(), CommandError> {
        self.recorded.gitops_calls.lock().unwrap().push(format!(
            "argocd@{}",
            target.cluster_registry_host.clone().unwrap_or_default()
        ));
        Ok(())
    }

    fn configure_flux(&self, target: &GitOpsTarget, logger: &dyn InfraLogger) -> Result<(), CommandError> {
        self.recorded.gitops_calls.lock().unwrap().push(format!(
            "flux@{}",
            target.cluster_registry_host.clone().unwrap_or_default()
        ));
        // Mirrors the production behavior when the source directory has no
        // artifact yet.
        if !target.descriptor.workload.source_directory.is_dir() {
            logger.info("pushed empty kustomization to workload:dev".into());
        }
        Ok(())
    }
}

/// Test harness: descriptor + fake dependencies + event bus.
pub struct TestRig {
    pub recorded: Arc<Recorded>,
    pub bus: EventBus,
    pub infra_ctx: InfrastructureContext,
    _workdir: tempfile::TempDir,
}

pub fn descriptor_from_yaml(yaml: &str) -> ClusterDescriptor {
    ClusterDescriptor::from_yaml(yaml).expect("valid test manifest")
}

pub fn rig_for(mut descriptor: ClusterDescriptor) -> TestRig {
    let recorded = Arc::new(Recorded::default());
    let bus = EventBus::default();
    let workdir = tempfile::tempdir().expect("tempdir");
    descriptor.kubeconfig_path = workdir.path().join("kubeconfig.yaml");

    let dependencies = Dependencies {
        docker: None,
        provisioner_factory: Arc::new(FakeProvisionerFactory {
            recorded: recorded.clone(),
        }),
        registry_service: Arc::new(FakeRegistryService {
            recorded: recorded.clone(),
        }),
        network_broker: Arc::new(FakeNetworkBroker {
            recorded: recorded.clone(),
        }),
        installer_catalog: Arc::new(FakeInstallerCatalog {
            selector: DefaultInstallerCatalog::default(),
            recorded: recorded.clone(),
        }),
        provider: Arc::new(FakeProvider {}),
        gitops_configurator: Arc::new(FakeGitOpsConfigurator {
            recorded: recorded.clone(),
        }),
        logger: Box::new(bus.clone()),
    };

    TestRig {
        recorded,
        bus: bus.clone(),
        infra_ctx: InfrastructureContext::new(Context::new("test-exec".to_string(), true), descriptor, dependencies),
        _workdir: workdir,
    }
}

/// Sorted copy helper for order-insensitive assertions over parallel groups.
pub fn sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort_unstable();
    values
}

/// Counts events per kind label, used for nesting assertions.
pub fn kind_counts(bus: &EventBus) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for event in bus.drain() {
        *counts.entry(format!("{:?}", event.kind())).or_insert(0) += 1;
    }
    counts
}
