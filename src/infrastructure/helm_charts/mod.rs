pub mod argocd_chart;
pub mod calico_chart;
pub mod cert_manager_chart;
pub mod cilium_chart;
pub mod flux_chart;
pub mod gatekeeper_chart;
pub mod kubelet_csr_approver_chart;
pub mod kyverno_chart;
pub mod local_path_storage_chart;
pub mod metallb_chart;
pub mod metrics_server_chart;

use crate::cmd::command::CommandKiller;
use crate::errors::CommandError;
use crate::helm::{CommonChart, HelmChart};
use crate::io_models::cluster::{
    ClusterDescriptor, CniOption, CsiOption, Distribution, GitOpsEngineOption, LoadBalancerOption,
    MetricsServerOption, PolicyEngineOption,
};
use crate::io_models::context::AbortHandle;
use crate::services::kube_client::{KubeClient, KubeClientError};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Cilium,
    Calico,
    MetricsServer,
    LoadBalancer,
    KubeletCsrApprover,
    Csi,
    CertManager,
    Kyverno,
    Gatekeeper,
    ArgoCd,
    Flux,
}

impl Display for ComponentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ComponentKind::Cilium => "cilium",
            ComponentKind::Calico => "calico",
            ComponentKind::MetricsServer => "metrics-server",
            ComponentKind::LoadBalancer => "load-balancer",
            ComponentKind::KubeletCsrApprover => "kubelet-csr-approver",
            ComponentKind::Csi => "csi",
            ComponentKind::CertManager => "cert-manager",
            ComponentKind::Kyverno => "kyverno",
            ComponentKind::Gatekeeper => "gatekeeper",
            ComponentKind::ArgoCd => "argocd",
            ComponentKind::Flux => "flux",
        })
    }
}

/// Readiness floor per component. Calico is elevated because its operator
/// must converge before anything becomes schedulable.
pub fn default_timeout_for(kind: ComponentKind) -> Duration {
    match kind {
        ComponentKind::Calico => Duration::from_secs(15 * 60),
        ComponentKind::Cilium | ComponentKind::ArgoCd | ComponentKind::Flux => Duration::from_secs(10 * 60),
        _ => Duration::from_secs(5 * 60),
    }
}

/// `timeout = max(default_for(kind), descriptor.timeoutOverride)`.
pub fn effective_timeout(kind: ComponentKind, timeout_override: Option<Duration>) -> Duration {
    let floor = default_timeout_for(kind);
    match timeout_override {
        Some(requested) => floor.max(requested),
        None => floor,
    }
}

/// Everything an installer needs to act on one cluster.
pub struct InstallTarget {
    pub kubeconfig_path: PathBuf,
    pub kube: Option<Arc<KubeClient>>,
    pub envs: Vec<(String, String)>,
    pub abort: AbortHandle,
    pub timeout_override: Option<Duration>,
}

impl InstallTarget {
    fn envs_ref(&self) -> Vec<(&str, &str)> {
        self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }
}

pub trait Installer: Send + Sync {
    fn component_kind(&self) -> ComponentKind;

    fn name(&self) -> String {
        self.component_kind().to_string()
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError>;

    fn wait_for_readiness(&self, _target: &InstallTarget) -> Result<(), CommandError> {
        Ok(())
    }

    /// In-place removal, used by the update plan when a component toggles
    /// off. Components that cannot be removed keep the default.
    fn uninstall(&self, _target: &InstallTarget) -> Result<(), CommandError> {
        Err(CommandError::new_from_safe_message(format!(
            "component `{}` cannot be uninstalled in place",
            self.name()
        )))
    }
}

/// CNIs additionally expose the namespaces the post-install gate diagnoses
/// on timeout.
pub trait CniInstaller: Installer {
    fn cni_namespaces(&self) -> Vec<String>;
}

/// Installs a chart under the component's effective timeout, honoring
/// cancellation.
pub(crate) fn run_chart_install(
    kind: ComponentKind,
    chart: &CommonChart,
    target: &InstallTarget,
) -> Result<(), CommandError> {
    let timeout = effective_timeout(kind, target.timeout_override);
    let cmd_killer = CommandKiller::from(timeout, target.abort.clone());

    let kube_client = target.kube.as_ref().map(|k| k.client());
    chart
        .run(kube_client.as_ref(), &target.kubeconfig_path, &target.envs_ref(), &cmd_killer)
        .map_err(CommandError::from)
}

/// Uninstalls a chart release; absent releases succeed.
pub(crate) fn run_chart_uninstall(
    kind: ComponentKind,
    chart: &CommonChart,
    target: &InstallTarget,
) -> Result<(), CommandError> {
    let mut chart_info = chart.chart_info.clone();
    chart_info.action = crate::helm::HelmAction::Destroy;
    let destroy = CommonChart::new(chart_info, None);

    run_chart_install(kind, &destroy, target)
}

/// Node-ready gate shared by the CNI installers: at least one node must
/// report Ready; on timeout the failing pods of the CNI namespaces are
/// folded into the error.
pub(crate) fn wait_for_node_ready_with_diagnosis(
    kind: ComponentKind,
    cni_namespaces: &[String],
    target: &InstallTarget,
) -> Result<(), CommandError> {
    let kube = match &target.kube {
        Some(kube) => kube,
        None => {
            return Err(CommandError::new_from_safe_message(
                "no kubernetes client available for the CNI readiness gate".to_string(),
            ));
        }
    };

    let timeout = effective_timeout(kind, target.timeout_override);
    match kube.wait_for_any_node_ready(timeout, &target.abort) {
        Ok(()) => Ok(()),
        Err(KubeClientError::Timeout { .. }) => {
            let failing = kube
                .list_failing_pods(cni_namespaces)
                .unwrap_or_default()
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<String>>();
            let pods_part = if failing.is_empty() {
                "no failing pod reported".to_string()
            } else {
                format!("failing pods: {}", failing.join(", "))
            };
            Err(CommandError::new_from_safe_message(format!(
                "no node became Ready within {}s waiting for {kind}; {pods_part}",
                timeout.as_secs()
            )))
        }
        Err(e) => Err(CommandError::new(
            format!("error while waiting for {kind} readiness"),
            Some(e.to_string()),
            None,
        )),
    }
}

/// Builds the installers a descriptor requires, phase by phase. Overridable
/// through the `Dependencies` record for tests.
pub trait InstallerCatalog: Send + Sync {
    /// The CNI gate installer, when a custom CNI is selected.
    fn cni_installer(&self, descriptor: &ClusterDescriptor) -> Option<Box<dyn CniInstaller>>;

    /// Phase-1 parallel installers: metrics-server, load-balancer,
    /// kubelet-csr-approver, CSI, cert-manager, policy engine.
    fn infrastructure_installers(&self, descriptor: &ClusterDescriptor) -> Vec<Box<dyn Installer>>;

    /// Phase-2 parallel installers: the GitOps engines.
    fn gitops_installers(&self, descriptor: &ClusterDescriptor) -> Vec<Box<dyn Installer>>;
}

#[derive(Default)]
pub struct DefaultInstallerCatalog {}

impl InstallerCatalog for DefaultInstallerCatalog {
    fn cni_installer(&self, descriptor: &ClusterDescriptor) -> Option<Box<dyn CniInstaller>> {
        match descriptor.cni {
            CniOption::Default => None,
            CniOption::Cilium => Some(Box::new(cilium_chart::CiliumChartInstaller::new())),
            CniOption::Calico => Some(Box::new(calico_chart::CalicoChartInstaller::new())),
        }
    }

    fn infrastructure_installers(&self, descriptor: &ClusterDescriptor) -> Vec<Box<dyn Installer>> {
        let mut installers: Vec<Box<dyn Installer>> = vec![];

        // K3s ships metrics-server natively, Enabled is a no-op there.
        if descriptor.metrics_server == MetricsServerOption::Enabled && descriptor.distribution != Distribution::K3s {
            installers.push(Box::new(metrics_server_chart::MetricsServerChartInstaller::new()));
        }

        if descriptor.requires_kubelet_csr_approver() {
            installers.push(Box::new(
                kubelet_csr_approver_chart::KubeletCsrApproverChartInstaller::new(),
            ));
        }

        // On Talos over Hetzner the cloud controller manager owns load
        // balancing, nothing to install.
        let ccm_owns_load_balancer =
            descriptor.distribution == Distribution::Talos && descriptor.provider.is_cloud();
        if descriptor.load_balancer == LoadBalancerOption::Enabled && !ccm_owns_load_balancer {
            installers.push(Box::new(metallb_chart::MetalLbChartInstaller::new()));
        }

        if matches!(descriptor.csi, CsiOption::Enabled | CsiOption::LocalPathStorage) {
            installers.push(Box::new(local_path_storage_chart::LocalPathStorageChartInstaller::new()));
        }

        if descriptor.cert_manager == crate::io_models::cluster::CertManagerOption::Enabled {
            installers.push(Box::new(cert_manager_chart::CertManagerChartInstaller::new()));
        }

        match descriptor.policy_engine {
            PolicyEngineOption::None => {}
            PolicyEngineOption::Kyverno => installers.push(Box::new(kyverno_chart::KyvernoChartInstaller::new())),
            PolicyEngineOption::Gatekeeper => {
                installers.push(Box::new(gatekeeper_chart::GatekeeperChartInstaller::new()))
            }
        }

        installers
    }

    fn gitops_installers(&self, descriptor: &ClusterDescriptor) -> Vec<Box<dyn Installer>> {
        match descriptor.gitops_engine {
            GitOpsEngineOption::None => vec![],
            GitOpsEngineOption::Flux => vec![Box::new(flux_chart::FluxChartInstaller::new())],
            GitOpsEngineOption::ArgoCD => vec![Box::new(argocd_chart::ArgoCdChartInstaller::new())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_models::cluster::CertManagerOption;

    fn descriptor() -> ClusterDescriptor {
        ClusterDescriptor::from_yaml(
            r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: Vanilla
  connection:
    kubeconfig: /tmp/kubeconfig
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_effective_timeout_takes_the_max() {
        // setup:
        struct TestCase {
            kind: ComponentKind,
            timeout_override: Option<Duration>,
            expected: Duration,
        }

        let test_cases = vec![
            TestCase {
                kind: ComponentKind::MetricsServer,
                timeout_override: None,
                expected: Duration::from_secs(300),
            },
            TestCase {
                kind: ComponentKind::MetricsServer,
                timeout_override: Some(Duration::from_secs(30)),
                expected: Duration::from_secs(300),
            },
            TestCase {
                kind: ComponentKind::Calico,
                timeout_override: Some(Duration::from_secs(30 * 60)),
                expected: Duration::from_secs(30 * 60),
            },
        ];

        for tc in test_cases {
            // execute & verify:
            assert_eq!(tc.expected, effective_timeout(tc.kind, tc.timeout_override));
        }
    }

    #[test]
    fn test_catalog_scenario_vanilla_metrics_enabled() {
        // setup: distribution=Vanilla, cni=Default, metricsServer=Enabled
        let mut descriptor = descriptor();
        descriptor.metrics_server = MetricsServerOption::Enabled;
        let catalog = DefaultInstallerCatalog::default();

        // execute:
        let cni = catalog.cni_installer(&descriptor);
        let phase1: Vec<ComponentKind> = catalog
            .infrastructure_installers(&descriptor)
            .iter()
            .map(|i| i.component_kind())
            .collect();
        let phase2 = catalog.gitops_installers(&descriptor);

        // verify: phase-1 is {metrics-server, kubelet-csr-approver}, no CNI, no phase-2
        assert!(cni.is_none());
        assert_eq!(vec![ComponentKind::MetricsServer, ComponentKind::KubeletCsrApprover], phase1);
        assert!(phase2.is_empty());
    }

    #[test]
    fn test_catalog_talos_skips_csr_approver() {
        // setup: distribution=Talos, cni=Cilium, metricsServer=Enabled
        let mut descriptor = descriptor();
        descriptor.distribution = Distribution::Talos;
        descriptor.cni = CniOption::Cilium;
        descriptor.metrics_server = MetricsServerOption::Enabled;
        let catalog = DefaultInstallerCatalog::default();

        // execute:
        let cni = catalog.cni_installer(&descriptor);
        let phase1: Vec<ComponentKind> = catalog
            .infrastructure_installers(&descriptor)
            .iter()
            .map(|i| i.component_kind())
            .collect();

        // verify: cilium gate present, csr-approver absent (Talos exception)
        assert_eq!(ComponentKind::Cilium, cni.unwrap().component_kind());
        assert_eq!(vec![ComponentKind::MetricsServer], phase1);
    }

    #[test]
    fn test_catalog_k3s_metrics_enabled_is_native() {
        let mut descriptor = descriptor();
        descriptor.distribution = Distribution::K3s;
        descriptor.metrics_server = MetricsServerOption::Enabled;
        let catalog = DefaultInstallerCatalog::default();

        let phase1: Vec<ComponentKind> = catalog
            .infrastructure_installers(&descriptor)
            .iter()
            .map(|i| i.component_kind())
            .collect();

        // k3s ships metrics-server, only the csr approver remains
        assert_eq!(vec![ComponentKind::KubeletCsrApprover], phase1);
    }

    #[test]
    fn test_catalog_full_component_set() {
        // setup:
        let mut descriptor = descriptor();
        descriptor.cert_manager = CertManagerOption::Enabled;
        descriptor.csi = CsiOption::LocalPathStorage;
        descriptor.load_balancer = LoadBalancerOption::Enabled;
        descriptor.policy_engine = PolicyEngineOption::Kyverno;
        descriptor.gitops_engine = GitOpsEngineOption::ArgoCD;
        let catalog = DefaultInstallerCatalog::default();

        // execute:
        let phase1: Vec<ComponentKind> = catalog
            .infrastructure_installers(&descriptor)
            .iter()
            .map(|i| i.component_kind())
            .collect();
        let phase2: Vec<ComponentKind> = catalog
            .gitops_installers(&descriptor)
            .iter()
            .map(|i| i.component_kind())
            .collect();

        // verify:
        assert_eq!(
            vec![
                ComponentKind::LoadBalancer,
                ComponentKind::Csi,
                ComponentKind::CertManager,
                ComponentKind::Kyverno
            ],
            phase1
        );
        assert_eq!(vec![ComponentKind::ArgoCd], phase2);
    }
}
