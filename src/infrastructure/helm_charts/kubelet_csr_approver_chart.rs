use crate::errors::CommandError;
use crate::helm::{ChartInfo, ChartSetValue, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use url::Url;

/// Approves kubelet serving-cert CSRs so metrics-server can verify TLS.
/// Required on every distribution except Talos, which approves through
/// extraManifests during bootstrap.
pub struct KubeletCsrApproverChartInstaller {}

impl KubeletCsrApproverChartInstaller {
    pub fn new() -> KubeletCsrApproverChartInstaller {
        KubeletCsrApproverChartInstaller {}
    }

    pub fn chart_name() -> String {
        "kubelet-csr-approver".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: KubeletCsrApproverChartInstaller::chart_name(),
                chart: KubeletCsrApproverChartInstaller::chart_name(),
                repository: Some(
                    Url::parse("https://postfinance.github.io/kubelet-csr-approver/")
                        .expect("valid kubelet-csr-approver repo url"),
                ),
                namespace: HelmChartNamespaces::KubeSystem,
                values: vec![ChartSetValue {
                    key: "providerRegex".to_string(),
                    value: ".*".to_string(),
                }],
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for KubeletCsrApproverChartInstaller {
    fn default() -> Self {
        KubeletCsrApproverChartInstaller::new()
    }
}

impl Installer for KubeletCsrApproverChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::KubeletCsrApprover
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}
