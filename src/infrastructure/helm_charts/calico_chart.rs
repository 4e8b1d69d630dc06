use crate::errors::CommandError;
use crate::helm::{ChartInfo, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{
    CniInstaller, ComponentKind, InstallTarget, Installer, run_chart_install, wait_for_node_ready_with_diagnosis,
};
use url::Url;

/// Calico CNI via the tigera operator. Carries an elevated readiness floor:
/// the operator must converge before applications become schedulable.
pub struct CalicoChartInstaller {}

impl CalicoChartInstaller {
    pub fn new() -> CalicoChartInstaller {
        CalicoChartInstaller {}
    }

    pub fn chart_name() -> String {
        "tigera-operator".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: CalicoChartInstaller::chart_name(),
                chart: CalicoChartInstaller::chart_name(),
                repository: Some(Url::parse("https://docs.tigera.io/calico/charts").expect("valid calico repo url")),
                namespace: HelmChartNamespaces::Custom,
                custom_namespace: Some("tigera-operator".to_string()),
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for CalicoChartInstaller {
    fn default() -> Self {
        CalicoChartInstaller::new()
    }
}

impl Installer for CalicoChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::Calico
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn wait_for_readiness(&self, target: &InstallTarget) -> Result<(), CommandError> {
        wait_for_node_ready_with_diagnosis(self.component_kind(), &self.cni_namespaces(), target)
    }
}

impl CniInstaller for CalicoChartInstaller {
    fn cni_namespaces(&self) -> Vec<String> {
        vec!["tigera-operator".to_string(), "calico-system".to_string()]
    }
}
