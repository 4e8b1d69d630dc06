use crate::errors::CommandError;
use crate::helm::{ChartInfo, ChartSetValue, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{
    CniInstaller, ComponentKind, InstallTarget, Installer, run_chart_install, wait_for_node_ready_with_diagnosis,
};
use url::Url;

/// Cilium CNI. The helm install returns before the agent pods are ready on
/// some distributions, so readiness is enforced by an explicit node-ready
/// gate with pod-failure diagnosis on timeout.
pub struct CiliumChartInstaller {}

impl CiliumChartInstaller {
    pub fn new() -> CiliumChartInstaller {
        CiliumChartInstaller {}
    }

    pub fn chart_name() -> String {
        "cilium".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: CiliumChartInstaller::chart_name(),
                chart: CiliumChartInstaller::chart_name(),
                repository: Some(Url::parse("https://helm.cilium.io").expect("valid cilium repo url")),
                namespace: HelmChartNamespaces::KubeSystem,
                values: vec![
                    ChartSetValue {
                        key: "operator.replicas".to_string(),
                        value: "1".to_string(),
                    },
                    ChartSetValue {
                        key: "ipam.mode".to_string(),
                        value: "kubernetes".to_string(),
                    },
                ],
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for CiliumChartInstaller {
    fn default() -> Self {
        CiliumChartInstaller::new()
    }
}

impl Installer for CiliumChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::Cilium
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn wait_for_readiness(&self, target: &InstallTarget) -> Result<(), CommandError> {
        wait_for_node_ready_with_diagnosis(self.component_kind(), &self.cni_namespaces(), target)
    }
}

impl CniInstaller for CiliumChartInstaller {
    fn cni_namespaces(&self) -> Vec<String> {
        vec!["kube-system".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cilium_chart_definition() {
        // setup:
        let installer = CiliumChartInstaller::new();

        // execute:
        let chart = installer.to_common_helm_chart();

        // verify:
        assert_eq!("cilium", chart.chart_info.name);
        assert_eq!("kube-system", chart.chart_info.get_namespace_string());
        assert!(chart.chart_info.repository.as_ref().unwrap().as_str().contains("helm.cilium.io"));
    }
}
