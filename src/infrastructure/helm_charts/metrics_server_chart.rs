use crate::errors::CommandError;
use crate::helm::{ChartInfo, ChartInstallationChecker, ChartSetValue, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use kube::Client;
use url::Url;

pub struct MetricsServerChartInstaller {}

impl MetricsServerChartInstaller {
    pub fn new() -> MetricsServerChartInstaller {
        MetricsServerChartInstaller {}
    }

    pub fn chart_name() -> String {
        "metrics-server".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: MetricsServerChartInstaller::chart_name(),
                chart: MetricsServerChartInstaller::chart_name(),
                repository: Some(
                    Url::parse("https://kubernetes-sigs.github.io/metrics-server/")
                        .expect("valid metrics-server repo url"),
                ),
                namespace: HelmChartNamespaces::KubeSystem,
                values: vec![
                    // local kubelets serve self-signed certs until rotation kicks in
                    ChartSetValue {
                        key: "args[0]".to_string(),
                        value: "--kubelet-insecure-tls".to_string(),
                    },
                ],
                ..Default::default()
            },
            Some(Box::new(MetricsServerChartChecker::new())),
        )
    }
}

impl Default for MetricsServerChartInstaller {
    fn default() -> Self {
        MetricsServerChartInstaller::new()
    }
}

impl Installer for MetricsServerChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::MetricsServer
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}

#[derive(Clone)]
pub struct MetricsServerChartChecker {}

impl MetricsServerChartChecker {
    pub fn new() -> MetricsServerChartChecker {
        MetricsServerChartChecker {}
    }
}

impl Default for MetricsServerChartChecker {
    fn default() -> Self {
        MetricsServerChartChecker::new()
    }
}

impl ChartInstallationChecker for MetricsServerChartChecker {
    fn verify_installation(&self, _kube_client: &Client) -> Result<(), CommandError> {
        // TODO(ksail): check the v1beta1.metrics.k8s.io APIService reports Available
        Ok(())
    }

    fn clone_dyn(&self) -> Box<dyn ChartInstallationChecker> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_chart_definition() {
        // setup:
        let installer = MetricsServerChartInstaller::new();

        // execute:
        let chart = installer.to_common_helm_chart();

        // verify: insecure kubelet TLS arg present for local clusters
        assert_eq!("metrics-server", chart.chart_info.name);
        assert!(
            chart
                .chart_info
                .values
                .iter()
                .any(|v| v.value == "--kubelet-insecure-tls")
        );
    }
}
