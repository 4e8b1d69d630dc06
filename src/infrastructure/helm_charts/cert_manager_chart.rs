use crate::errors::CommandError;
use crate::helm::{ChartInfo, ChartInstallationChecker, ChartSetValue, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use kube::Client;
use url::Url;

pub struct CertManagerChartInstaller {}

impl CertManagerChartInstaller {
    pub fn new() -> CertManagerChartInstaller {
        CertManagerChartInstaller {}
    }

    pub fn chart_name() -> String {
        "cert-manager".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: CertManagerChartInstaller::chart_name(),
                chart: CertManagerChartInstaller::chart_name(),
                repository: Some(Url::parse("https://charts.jetstack.io").expect("valid jetstack repo url")),
                namespace: HelmChartNamespaces::CertManager,
                values: vec![ChartSetValue {
                    key: "crds.enabled".to_string(),
                    value: "true".to_string(),
                }],
                ..Default::default()
            },
            Some(Box::new(CertManagerChartChecker::new())),
        )
    }
}

impl Default for CertManagerChartInstaller {
    fn default() -> Self {
        CertManagerChartInstaller::new()
    }
}

impl Installer for CertManagerChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::CertManager
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}

#[derive(Clone)]
pub struct CertManagerChartChecker {}

impl CertManagerChartChecker {
    pub fn new() -> CertManagerChartChecker {
        CertManagerChartChecker {}
    }
}

impl Default for CertManagerChartChecker {
    fn default() -> Self {
        CertManagerChartChecker::new()
    }
}

impl ChartInstallationChecker for CertManagerChartChecker {
    fn verify_installation(&self, _kube_client: &Client) -> Result<(), CommandError> {
        // TODO(ksail): issue a self-signed Certificate and wait for Ready
        Ok(())
    }

    fn clone_dyn(&self) -> Box<dyn ChartInstallationChecker> {
        Box::new(self.clone())
    }
}
