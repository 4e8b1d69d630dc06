use crate::errors::CommandError;
use crate::helm::{ChartInfo, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use url::Url;

pub struct KyvernoChartInstaller {}

impl KyvernoChartInstaller {
    pub fn new() -> KyvernoChartInstaller {
        KyvernoChartInstaller {}
    }

    pub fn chart_name() -> String {
        "kyverno".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: KyvernoChartInstaller::chart_name(),
                chart: KyvernoChartInstaller::chart_name(),
                repository: Some(Url::parse("https://kyverno.github.io/kyverno/").expect("valid kyverno repo url")),
                namespace: HelmChartNamespaces::Kyverno,
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for KyvernoChartInstaller {
    fn default() -> Self {
        KyvernoChartInstaller::new()
    }
}

impl Installer for KyvernoChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::Kyverno
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}
