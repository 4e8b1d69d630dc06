use crate::errors::CommandError;
use crate::helm::{ChartInfo, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use url::Url;

pub struct MetalLbChartInstaller {}

impl MetalLbChartInstaller {
    pub fn new() -> MetalLbChartInstaller {
        MetalLbChartInstaller {}
    }

    pub fn chart_name() -> String {
        "metallb".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: MetalLbChartInstaller::chart_name(),
                chart: MetalLbChartInstaller::chart_name(),
                repository: Some(Url::parse("https://metallb.github.io/metallb").expect("valid metallb repo url")),
                namespace: HelmChartNamespaces::MetalLbSystem,
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for MetalLbChartInstaller {
    fn default() -> Self {
        MetalLbChartInstaller::new()
    }
}

impl Installer for MetalLbChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::LoadBalancer
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}
