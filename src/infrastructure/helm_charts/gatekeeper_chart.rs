use crate::errors::CommandError;
use crate::helm::{ChartInfo, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use url::Url;

pub struct GatekeeperChartInstaller {}

impl GatekeeperChartInstaller {
    pub fn new() -> GatekeeperChartInstaller {
        GatekeeperChartInstaller {}
    }

    pub fn chart_name() -> String {
        "gatekeeper".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: GatekeeperChartInstaller::chart_name(),
                chart: GatekeeperChartInstaller::chart_name(),
                repository: Some(
                    Url::parse("https://open-policy-agent.github.io/gatekeeper/charts")
                        .expect("valid gatekeeper repo url"),
                ),
                namespace: HelmChartNamespaces::GatekeeperSystem,
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for GatekeeperChartInstaller {
    fn default() -> Self {
        GatekeeperChartInstaller::new()
    }
}

impl Installer for GatekeeperChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::Gatekeeper
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}
