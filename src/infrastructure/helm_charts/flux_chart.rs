use crate::errors::CommandError;
use crate::helm::{ChartInfo, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};

/// Flux operator; the post-install GitOps configuration creates the
/// FluxInstance it reconciles.
pub struct FluxChartInstaller {}

impl FluxChartInstaller {
    pub fn new() -> FluxChartInstaller {
        FluxChartInstaller {}
    }

    pub fn chart_name() -> String {
        "flux-operator".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: FluxChartInstaller::chart_name(),
                // OCI reference, no --repo involved
                chart: "oci://ghcr.io/controlplaneio-fluxcd/charts/flux-operator".to_string(),
                repository: None,
                namespace: HelmChartNamespaces::FluxSystem,
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for FluxChartInstaller {
    fn default() -> Self {
        FluxChartInstaller::new()
    }
}

impl Installer for FluxChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::Flux
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flux_chart_uses_oci_reference() {
        // setup:
        let installer = FluxChartInstaller::new();

        // execute:
        let chart = installer.to_common_helm_chart();

        // verify:
        assert!(chart.chart_info.chart.starts_with("oci://"));
        assert!(chart.chart_info.repository.is_none());
        assert_eq!("flux-system", chart.chart_info.get_namespace_string());
    }
}
