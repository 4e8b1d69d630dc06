use crate::errors::CommandError;
use crate::helm::{ChartInfo, ChartSetValue, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use url::Url;

/// Local-path provisioner as the CSI of local clusters; installed as the
/// default storage class.
pub struct LocalPathStorageChartInstaller {}

impl LocalPathStorageChartInstaller {
    pub fn new() -> LocalPathStorageChartInstaller {
        LocalPathStorageChartInstaller {}
    }

    pub fn chart_name() -> String {
        "local-path-provisioner".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: LocalPathStorageChartInstaller::chart_name(),
                chart: LocalPathStorageChartInstaller::chart_name(),
                repository: Some(
                    Url::parse("https://charts.containeroo.ch").expect("valid local-path-provisioner repo url"),
                ),
                namespace: HelmChartNamespaces::LocalPathStorage,
                values: vec![ChartSetValue {
                    key: "storageClass.defaultClass".to_string(),
                    value: "true".to_string(),
                }],
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for LocalPathStorageChartInstaller {
    fn default() -> Self {
        LocalPathStorageChartInstaller::new()
    }
}

impl Installer for LocalPathStorageChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::Csi
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }
}
