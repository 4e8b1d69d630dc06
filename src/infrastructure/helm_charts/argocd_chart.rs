use crate::errors::CommandError;
use crate::helm::{ChartInfo, CommonChart, HelmChartNamespaces};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer, run_chart_install, run_chart_uninstall};
use crate::services::kube_client::KubeClientError;
use url::Url;

pub struct ArgoCdChartInstaller {}

impl ArgoCdChartInstaller {
    pub fn new() -> ArgoCdChartInstaller {
        ArgoCdChartInstaller {}
    }

    pub fn chart_name() -> String {
        "argo-cd".to_string()
    }

    fn to_common_helm_chart(&self) -> CommonChart {
        CommonChart::new(
            ChartInfo {
                name: "argocd".to_string(),
                chart: ArgoCdChartInstaller::chart_name(),
                repository: Some(Url::parse("https://argoproj.github.io/argo-helm").expect("valid argo repo url")),
                namespace: HelmChartNamespaces::ArgoCd,
                ..Default::default()
            },
            None,
        )
    }
}

impl Default for ArgoCdChartInstaller {
    fn default() -> Self {
        ArgoCdChartInstaller::new()
    }
}

impl Installer for ArgoCdChartInstaller {
    fn component_kind(&self) -> ComponentKind {
        ComponentKind::ArgoCd
    }

    fn install(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_install(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn uninstall(&self, target: &InstallTarget) -> Result<(), CommandError> {
        run_chart_uninstall(self.component_kind(), &self.to_common_helm_chart(), target)
    }

    fn wait_for_readiness(&self, target: &InstallTarget) -> Result<(), CommandError> {
        let kube = match &target.kube {
            Some(kube) => kube,
            None => return Ok(()),
        };

        let timeout = super::effective_timeout(self.component_kind(), target.timeout_override);
        match kube.wait_for_deployment_ready("argocd", "argocd-repo-server", timeout, &target.abort) {
            Ok(()) => Ok(()),
            Err(KubeClientError::Timeout { .. }) => {
                let failing = kube
                    .list_failing_pods(&["argocd".to_string()])
                    .unwrap_or_default()
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");
                Err(CommandError::new_from_safe_message(format!(
                    "argocd did not become ready within {}s; failing pods: {failing}",
                    timeout.as_secs()
                )))
            }
            Err(e) => Err(CommandError::new(
                "error while waiting for argocd readiness".to_string(),
                Some(e.to_string()),
                None,
            )),
        }
    }
}
