use crate::cmd::command::CommandKiller;
use crate::cmd::helm::{Helm, HelmError};
use crate::errors::CommandError;
use crate::helm::HelmAction::Deploy;
use retry::OperationResult;
use retry::delay::Fixed;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum HelmChartError {
    #[error("Error while executing helm command")]
    HelmError(#[from] HelmError),

    #[error("Error while executing command")]
    CommandError(#[from] CommandError),

    #[error("Error while writing values file for chart {chart_name:?}: {msg:?}")]
    ValuesFileError { chart_name: String, msg: String },
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum HelmAction {
    Deploy,
    Destroy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HelmChartNamespaces {
    KubeSystem,
    CertManager,
    FluxSystem,
    ArgoCd,
    Kyverno,
    GatekeeperSystem,
    MetalLbSystem,
    LocalPathStorage,
    Custom,
}

impl Display for HelmChartNamespaces {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            HelmChartNamespaces::Custom => "custom",
            HelmChartNamespaces::KubeSystem => "kube-system",
            HelmChartNamespaces::CertManager => "cert-manager",
            HelmChartNamespaces::FluxSystem => "flux-system",
            HelmChartNamespaces::ArgoCd => "argocd",
            HelmChartNamespaces::Kyverno => "kyverno",
            HelmChartNamespaces::GatekeeperSystem => "gatekeeper-system",
            HelmChartNamespaces::MetalLbSystem => "metallb-system",
            HelmChartNamespaces::LocalPathStorage => "local-path-storage",
        };

        f.write_str(str)
    }
}

#[derive(Clone, Debug)]
pub struct ChartSetValue {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug)]
pub struct ChartValuesGenerated {
    pub filename: String,
    pub yaml_content: String,
}

impl ChartValuesGenerated {
    pub fn new(name: String, yaml_content: String) -> Self {
        ChartValuesGenerated {
            filename: format!("{name}_override.yaml"),
            yaml_content,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChartInfoUpgradeRetry {
    pub nb_retry: usize,
    pub delay_in_milli_sec: u64,
}

#[derive(Clone, Debug)]
pub struct ChartInfo {
    /// Release name.
    pub name: String,
    /// Chart reference: chart name resolved against `repository`, or a full
    /// `oci://` reference.
    pub chart: String,
    pub repository: Option<Url>,
    pub version: Option<String>,
    pub namespace: HelmChartNamespaces,
    pub custom_namespace: Option<String>,
    pub action: HelmAction,
    pub atomic: bool,
    pub create_namespace: bool,
    pub timeout_in_seconds: i64,
    pub dry_run: bool,
    pub wait: bool,
    /// Values used to override values set inside values files.
    pub values: Vec<ChartSetValue>,
    pub values_string: Vec<ChartSetValue>,
    pub values_files: Vec<String>,
    pub yaml_files_content: Vec<ChartValuesGenerated>,
    pub skip_if_already_installed: bool,
    pub upgrade_retry: Option<ChartInfoUpgradeRetry>,
}

impl ChartInfo {
    pub fn new_from_release_name(name: &str, custom_namespace: &str) -> ChartInfo {
        ChartInfo {
            name: name.to_string(),
            namespace: HelmChartNamespaces::Custom,
            custom_namespace: Some(custom_namespace.to_string()),
            ..Default::default()
        }
    }

    pub fn get_namespace_string(&self) -> String {
        match self.namespace {
            HelmChartNamespaces::Custom => self
                .custom_namespace
                .clone()
                .unwrap_or_else(|| self.namespace.to_string()),
            _ => self.namespace.to_string(),
        }
    }
}

impl Default for ChartInfo {
    fn default() -> ChartInfo {
        ChartInfo {
            name: "undefined".to_string(),
            chart: "undefined".to_string(),
            repository: None,
            version: None,
            namespace: HelmChartNamespaces::KubeSystem,
            custom_namespace: None,
            action: Deploy,
            atomic: true,
            create_namespace: true,
            timeout_in_seconds: 600,
            dry_run: false,
            wait: true,
            values: vec![],
            values_string: vec![],
            values_files: vec![],
            yaml_files_content: vec![],
            skip_if_already_installed: false,
            upgrade_retry: None,
        }
    }
}

pub trait ChartInstallationChecker: Send {
    fn verify_installation(&self, kube_client: &kube::Client) -> Result<(), CommandError>;
    fn clone_dyn(&self) -> Box<dyn ChartInstallationChecker>;
}

impl Clone for Box<dyn ChartInstallationChecker> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

pub trait HelmChart: Send {
    fn clone_dyn(&self) -> Box<dyn HelmChart>;

    fn get_chart_info(&self) -> &ChartInfo;

    fn namespace(&self) -> String {
        self.get_chart_info().get_namespace_string()
    }

    fn run(
        &self,
        kube_client: Option<&kube::Client>,
        kubeconfig: &Path,
        envs: &[(&str, &str)],
        cmd_killer: &CommandKiller,
    ) -> Result<(), HelmChartError> {
        info!("prepare and deploy chart {}", &self.get_chart_info().name);
        let chart_info = self.get_chart_info();
        let helm = Helm::new(Some(kubeconfig), envs)?;

        match chart_info.action {
            Deploy => {
                if chart_info.skip_if_already_installed {
                    let installed = helm
                        .get_release(&chart_info.name, &chart_info.get_namespace_string(), envs)
                        .unwrap_or(None)
                        .is_some();
                    if installed {
                        info!(
                            "chart {} is already installed and option to skip it if installed is set, skipping",
                            &chart_info.name
                        );
                        return Ok(());
                    }
                }

                // Generated values land in a scratch dir living for the whole
                // upgrade, helm reads them lazily.
                let workdir = tempfile::tempdir().map_err(|e| HelmChartError::ValuesFileError {
                    chart_name: chart_info.name.clone(),
                    msg: e.to_string(),
                })?;
                let mut chart = chart_info.clone();
                for generated in &chart_info.yaml_files_content {
                    let path = workdir.path().join(&generated.filename);
                    fs::write(&path, &generated.yaml_content).map_err(|e| HelmChartError::ValuesFileError {
                        chart_name: chart_info.name.clone(),
                        msg: e.to_string(),
                    })?;
                    chart.values_files.push(path.to_string_lossy().to_string());
                }

                let attempts = if let Some(upgrade_retry) = &chart_info.upgrade_retry {
                    Fixed::from_millis(upgrade_retry.delay_in_milli_sec).take(upgrade_retry.nb_retry)
                } else {
                    Fixed::from_millis(0).take(0)
                };
                let result = retry::retry(attempts, || match helm.upgrade(&chart, envs, cmd_killer) {
                    Ok(_) => OperationResult::Ok(()),
                    Err(e) => {
                        warn!("Helm upgrade failed, retrying... error: {:?}", e);
                        OperationResult::Retry(e)
                    }
                });
                if let Err(e) = result {
                    return Err(HelmChartError::HelmError(e.error));
                }

                if let (Some(checker), Some(kube_client)) = (self.get_installation_checker(), kube_client) {
                    checker.verify_installation(kube_client)?;
                }
            }
            HelmAction::Destroy => {
                helm.uninstall(chart_info, envs, cmd_killer)?;
            }
        }

        Ok(())
    }

    fn get_installation_checker(&self) -> Option<&dyn ChartInstallationChecker> {
        None
    }
}

/// Default chart implementation, covering the regular install path.
pub struct CommonChart {
    pub chart_info: ChartInfo,
    pub chart_installation_checker: Option<Box<dyn ChartInstallationChecker>>,
}

impl CommonChart {
    pub fn new(chart_info: ChartInfo, chart_installation_checker: Option<Box<dyn ChartInstallationChecker>>) -> Self {
        CommonChart {
            chart_info,
            chart_installation_checker,
        }
    }
}

impl HelmChart for CommonChart {
    fn clone_dyn(&self) -> Box<dyn HelmChart> {
        Box::new(CommonChart {
            chart_info: self.chart_info.clone(),
            chart_installation_checker: self.chart_installation_checker.clone(),
        })
    }

    fn get_chart_info(&self) -> &ChartInfo {
        &self.chart_info
    }

    fn get_installation_checker(&self) -> Option<&dyn ChartInstallationChecker> {
        self.chart_installation_checker.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_string() {
        // setup:
        struct TestCase {
            chart: ChartInfo,
            expected: &'static str,
        }

        let test_cases = vec![
            TestCase {
                chart: ChartInfo {
                    namespace: HelmChartNamespaces::CertManager,
                    ..Default::default()
                },
                expected: "cert-manager",
            },
            TestCase {
                chart: ChartInfo::new_from_release_name("x", "my-namespace"),
                expected: "my-namespace",
            },
            TestCase {
                chart: ChartInfo {
                    namespace: HelmChartNamespaces::Custom,
                    custom_namespace: None,
                    ..Default::default()
                },
                expected: "custom",
            },
        ];

        for tc in test_cases {
            // execute & verify:
            assert_eq!(tc.expected, tc.chart.get_namespace_string());
        }
    }
}
