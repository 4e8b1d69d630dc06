use crate::cmd::command::{CommandError, CommandKiller, KsailCommand};
use crate::helm::ChartInfo;
use semver::Version;
use serde_derive::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum HelmError {
    #[error("Helm invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Helm release `{0}` does not exist")]
    ReleaseDoesNotExist(String),

    #[error("Helm command `{0}` timed out: {1}")]
    Timeout(String, String),

    #[error("Helm command `{0}` was aborted: {1}")]
    Killed(String, String),

    #[error("Helm command `{0}` terminated with an error: {1}")]
    CmdError(String, String),
}

/// A single installed release as reported by `helm list -o json`.
#[derive(Deserialize, Debug, Clone)]
pub struct HelmReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub status: String,
    /// `<chart-name>-<chart-version>` as helm prints it.
    pub chart: String,
    pub app_version: String,
}

impl HelmReleaseInfo {
    /// Extracts the chart version out of helm's `<name>-<version>` chart field.
    pub fn chart_version(&self) -> Option<Version> {
        let candidate = self.chart.rsplit_once('-')?.1;
        Version::parse(candidate).ok()
    }
}

#[derive(Debug)]
pub struct Helm {
    kubeconfig: Option<PathBuf>,
    common_envs: Vec<(String, String)>,
}

impl Helm {
    pub fn new<P: AsRef<Path>>(kubeconfig: Option<P>, common_envs: &[(&str, &str)]) -> Result<Helm, HelmError> {
        let helm = Helm {
            kubeconfig: kubeconfig.map(|p| p.as_ref().to_path_buf()),
            common_envs: common_envs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        };

        // Check that helm is reachable before going further
        let ret = helm_exec_with_output(
            &["version", "--short"],
            &helm.get_all_envs(&[]),
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(10)),
        );
        if let Err(e) = ret {
            return Err(HelmError::InvalidConfig(e.to_string()));
        }

        Ok(helm)
    }

    fn get_all_envs<'a>(&'a self, envs: &'a [(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut all_envs: Vec<(&str, &str)> = self.common_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        all_envs.append(&mut envs.to_vec());

        all_envs
    }

    fn kubeconfig_args(&self) -> Vec<&str> {
        match &self.kubeconfig {
            Some(path) => vec!["--kubeconfig", path.to_str().unwrap_or_default()],
            None => vec![],
        }
    }

    /// Installs or upgrades a release from its chart info.
    pub fn upgrade(
        &self,
        chart: &ChartInfo,
        envs: &[(&str, &str)],
        cmd_killer: &CommandKiller,
    ) -> Result<(), HelmError> {
        let timeout = format!("{}s", chart.timeout_in_seconds);
        let namespace = chart.get_namespace_string();

        let mut args: Vec<String> = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            "--history-max".to_string(),
            "50".to_string(),
            "--timeout".to_string(),
            timeout,
            "--namespace".to_string(),
            namespace,
        ];
        for arg in self.kubeconfig_args() {
            args.push(arg.to_string());
        }
        if chart.create_namespace {
            args.push("--create-namespace".to_string());
        }
        if chart.atomic {
            args.push("--atomic".to_string());
        }
        if chart.wait {
            args.push("--wait".to_string());
        }
        if chart.dry_run {
            args.push("--dry-run".to_string());
        }
        if let Some(repository) = &chart.repository {
            args.push("--repo".to_string());
            args.push(repository.to_string());
        }
        if let Some(version) = &chart.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        for values_file in &chart.values_files {
            args.push("--values".to_string());
            args.push(values_file.clone());
        }
        for value in &chart.values {
            args.push("--set".to_string());
            args.push(format!("{}={}", value.key, value.value));
        }
        for value in &chart.values_string {
            args.push("--set-string".to_string());
            args.push(format!("{}={}", value.key, value.value));
        }
        args.push(chart.name.clone());
        args.push(chart.chart.clone());

        let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let mut stderr_msg = String::new();
        let ret = helm_exec_with_output(
            &args_ref,
            &self.get_all_envs(envs),
            &mut |line| info!("{}", line),
            &mut |line| {
                stderr_msg.push_str(&line);
                warn!("{}", line)
            },
            cmd_killer,
        );

        match ret {
            Ok(_) => Ok(()),
            Err(CommandError::TimeoutError(msg)) => Err(HelmError::Timeout(chart.name.clone(), msg)),
            Err(CommandError::Killed(msg)) => Err(HelmError::Killed(chart.name.clone(), msg)),
            Err(err) => Err(HelmError::CmdError(chart.name.clone(), format!("{err}: {stderr_msg}"))),
        }
    }

    /// Uninstalls a release; absent releases are a success (idempotent).
    pub fn uninstall(
        &self,
        chart: &ChartInfo,
        envs: &[(&str, &str)],
        cmd_killer: &CommandKiller,
    ) -> Result<(), HelmError> {
        if self.get_release(&chart.name, &chart.get_namespace_string(), envs)?.is_none() {
            return Ok(());
        }

        let namespace = chart.get_namespace_string();
        let mut args: Vec<&str> = vec!["uninstall", "--wait", "--namespace", namespace.as_str()];
        let kubeconfig_args = self.kubeconfig_args();
        args.extend_from_slice(&kubeconfig_args);
        args.push(chart.name.as_str());

        let mut stderr_msg = String::new();
        let ret = helm_exec_with_output(
            &args,
            &self.get_all_envs(envs),
            &mut |line| info!("{}", line),
            &mut |line| {
                stderr_msg.push_str(&line);
                warn!("{}", line)
            },
            cmd_killer,
        );

        match ret {
            Ok(_) => Ok(()),
            Err(CommandError::TimeoutError(msg)) => Err(HelmError::Timeout(chart.name.clone(), msg)),
            Err(CommandError::Killed(msg)) => Err(HelmError::Killed(chart.name.clone(), msg)),
            Err(err) => Err(HelmError::CmdError(chart.name.clone(), format!("{err}: {stderr_msg}"))),
        }
    }

    /// Lists releases in a namespace, or in all namespaces when none is given.
    pub fn list_releases(
        &self,
        namespace: Option<&str>,
        envs: &[(&str, &str)],
    ) -> Result<Vec<HelmReleaseInfo>, HelmError> {
        let mut args: Vec<&str> = vec!["list", "-o", "json"];
        match namespace {
            Some(ns) => {
                args.push("--namespace");
                args.push(ns);
            }
            None => args.push("--all-namespaces"),
        }
        let kubeconfig_args = self.kubeconfig_args();
        args.extend_from_slice(&kubeconfig_args);

        let mut output = String::new();
        let ret = helm_exec_with_output(
            &args,
            &self.get_all_envs(envs),
            &mut |line| output.push_str(&line),
            &mut |line| warn!("{}", line),
            &CommandKiller::from_timeout(Duration::from_secs(60)),
        );

        if let Err(err) = ret {
            return Err(HelmError::CmdError("list".to_string(), err.to_string()));
        }

        serde_json::from_str::<Vec<HelmReleaseInfo>>(output.trim())
            .map_err(|e| HelmError::CmdError("list".to_string(), e.to_string()))
    }

    /// Returns the release if installed in the given namespace.
    pub fn get_release(
        &self,
        release_name: &str,
        namespace: &str,
        envs: &[(&str, &str)],
    ) -> Result<Option<HelmReleaseInfo>, HelmError> {
        let releases = self.list_releases(Some(namespace), envs)?;
        Ok(releases.into_iter().find(|r| r.name == release_name))
    }
}

fn helm_exec_with_output<F, X>(
    args: &[&str],
    envs: &[(&str, &str)],
    stdout_output: &mut F,
    stderr_output: &mut X,
    cmd_killer: &CommandKiller,
) -> Result<(), CommandError>
where
    F: FnMut(String),
    X: FnMut(String) + Send,
{
    let mut cmd = KsailCommand::new("helm", args, envs);
    cmd.set_kill_grace_period(Duration::from_secs(30));
    cmd.exec_with_abort(stdout_output, stderr_output, cmd_killer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_version_parsing() {
        // setup:
        struct TestCase {
            chart: &'static str,
            expected: Option<&'static str>,
        }

        let test_cases = vec![
            TestCase {
                chart: "metrics-server-3.12.1",
                expected: Some("3.12.1"),
            },
            TestCase {
                chart: "cilium-1.16.0",
                expected: Some("1.16.0"),
            },
            TestCase {
                chart: "garbage",
                expected: None,
            },
        ];

        for tc in test_cases {
            // execute:
            let release = HelmReleaseInfo {
                name: "x".to_string(),
                namespace: "default".to_string(),
                status: "deployed".to_string(),
                chart: tc.chart.to_string(),
                app_version: "".to_string(),
            };

            // verify:
            assert_eq!(tc.expected.map(|v| Version::parse(v).unwrap()), release.chart_version());
        }
    }
}
