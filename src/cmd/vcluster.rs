use crate::cmd::command::{CommandError, CommandKiller, KsailCommand};
use serde_derive::Deserialize;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum VclusterError {
    #[error("Vcluster terminated with an unknown error: {raw_error:?}")]
    ExecutionError { raw_error: std::io::Error },

    #[error("Vcluster terminated with a non success exit status code: {exit_status:?}")]
    ExitStatusError { exit_status: ExitStatus },

    #[error("Vcluster aborted due to user cancel request: {raw_error_message:?}")]
    Aborted { raw_error_message: String },

    #[error("Vcluster command terminated due to timeout: {raw_error_message:?}")]
    Timeout { raw_error_message: String },

    #[error("Vcluster returned an unparsable output: {raw_error_message:?}")]
    UnparsableOutput { raw_error_message: String },
}

/// One row of `vcluster list --output json`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct VclusterInfo {
    pub name: String,
    pub namespace: String,
    pub status: String,
}

#[derive(Debug, Default)]
pub struct Vcluster {
    common_envs: Vec<(String, String)>,
}

impl Vcluster {
    pub fn new(common_envs: Vec<(String, String)>) -> Self {
        Vcluster { common_envs }
    }

    fn get_all_envs(&self) -> Vec<(&str, &str)> {
        self.common_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    pub fn create(
        &self,
        name: &str,
        values_file: Option<&Path>,
        kubeconfig_path: &Path,
        cmd_killer: &CommandKiller,
    ) -> Result<(), VclusterError> {
        let mut args = vec!["create", name, "--connect=false"];
        let values_arg;
        if let Some(values_file) = values_file {
            values_arg = values_file.to_str().unwrap_or_default().to_string();
            args.push("--values");
            args.push(values_arg.as_str());
        }
        let kubeconfig_arg = format!("--kube-config={}", kubeconfig_path.to_str().unwrap_or_default());
        args.push(kubeconfig_arg.as_str());

        vcluster_exec(
            &args,
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            cmd_killer,
        )
    }

    pub fn delete(&self, name: &str) -> Result<(), VclusterError> {
        vcluster_exec(
            &["delete", name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            &CommandKiller::never(),
        )
    }

    pub fn pause(&self, name: &str, cmd_killer: &CommandKiller) -> Result<(), VclusterError> {
        vcluster_exec(
            &["pause", name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            cmd_killer,
        )
    }

    pub fn resume(&self, name: &str, cmd_killer: &CommandKiller) -> Result<(), VclusterError> {
        vcluster_exec(
            &["resume", name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            cmd_killer,
        )
    }

    pub fn list(&self) -> Result<Vec<VclusterInfo>, VclusterError> {
        let mut output = String::new();
        vcluster_exec(
            &["list", "--output", "json"],
            &self.get_all_envs(),
            &mut |line| output.push_str(&line),
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(30)),
        )?;

        serde_json::from_str::<Vec<VclusterInfo>>(output.trim()).map_err(|e| VclusterError::UnparsableOutput {
            raw_error_message: e.to_string(),
        })
    }
}

fn vcluster_exec<F, X>(
    args: &[&str],
    envs: &[(&str, &str)],
    stdout_output: &mut F,
    stderr_output: &mut X,
    cmd_killer: &CommandKiller,
) -> Result<(), VclusterError>
where
    F: FnMut(String),
    X: FnMut(String) + Send,
{
    let mut cmd = KsailCommand::new("vcluster", args, envs);
    cmd.set_kill_grace_period(Duration::from_secs(30));
    let ret = cmd.exec_with_abort(stdout_output, stderr_output, cmd_killer);

    match ret {
        Ok(_) => Ok(()),
        Err(CommandError::TimeoutError(msg)) => Err(VclusterError::Timeout { raw_error_message: msg }),
        Err(CommandError::Killed(msg)) => Err(VclusterError::Aborted { raw_error_message: msg }),
        Err(CommandError::ExitStatusError(err)) => Err(VclusterError::ExitStatusError { exit_status: err }),
        Err(CommandError::ExecutionError(err)) => Err(VclusterError::ExecutionError { raw_error: err }),
    }
}
