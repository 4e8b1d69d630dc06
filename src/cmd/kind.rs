use crate::cmd::command::{CommandError, CommandKiller, KsailCommand};
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum KindError {
    #[error("Kind terminated with an unknown error: {raw_error:?}")]
    ExecutionError { raw_error: std::io::Error },

    #[error("Kind terminated with a non success exit status code: {exit_status:?}")]
    ExitStatusError { exit_status: ExitStatus },

    #[error("Kind aborted due to user cancel request: {raw_error_message:?}")]
    Aborted { raw_error_message: String },

    #[error("Kind command terminated due to timeout: {raw_error_message:?}")]
    Timeout { raw_error_message: String },
}

#[derive(Debug, Default)]
pub struct Kind {
    common_envs: Vec<(String, String)>,
}

impl Kind {
    pub fn new(common_envs: Vec<(String, String)>) -> Self {
        Kind { common_envs }
    }

    fn get_all_envs(&self) -> Vec<(&str, &str)> {
        self.common_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    pub fn create_cluster(
        &self,
        name: &str,
        config_path: &Path,
        kubeconfig_path: &Path,
        cmd_killer: &CommandKiller,
    ) -> Result<(), KindError> {
        let args = vec![
            "create",
            "cluster",
            "--name",
            name,
            "--config",
            config_path.to_str().unwrap_or_default(),
            "--kubeconfig",
            kubeconfig_path.to_str().unwrap_or_default(),
        ];

        kind_exec(
            &args,
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line), // kind logs progress on stderr
            cmd_killer,
        )
    }

    pub fn delete_cluster(&self, name: &str, kubeconfig_path: &Path) -> Result<(), KindError> {
        let args = vec![
            "delete",
            "cluster",
            "--name",
            name,
            "--kubeconfig",
            kubeconfig_path.to_str().unwrap_or_default(),
        ];

        kind_exec(
            &args,
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            &CommandKiller::never(),
        )
    }

    pub fn get_clusters(&self) -> Result<Vec<String>, KindError> {
        let mut clusters = vec![];
        kind_exec(
            &["get", "clusters"],
            &self.get_all_envs(),
            &mut |line| {
                let name = line.trim().to_string();
                // kind prints `No kind clusters found.` on stderr, stdout only carries names
                if !name.is_empty() {
                    clusters.push(name)
                }
            },
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(30)),
        )?;

        Ok(clusters)
    }

    /// Node container names of a cluster, e.g. `demo-control-plane`, `demo-worker`.
    pub fn get_nodes(&self, name: &str) -> Result<Vec<String>, KindError> {
        let mut nodes = vec![];
        kind_exec(
            &["get", "nodes", "--name", name],
            &self.get_all_envs(),
            &mut |line| {
                let node = line.trim().to_string();
                if !node.is_empty() {
                    nodes.push(node)
                }
            },
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(30)),
        )?;

        Ok(nodes)
    }

    pub fn export_kubeconfig(&self, name: &str, kubeconfig_path: &Path) -> Result<(), KindError> {
        let args = vec![
            "export",
            "kubeconfig",
            "--name",
            name,
            "--kubeconfig",
            kubeconfig_path.to_str().unwrap_or_default(),
        ];

        kind_exec(
            &args,
            &self.get_all_envs(),
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(30)),
        )
    }
}

fn kind_exec<F, X>(
    args: &[&str],
    envs: &[(&str, &str)],
    stdout_output: &mut F,
    stderr_output: &mut X,
    cmd_killer: &CommandKiller,
) -> Result<(), KindError>
where
    F: FnMut(String),
    X: FnMut(String) + Send,
{
    let mut cmd = KsailCommand::new("kind", args, envs);
    cmd.set_kill_grace_period(Duration::from_secs(30));
    let ret = cmd.exec_with_abort(stdout_output, stderr_output, cmd_killer);

    match ret {
        Ok(_) => Ok(()),
        Err(CommandError::TimeoutError(msg)) => Err(KindError::Timeout { raw_error_message: msg }),
        Err(CommandError::Killed(msg)) => Err(KindError::Aborted { raw_error_message: msg }),
        Err(CommandError::ExitStatusError(err)) => Err(KindError::ExitStatusError { exit_status: err }),
        Err(CommandError::ExecutionError(err)) => Err(KindError::ExecutionError { raw_error: err }),
    }
}
