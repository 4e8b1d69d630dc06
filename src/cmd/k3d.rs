use crate::cmd::command::{CommandError, CommandKiller, KsailCommand};
use crate::cmd::stdout_capture::with_captured_stdout;
use serde_derive::Deserialize;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum K3dError {
    #[error("K3d terminated with an unknown error: {raw_error:?}")]
    ExecutionError { raw_error: std::io::Error },

    #[error("K3d terminated with a non success exit status code: {exit_status:?}")]
    ExitStatusError { exit_status: ExitStatus },

    #[error("K3d aborted due to user cancel request: {raw_error_message:?}")]
    Aborted { raw_error_message: String },

    #[error("K3d command terminated due to timeout: {raw_error_message:?}")]
    Timeout { raw_error_message: String },

    #[error("K3d returned an unparsable output: {raw_error_message:?}")]
    UnparsableOutput { raw_error_message: String },
}

/// One cluster row of `k3d cluster list -o json`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct K3dClusterInfo {
    pub name: String,
    #[serde(default)]
    pub servers_count: u32,
    #[serde(default)]
    pub servers_running: u32,
    #[serde(default)]
    pub agents_count: u32,
    #[serde(default)]
    pub agents_running: u32,
}

/// One node row of `k3d node list -o json`.
#[derive(Deserialize, Debug, Clone)]
pub struct K3dNodeInfo {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Default)]
pub struct K3d {
    common_envs: Vec<(String, String)>,
}

impl K3d {
    pub fn new(common_envs: Vec<(String, String)>) -> Self {
        K3d { common_envs }
    }

    fn get_all_envs(&self) -> Vec<(&str, &str)> {
        self.common_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    pub fn cluster_create(&self, config_path: &Path, cmd_killer: &CommandKiller) -> Result<(), K3dError> {
        let args = vec!["cluster", "create", "--config", config_path.to_str().unwrap_or_default()];

        k3d_exec(
            &args,
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            cmd_killer,
        )
    }

    pub fn cluster_delete(&self, name: &str) -> Result<(), K3dError> {
        k3d_exec(
            &["cluster", "delete", name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            &CommandKiller::never(),
        )
    }

    pub fn cluster_start(&self, name: &str, cmd_killer: &CommandKiller) -> Result<(), K3dError> {
        k3d_exec(
            &["cluster", "start", name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            cmd_killer,
        )
    }

    pub fn cluster_stop(&self, name: &str, cmd_killer: &CommandKiller) -> Result<(), K3dError> {
        k3d_exec(
            &["cluster", "stop", name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            cmd_killer,
        )
    }

    /// Lists clusters. K3d drives a logger attached straight to the process
    /// stdout, so the invocation runs with an inherited stdout under the
    /// process-wide capture lock; this serializes `list` per process.
    pub fn cluster_list(&self) -> Result<Vec<K3dClusterInfo>, K3dError> {
        let envs = self.get_all_envs();
        let (status, captured) = with_captured_stdout(|| {
            let mut command = Command::new("k3d");
            command
                .args(["cluster", "list", "--output", "json"])
                .stdout(Stdio::inherit())
                .stderr(Stdio::null());
            for (k, v) in &envs {
                command.env(k, v);
            }
            command.status()
        })
        .map_err(|raw_error| K3dError::ExecutionError { raw_error })?;

        let status = status.map_err(|raw_error| K3dError::ExecutionError { raw_error })?;
        if !status.success() {
            return Err(K3dError::ExitStatusError { exit_status: status });
        }

        parse_cluster_list(&captured)
    }

    pub fn node_create(&self, node_name: &str, cluster: &str, role: &str) -> Result<(), K3dError> {
        let args = vec!["node", "create", node_name, "--cluster", cluster, "--role", role];

        k3d_exec(
            &args,
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            &CommandKiller::never(),
        )
    }

    pub fn node_delete(&self, node_name: &str) -> Result<(), K3dError> {
        k3d_exec(
            &["node", "delete", node_name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            &CommandKiller::never(),
        )
    }

    pub fn node_list(&self, cluster: &str) -> Result<Vec<K3dNodeInfo>, K3dError> {
        let mut output = String::new();
        k3d_exec(
            &["node", "list", "--output", "json"],
            &self.get_all_envs(),
            &mut |line| output.push_str(&line),
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(30)),
        )?;

        let nodes: Vec<K3dNodeInfo> =
            serde_json::from_str(output.trim()).map_err(|e| K3dError::UnparsableOutput {
                raw_error_message: e.to_string(),
            })?;

        let prefix = format!("k3d-{cluster}-");
        Ok(nodes.into_iter().filter(|n| n.name.starts_with(&prefix)).collect())
    }
}

fn parse_cluster_list(raw: &str) -> Result<Vec<K3dClusterInfo>, K3dError> {
    // k3d may interleave log noise before the JSON document, keep only from
    // the first bracket on.
    let json_start = raw.find('[').ok_or_else(|| K3dError::UnparsableOutput {
        raw_error_message: format!("no JSON document in output: {raw}"),
    })?;

    serde_json::from_str::<Vec<K3dClusterInfo>>(raw[json_start..].trim()).map_err(|e| K3dError::UnparsableOutput {
        raw_error_message: e.to_string(),
    })
}

fn k3d_exec<F, X>(
    args: &[&str],
    envs: &[(&str, &str)],
    stdout_output: &mut F,
    stderr_output: &mut X,
    cmd_killer: &CommandKiller,
) -> Result<(), K3dError>
where
    F: FnMut(String),
    X: FnMut(String) + Send,
{
    let mut cmd = KsailCommand::new("k3d", args, envs);
    cmd.set_kill_grace_period(Duration::from_secs(30));
    let ret = cmd.exec_with_abort(stdout_output, stderr_output, cmd_killer);

    match ret {
        Ok(_) => Ok(()),
        Err(CommandError::TimeoutError(msg)) => Err(K3dError::Timeout { raw_error_message: msg }),
        Err(CommandError::Killed(msg)) => Err(K3dError::Aborted { raw_error_message: msg }),
        Err(CommandError::ExitStatusError(err)) => Err(K3dError::ExitStatusError { exit_status: err }),
        Err(CommandError::ExecutionError(err)) => Err(K3dError::ExecutionError { raw_error: err }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_list_with_log_noise() {
        // setup:
        let raw = r#"INFO[0000] Using config
[{"name":"demo","serversCount":1,"serversRunning":1,"agentsCount":2,"agentsRunning":2}]"#;

        // execute:
        let clusters = parse_cluster_list(raw).expect("parsable output");

        // verify:
        assert_eq!(1, clusters.len());
        assert_eq!("demo", clusters[0].name);
        assert_eq!(2, clusters[0].agents_count);
    }

    #[test]
    fn test_parse_cluster_list_rejects_garbage() {
        assert!(parse_cluster_list("not json at all").is_err());
    }
}
