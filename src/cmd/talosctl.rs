use crate::cmd::command::{CommandError, CommandKiller, KsailCommand};
use std::process::ExitStatus;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum TalosctlError {
    #[error("Talosctl terminated with an unknown error: {raw_error:?}")]
    ExecutionError { raw_error: std::io::Error },

    #[error("Talosctl terminated with a non success exit status code: {exit_status:?}")]
    ExitStatusError { exit_status: ExitStatus },

    #[error("Talosctl aborted due to user cancel request: {raw_error_message:?}")]
    Aborted { raw_error_message: String },

    #[error("Talosctl command terminated due to timeout: {raw_error_message:?}")]
    Timeout { raw_error_message: String },
}

/// Options for `talosctl cluster create` against the Docker provisioner.
#[derive(Debug, Clone, Default)]
pub struct TalosClusterCreateOpts {
    pub name: String,
    pub controlplanes: u32,
    pub workers: u32,
    /// CIDR of the cluster Docker network, e.g. `10.5.0.0/24`.
    pub cidr: Option<String>,
    /// Strategic-merge YAML patches applied to every machine config.
    pub config_patches: Vec<String>,
    /// `host=endpoint` mirror declarations.
    pub registry_mirrors: Vec<(String, String)>,
    pub kubeconfig_path: Option<String>,
}

#[derive(Debug, Default)]
pub struct Talosctl {
    common_envs: Vec<(String, String)>,
}

impl Talosctl {
    pub fn new(common_envs: Vec<(String, String)>) -> Self {
        Talosctl { common_envs }
    }

    fn get_all_envs(&self) -> Vec<(&str, &str)> {
        self.common_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    pub fn cluster_create(&self, opts: &TalosClusterCreateOpts, cmd_killer: &CommandKiller) -> Result<(), TalosctlError> {
        let controlplanes = opts.controlplanes.to_string();
        let workers = opts.workers.to_string();
        let mut args: Vec<String> = vec![
            "cluster".to_string(),
            "create".to_string(),
            "--name".to_string(),
            opts.name.clone(),
            "--controlplanes".to_string(),
            controlplanes,
            "--workers".to_string(),
            workers,
            "--wait".to_string(),
        ];
        if let Some(cidr) = &opts.cidr {
            args.push("--cidr".to_string());
            args.push(cidr.clone());
        }
        for patch in &opts.config_patches {
            args.push("--config-patch".to_string());
            args.push(patch.clone());
        }
        for (host, endpoint) in &opts.registry_mirrors {
            args.push("--registry-mirror".to_string());
            args.push(format!("{host}={endpoint}"));
        }
        if let Some(kubeconfig) = &opts.kubeconfig_path {
            args.push("--talosconfig".to_string());
            args.push(format!("{kubeconfig}.talosconfig"));
        }

        let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        talosctl_exec(
            &args_ref,
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            cmd_killer,
        )
    }

    pub fn cluster_destroy(&self, name: &str) -> Result<(), TalosctlError> {
        talosctl_exec(
            &["cluster", "destroy", "--name", name],
            &self.get_all_envs(),
            &mut |line| info!("{}", line),
            &mut |line| info!("{}", line),
            &CommandKiller::never(),
        )
    }

    /// Returns true when the named cluster has provisioned nodes.
    pub fn cluster_exists(&self, name: &str) -> Result<bool, TalosctlError> {
        let mut has_nodes = false;
        let ret = talosctl_exec(
            &["cluster", "show", "--name", name],
            &self.get_all_envs(),
            &mut |line| {
                // `cluster show` prints a NODES table when the cluster exists
                if line.contains(&format!("{name}-controlplane")) || line.contains(&format!("{name}-worker")) {
                    has_nodes = true
                }
            },
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(30)),
        );

        match ret {
            Ok(_) => Ok(has_nodes),
            // show on an absent cluster exits non-zero
            Err(TalosctlError::ExitStatusError { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn kubeconfig(&self, name: &str, kubeconfig_path: &str) -> Result<(), TalosctlError> {
        talosctl_exec(
            &["kubeconfig", kubeconfig_path, "--cluster", name, "--force"],
            &self.get_all_envs(),
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(60)),
        )
    }
}

fn talosctl_exec<F, X>(
    args: &[&str],
    envs: &[(&str, &str)],
    stdout_output: &mut F,
    stderr_output: &mut X,
    cmd_killer: &CommandKiller,
) -> Result<(), TalosctlError>
where
    F: FnMut(String),
    X: FnMut(String) + Send,
{
    let mut cmd = KsailCommand::new("talosctl", args, envs);
    cmd.set_kill_grace_period(Duration::from_secs(30));
    let ret = cmd.exec_with_abort(stdout_output, stderr_output, cmd_killer);

    match ret {
        Ok(_) => Ok(()),
        Err(CommandError::TimeoutError(msg)) => Err(TalosctlError::Timeout { raw_error_message: msg }),
        Err(CommandError::Killed(msg)) => Err(TalosctlError::Aborted { raw_error_message: msg }),
        Err(CommandError::ExitStatusError(err)) => Err(TalosctlError::ExitStatusError { exit_status: err }),
        Err(CommandError::ExecutionError(err)) => Err(TalosctlError::ExecutionError { raw_error: err }),
    }
}
