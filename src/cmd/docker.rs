use crate::cmd::command::{CommandError, CommandKiller, KsailCommand};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::process::ExitStatus;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum DockerError {
    #[error("Docker Invalid configuration: {raw_error_message:?}")]
    InvalidConfig { raw_error_message: String },

    #[error("Docker terminated with an unknown error: {raw_error:?}")]
    ExecutionError { raw_error: std::io::Error },

    #[error("Docker terminated with a non success exit status code: {exit_status:?}")]
    ExitStatusError { exit_status: ExitStatus },

    #[error("Docker aborted due to user cancel request: {raw_error_message:?}")]
    Aborted { raw_error_message: String },

    #[error("Docker command terminated due to timeout: {raw_error_message:?}")]
    Timeout { raw_error_message: String },
}

impl DockerError {
    /// Connect requests against a network the container already joined are
    /// reported as errors by the CLI but are a success for us.
    fn is_already_connected_error(stderr: &str) -> bool {
        stderr.contains("already exists in network")
    }
}

/// State of a container as reported by `docker inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
}

impl ContainerState {
    fn from_docker_str(s: &str) -> Option<ContainerState> {
        match s.trim() {
            "created" => Some(ContainerState::Created),
            "running" => Some(ContainerState::Running),
            "paused" => Some(ContainerState::Paused),
            "restarting" => Some(ContainerState::Restarting),
            "exited" => Some(ContainerState::Exited),
            "dead" => Some(ContainerState::Dead),
            _ => None,
        }
    }
}

/// Options to run a detached container.
#[derive(Debug, Clone, Default)]
pub struct ContainerRunOpts {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    /// (host_port, container_port)
    pub port_binding: Option<(u16, u16)>,
    pub envs: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    pub volumes: Vec<(String, String)>,
    pub restart_unless_stopped: bool,
}

#[derive(serde_derive::Deserialize)]
struct NetworkEndpoint {
    #[serde(rename = "IPAddress")]
    ip_address: String,
}

#[derive(Debug)]
pub struct Docker {
    socket_location: Option<Url>,
    common_envs: Vec<(String, String)>,
}

impl Docker {
    /// Creates a new Docker wrapper and verifies the daemon is reachable.
    pub fn new(socket_location: Option<Url>) -> Result<Self, DockerError> {
        let mut docker = Docker {
            socket_location,
            common_envs: vec![],
        };

        // Override DOCKER_HOST if we use a TCP socket
        if let Some(socket_location) = &docker.socket_location {
            docker
                .common_envs
                .push(("DOCKER_HOST".to_string(), socket_location.to_string()))
        }

        let args = vec!["version", "--format", "{{.Server.Version}}"];
        let daemon_reachable = docker_exec(
            &args,
            &docker.get_all_envs(&[]),
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::from_timeout(Duration::from_secs(10)),
        );
        if daemon_reachable.is_err() {
            return Err(DockerError::InvalidConfig {
                raw_error_message: "Docker daemon is not reachable".to_string(),
            });
        }

        Ok(docker)
    }

    pub fn socket_url(&self) -> &Option<Url> {
        &self.socket_location
    }

    fn get_all_envs<'a>(&'a self, envs: &'a [(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut all_envs: Vec<(&str, &str)> = self.common_envs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        all_envs.append(&mut envs.to_vec());

        all_envs
    }

    // ---------- containers ----------

    pub fn container_exists(&self, name: &str) -> Result<bool, DockerError> {
        let filter = format!("name=^{name}$");
        let args = vec!["ps", "--all", "--filter", filter.as_str(), "--format", "{{.Names}}"];

        let mut found = false;
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| {
                if line.trim() == name {
                    found = true
                }
            },
            &mut |_| {},
            &CommandKiller::never(),
        )?;

        Ok(found)
    }

    pub fn container_state(&self, name: &str) -> Result<Option<ContainerState>, DockerError> {
        let args = vec!["inspect", "--format", "{{.State.Status}}", name];

        let mut state = None;
        let ret = docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| state = ContainerState::from_docker_str(&line),
            &mut |_| {},
            &CommandKiller::never(),
        );

        match ret {
            Ok(_) => Ok(state),
            // inspect on an absent container exits non-zero
            Err(DockerError::ExitStatusError { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn run_container(&self, opts: &ContainerRunOpts) -> Result<(), DockerError> {
        let mut args: Vec<String> = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--name".to_string(),
            opts.name.clone(),
        ];

        if opts.restart_unless_stopped {
            args.push("--restart".to_string());
            args.push("unless-stopped".to_string());
        }
        if let Some(network) = &opts.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        if let Some((host_port, container_port)) = opts.port_binding {
            args.push("--publish".to_string());
            args.push(format!("{host_port}:{container_port}"));
        }
        for (k, v) in &opts.envs {
            args.push("--env".to_string());
            args.push(format!("{k}={v}"));
        }
        for (k, v) in &opts.labels {
            args.push("--label".to_string());
            args.push(format!("{k}={v}"));
        }
        for (host_path, container_path) in &opts.volumes {
            args.push("--volume".to_string());
            args.push(format!("{host_path}:{container_path}"));
        }
        args.push(opts.image.clone());

        let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        docker_exec(
            &args_ref,
            &self.get_all_envs(&[]),
            &mut |line| debug!("{}", line),
            &mut |line| debug!("{}", line),
            &CommandKiller::never(),
        )
    }

    pub fn start_container(&self, name: &str) -> Result<(), DockerError> {
        docker_exec(
            &["start", name],
            &self.get_all_envs(&[]),
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::never(),
        )
    }

    pub fn stop_container(&self, name: &str) -> Result<(), DockerError> {
        docker_exec(
            &["stop", name],
            &self.get_all_envs(&[]),
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::never(),
        )
    }

    pub fn remove_container(&self, name: &str, delete_volumes: bool) -> Result<(), DockerError> {
        let mut args = vec!["rm", "--force", name];
        if delete_volumes {
            args.insert(2, "--volumes");
        }

        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |_| {},
            &mut |_| {},
            &CommandKiller::never(),
        )
    }

    pub fn container_labels(&self, name: &str) -> Result<BTreeMap<String, String>, DockerError> {
        let args = vec!["inspect", "--format", "{{json .Config.Labels}}", name];

        let mut raw = String::new();
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| raw.push_str(&line),
            &mut |_| {},
            &CommandKiller::never(),
        )?;

        Ok(serde_json::from_str::<BTreeMap<String, String>>(raw.trim()).unwrap_or_default())
    }

    fn network_endpoints(&self, name: &str) -> Result<BTreeMap<String, NetworkEndpoint>, DockerError> {
        let args = vec!["inspect", "--format", "{{json .NetworkSettings.Networks}}", name];

        let mut raw = String::new();
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| raw.push_str(&line),
            &mut |_| {},
            &CommandKiller::never(),
        )?;

        Ok(serde_json::from_str(raw.trim()).unwrap_or_default())
    }

    /// Returns the container IP address on the given network, if attached.
    pub fn container_ip(&self, name: &str, network: &str) -> Result<Option<String>, DockerError> {
        let endpoints = self.network_endpoints(name)?;
        Ok(endpoints.get(network).map(|endpoint| endpoint.ip_address.clone()))
    }

    /// Names of the networks a container is attached to.
    pub fn container_networks(&self, name: &str) -> Result<Vec<String>, DockerError> {
        let endpoints = self.network_endpoints(name)?;
        Ok(endpoints.into_keys().collect())
    }

    pub fn list_containers_with_label(&self, label: &str) -> Result<Vec<String>, DockerError> {
        let filter = format!("label={label}");
        let args = vec!["ps", "--all", "--filter", filter.as_str(), "--format", "{{.Names}}"];

        let mut names = vec![];
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| {
                let name = line.trim().to_string();
                if !name.is_empty() {
                    names.push(name)
                }
            },
            &mut |_| {},
            &CommandKiller::never(),
        )?;

        Ok(names)
    }

    /// Runs a command inside a running container.
    pub fn exec_in_container(&self, container: &str, cmd: &[&str]) -> Result<String, DockerError> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(cmd);

        let mut output = String::new();
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| {
                let _ = writeln!(output, "{line}");
            },
            &mut |line| debug!("{}", line),
            &CommandKiller::never(),
        )?;

        Ok(output)
    }

    /// Host ports currently bound by running containers, used by the registry
    /// port allocator to skip taken ports.
    pub fn used_host_ports(&self) -> Result<HashSet<u16>, DockerError> {
        let args = vec!["ps", "--format", "{{.Ports}}"];

        let mut lines = vec![];
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| lines.push(line),
            &mut |_| {},
            &CommandKiller::never(),
        )?;

        Ok(parse_host_ports(&lines))
    }

    // ---------- networks ----------

    pub fn network_exists(&self, name: &str) -> Result<bool, DockerError> {
        let filter = format!("name=^{name}$");
        let args = vec!["network", "ls", "--filter", filter.as_str(), "--format", "{{.Name}}"];

        let mut found = false;
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| {
                if line.trim() == name {
                    found = true
                }
            },
            &mut |_| {},
            &CommandKiller::never(),
        )?;

        Ok(found)
    }

    pub fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        mtu: &str,
        subnet: Option<&str>,
    ) -> Result<(), DockerError> {
        let mtu_opt = format!("com.docker.network.driver.mtu={mtu}");
        let mut args: Vec<String> = vec![
            "network".to_string(),
            "create".to_string(),
            "--driver".to_string(),
            "bridge".to_string(),
            "--opt".to_string(),
            mtu_opt,
        ];
        for (k, v) in labels {
            args.push("--label".to_string());
            args.push(format!("{k}={v}"));
        }
        if let Some(subnet) = subnet {
            args.push("--subnet".to_string());
            args.push(subnet.to_string());
        }
        args.push(name.to_string());

        let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        docker_exec(
            &args_ref,
            &self.get_all_envs(&[]),
            &mut |_| {},
            &mut |line| debug!("{}", line),
            &CommandKiller::never(),
        )
    }

    /// Connects a container to a network; already-connected is a success.
    pub fn connect_network(&self, container: &str, network: &str, static_ip: Option<&str>) -> Result<(), DockerError> {
        let mut args = vec!["network", "connect"];
        let ip_arg;
        if let Some(ip) = static_ip {
            ip_arg = ip.to_string();
            args.push("--ip");
            args.push(ip_arg.as_str());
        }
        args.push(network);
        args.push(container);

        let mut stderr_output = String::new();
        let ret = docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |_| {},
            &mut |line| stderr_output.push_str(&line),
            &CommandKiller::never(),
        );

        match ret {
            Err(DockerError::ExitStatusError { .. }) if DockerError::is_already_connected_error(&stderr_output) => {
                Ok(())
            }
            other => other,
        }
    }

    pub fn network_containers(&self, network: &str) -> Result<Vec<String>, DockerError> {
        let args = vec![
            "network",
            "inspect",
            "--format",
            "{{range .Containers}}{{.Name}}\n{{end}}",
            network,
        ];

        let mut names = vec![];
        docker_exec(
            &args,
            &self.get_all_envs(&[]),
            &mut |line| {
                let name = line.trim().to_string();
                if !name.is_empty() {
                    names.push(name)
                }
            },
            &mut |_| {},
            &CommandKiller::never(),
        )?;

        Ok(names)
    }
}

fn parse_host_ports(port_lines: &[String]) -> HashSet<u16> {
    // docker ps port column looks like `0.0.0.0:5000->5000/tcp, :::5000->5000/tcp`
    let re = Regex::new(r":(\d+)->").expect("valid port binding regex");
    let mut ports = HashSet::new();
    for line in port_lines {
        for cap in re.captures_iter(line) {
            if let Ok(port) = cap[1].parse::<u16>() {
                ports.insert(port);
            }
        }
    }

    ports
}

fn docker_exec<F, X>(
    args: &[&str],
    envs: &[(&str, &str)],
    stdout_output: &mut F,
    stderr_output: &mut X,
    cmd_killer: &CommandKiller,
) -> Result<(), DockerError>
where
    F: FnMut(String),
    X: FnMut(String) + Send,
{
    let mut cmd = KsailCommand::new("docker", args, envs);
    cmd.set_kill_grace_period(Duration::from_secs(30));
    let ret = cmd.exec_with_abort(stdout_output, stderr_output, cmd_killer);

    match ret {
        Ok(_) => Ok(()),
        Err(CommandError::TimeoutError(msg)) => Err(DockerError::Timeout { raw_error_message: msg }),
        Err(CommandError::Killed(msg)) => Err(DockerError::Aborted { raw_error_message: msg }),
        Err(CommandError::ExitStatusError(err)) => Err(DockerError::ExitStatusError { exit_status: err }),
        Err(CommandError::ExecutionError(err)) => Err(DockerError::ExecutionError { raw_error: err }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_ports() {
        // setup:
        let lines = vec![
            "0.0.0.0:5000->5000/tcp, :::5000->5000/tcp".to_string(),
            "0.0.0.0:6443->6443/tcp".to_string(),
            "".to_string(),
            "80/tcp".to_string(), // unbound container port must be ignored
        ];

        // execute:
        let ports = parse_host_ports(&lines);

        // verify:
        assert!(ports.contains(&5000));
        assert!(ports.contains(&6443));
        assert_eq!(2, ports.len());
    }

    #[test]
    fn test_container_state_from_docker_str() {
        assert_eq!(Some(ContainerState::Running), ContainerState::from_docker_str("running\n"));
        assert_eq!(Some(ContainerState::Exited), ContainerState::from_docker_str("exited"));
        assert_eq!(None, ContainerState::from_docker_str("weird"));
    }

    #[test]
    fn test_already_connected_error_detection() {
        assert!(DockerError::is_already_connected_error(
            "Error response from daemon: endpoint with name registry already exists in network kind"
        ));
        assert!(!DockerError::is_already_connected_error("no such network"));
    }
}
