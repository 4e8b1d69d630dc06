use crate::cmd;
use crate::cmd::docker::DockerError;
use crate::cmd::helm::HelmError;
use crate::events::{EventDetails, Stage};
use derivative::Derivative;
use kube::error::Error as KubeError;
use std::fmt::{Display, Formatter};
use std::io::Error;
use std::time::Duration;
use url::Url;

/// ErrorMessageVerbosity: represents command error message's verbosity from minimal to full verbosity.
pub enum ErrorMessageVerbosity {
    SafeOnly,
    FullDetailsWithoutEnvVars,
    FullDetails,
}

/// CommandError: command error, mostly returned by third party tools.
#[derive(Derivative, Clone, thiserror::Error, PartialEq, Eq)]
#[derivative(Debug)]
pub struct CommandError {
    /// full_details: full error message, can contain unsafe text such as passwords and tokens.
    full_details: Option<String>,
    /// message_safe: error message omitting any protected data such as passwords and tokens.
    message_safe: String,
    /// env_vars: environment variables including touchy data such as secret keys.
    /// env_vars field is ignored from any wild Debug printing because of the touchy data it carries.
    #[derivative(Debug = "ignore")]
    env_vars: Option<Vec<(String, String)>>,
}

impl CommandError {
    /// Returns CommandError message_raw. May contain unsafe text such as passwords and tokens.
    pub fn message_raw(&self) -> Option<String> {
        self.full_details.clone()
    }

    /// Returns CommandError message_safe omitting all unsafe text such as passwords and tokens.
    pub fn message_safe(&self) -> String {
        self.message_safe.to_string()
    }

    /// Returns CommandError env_vars.
    pub fn env_vars(&self) -> Option<Vec<(String, String)>> {
        self.env_vars.clone()
    }

    /// Returns error message based on verbosity.
    pub fn message(&self, message_verbosity: ErrorMessageVerbosity) -> String {
        match message_verbosity {
            ErrorMessageVerbosity::SafeOnly => self.message_safe.to_string(),
            ErrorMessageVerbosity::FullDetailsWithoutEnvVars => match &self.full_details {
                None => self.message(ErrorMessageVerbosity::SafeOnly),
                Some(full_details) => format!("{} / Full details: {}", self.message_safe, full_details),
            },
            ErrorMessageVerbosity::FullDetails => match &self.full_details {
                None => self.message(ErrorMessageVerbosity::SafeOnly),
                Some(full_details) => match &self.env_vars {
                    None => format!("{} / Full details: {}", self.message_safe, full_details),
                    Some(env_vars) => {
                        format!(
                            "{} / Full details: {} / Env vars: {}",
                            self.message_safe,
                            full_details,
                            env_vars
                                .iter()
                                .map(|(k, v)| format!("{k}={v}"))
                                .collect::<Vec<String>>()
                                .join(" "),
                        )
                    }
                },
            },
        }
    }

    /// Creates a new CommandError from safe message. To be used when message is safe.
    pub fn new_from_safe_message(message: String) -> Self {
        CommandError::new(message, None, None)
    }

    /// Creates a new CommandError having both a safe, an unsafe message and env vars.
    pub fn new(message_safe: String, message_raw: Option<String>, env_vars: Option<Vec<(String, String)>>) -> Self {
        CommandError {
            full_details: message_raw,
            message_safe,
            env_vars,
        }
    }

    /// Creates a new CommandError from a command line invocation.
    pub fn new_from_command_line(
        message: String,
        bin: String,
        cmd_args: Vec<String>,
        envs: Vec<(String, String)>,
        stdout: Option<String>,
        stderr: Option<String>,
    ) -> Self {
        let mut unsafe_message = format!("{}\ncommand: {} {}", message, bin, cmd_args.join(" "),);

        if let Some(txt) = stdout {
            unsafe_message = format!("{unsafe_message}\nSTDOUT {txt}");
        }
        if let Some(txt) = stderr {
            unsafe_message = format!("{unsafe_message}\nSTDERR {txt}");
        }

        CommandError::new(message, Some(unsafe_message), Some(envs))
    }
}

impl Default for CommandError {
    fn default() -> Self {
        Self {
            full_details: None,
            message_safe: "Unknown command error".to_string(),
            env_vars: None,
        }
    }
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message(ErrorMessageVerbosity::SafeOnly).as_str()) // By default, expose safe message only
    }
}

impl From<Error> for CommandError {
    fn from(err: Error) -> Self {
        CommandError::new("IO error".to_string(), Some(err.to_string()), None)
    }
}

impl From<cmd::command::CommandError> for CommandError {
    fn from(err: cmd::command::CommandError) -> Self {
        CommandError::new("Command error".to_string(), Some(err.to_string()), None)
    }
}

impl From<DockerError> for CommandError {
    fn from(err: DockerError) -> Self {
        CommandError::new("Docker error".to_string(), Some(err.to_string()), None)
    }
}

impl From<HelmError> for CommandError {
    fn from(err: HelmError) -> Self {
        CommandError::new("Helm error".to_string(), Some(err.to_string()), None)
    }
}

impl From<KubeError> for CommandError {
    fn from(err: KubeError) -> Self {
        CommandError::new("Kubernetes API error".to_string(), Some(err.to_string()), None)
    }
}

impl From<crate::helm::HelmChartError> for CommandError {
    fn from(err: crate::helm::HelmChartError) -> Self {
        CommandError::new("Helm chart error".to_string(), Some(err.to_string()), None)
    }
}

impl From<serde_yaml::Error> for CommandError {
    fn from(err: serde_yaml::Error) -> Self {
        CommandError::new("YAML parse error".to_string(), Some(err.to_string()), None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Tag: unique identifier for an error.
pub enum Tag {
    /// Unknown: unknown error.
    Unknown,
    /// InvalidClusterDescriptor: the cluster descriptor breaks one of its invariants.
    InvalidClusterDescriptor,
    /// CloudProviderRequiresExternalRegistry: cloud provider combined with a Docker-local registry.
    CloudProviderRequiresExternalRegistry,
    /// MissingRequiredEnvVariable: a required env variable is not set.
    MissingRequiredEnvVariable,
    /// CannotFindRequiredBinary: a required binary is not found on the system.
    CannotFindRequiredBinary,
    /// DistributionConfigParseError: the distribution-native config file cannot be parsed.
    DistributionConfigParseError,
    /// DockerUnavailable: the Docker daemon cannot be reached.
    DockerUnavailable,
    /// DockerError: a Docker operation failed.
    DockerError,
    /// NetworkCreateError: the cluster network cannot be created.
    NetworkCreateError,
    /// NetworkAttachError: a container cannot be attached to the cluster network.
    NetworkAttachError,
    /// RegistryProvisionError: a registry container cannot be provisioned.
    RegistryProvisionError,
    /// RegistryPortAllocationError: no free host port available for a registry.
    RegistryPortAllocationError,
    /// RegistryCleanupError: a registry container cannot be cleaned up (warning-grade).
    RegistryCleanupError,
    /// ClusterNotFound: the target cluster does not exist.
    ClusterNotFound,
    /// ClusterCreateError: the distribution provisioner failed to create the cluster.
    ClusterCreateError,
    /// ClusterDeleteError: the distribution provisioner failed to delete the cluster.
    ClusterDeleteError,
    /// ClusterStartError: the cluster nodes cannot be started.
    ClusterStartError,
    /// ClusterStopError: the cluster nodes cannot be stopped.
    ClusterStopError,
    /// ClusterListError: clusters cannot be listed.
    ClusterListError,
    /// ClusterUpdateError: an in-place cluster change cannot be applied.
    ClusterUpdateError,
    /// HelmChartError: a helm chart operation failed.
    HelmChartError,
    /// ComponentReadinessTimeout: a component did not become ready within its timeout.
    ComponentReadinessTimeout,
    /// KubeconfigMissing: the expected kubeconfig file does not exist.
    KubeconfigMissing,
    /// KubeconfigInvalid: the kubeconfig file has no usable current-context.
    KubeconfigInvalid,
    /// CannotConnectK8sCluster: cannot open a client connection to the cluster API.
    CannotConnectK8sCluster,
    /// K8sNodeIsNotReady: no node reported Ready within the CNI gate timeout.
    K8sNodeIsNotReady,
    /// GitOpsConfigurationError: GitOps resources cannot be configured.
    GitOpsConfigurationError,
    /// OciArtifactPushError: an OCI artifact cannot be pushed.
    OciArtifactPushError,
    /// CloudProviderError: a cloud provider operation failed.
    CloudProviderError,
    /// CloudResourceLimitExceeded: cloud account resource limit reached.
    CloudResourceLimitExceeded,
    /// CloudAllLocationsFailed: server creation failed in every candidate location.
    CloudAllLocationsFailed,
    /// CloudInfraDeleteError: cloud network/firewall/placement group cleanup failed.
    CloudInfraDeleteError,
    /// RecreationRequired: the requested update contains recreate-category changes.
    RecreationRequired,
    /// UpdateApplyError: one or more in-place changes failed to apply.
    UpdateApplyError,
    /// WorkloadSourceMissing: the workload source directory does not exist.
    WorkloadSourceMissing,
    /// WorkloadPackagingError: the workload artifact cannot be packaged.
    WorkloadPackagingError,
    /// TaskCancellationRequested: the invocation has been cancelled by its caller.
    TaskCancellationRequested,
}

#[derive(Clone, Debug, PartialEq)]
/// EngineError: represents an engine error, the only error type the
/// orchestrator surfaces to its caller.
pub struct EngineError {
    /// tag: unique identifier of the error kind.
    tag: Tag,
    /// event_details: details of the event linked to this error.
    event_details: EventDetails,
    /// user_log_message: message targeting the user, trimmed of pointless details.
    user_log_message: String,
    /// underlying_error: raw error such as command input/output.
    underlying_error: Option<CommandError>,
    /// link: documentation link for the given error.
    link: Option<Url>,
    /// hint_message: hint helping the user to resolve the error.
    hint_message: Option<String>,
}

impl EngineError {
    /// Returns error's unique identifier.
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Returns error's event details.
    pub fn event_details(&self) -> &EventDetails {
        &self.event_details
    }

    /// Returns user log message.
    pub fn user_log_message(&self) -> &str {
        &self.user_log_message
    }

    /// Returns proper error message.
    pub fn message(&self, message_verbosity: ErrorMessageVerbosity) -> String {
        match &self.underlying_error {
            Some(msg) => format!("{} {}", self.user_log_message, msg.message(message_verbosity)),
            None => self.user_log_message.to_string(),
        }
    }

    /// Returns engine's underlying error.
    pub fn underlying_error(&self) -> Option<CommandError> {
        self.underlying_error.clone()
    }

    /// Returns error's link.
    pub fn link(&self) -> &Option<Url> {
        &self.link
    }

    /// Returns error's hint message.
    pub fn hint_message(&self) -> &Option<String> {
        &self.hint_message
    }

    /// Process exit code the CLI consumer should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self.tag {
            Tag::RecreationRequired => 2,
            _ => 1,
        }
    }

    /// Cancellation is a clean shutdown, never reported as an error event.
    pub fn is_cancel(&self) -> bool {
        self.tag == Tag::TaskCancellationRequested
    }

    fn new(
        event_details: EventDetails,
        tag: Tag,
        user_log_message: String,
        underlying_error: Option<CommandError>,
        link: Option<Url>,
        hint_message: Option<String>,
    ) -> Self {
        EngineError {
            event_details,
            tag,
            user_log_message,
            underlying_error,
            link,
            hint_message,
        }
    }

    /// Clone an existing engine error to specify a stage.
    pub fn clone_engine_error_with_stage(&self, stage: Stage) -> Self {
        EngineError {
            event_details: EventDetails::clone_changing_stage(self.event_details.clone(), stage),
            tag: self.tag.clone(),
            user_log_message: self.user_log_message.clone(),
            underlying_error: self.underlying_error.clone(),
            link: self.link.clone(),
            hint_message: self.hint_message.clone(),
        }
    }

    /// Creates new unknown error.
    ///
    /// Note: do not use unless really needed, every error should have a clear type.
    pub fn new_unknown(
        event_details: EventDetails,
        user_log_message: String,
        underlying_error: Option<CommandError>,
    ) -> EngineError {
        EngineError::new(event_details, Tag::Unknown, user_log_message, underlying_error, None, None)
    }

    /// Creates new error for an invalid cluster descriptor.
    pub fn new_invalid_cluster_descriptor(event_details: EventDetails, reason: String) -> EngineError {
        EngineError::new(
            event_details,
            Tag::InvalidClusterDescriptor,
            format!("Invalid cluster descriptor: {reason}"),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a cloud provider combined with a Docker-local registry.
    pub fn new_cloud_provider_requires_external_registry(event_details: EventDetails) -> EngineError {
        EngineError::new(
            event_details,
            Tag::CloudProviderRequiresExternalRegistry,
            "cloud provider requires external registry".to_string(),
            None,
            None,
            Some("Declare `localRegistry` as an external registry or switch provider to Docker.".to_string()),
        )
    }

    /// Creates new error for missing required env variable.
    pub fn new_missing_required_env_variable(event_details: EventDetails, variable_name: String) -> EngineError {
        EngineError::new(
            event_details,
            Tag::MissingRequiredEnvVariable,
            format!("`{variable_name}` environment variable wasn't found."),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a missing required binary on the host.
    pub fn new_cannot_find_required_binary(event_details: EventDetails, binary_name: String) -> EngineError {
        EngineError::new(
            event_details,
            Tag::CannotFindRequiredBinary,
            format!("`{binary_name}` binary wasn't found on the system."),
            None,
            None,
            Some(format!("Install `{binary_name}` and make sure it is reachable through PATH.")),
        )
    }

    /// Creates new error for an unparsable distribution config file.
    pub fn new_distribution_config_parse_error(
        event_details: EventDetails,
        config_ref: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::DistributionConfigParseError,
            format!("Cannot parse distribution config `{config_ref}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for an unreachable Docker daemon.
    pub fn new_docker_daemon_unavailable(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::DockerUnavailable,
            "Docker daemon is unreachable.".to_string(),
            Some(error),
            None,
            Some("Start the Docker daemon (or point DOCKER_HOST at a reachable one) and retry.".to_string()),
        )
    }

    /// Creates new error for a failed Docker operation.
    pub fn new_docker_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::DockerError,
            "Docker operation failed.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed cluster network creation.
    pub fn new_network_create_error(event_details: EventDetails, network: String, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::NetworkCreateError,
            format!("Cannot create Docker network `{network}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed container-to-network attachment.
    pub fn new_network_attach_error(
        event_details: EventDetails,
        container: String,
        network: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::NetworkAttachError,
            format!("Cannot attach container `{container}` to network `{network}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed registry provisioning.
    pub fn new_registry_provision_error(
        event_details: EventDetails,
        registry_name: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::RegistryProvisionError,
            format!("Cannot provision registry `{registry_name}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error when no host port can be allocated for a registry.
    pub fn new_registry_port_allocation_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::RegistryPortAllocationError,
            "Cannot allocate a host port for the registry.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new warning-grade error for a failed registry cleanup.
    pub fn new_registry_cleanup_error(
        event_details: EventDetails,
        registry_name: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::RegistryCleanupError,
            format!("Cannot cleanup registry `{registry_name}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for an absent cluster.
    pub fn new_cluster_not_found(event_details: EventDetails, cluster_name: String) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ClusterNotFound,
            format!("Cluster `{cluster_name}` doesn't exist."),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a failed cluster creation.
    pub fn new_cluster_create_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ClusterCreateError,
            "Cannot create cluster.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed cluster deletion.
    pub fn new_cluster_delete_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ClusterDeleteError,
            "Cannot delete cluster.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed cluster start.
    pub fn new_cluster_start_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ClusterStartError,
            "Cannot start cluster nodes.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed cluster stop.
    pub fn new_cluster_stop_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ClusterStopError,
            "Cannot stop cluster nodes.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed cluster listing.
    pub fn new_cluster_list_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ClusterListError,
            "Cannot list clusters.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed in-place cluster change.
    pub fn new_cluster_update_error(event_details: EventDetails, change: String, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ClusterUpdateError,
            format!("Cannot apply in-place change `{change}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed helm chart operation.
    pub fn new_helm_chart_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::HelmChartError,
            "Helm chart operation failed.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a component not ready within its timeout, embedding
    /// the top failing pods reported by the diagnoser.
    pub fn new_component_readiness_timeout(
        event_details: EventDetails,
        component: String,
        timeout: Duration,
        failing_pods: Vec<String>,
    ) -> EngineError {
        let pods_part = if failing_pods.is_empty() {
            "no failing pod reported".to_string()
        } else {
            format!("failing pods: {}", failing_pods.join(", "))
        };
        EngineError::new(
            event_details,
            Tag::ComponentReadinessTimeout,
            format!(
                "Component `{}` did not become ready within {}s; {}.",
                component,
                timeout.as_secs(),
                pods_part
            ),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a component readiness failure carrying the
    /// diagnoser output.
    pub fn new_component_readiness_error(
        event_details: EventDetails,
        component: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::ComponentReadinessTimeout,
            format!("Component `{component}` did not become ready."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a missing kubeconfig file.
    pub fn new_kubeconfig_missing(event_details: EventDetails, path: String) -> EngineError {
        EngineError::new(
            event_details,
            Tag::KubeconfigMissing,
            format!("Expected kubeconfig file `{path}` doesn't exist."),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a kubeconfig without a usable current-context.
    pub fn new_kubeconfig_invalid(event_details: EventDetails, path: String, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::KubeconfigInvalid,
            format!("Kubeconfig file `{path}` has no valid current-context."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error when the cluster API cannot be reached.
    pub fn new_cannot_connect_to_k8s_cluster(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::CannotConnectK8sCluster,
            "Cannot connect to the Kubernetes cluster API.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error when no node becomes Ready behind the CNI gate.
    pub fn new_k8s_node_not_ready(
        event_details: EventDetails,
        timeout: Duration,
        failing_pods: Vec<String>,
    ) -> EngineError {
        let pods_part = if failing_pods.is_empty() {
            "no failing pod reported in CNI namespaces".to_string()
        } else {
            format!("failing pods in CNI namespaces: {}", failing_pods.join(", "))
        };
        EngineError::new(
            event_details,
            Tag::K8sNodeIsNotReady,
            format!("No node reported Ready within {}s; {}.", timeout.as_secs(), pods_part),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a failed GitOps resource configuration.
    pub fn new_gitops_configuration_error(
        event_details: EventDetails,
        engine: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::GitOpsConfigurationError,
            format!("Cannot configure {engine} resources."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed OCI artifact push.
    pub fn new_oci_artifact_push_error(
        event_details: EventDetails,
        repository: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::OciArtifactPushError,
            format!("Cannot push OCI artifact to `{repository}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a failed cloud provider operation.
    pub fn new_cloud_provider_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::CloudProviderError,
            "Cloud provider operation failed.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for a reached cloud resource limit.
    pub fn new_cloud_resource_limit_exceeded(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::CloudResourceLimitExceeded,
            "Cloud account resource limit exceeded.".to_string(),
            Some(error),
            None,
            Some("Raise the account limits or free unused resources, then retry.".to_string()),
        )
    }

    /// Creates new error when server creation failed in every candidate location.
    pub fn new_cloud_all_locations_failed(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::CloudAllLocationsFailed,
            "Server creation failed in all candidate locations.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new warning-grade error for a failed cloud infrastructure cleanup.
    pub fn new_cloud_infra_delete_error(
        event_details: EventDetails,
        resource: String,
        error: CommandError,
    ) -> EngineError {
        EngineError::new(
            event_details,
            Tag::CloudInfraDeleteError,
            format!("Cannot delete cloud resource `{resource}`."),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error for an update containing recreate-category changes.
    pub fn new_recreation_required(event_details: EventDetails, changes: Vec<String>) -> EngineError {
        EngineError::new(
            event_details,
            Tag::RecreationRequired,
            format!("Requested changes require cluster recreation: {}.", changes.join(", ")),
            None,
            None,
            Some("Re-run update with force to accept recreation, or revert the changes.".to_string()),
        )
    }

    /// Creates new error when some in-place changes failed to apply.
    pub fn new_update_apply_error(event_details: EventDetails, failed_changes: Vec<String>) -> EngineError {
        EngineError::new(
            event_details,
            Tag::UpdateApplyError,
            format!("Some in-place changes failed to apply: {}.", failed_changes.join(", ")),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a missing workload source directory.
    pub fn new_workload_source_missing(event_details: EventDetails, path: String) -> EngineError {
        EngineError::new(
            event_details,
            Tag::WorkloadSourceMissing,
            format!("Workload source directory `{path}` doesn't exist."),
            None,
            None,
            None,
        )
    }

    /// Creates new error for a failed workload packaging.
    pub fn new_workload_packaging_error(event_details: EventDetails, error: CommandError) -> EngineError {
        EngineError::new(
            event_details,
            Tag::WorkloadPackagingError,
            "Cannot package workload source directory.".to_string(),
            Some(error),
            None,
            None,
        )
    }

    /// Creates new error to handle cancel requests.
    pub fn new_task_cancellation_requested(event_details: EventDetails) -> EngineError {
        EngineError::new(
            event_details,
            Tag::TaskCancellationRequested,
            "Task cancellation has been requested.".to_string(),
            None,
            None,
            None,
        )
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message(ErrorMessageVerbosity::SafeOnly).as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{InfrastructureStep, Stage, Transmitter};
    use crate::io_models::KsailIdentifier;

    fn event_details() -> EventDetails {
        EventDetails::new(
            None,
            KsailIdentifier::from("my-cluster"),
            "exec-1".to_string(),
            Stage::Infrastructure(InfrastructureStep::Update),
            Transmitter::Orchestrator("orchestrator".to_string()),
        )
    }

    #[test]
    fn test_command_error_verbosity() {
        // setup:
        let err = CommandError::new(
            "safe".to_string(),
            Some("full".to_string()),
            Some(vec![("TOKEN".to_string(), "s3cr3t".to_string())]),
        );

        // execute & verify:
        assert_eq!("safe", err.message(ErrorMessageVerbosity::SafeOnly));
        assert_eq!(
            "safe / Full details: full",
            err.message(ErrorMessageVerbosity::FullDetailsWithoutEnvVars)
        );
        assert!(err.message(ErrorMessageVerbosity::FullDetails).contains("TOKEN=s3cr3t"));
    }

    #[test]
    fn test_exit_codes() {
        // setup:
        let recreate = EngineError::new_recreation_required(event_details(), vec!["controlPlanes".to_string()]);
        let other = EngineError::new_cluster_create_error(event_details(), CommandError::default());

        // execute & verify:
        assert_eq!(2, recreate.exit_code());
        assert_eq!(1, other.exit_code());
    }

    #[test]
    fn test_cancellation_is_not_an_error() {
        assert!(EngineError::new_task_cancellation_requested(event_details()).is_cancel());
    }
}
