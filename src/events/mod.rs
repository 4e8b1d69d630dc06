#![allow(clippy::large_enum_variant)]

pub mod bus;
pub mod io;

use crate::errors::{CommandError, EngineError, ErrorMessageVerbosity};
use crate::infrastructure::models::provider::Kind;
use crate::io_models::KsailIdentifier;
use derivative::Derivative;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Clone)]
/// EngineEvent: represents an event happening in the engine, published on the
/// event bus and consumed by the UI adapter.
pub enum EngineEvent {
    /// Title: a headline for the operation in progress.
    Title(EventDetails, EventMessage),
    /// Activity: low-value progress chatter; first to be dropped on bus overflow.
    Activity(EventDetails, EventMessage),
    /// Info: represents an info message event.
    Info(EventDetails, EventMessage),
    /// Success: a stage or operation completed successfully.
    Success(EventDetails, EventMessage),
    /// Warning: represents a warning message event; never fails the plan.
    Warning(EventDetails, EventMessage),
    /// Error: represents an error event.
    Error(EngineError, Option<EventMessage>),
    /// StageStart: a plan stage begins; message carries the stage title.
    StageStart(EventDetails, EventMessage),
    /// StageEnd: a plan stage ends with its elapsed duration.
    StageEnd(EventDetails, EventMessage, Duration),
    /// TaskStart: a task inside a stage (possibly in a parallel group) begins.
    TaskStart(EventDetails, String),
    /// TaskEnd: a task ends with its elapsed duration.
    TaskEnd(EventDetails, String, Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEventKind {
    Title,
    Activity,
    Info,
    Success,
    Warning,
    Error,
    StageStart,
    StageEnd,
    TaskStart,
    TaskEnd,
}

impl EngineEvent {
    /// Returns engine's event details.
    pub fn get_details(&self) -> &EventDetails {
        match self {
            EngineEvent::Title(details, _)
            | EngineEvent::Activity(details, _)
            | EngineEvent::Info(details, _)
            | EngineEvent::Success(details, _)
            | EngineEvent::Warning(details, _)
            | EngineEvent::StageStart(details, _)
            | EngineEvent::StageEnd(details, _, _)
            | EngineEvent::TaskStart(details, _)
            | EngineEvent::TaskEnd(details, _, _) => details,
            EngineEvent::Error(engine_error, _) => engine_error.event_details(),
        }
    }

    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::Title(_, _) => EngineEventKind::Title,
            EngineEvent::Activity(_, _) => EngineEventKind::Activity,
            EngineEvent::Info(_, _) => EngineEventKind::Info,
            EngineEvent::Success(_, _) => EngineEventKind::Success,
            EngineEvent::Warning(_, _) => EngineEventKind::Warning,
            EngineEvent::Error(_, _) => EngineEventKind::Error,
            EngineEvent::StageStart(_, _) => EngineEventKind::StageStart,
            EngineEvent::StageEnd(_, _, _) => EngineEventKind::StageEnd,
            EngineEvent::TaskStart(_, _) => EngineEventKind::TaskStart,
            EngineEvent::TaskEnd(_, _, _) => EngineEventKind::TaskEnd,
        }
    }

    /// Events the bus may drop under backpressure. `Error` and `StageEnd` are
    /// never droppable so the nesting invariant survives overflow.
    pub fn is_droppable(&self) -> bool {
        matches!(self.kind(), EngineEventKind::Activity)
    }

    /// Returns the elapsed duration carried by stage/task end events.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            EngineEvent::StageEnd(_, _, elapsed) | EngineEvent::TaskEnd(_, _, elapsed) => Some(*elapsed),
            _ => None,
        }
    }

    /// Returns engine's event message.
    pub fn message(&self, message_verbosity: EventMessageVerbosity) -> String {
        match self {
            EngineEvent::Title(_, message)
            | EngineEvent::Activity(_, message)
            | EngineEvent::Info(_, message)
            | EngineEvent::Success(_, message)
            | EngineEvent::Warning(_, message)
            | EngineEvent::StageStart(_, message) => message.message(message_verbosity),
            EngineEvent::StageEnd(_, message, elapsed) => {
                format!("{} ({}s)", message.message(message_verbosity), elapsed.as_secs())
            }
            EngineEvent::TaskStart(_, task_name) => task_name.to_string(),
            EngineEvent::TaskEnd(_, task_name, elapsed) => format!("{} ({}s)", task_name, elapsed.as_secs()),
            EngineEvent::Error(engine_error, _) => engine_error.message(message_verbosity.into()),
        }
    }
}

/// EventMessageVerbosity: represents event message's verbosity from minimal to full verbosity.
pub enum EventMessageVerbosity {
    SafeOnly,
    FullDetailsWithoutEnvVars,
    FullDetails,
}

impl From<EventMessageVerbosity> for ErrorMessageVerbosity {
    fn from(verbosity: EventMessageVerbosity) -> Self {
        match verbosity {
            EventMessageVerbosity::SafeOnly => ErrorMessageVerbosity::SafeOnly,
            EventMessageVerbosity::FullDetailsWithoutEnvVars => ErrorMessageVerbosity::FullDetailsWithoutEnvVars,
            EventMessageVerbosity::FullDetails => ErrorMessageVerbosity::FullDetails,
        }
    }
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
/// EventMessage: represents an event message.
pub struct EventMessage {
    // Message which is known to be safe: doesn't expose any credentials nor touchy info.
    pub(crate) safe_message: String,
    // String containing full details including touchy data (passwords and tokens).
    pub(crate) full_details: Option<String>,
    // Environments variables including touchy data such as secret keys.
    // env_vars field is ignored from any wild Debug printing because of the touchy data it carries.
    #[derivative(Debug = "ignore")]
    env_vars: Option<Vec<(String, String)>>,
}

impl EventMessage {
    /// Creates a new EventMessage.
    ///
    /// Arguments
    ///
    /// * `safe_message`: Event safe message string (from which all unsafe text such as passwords and tokens has been removed).
    /// * `full_details`: Event raw message string (which may include unsafe text such as passwords and tokens).
    pub fn new(safe_message: String, full_details: Option<String>) -> Self {
        EventMessage {
            safe_message,
            full_details,
            env_vars: None,
        }
    }

    /// Creates a new EventMessage with environment variables.
    pub fn new_with_env_vars(
        safe_message: String,
        full_details: Option<String>,
        env_vars: Option<Vec<(String, String)>>,
    ) -> Self {
        EventMessage {
            safe_message,
            full_details,
            env_vars,
        }
    }

    /// Creates a new EventMessage from safe message.
    pub fn new_from_safe(safe_message: String) -> Self {
        EventMessage {
            safe_message,
            full_details: None,
            env_vars: None,
        }
    }

    /// Creates a new EventMessage from an engine error.
    pub fn new_from_engine_error(engine_error: EngineError) -> Self {
        EventMessage {
            safe_message: engine_error.message(ErrorMessageVerbosity::SafeOnly),
            full_details: Some(engine_error.message(ErrorMessageVerbosity::FullDetailsWithoutEnvVars)),
            env_vars: None,
        }
    }

    /// Returns message for event message.
    ///
    /// Arguments
    ///
    /// * `message_verbosity`: Which verbosity is required for the message.
    pub fn message(&self, message_verbosity: EventMessageVerbosity) -> String {
        match message_verbosity {
            EventMessageVerbosity::SafeOnly => self.safe_message.to_string(),
            EventMessageVerbosity::FullDetailsWithoutEnvVars => match &self.full_details {
                None => self.safe_message.to_string(),
                Some(details) => format!("{} / Full details: {}", self.safe_message, details),
            },
            EventMessageVerbosity::FullDetails => match &self.full_details {
                None => self.safe_message.to_string(),
                Some(details) => match &self.env_vars {
                    None => format!("{} / Full details: {}", self.safe_message, details),
                    Some(env_vars) => {
                        format!(
                            "{} / Full details: {} / Env vars: {}",
                            self.safe_message,
                            details,
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
}

impl From<CommandError> for EventMessage {
    fn from(e: CommandError) -> Self {
        EventMessage::new_with_env_vars(e.message_safe(), e.message_raw(), e.env_vars())
    }
}

impl From<String> for EventMessage {
    fn from(message: String) -> Self {
        EventMessage::new_from_safe(message)
    }
}

impl From<&str> for EventMessage {
    fn from(message: &str) -> Self {
        EventMessage::new_from_safe(message.to_string())
    }
}

impl Display for EventMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message(EventMessageVerbosity::SafeOnly).as_str()) // By default, expose only the safe message.
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Stage: represents an engine event stage, either a cluster lifecycle stage
/// or a workload-push stage.
pub enum Stage {
    /// Infrastructure: cluster lifecycle operations.
    Infrastructure(InfrastructureStep),
    /// Workload: OCI workload packaging and push operations.
    Workload(WorkloadStep),
}

impl Stage {
    /// Returns stage's sub step name.
    pub fn sub_step_name(&self) -> String {
        match &self {
            Stage::Infrastructure(step) => step.to_string(),
            Stage::Workload(step) => step.to_string(),
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match &self {
                Stage::Infrastructure(_) => "infrastructure",
                Stage::Workload(_) => "workload",
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// InfrastructureStep: represents an engine infrastructure step.
pub enum InfrastructureStep {
    /// LoadConfiguration: first step of every plan, load descriptor and distribution config.
    LoadConfiguration,
    /// ValidateDescriptor: validating the cluster descriptor invariants.
    ValidateDescriptor,
    /// ProvisionLocalRegistry: pre-staging the cluster-local OCI registry.
    ProvisionLocalRegistry,
    /// ProvisionMirrorRegistries: pre-staging the pull-through mirror registries.
    ProvisionMirrorRegistries,
    /// PrepareDistributionConfig: distribution-specific pre-create mutations.
    PrepareDistributionConfig,
    /// CreateCluster: the distribution provisioner creates the nodes.
    CreateCluster,
    /// AttachRegistries: connecting registries to the cluster network.
    AttachRegistries,
    /// InstallCni: CNI install and readiness gate.
    InstallCni,
    /// InstallInfrastructureComponents: phase-1 parallel component installs.
    InstallInfrastructureComponents,
    /// InstallGitOpsEngines: phase-2 parallel GitOps engine installs.
    InstallGitOpsEngines,
    /// ConfigureGitOps: post-install GitOps resource configuration.
    ConfigureGitOps,
    /// VerifyCluster: post-create verification (kubeconfig, registries).
    VerifyCluster,
    /// CleanupRegistries: removing registries not in use by other clusters.
    CleanupRegistries,
    /// CleanupCloudInfrastructure: removing cloud network/firewall/placement group.
    CleanupCloudInfrastructure,
    /// ListClusters: enumerating clusters for one or all distributions.
    ListClusters,

    /// Create: creating a cluster.
    Create,
    /// Created: cluster creation is ok.
    Created,
    /// CreateError: error on creating a cluster.
    CreateError,
    /// Delete: deleting a cluster.
    Delete,
    /// Deleted: cluster deletion is ok.
    Deleted,
    /// DeleteError: error on deleting a cluster.
    DeleteError,
    /// Start: resuming a stopped cluster.
    Start,
    /// Started: cluster start is ok.
    Started,
    /// StartError: error on starting a cluster.
    StartError,
    /// Stop: halting a running cluster.
    Stop,
    /// Stopped: cluster stop is ok.
    Stopped,
    /// StopError: error on stopping a cluster.
    StopError,
    /// Update: applying a classified diff to a cluster.
    Update,
    /// Updated: cluster update is ok.
    Updated,
    /// UpdateError: error on updating a cluster.
    UpdateError,
    /// GlobalError: an error not tied to a specific step.
    GlobalError,
}

impl Display for InfrastructureStep {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match &self {
                InfrastructureStep::LoadConfiguration => "load-configuration",
                InfrastructureStep::ValidateDescriptor => "validate-descriptor",
                InfrastructureStep::ProvisionLocalRegistry => "provision-local-registry",
                InfrastructureStep::ProvisionMirrorRegistries => "provision-mirror-registries",
                InfrastructureStep::PrepareDistributionConfig => "prepare-distribution-config",
                InfrastructureStep::CreateCluster => "create-cluster",
                InfrastructureStep::AttachRegistries => "attach-registries",
                InfrastructureStep::InstallCni => "install-cni",
                InfrastructureStep::InstallInfrastructureComponents => "install-infrastructure-components",
                InfrastructureStep::InstallGitOpsEngines => "install-gitops-engines",
                InfrastructureStep::ConfigureGitOps => "configure-gitops",
                InfrastructureStep::VerifyCluster => "verify-cluster",
                InfrastructureStep::CleanupRegistries => "cleanup-registries",
                InfrastructureStep::CleanupCloudInfrastructure => "cleanup-cloud-infrastructure",
                InfrastructureStep::ListClusters => "list-clusters",
                InfrastructureStep::Create => "create",
                InfrastructureStep::Created => "created",
                InfrastructureStep::CreateError => "create-error",
                InfrastructureStep::Delete => "delete",
                InfrastructureStep::Deleted => "deleted",
                InfrastructureStep::DeleteError => "delete-error",
                InfrastructureStep::Start => "start",
                InfrastructureStep::Started => "started",
                InfrastructureStep::StartError => "start-error",
                InfrastructureStep::Stop => "stop",
                InfrastructureStep::Stopped => "stopped",
                InfrastructureStep::StopError => "stop-error",
                InfrastructureStep::Update => "update",
                InfrastructureStep::Updated => "updated",
                InfrastructureStep::UpdateError => "update-error",
                InfrastructureStep::GlobalError => "global-error",
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// WorkloadStep: represents a workload-push step.
pub enum WorkloadStep {
    /// Validate: pre-push validation of the source directory.
    Validate,
    /// Package: building the tar+gzip artifact from the source directory.
    Package,
    /// Push: uploading the artifact to the OCI registry.
    Push,
    /// Pushed: artifact push is ok.
    Pushed,
    /// PushError: error on pushing the artifact.
    PushError,
}

impl Display for WorkloadStep {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match &self {
                WorkloadStep::Validate => "validate",
                WorkloadStep::Package => "package",
                WorkloadStep::Push => "push",
                WorkloadStep::Pushed => "pushed",
                WorkloadStep::PushError => "push-error",
            },
        )
    }
}

/// TransmitterName: represents a transmitter name.
type TransmitterName = String;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Transmitter: represents the event's source caller (transmitter).
pub enum Transmitter {
    /// Orchestrator: the top-level lifecycle state machine.
    Orchestrator(TransmitterName),
    /// Provisioner: a distribution provisioner engine part.
    Provisioner(TransmitterName),
    /// ContainerRegistry: the registry service engine part.
    ContainerRegistry(TransmitterName),
    /// NetworkBroker: the Docker network broker engine part.
    NetworkBroker(TransmitterName),
    /// Installer: a component installer engine part.
    Installer(TransmitterName),
    /// CloudProvider: the infrastructure provider engine part.
    CloudProvider(TransmitterName),
    /// Workload: the OCI workload pusher engine part.
    Workload(TransmitterName),
}

impl Display for Transmitter {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match &self {
                Transmitter::Orchestrator(name) => format!("orchestrator({name})"),
                Transmitter::Provisioner(name) => format!("provisioner({name})"),
                Transmitter::ContainerRegistry(name) => format!("container_registry({name})"),
                Transmitter::NetworkBroker(name) => format!("network_broker({name})"),
                Transmitter::Installer(name) => format!("installer({name})"),
                Transmitter::CloudProvider(name) => format!("cloud_provider({name})"),
                Transmitter::Workload(name) => format!("workload({name})"),
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// EventDetails: represents an event's details, carrying the cluster identity,
/// execution identifier, stage and transmitter.
pub struct EventDetails {
    /// provider_kind: infrastructure provider. Can be None when not tied to a provider.
    provider_kind: Option<Kind>,
    /// cluster: cluster identifier the event relates to.
    cluster: KsailIdentifier,
    /// execution_id: identifier of the engine invocation.
    execution_id: String,
    /// stage: stage in which this event has been triggered.
    stage: Stage,
    /// transmitter: source triggering the event.
    transmitter: Transmitter,
}

impl EventDetails {
    pub fn new(
        provider_kind: Option<Kind>,
        cluster: KsailIdentifier,
        execution_id: String,
        stage: Stage,
        transmitter: Transmitter,
    ) -> Self {
        EventDetails {
            provider_kind,
            cluster,
            execution_id,
            stage,
            transmitter,
        }
    }

    /// Creates a copy of the given event details but with another stage.
    pub fn clone_changing_stage(event_details: EventDetails, stage: Stage) -> Self {
        EventDetails {
            provider_kind: event_details.provider_kind,
            cluster: event_details.cluster,
            execution_id: event_details.execution_id,
            stage,
            transmitter: event_details.transmitter,
        }
    }

    /// Creates a copy of the given event details but with another transmitter.
    pub fn clone_changing_transmitter(event_details: EventDetails, transmitter: Transmitter) -> Self {
        EventDetails {
            provider_kind: event_details.provider_kind,
            cluster: event_details.cluster,
            execution_id: event_details.execution_id,
            stage: event_details.stage,
            transmitter,
        }
    }

    /// Moves the stage to its error counterpart, used when converting a plan
    /// failure into a terminal error event.
    pub(crate) fn mut_to_error_stage(&mut self) {
        if let Stage::Infrastructure(step) = &self.stage {
            let error_step = match step {
                InfrastructureStep::Create | InfrastructureStep::Created => InfrastructureStep::CreateError,
                InfrastructureStep::Delete | InfrastructureStep::Deleted => InfrastructureStep::DeleteError,
                InfrastructureStep::Start | InfrastructureStep::Started => InfrastructureStep::StartError,
                InfrastructureStep::Stop | InfrastructureStep::Stopped => InfrastructureStep::StopError,
                InfrastructureStep::Update | InfrastructureStep::Updated => InfrastructureStep::UpdateError,
                _ => return,
            };
            self.stage = Stage::Infrastructure(error_step);
        }
    }

    pub fn provider_kind(&self) -> Option<Kind> {
        self.provider_kind
    }

    pub fn cluster(&self) -> &KsailIdentifier {
        &self.cluster
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn transmitter(&self) -> Transmitter {
        self.transmitter.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;

    fn details(stage: Stage) -> EventDetails {
        EventDetails::new(
            None,
            KsailIdentifier::from("my-cluster"),
            "exec-1".to_string(),
            stage,
            Transmitter::Orchestrator("orchestrator".to_string()),
        )
    }

    #[test]
    fn test_event_message_verbosity() {
        // setup:
        let message = EventMessage::new("safe".to_string(), Some("full".to_string()));

        // execute & verify:
        assert_eq!("safe", message.message(EventMessageVerbosity::SafeOnly));
        assert_eq!(
            "safe / Full details: full",
            message.message(EventMessageVerbosity::FullDetailsWithoutEnvVars)
        );
    }

    #[test]
    fn test_mut_to_error_stage() {
        // setup:
        struct TestCase {
            input: InfrastructureStep,
            expected: InfrastructureStep,
        }

        let test_cases = vec![
            TestCase {
                input: InfrastructureStep::Create,
                expected: InfrastructureStep::CreateError,
            },
            TestCase {
                input: InfrastructureStep::Delete,
                expected: InfrastructureStep::DeleteError,
            },
            TestCase {
                input: InfrastructureStep::Update,
                expected: InfrastructureStep::UpdateError,
            },
            // steps without an error counterpart stay as they are
            TestCase {
                input: InfrastructureStep::ProvisionLocalRegistry,
                expected: InfrastructureStep::ProvisionLocalRegistry,
            },
        ];

        for tc in test_cases {
            // execute:
            let mut d = details(Stage::Infrastructure(tc.input));
            d.mut_to_error_stage();

            // verify:
            assert_eq!(Stage::Infrastructure(tc.expected), *d.stage());
        }
    }

    #[test]
    fn test_droppable_events() {
        let d = details(Stage::Infrastructure(InfrastructureStep::Create));
        assert!(EngineEvent::Activity(d.clone(), EventMessage::new_from_safe("a".to_string())).is_droppable());
        assert!(!EngineEvent::StageEnd(
            d.clone(),
            EventMessage::new_from_safe("s".to_string()),
            Duration::from_secs(1)
        )
        .is_droppable());
        assert!(!EngineEvent::Error(EngineError::new_task_cancellation_requested(d), None).is_droppable());
    }
}
