mod cluster_create;
mod cluster_delete;
mod cluster_list;
mod cluster_start_stop;
mod cluster_update;
pub mod gitops;
pub mod progress;

pub use cluster_create::create_cluster_plan;
pub use cluster_delete::delete_cluster_plan;
pub use cluster_list::list_clusters_plan;
pub use cluster_start_stop::{start_cluster_plan, stop_cluster_plan};
pub use cluster_update::update_cluster_plan;

use crate::errors::EngineError;
use crate::events::Stage::Infrastructure;
use crate::events::{EngineEvent, EventDetails, EventMessage, InfrastructureStep};
use crate::infrastructure::infrastructure_context::InfrastructureContext;
use crate::io_models::cluster::ClusterDescriptor;
use crate::io_models::update::{UpdateOptions, UpdateResult};
use crate::logger::Logger;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Delete { delete_volumes: bool },
    Start,
    Stop,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Delete { .. } => "delete",
            Action::Start => "start",
            Action::Stop => "stop",
        })
    }
}

/// Logger bound to one event-details scope; object safe so leaf components
/// (GitOps configurator, progress engine) can receive it as `&dyn`.
pub trait InfraLogger: Send + Sync {
    fn log_event(&self, event: EngineEvent);

    fn details(&self) -> &EventDetails;

    fn title(&self, message: EventMessage) {
        self.log_event(EngineEvent::Title(self.details().clone(), message));
    }

    fn activity(&self, message: EventMessage) {
        self.log_event(EngineEvent::Activity(self.details().clone(), message));
    }

    fn info(&self, message: EventMessage) {
        self.log_event(EngineEvent::Info(self.details().clone(), message));
    }

    fn success(&self, message: EventMessage) {
        self.log_event(EngineEvent::Success(self.details().clone(), message));
    }

    fn warn(&self, message: EventMessage) {
        self.log_event(EngineEvent::Warning(self.details().clone(), message));
    }

    fn error(&self, error: EngineError, message: Option<EventMessage>) {
        self.log_event(EngineEvent::Error(error, message));
    }
}

pub struct InfraLoggerImpl {
    event_details: EventDetails,
    logger: Box<dyn Logger>,
}

impl InfraLoggerImpl {
    pub fn new(event_details: EventDetails, logger: Box<dyn Logger>) -> Self {
        InfraLoggerImpl { event_details, logger }
    }

    /// Same sink, different event details.
    pub fn with_details(&self, event_details: EventDetails) -> InfraLoggerImpl {
        InfraLoggerImpl {
            event_details,
            logger: self.logger.clone(),
        }
    }
}

impl InfraLogger for InfraLoggerImpl {
    fn log_event(&self, event: EngineEvent) {
        self.logger.log(event);
    }

    fn details(&self) -> &EventDetails {
        &self.event_details
    }
}

pub fn mk_logger(infra_ctx: &InfrastructureContext, step: InfrastructureStep) -> InfraLoggerImpl {
    InfraLoggerImpl::new(infra_ctx.event_details(Infrastructure(step)), infra_ctx.logger())
}

/// The top-level lifecycle state machine.
pub trait LifecycleAction: Send + Sync {
    fn create_cluster(&self, infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>>;

    fn delete_cluster(&self, infra_ctx: &InfrastructureContext, delete_volumes: bool) -> Result<(), Box<EngineError>>;

    fn start_cluster(&self, infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>>;

    fn stop_cluster(&self, infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>>;

    fn update_cluster(
        &self,
        infra_ctx: &InfrastructureContext,
        desired: &ClusterDescriptor,
        options: UpdateOptions,
    ) -> Result<UpdateResult, Box<EngineError>>;

    fn run(&self, infra_ctx: &InfrastructureContext, action: Action) -> Result<(), Box<EngineError>> {
        let (step, done_step) = match action {
            Action::Create => (InfrastructureStep::Create, InfrastructureStep::Created),
            Action::Delete { .. } => (InfrastructureStep::Delete, InfrastructureStep::Deleted),
            Action::Start => (InfrastructureStep::Start, InfrastructureStep::Started),
            Action::Stop => (InfrastructureStep::Stop, InfrastructureStep::Stopped),
        };

        let logger = mk_logger(infra_ctx, step);
        logger.title(
            format!(
                "{} {} cluster {}",
                action,
                infra_ctx.descriptor().distribution,
                infra_ctx.descriptor().name
            )
            .into(),
        );

        let ret = match action {
            Action::Create => self.create_cluster(infra_ctx),
            Action::Delete { delete_volumes } => self.delete_cluster(infra_ctx, delete_volumes),
            Action::Start => self.start_cluster(infra_ctx),
            Action::Stop => self.stop_cluster(infra_ctx),
        };

        match ret {
            Ok(()) => {
                let logger = mk_logger(infra_ctx, done_step);
                logger.success(
                    format!("cluster {} {} is done", infra_ctx.descriptor().name, action).into(),
                );
                Ok(())
            }
            // Cancellation is a clean shutdown, not an error to report.
            Err(err) if err.is_cancel() => Err(err),
            Err(err) => {
                let mut details = err.event_details().clone();
                details.mut_to_error_stage();
                let logger = InfraLoggerImpl::new(details, infra_ctx.logger());
                logger.error(*err.clone(), None);
                Err(err)
            }
        }
    }
}

/// Production orchestrator: drives the phased plans.
#[derive(Default)]
pub struct ClusterOrchestrator {}

impl ClusterOrchestrator {
    pub fn new() -> Self {
        ClusterOrchestrator {}
    }
}

impl LifecycleAction for ClusterOrchestrator {
    fn create_cluster(&self, infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>> {
        create_cluster_plan(infra_ctx)
    }

    fn delete_cluster(&self, infra_ctx: &InfrastructureContext, delete_volumes: bool) -> Result<(), Box<EngineError>> {
        delete_cluster_plan(infra_ctx, delete_volumes)
    }

    fn start_cluster(&self, infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>> {
        start_cluster_plan(infra_ctx)
    }

    fn stop_cluster(&self, infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>> {
        stop_cluster_plan(infra_ctx)
    }

    fn update_cluster(
        &self,
        infra_ctx: &InfrastructureContext,
        desired: &ClusterDescriptor,
        options: UpdateOptions,
    ) -> Result<UpdateResult, Box<EngineError>> {
        update_cluster_plan(infra_ctx, desired, options)
    }
}
