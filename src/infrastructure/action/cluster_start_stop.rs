use crate::errors::EngineError;
use crate::events::InfrastructureStep;
use crate::infrastructure::action::progress::run_stage;
use crate::infrastructure::action::{InfraLogger, mk_logger};
use crate::infrastructure::infrastructure_context::InfrastructureContext;
use crate::infrastructure::models::distribution::{ProvisionTarget, ProvisionerError};

/// StartPlan: resume the cluster nodes; already-running nodes are a no-op.
pub fn start_cluster_plan(infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>> {
    let descriptor = infra_ctx.descriptor();
    let abort = infra_ctx.context().abort_handle();
    let logger = mk_logger(infra_ctx, InfrastructureStep::Start);
    let provisioner = infra_ctx.provisioner();

    let provision_target = ProvisionTarget {
        descriptor,
        local_registry: None,
        mirror_registries: &[],
        abort: abort.clone(),
    };

    run_stage(&logger, InfrastructureStep::Start, "Start cluster nodes", &abort, |stage_logger| {
        match provisioner.start(&provision_target) {
            Ok(()) => Ok(()),
            Err(ProvisionerError::ClusterNotFound { cluster }) => Err(Box::new(EngineError::new_cluster_not_found(
                stage_logger.details().clone(),
                cluster,
            ))),
            Err(e) => Err(Box::new(EngineError::new_cluster_start_error(
                stage_logger.details().clone(),
                e.into(),
            ))),
        }
    })
}

/// StopPlan: halt the cluster nodes; already-stopped nodes are a no-op.
pub fn stop_cluster_plan(infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>> {
    let descriptor = infra_ctx.descriptor();
    let abort = infra_ctx.context().abort_handle();
    let logger = mk_logger(infra_ctx, InfrastructureStep::Stop);
    let provisioner = infra_ctx.provisioner();

    let provision_target = ProvisionTarget {
        descriptor,
        local_registry: None,
        mirror_registries: &[],
        abort: abort.clone(),
    };

    run_stage(&logger, InfrastructureStep::Stop, "Stop cluster nodes", &abort, |stage_logger| {
        match provisioner.stop(&provision_target) {
            Ok(()) => Ok(()),
            Err(ProvisionerError::ClusterNotFound { cluster }) => Err(Box::new(EngineError::new_cluster_not_found(
                stage_logger.details().clone(),
                cluster,
            ))),
            Err(e) => Err(Box::new(EngineError::new_cluster_stop_error(
                stage_logger.details().clone(),
                e.into(),
            ))),
        }
    })
}
