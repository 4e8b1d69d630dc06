use crate::errors::{CommandError, EngineError};
use crate::events::InfrastructureStep;
use crate::infrastructure::action::progress::run_stage;
use crate::infrastructure::action::{InfraLogger, mk_logger};
use crate::infrastructure::infrastructure_context::InfrastructureContext;
use crate::infrastructure::models::distribution::{ProvisionTarget, ProvisionerError};
use crate::infrastructure::models::provider::ProviderError;
use crate::infrastructure::registry::RegistryInfo;
use retry::OperationResult;
use retry::delay::Fixed;

/// Bounded retries of cloud resource deletion.
pub const MAX_DELETE_RETRIES: usize = 5;
const DELETE_RETRY_DELAY_MS: u64 = 2000;

/// DeletePlan: best effort — the cluster goes first, then registries not in
/// use elsewhere, then cloud infrastructure. Missing resources are silently
/// skipped; cleanup failures warn but never fail the plan.
pub fn delete_cluster_plan(infra_ctx: &InfrastructureContext, delete_volumes: bool) -> Result<(), Box<EngineError>> {
    let descriptor = infra_ctx.descriptor();
    let abort = infra_ctx.context().abort_handle();
    let logger = mk_logger(infra_ctx, InfrastructureStep::Delete);
    let deps = infra_ctx.dependencies();
    let provisioner = infra_ctx.provisioner();

    let provision_target = ProvisionTarget {
        descriptor,
        local_registry: None,
        mirror_registries: &[],
        abort: abort.clone(),
    };

    run_stage(&logger, InfrastructureStep::Delete, "Delete cluster", &abort, |stage_logger| {
        match provisioner.delete(&provision_target) {
            Ok(()) => Ok(()),
            Err(ProvisionerError::ClusterNotFound { cluster }) => {
                stage_logger.info(format!("cluster `{cluster}` doesn't exist, nothing to delete").into());
                Ok(())
            }
            Err(e) => Err(Box::new(EngineError::new_cluster_delete_error(
                stage_logger.details().clone(),
                e.into(),
            ))),
        }
    })?;

    run_stage(
        &logger,
        InfrastructureStep::CleanupRegistries,
        "Cleanup registries",
        &abort,
        |stage_logger| {
            for mirror in &descriptor.mirrors {
                let name = RegistryInfo::mirror_registry_name(&descriptor.name, &mirror.host);
                match deps.registry_service.is_in_use(&name, &descriptor.name) {
                    Ok(true) => {
                        // Shared with another running cluster: keep it.
                        stage_logger.warn(
                            format!("registry `{name}` is in use by another running cluster, keeping it").into(),
                        );
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        stage_logger.warn(format!("cannot check usage of registry `{name}`: {e}").into());
                        continue;
                    }
                }

                if let Err(e) = deps.registry_service.remove_registry(&name, delete_volumes) {
                    let warning = EngineError::new_registry_cleanup_error(
                        stage_logger.details().clone(),
                        name.clone(),
                        e.into(),
                    );
                    stage_logger.warn(warning.message(crate::errors::ErrorMessageVerbosity::SafeOnly).into());
                }
            }

            let local_name = RegistryInfo::local_registry_name(&descriptor.name);
            if let Err(e) = deps.registry_service.remove_registry(&local_name, delete_volumes) {
                let warning =
                    EngineError::new_registry_cleanup_error(stage_logger.details().clone(), local_name, e.into());
                stage_logger.warn(warning.message(crate::errors::ErrorMessageVerbosity::SafeOnly).into());
            }

            Ok(())
        },
    )?;

    if descriptor.provider.is_cloud() {
        run_stage(
            &logger,
            InfrastructureStep::CleanupCloudInfrastructure,
            "Cleanup cloud infrastructure",
            &abort,
            |stage_logger| {
                let provider = infra_ctx.provider();
                let cloud = match provider.as_cloud() {
                    Some(cloud) => cloud,
                    None => return Ok(()),
                };

                match provider.delete_nodes(&descriptor.name) {
                    Ok(()) | Err(ProviderError::SkipAction) => {}
                    Err(e) => stage_logger.warn(format!("cannot delete cloud nodes: {e}").into()),
                }

                let cleanups: Vec<(&str, Box<dyn Fn() -> Result<(), ProviderError>>)> = vec![
                    ("firewall", Box::new(|| cloud.delete_firewall(&descriptor.name))),
                    ("placement group", Box::new(|| cloud.delete_placement_group(&descriptor.name))),
                    ("network", Box::new(|| cloud.delete_network(&descriptor.name))),
                ];

                for (resource, cleanup) in cleanups {
                    let ret = retry::retry(
                        Fixed::from_millis(DELETE_RETRY_DELAY_MS).take(MAX_DELETE_RETRIES),
                        || match cleanup() {
                            Ok(()) => OperationResult::Ok(()),
                            Err(e) => OperationResult::Retry(e),
                        },
                    );
                    if let Err(e) = ret {
                        let warning = EngineError::new_cloud_infra_delete_error(
                            stage_logger.details().clone(),
                            resource.to_string(),
                            CommandError::new_from_safe_message(e.error.to_string()),
                        );
                        stage_logger.warn(warning.message(crate::errors::ErrorMessageVerbosity::SafeOnly).into());
                    }
                }

                Ok(())
            },
        )?;
    }

    Ok(())
}
