use crate::errors::EngineError;
use crate::events::InfrastructureStep;
use crate::infrastructure::action::{InfraLogger, InfraLoggerImpl, mk_logger};
use crate::infrastructure::helm_charts::{ComponentKind, InstallTarget, Installer};
use crate::infrastructure::infrastructure_context::InfrastructureContext;
use crate::infrastructure::models::distribution::k3s::K3D_AGENTS_FIELD;
use crate::infrastructure::models::distribution::ProvisionTarget;
use crate::infrastructure::registry::RegistryInfo;
use crate::infrastructure::update::classify_changes;
use crate::io_models::cluster::{
    CertManagerOption, ClusterDescriptor, CsiOption, GitOpsEngineOption, MetricsServerOption, PolicyEngineOption,
};
use crate::io_models::update::{Change, UpdateOptions, UpdateResult};

/// UpdatePlan: classify the descriptor diff, then apply the in-place subset.
/// `dry_run` stops after classification; a non-empty recreate set fails with
/// `RecreationRequired` unless forced.
pub fn update_cluster_plan(
    infra_ctx: &InfrastructureContext,
    desired: &ClusterDescriptor,
    options: UpdateOptions,
) -> Result<UpdateResult, Box<EngineError>> {
    let logger = mk_logger(infra_ctx, InfrastructureStep::Update);

    if let Err(reason) = desired.validate() {
        return Err(Box::new(EngineError::new_invalid_cluster_descriptor(
            logger.details().clone(),
            reason,
        )));
    }

    let mut result = classify_changes(infra_ctx.descriptor(), desired);

    if result.is_noop() {
        logger.info("no changes detected, nothing to do".into());
        return Ok(result);
    }

    for change in result.changes() {
        logger.info(format!("{} change: {change}", change.category).into());
    }

    if options.dry_run {
        logger.info("dry run requested, no change is applied".into());
        return Ok(result);
    }

    if !result.recreate_required.is_empty() && !options.force {
        let fields: Vec<String> = result.recreate_required.iter().map(|c| c.field.clone()).collect();
        return Err(Box::new(EngineError::new_recreation_required(
            logger.details().clone(),
            fields,
        )));
    }

    let in_place = result.in_place_changes.clone();
    for change in in_place {
        match apply_in_place_change(infra_ctx, desired, &change, &logger) {
            Ok(()) => {
                logger.success(format!("applied {change}").into());
                result.applied_changes.push(change);
            }
            Err(e) => {
                logger.warn(format!("failed to apply {change}: {e}").into());
                result.failed_changes.push(change);
            }
        }
    }

    if !result.failed_changes.is_empty() {
        let fields: Vec<String> = result.failed_changes.iter().map(|c| c.field.clone()).collect();
        return Err(Box::new(EngineError::new_update_apply_error(
            logger.details().clone(),
            fields,
        )));
    }

    Ok(result)
}

fn apply_in_place_change(
    infra_ctx: &InfrastructureContext,
    desired: &ClusterDescriptor,
    change: &Change,
    logger: &InfraLoggerImpl,
) -> Result<(), Box<EngineError>> {
    match change.field.as_str() {
        K3D_AGENTS_FIELD => {
            let abort = infra_ctx.context().abort_handle();
            let provision_target = ProvisionTarget {
                descriptor: infra_ctx.descriptor(),
                local_registry: None,
                mirror_registries: &[],
                abort,
            };
            infra_ctx
                .provisioner()
                .update(&provision_target, change)
                .map_err(|e| {
                    Box::new(EngineError::new_cluster_update_error(
                        logger.details().clone(),
                        change.field.clone(),
                        e.into(),
                    ))
                })
        }
        "cluster.metricsServer" => toggle_component(
            infra_ctx,
            desired,
            change,
            logger,
            ComponentKind::MetricsServer,
            desired.metrics_server == MetricsServerOption::Enabled,
        ),
        "cluster.csi" => toggle_component(
            infra_ctx,
            desired,
            change,
            logger,
            ComponentKind::Csi,
            matches!(desired.csi, CsiOption::Enabled | CsiOption::LocalPathStorage),
        ),
        "cluster.certManager" => toggle_component(
            infra_ctx,
            desired,
            change,
            logger,
            ComponentKind::CertManager,
            desired.cert_manager == CertManagerOption::Enabled,
        ),
        "cluster.policyEngine" => {
            // Uninstall the engine being left, install the one being adopted.
            let current = infra_ctx.descriptor();
            if current.policy_engine != PolicyEngineOption::None {
                let kind = match current.policy_engine {
                    PolicyEngineOption::Kyverno => ComponentKind::Kyverno,
                    PolicyEngineOption::Gatekeeper => ComponentKind::Gatekeeper,
                    PolicyEngineOption::None => unreachable!(),
                };
                uninstall_component(infra_ctx, current, change, logger, kind)?;
            }
            if desired.policy_engine != PolicyEngineOption::None {
                let kind = match desired.policy_engine {
                    PolicyEngineOption::Kyverno => ComponentKind::Kyverno,
                    PolicyEngineOption::Gatekeeper => ComponentKind::Gatekeeper,
                    PolicyEngineOption::None => unreachable!(),
                };
                install_component(infra_ctx, desired, change, logger, kind)?;
            }
            Ok(())
        }
        "cluster.gitOpsEngine" => {
            let current = infra_ctx.descriptor();
            if current.gitops_engine != GitOpsEngineOption::None {
                if let Some(installer) = gitops_installer(infra_ctx, current) {
                    run_uninstall(infra_ctx, installer.as_ref(), change, logger)?;
                }
            }
            if desired.gitops_engine != GitOpsEngineOption::None {
                if let Some(installer) = gitops_installer(infra_ctx, desired) {
                    run_install(infra_ctx, installer.as_ref(), change, logger)?;
                }
            }
            Ok(())
        }
        "cluster.mirrors" => apply_mirror_changes(infra_ctx, desired, change, logger),
        other => Err(Box::new(EngineError::new_cluster_update_error(
            logger.details().clone(),
            other.to_string(),
            crate::errors::CommandError::new_from_safe_message(format!(
                "no in-place handler for field `{other}`"
            )),
        ))),
    }
}

fn mk_install_target(infra_ctx: &InfrastructureContext) -> InstallTarget {
    InstallTarget {
        kubeconfig_path: infra_ctx.descriptor().kubeconfig_path.clone(),
        kube: infra_ctx.mk_kube_client().ok(),
        envs: vec![],
        abort: infra_ctx.context().abort_handle(),
        timeout_override: infra_ctx.descriptor().timeout_override,
    }
}

fn infrastructure_installer(
    infra_ctx: &InfrastructureContext,
    descriptor: &ClusterDescriptor,
    kind: ComponentKind,
) -> Option<Box<dyn Installer>> {
    infra_ctx
        .dependencies()
        .installer_catalog
        .infrastructure_installers(descriptor)
        .into_iter()
        .find(|i| i.component_kind() == kind)
}

fn gitops_installer(infra_ctx: &InfrastructureContext, descriptor: &ClusterDescriptor) -> Option<Box<dyn Installer>> {
    infra_ctx
        .dependencies()
        .installer_catalog
        .gitops_installers(descriptor)
        .into_iter()
        .next()
}

fn run_install(
    infra_ctx: &InfrastructureContext,
    installer: &dyn Installer,
    change: &Change,
    logger: &InfraLoggerImpl,
) -> Result<(), Box<EngineError>> {
    let target = mk_install_target(infra_ctx);
    installer
        .install(&target)
        .and_then(|()| installer.wait_for_readiness(&target))
        .map_err(|e| {
            Box::new(EngineError::new_cluster_update_error(
                logger.details().clone(),
                change.field.clone(),
                e,
            ))
        })
}

fn run_uninstall(
    infra_ctx: &InfrastructureContext,
    installer: &dyn Installer,
    change: &Change,
    logger: &InfraLoggerImpl,
) -> Result<(), Box<EngineError>> {
    let target = mk_install_target(infra_ctx);
    installer.uninstall(&target).map_err(|e| {
        Box::new(EngineError::new_cluster_update_error(
            logger.details().clone(),
            change.field.clone(),
            e,
        ))
    })
}

/// Installs or uninstalls one component so the cluster matches the desired
/// descriptor.
fn toggle_component(
    infra_ctx: &InfrastructureContext,
    desired: &ClusterDescriptor,
    change: &Change,
    logger: &InfraLoggerImpl,
    kind: ComponentKind,
    wanted: bool,
) -> Result<(), Box<EngineError>> {
    if wanted {
        return install_component(infra_ctx, desired, change, logger, kind);
    }

    // The catalog only yields installers for descriptors wanting them; to
    // uninstall, resolve the installer against the current descriptor.
    uninstall_component(infra_ctx, infra_ctx.descriptor(), change, logger, kind)
}

fn install_component(
    infra_ctx: &InfrastructureContext,
    descriptor: &ClusterDescriptor,
    change: &Change,
    logger: &InfraLoggerImpl,
    kind: ComponentKind,
) -> Result<(), Box<EngineError>> {
    match infrastructure_installer(infra_ctx, descriptor, kind) {
        Some(installer) => run_install(infra_ctx, installer.as_ref(), change, logger),
        // The catalog knows better (e.g. metrics-server on K3s is native).
        None => Ok(()),
    }
}

fn uninstall_component(
    infra_ctx: &InfrastructureContext,
    descriptor: &ClusterDescriptor,
    change: &Change,
    logger: &InfraLoggerImpl,
    kind: ComponentKind,
) -> Result<(), Box<EngineError>> {
    match infrastructure_installer(infra_ctx, descriptor, kind) {
        Some(installer) => run_uninstall(infra_ctx, installer.as_ref(), change, logger),
        None => Ok(()),
    }
}

/// Provisions newly declared mirrors, removes the ones no longer declared
/// unless another running cluster still uses them.
fn apply_mirror_changes(
    infra_ctx: &InfrastructureContext,
    desired: &ClusterDescriptor,
    change: &Change,
    logger: &InfraLoggerImpl,
) -> Result<(), Box<EngineError>> {
    let current = infra_ctx.descriptor();
    let deps = infra_ctx.dependencies();
    let network = current.cluster_network_name();

    for mirror in &desired.mirrors {
        if current.mirrors.iter().any(|m| m.host == mirror.host) {
            continue;
        }
        deps.registry_service
            .provision_mirror_registry(&current.name, mirror, Some(&network))
            .map_err(|e| {
                Box::new(EngineError::new_cluster_update_error(
                    logger.details().clone(),
                    change.field.clone(),
                    e.into(),
                ))
            })?;
    }

    for mirror in &current.mirrors {
        if desired.mirrors.iter().any(|m| m.host == mirror.host) {
            continue;
        }
        let name = RegistryInfo::mirror_registry_name(&current.name, &mirror.host);
        match deps.registry_service.is_in_use(&name, &current.name) {
            Ok(true) => {
                logger.warn(format!("registry `{name}` is in use by another running cluster, keeping it").into());
            }
            _ => {
                if let Err(e) = deps.registry_service.remove_registry(&name, false) {
                    logger.warn(format!("cannot remove registry `{name}`: {e}").into());
                }
            }
        }
    }

    Ok(())
}
