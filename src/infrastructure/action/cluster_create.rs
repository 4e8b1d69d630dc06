use crate::errors::{CommandError, EngineError};
use crate::events::InfrastructureStep;
use crate::infrastructure::action::gitops::GitOpsTarget;
use crate::infrastructure::action::progress::{ProgressGroup, ProgressTask, run_stage};
use crate::infrastructure::action::{InfraLogger, InfraLoggerImpl, mk_logger};
use crate::infrastructure::helm_charts::InstallTarget;
use crate::infrastructure::infrastructure_context::InfrastructureContext;
use crate::infrastructure::models::distribution::ProvisionTarget;
use crate::infrastructure::network::NetworkSpec;
use crate::infrastructure::registry::{RegistryError, RegistryInfo, RegistryStatus};
use crate::io_models::cluster::{Distribution, GitOpsEngineOption, LocalRegistryOption};
use crate::io_models::distribution_config::DistributionConfig;
use crate::services::kube_client::{KubeClient, kubeconfig_current_context};
use std::sync::Arc;

/// CreatePlan: the ordered stages turning a descriptor into a converged
/// cluster. Any stage failure aborts the plan; no rollback is attempted.
pub fn create_cluster_plan(infra_ctx: &InfrastructureContext) -> Result<(), Box<EngineError>> {
    let descriptor = infra_ctx.descriptor();
    let abort = infra_ctx.context().abort_handle();
    let logger = mk_logger(infra_ctx, InfrastructureStep::Create);
    let provisioner = infra_ctx.provisioner();
    let deps = infra_ctx.dependencies();

    // 1. Load descriptor and distribution config. The config is owned by
    // this plan for its whole lifetime.
    let mut loaded_config: Option<DistributionConfig> = None;
    run_stage(
        &logger,
        InfrastructureStep::LoadConfiguration,
        "Load configuration",
        &abort,
        |stage_logger| {
            if let Err(reason) = descriptor.validate() {
                if reason.contains("cloud provider requires external registry") {
                    return Err(Box::new(EngineError::new_cloud_provider_requires_external_registry(
                        stage_logger.details().clone(),
                    )));
                }
                return Err(Box::new(EngineError::new_invalid_cluster_descriptor(
                    stage_logger.details().clone(),
                    reason,
                )));
            }

            let config = DistributionConfig::load(descriptor).map_err(|e| {
                Box::new(EngineError::new_distribution_config_parse_error(
                    stage_logger.details().clone(),
                    descriptor.distribution_config_ref.clone().unwrap_or_default(),
                    CommandError::new_from_safe_message(e),
                ))
            })?;
            loaded_config = Some(config);
            Ok(())
        },
    )?;
    let mut distribution_config = loaded_config.expect("distribution config is loaded by the first stage");

    // 2. Pre-stage the local registry. Skipped when the descriptor opts into
    // an external registry; cloud providers without one were rejected above.
    let mut local_registry: Option<RegistryInfo> = None;
    if descriptor.local_registry == LocalRegistryOption::LocalDocker {
        run_stage(
            &logger,
            InfrastructureStep::ProvisionLocalRegistry,
            "Pre-stage local registry",
            &abort,
            |stage_logger| {
                let network = ensure_pre_created_network(infra_ctx, stage_logger)?;
                let info = deps
                    .registry_service
                    .provision_local_registry(&descriptor.name, network.as_deref())
                    .map_err(|e| {
                        Box::new(EngineError::new_registry_provision_error(
                            stage_logger.details().clone(),
                            RegistryInfo::local_registry_name(&descriptor.name),
                            e.into(),
                        ))
                    })?;
                stage_logger.info(format!("local registry ready on {}", info.host_endpoint()).into());
                local_registry = Some(info);
                Ok(())
            },
        )?;
    }

    // 3. Pre-stage mirror registries. VCluster cannot reach them, K3d wires
    // mirrors natively, and cloud nodes cannot reach local containers.
    let mut mirror_registries: Vec<RegistryInfo> = vec![];
    let mirrors_are_prestaged = !descriptor.mirrors.is_empty()
        && !matches!(descriptor.distribution, Distribution::VCluster | Distribution::K3s)
        && !descriptor.provider.is_cloud();
    if mirrors_are_prestaged {
        run_stage(
            &logger,
            InfrastructureStep::ProvisionMirrorRegistries,
            "Pre-stage mirror registries",
            &abort,
            |stage_logger| {
                let network = ensure_pre_created_network(infra_ctx, stage_logger)?;
                for mirror in &descriptor.mirrors {
                    match deps
                        .registry_service
                        .provision_mirror_registry(&descriptor.name, mirror, network.as_deref())
                    {
                        Ok(info) => {
                            stage_logger
                                .info(format!("mirror registry for {} ready on {}", mirror.host, info.host_endpoint()).into());
                            mirror_registries.push(info);
                        }
                        // Reject-and-warn: a shared container with another
                        // upstream is left alone, nothing is provisioned.
                        Err(RegistryError::UpstreamMismatch {
                            name,
                            existing,
                            requested,
                        }) => {
                            stage_logger.warn(
                                format!(
                                    "registry `{name}` already mirrors `{existing}`, not `{requested}`; skipping this mirror"
                                )
                                .into(),
                            );
                        }
                        Err(e) => {
                            return Err(Box::new(EngineError::new_registry_provision_error(
                                stage_logger.details().clone(),
                                RegistryInfo::mirror_registry_name(&descriptor.name, &mirror.host),
                                e.into(),
                            )));
                        }
                    }
                }
                Ok(())
            },
        )?;
    }

    let provision_target = ProvisionTarget {
        descriptor,
        local_registry: local_registry.as_ref(),
        mirror_registries: &mirror_registries,
        abort: abort.clone(),
    };

    // 4. Distribution-specific pre-create tweaks on the owned config.
    run_stage(
        &logger,
        InfrastructureStep::PrepareDistributionConfig,
        "Prepare distribution config",
        &abort,
        |stage_logger| {
            provisioner
                .prepare_config(&provision_target, &mut distribution_config)
                .map_err(|e| {
                    Box::new(EngineError::new_invalid_cluster_descriptor(
                        stage_logger.details().clone(),
                        e.to_string(),
                    ))
                })
        },
    )?;

    // 5. Create the cluster nodes.
    run_stage(
        &logger,
        InfrastructureStep::CreateCluster,
        "Create cluster",
        &abort,
        |stage_logger| {
            provisioner
                .create(&provision_target, &distribution_config)
                .map_err(|e| Box::new(EngineError::new_cluster_create_error(stage_logger.details().clone(), e.into())))
        },
    )?;

    // 6. Connect registries to the cluster network. K3d and Talos already
    // connected them during create.
    let attach_needed = matches!(descriptor.distribution, Distribution::Vanilla | Distribution::VCluster)
        && (local_registry.is_some() || !mirror_registries.is_empty());
    if attach_needed {
        run_stage(
            &logger,
            InfrastructureStep::AttachRegistries,
            "Attach registries to cluster network",
            &abort,
            |stage_logger| {
                let network = descriptor.cluster_network_name();
                for registry in local_registry.iter().chain(mirror_registries.iter()) {
                    deps.network_broker.attach(&registry.name, &network, None).map_err(|e| {
                        Box::new(EngineError::new_network_attach_error(
                            stage_logger.details().clone(),
                            registry.name.clone(),
                            network.clone(),
                            e.into(),
                        ))
                    })?;
                }
                Ok(())
            },
        )?;
    }

    let kube = infra_ctx.mk_kube_client().ok();

    // 7. CNI install and readiness gate, only when a custom CNI is selected.
    if let Some(cni) = deps.installer_catalog.cni_installer(descriptor) {
        run_stage(
            &logger,
            InfrastructureStep::InstallCni,
            &format!("Install CNI {}", cni.name()),
            &abort,
            |stage_logger| {
                let target = mk_install_target(descriptor, kube.clone(), &abort);
                cni.install(&target).map_err(|e| {
                    Box::new(EngineError::new_helm_chart_error(stage_logger.details().clone(), e))
                })?;
                cni.wait_for_readiness(&target).map_err(|e| {
                    Box::new(EngineError::new_component_readiness_error(
                        stage_logger.details().clone(),
                        cni.name(),
                        e,
                    ))
                })
            },
        )?;
    }

    // 8. Infrastructure phase: required components in a parallel group.
    let infrastructure_installers = deps.installer_catalog.infrastructure_installers(descriptor);
    if !infrastructure_installers.is_empty() {
        run_stage(
            &logger,
            InfrastructureStep::InstallInfrastructureComponents,
            "Install infrastructure components",
            &abort,
            |stage_logger| {
                let tasks: Vec<ProgressTask> = infrastructure_installers
                    .iter()
                    .map(|installer| {
                        let name = installer.name();
                        let kube = kube.clone();
                        let details = stage_logger.details().clone();
                        ProgressTask::new(name.clone(), move |group_abort| {
                            let target = mk_install_target(descriptor, kube, group_abort);
                            installer
                                .install(&target)
                                .map_err(|e| Box::new(EngineError::new_helm_chart_error(details.clone(), e)))?;
                            installer.wait_for_readiness(&target).map_err(|e| {
                                Box::new(EngineError::new_component_readiness_error(details.clone(), name.clone(), e))
                            })
                        })
                    })
                    .collect();

                ProgressGroup::new().run(stage_logger, &abort, tasks)
            },
        )?;
    }

    // 9. GitOps phase.
    let gitops_installers = deps.installer_catalog.gitops_installers(descriptor);
    if !gitops_installers.is_empty() {
        run_stage(
            &logger,
            InfrastructureStep::InstallGitOpsEngines,
            "Install GitOps engines",
            &abort,
            |stage_logger| {
                let tasks: Vec<ProgressTask> = gitops_installers
                    .iter()
                    .map(|installer| {
                        let name = installer.name();
                        let kube = kube.clone();
                        let details = stage_logger.details().clone();
                        ProgressTask::new(name.clone(), move |group_abort| {
                            let target = mk_install_target(descriptor, kube, group_abort);
                            installer
                                .install(&target)
                                .map_err(|e| Box::new(EngineError::new_helm_chart_error(details.clone(), e)))?;
                            installer.wait_for_readiness(&target).map_err(|e| {
                                Box::new(EngineError::new_component_readiness_error(details.clone(), name.clone(), e))
                            })
                        })
                    })
                    .collect();

                ProgressGroup::new().run(stage_logger, &abort, tasks)
            },
        )?;
    }

    // 10. Configure GitOps resources.
    if descriptor.gitops_engine != GitOpsEngineOption::None {
        run_stage(
            &logger,
            InfrastructureStep::ConfigureGitOps,
            "Configure GitOps resources",
            &abort,
            |stage_logger| {
                let cluster_registry_host =
                    cluster_registry_host(infra_ctx, stage_logger, local_registry.as_ref())?;
                if cluster_registry_host.is_none() {
                    stage_logger.info("no registry configured, skipping GitOps resource configuration".into());
                    return Ok(());
                }

                let target = GitOpsTarget {
                    descriptor,
                    local_registry: local_registry.as_ref(),
                    cluster_registry_host,
                    kube: kube.clone(),
                    abort: abort.clone(),
                    timeout_override: descriptor.timeout_override,
                };

                let (engine, ret) = match descriptor.gitops_engine {
                    GitOpsEngineOption::Flux => {
                        ("flux", deps.gitops_configurator.configure_flux(&target, stage_logger))
                    }
                    GitOpsEngineOption::ArgoCD => {
                        ("argocd", deps.gitops_configurator.configure_argocd(&target, stage_logger))
                    }
                    GitOpsEngineOption::None => unreachable!("guarded by the enclosing if"),
                };

                ret.map_err(|e| {
                    Box::new(EngineError::new_gitops_configuration_error(
                        stage_logger.details().clone(),
                        engine.to_string(),
                        e,
                    ))
                })
            },
        )?;
    }

    // 11. Post-create verification: the plan only succeeds once the cluster
    // is observably usable.
    run_stage(
        &logger,
        InfrastructureStep::VerifyCluster,
        "Verify cluster",
        &abort,
        |stage_logger| {
            if !descriptor.kubeconfig_path.exists() {
                return Err(Box::new(EngineError::new_kubeconfig_missing(
                    stage_logger.details().clone(),
                    descriptor.kubeconfig_path.to_string_lossy().to_string(),
                )));
            }
            if let Err(e) = kubeconfig_current_context(&descriptor.kubeconfig_path) {
                return Err(Box::new(EngineError::new_kubeconfig_invalid(
                    stage_logger.details().clone(),
                    descriptor.kubeconfig_path.to_string_lossy().to_string(),
                    CommandError::new_from_safe_message(e),
                )));
            }

            for registry in &mirror_registries {
                let status = deps.registry_service.status(&registry.name).map_err(|e| {
                    Box::new(EngineError::new_registry_provision_error(
                        stage_logger.details().clone(),
                        registry.name.clone(),
                        e.into(),
                    ))
                })?;
                if status.status != RegistryStatus::Running {
                    return Err(Box::new(EngineError::new_registry_provision_error(
                        stage_logger.details().clone(),
                        registry.name.clone(),
                        CommandError::new_from_safe_message(format!(
                            "mirror registry is {} instead of running",
                            status.status
                        )),
                    )));
                }
            }

            if let Some(registry) = &local_registry {
                if !deps.registry_service.endpoint_reachable(registry) {
                    stage_logger.warn(
                        format!("local registry endpoint {} is not answering yet", registry.host_endpoint()).into(),
                    );
                }
            }

            stage_logger.success(format!("cluster {} is ready", descriptor.name).into());
            Ok(())
        },
    )
}

fn mk_install_target(
    descriptor: &crate::io_models::cluster::ClusterDescriptor,
    kube: Option<Arc<KubeClient>>,
    abort: &crate::io_models::context::AbortHandle,
) -> InstallTarget {
    InstallTarget {
        kubeconfig_path: descriptor.kubeconfig_path.clone(),
        kube,
        envs: vec![],
        abort: abort.clone(),
        timeout_override: descriptor.timeout_override,
    }
}

/// Pre-creates the cluster network for the distributions whose network the
/// broker owns; K3d creates its own at cluster create.
fn ensure_pre_created_network(
    infra_ctx: &InfrastructureContext,
    stage_logger: &InfraLoggerImpl,
) -> Result<Option<String>, Box<EngineError>> {
    let descriptor = infra_ctx.descriptor();
    if descriptor.distribution == Distribution::K3s {
        return Ok(None);
    }

    let spec = NetworkSpec::for_descriptor(descriptor).map_err(|e| {
        Box::new(EngineError::new_network_create_error(
            stage_logger.details().clone(),
            descriptor.cluster_network_name(),
            e.into(),
        ))
    })?;
    infra_ctx.dependencies().network_broker.ensure_network(&spec).map_err(|e| {
        Box::new(EngineError::new_network_create_error(
            stage_logger.details().clone(),
            spec.name.clone(),
            e.into(),
        ))
    })?;

    Ok(Some(spec.name))
}

/// Registry host as reachable from inside the cluster. VCluster CoreDNS
/// cannot resolve container names, the container IP is used instead.
fn cluster_registry_host(
    infra_ctx: &InfrastructureContext,
    stage_logger: &InfraLoggerImpl,
    local_registry: Option<&RegistryInfo>,
) -> Result<Option<String>, Box<EngineError>> {
    let descriptor = infra_ctx.descriptor();

    if let LocalRegistryOption::External { host, .. } = &descriptor.local_registry {
        return Ok(Some(host.clone()));
    }

    let registry = match local_registry {
        Some(registry) => registry,
        None => return Ok(None),
    };

    if descriptor.distribution == Distribution::VCluster {
        let network = descriptor.cluster_network_name();
        let ip = infra_ctx
            .dependencies()
            .network_broker
            .container_ip(&registry.name, &network)
            .map_err(|e| {
                Box::new(EngineError::new_network_attach_error(
                    stage_logger.details().clone(),
                    registry.name.clone(),
                    network.clone(),
                    e.into(),
                ))
            })?;
        return match ip {
            Some(ip) => Ok(Some(ip)),
            None => Err(Box::new(EngineError::new_network_attach_error(
                stage_logger.details().clone(),
                registry.name.clone(),
                network,
                CommandError::new_from_safe_message("registry has no IP on the cluster network".to_string()),
            ))),
        };
    }

    Ok(Some(registry.name.clone()))
}
