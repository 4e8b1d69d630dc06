mod helpers;

use helpers::{descriptor_from_yaml, kind_counts, rig_for, sorted};
use ksail_engine::errors::Tag;
use ksail_engine::events::EngineEventKind;
use ksail_engine::events::EventMessageVerbosity;
use ksail_engine::infrastructure::action::{ClusterOrchestrator, LifecycleAction};
use ksail_engine::infrastructure::models::provider::Kind as ProviderKind;
use ksail_engine::io_models::cluster::LocalRegistryOption;

const VANILLA_METRICS_ENABLED: &str = r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: Vanilla
  cluster:
    controlPlanes: 1
    workers: 1
    metricsServer: Enabled
"#;

const FLUX_WITH_LOCAL_REGISTRY: &str = r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: Vanilla
  cluster:
    gitOpsEngine: Flux
    localRegistry:
      type: localDocker
  workload:
    sourceDirectory: ./does-not-exist/k8s
"#;

const TALOS_CILIUM_METRICS: &str = r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: Talos
  cluster:
    cni: Cilium
    metricsServer: Enabled
    mirrors:
      - host: docker.io
        upstream: https://registry-1.docker.io
"#;

#[test]
fn test_create_vanilla_with_metrics_server_installs_phase_one_only() {
    // setup: distribution=Vanilla, cni=Default, metricsServer=Enabled
    let rig = rig_for(descriptor_from_yaml(VANILLA_METRICS_ENABLED));

    // execute:
    let ret = ClusterOrchestrator::new().create_cluster(&rig.infra_ctx);

    // verify: phase-1 installs exactly {metrics-server, kubelet-csr-approver},
    // no CNI gate ran, no phase-2
    assert!(ret.is_ok(), "{ret:?}");
    assert_eq!(
        vec!["kubelet-csr-approver".to_string(), "metrics-server".to_string()],
        sorted(rig.recorded.installed.lock().unwrap().clone())
    );
    assert!(rig.recorded.gitops_calls.lock().unwrap().is_empty());
    assert!(*rig.recorded.cluster_exists.lock().unwrap());

    let events = rig.bus.drain();
    let cni_stage_started = events.iter().any(|e| {
        e.kind() == EngineEventKind::StageStart && e.message(EventMessageVerbosity::SafeOnly).contains("Install CNI")
    });
    assert!(!cni_stage_started, "no CNI stage may run with the default CNI");
}

#[test]
fn test_create_emits_balanced_stage_and_task_events() {
    // setup:
    let rig = rig_for(descriptor_from_yaml(VANILLA_METRICS_ENABLED));

    // execute:
    ClusterOrchestrator::new().create_cluster(&rig.infra_ctx).unwrap();

    // verify: every StageStart has exactly one StageEnd, every TaskStart one TaskEnd
    let counts = kind_counts(&rig.bus);
    assert_eq!(counts.get("StageStart"), counts.get("StageEnd"));
    assert_eq!(counts.get("TaskStart"), counts.get("TaskEnd"));
    assert!(counts.get("StageStart").copied().unwrap_or(0) >= 3);
}

#[test]
fn test_create_on_cloud_with_local_registry_is_a_precondition_failure() {
    // setup: provider=Hetzner, localRegistry=LocalDocker
    let mut descriptor = descriptor_from_yaml(FLUX_WITH_LOCAL_REGISTRY);
    descriptor.provider = ProviderKind::Hetzner;
    let rig = rig_for(descriptor);

    // execute:
    let ret = ClusterOrchestrator::new().create_cluster(&rig.infra_ctx);

    // verify: fails fast, nothing provisioned
    let err = ret.unwrap_err();
    assert_eq!(&Tag::CloudProviderRequiresExternalRegistry, err.tag());
    assert!(err.message(ksail_engine::errors::ErrorMessageVerbosity::SafeOnly)
        .contains("cloud provider requires external registry"));
    assert!(rig.recorded.provisioned_registries.lock().unwrap().is_empty());
    assert!(!*rig.recorded.cluster_exists.lock().unwrap());
}

#[test]
fn test_create_with_flux_configures_gitops_and_seeds_empty_artifact() {
    // setup: gitOpsEngine=Flux, localRegistry=LocalDocker, missing source dir
    let rig = rig_for(descriptor_from_yaml(FLUX_WITH_LOCAL_REGISTRY));

    // execute:
    let ret = ClusterOrchestrator::new().create_cluster(&rig.infra_ctx);

    // verify: flux installed, configured against the local registry container,
    // and the empty-kustomization info event was published
    assert!(ret.is_ok(), "{ret:?}");
    assert_eq!(
        vec!["flux".to_string()],
        rig.recorded.installed.lock().unwrap().clone()
    );
    assert_eq!(
        vec!["flux@demo-local-registry".to_string()],
        rig.recorded.gitops_calls.lock().unwrap().clone()
    );

    let events = rig.bus.drain();
    let pushed_info = events.iter().any(|e| {
        e.kind() == EngineEventKind::Info
            && e.message(EventMessageVerbosity::SafeOnly).contains("pushed empty kustomization")
    });
    assert!(pushed_info, "expected the empty-kustomization info event");
}

#[test]
fn test_create_talos_with_cilium_gates_cni_before_components() {
    // setup: distribution=Talos, cni=Cilium, metricsServer=Enabled
    let rig = rig_for(descriptor_from_yaml(TALOS_CILIUM_METRICS));

    // execute:
    let ret = ClusterOrchestrator::new().create_cluster(&rig.infra_ctx);

    // verify:
    assert!(ret.is_ok(), "{ret:?}");
    let installed = rig.recorded.installed.lock().unwrap().clone();
    // cilium first (gate), then phase 1; kubelet-csr-approver absent (Talos
    // approves during bootstrap)
    assert_eq!(vec!["cilium".to_string(), "metrics-server".to_string()], installed);
    assert!(rig.recorded.readiness_waited.lock().unwrap().contains(&"cilium".to_string()));

    // the mirror registry was pre-staged on the talos network
    assert!(
        rig.recorded
            .provisioned_registries
            .lock()
            .unwrap()
            .contains(&"demo-docker-io".to_string())
    );
    assert!(rig.recorded.ensured_networks.lock().unwrap().contains(&"demo".to_string()));
}

#[test]
fn test_create_twice_is_semantically_idempotent() {
    // setup:
    let rig = rig_for(descriptor_from_yaml(VANILLA_METRICS_ENABLED));
    let orchestrator = ClusterOrchestrator::new();

    // execute: two consecutive invocations of the same descriptor
    orchestrator.create_cluster(&rig.infra_ctx).unwrap();
    let installs_after_first = rig.recorded.installed.lock().unwrap().len();
    orchestrator.create_cluster(&rig.infra_ctx).unwrap();

    // verify: the cluster still exists and the second run re-converged the
    // same component set instead of growing it
    assert!(*rig.recorded.cluster_exists.lock().unwrap());
    assert_eq!(installs_after_first * 2, rig.recorded.installed.lock().unwrap().len());
}

#[test]
fn test_create_skips_registry_stage_when_disabled() {
    // setup:
    let mut descriptor = descriptor_from_yaml(VANILLA_METRICS_ENABLED);
    descriptor.local_registry = LocalRegistryOption::Disabled;
    let rig = rig_for(descriptor);

    // execute:
    ClusterOrchestrator::new().create_cluster(&rig.infra_ctx).unwrap();

    // verify:
    assert!(rig.recorded.provisioned_registries.lock().unwrap().is_empty());
}
