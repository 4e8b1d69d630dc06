mod helpers;

use helpers::{descriptor_from_yaml, kind_counts, rig_for};
use ksail_engine::events::{EngineEventKind, EventMessageVerbosity};
use ksail_engine::infrastructure::action::{ClusterOrchestrator, LifecycleAction};

const CLUSTER_WITH_REGISTRIES: &str = r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: Vanilla
  cluster:
    localRegistry:
      type: localDocker
    mirrors:
      - host: docker.io
        upstream: https://registry-1.docker.io
"#;

#[test]
fn test_delete_after_create_leaves_nothing_behind() {
    // setup:
    let rig = rig_for(descriptor_from_yaml(CLUSTER_WITH_REGISTRIES));
    let orchestrator = ClusterOrchestrator::new();
    orchestrator.create_cluster(&rig.infra_ctx).unwrap();
    let _ = rig.bus.drain();

    // execute:
    let ret = orchestrator.delete_cluster(&rig.infra_ctx, false);

    // verify: cluster gone, both registries removed
    assert!(ret.is_ok(), "{ret:?}");
    assert!(!*rig.recorded.cluster_exists.lock().unwrap());
    let removed = rig.recorded.removed_registries.lock().unwrap().clone();
    assert!(removed.contains(&"demo-docker-io".to_string()));
    assert!(removed.contains(&"demo-local-registry".to_string()));
}

#[test]
fn test_delete_missing_cluster_is_best_effort() {
    // setup: never created
    let rig = rig_for(descriptor_from_yaml(CLUSTER_WITH_REGISTRIES));

    // execute:
    let ret = ClusterOrchestrator::new().delete_cluster(&rig.infra_ctx, false);

    // verify: absent cluster is skipped silently, the plan still succeeds
    assert!(ret.is_ok(), "{ret:?}");
}

#[test]
fn test_delete_keeps_registry_in_use_by_another_cluster() {
    // setup: the docker.io mirror is shared with a running cluster
    let rig = rig_for(descriptor_from_yaml(CLUSTER_WITH_REGISTRIES));
    let orchestrator = ClusterOrchestrator::new();
    orchestrator.create_cluster(&rig.infra_ctx).unwrap();
    let _ = rig.bus.drain();
    rig.recorded
        .registries_in_use
        .lock()
        .unwrap()
        .push("demo-docker-io".to_string());

    // execute:
    orchestrator.delete_cluster(&rig.infra_ctx, false).unwrap();

    // verify: shared mirror kept with a warning, local registry still removed
    let removed = rig.recorded.removed_registries.lock().unwrap().clone();
    assert!(!removed.contains(&"demo-docker-io".to_string()));
    assert!(removed.contains(&"demo-local-registry".to_string()));

    let events = rig.bus.drain();
    let warned = events.iter().any(|e| {
        e.kind() == EngineEventKind::Warning
            && e.message(EventMessageVerbosity::SafeOnly).contains("in use by another running cluster")
    });
    assert!(warned, "expected a warning about the in-use registry");
}

#[test]
fn test_delete_emits_balanced_stage_events() {
    // setup:
    let rig = rig_for(descriptor_from_yaml(CLUSTER_WITH_REGISTRIES));
    let orchestrator = ClusterOrchestrator::new();
    orchestrator.create_cluster(&rig.infra_ctx).unwrap();
    let _ = rig.bus.drain();

    // execute:
    orchestrator.delete_cluster(&rig.infra_ctx, false).unwrap();

    // verify:
    let counts = kind_counts(&rig.bus);
    assert_eq!(counts.get("StageStart"), counts.get("StageEnd"));
}
