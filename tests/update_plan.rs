mod helpers;

use helpers::{descriptor_from_yaml, rig_for};
use ksail_engine::errors::Tag;
use ksail_engine::infrastructure::action::{ClusterOrchestrator, LifecycleAction};
use ksail_engine::io_models::cluster::{CertManagerOption, CniOption};
use ksail_engine::io_models::update::UpdateOptions;

const K3S_TWO_WORKERS: &str = r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: K3s
  cluster:
    controlPlanes: 1
    workers: 2
"#;

#[test]
fn test_update_with_identical_descriptor_is_a_noop() {
    // setup:
    let rig = rig_for(descriptor_from_yaml(K3S_TWO_WORKERS));
    let desired = rig.infra_ctx.descriptor().clone();

    // execute:
    let result = ClusterOrchestrator::new()
        .update_cluster(&rig.infra_ctx, &desired, UpdateOptions::default())
        .unwrap();

    // verify:
    assert!(result.is_noop());
    assert!(result.applied_changes.is_empty());
    assert!(result.failed_changes.is_empty());
    assert!(rig.recorded.provisioner_updates.lock().unwrap().is_empty());
}

#[test]
fn test_update_dry_run_classifies_without_side_effects() {
    // setup: workers 2 -> 4 plus a recreate-category change
    let rig = rig_for(descriptor_from_yaml(K3S_TWO_WORKERS));
    let mut desired = rig.infra_ctx.descriptor().clone();
    desired.workers = 4;
    desired.cni = CniOption::Cilium;

    // execute:
    let result = ClusterOrchestrator::new()
        .update_cluster(
            &rig.infra_ctx,
            &desired,
            UpdateOptions {
                dry_run: true,
                force: false,
            },
        )
        .unwrap();

    // verify: classified but nothing applied, no collaborator touched
    assert_eq!(1, result.in_place_changes.len());
    assert_eq!(1, result.recreate_required.len());
    assert!(result.applied_changes.is_empty());
    assert!(rig.recorded.provisioner_updates.lock().unwrap().is_empty());
    assert!(rig.recorded.installed.lock().unwrap().is_empty());
}

#[test]
fn test_update_scales_k3d_agents_in_place() {
    // setup: workers 2 -> 4 on K3s
    let rig = rig_for(descriptor_from_yaml(K3S_TWO_WORKERS));
    let mut desired = rig.infra_ctx.descriptor().clone();
    desired.workers = 4;

    // execute:
    let result = ClusterOrchestrator::new()
        .update_cluster(&rig.infra_ctx, &desired, UpdateOptions::default())
        .unwrap();

    // verify:
    assert_eq!(1, result.applied_changes.len());
    let change = &result.applied_changes[0];
    assert_eq!("k3d.agents", change.field);
    assert_eq!("2", change.old_value);
    assert_eq!("4", change.new_value);
    assert!(result.failed_changes.is_empty());

    let updates = rig.recorded.provisioner_updates.lock().unwrap();
    assert_eq!(1, updates.len());
    assert_eq!(4, *rig.recorded.workers.lock().unwrap());
}

#[test]
fn test_update_refuses_recreate_changes_without_force() {
    // setup:
    let rig = rig_for(descriptor_from_yaml(K3S_TWO_WORKERS));
    let mut desired = rig.infra_ctx.descriptor().clone();
    desired.control_planes = 3;

    // execute:
    let err = ClusterOrchestrator::new()
        .update_cluster(&rig.infra_ctx, &desired, UpdateOptions::default())
        .unwrap_err();

    // verify: RecreationRequired maps to exit code 2
    assert_eq!(&Tag::RecreationRequired, err.tag());
    assert_eq!(2, err.exit_code());
    assert!(rig.recorded.provisioner_updates.lock().unwrap().is_empty());
}

#[test]
fn test_update_installs_newly_enabled_component() {
    // setup: cert-manager toggled on
    let rig = rig_for(descriptor_from_yaml(K3S_TWO_WORKERS));
    let mut desired = rig.infra_ctx.descriptor().clone();
    desired.cert_manager = CertManagerOption::Enabled;

    // execute:
    let result = ClusterOrchestrator::new()
        .update_cluster(&rig.infra_ctx, &desired, UpdateOptions::default())
        .unwrap();

    // verify:
    assert_eq!(1, result.applied_changes.len());
    assert_eq!(
        vec!["cert-manager".to_string()],
        rig.recorded.installed.lock().unwrap().clone()
    );
}

#[test]
fn test_update_uninstalls_disabled_component() {
    // setup: current has cert-manager, desired drops it
    let mut current = descriptor_from_yaml(K3S_TWO_WORKERS);
    current.cert_manager = CertManagerOption::Enabled;
    let rig = rig_for(current);
    let mut desired = rig.infra_ctx.descriptor().clone();
    desired.cert_manager = CertManagerOption::Disabled;

    // execute:
    let result = ClusterOrchestrator::new()
        .update_cluster(&rig.infra_ctx, &desired, UpdateOptions::default())
        .unwrap();

    // verify:
    assert_eq!(1, result.applied_changes.len());
    assert_eq!(
        vec!["cert-manager".to_string()],
        rig.recorded.uninstalled.lock().unwrap().clone()
    );
    assert!(rig.recorded.installed.lock().unwrap().is_empty());
}
