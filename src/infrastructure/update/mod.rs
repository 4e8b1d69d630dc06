use crate::infrastructure::models::distribution::k3s::K3D_AGENTS_FIELD;
use crate::io_models::cluster::{ClusterDescriptor, Distribution, MetricsServerOption};
use crate::io_models::update::{Change, ChangeCategory, UpdateResult};

/// Classifies the differences between the current and the desired descriptor
/// by walking a fixed field table. Pure, no side effects; the update plan
/// applies the in-place subset afterwards.
pub fn classify_changes(current: &ClusterDescriptor, desired: &ClusterDescriptor) -> UpdateResult {
    let mut result = UpdateResult::default();

    let mut push = |change: Change| match change.category {
        ChangeCategory::InPlace => result.in_place_changes.push(change),
        ChangeCategory::Reboot => result.reboot_required.push(change),
        ChangeCategory::Recreate => result.recreate_required.push(change),
    };

    if current.distribution != desired.distribution {
        push(Change {
            field: "cluster.distribution".to_string(),
            old_value: current.distribution.to_string(),
            new_value: desired.distribution.to_string(),
            category: ChangeCategory::Recreate,
            reason: "a cluster cannot change its distribution in place".to_string(),
        });
    }

    if current.provider != desired.provider {
        push(Change {
            field: "cluster.provider".to_string(),
            old_value: current.provider.to_string(),
            new_value: desired.provider.to_string(),
            category: ChangeCategory::Recreate,
            reason: "a cluster cannot move between providers in place".to_string(),
        });
    }

    if current.control_planes != desired.control_planes {
        push(Change {
            field: "cluster.controlPlanes".to_string(),
            old_value: current.control_planes.to_string(),
            new_value: desired.control_planes.to_string(),
            category: ChangeCategory::Recreate,
            reason: "control-plane count changes require recreation".to_string(),
        });
    }

    if current.workers != desired.workers {
        if desired.distribution == Distribution::K3s {
            push(Change {
                field: K3D_AGENTS_FIELD.to_string(),
                old_value: current.workers.to_string(),
                new_value: desired.workers.to_string(),
                category: ChangeCategory::InPlace,
                reason: "k3d scales agent nodes through native node create/delete".to_string(),
            });
        } else {
            push(Change {
                field: "cluster.workers".to_string(),
                old_value: current.workers.to_string(),
                new_value: desired.workers.to_string(),
                category: ChangeCategory::Recreate,
                reason: format!("{} has no in-place node scaling", desired.distribution),
            });
        }
    }

    if current.cni != desired.cni {
        push(Change {
            field: "cluster.cni".to_string(),
            old_value: current.cni.to_string(),
            new_value: desired.cni.to_string(),
            category: ChangeCategory::Recreate,
            reason: "swapping the CNI of a running cluster is not supported".to_string(),
        });
    }

    if current.metrics_server != desired.metrics_server {
        push(Change {
            field: "cluster.metricsServer".to_string(),
            old_value: current.metrics_server.to_string(),
            new_value: desired.metrics_server.to_string(),
            category: ChangeCategory::InPlace,
            reason: "metrics-server installs and uninstalls in place".to_string(),
        });

        // On Talos the kubelet cert-rotation flag follows metrics-server and
        // only takes effect after a node restart.
        let rotation_toggled = (current.metrics_server == MetricsServerOption::Enabled)
            != (desired.metrics_server == MetricsServerOption::Enabled);
        if desired.distribution == Distribution::Talos && rotation_toggled {
            push(Change {
                field: "talos.kubeletCertRotation".to_string(),
                old_value: (current.metrics_server == MetricsServerOption::Enabled).to_string(),
                new_value: (desired.metrics_server == MetricsServerOption::Enabled).to_string(),
                category: ChangeCategory::Reboot,
                reason: "kubelet serving-cert rotation applies on node restart".to_string(),
            });
        }
    }

    if current.csi != desired.csi {
        push(Change {
            field: "cluster.csi".to_string(),
            old_value: current.csi.to_string(),
            new_value: desired.csi.to_string(),
            category: ChangeCategory::InPlace,
            reason: "storage provisioners install and uninstall in place".to_string(),
        });
    }

    if current.cert_manager != desired.cert_manager {
        push(Change {
            field: "cluster.certManager".to_string(),
            old_value: current.cert_manager.to_string(),
            new_value: desired.cert_manager.to_string(),
            category: ChangeCategory::InPlace,
            reason: "cert-manager installs and uninstalls in place".to_string(),
        });
    }

    if current.policy_engine != desired.policy_engine {
        push(Change {
            field: "cluster.policyEngine".to_string(),
            old_value: current.policy_engine.to_string(),
            new_value: desired.policy_engine.to_string(),
            category: ChangeCategory::InPlace,
            reason: "policy engines install and uninstall in place".to_string(),
        });
    }

    if current.gitops_engine != desired.gitops_engine {
        push(Change {
            field: "cluster.gitOpsEngine".to_string(),
            old_value: current.gitops_engine.to_string(),
            new_value: desired.gitops_engine.to_string(),
            category: ChangeCategory::InPlace,
            reason: "GitOps engines install and uninstall in place".to_string(),
        });
    }

    if current.mirrors != desired.mirrors {
        push(Change {
            field: "cluster.mirrors".to_string(),
            old_value: mirror_set(current),
            new_value: mirror_set(desired),
            category: ChangeCategory::InPlace,
            reason: "mirror registries are provisioned and removed in place".to_string(),
        });
    }

    if current.load_balancer != desired.load_balancer {
        // On Talos over Hetzner load balancing belongs to the cloud
        // controller manager, the toggle is a no-op.
        let ccm_owns_load_balancer =
            desired.distribution == Distribution::Talos && desired.provider.is_cloud();
        if !ccm_owns_load_balancer {
            push(Change {
                field: "cluster.loadBalancer".to_string(),
                old_value: current.load_balancer.to_string(),
                new_value: desired.load_balancer.to_string(),
                category: ChangeCategory::Reboot,
                reason: "load-balancer address pools rebind on node restart".to_string(),
            });
        }
    }

    result
}

fn mirror_set(descriptor: &ClusterDescriptor) -> String {
    let mut hosts: Vec<&str> = descriptor.mirrors.iter().map(|m| m.host.as_str()).collect();
    hosts.sort_unstable();
    format!("[{}]", hosts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::models::provider::Kind as ProviderKind;
    use crate::io_models::cluster::{CniOption, MirrorSpec};

    fn k3s_descriptor() -> ClusterDescriptor {
        ClusterDescriptor::from_yaml(
            r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: K3s
  connection:
    kubeconfig: /tmp/kubeconfig
  cluster:
    controlPlanes: 1
    workers: 2
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_identical_descriptors_yield_no_changes() {
        // setup:
        let descriptor = k3s_descriptor();

        // execute:
        let result = classify_changes(&descriptor, &descriptor);

        // verify:
        assert!(result.is_noop());
        assert!(result.applied_changes.is_empty());
        assert!(result.failed_changes.is_empty());
    }

    #[test]
    fn test_k3s_worker_scaling_is_in_place() {
        // setup: workers 2 -> 4
        let current = k3s_descriptor();
        let mut desired = current.clone();
        desired.workers = 4;

        // execute:
        let result = classify_changes(&current, &desired);

        // verify:
        assert_eq!(1, result.in_place_changes.len());
        let change = &result.in_place_changes[0];
        assert_eq!("k3d.agents", change.field);
        assert_eq!("2", change.old_value);
        assert_eq!("4", change.new_value);
        assert!(result.recreate_required.is_empty());
    }

    #[test]
    fn test_worker_scaling_elsewhere_requires_recreation() {
        let mut current = k3s_descriptor();
        current.distribution = Distribution::Vanilla;
        let mut desired = current.clone();
        desired.workers = 4;

        let result = classify_changes(&current, &desired);

        assert!(result.in_place_changes.is_empty());
        assert_eq!(1, result.recreate_required.len());
    }

    #[test]
    fn test_recreate_category_fields() {
        // setup:
        let current = k3s_descriptor();
        let mut desired = current.clone();
        desired.control_planes = 3;
        desired.cni = CniOption::Cilium;
        desired.provider = ProviderKind::Hetzner;

        // execute:
        let result = classify_changes(&current, &desired);

        // verify:
        let fields: Vec<&str> = result.recreate_required.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(
            vec!["cluster.provider", "cluster.controlPlanes", "cluster.cni"],
            fields
        );
    }

    #[test]
    fn test_load_balancer_toggle_is_reboot_except_talos_on_hetzner() {
        // setup:
        let mut current = k3s_descriptor();
        let mut desired = current.clone();
        desired.load_balancer = crate::io_models::cluster::LoadBalancerOption::Enabled;

        // execute & verify: plain case is a reboot
        let result = classify_changes(&current, &desired);
        assert_eq!(1, result.reboot_required.len());

        // talos on hetzner: handled by the CCM, no change at all
        current.distribution = Distribution::Talos;
        current.provider = ProviderKind::Hetzner;
        let mut desired = current.clone();
        desired.load_balancer = crate::io_models::cluster::LoadBalancerOption::Enabled;
        let result = classify_changes(&current, &desired);
        assert!(result.is_noop());
    }

    #[test]
    fn test_talos_metrics_toggle_adds_kubelet_cert_rotation_reboot() {
        // setup:
        let mut current = k3s_descriptor();
        current.distribution = Distribution::Talos;
        let mut desired = current.clone();
        desired.metrics_server = MetricsServerOption::Enabled;

        // execute:
        let result = classify_changes(&current, &desired);

        // verify: metrics-server itself stays in place, the rotation flag reboots
        assert_eq!(1, result.in_place_changes.len());
        assert_eq!(1, result.reboot_required.len());
        assert_eq!("talos.kubeletCertRotation", result.reboot_required[0].field);
    }

    #[test]
    fn test_mirror_membership_change_is_in_place() {
        // setup:
        let current = k3s_descriptor();
        let mut desired = current.clone();
        desired.mirrors.push(MirrorSpec {
            host: "docker.io".to_string(),
            upstream: "https://registry-1.docker.io".to_string(),
        });

        // execute:
        let result = classify_changes(&current, &desired);

        // verify:
        assert_eq!(1, result.in_place_changes.len());
        assert_eq!("cluster.mirrors", result.in_place_changes[0].field);
        assert_eq!("[docker.io]", result.in_place_changes[0].new_value);
    }
}
