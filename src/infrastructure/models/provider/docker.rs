use crate::cmd::docker::{ContainerState, Docker};
use crate::infrastructure::models::provider::{
    InfrastructureProvider, Kind, NodeInfo, NodeRole, NodeState, ProviderError,
};
use crate::io_models::KsailIdentifier;
use std::sync::Arc;

/// Node-container labels each distribution stamps on its nodes.
pub const NODE_LABEL_KEYS: &[&str] = &["io.x-k8s.kind.cluster", "k3d.cluster", "talos.cluster.name"];

/// Docker-local provider: cluster nodes are containers on the host daemon.
pub struct DockerInfrastructureProvider {
    docker: Arc<Docker>,
}

impl DockerInfrastructureProvider {
    pub fn new(docker: Arc<Docker>) -> Self {
        DockerInfrastructureProvider { docker }
    }

    fn node_containers(&self, cluster: &KsailIdentifier) -> Result<Vec<String>, ProviderError> {
        let mut names = vec![];
        for label_key in NODE_LABEL_KEYS {
            let label = format!("{label_key}={cluster}");
            let mut found = self
                .docker
                .list_containers_with_label(&label)
                .map_err(|e| ProviderError::ProviderUnavailable { message: e.to_string() })?;
            names.append(&mut found);
        }

        names.sort_unstable();
        names.dedup();
        Ok(names)
    }
}

impl InfrastructureProvider for DockerInfrastructureProvider {
    fn kind(&self) -> Kind {
        Kind::Docker
    }

    fn list_nodes(&self, cluster: &KsailIdentifier) -> Result<Vec<NodeInfo>, ProviderError> {
        let mut nodes = vec![];
        for name in self.node_containers(cluster)? {
            let state = match self.docker.container_state(&name) {
                Ok(Some(ContainerState::Running)) => NodeState::Running,
                Ok(Some(ContainerState::Exited)) | Ok(Some(ContainerState::Created)) => NodeState::Stopped,
                _ => NodeState::Unknown,
            };
            nodes.push(NodeInfo {
                role: node_role_from_name(&name),
                name,
                state,
            });
        }

        Ok(nodes)
    }

    fn start_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        let nodes = self.list_nodes(cluster)?;
        if nodes.is_empty() {
            return Err(ProviderError::NoNodes {
                cluster: cluster.to_string(),
            });
        }
        if nodes.iter().all(|n| n.state == NodeState::Running) {
            return Err(ProviderError::SkipAction);
        }

        for node in nodes.iter().filter(|n| n.state != NodeState::Running) {
            self.docker
                .start_container(&node.name)
                .map_err(|e| ProviderError::Other { message: e.to_string() })?;
        }

        Ok(())
    }

    fn stop_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        let nodes = self.list_nodes(cluster)?;
        if nodes.is_empty() {
            return Err(ProviderError::NoNodes {
                cluster: cluster.to_string(),
            });
        }
        if nodes.iter().all(|n| n.state == NodeState::Stopped) {
            return Err(ProviderError::SkipAction);
        }

        for node in nodes.iter().filter(|n| n.state != NodeState::Stopped) {
            self.docker
                .stop_container(&node.name)
                .map_err(|e| ProviderError::Other { message: e.to_string() })?;
        }

        Ok(())
    }

    fn delete_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        let nodes = self.list_nodes(cluster)?;
        if nodes.is_empty() {
            return Err(ProviderError::SkipAction);
        }

        for node in nodes {
            self.docker
                .remove_container(&node.name, false)
                .map_err(|e| ProviderError::Other { message: e.to_string() })?;
        }

        Ok(())
    }
}

fn node_role_from_name(name: &str) -> NodeRole {
    if name.contains("control-plane") || name.contains("controlplane") || name.contains("server") {
        NodeRole::ControlPlane
    } else if name.contains("worker") || name.contains("agent") {
        NodeRole::Worker
    } else {
        NodeRole::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_role_from_name() {
        // setup:
        struct TestCase {
            name: &'static str,
            expected: NodeRole,
        }

        let test_cases = vec![
            TestCase {
                name: "demo-control-plane",
                expected: NodeRole::ControlPlane,
            },
            TestCase {
                name: "k3d-demo-server-0",
                expected: NodeRole::ControlPlane,
            },
            TestCase {
                name: "k3d-demo-agent-1",
                expected: NodeRole::Worker,
            },
            TestCase {
                name: "demo-worker2",
                expected: NodeRole::Worker,
            },
            TestCase {
                name: "something-else",
                expected: NodeRole::Unknown,
            },
        ];

        for tc in test_cases {
            // execute & verify:
            assert_eq!(tc.expected, node_role_from_name(tc.name), "{}", tc.name);
        }
    }
}
