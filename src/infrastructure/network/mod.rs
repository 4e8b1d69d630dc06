use crate::cmd::docker::{Docker, DockerError};
use crate::constants::{KSAIL_CLUSTER_NAME_LABEL, KSAIL_OWNED_LABEL};
use crate::errors::CommandError;
use crate::io_models::cluster::{ClusterDescriptor, Distribution};
use ipnet::Ipv4Net;
use std::collections::BTreeMap;
use std::sync::Arc;

/// MTU required by the Talos network reflection; applied to every network we
/// create.
pub const NETWORK_MTU: &str = "1500";
/// CIDR Talos pins its cluster network to.
pub const TALOS_NETWORK_CIDR: &str = "10.5.0.0/24";

#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error("invalid network CIDR `{cidr}`: {message}")]
    InvalidCidr { cidr: String, message: String },
}

impl From<NetworkError> for CommandError {
    fn from(err: NetworkError) -> Self {
        CommandError::new("Network error".to_string(), Some(err.to_string()), None)
    }
}

/// What the broker must guarantee about one cluster network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub cidr: Option<Ipv4Net>,
}

impl NetworkSpec {
    /// Builds the network spec for a descriptor with distribution-appropriate
    /// labels and CIDR pinning.
    pub fn for_descriptor(descriptor: &ClusterDescriptor) -> Result<NetworkSpec, NetworkError> {
        let mut labels = BTreeMap::new();
        labels.insert(KSAIL_OWNED_LABEL.to_string(), "true".to_string());
        labels.insert(KSAIL_CLUSTER_NAME_LABEL.to_string(), descriptor.name.to_string());

        let mut cidr = None;
        if descriptor.distribution == Distribution::Talos {
            labels.insert("talos.owned".to_string(), "true".to_string());
            labels.insert("talos.cluster.name".to_string(), descriptor.name.to_string());
            cidr = Some(parse_cidr(TALOS_NETWORK_CIDR)?);
        }

        Ok(NetworkSpec {
            name: descriptor.cluster_network_name(),
            labels,
            cidr,
        })
    }
}

fn parse_cidr(cidr: &str) -> Result<Ipv4Net, NetworkError> {
    cidr.parse::<Ipv4Net>().map_err(|e| NetworkError::InvalidCidr {
        cidr: cidr.to_string(),
        message: e.to_string(),
    })
}

/// Pre-creates Docker networks and attaches containers to them.
pub trait NetworkBroker: Send + Sync {
    /// Idempotent: an exact-name match short-circuits creation.
    fn ensure_network(&self, spec: &NetworkSpec) -> Result<(), NetworkError>;

    fn attach(&self, container: &str, network: &str, static_ip: Option<&str>) -> Result<(), NetworkError>;

    fn network_exists(&self, name: &str) -> Result<bool, NetworkError>;

    /// IP of a container on a network, for distributions that cannot resolve
    /// container names (VCluster CoreDNS).
    fn container_ip(&self, container: &str, network: &str) -> Result<Option<String>, NetworkError>;
}

pub struct DockerNetworkBroker {
    docker: Arc<Docker>,
}

impl DockerNetworkBroker {
    pub fn new(docker: Arc<Docker>) -> Self {
        DockerNetworkBroker { docker }
    }
}

impl NetworkBroker for DockerNetworkBroker {
    fn ensure_network(&self, spec: &NetworkSpec) -> Result<(), NetworkError> {
        if self.docker.network_exists(&spec.name)? {
            return Ok(());
        }

        let subnet = spec.cidr.map(|c| c.to_string());
        self.docker
            .create_network(&spec.name, &spec.labels, NETWORK_MTU, subnet.as_deref())?;
        Ok(())
    }

    fn attach(&self, container: &str, network: &str, static_ip: Option<&str>) -> Result<(), NetworkError> {
        self.docker.connect_network(container, network, static_ip)?;
        Ok(())
    }

    fn network_exists(&self, name: &str) -> Result<bool, NetworkError> {
        Ok(self.docker.network_exists(name)?)
    }

    fn container_ip(&self, container: &str, network: &str) -> Result<Option<String>, NetworkError> {
        Ok(self.docker.container_ip(container, network)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_models::cluster::ClusterDescriptor;
    use maplit::btreemap;

    fn descriptor(distribution: &str) -> ClusterDescriptor {
        let raw = format!(
            r#"
apiVersion: ksail.dev/v1alpha1
kind: Cluster
metadata:
  name: demo
spec:
  distribution: {distribution}
  connection:
    kubeconfig: /tmp/kubeconfig
"#
        );
        ClusterDescriptor::from_yaml(&raw).unwrap()
    }

    #[test]
    fn test_talos_network_spec_pins_cidr_and_labels() {
        // execute:
        let spec = NetworkSpec::for_descriptor(&descriptor("Talos")).unwrap();

        // verify:
        assert_eq!("demo", spec.name);
        assert_eq!(Some("10.5.0.0/24".parse().unwrap()), spec.cidr);
        assert_eq!(
            btreemap! {
                "ksail.owned".to_string() => "true".to_string(),
                "ksail.cluster.name".to_string() => "demo".to_string(),
                "talos.owned".to_string() => "true".to_string(),
                "talos.cluster.name".to_string() => "demo".to_string(),
            },
            spec.labels
        );
    }

    #[test]
    fn test_vanilla_network_spec_has_no_cidr() {
        // execute:
        let spec = NetworkSpec::for_descriptor(&descriptor("Vanilla")).unwrap();

        // verify:
        assert_eq!("kind", spec.name);
        assert_eq!(None, spec.cidr);
        assert_eq!(
            btreemap! {
                "ksail.owned".to_string() => "true".to_string(),
                "ksail.cluster.name".to_string() => "demo".to_string(),
            },
            spec.labels
        );
    }
}
