/// Environment variable used to locate the kubeconfig file when the cluster
/// descriptor doesn't pin one explicitly.
pub const KUBECONFIG: &str = "KUBECONFIG";

/// Environment variable carrying the Hetzner Cloud API token.
pub const HCLOUD_TOKEN: &str = "HCLOUD_TOKEN";

/// Label set on every container and network owned by ksail.
pub const KSAIL_OWNED_LABEL: &str = "ksail.owned";

/// Label carrying the name of the cluster owning a container or network.
pub const KSAIL_CLUSTER_NAME_LABEL: &str = "ksail.cluster.name";

/// Label carrying the upstream URL a mirror registry proxies.
pub const KSAIL_REGISTRY_UPSTREAM_LABEL: &str = "ksail.registry.upstream";

/// Default tag for OCI workload artifacts.
pub const DEFAULT_WORKLOAD_TAG: &str = "dev";
