pub mod hetzner;
pub mod kube_client;
pub mod oci;
