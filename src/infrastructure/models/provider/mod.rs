pub mod docker;
pub mod hetzner;

use crate::errors::CommandError;
use crate::io_models::KsailIdentifier;
use crate::io_models::context::AbortHandle;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Kind: infrastructure substrate under the distribution.
pub enum Kind {
    Docker,
    Hetzner,
}

impl Kind {
    pub fn is_cloud(&self) -> bool {
        matches!(self, Kind::Hetzner)
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Kind::Docker => "docker",
            Kind::Hetzner => "hetzner",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    ControlPlane,
    Worker,
    Unknown,
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
            NodeRole::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Running,
    Stopped,
    Unknown,
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NodeState::Running => "running",
            NodeState::Stopped => "stopped",
            NodeState::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub role: NodeRole,
    pub state: NodeState,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider is unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("no nodes found for cluster `{cluster}`")]
    NoNodes { cluster: String },

    /// Sentinel: nothing to do, the caller continues.
    #[error("nothing to do")]
    SkipAction,

    #[error("retryable provider error: {message}")]
    Retryable { message: String },

    #[error("placement failed: {message}")]
    PlacementFailed { message: String },

    #[error("resource limit exceeded: {message}")]
    ResourceLimitExceeded { message: String },

    #[error("all locations failed, last error: {last_error}")]
    AllLocationsFailed { last_error: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("invalid credentials")]
    Unauthorized,

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("operation aborted")]
    Aborted,

    #[error("provider error: {message}")]
    Other { message: String },
}

impl From<ProviderError> for CommandError {
    fn from(err: ProviderError) -> Self {
        CommandError::new("Provider error".to_string(), Some(err.to_string()), None)
    }
}

/// Node and infra operations, uniform over Docker-local and cloud substrates.
pub trait InfrastructureProvider: Send + Sync {
    fn kind(&self) -> Kind;

    fn list_nodes(&self, cluster: &KsailIdentifier) -> Result<Vec<NodeInfo>, ProviderError>;

    fn nodes_exist(&self, cluster: &KsailIdentifier) -> Result<bool, ProviderError> {
        Ok(!self.list_nodes(cluster)?.is_empty())
    }

    fn start_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError>;

    fn stop_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError>;

    fn delete_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError>;

    /// Cloud capabilities, when the substrate has any.
    fn as_cloud(&self) -> Option<&dyn CloudInfrastructureProvider> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ServerCreateOpts {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ServerCreateRetryOpts {
    /// Ordered location candidates, primary first.
    pub locations: Vec<String>,
    /// On placement failure, drop the placement group and retry in place.
    pub allow_placement_fallback: bool,
    /// Whether a permanent error moves on to the next location instead of
    /// failing the whole call.
    pub continue_on_permanent_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudServer {
    pub id: u64,
    pub name: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FirewallRuleSpec {
    pub direction: String,
    pub protocol: String,
    pub port: Option<String>,
    pub source_ips: Vec<String>,
}

/// Extra operations only cloud substrates expose.
pub trait CloudInfrastructureProvider: Send + Sync {
    fn ensure_network(&self, cluster: &KsailIdentifier, cidr: &str) -> Result<(), ProviderError>;

    fn ensure_firewall(&self, cluster: &KsailIdentifier, rules: &[FirewallRuleSpec]) -> Result<(), ProviderError>;

    fn ensure_placement_group(&self, cluster: &KsailIdentifier, strategy: &str) -> Result<(), ProviderError>;

    fn create_server(
        &self,
        cluster: &KsailIdentifier,
        opts: &ServerCreateOpts,
        retry_opts: &ServerCreateRetryOpts,
        abort: &AbortHandle,
    ) -> Result<CloudServer, ProviderError>;

    fn delete_network(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError>;

    fn delete_firewall(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError>;

    fn delete_placement_group(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError>;
}

/// Backoff schedule of in-location retries: exponential, capped.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
    cap: Duration,
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>, cap: Duration) -> Self {
        BackoffSchedule { delays, cap }
    }

    /// Zero-delay schedule with the same attempt count, for tests.
    pub fn immediate(attempts: usize) -> Self {
        BackoffSchedule {
            delays: vec![Duration::ZERO; attempts],
            cap: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len()
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay = self.delays.get(attempt).copied().unwrap_or(self.cap);
        delay.min(self.cap)
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        // 2s, 4s, 8s — capped at 10s
        BackoffSchedule {
            delays: vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)],
            cap: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_is_capped() {
        // setup:
        let schedule = BackoffSchedule::new(
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(30)],
            Duration::from_secs(10),
        );

        // execute & verify:
        assert_eq!(Duration::from_secs(2), schedule.delay_for(0));
        assert_eq!(Duration::from_secs(4), schedule.delay_for(1));
        assert_eq!(Duration::from_secs(10), schedule.delay_for(2));
    }

    #[test]
    fn test_default_schedule_has_three_attempts() {
        assert_eq!(3, BackoffSchedule::default().max_attempts());
    }
}
