use crate::infrastructure::models::provider::{
    BackoffSchedule, CloudInfrastructureProvider, CloudServer, FirewallRuleSpec, InfrastructureProvider, Kind,
    NodeInfo, NodeRole, NodeState, ProviderError, ServerCreateOpts, ServerCreateRetryOpts,
};
use crate::io_models::KsailIdentifier;
use crate::io_models::context::AbortHandle;
use crate::services::hetzner::{CreateServerRequest, FirewallRule, HetznerApi, HetznerApiError, Server};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const CLUSTER_LABEL: &str = "ksail.cluster.name";
const DEFAULT_SERVER_IMAGE: &str = "ubuntu-24.04";
const PLACEMENT_GROUP_STRATEGY: &str = "spread";

/// Hetzner provider: cluster nodes are cloud servers, plus the network,
/// firewall and placement group surrounding them.
pub struct HetznerInfrastructureProvider {
    api: HetznerApi,
    backoff: BackoffSchedule,
}

impl HetznerInfrastructureProvider {
    pub fn new(api: HetznerApi) -> Self {
        HetznerInfrastructureProvider {
            api,
            backoff: BackoffSchedule::default(),
        }
    }

    fn infra_name(cluster: &KsailIdentifier) -> String {
        format!("ksail-{cluster}")
    }

    fn cluster_selector(cluster: &KsailIdentifier) -> String {
        format!("{CLUSTER_LABEL}={cluster}")
    }

    fn servers(&self, cluster: &KsailIdentifier) -> Result<Vec<Server>, ProviderError> {
        self.api
            .list_servers(&Self::cluster_selector(cluster))
            .map_err(map_provider_error)
    }
}

impl InfrastructureProvider for HetznerInfrastructureProvider {
    fn kind(&self) -> Kind {
        Kind::Hetzner
    }

    fn list_nodes(&self, cluster: &KsailIdentifier) -> Result<Vec<NodeInfo>, ProviderError> {
        let servers = self.servers(cluster)?;

        Ok(servers
            .into_iter()
            .map(|server| NodeInfo {
                role: match server.labels.get("ksail.node.role").map(|r| r.as_str()) {
                    Some("control-plane") => NodeRole::ControlPlane,
                    Some("worker") => NodeRole::Worker,
                    _ => NodeRole::Unknown,
                },
                state: match server.status.as_str() {
                    "running" => NodeState::Running,
                    "off" | "stopping" => NodeState::Stopped,
                    _ => NodeState::Unknown,
                },
                name: server.name,
            })
            .collect())
    }

    fn start_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        let servers = self.servers(cluster)?;
        if servers.is_empty() {
            return Err(ProviderError::NoNodes {
                cluster: cluster.to_string(),
            });
        }

        let stopped: Vec<&Server> = servers.iter().filter(|s| s.status != "running").collect();
        if stopped.is_empty() {
            return Err(ProviderError::SkipAction);
        }

        for server in stopped {
            self.api.power_action(server.id, "poweron").map_err(map_provider_error)?;
        }
        Ok(())
    }

    fn stop_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        let servers = self.servers(cluster)?;
        if servers.is_empty() {
            return Err(ProviderError::NoNodes {
                cluster: cluster.to_string(),
            });
        }

        let running: Vec<&Server> = servers.iter().filter(|s| s.status == "running").collect();
        if running.is_empty() {
            return Err(ProviderError::SkipAction);
        }

        for server in running {
            self.api.power_action(server.id, "poweroff").map_err(map_provider_error)?;
        }
        Ok(())
    }

    fn delete_nodes(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        let servers = self.servers(cluster)?;
        if servers.is_empty() {
            return Err(ProviderError::SkipAction);
        }

        for server in servers {
            self.api.delete_server(server.id).map_err(map_provider_error)?;
        }
        Ok(())
    }

    fn as_cloud(&self) -> Option<&dyn CloudInfrastructureProvider> {
        Some(self)
    }
}

impl CloudInfrastructureProvider for HetznerInfrastructureProvider {
    fn ensure_network(&self, cluster: &KsailIdentifier, cidr: &str) -> Result<(), ProviderError> {
        let name = Self::infra_name(cluster);
        if self.api.find_network(&name).map_err(map_provider_error)?.is_some() {
            return Ok(());
        }

        self.api.create_network(&name, cidr).map_err(map_provider_error)?;
        Ok(())
    }

    fn ensure_firewall(&self, cluster: &KsailIdentifier, rules: &[FirewallRuleSpec]) -> Result<(), ProviderError> {
        let name = Self::infra_name(cluster);
        if self.api.find_firewall(&name).map_err(map_provider_error)?.is_some() {
            return Ok(());
        }

        let api_rules: Vec<FirewallRule> = rules
            .iter()
            .map(|rule| FirewallRule {
                direction: rule.direction.clone(),
                protocol: rule.protocol.clone(),
                port: rule.port.clone(),
                source_ips: rule.source_ips.clone(),
            })
            .collect();
        self.api.create_firewall(&name, &api_rules).map_err(map_provider_error)?;
        Ok(())
    }

    fn ensure_placement_group(&self, cluster: &KsailIdentifier, strategy: &str) -> Result<(), ProviderError> {
        let name = Self::infra_name(cluster);
        if self
            .api
            .find_placement_group(&name)
            .map_err(map_provider_error)?
            .is_some()
        {
            return Ok(());
        }

        self.api
            .create_placement_group(&name, strategy)
            .map_err(map_provider_error)?;
        Ok(())
    }

    fn create_server(
        &self,
        cluster: &KsailIdentifier,
        opts: &ServerCreateOpts,
        retry_opts: &ServerCreateRetryOpts,
        abort: &AbortHandle,
    ) -> Result<CloudServer, ProviderError> {
        self.ensure_placement_group(cluster, PLACEMENT_GROUP_STRATEGY)?;

        let infra_name = Self::infra_name(cluster);
        let placement_group = self
            .api
            .find_placement_group(&infra_name)
            .map_err(map_provider_error)?
            .map(|pg| pg.id);
        let network = self.api.find_network(&infra_name).map_err(map_provider_error)?;
        let firewall = self.api.find_firewall(&infra_name).map_err(map_provider_error)?;

        let mut labels = opts.labels.clone();
        labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());

        let server = create_server_with_location_fallback(
            retry_opts,
            &self.backoff,
            abort,
            |location, with_placement_group| {
                let request = CreateServerRequest {
                    name: opts.name.clone(),
                    server_type: opts.server_type.clone(),
                    image: if opts.image.is_empty() {
                        DEFAULT_SERVER_IMAGE.to_string()
                    } else {
                        opts.image.clone()
                    },
                    location: location.to_string(),
                    placement_group: if with_placement_group { placement_group } else { None },
                    networks: network.iter().map(|n| n.id).collect(),
                    firewalls: firewall.iter().map(|f| f.id).collect(),
                    labels: labels.clone(),
                };
                self.api.create_server(&request)
            },
        )?;

        Ok(CloudServer {
            id: server.id,
            name: server.name,
            ip: server.public_net.ipv4.map(|v4| v4.ip),
        })
    }

    fn delete_network(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        match self.api.find_network(&Self::infra_name(cluster)) {
            Ok(Some(network)) => self.api.delete_network(network.id).map_err(map_provider_error),
            Ok(None) => Ok(()),
            Err(e) => Err(map_provider_error(e)),
        }
    }

    fn delete_firewall(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        match self.api.find_firewall(&Self::infra_name(cluster)) {
            Ok(Some(firewall)) => self.api.delete_firewall(firewall.id).map_err(map_provider_error),
            Ok(None) => Ok(()),
            Err(e) => Err(map_provider_error(e)),
        }
    }

    fn delete_placement_group(&self, cluster: &KsailIdentifier) -> Result<(), ProviderError> {
        match self.api.find_placement_group(&Self::infra_name(cluster)) {
            Ok(Some(placement_group)) => self
                .api
                .delete_placement_group(placement_group.id)
                .map_err(map_provider_error),
            Ok(None) => Ok(()),
            Err(e) => Err(map_provider_error(e)),
        }
    }
}

fn map_provider_error(err: HetznerApiError) -> ProviderError {
    match err {
        HetznerApiError::Unauthorized => ProviderError::Unauthorized,
        HetznerApiError::Forbidden => ProviderError::Forbidden {
            message: err.to_string(),
        },
        HetznerApiError::ResourceLimitExceeded { message } => ProviderError::ResourceLimitExceeded { message },
        HetznerApiError::PlacementError { message } => ProviderError::PlacementFailed { message },
        HetznerApiError::InvalidInput { message } => ProviderError::InvalidInput { message },
        HetznerApiError::RateLimit
        | HetznerApiError::Conflict
        | HetznerApiError::Locked
        | HetznerApiError::RobotUnavailable
        | HetznerApiError::Transport { .. } => ProviderError::Retryable {
            message: err.to_string(),
        },
        other => ProviderError::Other {
            message: other.to_string(),
        },
    }
}

/// Runs the location-fallback server creation algorithm:
/// ordered locations, bounded exponential backoff inside each location,
/// placement-group fallback, permanent-error short-circuit, and a final
/// `AllLocationsFailed` when everything is exhausted.
pub(crate) fn create_server_with_location_fallback<F>(
    retry_opts: &ServerCreateRetryOpts,
    backoff: &BackoffSchedule,
    abort: &AbortHandle,
    mut attempt: F,
) -> Result<Server, ProviderError>
where
    F: FnMut(&str, bool) -> Result<Server, HetznerApiError>,
{
    let mut last_error: Option<HetznerApiError> = None;

    'locations: for location in &retry_opts.locations {
        let mut with_placement_group = true;
        let mut attempts = 0usize;

        loop {
            if abort.is_cancel_requested() {
                return Err(ProviderError::Aborted);
            }

            match attempt(location, with_placement_group) {
                Ok(server) => return Ok(server),
                Err(e) if e.is_placement_error() && retry_opts.allow_placement_fallback && with_placement_group => {
                    // Drop the placement group and retry in the same location;
                    // doesn't consume a backoff attempt.
                    with_placement_group = false;
                    last_error = Some(e);
                    continue;
                }
                Err(e) if e.is_permanent() => {
                    if retry_opts.continue_on_permanent_error {
                        last_error = Some(e);
                        continue 'locations;
                    }
                    return Err(map_provider_error(e));
                }
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    if attempts >= backoff.max_attempts() {
                        continue 'locations;
                    }
                    sleep_interruptible(backoff.delay_for(attempts), abort)?;
                    attempts += 1;
                }
                Err(e) => {
                    last_error = Some(e);
                    continue 'locations;
                }
            }
        }
    }

    Err(ProviderError::AllLocationsFailed {
        last_error: last_error.map(|e| e.to_string()).unwrap_or_else(|| "no location tried".to_string()),
    })
}

fn sleep_interruptible(delay: Duration, abort: &AbortHandle) -> Result<(), ProviderError> {
    let started = Instant::now();
    while started.elapsed() < delay {
        if abort.is_cancel_requested() {
            return Err(ProviderError::Aborted);
        }
        std::thread::sleep(Duration::from_millis(100).min(delay));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn server(name: &str) -> Server {
        serde_json::from_value(serde_json::json!({
            "id": 1, "name": name, "status": "running"
        }))
        .unwrap()
    }

    fn retry_opts(locations: &[&str], placement_fallback: bool, continue_on_permanent: bool) -> ServerCreateRetryOpts {
        ServerCreateRetryOpts {
            locations: locations.iter().map(|l| l.to_string()).collect(),
            allow_placement_fallback: placement_fallback,
            continue_on_permanent_error: continue_on_permanent,
        }
    }

    #[test]
    fn test_placement_fallback_retries_same_location_without_group() {
        // setup:
        let calls = RefCell::new(vec![]);

        // execute:
        let res = create_server_with_location_fallback(
            &retry_opts(&["fsn1", "nbg1"], true, false),
            &BackoffSchedule::immediate(3),
            &AbortHandle::new(),
            |location, with_pg| {
                calls.borrow_mut().push((location.to_string(), with_pg));
                if with_pg {
                    Err(HetznerApiError::PlacementError {
                        message: "no suitable host".to_string(),
                    })
                } else {
                    Ok(server("node-1"))
                }
            },
        );

        // verify: same location retried, placement group dropped
        assert!(res.is_ok());
        assert_eq!(
            vec![("fsn1".to_string(), true), ("fsn1".to_string(), false)],
            *calls.borrow()
        );
    }

    #[test]
    fn test_permanent_error_fails_immediately_by_default() {
        // setup:
        let calls = RefCell::new(0);

        // execute:
        let res = create_server_with_location_fallback(
            &retry_opts(&["fsn1", "nbg1"], true, false),
            &BackoffSchedule::immediate(3),
            &AbortHandle::new(),
            |_, _| {
                *calls.borrow_mut() += 1;
                Err(HetznerApiError::ResourceLimitExceeded {
                    message: "limit".to_string(),
                })
            },
        );

        // verify: no retry, no second location
        assert!(matches!(res, Err(ProviderError::ResourceLimitExceeded { .. })));
        assert_eq!(1, *calls.borrow());
    }

    #[test]
    fn test_permanent_error_moves_to_next_location_when_caller_opted_in() {
        // setup:
        let calls = RefCell::new(vec![]);

        // execute:
        let res = create_server_with_location_fallback(
            &retry_opts(&["fsn1", "nbg1"], true, true),
            &BackoffSchedule::immediate(3),
            &AbortHandle::new(),
            |location, _| {
                calls.borrow_mut().push(location.to_string());
                if location == "fsn1" {
                    Err(HetznerApiError::Forbidden)
                } else {
                    Ok(server("node-1"))
                }
            },
        );

        // verify:
        assert!(res.is_ok());
        assert_eq!(vec!["fsn1".to_string(), "nbg1".to_string()], *calls.borrow());
    }

    #[test]
    fn test_retryable_error_is_retried_then_next_location() {
        // setup: fsn1 always rate-limited, nbg1 succeeds
        let calls = RefCell::new(vec![]);

        // execute:
        let res = create_server_with_location_fallback(
            &retry_opts(&["fsn1", "nbg1"], true, false),
            &BackoffSchedule::immediate(3),
            &AbortHandle::new(),
            |location, _| {
                calls.borrow_mut().push(location.to_string());
                if location == "fsn1" {
                    Err(HetznerApiError::RateLimit)
                } else {
                    Ok(server("node-1"))
                }
            },
        );

        // verify: initial try + 3 backoff retries in fsn1, then nbg1
        assert!(res.is_ok());
        let calls = calls.borrow();
        assert_eq!(4, calls.iter().filter(|l| *l == "fsn1").count());
        assert_eq!(1, calls.iter().filter(|l| *l == "nbg1").count());
    }

    #[test]
    fn test_all_locations_exhausted_wraps_last_error() {
        // execute:
        let res = create_server_with_location_fallback(
            &retry_opts(&["fsn1", "nbg1"], true, false),
            &BackoffSchedule::immediate(0),
            &AbortHandle::new(),
            |_, _| {
                Err(HetznerApiError::Api {
                    code: "boom".to_string(),
                    message: "unexpected".to_string(),
                })
            },
        );

        // verify:
        match res {
            Err(ProviderError::AllLocationsFailed { last_error }) => {
                assert!(last_error.contains("boom"));
            }
            other => panic!("expected AllLocationsFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_aborts_early() {
        // setup:
        let abort = AbortHandle::new();
        abort.cancel();

        // execute:
        let res = create_server_with_location_fallback(
            &retry_opts(&["fsn1"], true, false),
            &BackoffSchedule::immediate(3),
            &abort,
            |_, _| Ok(server("never-reached")),
        );

        // verify:
        assert!(matches!(res, Err(ProviderError::Aborted)));
    }
}
