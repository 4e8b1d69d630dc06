use crate::io_models::context::AbortHandle;
use crate::runtime::block_on;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, Config};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::{Duration, Instant};

const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum KubeClientError {
    #[error("Kubernetes client configuration error: {message}")]
    Config { message: String },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("Timed out after {timeout_seconds}s waiting for {what}")]
    Timeout { what: String, timeout_seconds: u64 },

    #[error("Operation aborted while waiting for {what}")]
    Aborted { what: String },
}

/// One failing pod surfaced by the diagnoser on readiness timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodFailure {
    pub namespace: String,
    pub name: String,
    pub reason: String,
}

impl Display for PodFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.namespace, self.name, self.reason)
    }
}

/// Blocking facade over the kube client, built per cluster from its
/// kubeconfig file.
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(kubeconfig_path: &Path, context: Option<&str>) -> Result<Self, KubeClientError> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path).map_err(|e| KubeClientError::Config {
            message: e.to_string(),
        })?;

        let options = KubeConfigOptions {
            context: context.map(|c| c.to_string()),
            ..Default::default()
        };

        let config =
            block_on(Config::from_custom_kubeconfig(kubeconfig, &options)).map_err(|e| KubeClientError::Config {
                message: e.to_string(),
            })?;

        let client = Client::try_from(config)?;
        Ok(KubeClient { client })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// True when at least one node reports the Ready condition.
    pub fn any_node_ready(&self) -> Result<bool, KubeClientError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node_list = block_on(nodes.list(&ListParams::default()))?;

        Ok(node_list.items.iter().any(is_node_ready))
    }

    /// Polls until one node is Ready, honoring the abort handle at every tick.
    pub fn wait_for_any_node_ready(&self, timeout: Duration, abort: &AbortHandle) -> Result<(), KubeClientError> {
        let started = Instant::now();
        loop {
            if abort.is_cancel_requested() {
                return Err(KubeClientError::Aborted {
                    what: "node readiness".to_string(),
                });
            }
            if self.any_node_ready().unwrap_or(false) {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(KubeClientError::Timeout {
                    what: "node readiness".to_string(),
                    timeout_seconds: timeout.as_secs(),
                });
            }
            std::thread::sleep(READINESS_POLL_INTERVAL);
        }
    }

    /// Pods stuck in a failing state within the given namespaces, the input of
    /// readiness-timeout error messages.
    pub fn list_failing_pods(&self, namespaces: &[String]) -> Result<Vec<PodFailure>, KubeClientError> {
        let mut failures = vec![];
        for namespace in namespaces {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
            let pod_list = block_on(pods.list(&ListParams::default()))?;
            for pod in pod_list.items {
                if let Some(reason) = pod_failure_reason(&pod) {
                    failures.push(PodFailure {
                        namespace: namespace.clone(),
                        name: pod.metadata.name.unwrap_or_default(),
                        reason,
                    });
                }
            }
        }

        Ok(failures)
    }

    pub fn wait_for_deployment_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
        abort: &AbortHandle,
    ) -> Result<(), KubeClientError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let started = Instant::now();
        loop {
            if abort.is_cancel_requested() {
                return Err(KubeClientError::Aborted {
                    what: format!("deployment {namespace}/{name}"),
                });
            }

            if let Ok(deployment) = block_on(deployments.get(name)) {
                let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready = deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
                if ready >= desired {
                    return Ok(());
                }
            }

            if started.elapsed() >= timeout {
                return Err(KubeClientError::Timeout {
                    what: format!("deployment {namespace}/{name}"),
                    timeout_seconds: timeout.as_secs(),
                });
            }
            std::thread::sleep(READINESS_POLL_INTERVAL);
        }
    }

    /// Server-side applies a custom resource described as raw JSON. Used for
    /// GitOps CRs (ArgoCD Application, FluxInstance) whose types the engine
    /// doesn't own.
    pub fn apply_dynamic(
        &self,
        api_version: &str,
        kind: &str,
        plural: &str,
        namespace: &str,
        name: &str,
        manifest: serde_json::Value,
    ) -> Result<(), KubeClientError> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);

        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &resource);
        let params = PatchParams::apply("ksail-engine").force();
        block_on(api.patch(name, &params, &Patch::Apply(&manifest)))?;

        Ok(())
    }
}

fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn pod_failure_reason(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;

    if status.phase.as_deref() == Some("Failed") {
        return Some(status.reason.clone().unwrap_or_else(|| "Failed".to_string()));
    }

    let waiting_reason = status
        .container_statuses
        .iter()
        .flatten()
        .chain(status.init_container_statuses.iter().flatten())
        .filter_map(|cs| cs.state.as_ref())
        .filter_map(|state| state.waiting.as_ref())
        .filter_map(|waiting| waiting.reason.clone())
        .find(|reason| {
            matches!(
                reason.as_str(),
                "CrashLoopBackOff" | "ErrImagePull" | "ImagePullBackOff" | "CreateContainerConfigError"
            )
        });

    waiting_reason
}

/// Reads the `current-context` of a kubeconfig file; create-plan verification
/// uses it to check the written kubeconfig is usable.
pub fn kubeconfig_current_context(kubeconfig_path: &Path) -> Result<String, String> {
    let raw = std::fs::read_to_string(kubeconfig_path).map_err(|e| e.to_string())?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(&raw).map_err(|e| e.to_string())?;

    match parsed.get("current-context").and_then(|v| v.as_str()) {
        Some(context) if !context.is_empty() => Ok(context.to_string()),
        _ => Err("kubeconfig has no current-context".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_kubeconfig_current_context() {
        // setup:
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "apiVersion: v1\nkind: Config\ncurrent-context: kind-demo\nclusters: []\ncontexts: []\nusers: []"
        )
        .unwrap();

        // execute:
        let context = kubeconfig_current_context(file.path());

        // verify:
        assert_eq!("kind-demo", context.unwrap());
    }

    #[test]
    fn test_kubeconfig_without_context_is_invalid() {
        // setup:
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apiVersion: v1\nkind: Config\nclusters: []").unwrap();

        // execute & verify:
        assert!(kubeconfig_current_context(file.path()).is_err());
    }

    #[test]
    fn test_pod_failure_reason_detects_crash_loop() {
        // setup:
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "cilium-abc"},
            "status": {
                "phase": "Pending",
                "containerStatuses": [{
                    "name": "agent",
                    "image": "x",
                    "imageID": "x",
                    "ready": false,
                    "restartCount": 4,
                    "state": {"waiting": {"reason": "CrashLoopBackOff"}}
                }]
            }
        }))
        .unwrap();

        // execute & verify:
        assert_eq!(Some("CrashLoopBackOff".to_string()), pod_failure_reason(&pod));
    }

    #[test]
    fn test_pod_failure_reason_ignores_healthy_pod() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "ok"},
            "status": {"phase": "Running"}
        }))
        .unwrap();

        assert_eq!(None, pod_failure_reason(&pod));
    }
}
