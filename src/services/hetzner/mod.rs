use crate::utilities::get_header_with_bearer;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

const HETZNER_CLOUD_API_BASE_URL: &str = "https://api.hetzner.cloud/v1";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HetznerApiError {
    #[error("Hetzner API: invalid credentials")]
    Unauthorized,

    #[error("Hetzner API: forbidden")]
    Forbidden,

    #[error("Hetzner API: resource `{resource}` not found")]
    NotFound { resource: String },

    #[error("Hetzner API: rate limit exceeded")]
    RateLimit,

    #[error("Hetzner API: conflict")]
    Conflict,

    #[error("Hetzner API: resource is locked")]
    Locked,

    #[error("Hetzner API: robot backend unavailable")]
    RobotUnavailable,

    #[error("Hetzner API: resource limit exceeded: {message}")]
    ResourceLimitExceeded { message: String },

    #[error("Hetzner API: placement error: {message}")]
    PlacementError { message: String },

    #[error("Hetzner API: invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Hetzner API: transport error: {message}")]
    Transport { message: String },

    #[error("Hetzner API error `{code}`: {message}")]
    Api { code: String, message: String },
}

impl HetznerApiError {
    /// Errors worth retrying in the same location.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HetznerApiError::RateLimit
                | HetznerApiError::Conflict
                | HetznerApiError::Locked
                | HetznerApiError::RobotUnavailable
                | HetznerApiError::Transport { .. }
        )
    }

    /// Errors no amount of retrying or relocating will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            HetznerApiError::ResourceLimitExceeded { .. }
                | HetznerApiError::Forbidden
                | HetznerApiError::Unauthorized
                | HetznerApiError::InvalidInput { .. }
        )
    }

    pub fn is_placement_error(&self) -> bool {
        matches!(self, HetznerApiError::PlacementError { .. })
    }
}

#[derive(Deserialize, Debug)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    code: String,
    message: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub public_net: PublicNet,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PublicNet {
    pub ipv4: Option<Ipv4>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Ipv4 {
    pub ip: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Network {
    pub id: u64,
    pub name: String,
    pub ip_range: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Firewall {
    pub id: u64,
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PlacementGroup {
    pub id: u64,
    pub name: String,
    pub r#type: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct FirewallRule {
    pub direction: String,
    pub protocol: String,
    pub port: Option<String>,
    pub source_ips: Vec<String>,
}

/// Request body of `POST /servers`.
#[derive(Serialize, Debug, Clone)]
pub struct CreateServerRequest {
    pub name: String,
    pub server_type: String,
    pub image: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_group: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub firewalls: Vec<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Blocking JSON client for the Hetzner Cloud API.
pub struct HetznerApi {
    base_url: Url,
    token: String,
    client: Client,
}

impl HetznerApi {
    pub fn new(token: String) -> Result<Self, HetznerApiError> {
        Self::new_with_base_url(
            token,
            Url::parse(HETZNER_CLOUD_API_BASE_URL).expect("valid hetzner base url"),
        )
    }

    /// Base URL override, for tests against a local stub.
    pub fn new_with_base_url(token: String, base_url: Url) -> Result<Self, HetznerApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        Ok(HetznerApi { base_url, token, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn check<T: serde::de::DeserializeOwned>(&self, response: Response, resource: &str) -> Result<T, HetznerApiError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .map_err(|e| HetznerApiError::Transport { message: e.to_string() });
        }

        let body = response.text().unwrap_or_default();
        Err(map_api_error(status, &body, resource))
    }

    // ---------- servers ----------

    pub fn list_servers(&self, label_selector: &str) -> Result<Vec<Server>, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            servers: Vec<Server>,
        }

        let response = self
            .client
            .get(self.url("/servers"))
            .query(&[("label_selector", label_selector)])
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<Envelope>(response, "servers").map(|e| e.servers)
    }

    pub fn create_server(&self, request: &CreateServerRequest) -> Result<Server, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            server: Server,
        }

        let response = self
            .client
            .post(self.url("/servers"))
            .headers(get_header_with_bearer(&self.token))
            .json(request)
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<Envelope>(response, &request.name).map(|e| e.server)
    }

    pub fn delete_server(&self, id: u64) -> Result<(), HetznerApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/servers/{id}")))
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<serde_json::Value>(response, "server").map(|_| ())
    }

    pub fn power_action(&self, id: u64, action: &str) -> Result<(), HetznerApiError> {
        let response = self
            .client
            .post(self.url(&format!("/servers/{id}/actions/{action}")))
            .headers(get_header_with_bearer(&self.token))
            .json(&serde_json::json!({}))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<serde_json::Value>(response, "server action").map(|_| ())
    }

    // ---------- networks ----------

    pub fn find_network(&self, name: &str) -> Result<Option<Network>, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            networks: Vec<Network>,
        }

        let response = self
            .client
            .get(self.url("/networks"))
            .query(&[("name", name)])
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        let envelope: Envelope = self.check(response, name)?;
        Ok(envelope.networks.into_iter().next())
    }

    pub fn create_network(&self, name: &str, ip_range: &str) -> Result<Network, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            network: Network,
        }

        let body = serde_json::json!({
            "name": name,
            "ip_range": ip_range,
            "subnets": [{"type": "cloud", "ip_range": ip_range, "network_zone": "eu-central"}],
        });
        let response = self
            .client
            .post(self.url("/networks"))
            .headers(get_header_with_bearer(&self.token))
            .json(&body)
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<Envelope>(response, name).map(|e| e.network)
    }

    pub fn delete_network(&self, id: u64) -> Result<(), HetznerApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/networks/{id}")))
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<serde_json::Value>(response, "network").map(|_| ())
    }

    // ---------- firewalls ----------

    pub fn find_firewall(&self, name: &str) -> Result<Option<Firewall>, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            firewalls: Vec<Firewall>,
        }

        let response = self
            .client
            .get(self.url("/firewalls"))
            .query(&[("name", name)])
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        let envelope: Envelope = self.check(response, name)?;
        Ok(envelope.firewalls.into_iter().next())
    }

    pub fn create_firewall(&self, name: &str, rules: &[FirewallRule]) -> Result<Firewall, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            firewall: Firewall,
        }

        let body = serde_json::json!({"name": name, "rules": rules});
        let response = self
            .client
            .post(self.url("/firewalls"))
            .headers(get_header_with_bearer(&self.token))
            .json(&body)
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<Envelope>(response, name).map(|e| e.firewall)
    }

    pub fn delete_firewall(&self, id: u64) -> Result<(), HetznerApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/firewalls/{id}")))
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<serde_json::Value>(response, "firewall").map(|_| ())
    }

    // ---------- placement groups ----------

    pub fn find_placement_group(&self, name: &str) -> Result<Option<PlacementGroup>, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            placement_groups: Vec<PlacementGroup>,
        }

        let response = self
            .client
            .get(self.url("/placement_groups"))
            .query(&[("name", name)])
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        let envelope: Envelope = self.check(response, name)?;
        Ok(envelope.placement_groups.into_iter().next())
    }

    pub fn create_placement_group(&self, name: &str, strategy: &str) -> Result<PlacementGroup, HetznerApiError> {
        #[derive(Deserialize)]
        struct Envelope {
            placement_group: PlacementGroup,
        }

        let body = serde_json::json!({"name": name, "type": strategy});
        let response = self
            .client
            .post(self.url("/placement_groups"))
            .headers(get_header_with_bearer(&self.token))
            .json(&body)
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<Envelope>(response, name).map(|e| e.placement_group)
    }

    pub fn delete_placement_group(&self, id: u64) -> Result<(), HetznerApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/placement_groups/{id}")))
            .headers(get_header_with_bearer(&self.token))
            .send()
            .map_err(|e| HetznerApiError::Transport { message: e.to_string() })?;

        self.check::<serde_json::Value>(response, "placement group").map(|_| ())
    }
}

fn map_api_error(status: StatusCode, body: &str, resource: &str) -> HetznerApiError {
    // The API error code in the body is more precise than the HTTP status.
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) {
        let ApiErrorBody { code, message } = envelope.error;
        return match code.as_str() {
            "unauthorized" => HetznerApiError::Unauthorized,
            "forbidden" => HetznerApiError::Forbidden,
            "not_found" => HetznerApiError::NotFound {
                resource: resource.to_string(),
            },
            "rate_limit_exceeded" => HetznerApiError::RateLimit,
            "conflict" => HetznerApiError::Conflict,
            "locked" => HetznerApiError::Locked,
            "robot_unavailable" => HetznerApiError::RobotUnavailable,
            "resource_limit_exceeded" => HetznerApiError::ResourceLimitExceeded { message },
            "placement_error" => HetznerApiError::PlacementError { message },
            "invalid_input" => HetznerApiError::InvalidInput { message },
            _ => HetznerApiError::Api { code, message },
        };
    }

    match status {
        StatusCode::UNAUTHORIZED => HetznerApiError::Unauthorized,
        StatusCode::FORBIDDEN => HetznerApiError::Forbidden,
        StatusCode::NOT_FOUND => HetznerApiError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::CONFLICT => HetznerApiError::Conflict,
        StatusCode::LOCKED => HetznerApiError::Locked,
        StatusCode::TOO_MANY_REQUESTS => HetznerApiError::RateLimit,
        _ => HetznerApiError::Api {
            code: status.as_u16().to_string(),
            message: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_api_error_prefers_body_code() {
        // setup:
        struct TestCase {
            status: StatusCode,
            body: &'static str,
            expected_retryable: bool,
            expected_permanent: bool,
        }

        let test_cases = vec![
            TestCase {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: r#"{"error":{"code":"resource_limit_exceeded","message":"server limit reached"}}"#,
                expected_retryable: false,
                expected_permanent: true,
            },
            TestCase {
                status: StatusCode::CONFLICT,
                body: r#"{"error":{"code":"conflict","message":"try again"}}"#,
                expected_retryable: true,
                expected_permanent: false,
            },
            TestCase {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: r#"{"error":{"code":"placement_error","message":"no suitable host"}}"#,
                expected_retryable: false,
                expected_permanent: false,
            },
        ];

        for tc in test_cases {
            // execute:
            let err = map_api_error(tc.status, tc.body, "test");

            // verify:
            assert_eq!(tc.expected_retryable, err.is_retryable(), "{err:?}");
            assert_eq!(tc.expected_permanent, err.is_permanent(), "{err:?}");
        }
    }

    #[test]
    fn test_map_api_error_falls_back_to_http_status() {
        assert_eq!(HetznerApiError::Unauthorized, map_api_error(StatusCode::UNAUTHORIZED, "", "x"));
        assert_eq!(HetznerApiError::RateLimit, map_api_error(StatusCode::TOO_MANY_REQUESTS, "", "x"));
    }
}
