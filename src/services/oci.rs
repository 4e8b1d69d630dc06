use base64::Engine;
use base64::engine::general_purpose;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Media type of the manifest config blob for flux-style artifacts.
const FLUX_CONFIG_MEDIA_TYPE: &str = "application/vnd.cncf.flux.config.v1+json";
/// Media type of the artifact content layer (tar+gzip).
const FLUX_CONTENT_MEDIA_TYPE: &str = "application/vnd.cncf.flux.content.v1.tar+gzip";
const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

#[derive(thiserror::Error, Debug)]
pub enum OciError {
    #[error("OCI registry transport error: {message}")]
    Transport { message: String },

    #[error("OCI registry returned status {status} during {operation}")]
    UnexpectedStatus { status: StatusCode, operation: String },
}

/// Resolves a registry `credsRef` into credentials: the referenced
/// environment variable carries `user:password`.
pub fn resolve_registry_credentials(creds_ref: &str) -> Option<(String, String)> {
    let raw = std::env::var(creds_ref).ok()?;
    let (username, password) = raw.split_once(':')?;

    Some((username.to_string(), password.to_string()))
}

/// Minimal client for the OCI distribution API, enough to push
/// flux-consumable artifacts and check their presence against a plain local
/// registry container or an authenticated external one.
pub struct OciRegistryClient {
    endpoint: Url,
    client: Client,
    authorization: Option<String>,
}

impl OciRegistryClient {
    /// `endpoint` is the registry base, e.g. `http://localhost:5000`.
    pub fn new(endpoint: Url) -> Result<Self, OciError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| OciError::Transport { message: e.to_string() })?;

        Ok(OciRegistryClient {
            endpoint,
            client,
            authorization: None,
        })
    }

    /// Basic credentials for registries behind auth (external registries).
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        let token = general_purpose::STANDARD.encode(format!("{username}:{password}"));
        self.authorization = Some(format!("Basic {token}"));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.as_str().trim_end_matches('/'), path)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(authorization) => request.header("Authorization", authorization),
            None => request,
        }
    }

    /// Probes the registry API root.
    pub fn ping(&self) -> Result<bool, OciError> {
        let response = self
            .with_auth(self.client.get(self.url("/v2/")))
            .send()
            .map_err(|e| OciError::Transport { message: e.to_string() })?;

        Ok(response.status().is_success())
    }

    /// True when a manifest exists for `repository:tag`.
    pub fn artifact_exists(&self, repository: &str, tag: &str) -> Result<bool, OciError> {
        let response = self
            .with_auth(self.client.head(self.url(&format!("/v2/{repository}/manifests/{tag}"))))
            .header("Accept", OCI_MANIFEST_MEDIA_TYPE)
            .send()
            .map_err(|e| OciError::Transport { message: e.to_string() })?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(OciError::UnexpectedStatus {
                status,
                operation: format!("manifest check for {repository}:{tag}"),
            }),
        }
    }

    /// Pushes a single-layer artifact and returns the manifest digest.
    pub fn push_artifact(&self, repository: &str, tag: &str, content: &[u8]) -> Result<String, OciError> {
        let layer_digest = self.upload_blob(repository, content)?;

        let config = b"{}";
        let config_digest = self.upload_blob(repository, config)?;

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST_MEDIA_TYPE,
            "config": {
                "mediaType": FLUX_CONFIG_MEDIA_TYPE,
                "digest": config_digest,
                "size": config.len(),
            },
            "layers": [{
                "mediaType": FLUX_CONTENT_MEDIA_TYPE,
                "digest": layer_digest,
                "size": content.len(),
            }],
        });

        let manifest_bytes = serde_json::to_vec(&manifest).map_err(|e| OciError::Transport { message: e.to_string() })?;
        let manifest_digest = sha256_digest(&manifest_bytes);

        let response = self
            .with_auth(self.client.put(self.url(&format!("/v2/{repository}/manifests/{tag}"))))
            .header("Content-Type", OCI_MANIFEST_MEDIA_TYPE)
            .body(manifest_bytes)
            .send()
            .map_err(|e| OciError::Transport { message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                status: response.status(),
                operation: format!("manifest push for {repository}:{tag}"),
            });
        }

        Ok(manifest_digest)
    }

    /// Monolithic blob upload: start an upload session, then PUT with digest.
    fn upload_blob(&self, repository: &str, content: &[u8]) -> Result<String, OciError> {
        let digest = sha256_digest(content);

        let response = self
            .with_auth(self.client.post(self.url(&format!("/v2/{repository}/blobs/uploads/"))))
            .send()
            .map_err(|e| OciError::Transport { message: e.to_string() })?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(OciError::UnexpectedStatus {
                status: response.status(),
                operation: format!("blob upload start for {repository}"),
            });
        }

        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| OciError::Transport {
                message: "registry did not return an upload location".to_string(),
            })?;

        let upload_url = if location.starts_with("http") {
            location
        } else {
            self.url(&location)
        };
        let separator = if upload_url.contains('?') { '&' } else { '?' };

        let response = self
            .with_auth(self.client.put(format!("{upload_url}{separator}digest={digest}")))
            .header("Content-Type", "application/octet-stream")
            .body(content.to_vec())
            .send()
            .map_err(|e| OciError::Transport { message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(OciError::UnexpectedStatus {
                status: response.status(),
                operation: format!("blob upload for {repository}"),
            });
        }

        Ok(digest)
    }
}

fn sha256_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_basic_auth_builds_a_basic_header() {
        // setup:
        let client = OciRegistryClient::new(Url::parse("http://localhost:5000").unwrap())
            .unwrap()
            .with_basic_auth("admin", "s3cr3t");

        // execute:
        let authorization = client.authorization.expect("authorization header is set");

        // verify: decodes back to user:password
        let token = authorization.strip_prefix("Basic ").expect("basic scheme");
        let decoded = general_purpose::STANDARD.decode(token).unwrap();
        assert_eq!(b"admin:s3cr3t".as_slice(), decoded.as_slice());
    }

    #[test]
    fn test_resolve_registry_credentials() {
        // setup:
        unsafe { std::env::set_var("KSAIL_TEST_REGISTRY_CREDS", "admin:s3cr3t") };

        // execute & verify:
        assert_eq!(
            Some(("admin".to_string(), "s3cr3t".to_string())),
            resolve_registry_credentials("KSAIL_TEST_REGISTRY_CREDS")
        );
        assert_eq!(None, resolve_registry_credentials("KSAIL_TEST_REGISTRY_CREDS_MISSING"));

        unsafe { std::env::set_var("KSAIL_TEST_REGISTRY_CREDS", "no-colon") };
        assert_eq!(None, resolve_registry_credentials("KSAIL_TEST_REGISTRY_CREDS"));
    }

    #[test]
    fn test_sha256_digest_format() {
        // execute:
        let digest = sha256_digest(b"hello");

        // verify: well-known sha256 of "hello"
        assert_eq!(
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
            digest
        );
    }
}
