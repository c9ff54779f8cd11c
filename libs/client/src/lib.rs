//! HTTP client for the rcloud compute API.
//!
//! Implements [`ControlPlane`] over the control plane's REST interface:
//!
//! | Operation | Request                         | Success |
//! |-----------|---------------------------------|---------|
//! | create    | `POST /api/v1/vms`              | 201     |
//! | get       | `GET /api/v1/vms/{id}`          | 200     |
//! | delete    | `DELETE /api/v1/vms/{id}`       | 200     |
//! | start     | `POST /api/v1/vms/{id}/start`   | 200     |
//! | stop      | `POST /api/v1/vms/{id}/stop`    | 200     |
//! | list      | `GET /api/v1/vms`               | 200     |
//!
//! Any other status is an error carrying the raw response body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use rcloud_reconcile::{ControlPlane, ControlPlaneError, CreateVmRequest, CreateVmResponse, VmInfo, VmList};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the control plane.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `http://localhost:8765`.
    pub endpoint: String,

    /// Bearer token. Empty or absent means unauthenticated.
    pub token: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Control plane client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpControlPlane {
    /// Create a new client.
    pub fn new(config: &ClientConfig) -> Result<Self, ControlPlaneError> {
        let base_url = Url::parse(&config.endpoint).map_err(|e| {
            ControlPlaneError::InvalidRequest(format!("invalid endpoint {}: {}", config.endpoint, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "invalid endpoint {}",
                config.endpoint
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ControlPlaneError::InvalidRequest("invalid token format".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ControlPlaneError::InvalidRequest(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, base_url })
    }

    /// Build `{endpoint}/api/v1/vms[/{segment}...]`. Segments are
    /// percent-encoded, so an id can't address another route.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1", "vms"]).extend(segments);
        }
        url
    }

    /// List all VMs known to the control plane.
    pub async fn list_vms(&self) -> Result<VmList, ControlPlaneError> {
        let response = self.send(self.client.get(self.url(&[]))).await?;
        expect_json(response, StatusCode::OK).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ControlPlaneError> {
        request
            .send()
            .await
            .map_err(|e| ControlPlaneError::Transport(e.to_string()))
    }

    async fn post_action(&self, id: &str, action: &str) -> Result<(), ControlPlaneError> {
        debug!(id = %id, action, "Sending VM action");
        let response = self.send(self.client.post(self.url(&[id, action]))).await?;
        expect_status(response, StatusCode::OK).await
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create_vm(
        &self,
        request: &CreateVmRequest,
    ) -> Result<CreateVmResponse, ControlPlaneError> {
        debug!(name = %request.name, "POST /api/v1/vms");
        let response = self
            .send(self.client.post(self.url(&[])).json(request))
            .await?;
        expect_json(response, StatusCode::CREATED).await
    }

    async fn get_vm(&self, id: &str) -> Result<VmInfo, ControlPlaneError> {
        let response = self
            .send(self.client.get(self.url(&[id])))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ControlPlaneError::NotFound { id: id.to_string() });
        }

        expect_json(response, StatusCode::OK).await
    }

    async fn delete_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        let response = self
            .send(self.client.delete(self.url(&[id])))
            .await?;
        expect_status(response, StatusCode::OK).await
    }

    async fn start_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.post_action(id, "start").await
    }

    async fn stop_vm(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.post_action(id, "stop").await
    }
}

/// Require exactly `expected`, then decode the body.
async fn expect_json<T: DeserializeOwned>(
    response: Response,
    expected: StatusCode,
) -> Result<T, ControlPlaneError> {
    if response.status() != expected {
        return Err(status_error(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| ControlPlaneError::Decode(e.to_string()))
}

async fn expect_status(response: Response, expected: StatusCode) -> Result<(), ControlPlaneError> {
    if response.status() != expected {
        return Err(status_error(response).await);
    }
    Ok(())
}

async fn status_error(response: Response) -> ControlPlaneError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!(status, body = %body, "Control plane returned an error");
    ControlPlaneError::Status { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        for endpoint in ["http://localhost:8765", "http://localhost:8765/"] {
            let client = HttpControlPlane::new(&ClientConfig::new(endpoint)).unwrap();
            assert_eq!(client.url(&[]).as_str(), "http://localhost:8765/api/v1/vms");
            assert_eq!(
                client.url(&["0b6c", "start"]).as_str(),
                "http://localhost:8765/api/v1/vms/0b6c/start"
            );
        }

        let client =
            HttpControlPlane::new(&ClientConfig::new("http://rcloud:8765/compute/")).unwrap();
        assert_eq!(
            client.url(&["0b6c"]).as_str(),
            "http://rcloud:8765/compute/api/v1/vms/0b6c"
        );
    }

    #[test]
    fn test_id_is_percent_encoded() {
        let client = HttpControlPlane::new(&ClientConfig::new("http://localhost:8765")).unwrap();
        assert_eq!(
            client.url(&["a/b?x#y"]).as_str(),
            "http://localhost:8765/api/v1/vms/a%2Fb%3Fx%23y"
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        for endpoint in ["localhost:8765/no scheme", "not a url", "mailto:ops@rcloud.dev"] {
            assert!(matches!(
                HttpControlPlane::new(&ClientConfig::new(endpoint)),
                Err(ControlPlaneError::InvalidRequest(_))
            ));
        }
    }

    #[test]
    fn test_token_redacted_in_debug() {
        let config =
            ClientConfig::new("http://localhost:8765").with_token(Some("secret".to_string()));
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let config =
            ClientConfig::new("http://localhost:8765").with_token(Some("bad\ntoken".to_string()));
        assert!(matches!(
            HttpControlPlane::new(&config),
            Err(ControlPlaneError::InvalidRequest(_))
        ));
    }
}
