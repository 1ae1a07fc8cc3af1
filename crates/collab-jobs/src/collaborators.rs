//! HTTP clients for the surrounding application's internal endpoints.
//!
//! Profile generation, pool expansion and email delivery live outside the
//! pipeline. [`HttpCollaborators`] implements all three collaborator traits
//! against one base URL:
//!
//! | Trait method | Request |
//! |--------------|---------|
//! | `generate_profile` | `POST {base}/profiles/{user}/generate` `{"orcid": ...}` |
//! | `refresh_profile` | `POST {base}/profiles/{user}/refresh` |
//! | `expand_match_pool` | `POST {base}/match-pool/{user}/expand` → `{"edges": [...]}` |
//! | `send` | `POST {base}/emails` with the job body |

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use collab_core::{
    defaults, EmailSender, Error, PoolEdge, PoolExpander, ProfileGenerationReport,
    ProfilePipeline, RefreshReport, Result, SendEmailJob,
};

/// Connection settings for the collaborator endpoints.
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    pub base_url: String,
    /// Bearer token, if the endpoints require one.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::COLLABORATOR_BASE_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(defaults::COLLABORATOR_TIMEOUT_SECS),
        }
    }
}

impl CollaboratorConfig {
    /// Load from `COLLABORATOR_BASE_URL`, `COLLABORATOR_TOKEN` and
    /// `COLLABORATOR_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("COLLABORATOR_BASE_URL").unwrap_or(defaults.base_url),
            token: std::env::var("COLLABORATOR_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            timeout: std::env::var("COLLABORATOR_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct GenerateProfileRequest<'a> {
    orcid: &'a str,
}

#[derive(Deserialize)]
struct ExpandResponse {
    #[serde(default)]
    edges: Vec<PoolEdge>,
}

/// Map a non-success status: overload and server faults are transient,
/// everything else is the caller's problem and will not improve on retry.
fn status_error(status: StatusCode, path: &str, body: &str) -> Error {
    let detail = format!("{} returned {}: {}", path, status, body.trim());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Error::Request(detail)
    } else if status == StatusCode::NOT_FOUND {
        Error::NotFound(detail)
    } else {
        Error::InvalidInput(detail)
    }
}

/// HTTP implementation of the external collaborator traits.
#[derive(Clone)]
pub struct HttpCollaborators {
    client: Client,
    config: CollaboratorConfig,
}

impl HttpCollaborators {
    pub fn new(config: CollaboratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(CollaboratorConfig::from_env())
    }

    pub fn config(&self) -> &CollaboratorConfig {
        &self.config
    }

    /// POST `body` and return the response once its status is a success.
    async fn send_request<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let start = Instant::now();

        let mut request = self.client.post(&url).json(body);
        if let Some(ref token) = self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                Error::Config(format!("invalid collaborator request {}: {}", url, e))
            } else {
                Error::Request(format!("{}: {}", path, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = status_error(status, path, &body);
            warn!(
                subsystem = "jobs",
                component = "collaborators",
                path,
                status = status.as_u16(),
                duration_ms = start.elapsed().as_millis() as u64,
                error = %err,
                "Collaborator call failed"
            );
            return Err(err);
        }

        debug!(
            subsystem = "jobs",
            component = "collaborators",
            path,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Collaborator call succeeded"
        );
        Ok(response)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send_request(path, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| Error::Serialization(format!("{}: unexpected response body: {}", path, e)))
    }
}

#[async_trait]
impl ProfilePipeline for HttpCollaborators {
    async fn generate_profile(&self, user_id: Uuid, orcid: &str) -> Result<ProfileGenerationReport> {
        self.post(
            &format!("/profiles/{}/generate", user_id),
            &GenerateProfileRequest { orcid },
        )
        .await
    }

    async fn refresh_profile(&self, user_id: Uuid) -> Result<RefreshReport> {
        self.post(
            &format!("/profiles/{}/refresh", user_id),
            &serde_json::json!({}),
        )
        .await
    }
}

#[async_trait]
impl PoolExpander for HttpCollaborators {
    async fn expand_match_pool(&self, user_id: Uuid) -> Result<Vec<PoolEdge>> {
        let response: ExpandResponse = self
            .post(
                &format!("/match-pool/{}/expand", user_id),
                &serde_json::json!({}),
            )
            .await?;
        Ok(response.edges)
    }
}

#[async_trait]
impl EmailSender for HttpCollaborators {
    async fn send(&self, email: &SendEmailJob) -> Result<()> {
        self.send_request("/emails", email).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::BAD_GATEWAY, "/x", "").is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "/x", "").is_transient());
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "/x", "no such user"),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "/x", "bad orcid"),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn test_config_builders() {
        let config = CollaboratorConfig::default()
            .with_base_url("http://app:8080/internal")
            .with_token("secret")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.base_url, "http://app:8080/internal");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
