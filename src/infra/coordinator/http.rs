//! HTTP client for the coordinator's worker API.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CoordinatorConfig;
use crate::core::coordinator::{Coordinator, RemoteControls, StatusUpdate};
use crate::core::error::CoordinatorError;
use crate::core::job::{JobId, JobRecord};
use crate::runtime::api::{
    ClaimRequest, ClaimResponse, ControlsResponse, EventReport, StatusReport,
};
use crate::util::telemetry::human_error;

/// Delay after failed POST attempt `i` (0-based), before jitter.
#[must_use]
pub fn post_backoff(attempt: u32) -> Duration {
    let ms = 250_u64.saturating_mul(2_u64.saturating_pow(attempt)).min(2_500);
    Duration::from_millis(ms)
}

/// Delay after failed GET attempt `i` (0-based).
#[must_use]
pub fn get_backoff(attempt: u32) -> Duration {
    Duration::from_millis(300 * (u64::from(attempt) + 1))
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::CONFLICT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// [`Coordinator`] over HTTP with bearer auth and bounded retries.
pub struct HttpCoordinator {
    client: Client,
    base_url: String,
    token: Option<String>,
    post_attempts: u32,
    get_attempts: u32,
}

impl std::fmt::Debug for HttpCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCoordinator")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("post_attempts", &self.post_attempts)
            .field("get_attempts", &self.get_attempts)
            .finish_non_exhaustive()
    }
}

impl HttpCoordinator {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Transport`] if the HTTP client cannot be constructed.
    pub fn new(cfg: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .connect_timeout(cfg.timeout())
            .build()
            .map_err(|e| CoordinatorError::Transport(format!("failed to build HTTP client: {e}")))?;
        let token = cfg.token.trim();
        Ok(Self {
            client,
            base_url: cfg.api_base.trim_end_matches('/').to_string(),
            token: (!token.is_empty()).then(|| token.to_string()),
            post_attempts: cfg.post_attempts.max(1),
            get_attempts: cfg.get_attempts.max(1),
        })
    }

    fn url(&self, path: &str) -> Result<String, CoordinatorError> {
        if self.base_url.is_empty() {
            return Err(CoordinatorError::NotConfigured);
        }
        Ok(format!("{}{path}", self.base_url))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(path: &str, resp: Response) -> Result<Response, (CoordinatorError, bool)> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        debug!(path, status = status.as_u16(), body = %human_error(&body), "coordinator rejected request");
        Err((
            CoordinatorError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            },
            retryable(status),
        ))
    }

    async fn post_once<B: Serialize + Sync>(
        &self,
        url: &str,
        path: &str,
        body: &B,
    ) -> Result<Response, (CoordinatorError, bool)> {
        let resp = self
            .authorize(self.client.post(url).json(body))
            .send()
            .await
            .map_err(|e| (CoordinatorError::Transport(human_error(&e)), true))?;
        Self::check(path, resp).await
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Response, CoordinatorError> {
        let url = self.url(path)?;
        let attempts = self.post_attempts;
        let mut attempt = 0;
        loop {
            match self.post_once(&url, path, body).await {
                Ok(resp) => return Ok(resp),
                Err((err, retry)) => {
                    if attempt == 0 || attempt + 1 == attempts {
                        warn!(path, attempt = attempt + 1, attempts, error = %human_error(&err), "POST failed");
                    }
                    if !retry || attempt + 1 >= attempts {
                        return Err(err);
                    }
                    let jitter = Duration::from_millis(rand::rng().random_range(0..=200));
                    tokio::time::sleep(post_backoff(attempt) + jitter).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CoordinatorError> {
        let url = self.url(path)?;
        let attempts = self.get_attempts;
        let mut attempt = 0;
        loop {
            let outcome = match self.authorize(self.client.get(&url)).send().await {
                Ok(resp) => Self::check(path, resp).await,
                Err(e) => Err((CoordinatorError::Transport(human_error(&e)), true)),
            };
            let err = match outcome {
                Ok(resp) => {
                    return resp
                        .json()
                        .await
                        .map_err(|e| CoordinatorError::Decode(human_error(&e)))
                }
                Err((err, retry)) if retry && attempt + 1 < attempts => err,
                Err((err, _)) => return Err(err),
            };
            debug!(path, attempt = attempt + 1, error = %human_error(&err), "GET failed, retrying");
            tokio::time::sleep(get_backoff(attempt)).await;
            attempt += 1;
        }
    }

    fn not_found(job_id: JobId, err: CoordinatorError) -> CoordinatorError {
        match err {
            CoordinatorError::Status { status: 404, .. } => CoordinatorError::JobNotFound(job_id),
            other => other,
        }
    }
}

#[async_trait]
impl Coordinator for HttpCoordinator {
    async fn claim(&self, limit: usize, worker_id: &str) -> Result<Vec<JobRecord>, CoordinatorError> {
        let body = ClaimRequest {
            limit,
            worker_id: worker_id.to_string(),
        };
        let resp = self.post("/api/worker/claim", &body).await?;
        let parsed: ClaimResponse = resp
            .json()
            .await
            .map_err(|e| CoordinatorError::Decode(human_error(&e)))?;
        Ok(parsed.items)
    }

    async fn controls(&self) -> Result<RemoteControls, CoordinatorError> {
        let resp: ControlsResponse = self.get("/api/worker/controls").await?;
        Ok(resp.into())
    }

    async fn post_event(&self, job_id: JobId, event: &str) -> Result<(), CoordinatorError> {
        let path = format!("/api/worker/searches/{job_id}/event");
        let body = EventReport {
            event: event.to_string(),
        };
        self.post(&path, &body)
            .await
            .map(|_| ())
            .map_err(|e| Self::not_found(job_id, e))
    }

    async fn set_status(&self, job_id: JobId, update: &StatusUpdate) -> Result<(), CoordinatorError> {
        let path = format!("/api/worker/searches/{job_id}/status");
        self.post(&path, &StatusReport::from(update))
            .await
            .map(|_| ())
            .map_err(|e| Self::not_found(job_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_backoff_doubles_then_caps() {
        assert_eq!(post_backoff(0), Duration::from_millis(250));
        assert_eq!(post_backoff(1), Duration::from_millis(500));
        assert_eq!(post_backoff(3), Duration::from_secs(2));
        assert_eq!(post_backoff(4), Duration::from_millis(2500));
        assert_eq!(post_backoff(10), Duration::from_millis(2500));
    }

    #[test]
    fn get_backoff_is_linear() {
        assert_eq!(get_backoff(0), Duration::from_millis(300));
        assert_eq!(get_backoff(2), Duration::from_millis(900));
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert!(!retryable(StatusCode::UNAUTHORIZED));
        assert!(!retryable(StatusCode::NOT_FOUND));
        assert!(retryable(StatusCode::BAD_GATEWAY));
        assert!(retryable(StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn empty_base_is_not_configured() {
        let client = HttpCoordinator::new(&CoordinatorConfig::default()).unwrap();
        let err = client.claim(1, "w").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotConfigured));
        let err = client.controls().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::NotConfigured));
    }

    #[test]
    fn debug_masks_token() {
        let cfg = CoordinatorConfig {
            api_base: "https://api.example.com/".into(),
            token: "secret".into(),
            ..CoordinatorConfig::default()
        };
        let client = HttpCoordinator::new(&cfg).unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("https://api.example.com\""));
    }
}
