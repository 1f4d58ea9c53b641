//! HTTP client for the gitrow server

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libgitrow_core::config::HelperConfig;
use libgitrow_core::PushUpdate;
use rand::Rng;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::credentials::CredentialProvider;
use crate::error::WireError;
use crate::location::RemoteLocation;
use crate::messages::{
    ErrorBody, FetchRequest, FetchResponse, PushJsonBody, PushMetadata, PushResponse,
    RefsResponse, METADATA_FIELD, PACK_FIELD, PACK_MIME,
};

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HelperConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retrying after `attempt` failed attempts (1-based):
    /// `initial * 2^(attempt-1)` capped at `max_backoff`, plus up to a
    /// quarter of that as jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_backoff.as_millis() as u64;
        let max = self.max_backoff.as_millis() as u64;
        let shift = attempt.saturating_sub(1).min(16);
        let base = initial.saturating_mul(1u64 << shift).min(max);
        let jitter = if base >= 4 {
            rand::thread_rng().gen_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&HelperConfig::default())
    }
}

/// Client bound to one remote repository
pub struct WireClient {
    http: reqwest::Client,
    location: RemoteLocation,
    credentials: Arc<dyn CredentialProvider>,
    retry: RetryPolicy,
    multipart: AtomicBool,
}

impl WireClient {
    pub fn new(
        location: RemoteLocation,
        credentials: Arc<dyn CredentialProvider>,
        config: &HelperConfig,
    ) -> Result<Self, WireError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("git-remote-gitrow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            location,
            credentials,
            retry: RetryPolicy::from_config(config),
            multipart: AtomicBool::new(config.multipart),
        })
    }

    pub fn location(&self) -> &RemoteLocation {
        &self.location
    }

    /// Whether the next push will try multipart first
    pub fn uses_multipart(&self) -> bool {
        self.multipart.load(Ordering::Relaxed)
    }

    /// Obtain a bearer token for this remote.
    ///
    /// The remote URL names the server; a credential issued for a different
    /// endpoint is refused rather than sent there.
    async fn bearer(&self) -> Result<String, WireError> {
        let credential = self.credentials.fetch().await.map_err(|e| match e {
            WireError::Auth(_) => e,
            other => WireError::Auth(format!("{}: {}", self.credentials.name(), other)),
        })?;
        if let Some(endpoint) = &credential.endpoint {
            if !self.location.same_endpoint(endpoint) {
                return Err(WireError::Auth(format!(
                    "credential from {} is for {}, not {}",
                    self.credentials.name(),
                    endpoint,
                    self.location.endpoint
                )));
            }
        }
        if credential.token.trim().is_empty() {
            return Err(WireError::Auth(format!(
                "{} returned an empty token",
                self.credentials.name()
            )));
        }
        Ok(credential.token)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent
    async fn send_with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, WireError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WireError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn list_refs(&self) -> Result<RefsResponse, WireError> {
        let token = self.bearer().await?;
        let url = self.location.refs_url();
        self.send_with_retry("list_refs", || {
            let request = self.http.get(&url).bearer_auth(&token);
            execute_json(request)
        })
        .await
    }

    /// Upload a pack with its ref updates.
    ///
    /// Tries multipart first; a 415 answer switches this client to the
    /// base64 JSON body for the rest of its life.
    pub async fn push(&self, updates: &[PushUpdate], pack: &[u8]) -> Result<PushResponse, WireError> {
        let token = self.bearer().await?;
        let url = self.location.push_url();

        if self.uses_multipart() {
            let metadata = serde_json::to_string(&PushMetadata {
                updates: updates.to_vec(),
            })?;
            let result = self
                .send_with_retry("push", || {
                    let request = multipart_form(&metadata, pack)
                        .map(|form| self.http.post(&url).bearer_auth(&token).multipart(form));
                    async move { execute_json::<PushResponse>(request?).await }
                })
                .await;
            match result {
                Err(WireError::UnsupportedMediaType) => {
                    debug!("server refused multipart push, falling back to JSON");
                    self.multipart.store(false, Ordering::Relaxed);
                }
                other => return other,
            }
        }

        let body = PushJsonBody::new(updates.to_vec(), pack);
        self.send_with_retry("push", || {
            let request = self.http.post(&url).bearer_auth(&token).json(&body);
            execute_json(request)
        })
        .await
    }

    /// Ask for a pack. `None` means the server has nothing for the request.
    pub async fn fetch(&self, wants: Option<Vec<String>>) -> Result<Option<FetchResponse>, WireError> {
        let token = self.bearer().await?;
        let url = self.location.fetch_url();
        let body = FetchRequest { wants };
        let result = self
            .send_with_retry("fetch", || {
                let request = self.http.post(&url).bearer_auth(&token).json(&body);
                execute_json::<FetchResponse>(request)
            })
            .await;
        match result {
            Ok(response) => Ok(Some(response)),
            Err(WireError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn multipart_form(metadata: &str, pack: &[u8]) -> Result<Form, WireError> {
    let metadata = Part::text(metadata.to_string()).mime_str("application/json")?;
    let pack = Part::bytes(pack.to_vec())
        .file_name("push.pack")
        .mime_str(PACK_MIME)?;
    Ok(Form::new().part(METADATA_FIELD, metadata).part(PACK_FIELD, pack))
}

async fn execute_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, WireError> {
    let response = check_status(request.send().await?).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| WireError::Encoding(format!("response body: {}", e)))
}

async fn check_status(response: Response) -> Result<Response, WireError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.error.message,
        Err(_) if text.is_empty() => status.canonical_reason().unwrap_or("").to_string(),
        Err(_) => text,
    };
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WireError::Auth(message),
        StatusCode::NOT_FOUND => WireError::NotFound(message),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => WireError::UnsupportedMediaType,
        StatusCode::UNPROCESSABLE_ENTITY => WireError::Encoding(message),
        _ => WireError::Rejected {
            status: status.as_u16(),
            message,
        },
    })
}
