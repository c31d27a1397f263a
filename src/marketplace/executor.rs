//! Resilient request execution: bounded retries, response classification and
//! pacing through the per-destination rate limiter.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::backoff::{jitter, looks_like_html, parse_retry_after, snippet, BackoffPolicy, RetryKind};
use super::rate_limit::{LimiterRegistry, RateLimitSettings};

const SNIPPET_LEN: usize = 300;

/// A single logical request. Headers are sent verbatim.
#[derive(Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: Url, body: Value) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Rate limiting key: one limiter per host.
    pub fn destination(&self) -> String {
        self.url.host_str().unwrap_or_default().to_string()
    }
}

/// Raw HTTP response as seen by the classifier. Header names are lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

/// The wire. Swapped for a scripted fake in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError>;
}

/// Terminal outcome of a logical request after classification and retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("authorization rejected (401)")]
    Unauthorized,
    #[error("transport failure after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },
    #[error("still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("blocked by anti-automation after {attempts} attempts")]
    Blocked { attempts: u32 },
    #[error("server error {status} after {attempts} attempts")]
    Server { status: u16, attempts: u32 },
    #[error("unexpected status {status}: {snippet}")]
    Status { status: u16, snippet: String },
    #[error("invalid JSON body: {0}")]
    Decode(String),
    #[error("rejected by destination: {0}")]
    Rejected(String),
}

impl RequestError {
    /// Only authorization failures unwind past a component boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RequestError::Unauthorized)
    }
}

/// Classifier verdict for a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Success(Value),
    Retry {
        kind: RetryKind,
        /// Server-provided delay; replaces the computed backoff when present.
        retry_after: Option<Duration>,
        status: Option<u16>,
        detail: String,
    },
    Fail(RequestError),
}

/// Classify one transport result. Order matters: transport errors, 401, 429,
/// anti-automation, transient 4xx/5xx, other statuses, then the body.
pub fn classify(result: Result<RawResponse, TransportError>, block_status: u16) -> Verdict {
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            return match err.kind {
                TransportErrorKind::Timeout | TransportErrorKind::Connect => Verdict::Retry {
                    kind: RetryKind::Transport,
                    retry_after: None,
                    status: None,
                    detail: err.message,
                },
                TransportErrorKind::Other => Verdict::Fail(RequestError::Transport {
                    attempts: 1,
                    message: err.message,
                }),
            }
        }
    };

    match response.status {
        401 => return Verdict::Fail(RequestError::Unauthorized),
        429 => {
            return Verdict::Retry {
                kind: RetryKind::RateLimited,
                retry_after: response
                    .header("retry-after")
                    .and_then(|v| parse_retry_after(v, Utc::now())),
                status: Some(429),
                detail: snippet(&response.body, SNIPPET_LEN),
            }
        }
        s if s == block_status => {
            return Verdict::Retry {
                kind: RetryKind::Blocked,
                retry_after: None,
                status: Some(s),
                detail: snippet(&response.body, SNIPPET_LEN),
            }
        }
        408 | 425 | 500 | 502 | 503 | 504 => {
            return Verdict::Retry {
                kind: RetryKind::Server,
                retry_after: None,
                status: Some(response.status),
                detail: snippet(&response.body, SNIPPET_LEN),
            }
        }
        200..=299 => {}
        other => {
            return Verdict::Fail(RequestError::Status {
                status: other,
                snippet: snippet(&response.body, SNIPPET_LEN),
            })
        }
    }

    if looks_like_html(&response.body) {
        return Verdict::Retry {
            kind: RetryKind::Blocked,
            retry_after: None,
            status: Some(response.status),
            detail: "HTML page instead of JSON".into(),
        };
    }
    if response.body.trim().is_empty() {
        return Verdict::Success(Value::Null);
    }
    match serde_json::from_str::<Value>(&response.body) {
        Ok(value) => Verdict::Success(value),
        Err(err) => {
            let declared_html = response
                .header("content-type")
                .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
                .unwrap_or(false);
            if declared_html {
                Verdict::Retry {
                    kind: RetryKind::Blocked,
                    retry_after: None,
                    status: Some(response.status),
                    detail: "non-JSON body declared as HTML".into(),
                }
            } else {
                Verdict::Fail(RequestError::Decode(format!(
                    "{}: {}",
                    err,
                    snippet(&response.body, SNIPPET_LEN)
                )))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Status code the destination uses for anti-bot challenges.
    pub block_status: u16,
    pub jitter: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            block_status: 498,
            jitter: Duration::from_millis(750),
            backoff: BackoffPolicy::default(),
        }
    }
}

pub struct Executor {
    transport: Arc<dyn Transport>,
    limiters: LimiterRegistry,
    policy: RetryPolicy,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, limits: RateLimitSettings, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiters: LimiterRegistry::new(limits),
            policy,
        }
    }

    pub fn limiters(&self) -> &LimiterRegistry {
        &self.limiters
    }

    /// Issue `request` until it succeeds, fails terminally, or attempts run out.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, RequestError> {
        let limiter = self.limiters.for_destination(&request.destination());
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let permit = limiter.acquire().await;
            let sent = self.transport.send(request).await;
            permit.release();

            let (kind, retry_after, status, detail) = match classify(sent, self.policy.block_status) {
                Verdict::Success(value) => {
                    limiter.relax();
                    debug!(url = %request.url, attempt, "request succeeded");
                    return Ok(value);
                }
                Verdict::Fail(err) => {
                    warn!(url = %request.url, attempt, error = %err, "request failed");
                    return Err(err);
                }
                Verdict::Retry { kind, retry_after, status, detail } => (kind, retry_after, status, detail),
            };

            if kind == RetryKind::RateLimited {
                limiter.punish();
            }
            if attempt >= max_attempts {
                let err = match kind {
                    RetryKind::Transport => RequestError::Transport { attempts: attempt, message: detail },
                    RetryKind::RateLimited => RequestError::RateLimited { attempts: attempt },
                    RetryKind::Blocked => RequestError::Blocked { attempts: attempt },
                    RetryKind::Server => RequestError::Server {
                        status: status.unwrap_or_default(),
                        attempts: attempt,
                    },
                };
                warn!(url = %request.url, attempt, error = %err, "giving up on request");
                return Err(err);
            }

            let wait = match retry_after {
                Some(server_delay) => server_delay,
                None => self.policy.backoff.delay(attempt, kind) + jitter(self.policy.jitter),
            };
            info!(
                url = %request.url,
                attempt,
                max_attempts,
                ?kind,
                ?status,
                wait_ms = wait.as_millis() as u64,
                detail = %detail,
                "retrying request"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

/// Production transport on top of `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    TransportError {
        kind,
        message: err.to_string(),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self.http.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let res = builder.send().await.map_err(transport_error)?;
        let status = res.status();
        let headers = res
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
            .collect();
        let body = res.text().await.map_err(transport_error)?;
        if status == StatusCode::OK {
            debug!(url = %request.url, bytes = body.len(), "response received");
        }
        Ok(RawResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}
