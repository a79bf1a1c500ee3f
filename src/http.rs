use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const LOGGED_BODY_LIMIT: usize = 2000;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP status error: {status} {method} {url}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("gave up on {method} {url} after {attempts} attempts: {last}")]
    Exhausted {
        method: Method,
        url: String,
        attempts: u32,
        last: String,
    },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Failure below the HTTP layer. `retryable` marks timeouts and dropped
/// connections.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub retryable: bool,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            retryable: e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            message: e.to_string(),
        }
    }
}

/// One round trip, no retries.
pub trait Transport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        Ok(Response {
            status,
            content_type,
            retry_after,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th failed attempt: base, 2*base, 4*base...
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.base_delay * 2u32.pow(exponent)
    }

    /// Upper bound for a server-requested `Retry-After`.
    pub fn max_delay(&self) -> Duration {
        self.backoff(self.max_attempts)
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE
    )
}

pub fn truncate(text: &str) -> &str {
    match text.char_indices().nth(LOGGED_BODY_LIMIT) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct HttpClient<T> {
    transport: T,
    policy: RetryPolicy,
    verbose: bool,
}

impl<T: Transport> HttpClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, verbose: bool) -> Self {
        Self {
            transport,
            policy,
            verbose,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub fn into_transport(self) -> T {
        self.transport
    }

    pub async fn request(&self, request: Request) -> Result<Response, HttpError> {
        let method = request.method.clone();
        let url = request.url.clone();
        let mut attempt = 0;
        let mut previous_wait = Duration::ZERO;

        loop {
            attempt += 1;

            let (last, wait) = match self.transport.send(&request).await {
                Ok(response) if is_transient(response.status) => {
                    let body = response.text();
                    warn!(%method, %url, status = %response.status, attempt, body = %truncate(&body), "transient status");
                    let mut wait = self.policy.backoff(attempt);
                    if let Some(retry_after) = response.retry_after {
                        wait = wait.max(retry_after.min(self.policy.max_delay()));
                    }
                    (format!("{} {}", response.status, body), wait)
                }
                Ok(response)
                    if response.status.is_client_error() || response.status.is_server_error() =>
                {
                    let body = response.text();
                    error!(%method, %url, status = %response.status, body = %body, "request rejected");
                    return Err(HttpError::Status {
                        method,
                        url,
                        status: response.status,
                        body,
                    });
                }
                Ok(response) => {
                    if self.verbose {
                        info!(%method, %url, status = %response.status, body = %truncate(&response.text()), "response");
                    } else {
                        debug!(%method, %url, status = %response.status, "response");
                    }
                    return Ok(response);
                }
                Err(e) if e.retryable => {
                    warn!(%method, %url, error = %e, attempt, "transport failure");
                    (e.message, self.policy.backoff(attempt))
                }
                Err(e) => {
                    error!(%method, %url, error = %e, "transport failure");
                    return Err(HttpError::Transport {
                        url,
                        message: e.message,
                    });
                }
            };

            if attempt >= self.policy.max_attempts {
                error!(%method, %url, attempts = attempt, last = %last, "retries exhausted");
                return Err(HttpError::Exhausted {
                    method,
                    url,
                    attempts: attempt,
                    last,
                });
            }

            let wait = wait.max(previous_wait);
            previous_wait = wait;
            sleep(wait).await;
        }
    }
}
