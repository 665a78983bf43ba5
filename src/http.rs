use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::Host;
use crate::error::KiraError;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub retryable: bool,
}

pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!(
                "kira-accession-resolver/{}",
                env!("CARGO_PKG_VERSION")
            ))
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url).query(&request.params),
            Method::Post => self.client.post(&request.url).form(&request.params),
        };
        let response = builder.send().map_err(|err| TransportError {
            retryable: is_retryable_error(&err),
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| TransportError {
            retryable: true,
            message: err.to_string(),
        })?;
        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub max_backoff: Duration,
}

impl BackoffPolicy {
    /// `2^attempt` seconds, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Rate-limited, retrying access to the upstream hosts.
#[derive(Clone)]
pub struct Upstream {
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    api_key: Option<String>,
    backoff: BackoffPolicy,
}

impl Upstream {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        api_key: Option<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            clock,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            backoff,
        }
    }

    /// Sends `request` to `host`.
    ///
    /// `Ok(Some(body))` on success, `Ok(None)` when the host answered with a
    /// non-retryable status, `Err` once every attempt failed transiently.
    pub fn fetch(&self, host: Host, mut request: HttpRequest) -> Result<Option<String>, KiraError> {
        if host == Host::Ncbi {
            if let Some(key) = &self.api_key {
                request = request.param("api_key", key.clone());
            }
        }

        let attempts = self.backoff.attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            self.limiter.acquire(host);
            debug!(%host, url = %request.url, attempt, "request");
            match self.transport.send(&request) {
                Ok(response) if response.is_success() => return Ok(Some(response.body)),
                Ok(response) if is_retryable_status(response.status) => {
                    last_error = Some(status_error(host, response));
                }
                Ok(response) => {
                    debug!(%host, url = %request.url, status = response.status, "no record");
                    return Ok(None);
                }
                Err(err) if err.retryable => {
                    last_error = Some(http_error(host, err.message));
                }
                Err(err) => return Err(http_error(host, err.message)),
            }
            if attempt + 1 < attempts {
                let delay = self.backoff.delay(attempt);
                warn!(%host, url = %request.url, ?delay, "transient failure; backing off");
                self.clock.sleep(delay);
            }
        }
        Err(last_error.unwrap_or_else(|| http_error(host, "no attempt made".to_string())))
    }
}

fn status_error(host: Host, response: HttpResponse) -> KiraError {
    let status = response.status;
    let mut message: String = response.body.chars().take(200).collect();
    if message.trim().is_empty() {
        message = "request failed".to_string();
    }
    match host {
        Host::Ncbi => KiraError::NcbiStatus { status, message },
        Host::Ebi => KiraError::EbiStatus { status, message },
    }
}

fn http_error(host: Host, message: String) -> KiraError {
    match host {
        Host::Ncbi => KiraError::NcbiHttp(message),
        Host::Ebi => KiraError::EbiHttp(message),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
