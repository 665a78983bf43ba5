#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kira_accession_resolver::clock::ManualClock;
use kira_accession_resolver::http::{
    BackoffPolicy, HttpRequest, HttpResponse, HttpTransport, TransportError, Upstream,
};
use kira_accession_resolver::rate_limit::RateLimiter;

#[derive(Clone)]
pub enum Reply {
    Body(String),
    Status(u16),
    Timeout,
}

pub struct Route {
    url_suffix: String,
    params: Vec<(String, String)>,
    reply: Reply,
}

impl Route {
    pub fn new(url_suffix: &str) -> Self {
        Self {
            url_suffix: url_suffix.to_string(),
            params: Vec::new(),
            reply: Reply::Status(404),
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.reply = Reply::Body(body.to_string());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.reply = Reply::Status(status);
        self
    }

    fn matches(&self, request: &HttpRequest) -> bool {
        request.url.ends_with(&self.url_suffix)
            && self
                .params
                .iter()
                .all(|(key, value)| request.param_value(key) == Some(value.as_str()))
    }
}

/// Canned upstream: first matching route answers, anything else gets `fallback`.
pub struct Router {
    routes: Vec<Route>,
    fallback: Reply,
    pub seen: Mutex<Vec<HttpRequest>>,
}

impl Router {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes,
            fallback: Reply::Status(404),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reply: Reply) -> Self {
        Self {
            routes: Vec::new(),
            fallback: reply,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.url.clone())
            .collect()
    }
}

impl HttpTransport for Router {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.seen.lock().unwrap().push(request.clone());
        let reply = self
            .routes
            .iter()
            .find(|route| route.matches(request))
            .map(|route| route.reply.clone())
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Body(body) => Ok(HttpResponse::ok(body)),
            Reply::Status(status) => Ok(HttpResponse::status(status)),
            Reply::Timeout => Err(TransportError {
                message: "operation timed out".to_string(),
                retryable: true,
            }),
        }
    }
}

pub fn upstream(router: Arc<Router>, clock: Arc<ManualClock>) -> Upstream {
    let limiter = Arc::new(RateLimiter::with_seed(clock.clone(), false, 7));
    Upstream::new(
        router,
        limiter,
        clock,
        None,
        BackoffPolicy {
            attempts: 2,
            max_backoff: Duration::from_secs(8),
        },
    )
}
