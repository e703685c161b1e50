//! The network capability the coordinator is built on.
//!
//! # Design
//! `Transport::send` behaves like a promise-returning call: the request is
//! submitted when `send` is called, and the returned future only observes the
//! outcome. This lets the coordinator submit a batch of replays in a fixed
//! order and hand each caller its own future, so submission order is
//! deterministic while completion order is not.
//!
//! The transport never depends on the coordinator; the coordinator is layered
//! on top of it.

use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tracing::debug;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Outcome of a submitted request.
pub type InFlight = BoxFuture<'static, Result<HttpResponse, TransportError>>;

pub trait Transport: Send + Sync {
    /// Submit `request`. Non-2xx statuses resolve to `TransportError::Status`.
    fn send(&self, request: &HttpRequest) -> InFlight;
}

/// Map a raw status/body pair to the transport outcome.
pub fn check_status(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Result<HttpResponse, TransportError> {
    if (200..300).contains(&status) {
        return Ok(HttpResponse { status, headers, body });
    }
    Err(TransportError::Status {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Blocking `ureq` agent driven from the tokio blocking pool.
///
/// The agent keeps a cookie jar, so the session established by a login call
/// is carried by every later request, including verbatim replays.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        // Status interpretation happens in `check_status`, not in ureq.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> InFlight {
        if tokio::runtime::Handle::try_current().is_err() {
            return future::ready(Err(TransportError::Internal(
                "UreqTransport requires a tokio runtime".to_string(),
            )))
            .boxed();
        }
        let agent = self.agent.clone();
        let request = request.clone();
        debug!(method = request.method.as_str(), url = %request.url, "submit");
        let handle = tokio::task::spawn_blocking(move || execute_blocking(&agent, &request));
        async move {
            handle
                .await
                .map_err(|e| TransportError::Internal(format!("transport task failed: {e}")))?
        }
        .boxed()
    }
}

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &[(String, String)]) -> ureq::RequestBuilder<B> {
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

fn execute_blocking(agent: &ureq::Agent, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let url = request.url.as_str();
    let body = request.body.as_deref();
    let sent = match request.method {
        HttpMethod::Get => with_headers(agent.get(url), &request.headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(url), &request.headers).call(),
        HttpMethod::Post => {
            let builder = with_headers(agent.post(url), &request.headers);
            match body {
                Some(bytes) => builder.send(bytes),
                None => builder.send_empty(),
            }
        }
        HttpMethod::Put => {
            let builder = with_headers(agent.put(url), &request.headers);
            match body {
                Some(bytes) => builder.send(bytes),
                None => builder.send_empty(),
            }
        }
    };
    let mut response = sent.map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();
    let body = response
        .body_mut()
        .read_to_vec()
        .map_err(|e| TransportError::Network(e.to_string()))?;
    check_status(status, headers, body)
}
