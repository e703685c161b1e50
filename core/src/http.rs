//! HTTP data model shared by the gate, the coordinator and the transport.
//!
//! # Design
//! Requests and responses are plain owned data. An `HttpRequest` is immutable
//! once dispatched: the coordinator replays the exact same value after a
//! re-login, so nothing here carries per-attempt state.
//!
//! A `url` without a scheme is a path relative to the governed API. It is
//! resolved against the configured base URL at dispatch time, after the
//! precondition guard has confirmed that a base URL exists.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::GatewayError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// One outbound call, together with how the UI should present it while it is
/// in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Show the full-screen block overlay while in flight.
    pub blocking: bool,
    /// Count towards the progress bar while in flight.
    pub show_spinner: bool,
    /// Text shown on the block overlay.
    pub block_label: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            blocking: true,
            show_spinner: true,
            block_label: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Serialize `payload` as the JSON body and set the content type.
    pub fn with_json<T: Serialize>(mut self, payload: &T) -> Result<Self, GatewayError> {
        let body = serde_json::to_vec(payload).map_err(|e| GatewayError::Serialization(e.to_string()))?;
        self.body = Some(body);
        Ok(self.with_header("content-type", "application/json"))
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn without_spinner(mut self) -> Self {
        self.show_spinner = false;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.block_label = Some(label.into());
        self
    }

    /// `true` when `url` carries no scheme and must be joined onto the
    /// governed API's base URL.
    pub fn is_relative(&self) -> bool {
        let has_scheme = |scheme: &str| {
            self.url
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        };
        !(has_scheme("http://") || has_scheme("https://"))
    }
}

/// A response with a 2xx status. Non-2xx statuses surface as
/// `TransportError::Status` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_slice(&self.body).map_err(|e| GatewayError::Deserialization(e.to_string()))
    }
}

/// Join a relative request path onto `base_url`, tolerating a missing or
/// doubled slash at the seam.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
