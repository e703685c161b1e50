//! Error types for the gateway core.
//!
//! # Design
//! `PreconditionError` covers configuration that is missing before any I/O
//! happens. `TransportError` covers everything that happened on (or instead
//! of) the wire: a non-2xx status, a network failure, an internal panic caught
//! at the gate boundary, or a request whose driver went away before it
//! settled. Authorization failures are `TransportError::Status` with status
//! 401; the coordinator absorbs them where it can and otherwise lets them
//! through unchanged.

use thiserror::Error;

/// Configuration required before a governed-API call may be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("API URL is not specified")]
    UrlNotSpecified,

    #[error("API credentials are not specified")]
    CredentialsNotSpecified,
}

/// Failure of a single request attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No response was received.
    #[error("network failure: {0}")]
    Network(String),

    /// An unexpected failure inside the gateway itself.
    #[error("internal failure: {0}")]
    Internal(String),

    /// The future that was driving this request was dropped before it settled.
    #[error("request cancelled before it settled")]
    Cancelled,
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Errors returned to callers of `RequestGate::execute` and the `HubApi`
/// parse methods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Transport(inner) => inner.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}
