//! Precondition check run before any governed-API request is dispatched.

use crate::error::PreconditionError;
use crate::preferences::{Credentials, PreferenceStore};
use crate::signal::{Signal, SignalSink};

/// Everything a governed-API call needs, read from the preference store in
/// one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiContext {
    pub base_url: String,
    pub credentials: Credentials,
}

/// Verify that a base URL and credentials are configured.
///
/// The URL is checked first. Each failed call emits exactly one signal and
/// never touches the network.
pub fn check_api(preferences: &dyn PreferenceStore, signals: &dyn SignalSink) -> Result<ApiContext, PreconditionError> {
    let Some(base_url) = preferences.api_url() else {
        signals.emit(Signal::UrlNotSpecified);
        return Err(PreconditionError::UrlNotSpecified);
    };
    match (preferences.user_name(), preferences.password()) {
        (Some(user_name), Some(password)) => Ok(ApiContext {
            base_url,
            credentials: Credentials { user_name, password },
        }),
        _ => {
            signals.emit(Signal::CredentialsNotSpecified);
            Err(PreconditionError::CredentialsNotSpecified)
        }
    }
}
