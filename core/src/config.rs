//! Gateway configuration.

use std::time::Duration;

use serde::Deserialize;

/// How the platform's native block overlay tracks visible instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    /// One overlay stays up for as long as any blocking request is in flight.
    Stacked,
    /// The native overlay can only hide the instance it showed last (iOS).
    /// A new blocking request hides the current instance before showing its
    /// own, or the older instance could never be hidden again.
    LatestInstanceOnly,
}

impl OverlayMode {
    pub fn for_target() -> Self {
        if cfg!(target_os = "ios") {
            OverlayMode::LatestInstanceOnly
        } else {
            OverlayMode::Stacked
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stacked" => Some(OverlayMode::Stacked),
            "latest_instance_only" | "latest" | "ios" => Some(OverlayMode::LatestInstanceOnly),
            _ => None,
        }
    }
}

impl Default for OverlayMode {
    fn default() -> Self {
        Self::for_target()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub overlay_mode: OverlayMode,
    /// Path of the login endpoint, relative to the API base URL.
    pub login_path: String,
    /// Path of the logout endpoint, relative to the API base URL.
    pub logout_path: String,
    /// Upper bound on one request attempt. `None` waits indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            overlay_mode: OverlayMode::default(),
            login_path: "/login".to_string(),
            logout_path: "/logout".to_string(),
            request_timeout_secs: None,
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `HUB_GATEWAY_*` environment variables.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(mode) = lookup("HUB_GATEWAY_OVERLAY_MODE").as_deref().and_then(OverlayMode::parse) {
            config.overlay_mode = mode;
        }
        if let Some(path) = lookup("HUB_GATEWAY_LOGIN_PATH") {
            config.login_path = path;
        }
        if let Some(path) = lookup("HUB_GATEWAY_LOGOUT_PATH") {
            config.logout_path = path;
        }
        if let Some(secs) = lookup("HUB_GATEWAY_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            config.request_timeout_secs = Some(secs);
        }
        config
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
