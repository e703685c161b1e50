//! Read-only view of the stored hub URL and credentials.

use std::fmt;

use parking_lot::RwLock;

/// Credential source consumed by the precondition guard and the coordinator.
pub trait PreferenceStore: Send + Sync {
    fn api_url(&self) -> Option<String>;
    fn user_name(&self) -> Option<String>;
    fn password(&self) -> Option<String>;
}

/// Stored login for the governed API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
struct Values {
    api_url: Option<String>,
    user_name: Option<String>,
    password: Option<String>,
}

/// In-memory preference store. Blank values count as unset and the URL is
/// kept without a trailing slash.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<Values>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configured(api_url: &str, user_name: &str, password: &str) -> Self {
        let prefs = Self::new();
        prefs.set_api_url(Some(api_url));
        prefs.set_credentials(Some(user_name), Some(password));
        prefs
    }

    pub fn set_api_url(&self, api_url: Option<&str>) {
        self.values.write().api_url = normalize(api_url).map(|url| url.trim_end_matches('/').to_string());
    }

    pub fn set_credentials(&self, user_name: Option<&str>, password: Option<&str>) {
        let mut values = self.values.write();
        values.user_name = normalize(user_name);
        values.password = normalize(password);
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl PreferenceStore for MemoryPreferences {
    fn api_url(&self) -> Option<String> {
        self.values.read().api_url.clone()
    }

    fn user_name(&self) -> Option<String> {
        self.values.read().user_name.clone()
    }

    fn password(&self) -> Option<String> {
        self.values.read().password.clone()
    }
}
