//! Stateless request builder and response parser for the hub API.
//!
//! # Design
//! `HubApi` carries only the session endpoint paths. Each operation is split
//! into a `build_*` method that produces a relative-path `HttpRequest` and a
//! `parse_*` method that consumes the `HttpResponse`. The caller runs the
//! request through `RequestGate::execute`, which resolves the base URL,
//! tracks the request for the UI and recovers from expired sessions.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::{HttpRequest, HttpResponse};
use crate::preferences::Credentials;
use crate::types::{ArmState, DoorLock, LoginRequest, SetArmState, SetDoorLock, SetSmartPlug, SmartPlug};

#[derive(Debug, Clone)]
pub struct HubApi {
    login_path: String,
    logout_path: String,
}

impl HubApi {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            login_path: normalize_path(&config.login_path),
            logout_path: normalize_path(&config.logout_path),
        }
    }

    /// `true` for the login and logout endpoints, which are never retried
    /// after a 401.
    pub fn is_session_endpoint(&self, path: &str) -> bool {
        let path = normalize_path(path);
        path == self.login_path || path == self.logout_path
    }

    pub fn build_login(&self, credentials: &Credentials) -> Result<HttpRequest, GatewayError> {
        let body = LoginRequest {
            username: credentials.user_name.clone(),
            password: credentials.password.clone(),
        };
        Ok(HttpRequest::post(self.login_path.as_str())
            .with_json(&body)?
            .with_label("Logging in"))
    }

    pub fn build_logout(&self) -> HttpRequest {
        HttpRequest::post(self.logout_path.as_str())
    }

    pub fn build_get_arm_state(&self) -> HttpRequest {
        HttpRequest::get("/armstate").non_blocking()
    }

    pub fn build_set_arm_state(&self, input: &SetArmState) -> Result<HttpRequest, GatewayError> {
        Ok(HttpRequest::put("/armstate").with_json(input)?.with_label("Changing alarm state"))
    }

    pub fn build_list_smart_plugs(&self) -> HttpRequest {
        HttpRequest::get("/smartplugs").non_blocking()
    }

    pub fn build_set_smart_plug(&self, id: &str, on: bool) -> Result<HttpRequest, GatewayError> {
        HttpRequest::put(format!("/smartplugs/{id}")).with_json(&SetSmartPlug { on })
    }

    pub fn build_list_door_locks(&self) -> HttpRequest {
        HttpRequest::get("/doorlocks").non_blocking()
    }

    pub fn build_set_door_lock(&self, id: &str, input: &SetDoorLock) -> Result<HttpRequest, GatewayError> {
        let label = if input.locked { "Locking" } else { "Unlocking" };
        Ok(HttpRequest::put(format!("/doorlocks/{id}")).with_json(input)?.with_label(label))
    }

    pub fn parse_arm_state(&self, response: HttpResponse) -> Result<ArmState, GatewayError> {
        response.json()
    }

    pub fn parse_smart_plugs(&self, response: HttpResponse) -> Result<Vec<SmartPlug>, GatewayError> {
        response.json()
    }

    pub fn parse_smart_plug(&self, response: HttpResponse) -> Result<SmartPlug, GatewayError> {
        response.json()
    }

    pub fn parse_door_locks(&self, response: HttpResponse) -> Result<Vec<DoorLock>, GatewayError> {
        response.json()
    }

    pub fn parse_door_lock(&self, response: HttpResponse) -> Result<DoorLock, GatewayError> {
        response.json()
    }
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim().trim_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::types::ArmStatus;

    fn api() -> HubApi {
        HubApi::new(&GatewayConfig::default())
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn build_login_posts_credentials() {
        let creds = Credentials {
            user_name: "u".to_string(),
            password: "p".to_string(),
        };
        let req = api().build_login(&creds).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "/login");
        assert!(req.blocking);
        let body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["username"], "u");
        assert_eq!(body["password"], "p");
    }

    #[test]
    fn session_endpoints_follow_config() {
        let config = GatewayConfig {
            login_path: "cookie/".to_string(),
            ..GatewayConfig::default()
        };
        let api = HubApi::new(&config);
        assert!(api.is_session_endpoint("/cookie"));
        assert!(api.is_session_endpoint("/logout"));
        assert!(!api.is_session_endpoint("/login"));
        assert_eq!(api.build_logout().url, "/logout");
    }

    #[test]
    fn polling_reads_do_not_block() {
        assert!(!api().build_get_arm_state().blocking);
        assert!(!api().build_list_smart_plugs().blocking);
        assert!(!api().build_list_door_locks().blocking);
    }

    #[test]
    fn build_set_smart_plug_produces_put() {
        let req = api().build_set_smart_plug("kitchen", true).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "/smartplugs/kitchen");
        let body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["on"], true);
    }

    #[test]
    fn build_set_door_lock_labels_the_overlay() {
        let input = SetDoorLock {
            locked: false,
            code: "1234".to_string(),
        };
        let req = api().build_set_door_lock("front", &input).unwrap();
        assert_eq!(req.block_label.as_deref(), Some("Unlocking"));
    }

    #[test]
    fn parse_arm_state_success() {
        let state = api().parse_arm_state(ok(r#"{"status":"ARMED_HOME"}"#)).unwrap();
        assert_eq!(state.status, ArmStatus::ArmedHome);
        assert!(state.changed_via.is_none());
    }

    #[test]
    fn parse_smart_plugs_bad_json() {
        let err = api().parse_smart_plugs(ok("not json")).unwrap_err();
        assert!(matches!(err, GatewayError::Deserialization(_)));
    }
}
