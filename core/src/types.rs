//! Domain DTOs for the hub API.
//!
//! # Design
//! These mirror the mock-server's schema but are defined independently, so
//! the end-to-end test catches any drift between the two crates.

use serde::{Deserialize, Serialize};

/// Body of the login call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArmStatus {
    Disarmed,
    ArmedHome,
    Armed,
}

/// Current alarm state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArmState {
    pub status: ArmStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_via: Option<String>,
}

/// Request payload for arming or disarming the alarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetArmState {
    pub status: ArmStatus,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmartPlug {
    pub id: String,
    pub name: String,
    pub on: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSmartPlug {
    pub on: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoorLock {
    pub id: String,
    pub name: String,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDoorLock {
    pub locked: bool,
    pub code: String,
}
