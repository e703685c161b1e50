use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

const SESSION_COOKIE: &str = "hubsession";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArmStatus {
    Disarmed,
    ArmedHome,
    Armed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArmState {
    pub status: ArmStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_via: Option<String>,
}

#[derive(Deserialize)]
pub struct SetArmState {
    pub status: ArmStatus,
    pub code: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmartPlug {
    pub id: String,
    pub name: String,
    pub on: bool,
}

#[derive(Deserialize)]
pub struct SetSmartPlug {
    pub on: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoorLock {
    pub id: String,
    pub name: String,
    pub locked: bool,
}

#[derive(Deserialize)]
pub struct SetDoorLock {
    pub locked: bool,
    pub code: String,
}

#[derive(Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

/// Counters exposed on `GET /_mock/stats`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
    pub logins: u32,
    pub failed_logins: u32,
    pub denied: u32,
}

/// Account and alarm code the mock hub accepts.
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub username: String,
    pub password: String,
    pub code: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            username: "user".to_string(),
            password: "secret".to_string(),
            code: "1234".to_string(),
        }
    }
}

pub struct Hub {
    config: HubConfig,
    sessions: HashSet<Uuid>,
    arm: ArmState,
    plugs: HashMap<String, SmartPlug>,
    locks: HashMap<String, DoorLock>,
    stats: Stats,
}

impl Hub {
    fn new(config: HubConfig) -> Self {
        let plugs = [("kitchen", "Kitchen"), ("hall", "Hall lamp")]
            .into_iter()
            .map(|(id, name)| {
                let plug = SmartPlug {
                    id: id.to_string(),
                    name: name.to_string(),
                    on: false,
                };
                (plug.id.clone(), plug)
            })
            .collect();
        let locks = [("front", "Front door")]
            .into_iter()
            .map(|(id, name)| {
                let lock = DoorLock {
                    id: id.to_string(),
                    name: name.to_string(),
                    locked: true,
                };
                (lock.id.clone(), lock)
            })
            .collect();
        Self {
            config,
            sessions: HashSet::new(),
            arm: ArmState {
                status: ArmStatus::Disarmed,
                changed_via: None,
            },
            plugs,
            locks,
            stats: Stats::default(),
        }
    }
}

pub type Db = Arc<RwLock<Hub>>;

pub fn app() -> Router {
    app_with(HubConfig::default())
}

pub fn app_with(config: HubConfig) -> Router {
    let db: Db = Arc::new(RwLock::new(Hub::new(config)));
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/armstate", get(get_arm_state).put(set_arm_state))
        .route("/smartplugs", get(list_smart_plugs))
        .route("/smartplugs/{id}", put(set_smart_plug))
        .route("/doorlocks", get(list_door_locks))
        .route("/doorlocks/{id}", put(set_door_lock))
        .route("/_mock/expire-sessions", post(expire_sessions))
        .route("/_mock/stats", get(stats))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, HubConfig::default()).await
}

pub async fn run_with(listener: TcpListener, config: HubConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

/// Reject the request unless it carries a live session cookie.
async fn authorize(db: &Db, headers: &HeaderMap) -> Result<(), StatusCode> {
    let live = match session_id(headers) {
        Some(id) => db.read().await.sessions.contains(&id),
        None => false,
    };
    if live {
        return Ok(());
    }
    db.write().await.stats.denied += 1;
    debug!("request without a live session");
    Err(StatusCode::UNAUTHORIZED)
}

async fn login(State(db): State<Db>, Json(input): Json<Login>) -> Result<impl IntoResponse, StatusCode> {
    let mut hub = db.write().await;
    if input.username != hub.config.username || input.password != hub.config.password {
        hub.stats.failed_logins += 1;
        return Err(StatusCode::UNAUTHORIZED);
    }
    let id = Uuid::new_v4();
    hub.sessions.insert(id);
    hub.stats.logins += 1;
    info!(logins = hub.stats.logins, "session opened");
    let cookie = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly");
    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Json(serde_json::json!({}))))
}

async fn logout(State(db): State<Db>, headers: HeaderMap) -> StatusCode {
    if let Some(id) = session_id(&headers) {
        db.write().await.sessions.remove(&id);
    }
    StatusCode::OK
}

async fn get_arm_state(State(db): State<Db>, headers: HeaderMap) -> Result<Json<ArmState>, StatusCode> {
    authorize(&db, &headers).await?;
    Ok(Json(db.read().await.arm.clone()))
}

async fn set_arm_state(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<SetArmState>,
) -> Result<Json<ArmState>, StatusCode> {
    authorize(&db, &headers).await?;
    let mut hub = db.write().await;
    if input.code != hub.config.code {
        return Err(StatusCode::BAD_REQUEST);
    }
    hub.arm = ArmState {
        status: input.status,
        changed_via: Some("CODE".to_string()),
    };
    Ok(Json(hub.arm.clone()))
}

async fn list_smart_plugs(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Vec<SmartPlug>>, StatusCode> {
    authorize(&db, &headers).await?;
    let hub = db.read().await;
    let mut plugs: Vec<SmartPlug> = hub.plugs.values().cloned().collect();
    plugs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(plugs))
}

async fn set_smart_plug(
    State(db): State<Db>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<SetSmartPlug>,
) -> Result<Json<SmartPlug>, StatusCode> {
    authorize(&db, &headers).await?;
    let mut hub = db.write().await;
    let plug = hub.plugs.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    plug.on = input.on;
    Ok(Json(plug.clone()))
}

async fn list_door_locks(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Vec<DoorLock>>, StatusCode> {
    authorize(&db, &headers).await?;
    let hub = db.read().await;
    let mut locks: Vec<DoorLock> = hub.locks.values().cloned().collect();
    locks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(Json(locks))
}

async fn set_door_lock(
    State(db): State<Db>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<SetDoorLock>,
) -> Result<Json<DoorLock>, StatusCode> {
    authorize(&db, &headers).await?;
    let mut hub = db.write().await;
    if input.code != hub.config.code {
        return Err(StatusCode::BAD_REQUEST);
    }
    let lock = hub.locks.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    lock.locked = input.locked;
    Ok(Json(lock.clone()))
}

async fn expire_sessions(State(db): State<Db>) -> StatusCode {
    let mut hub = db.write().await;
    info!(expired = hub.sessions.len(), "expiring sessions");
    hub.sessions.clear();
    StatusCode::NO_CONTENT
}

async fn stats(State(db): State<Db>) -> Json<Stats> {
    Json(db.read().await.stats.clone())
}
