//! Client core for a home-automation hub API.
//!
//! # Overview
//! Sits between thin UI controllers and the network. Every call goes through
//! `RequestGate::execute`, which keeps the UI's loading indicators accurate
//! across overlapping requests and hands governed-API calls to the
//! `AuthRetryCoordinator`, which recovers from expired sessions with a single
//! serialized re-login.
//!
//! # Design
//! - Components are wired once by explicit construction: the transport has no
//!   dependency on the coordinator, the coordinator is built on the
//!   transport, and the gate owns the coordinator.
//! - `Transport::send` submits immediately and returns a `'static` future, so
//!   replay submission order is deterministic.
//! - `HubApi` is stateless and only builds and parses requests; the base URL
//!   and credentials come from a `PreferenceStore` at dispatch time.
//! - UI collaborators plug in through `ProgressIndicator` and `SignalSink`.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod guard;
pub mod http;
pub mod preferences;
pub mod signal;
pub mod transport;
pub mod types;

pub use auth::{AuthRetryCoordinator, AuthSession, AuthState, ResultSink, SinkReceiver};
pub use client::HubApi;
pub use config::{GatewayConfig, OverlayMode};
pub use error::{GatewayError, PreconditionError, TransportError};
pub use gate::{InFlightCounters, NoopIndicator, ProgressIndicator, RequestGate, Ticket};
pub use guard::{check_api, ApiContext};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use preferences::{Credentials, MemoryPreferences, PreferenceStore};
pub use signal::{BroadcastSignals, NoopSignals, Signal, SignalSink};
pub use transport::{check_status, InFlight, Transport, UreqTransport};
pub use types::{ArmState, ArmStatus, DoorLock, LoginRequest, SetArmState, SetDoorLock, SetSmartPlug, SmartPlug};
