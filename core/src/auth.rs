//! Transparent recovery from expired sessions on the governed API.
//!
//! # Design
//! The coordinator is a two-state machine (`Idle`, `Authenticating`) guarded
//! by one mutex. The first governed request that fails with 401 flips the
//! state inside a single lock hold and drives the login call itself. Every
//! other 401 that arrives while the login is running parks a `ResultSink` in
//! the session queue and waits.
//!
//! When the login settles, the trigger is re-submitted first and the queued
//! requests follow in arrival order. Each queued caller receives its own
//! in-flight future through its sink, so callers complete independently.
//! Queue hand-off and the state flip back to `Idle` happen under the same
//! lock hold, so no late arrival can be stranded in a drained queue. Replays
//! are submitted after that lock is released, so a transport may inspect the
//! coordinator while sending. If a replay panics, the sinks it had not
//! reached yet are dropped and their callers see `Cancelled`.
//!
//! Replays go straight to the transport. A replay that is denied again is
//! reported to its caller rather than starting another cycle.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::client::HubApi;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, PreconditionError, TransportError};
use crate::guard::check_api;
use crate::http::{join_url, HttpRequest, HttpResponse};
use crate::preferences::PreferenceStore;
use crate::signal::SignalSink;
use crate::transport::{InFlight, Transport};

/// Write side of a one-shot result. Only the first `settle` takes effect;
/// later calls return `false` and do nothing. Dropping an unsettled sink
/// settles its receiver with `TransportError::Cancelled`.
pub struct ResultSink<T> {
    sender: Option<oneshot::Sender<Result<T, GatewayError>>>,
}

/// Read side of a `ResultSink`.
pub struct SinkReceiver<T> {
    receiver: oneshot::Receiver<Result<T, GatewayError>>,
}

impl<T> ResultSink<T> {
    pub fn channel() -> (Self, SinkReceiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender: Some(sender) }, SinkReceiver { receiver })
    }

    pub fn settle(&mut self, outcome: Result<T, GatewayError>) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // The receiver may be gone if its caller gave up; that is
                // still a settlement from our side.
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn resolve(&mut self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&mut self, error: GatewayError) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.sender.is_none()
    }
}

impl<T> fmt::Debug for ResultSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink").field("settled", &self.is_settled()).finish()
    }
}

impl<T> SinkReceiver<T> {
    pub async fn wait(self) -> Result<T, GatewayError> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(TransportError::Cancelled.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Authenticating,
}

struct Queued {
    request: HttpRequest,
    sink: ResultSink<InFlight>,
}

/// Re-authentication cycle state. Owned and mutated by the coordinator only.
#[derive(Default)]
pub struct AuthSession {
    in_progress: bool,
    pending: VecDeque<Queued>,
}

impl AuthSession {
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("in_progress", &self.in_progress)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Returns the session to `Idle` if the future driving a login is dropped
/// before the login settles, rejecting everyone who queued behind it.
struct LoginCycle<'a> {
    session: &'a Mutex<AuthSession>,
    finished: bool,
}

impl<'a> LoginCycle<'a> {
    fn begin(session: &'a Mutex<AuthSession>) -> Self {
        Self { session, finished: false }
    }

    /// Drain the queue and return to `Idle` in one lock hold, then hand the
    /// drained queue to `settle` with the lock released.
    fn complete<R>(mut self, settle: impl FnOnce(VecDeque<Queued>) -> R) -> R {
        let queued = {
            let mut session = self.session.lock();
            session.in_progress = false;
            std::mem::take(&mut session.pending)
        };
        self.finished = true;
        settle(queued)
    }
}

impl Drop for LoginCycle<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let queued = {
            let mut session = self.session.lock();
            session.in_progress = false;
            std::mem::take(&mut session.pending)
        };
        warn!(rejected = queued.len(), "login cycle abandoned");
        for Queued { mut sink, .. } in queued {
            sink.reject(TransportError::Cancelled.into());
        }
    }
}

/// Intercepts 401s from the governed API and replays them after one
/// serialized re-login.
pub struct AuthRetryCoordinator {
    transport: Arc<dyn Transport>,
    preferences: Arc<dyn PreferenceStore>,
    signals: Arc<dyn SignalSink>,
    api: HubApi,
    session: Mutex<AuthSession>,
}

impl AuthRetryCoordinator {
    pub fn new(
        config: &GatewayConfig,
        transport: Arc<dyn Transport>,
        preferences: Arc<dyn PreferenceStore>,
        signals: Arc<dyn SignalSink>,
    ) -> Self {
        Self {
            transport,
            preferences,
            signals,
            api: HubApi::new(config),
            session: Mutex::new(AuthSession::default()),
        }
    }

    pub fn api(&self) -> &HubApi {
        &self.api
    }

    pub fn preferences(&self) -> &dyn PreferenceStore {
        self.preferences.as_ref()
    }

    pub fn state(&self) -> AuthState {
        if self.session.lock().in_progress() {
            AuthState::Authenticating
        } else {
            AuthState::Idle
        }
    }

    pub fn pending_len(&self) -> usize {
        self.session.lock().pending_len()
    }

    /// Run the precondition guard for governed-API requests and resolve
    /// relative paths against the configured base URL. Requests to other
    /// hosts pass unchanged.
    pub fn prepare(&self, mut request: HttpRequest) -> Result<HttpRequest, PreconditionError> {
        if request.is_relative() {
            let ctx = check_api(self.preferences.as_ref(), self.signals.as_ref())?;
            request.url = join_url(&ctx.base_url, &request.url);
        } else if self.governed_path(&request.url).is_some() {
            check_api(self.preferences.as_ref(), self.signals.as_ref())?;
        }
        Ok(request)
    }

    /// Path of `url` below the governed base URL, without query or fragment.
    fn governed_path(&self, url: &str) -> Option<String> {
        let base_url = self.preferences.api_url()?;
        let rest = url.strip_prefix(base_url.trim_end_matches('/'))?;
        if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('#')) {
            return None;
        }
        let path = rest.split(['?', '#']).next().unwrap_or_default();
        Some(format!("/{}", path.trim_matches('/')))
    }

    /// Whether a 401 on `request` starts (or joins) a re-login cycle.
    pub fn intercepts(&self, request: &HttpRequest) -> bool {
        match self.governed_path(&request.url) {
            Some(path) => !self.api.is_session_endpoint(&path),
            None => false,
        }
    }

    /// Send a prepared request, recovering from an expired session when the
    /// request is governed by this coordinator. Every other failure is
    /// returned unchanged.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        match self.transport.send(&request).await {
            Ok(response) => Ok(response),
            Err(err) if err.is_unauthorized() && self.intercepts(&request) => self.recover(request).await,
            Err(err) => {
                warn!(method = request.method.as_str(), url = %request.url, error = %err, "request failed");
                Err(err.into())
            }
        }
    }

    async fn recover(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let queued = {
            let mut session = self.session.lock();
            if session.in_progress {
                let (sink, receiver) = ResultSink::channel();
                session.pending.push_back(Queued {
                    request: request.clone(),
                    sink,
                });
                debug!(url = %request.url, queued = session.pending.len(), "waiting for running login");
                Some(receiver)
            } else {
                session.in_progress = true;
                None
            }
        };
        match queued {
            Some(receiver) => {
                let replay = receiver.wait().await?;
                Ok(replay.await?)
            }
            None => self.run_login_cycle(request).await,
        }
    }

    async fn run_login_cycle(&self, trigger: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let cycle = LoginCycle::begin(&self.session);
        info!(url = %trigger.url, "session rejected, logging in again");
        let login = self.login_with_stored_credentials().await;

        let replay = cycle.complete(|queued| match &login {
            Ok(_) => {
                info!(replays = queued.len() + 1, "login succeeded, replaying");
                let replay = self.transport.send(&trigger);
                for Queued { request, mut sink } in queued {
                    sink.resolve(self.transport.send(&request));
                }
                Some(replay)
            }
            Err(err) => {
                warn!(error = %err, rejected = queued.len() + 1, "login failed");
                for Queued { mut sink, .. } in queued {
                    sink.reject(err.clone());
                }
                None
            }
        });

        match (replay, login) {
            (Some(replay), _) => Ok(replay.await?),
            (None, Err(err)) => Err(err),
            (None, Ok(_)) => Err(TransportError::Internal("login succeeded without a replay".to_string()).into()),
        }
    }

    async fn login_with_stored_credentials(&self) -> Result<HttpResponse, GatewayError> {
        let ctx = check_api(self.preferences.as_ref(), self.signals.as_ref())?;
        let mut request = self.api.build_login(&ctx.credentials)?;
        request.url = join_url(&ctx.base_url, &request.url);
        Ok(self.transport.send(&request).await?)
    }
}
