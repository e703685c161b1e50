//! In-flight request bookkeeping and the single request entry point.
//!
//! # Design
//! `RequestGate` owns the `InFlightCounters` and is the only thing that
//! mutates them. Each `on_start` hands out a `Ticket` that `on_end` consumes,
//! so a start can be ended at most once. `execute` wraps the ticket in a drop
//! guard, so a request whose caller goes away is still ended.
//!
//! Counter updates happen under the state lock and only record which UI
//! transitions they caused. The indicator and signal sink are called after
//! that lock is released, so observers may read `counters()` from inside a
//! hook. A separate re-entrant lock keeps the recorded transitions of
//! concurrent callers from interleaving.
//!
//! The hooks must never leave the UI stuck behind an overlay. Any panic in
//! the hooks, the progress indicator, or the dispatch itself is caught and
//! routed to `on_fatal_error`, which zeroes the counters and bumps the epoch.
//! Tickets from an earlier epoch are ignored when they end. A completion
//! signal is only emitted if its start signal actually went out.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error};
use uuid::Uuid;

use crate::auth::AuthRetryCoordinator;
use crate::config::{GatewayConfig, OverlayMode};
use crate::error::{GatewayError, TransportError};
use crate::guard::check_api;
use crate::http::{HttpRequest, HttpResponse};
use crate::preferences::PreferenceStore;
use crate::signal::{Signal, SignalSink};
use crate::transport::Transport;

/// The UI's block overlay and progress bar.
pub trait ProgressIndicator: Send + Sync {
    fn show_overlay(&self, label: Option<&str>);
    fn hide_overlay(&self);
    /// Start an indeterminate progress bar.
    fn start_progress(&self);
    /// Nudge the running progress bar forward.
    fn increment_progress(&self);
    fn complete_progress(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndicator;

impl ProgressIndicator for NoopIndicator {
    fn show_overlay(&self, _label: Option<&str>) {}
    fn hide_overlay(&self) {}
    fn start_progress(&self) {}
    fn increment_progress(&self) {}
    fn complete_progress(&self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlightCounters {
    pub total: u32,
    pub blocking: u32,
    pub spinner: u32,
}

impl InFlightCounters {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Proof that a request was counted by `on_start`.
#[derive(Debug)]
#[must_use = "a ticket must be passed to `RequestGate::on_end`"]
pub struct Ticket {
    id: Uuid,
    /// `None` when the start was wiped by a fatal reset before it finished.
    epoch: Option<u64>,
    blocking: bool,
    spinner: bool,
}

impl Ticket {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Default)]
struct GateState {
    counters: InFlightCounters,
    epoch: u64,
    /// `BLOCKING_STARTED` went out and has not been completed yet.
    blocking_announced: bool,
    /// Same for `NON_BLOCKING_STARTED`.
    spinner_announced: bool,
}

/// A UI transition recorded under the state lock, applied after it.
#[derive(Debug)]
enum UiEffect {
    Show(Option<String>),
    Hide,
    StartProgress,
    IncrementProgress,
    CompleteProgress,
    Emit(Signal),
}

pub struct RequestGate {
    state: Mutex<GateState>,
    ui: ReentrantMutex<()>,
    overlay_mode: OverlayMode,
    indicator: Arc<dyn ProgressIndicator>,
    signals: Arc<dyn SignalSink>,
    coordinator: AuthRetryCoordinator,
}

impl RequestGate {
    pub fn new(
        config: &GatewayConfig,
        transport: Arc<dyn Transport>,
        preferences: Arc<dyn PreferenceStore>,
        signals: Arc<dyn SignalSink>,
        indicator: Arc<dyn ProgressIndicator>,
    ) -> Self {
        let coordinator = AuthRetryCoordinator::new(config, transport, preferences, signals.clone());
        Self {
            state: Mutex::new(GateState::default()),
            ui: ReentrantMutex::new(()),
            overlay_mode: config.overlay_mode,
            indicator,
            signals,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &AuthRetryCoordinator {
        &self.coordinator
    }

    pub fn counters(&self) -> InFlightCounters {
        self.state.lock().counters
    }

    pub fn on_start(&self, request: &HttpRequest) -> Ticket {
        let id = Uuid::new_v4();
        let _ui = self.ui.lock();
        let mut effects = Vec::new();
        let epoch = {
            let mut state = self.state.lock();
            let counters = &mut state.counters;
            counters.total += 1;
            if request.blocking {
                counters.blocking += 1;
                if counters.blocking == 1 {
                    effects.push(UiEffect::Show(request.block_label.clone()));
                    effects.push(UiEffect::Emit(Signal::BlockingStarted {
                        label: request.block_label.clone(),
                    }));
                } else if self.overlay_mode == OverlayMode::LatestInstanceOnly {
                    effects.push(UiEffect::Hide);
                    effects.push(UiEffect::Show(request.block_label.clone()));
                }
            }
            if request.show_spinner {
                counters.spinner += 1;
                if counters.spinner == 1 {
                    effects.push(UiEffect::StartProgress);
                    effects.push(UiEffect::Emit(Signal::NonBlockingStarted));
                } else {
                    effects.push(UiEffect::IncrementProgress);
                }
            }
            debug!(%id, counters = ?state.counters, "request started");
            state.epoch
        };

        let epoch = match self.apply(effects, epoch) {
            Ok(()) => Some(epoch),
            Err(payload) => {
                error!(%id, panic = %panic_message(payload.as_ref()), "request start failed");
                self.on_fatal_error();
                None
            }
        };
        Ticket {
            id,
            epoch,
            blocking: request.blocking,
            spinner: request.show_spinner,
        }
    }

    pub fn on_end(&self, ticket: Ticket, succeeded: bool) {
        let Some(epoch) = ticket.epoch else {
            return;
        };
        let _ui = self.ui.lock();
        let mut effects = Vec::new();
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!(id = %ticket.id, "ticket predates a reset, ignoring");
                return;
            }
            let state = &mut *state;
            let counters = &mut state.counters;
            counters.total = counters.total.saturating_sub(1);
            if ticket.blocking {
                counters.blocking = counters.blocking.saturating_sub(1);
                if counters.blocking == 0 {
                    effects.push(UiEffect::Hide);
                    if std::mem::take(&mut state.blocking_announced) {
                        effects.push(UiEffect::Emit(Signal::BlockingCompleted));
                    }
                }
            }
            if ticket.spinner {
                counters.spinner = counters.spinner.saturating_sub(1);
                if counters.spinner == 0 {
                    effects.push(UiEffect::CompleteProgress);
                    if std::mem::take(&mut state.spinner_announced) {
                        effects.push(UiEffect::Emit(Signal::NonBlockingCompleted));
                    }
                }
            }
            debug!(id = %ticket.id, succeeded, counters = ?state.counters, "request ended");
        }

        if let Err(payload) = self.apply(effects, epoch) {
            error!(id = %ticket.id, panic = %panic_message(payload.as_ref()), "request end failed");
            self.on_fatal_error();
        }
    }

    /// Zero every counter and force the overlay and progress bar down.
    pub fn on_fatal_error(&self) {
        let _ui = self.ui.lock();
        let (epoch, blocking_announced, spinner_announced) = {
            let mut state = self.state.lock();
            let previous = std::mem::take(&mut state.counters);
            state.epoch += 1;
            error!(counters = ?previous, epoch = state.epoch, "resetting request gate");
            (
                state.epoch,
                std::mem::take(&mut state.blocking_announced),
                std::mem::take(&mut state.spinner_announced),
            )
        };

        if self.apply(vec![UiEffect::Hide, UiEffect::CompleteProgress], epoch).is_err() {
            error!("progress indicator failed while resetting");
        }
        let mut completed = Vec::new();
        if blocking_announced {
            completed.push(UiEffect::Emit(Signal::BlockingCompleted));
        }
        if spinner_announced {
            completed.push(UiEffect::Emit(Signal::NonBlockingCompleted));
        }
        if self.apply(completed, epoch).is_err() {
            error!("signal sink failed while resetting");
        }
    }

    /// Run recorded transitions in order. Must be called with `ui` held and
    /// the state lock released.
    fn apply(&self, effects: Vec<UiEffect>, epoch: u64) -> std::thread::Result<()> {
        catch_unwind(AssertUnwindSafe(|| {
            for effect in effects {
                match effect {
                    UiEffect::Show(label) => self.indicator.show_overlay(label.as_deref()),
                    UiEffect::Hide => self.indicator.hide_overlay(),
                    UiEffect::StartProgress => self.indicator.start_progress(),
                    UiEffect::IncrementProgress => self.indicator.increment_progress(),
                    UiEffect::CompleteProgress => self.indicator.complete_progress(),
                    UiEffect::Emit(signal) => self.emit_tracked(signal, epoch),
                }
            }
        }))
    }

    fn emit_tracked(&self, signal: Signal, epoch: u64) {
        let blocking = matches!(signal, Signal::BlockingStarted { .. });
        let spinner = signal == Signal::NonBlockingStarted;
        self.signals.emit(signal);
        if blocking || spinner {
            let mut state = self.state.lock();
            if state.epoch == epoch {
                if blocking {
                    state.blocking_announced = true;
                } else {
                    state.spinner_announced = true;
                }
            }
        }
    }

    /// Run `request` with UI bookkeeping and session recovery.
    ///
    /// Governed-API requests (relative paths, or absolute URLs under the
    /// configured base URL) pass the precondition guard first; a failed guard
    /// never reaches the gate or the network. Transport failures that reach
    /// the caller are also published as `Signal::HttpError`.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let request = self.coordinator.prepare(request)?;
        let tracked = Tracked {
            gate: self,
            ticket: Some(self.on_start(&request)),
        };

        let dispatched = AssertUnwindSafe(self.coordinator.send(request)).catch_unwind().await;
        let result = dispatched.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!(panic = %message, "request dispatch failed");
            self.on_fatal_error();
            Err(TransportError::Internal(message).into())
        });

        tracked.finish(result.is_ok());
        if let Err(GatewayError::Transport(err)) = &result {
            self.signals.emit(Signal::HttpError(err.clone()));
        }
        result
    }

    /// Log in with the stored credentials.
    pub async fn login(&self) -> Result<(), GatewayError> {
        let ctx = check_api(self.coordinator.preferences(), self.signals.as_ref())?;
        let request = self.coordinator.api().build_login(&ctx.credentials)?;
        self.execute(request).await.map(drop)
    }

    pub async fn logout(&self) -> Result<(), GatewayError> {
        let request = self.coordinator.api().build_logout();
        self.execute(request).await.map(drop)
    }
}

/// Ends its ticket on drop, so a cancelled `execute` is still counted out.
struct Tracked<'a> {
    gate: &'a RequestGate,
    ticket: Option<Ticket>,
}

impl Tracked<'_> {
    fn finish(mut self, succeeded: bool) {
        if let Some(ticket) = self.ticket.take() {
            self.gate.on_end(ticket, succeeded);
        }
    }
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            debug!(id = %ticket.id(), "request dropped before it settled");
            self.gate.on_end(ticket, false);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{mpsc, OnceLock, Weak};
    use std::time::Duration;

    use futures::future::{self, FutureExt};

    use super::*;
    use crate::preferences::MemoryPreferences;
    use crate::transport::InFlight;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Ui {
        Show(Option<String>),
        Hide,
        Start,
        Increment,
        Complete,
    }

    #[derive(Default)]
    struct Recorder {
        ui: Mutex<Vec<Ui>>,
        signals: Mutex<Vec<Signal>>,
        panic_on_show: bool,
    }

    impl ProgressIndicator for Recorder {
        fn show_overlay(&self, label: Option<&str>) {
            if self.panic_on_show {
                panic!("overlay unavailable");
            }
            self.ui.lock().push(Ui::Show(label.map(str::to_string)));
        }
        fn hide_overlay(&self) {
            self.ui.lock().push(Ui::Hide);
        }
        fn start_progress(&self) {
            self.ui.lock().push(Ui::Start);
        }
        fn increment_progress(&self) {
            self.ui.lock().push(Ui::Increment);
        }
        fn complete_progress(&self) {
            self.ui.lock().push(Ui::Complete);
        }
    }

    impl SignalSink for Recorder {
        fn emit(&self, signal: Signal) {
            self.signals.lock().push(signal);
        }
    }

    impl Recorder {
        fn count(&self, name: &str) -> usize {
            self.signals.lock().iter().filter(|s| s.name() == name).count()
        }
    }

    struct Idle;

    impl Transport for Idle {
        fn send(&self, _request: &HttpRequest) -> InFlight {
            future::pending().boxed()
        }
    }

    fn gate_with(mode: OverlayMode, recorder: Arc<Recorder>) -> RequestGate {
        let config = GatewayConfig {
            overlay_mode: mode,
            ..GatewayConfig::default()
        };
        RequestGate::new(
            &config,
            Arc::new(Idle),
            Arc::new(MemoryPreferences::new()),
            recorder.clone(),
            recorder,
        )
    }

    fn blocking(label: &str) -> HttpRequest {
        HttpRequest::put("/smartplugs/a").with_label(label).without_spinner()
    }

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![Vec::new()];
        }
        let mut out = Vec::new();
        for rest in permutations(n - 1) {
            for at in 0..=rest.len() {
                let mut order = rest.clone();
                order.insert(at, n - 1);
                out.push(order);
            }
        }
        out
    }

    #[test]
    fn counters_return_to_zero_for_any_interleaving() {
        let requests = [
            HttpRequest::get("/a"),
            HttpRequest::get("/b").non_blocking(),
            HttpRequest::get("/c").without_spinner(),
            HttpRequest::get("/d").non_blocking().without_spinner(),
            HttpRequest::get("/e"),
        ];

        for order in permutations(requests.len()) {
            // `eager` ends each request as soon as everything before it in
            // `order` has ended; otherwise all start before any ends.
            for eager in [false, true] {
                let recorder = Arc::new(Recorder::default());
                let gate = gate_with(OverlayMode::LatestInstanceOnly, recorder.clone());
                let mut tickets: Vec<Option<Ticket>> = requests.iter().map(|_| None).collect();
                let mut next = 0;

                for (i, request) in requests.iter().enumerate() {
                    tickets[i] = Some(gate.on_start(request));
                    while eager && next < order.len() {
                        match tickets[order[next]].take() {
                            Some(ticket) => gate.on_end(ticket, true),
                            None if order[next] > i => break,
                            None => {}
                        }
                        next += 1;
                    }
                }
                for &i in &order[next..] {
                    if let Some(ticket) = tickets[i].take() {
                        gate.on_end(ticket, false);
                    }
                }

                assert!(gate.counters().is_idle(), "order {order:?} eager {eager}");
                assert_eq!(recorder.count("BLOCKING_STARTED"), recorder.count("BLOCKING_COMPLETED"));
                assert_eq!(recorder.count("NON_BLOCKING_STARTED"), recorder.count("NON_BLOCKING_COMPLETED"));
                let overlay_last = recorder
                    .ui
                    .lock()
                    .iter()
                    .rev()
                    .find(|u| matches!(u, Ui::Show(_) | Ui::Hide))
                    .cloned();
                assert_eq!(overlay_last, Some(Ui::Hide));
            }
        }
    }

    #[test]
    fn partially_ended_counters_match_what_is_in_flight() {
        let recorder = Arc::new(Recorder::default());
        let gate = gate_with(OverlayMode::Stacked, recorder.clone());

        let a = gate.on_start(&HttpRequest::get("/a"));
        let b = gate.on_start(&HttpRequest::get("/b").non_blocking());
        gate.on_end(a, true);
        let c = gate.on_start(&HttpRequest::get("/c").without_spinner());
        assert_eq!(
            gate.counters(),
            InFlightCounters {
                total: 2,
                blocking: 1,
                spinner: 1
            }
        );
        gate.on_end(c, true);
        gate.on_end(b, true);
        assert!(gate.counters().is_idle());
    }

    #[test]
    fn latest_instance_overlay_is_hidden_before_reshow() {
        let recorder = Arc::new(Recorder::default());
        let gate = gate_with(OverlayMode::LatestInstanceOnly, recorder.clone());

        let x = gate.on_start(&blocking("X"));
        assert_eq!(gate.counters().blocking, 1);
        let y = gate.on_start(&blocking("Y"));
        assert_eq!(gate.counters().blocking, 2);
        gate.on_end(x, true);
        assert_eq!(gate.counters().blocking, 1);
        assert_eq!(
            *recorder.ui.lock(),
            vec![Ui::Show(Some("X".into())), Ui::Hide, Ui::Show(Some("Y".into()))]
        );
        gate.on_end(y, true);

        assert_eq!(gate.counters().blocking, 0);
        assert_eq!(recorder.ui.lock().last(), Some(&Ui::Hide));
        assert_eq!(recorder.count("BLOCKING_STARTED"), 1);
        assert_eq!(recorder.count("BLOCKING_COMPLETED"), 1);
    }

    #[test]
    fn stacked_overlay_is_shown_once() {
        let recorder = Arc::new(Recorder::default());
        let gate = gate_with(OverlayMode::Stacked, recorder.clone());

        let x = gate.on_start(&blocking("X"));
        let y = gate.on_start(&blocking("Y"));
        gate.on_end(x, true);
        gate.on_end(y, true);

        assert_eq!(*recorder.ui.lock(), vec![Ui::Show(Some("X".into())), Ui::Hide]);
        assert_eq!(recorder.count("BLOCKING_COMPLETED"), 1);
    }

    #[test]
    fn later_spinner_requests_advance_the_running_bar() {
        let recorder = Arc::new(Recorder::default());
        let gate = gate_with(OverlayMode::Stacked, recorder.clone());
        let spin = || HttpRequest::get("/armstate").non_blocking();

        let a = gate.on_start(&spin());
        let b = gate.on_start(&spin());
        let c = gate.on_start(&spin());
        gate.on_end(b, true);
        gate.on_end(a, true);
        gate.on_end(c, true);

        assert_eq!(
            *recorder.ui.lock(),
            vec![Ui::Start, Ui::Increment, Ui::Increment, Ui::Complete]
        );
        assert_eq!(recorder.count("NON_BLOCKING_STARTED"), 1);
        assert_eq!(recorder.count("NON_BLOCKING_COMPLETED"), 1);
    }

    #[test]
    fn fatal_reset_clears_counters_and_ignores_old_tickets() {
        let recorder = Arc::new(Recorder::default());
        let gate = gate_with(OverlayMode::Stacked, recorder.clone());

        let a = gate.on_start(&HttpRequest::get("/a"));
        let b = gate.on_start(&HttpRequest::get("/b"));
        gate.on_fatal_error();
        assert!(gate.counters().is_idle());
        assert_eq!(recorder.count("BLOCKING_COMPLETED"), 1);

        let c = gate.on_start(&HttpRequest::get("/c"));
        gate.on_end(a, true);
        gate.on_end(b, true);
        assert_eq!(gate.counters().total, 1);
        gate.on_end(c, true);
        assert!(gate.counters().is_idle());
        assert_eq!(recorder.count("BLOCKING_COMPLETED"), 2);
    }

    #[test]
    fn panicking_indicator_resets_instead_of_propagating() {
        let recorder = Arc::new(Recorder {
            panic_on_show: true,
            ..Recorder::default()
        });
        let gate = gate_with(OverlayMode::Stacked, recorder.clone());

        let ticket = gate.on_start(&HttpRequest::get("/a"));
        assert!(gate.counters().is_idle());
        assert!(recorder.ui.lock().contains(&Ui::Hide));
        gate.on_end(ticket, false);
        assert!(gate.counters().is_idle());
        // The overlay never came up, so neither signal may go out.
        assert_eq!(recorder.count("BLOCKING_STARTED"), 0);
        assert_eq!(recorder.count("BLOCKING_COMPLETED"), 0);
        assert_eq!(recorder.count("NON_BLOCKING_COMPLETED"), 0);
    }

    /// Signal sink that reads the gate's counters while being notified.
    #[derive(Default)]
    struct CounterReader {
        gate: OnceLock<Weak<RequestGate>>,
        seen: Mutex<Vec<(&'static str, InFlightCounters)>>,
    }

    impl SignalSink for CounterReader {
        fn emit(&self, signal: Signal) {
            if let Some(gate) = self.gate.get().and_then(Weak::upgrade) {
                let counters = gate.counters();
                self.seen.lock().push((signal.name(), counters));
            }
        }
    }

    #[test]
    fn observers_can_read_counters_from_inside_a_signal() {
        let reader = Arc::new(CounterReader::default());
        let gate = Arc::new(RequestGate::new(
            &GatewayConfig::default(),
            Arc::new(Idle),
            Arc::new(MemoryPreferences::new()),
            reader.clone(),
            Arc::new(NoopIndicator),
        ));
        reader.gate.set(Arc::downgrade(&gate)).unwrap();

        let (done, finished) = mpsc::channel();
        let worker = gate.clone();
        std::thread::spawn(move || {
            let ticket = worker.on_start(&HttpRequest::get("/a"));
            worker.on_end(ticket, true);
            done.send(()).unwrap();
        });
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("gate hung while an observer read its counters");

        let busy = InFlightCounters {
            total: 1,
            blocking: 1,
            spinner: 1,
        };
        assert_eq!(
            *reader.seen.lock(),
            vec![
                ("BLOCKING_STARTED", busy),
                ("NON_BLOCKING_STARTED", busy),
                ("BLOCKING_COMPLETED", InFlightCounters::default()),
                ("NON_BLOCKING_COMPLETED", InFlightCounters::default()),
            ]
        );
    }

    #[test]
    fn dropped_execute_still_ends_its_ticket() {
        let recorder = Arc::new(Recorder::default());
        let gate = gate_with(OverlayMode::Stacked, recorder.clone());

        let pending = gate.execute(HttpRequest::get("https://weather.example/today"));
        assert!(pending.now_or_never().is_none());

        assert!(gate.counters().is_idle());
        assert_eq!(recorder.count("BLOCKING_COMPLETED"), 1);
    }
}
