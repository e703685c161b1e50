//! UI signals published by the gateway.
//!
//! The UI layer observes these to show toasts, prompt for settings, or drive
//! its own loading indicators. The gateway only guarantees that each signal is
//! emitted exactly once per triggering event.

use tokio::sync::broadcast;
use tracing::trace;

use crate::error::TransportError;

/// Capacity of the broadcast channel behind `BroadcastSignals`. Slow
/// observers lag and skip old signals rather than block the gateway.
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    UrlNotSpecified,
    CredentialsNotSpecified,
    BlockingStarted { label: Option<String> },
    BlockingCompleted,
    NonBlockingStarted,
    NonBlockingCompleted,
    /// A request ended in a failure the coordinator did not absorb.
    HttpError(TransportError),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::UrlNotSpecified => "URL_NOT_SPECIFIED",
            Signal::CredentialsNotSpecified => "CREDENTIALS_NOT_SPECIFIED",
            Signal::BlockingStarted { .. } => "BLOCKING_STARTED",
            Signal::BlockingCompleted => "BLOCKING_COMPLETED",
            Signal::NonBlockingStarted => "NON_BLOCKING_STARTED",
            Signal::NonBlockingCompleted => "NON_BLOCKING_COMPLETED",
            Signal::HttpError(_) => "HTTP_ERROR",
        }
    }
}

/// Publish side of the UI signal channel.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: Signal);
}

/// Fan-out sink backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSignals {
    sender: broadcast::Sender<Signal>,
}

impl BroadcastSignals {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSink for BroadcastSignals {
    fn emit(&self, signal: Signal) {
        trace!(signal = signal.name(), "emit");
        // No subscribers is fine: nobody is looking at the UI.
        let _ = self.sender.send(signal);
    }
}

/// Sink that drops every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSignals;

impl SignalSink for NoopSignals {
    fn emit(&self, _signal: Signal) {}
}
