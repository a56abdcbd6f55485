//! Callbacks for asynchronous session events
//!
//! Failures that happen away from a caller (transport death, peer errors,
//! login failures during reconnection, orphaned data frames) are reported
//! only through [`Hooks::on_error`]. The other hooks are for observability.
//!
//! # Example
//!
//! ```
//! use feedline_ws::hooks::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_error(|err| {
//!         eprintln!("stream error: {}", err);
//!     })
//!     .on_state_change(|from, to| {
//!         println!("{} -> {}", from, to);
//!     })
//!     .on_reconnect_attempt(|attempt, delay| {
//!         println!("Reconnecting (attempt {}), waiting {:?}", attempt, delay);
//!     });
//! ```

use crate::events::{DisconnectReason, SessionState};
use feedline_types::{ControlFrame, StreamError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for hook callbacks
pub type ErrorHook = Arc<dyn Fn(&StreamError) + Send + Sync>;
pub type ControlHook = Arc<dyn Fn(&ControlFrame) + Send + Sync>;
pub type StateHook = Arc<dyn Fn(SessionState, SessionState) + Send + Sync>;
pub type DisconnectHook = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;
pub type ReconnectAttemptHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;
pub type MessageHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Observability hooks container
///
/// All hooks are optional and run synchronously on the task that raised
/// the event (usually the dispatch task). Keep them fast.
#[derive(Default, Clone)]
pub struct Hooks {
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_control: Option<ControlHook>,
    pub(crate) on_state_change: Option<StateHook>,
    pub(crate) on_disconnect: Option<DisconnectHook>,
    pub(crate) on_reconnect_attempt: Option<ReconnectAttemptHook>,
    pub(crate) on_message: Option<MessageHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_error", &self.on_error.as_ref().map(|_| "..."))
            .field("on_control", &self.on_control.as_ref().map(|_| "..."))
            .field("on_state_change", &self.on_state_change.as_ref().map(|_| "..."))
            .field("on_disconnect", &self.on_disconnect.as_ref().map(|_| "..."))
            .field("on_reconnect_attempt", &self.on_reconnect_attempt.as_ref().map(|_| "..."))
            .field("on_message", &self.on_message.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Hooks {
    /// Create a new empty hooks container
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the error callback
    ///
    /// Receives transport deaths, peer errors, login failures during
    /// automatic reconnects, orphaned messages, failed unsubscribe frames
    /// and the terminal `ReconnectExhausted`.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a callback for control acknowledgements
    ///
    /// Called for subscribe/unsubscribe/login confirmations.
    pub fn on_control<F>(mut self, f: F) -> Self
    where
        F: Fn(&ControlFrame) + Send + Sync + 'static,
    {
        self.on_control = Some(Arc::new(f));
        self
    }

    /// Register a callback for state transitions
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(SessionState, SessionState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Register a callback for disconnections
    ///
    /// Called when a live connection is lost, before reconnection begins.
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback for reconnection attempts
    ///
    /// Called before each reconnection attempt with the attempt number
    /// (1-indexed) and the delay before this attempt.
    pub fn on_reconnect_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.on_reconnect_attempt = Some(Arc::new(f));
        self
    }

    /// Register a callback for received frames
    ///
    /// Called on each inbound frame with its size in bytes.
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub(crate) fn invoke_error(&self, error: &StreamError) {
        if let Some(ref hook) = self.on_error {
            hook(error);
        }
    }

    pub(crate) fn invoke_control(&self, frame: &ControlFrame) {
        if let Some(ref hook) = self.on_control {
            hook(frame);
        }
    }

    pub(crate) fn invoke_state_change(&self, from: SessionState, to: SessionState) {
        if let Some(ref hook) = self.on_state_change {
            hook(from, to);
        }
    }

    pub(crate) fn invoke_disconnect(&self, reason: &DisconnectReason) {
        if let Some(ref hook) = self.on_disconnect {
            hook(reason);
        }
    }

    pub(crate) fn invoke_reconnect_attempt(&self, attempt: u32, delay: Duration) {
        if let Some(ref hook) = self.on_reconnect_attempt {
            hook(attempt, delay);
        }
    }

    pub(crate) fn invoke_message(&self, size: usize) {
        if let Some(ref hook) = self.on_message {
            hook(size);
        }
    }
}
