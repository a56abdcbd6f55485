//! Error types for the streaming client

use std::time::Duration;
use thiserror::Error;

use crate::channel::ChannelKey;
use crate::error_codes::ErrorCodeKind;

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    /// Not connected
    #[error("not connected")]
    NotConnected,

    /// Peer stopped answering keepalive probes
    #[error("no inbound frame within {0:?} of the last probe")]
    LivenessTimeout(Duration),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Main error type for streaming operations
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    // === Transport ===
    /// Connect, send or read failure; triggers a reconnect when it happens
    /// on a live connection
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // === Protocol ===
    /// Error reported by the peer
    #[error("peer error {code}: {msg}")]
    Protocol { code: String, msg: String },

    /// Failed to encode or decode a JSON frame
    #[error("invalid JSON: {message}")]
    InvalidJson { message: String, raw: Option<String> },

    // === Authentication ===
    /// No login acknowledgement in time
    #[error("login not acknowledged within {timeout:?}")]
    AuthTimeout { timeout: Duration },

    /// Peer refused the login
    #[error("login rejected ({code}): {msg}")]
    AuthRejected { code: String, msg: String },

    /// Private channel requested on a session without credentials
    #[error("channel {channel} requires credentials")]
    AuthRequired { channel: String },

    // === Subscription misuse ===
    /// A subscription for this key already exists
    #[error("already subscribed to {0}")]
    AlreadySubscribed(ChannelKey),

    /// No subscription exists for this key
    #[error("not subscribed to {0}")]
    NotSubscribed(ChannelKey),

    /// Data frame arrived for a key with no consumer
    #[error("orphaned message for {0}")]
    OrphanedMessage(ChannelKey),

    // === Session ===
    /// Reconnect budget used up; the session is closed
    #[error("reconnect failed after {attempts} attempts: {last_error}")]
    ReconnectExhausted { attempts: u32, last_error: String },

    /// Session was closed by the caller or by reconnect exhaustion
    #[error("session closed")]
    SessionClosed,

    /// Operation not valid in the current state
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StreamError {
    /// Create a protocol error from a peer code and message
    pub fn protocol(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Protocol {
            code: code.into(),
            msg: msg.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(expected: impl Into<String>, actual: impl ToString) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    /// Returns true if a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::AuthTimeout { .. } => true,
            Self::Protocol { code, msg } => ErrorCodeKind::classify(code, msg).is_transient(),
            _ => false,
        }
    }

    /// Returns true if the connection this error happened on must be replaced
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this error ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. } | Self::SessionClosed)
    }

    /// Returns true if the caller misused the API (reported synchronously)
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadySubscribed(_)
                | Self::NotSubscribed(_)
                | Self::AuthRequired { .. }
                | Self::InvalidState { .. }
                | Self::Configuration(_)
        )
    }

    /// Returns true if this is a rate limit or transient block from the peer
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::Protocol { code, msg } => ErrorCodeKind::classify(code, msg).is_transient(),
            _ => false,
        }
    }

    /// Returns suggested retry delay, if applicable
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport(TransportError::Timeout(_)) => Some(Duration::from_millis(500)),
            Self::Transport(_) => Some(Duration::from_millis(100)),
            Self::AuthTimeout { .. } => Some(Duration::from_secs(1)),
            Self::Protocol { .. } if self.is_rate_limit() => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;
