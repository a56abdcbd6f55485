//! Session states and push events

use chrono::{DateTime, Utc};
use feedline_types::{ChannelKey, DataFrame, FrameAction, StreamError, StreamResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// Session lifecycle state
///
/// `Disconnected → Connecting → Authenticating (private only) → Active`,
/// back to `Disconnected` on failure, and `Closed` once the caller closes
/// the session or reconnection gives up. `Closed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, login in flight
    Authenticating,
    /// Ready; data frames are dispatched
    Active,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Check whether a transition to `next` is allowed
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Authenticating) | (Connecting, Active) => true,
            (Connecting, Disconnected) => true,
            (Authenticating, Active) | (Authenticating, Disconnected) => true,
            (Active, Disconnected) => true,
            _ => false,
        }
    }

    /// Whether this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Active => "Active",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server closed the connection
    ServerClosed,
    /// Network error occurred
    NetworkError(String),
    /// No inbound frame within the liveness deadline
    LivenessTimeout,
    /// Client requested shutdown
    Shutdown,
}

impl DisconnectReason {
    /// Map a terminal transport error onto a reason
    pub fn from_error(error: &StreamError) -> Self {
        use feedline_types::TransportError;

        match error {
            StreamError::Transport(TransportError::ConnectionClosed) => Self::ServerClosed,
            StreamError::Transport(TransportError::LivenessTimeout(_)) => Self::LivenessTimeout,
            other => Self::NetworkError(other.to_string()),
        }
    }
}

/// A data frame delivered to a subscription's consumer
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    /// Stream the payload belongs to
    pub key: ChannelKey,
    /// Snapshot/update marker, when the channel sends one
    pub action: Option<FrameAction>,
    /// Raw payload records
    pub data: Vec<Value>,
    /// Local receive time
    pub received_at: DateTime<Utc>,
}

impl PushEvent {
    /// Build an event from a decoded data frame
    pub fn from_frame(frame: DataFrame) -> Self {
        Self {
            key: frame.arg,
            action: frame.action,
            data: frame.data,
            received_at: Utc::now(),
        }
    }

    /// Whether the payload is a full snapshot
    pub fn is_snapshot(&self) -> bool {
        self.action == Some(FrameAction::Snapshot)
    }

    /// Decode every record into a typed payload
    ///
    /// ```
    /// use feedline_types::{InboundFrame, TradeData};
    /// use feedline_ws::PushEvent;
    ///
    /// let text = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},
    ///     "data":[{"instId":"BTC-USDT","tradeId":"1","price":"100","size":"2","side":"buy","ts":"1"}]}"#;
    /// if let InboundFrame::Data(frame) = InboundFrame::parse(text) {
    ///     let trades: Vec<TradeData> = PushEvent::from_frame(frame).decode().unwrap();
    ///     assert_eq!(trades[0].trade_id, "1");
    /// }
    /// ```
    pub fn decode<T: DeserializeOwned>(&self) -> StreamResult<Vec<T>> {
        self.data
            .iter()
            .map(|record| {
                <T as serde::Deserialize>::deserialize(record).map_err(|e| StreamError::InvalidJson {
                    message: format!("{} payload: {}", self.key, e),
                    raw: Some(record.to_string()),
                })
            })
            .collect()
    }
}
