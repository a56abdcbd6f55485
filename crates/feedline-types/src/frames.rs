//! Outbound requests and inbound frame decoding
//!
//! Inbound text is decoded as a tagged variant: the literal keepalive reply
//! first, then the control-frame shape (`event` present), then the data-frame
//! shape (`arg` + `data`). Anything else is kept as [`InboundFrame::Unrecognized`]
//! rather than dropped.

use crate::channel::ChannelKey;
use crate::error::{StreamError, StreamResult};
use crate::error_codes::ErrorCodeKind;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Keepalive probe sent by the client
pub const PING: &str = "ping";

/// Keepalive reply sent by the server
pub const PONG: &str = "pong";

/// Code the server uses for a successful login
pub const SUCCESS_CODE: &str = "0";

/// Request operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// Subscribe to channels
    Subscribe,
    /// Unsubscribe from channels
    Unsubscribe,
    /// Authenticate the connection
    Login,
}

/// Outbound `{"op": ..., "args": [...]}` frame
#[derive(Debug, Clone, Serialize)]
pub struct Request<A> {
    /// Operation
    pub op: Op,
    /// Operation arguments
    pub args: Vec<A>,
}

impl Request<ChannelKey> {
    /// Subscribe request for the given keys
    pub fn subscribe(keys: Vec<ChannelKey>) -> Self {
        Self {
            op: Op::Subscribe,
            args: keys,
        }
    }

    /// Unsubscribe request for the given keys
    pub fn unsubscribe(keys: Vec<ChannelKey>) -> Self {
        Self {
            op: Op::Unsubscribe,
            args: keys,
        }
    }
}

impl Request<LoginArgs> {
    /// Login request
    pub fn login(args: LoginArgs) -> Self {
        Self {
            op: Op::Login,
            args: vec![args],
        }
    }
}

impl<A: Serialize> Request<A> {
    /// Serialize to the JSON text sent over the wire
    pub fn to_json(&self) -> StreamResult<String> {
        serde_json::to_string(self).map_err(|e| StreamError::InvalidJson {
            message: e.to_string(),
            raw: None,
        })
    }
}

/// Arguments of a login request
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginArgs {
    /// API key
    #[serde(rename = "apiKey")]
    pub api_key: String,
    /// API passphrase
    pub passphrase: String,
    /// Milliseconds since the Unix epoch, as text
    pub timestamp: String,
    /// Signature produced by the signer
    pub sign: String,
    /// Fresh per-attempt nonce
    pub nonce: String,
}

impl std::fmt::Debug for LoginArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginArgs")
            .field("api_key", &self.api_key)
            .field("passphrase", &"[REDACTED]")
            .field("timestamp", &self.timestamp)
            .field("sign", &"[REDACTED]")
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Kind of control event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Subscription confirmed
    Subscribe,
    /// Unsubscription confirmed
    Unsubscribe,
    /// Login result
    Login,
    /// Peer-reported error
    Error,
    /// Any other event name
    #[serde(other)]
    Other,
}

/// `{"event": ..., "arg": {...}, "code": ..., "msg": ...}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlFrame {
    /// Event kind
    pub event: EventKind,
    /// Channel the event refers to, if any; args without a channel
    /// (e.g. `{"instType":"SPOT"}`) decode as `None`
    #[serde(default, deserialize_with = "lenient_key")]
    pub arg: Option<ChannelKey>,
    /// Peer status code (string or number on the wire)
    #[serde(default, deserialize_with = "code_as_string")]
    pub code: Option<String>,
    /// Peer message
    #[serde(default)]
    pub msg: Option<String>,
}

impl ControlFrame {
    /// A control frame is successful unless it is an error event or
    /// carries a non-zero code
    pub fn is_success(&self) -> bool {
        if self.event == EventKind::Error {
            return false;
        }
        match self.code.as_deref() {
            None | Some("") | Some(SUCCESS_CODE) => true,
            Some(_) => false,
        }
    }

    /// Code, or empty string
    pub fn code_str(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }

    /// Message, or empty string
    pub fn msg_str(&self) -> &str {
        self.msg.as_deref().unwrap_or("")
    }

    /// Classify this frame's error code
    pub fn error_kind(&self) -> ErrorCodeKind {
        ErrorCodeKind::classify(self.code_str(), self.msg_str())
    }
}

/// Payload action on data frames that carry one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameAction {
    /// Full state
    Snapshot,
    /// Incremental change
    Update,
    /// Unknown action name
    #[serde(other)]
    Other,
}

/// `{"arg": {"channel", "instId"}, "action"?: ..., "data": [...]}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataFrame {
    /// Stream the payload belongs to
    pub arg: ChannelKey,
    /// Snapshot/update marker, when the channel sends one
    #[serde(default)]
    pub action: Option<FrameAction>,
    /// Payload records; an object payload becomes a single record
    #[serde(deserialize_with = "one_or_many")]
    pub data: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFrame {
    Control(ControlFrame),
    Data(DataFrame),
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Keepalive reply
    Pong,
    /// Subscribe/unsubscribe/login acknowledgement or peer error
    Control(ControlFrame),
    /// Channel payload
    Data(DataFrame),
    /// Text that matched no known shape
    Unrecognized(String),
}

impl InboundFrame {
    /// Decode one inbound text frame
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed == PONG {
            return Self::Pong;
        }

        match serde_json::from_str::<RawFrame>(trimmed) {
            Ok(RawFrame::Control(frame)) => Self::Control(frame),
            Ok(RawFrame::Data(frame)) => Self::Data(frame),
            Err(_) => Self::Unrecognized(text.to_string()),
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pong => "pong",
            Self::Control(_) => "control",
            Self::Data(_) => "data",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_key<'de, D>(deserializer: D) -> Result<Option<ChannelKey>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .and_then(|value| serde_json::from_value(value).ok()))
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}
