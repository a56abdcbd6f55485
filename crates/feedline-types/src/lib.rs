//! Shared types for the feedline streaming client
//!
//! This crate holds the wire-level vocabulary used across the workspace.
//! It has minimal dependencies and can be used independently of the
//! WebSocket runtime.
//!
//! # Key Types
//!
//! - [`ChannelKey`] - (channel, instrument) pair identifying one stream
//! - [`Request`], [`LoginArgs`] - Outbound protocol frames
//! - [`InboundFrame`] - Decoded inbound frame (control, data, pong, unrecognized)
//! - [`StreamError`], [`TransportError`] - Error taxonomy
//! - [`ErrorCodeKind`] - Classification of peer-reported error codes
//! - [`TickerData`], [`TradeData`], [`BookData`] - Typed push payloads

pub mod channel;
pub mod error;
pub mod error_codes;
pub mod frames;
pub mod models;

// Re-export commonly used types
pub use channel::*;
pub use error::*;
pub use error_codes::*;
pub use frames::*;
pub use models::*;

// Re-export rust_decimal for users
pub use rust_decimal::Decimal;
