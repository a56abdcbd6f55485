//! Streaming session manager for push-data WebSocket APIs
//!
//! This crate keeps one persistent connection to an exchange's streaming
//! interface and hides its failures from the caller.
//!
//! # Features
//!
//! - Subscription registry that survives reconnects and drives replay
//! - Application-level `ping`/`pong` keepalive with a liveness deadline
//! - Login for private channels with a fresh nonce on every attempt
//! - Bounded automatic reconnection
//! - Callback or bounded-queue consumers per channel
//! - Hooks for errors, state changes and reconnect attempts
//!
//! # Example
//!
//! ```no_run
//! use feedline_ws::{Consumer, QueuePolicy, SessionConfig, StreamSession};
//! use feedline_types::TickerData;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = StreamSession::new(SessionConfig::public())?;
//!     session.connect().await?;
//!
//!     let (consumer, mut tickers) = Consumer::queue(256, QueuePolicy::DropNewest);
//!     session.subscribe("tickers", "BTC-USDT", consumer).await?;
//!
//!     while let Some(event) = tickers.recv().await {
//!         for ticker in event.decode::<TickerData>()? {
//!             println!("{} last={}", ticker.inst_id, ticker.last);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoint;
pub mod events;
pub mod hooks;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod transport;

mod dispatch;
mod keepalive;
mod link;
mod login;

// Re-export main types
pub use config::{KeepAliveConfig, SessionConfig};
pub use endpoint::Endpoint;
pub use events::{DisconnectReason, PushEvent, SessionState};
pub use hooks::Hooks;
pub use reconnect::ReconnectConfig;
pub use registry::{Consumer, Delivery, QueuePolicy, QueueReceiver, SubscriptionRegistry};
pub use session::{SessionBuilder, StreamSession};
pub use transport::{Connector, FrameSink, FrameStream, WsConnector};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::{MockConnector, MockServer};
