//! WebSocket transport abstraction
//!
//! A [`Connector`] opens one connection and hands back its two halves: a
//! [`FrameSink`] for outbound text and a [`FrameStream`] that yields
//! inbound text until exactly one terminal condition (graceful close or a
//! read error). Splitting the halves lets the session read and write
//! concurrently, and lets tests swap the network for [`MockConnector`].
//!
//! # Example
//!
//! ```no_run
//! use feedline_ws::transport::{Connector, WsConnector};
//! use feedline_types::TransportError;
//!
//! async fn example() -> Result<(), TransportError> {
//!     let connector = WsConnector::new();
//!     let (mut sink, mut stream) = connector.connect("wss://openapi.blofin.com/ws/public").await?;
//!     sink.send("ping").await?;
//!     if let Some(response) = stream.recv().await? {
//!         println!("Received: {}", response);
//!     }
//!     sink.close().await
//! }
//! ```

use async_trait::async_trait;
use feedline_types::TransportError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Boxed outbound half
pub type BoxFrameSink = Box<dyn FrameSink>;

/// Boxed inbound half
pub type BoxFrameStream = Box<dyn FrameStream>;

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send a text frame
    async fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Close the connection; calling it again is a no-op
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a connection
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame
    ///
    /// Returns `Ok(None)` once when the peer closed gracefully.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}

/// Opens connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`
    async fn connect(&self, url: &str) -> Result<(BoxFrameSink, BoxFrameStream), TransportError>;
}

/// Real WebSocket connector using tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl WsConnector {
    /// Create a new connector
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip(self))]
    async fn connect(&self, url: &str) -> Result<(BoxFrameSink, BoxFrameStream), TransportError> {
        debug!("Connecting to WebSocket");

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected");
        let (write, read) = ws_stream.split();

        Ok((
            Box::new(WsSink {
                inner: Some(write),
            }),
            Box::new(WsFrameStream { inner: read }),
        ))
    }
}

struct WsSink {
    inner: Option<SplitSink<WsStream, Message>>,
}

#[async_trait]
impl FrameSink for WsSink {
    #[instrument(skip(self, text), fields(len = text.len()))]
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let sink = self.inner.as_mut().ok_or(TransportError::NotConnected)?;

        sink.send(Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut sink) = self.inner.take() {
            sink.close()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}

struct WsFrameStream {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|e| TransportError::Protocol(e.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Peer closed the connection");
                    return Ok(None);
                }
                // tungstenite queues the pong reply itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    trace!("Protocol-level ping/pong");
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{standard_responder, MockConnector, MockServer, Responder};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use feedline_types::{ChannelKey, PING, PONG};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Produces the frames a scripted server answers with for each
    /// client frame
    pub type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

    enum ServerEvent {
        Frame(String),
        Close,
        Error(TransportError),
    }

    /// Handle onto one mock connection, used to push frames or kill it
    #[derive(Clone)]
    pub struct MockServer {
        id: usize,
        tx: mpsc::UnboundedSender<ServerEvent>,
        dead: Arc<AtomicBool>,
    }

    impl MockServer {
        /// Connection number (0-indexed, in connect order)
        pub fn id(&self) -> usize {
            self.id
        }

        /// Deliver a text frame to the client
        pub fn push(&self, text: impl Into<String>) {
            let _ = self.tx.send(ServerEvent::Frame(text.into()));
        }

        /// Close the connection gracefully
        pub fn close(&self) {
            self.dead.store(true, Ordering::SeqCst);
            let _ = self.tx.send(ServerEvent::Close);
        }

        /// Make every later send fail while the read side stays open
        pub fn break_writes(&self) {
            self.dead.store(true, Ordering::SeqCst);
        }

        /// Fail the connection with a read error
        pub fn drop_connection(&self) {
            self.dead.store(true, Ordering::SeqCst);
            let _ = self.tx.send(ServerEvent::Error(TransportError::ReceiveFailed(
                "connection reset by peer".into(),
            )));
        }
    }

    #[derive(Default)]
    struct MockState {
        sent: Mutex<Vec<(usize, String)>>,
        servers: Mutex<Vec<MockServer>>,
        connects: AtomicUsize,
        failures: Mutex<VecDeque<TransportError>>,
        fail_always: AtomicBool,
        connect_delay: Mutex<Option<Duration>>,
        responder: Mutex<Option<Responder>>,
    }

    /// Mock connector for testing
    ///
    /// Every connection gets a [`MockServer`] handle. Frames the client
    /// sends are captured per connection and passed to the responder,
    /// whose output is delivered back on the same connection.
    #[derive(Clone, Default)]
    pub struct MockConnector {
        state: Arc<MockState>,
    }

    impl MockConnector {
        /// Connector with no responder
        pub fn new() -> Self {
            Self::default()
        }

        /// Connector that behaves like a cooperative server
        /// (see [`standard_responder`])
        pub fn cooperative() -> Self {
            Self::new().with_responder(standard_responder)
        }

        /// Set the responder
        pub fn with_responder<F>(self, f: F) -> Self
        where
            F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
        {
            *self.state.responder.lock() = Some(Arc::new(f));
            self
        }

        /// Fail the next connect with `error`
        pub fn fail_next_connect(&self, error: TransportError) {
            self.state.failures.lock().push_back(error);
        }

        /// Fail every connect until turned off
        pub fn set_fail_connect(&self, fail: bool) {
            self.state.fail_always.store(fail, Ordering::SeqCst);
        }

        /// Make connects take this long
        pub fn set_connect_delay(&self, delay: Option<Duration>) {
            *self.state.connect_delay.lock() = delay;
        }

        /// Number of connect calls so far, failed ones included
        pub fn connect_count(&self) -> usize {
            self.state.connects.load(Ordering::SeqCst)
        }

        /// Handle for the most recent successful connection
        pub fn server(&self) -> Option<MockServer> {
            self.state.servers.lock().last().cloned()
        }

        /// Number of successful connections
        pub fn connection_count(&self) -> usize {
            self.state.servers.lock().len()
        }

        /// Every frame the client sent, across connections
        pub fn sent(&self) -> Vec<String> {
            self.state.sent.lock().iter().map(|(_, f)| f.clone()).collect()
        }

        /// Frames the client sent on one connection
        pub fn sent_on(&self, connection: usize) -> Vec<String> {
            self.state
                .sent
                .lock()
                .iter()
                .filter(|(id, _)| *id == connection)
                .map(|(_, f)| f.clone())
                .collect()
        }

        /// Subscribe frames sent on one connection, as keys
        pub fn subscribed_on(&self, connection: usize) -> Vec<ChannelKey> {
            self.sent_on(connection)
                .iter()
                .filter_map(|frame| serde_json::from_str::<serde_json::Value>(frame).ok())
                .filter(|value| value["op"] == "subscribe")
                .flat_map(|value| {
                    serde_json::from_value::<Vec<ChannelKey>>(value["args"].clone())
                        .unwrap_or_default()
                })
                .collect()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(
            &self,
            _url: &str,
        ) -> Result<(BoxFrameSink, BoxFrameStream), TransportError> {
            self.state.connects.fetch_add(1, Ordering::SeqCst);

            let delay = *self.state.connect_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(error) = self.state.failures.lock().pop_front() {
                return Err(error);
            }
            if self.state.fail_always.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionFailed("mock connection failure".into()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let server = {
                let mut servers = self.state.servers.lock();
                let server = MockServer {
                    id: servers.len(),
                    tx,
                    dead: Arc::new(AtomicBool::new(false)),
                };
                servers.push(server.clone());
                server
            };

            Ok((
                Box::new(MockSink {
                    server,
                    state: self.state.clone(),
                    closed: false,
                }),
                Box::new(MockStream { rx, finished: false }),
            ))
        }
    }

    struct MockSink {
        server: MockServer,
        state: Arc<MockState>,
        closed: bool,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send(&mut self, text: &str) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::NotConnected);
            }
            if self.server.dead.load(Ordering::SeqCst) {
                return Err(TransportError::SendFailed("mock connection is down".into()));
            }

            self.state.sent.lock().push((self.server.id, text.to_string()));

            let responder = self.state.responder.lock().clone();
            if let Some(responder) = responder {
                for reply in responder(text) {
                    self.server.push(reply);
                }
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            if !self.closed {
                self.closed = true;
                self.server.close();
            }
            Ok(())
        }
    }

    struct MockStream {
        rx: mpsc::UnboundedReceiver<ServerEvent>,
        finished: bool,
    }

    #[async_trait]
    impl FrameStream for MockStream {
        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            if self.finished {
                return Err(TransportError::ConnectionClosed);
            }
            match self.rx.recv().await {
                Some(ServerEvent::Frame(text)) => Ok(Some(text)),
                Some(ServerEvent::Close) | None => {
                    self.finished = true;
                    Ok(None)
                }
                Some(ServerEvent::Error(e)) => {
                    self.finished = true;
                    Err(e)
                }
            }
        }
    }

    /// Answers like a well-behaved server: `pong` for `ping`, a success
    /// login event for a login and one acknowledgement per subscribe or
    /// unsubscribe argument
    pub fn standard_responder(frame: &str) -> Vec<String> {
        if frame == PING {
            return vec![PONG.to_string()];
        }

        let value: serde_json::Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        let op = value["op"].as_str().unwrap_or_default().to_string();
        match op.as_str() {
            "login" => vec![r#"{"event":"login","code":"0","msg":""}"#.to_string()],
            "subscribe" | "unsubscribe" => value["args"]
                .as_array()
                .map(|args| {
                    args.iter()
                        .map(|arg| serde_json::json!({"event": op, "arg": arg}).to_string())
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}
