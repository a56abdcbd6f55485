//! Streaming session manager
//!
//! A [`StreamSession`] owns one logical connection to the streaming API.
//! It keeps the subscription registry across transport losses, logs in
//! again and replays every subscription after each reconnect, and stops
//! for good once closed or once the reconnect budget is spent.
//!
//! # Example
//!
//! ```no_run
//! use feedline_ws::{Consumer, SessionConfig, StreamSession};
//!
//! # async fn example() -> feedline_types::StreamResult<()> {
//! let session = StreamSession::new(SessionConfig::public())?;
//! session.connect().await?;
//!
//! session
//!     .subscribe("trades", "BTC-USDT", Consumer::callback(|event| {
//!         println!("{} records on {}", event.data.len(), event.key);
//!     }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::events::{DisconnectReason, SessionState};
use crate::hooks::Hooks;
use crate::link::{wait_for_shutdown, Cooldown, Link, LinkContext, LinkFailure};
use crate::login::{AuthNegotiator, LoginWaiter};
use crate::registry::{Consumer, SubscriptionRegistry};
use crate::transport::{Connector, WsConnector};
use feedline_auth::{Credentials, HmacSha256Signer, Signer};
use feedline_types::{ChannelKey, Request, StreamError, StreamResult, TransportError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Builder for a [`StreamSession`]
pub struct SessionBuilder {
    config: SessionConfig,
    connector: Option<Arc<dyn Connector>>,
    signer: Option<Arc<dyn Signer>>,
    credentials: Option<Credentials>,
    hooks: Hooks,
}

impl SessionBuilder {
    /// Start from a configuration
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            connector: None,
            signer: None,
            credentials: None,
            hooks: Hooks::default(),
        }
    }

    /// Use a custom connector instead of the WebSocket one
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Use a custom login signer
    pub fn with_signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    /// Log in with these credentials on every connect
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Install observability hooks
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate the configuration and create the session
    pub fn build(self) -> StreamResult<StreamSession> {
        self.config.validate()?;
        if let Some(creds) = &self.credentials {
            creds.validate()?;
        }

        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(WsConnector::new().with_timeout(self.config.connect_timeout))
        });
        let signer = self.signer.unwrap_or_else(|| Arc::new(HmacSha256Signer));

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let registry = SubscriptionRegistry::new();
        let state = Arc::new(RwLock::new(SessionState::Disconnected));
        let login = LoginWaiter::default();
        let cooldown = Cooldown::default();

        let dispatcher = Dispatcher {
            registry: registry.clone(),
            state: state.clone(),
            hooks: self.hooks.clone(),
            login: login.clone(),
            cooldown: cooldown.clone(),
            cooldown_period: self.config.cooldown,
            codes: self.config.codes.clone(),
        };

        Ok(StreamSession {
            inner: Arc::new(SessionInner {
                url: self.config.resolved_url(),
                config: self.config,
                connector,
                signer,
                credentials: RwLock::new(self.credentials),
                registry,
                state,
                hooks: self.hooks,
                dispatcher,
                login,
                cooldown,
                link: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                failures_tx,
                failures_rx: Mutex::new(Some(failures_rx)),
                shutdown,
                supervisor: Mutex::new(None),
            }),
        })
    }
}

/// Handle to a streaming session
///
/// Dropping the handle stops the background tasks; call
/// [`close`](Self::close) to also close the transport and every queue
/// consumer deterministically.
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    url: String,
    connector: Arc<dyn Connector>,
    signer: Arc<dyn Signer>,
    credentials: RwLock<Option<Credentials>>,
    registry: SubscriptionRegistry,
    state: Arc<RwLock<SessionState>>,
    hooks: Hooks,
    dispatcher: Dispatcher,
    login: LoginWaiter,
    cooldown: Cooldown,
    /// Current connection; holding this lock serialises transitions,
    /// subscribe/unsubscribe sends and replay
    link: tokio::sync::Mutex<Option<Link>>,
    generation: AtomicU64,
    failures_tx: mpsc::UnboundedSender<LinkFailure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkFailure>>>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    /// Create a session with the WebSocket connector and default signer
    pub fn new(config: SessionConfig) -> StreamResult<Self> {
        SessionBuilder::new(config).build()
    }

    /// Start building a session
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Whether data is flowing
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Registered subscriptions, in registration order
    pub fn subscriptions(&self) -> Vec<ChannelKey> {
        self.inner.registry.keys()
    }

    /// URL this session connects to
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Replace the credentials used by the next login
    pub fn set_credentials(&self, credentials: Option<Credentials>) -> StreamResult<()> {
        if let Some(creds) = &credentials {
            creds.validate()?;
        }
        *self.inner.credentials.write() = credentials;
        Ok(())
    }

    /// Whether credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.inner.credentials.read().is_some()
    }

    /// Open the transport, log in if credentials are set, and replay the
    /// registry
    ///
    /// Errors are returned only here, on the first connect; once connected
    /// the session reconnects on its own and reports through the error
    /// hook.
    #[instrument(skip(self), fields(url = %self.inner.url))]
    pub async fn connect(&self) -> StreamResult<()> {
        let state = self.state();
        if state == SessionState::Closed {
            return Err(StreamError::SessionClosed);
        }
        if self.inner.supervisor.lock().is_some() {
            return Err(StreamError::invalid_state("Disconnected", state));
        }

        let mut shutdown = self.inner.shutdown.subscribe();
        self.inner.claim_connecting()?;
        self.inner.open_link(&mut shutdown).await?;

        let Some(failures) = self.inner.failures_rx.lock().take() else {
            return Err(StreamError::invalid_state("Disconnected", self.state()));
        };
        let handle = tokio::spawn(supervise(self.inner.clone(), failures, shutdown));
        *self.inner.supervisor.lock() = Some(handle);

        info!("Session active");
        Ok(())
    }

    /// Register a consumer for `channel`/`inst_id` and send a subscribe
    /// frame
    ///
    /// If the frame cannot be sent the subscription stays registered and
    /// is replayed on the next (re)connect; the send error is returned.
    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        inst_id: impl Into<String>,
        consumer: Consumer,
    ) -> StreamResult<()> {
        self.subscribe_key(ChannelKey::new(channel, inst_id), consumer)
            .await
    }

    /// [`subscribe`](Self::subscribe) with a prebuilt key
    #[instrument(skip_all, fields(%key))]
    pub async fn subscribe_key(&self, key: ChannelKey, consumer: Consumer) -> StreamResult<()> {
        if self.is_closed() {
            return Err(StreamError::SessionClosed);
        }
        if key.is_private() && !self.has_credentials() {
            return Err(StreamError::AuthRequired {
                channel: key.channel.clone(),
            });
        }

        let slot = self.inner.link.lock().await;
        if self.is_closed() {
            return Err(StreamError::SessionClosed);
        }
        self.inner.registry.add(key.clone(), consumer)?;

        let link = match slot.as_ref() {
            Some(link) if self.is_active() => link,
            _ => {
                debug!("Not connected; subscription will be sent on connect");
                return Err(TransportError::NotConnected.into());
            }
        };

        let frame = Request::subscribe(vec![key]).to_json()?;
        link.writer().send(&frame).await?;
        debug!("Subscribe sent");
        Ok(())
    }

    /// Remove the subscription for `channel`/`inst_id` and send an
    /// unsubscribe frame
    ///
    /// The registry entry is gone once this returns `Ok`; a failed send is
    /// reported through the error hook only.
    pub async fn unsubscribe(
        &self,
        channel: impl Into<String>,
        inst_id: impl Into<String>,
    ) -> StreamResult<()> {
        self.unsubscribe_key(&ChannelKey::new(channel, inst_id)).await
    }

    /// [`unsubscribe`](Self::unsubscribe) with a prebuilt key
    #[instrument(skip_all, fields(%key))]
    pub async fn unsubscribe_key(&self, key: &ChannelKey) -> StreamResult<()> {
        let slot = self.inner.link.lock().await;
        self.inner.registry.remove(key)?;

        match slot.as_ref() {
            Some(link) if self.is_active() => {
                let frame = Request::unsubscribe(vec![key.clone()]).to_json()?;
                if let Err(e) = link.writer().send(&frame).await {
                    warn!(error = %e, "Unsubscribe send failed");
                    self.inner.hooks.invoke_error(&e.into());
                }
            }
            _ => debug!("Not connected; unsubscribe frame skipped"),
        }
        Ok(())
    }

    /// Close the session
    ///
    /// Stops keepalive and any reconnect in progress, closes the transport
    /// and every queue consumer. Calling it again is a no-op.
    pub async fn close(&self) {
        if self.is_closed() && self.inner.supervisor.lock().is_none() {
            return;
        }
        info!("Closing session");

        self.inner.shutdown.send_replace(true);
        let supervisor = self.inner.supervisor.lock().take();
        if let Some(handle) = supervisor {
            handle.abort();
            let _ = handle.await;
        }

        self.inner.shut_down().await;
    }

    #[cfg(test)]
    fn has_background_tasks(&self) -> bool {
        self.inner
            .supervisor
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
        if let Some(handle) = self.inner.supervisor.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("subscriptions", &self.inner.registry.len())
            .finish()
    }
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Apply a lifecycle transition and notify the state hook
    fn transition(&self, to: SessionState) -> StreamResult<()> {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if from == SessionState::Closed {
                return Err(StreamError::SessionClosed);
            }
            if !from.can_transition_to(to) {
                return Err(StreamError::invalid_state(
                    format!("a state that can move to {}", to),
                    from,
                ));
            }
            *state = to;
            from
        };

        debug!(%from, %to, "State change");
        self.hooks.invoke_state_change(from, to);
        Ok(())
    }

    fn mark_disconnected(&self) {
        let state = self.state();
        if state != SessionState::Disconnected && state != SessionState::Closed {
            let _ = self.transition(SessionState::Disconnected);
        }
    }

    /// Move Disconnected to Connecting in one step
    ///
    /// Only the caller that wins this transition may open a connection.
    fn claim_connecting(&self) -> StreamResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                SessionState::Disconnected => *state = SessionState::Connecting,
                SessionState::Closed => return Err(StreamError::SessionClosed),
                other => return Err(StreamError::invalid_state("Disconnected", other)),
            }
        }

        debug!(from = %SessionState::Disconnected, to = %SessionState::Connecting, "State change");
        self.hooks
            .invoke_state_change(SessionState::Disconnected, SessionState::Connecting);
        Ok(())
    }

    /// Connect, log in, go Active and replay; on failure the session is
    /// left Disconnected (or Closed if that happened meanwhile)
    ///
    /// The caller must have won [`claim_connecting`](Self::claim_connecting).
    async fn open_link(&self, shutdown: &mut watch::Receiver<bool>) -> StreamResult<()> {
        let mut slot = self.link.lock().await;
        if let Some(stale) = slot.take() {
            stale.shutdown().await;
        }

        match self.establish(shutdown).await {
            Ok(link) => {
                *slot = Some(link);
                Ok(())
            }
            Err(e) => {
                self.mark_disconnected();
                Err(e)
            }
        }
    }

    async fn establish(&self, shutdown: &mut watch::Receiver<bool>) -> StreamResult<Link> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, url = %self.url, "Opening connection");

        let connect = tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&self.url));
        let (sink, stream) = tokio::select! {
            _ = wait_for_shutdown(shutdown) => return Err(StreamError::SessionClosed),
            result = connect => result
                .map_err(|_| TransportError::Timeout(self.config.connect_timeout))??,
        };

        let link = Link::spawn(
            sink,
            stream,
            LinkContext {
                generation,
                keepalive: self.config.keepalive.clone(),
                dispatcher: self.dispatcher.clone(),
                cooldown: self.cooldown.clone(),
                failures: self.failures_tx.clone(),
                shutdown: shutdown.clone(),
            },
        );

        match self.activate(&link, shutdown).await {
            Ok(()) => Ok(link),
            Err(e) => {
                link.shutdown().await;
                Err(e)
            }
        }
    }

    async fn activate(&self, link: &Link, shutdown: &mut watch::Receiver<bool>) -> StreamResult<()> {
        let credentials = self.credentials.read().clone();
        if let Some(credentials) = credentials {
            self.transition(SessionState::Authenticating)?;

            let negotiator =
                AuthNegotiator::new(&*self.signer, &self.login, self.config.login_timeout);
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => {
                    self.login.disarm();
                    return Err(StreamError::SessionClosed);
                }
                result = negotiator.login(link.writer(), &credentials) => result?,
            }
        }

        self.transition(SessionState::Active)?;
        self.replay(link).await
    }

    /// Send one subscribe frame per registered key
    async fn replay(&self, link: &Link) -> StreamResult<()> {
        let keys = self.registry.keys();
        if keys.is_empty() {
            return Ok(());
        }

        info!(count = keys.len(), generation = link.generation(), "Replaying subscriptions");
        for key in keys {
            let frame = Request::subscribe(vec![key]).to_json()?;
            link.writer().send(&frame).await?;
        }
        Ok(())
    }

    /// Tear down the current link if `failure` belongs to it
    async fn handle_failure(&self, failure: &LinkFailure) -> bool {
        let mut slot = self.link.lock().await;
        let current = slot.as_ref().map(Link::generation);
        if current != Some(failure.generation) {
            debug!(
                generation = failure.generation,
                ?current,
                "Ignoring failure from a replaced connection"
            );
            return false;
        }

        if let Some(link) = slot.take() {
            link.shutdown().await;
        }
        self.mark_disconnected();
        drop(slot);

        warn!(error = %failure.error, "Connection lost");
        let error = StreamError::Transport(failure.error.clone());
        self.hooks.invoke_error(&error);
        self.hooks.invoke_disconnect(&DisconnectReason::from_error(&error));
        true
    }

    /// Retry until connected, out of attempts, or shut down
    ///
    /// Returns false when the session should stop supervising.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>, mut last_error: String) -> bool {
        let policy = &self.config.reconnect;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if !policy.should_reconnect(attempt) {
                let attempts = attempt - 1;
                error!(attempts, %last_error, "Reconnect attempts exhausted");
                self.hooks.invoke_error(&StreamError::ReconnectExhausted {
                    attempts,
                    last_error,
                });
                self.shut_down().await;
                return false;
            }

            let delay = policy.delay_with_jitter(attempt);
            info!(attempt, ?delay, "Reconnecting");
            self.hooks.invoke_reconnect_attempt(attempt, delay);

            tokio::select! {
                _ = wait_for_shutdown(shutdown) => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = self.claim_connecting() {
                debug!(error = %e, "Reconnect abandoned");
                return false;
            }
            match self.open_link(shutdown).await {
                Ok(()) => {
                    info!(attempt, "Reconnected");
                    return true;
                }
                Err(StreamError::SessionClosed) => return false,
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    self.hooks.invoke_error(&e);
                    last_error = e.to_string();
                }
            }
        }
    }

    /// Close the transport and queues and enter `Closed`
    async fn shut_down(&self) {
        self.shutdown.send_replace(true);

        let mut slot = self.link.lock().await;
        if let Some(link) = slot.take() {
            link.shutdown().await;
        }
        self.login.disarm();

        let from = {
            let mut state = self.state.write();
            let from = *state;
            *state = SessionState::Closed;
            from
        };
        drop(slot);

        if from != SessionState::Closed {
            self.hooks.invoke_state_change(from, SessionState::Closed);
            self.hooks.invoke_disconnect(&DisconnectReason::Shutdown);
        }

        let closed = self.registry.close_all();
        debug!(subscriptions = closed, "Session closed");
    }
}

/// Watches link failures and drives reconnection
async fn supervise(
    inner: Arc<SessionInner>,
    mut failures: mpsc::UnboundedReceiver<LinkFailure>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let failure = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => return,
            failure = failures.recv() => match failure {
                Some(failure) => failure,
                None => return,
            },
        };

        if !inner.handle_failure(&failure).await {
            continue;
        }
        if !inner.reconnect(&mut shutdown, failure.error.to_string()).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeepAliveConfig;
    use crate::reconnect::ReconnectConfig;
    use crate::registry::QueuePolicy;
    use crate::transport::{standard_responder, MockConnector};
    use feedline_types::PING;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig::public()
            .with_url("wss://mock.test/ws/public")
            .with_reconnect(ReconnectConfig::fixed(Duration::from_secs(3), 3))
    }

    fn session(connector: &MockConnector) -> StreamSession {
        StreamSession::builder(config())
            .with_connector(connector.clone())
            .build()
            .unwrap()
    }

    fn recorded_errors() -> (Hooks, Arc<Mutex<Vec<StreamError>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        (Hooks::new().on_error(move |e| sink.lock().push(e.clone())), errors)
    }

    /// Let spawned tasks run without moving far in virtual time
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn not_ping(frames: Vec<String>) -> Vec<String> {
        frames.into_iter().filter(|f| f != PING).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_subscribe() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.connect().await.unwrap();
        assert!(session.is_active());

        session
            .subscribe("trades", "BTC-USDT", Consumer::callback(|_| {}))
            .await
            .unwrap();
        assert_eq!(
            connector.subscribed_on(0),
            vec![ChannelKey::new("trades", "BTC-USDT")]
        );
        assert_eq!(session.subscriptions().len(), 1);

        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_size_tracks_net_adds() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();

        for inst in ["BTC-USDT", "ETH-USDT", "SOL-USDT", "XRP-USDT"] {
            session
                .subscribe("tickers", inst, Consumer::callback(|_| {}))
                .await
                .unwrap();
        }
        session.unsubscribe("tickers", "ETH-USDT").await.unwrap();

        assert_eq!(session.subscriptions().len(), 3);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_subscribe_keeps_original() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();

        let (first, mut first_rx) = Consumer::queue(8, QueuePolicy::DropNewest);
        let (second, mut second_rx) = Consumer::queue(8, QueuePolicy::DropNewest);
        session.subscribe("trades", "BTC-USDT", first).await.unwrap();

        let err = session.subscribe("trades", "BTC-USDT", second).await.unwrap_err();
        assert!(matches!(err, StreamError::AlreadySubscribed(_)));
        // Exactly one subscribe frame was sent
        assert_eq!(connector.subscribed_on(0).len(), 1);

        connector
            .server()
            .unwrap()
            .push(r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"tradeId":"9"}]}"#);
        settle().await;

        assert!(first_rx.try_recv().is_some());
        assert!(second_rx.try_recv().is_none());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_unknown() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();
        session
            .subscribe("tickers", "BTC-USDT", Consumer::callback(|_| {}))
            .await
            .unwrap();
        let sent_before = connector.sent().len();

        let err = session.unsubscribe("tickers", "DOGE-USDT").await.unwrap_err();
        assert!(matches!(err, StreamError::NotSubscribed(_)));
        assert_eq!(session.subscriptions().len(), 1);
        assert_eq!(connector.sent().len(), sent_before);
        assert!(session.is_active());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replays_every_subscription_once() {
        let connector = MockConnector::cooperative();
        let (hooks, errors) = recorded_errors();
        let disconnects = Arc::new(Mutex::new(Vec::new()));
        let hooks = {
            let disconnects = disconnects.clone();
            hooks.on_disconnect(move |reason| disconnects.lock().push(reason.clone()))
        };
        let session = StreamSession::builder(config())
            .with_connector(connector.clone())
            .with_hooks(hooks)
            .build()
            .unwrap();
        session.connect().await.unwrap();

        let keys: Vec<ChannelKey> = ["BTC-USDT", "ETH-USDT", "SOL-USDT"]
            .iter()
            .map(|inst| ChannelKey::new("books5", *inst))
            .chain([ChannelKey::new("trades", "BTC-USDT")])
            .collect();
        for key in &keys {
            session.subscribe_key(key.clone(), Consumer::callback(|_| {})).await.unwrap();
        }

        connector.server().unwrap().drop_connection();
        settle().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(disconnects.lock().len(), 1);
        assert!(matches!(errors.lock()[0], StreamError::Transport(_)));

        // Fixed 3s delay, then the replay
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert!(session.is_active());
        assert_eq!(connector.connection_count(), 2);

        let replayed = connector.subscribed_on(1);
        assert_eq!(replayed.len(), keys.len());
        let unique: HashSet<_> = replayed.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(replayed, keys);
        // Registry untouched by the reconnect
        assert_eq!(session.subscriptions(), keys);

        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_routing_and_orphans() {
        let connector = MockConnector::cooperative();
        let (hooks, errors) = recorded_errors();
        let session = StreamSession::builder(config())
            .with_connector(connector.clone())
            .with_hooks(hooks)
            .build()
            .unwrap();
        session.connect().await.unwrap();

        let (btc, mut btc_rx) = Consumer::queue(8, QueuePolicy::DropNewest);
        let (eth, mut eth_rx) = Consumer::queue(8, QueuePolicy::DropNewest);
        session.subscribe("trades", "BTC-USDT", btc).await.unwrap();
        session.subscribe("trades", "ETH-USDT", eth).await.unwrap();

        let server = connector.server().unwrap();
        server.push(r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"tradeId":"1"}]}"#);
        server.push(r#"{"arg":{"channel":"trades","instId":"DOGE-USDT"},"data":[{"tradeId":"2"}]}"#);
        settle().await;

        assert_eq!(btc_rx.try_recv().unwrap().key.inst_id, "BTC-USDT");
        assert!(btc_rx.try_recv().is_none());
        assert!(eth_rx.try_recv().is_none());

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], StreamError::OrphanedMessage(k) if k.inst_id == "DOGE-USDT"));
        drop(errors);

        assert!(session.is_active());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_timeout_schedules_reconnect() {
        // Server acknowledges everything but never answers ping
        let connector = MockConnector::new().with_responder(|frame| {
            if frame == PING {
                Vec::new()
            } else {
                standard_responder(frame)
            }
        });
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let hooks = {
            let attempts = attempts.clone();
            Hooks::new().on_reconnect_attempt(move |n, delay| attempts.lock().push((n, delay)))
        };
        let session = StreamSession::builder(config().with_keepalive(KeepAliveConfig::new(
            Duration::from_secs(20),
            Duration::from_secs(25),
        )))
        .with_connector(connector.clone())
        .with_hooks(hooks)
        .build()
        .unwrap();
        session.connect().await.unwrap();

        // Probe at 20s, nothing back by 45s
        tokio::time::sleep(Duration::from_secs(44)).await;
        assert!(session.is_active());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(attempts.lock().as_slice(), &[(1, Duration::from_secs(3))]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert!(session.is_active());
        assert_eq!(connector.connection_count(), 2);

        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_reconnect() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();
        session
            .subscribe("tickers", "BTC-USDT", Consumer::callback(|_| {}))
            .await
            .unwrap();

        // Next connect hangs for a minute
        connector.set_connect_delay(Some(Duration::from_secs(60)));
        connector.server().unwrap().drop_connection();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(session.state(), SessionState::Connecting);

        session.close().await;
        assert!(session.is_closed());
        assert!(!session.has_background_tasks());

        let sent = connector.sent().len();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(connector.sent().len(), sent);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.connection_count(), 1);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_closes() {
        let connector = MockConnector::cooperative();
        let (hooks, errors) = recorded_errors();
        let session = StreamSession::builder(config())
            .with_connector(connector.clone())
            .with_hooks(hooks)
            .build()
            .unwrap();
        session.connect().await.unwrap();
        let (consumer, mut rx) = Consumer::queue(4, QueuePolicy::DropNewest);
        session.subscribe("trades", "BTC-USDT", consumer).await.unwrap();

        connector.set_fail_connect(true);
        connector.server().unwrap().drop_connection();

        // Three attempts, 3s apart
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(session.is_closed());
        assert_eq!(connector.connect_count(), 4);

        let errors = errors.lock();
        assert!(matches!(
            errors.last(),
            Some(StreamError::ReconnectExhausted { attempts: 3, .. })
        ));
        assert!(rx.recv().await.is_none());

        assert!(matches!(session.connect().await, Err(StreamError::SessionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_before_connect_is_replayed() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);

        let err = session
            .subscribe("tickers", "BTC-USDT", Consumer::callback(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Transport(TransportError::NotConnected)
        ));
        assert_eq!(session.subscriptions().len(), 1);

        session.connect().await.unwrap();
        assert_eq!(
            connector.subscribed_on(0),
            vec![ChannelKey::new("tickers", "BTC-USDT")]
        );
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_login_flow() {
        let connector = MockConnector::cooperative();
        let states = Arc::new(Mutex::new(Vec::new()));
        let hooks = {
            let states = states.clone();
            Hooks::new().on_state_change(move |_, to| states.lock().push(to))
        };
        let session = StreamSession::builder(config().with_url("wss://mock.test/ws/private"))
            .with_connector(connector.clone())
            .with_credentials(Credentials::new("key", "secret", "pass"))
            .with_hooks(hooks)
            .build()
            .unwrap();

        session.connect().await.unwrap();
        session
            .subscribe("orders", "", Consumer::callback(|_| {}))
            .await
            .unwrap();

        let sent = not_ping(connector.sent_on(0));
        assert!(sent[0].contains(r#""op":"login""#));
        assert!(sent[1].contains(r#""op":"subscribe""#));
        assert_eq!(
            states.lock().as_slice(),
            &[
                SessionState::Connecting,
                SessionState::Authenticating,
                SessionState::Active
            ]
        );
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rejected() {
        let connector = MockConnector::new().with_responder(|frame| {
            if frame.contains(r#""op":"login""#) {
                vec![r#"{"event":"error","code":"60009","msg":"Login failed"}"#.to_string()]
            } else {
                standard_responder(frame)
            }
        });
        let session = StreamSession::builder(config())
            .with_connector(connector.clone())
            .with_credentials(Credentials::new("key", "bad-secret", "pass"))
            .build()
            .unwrap();

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, StreamError::AuthRejected { ref code, .. } if code == "60009"));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout() {
        let connector = MockConnector::new();
        let session = StreamSession::builder(config().with_login_timeout(Duration::from_secs(5)))
            .with_connector(connector.clone())
            .with_credentials(Credentials::new("key", "secret", "pass"))
            .build()
            .unwrap();

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, StreamError::AuthTimeout { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_channel_requires_credentials() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();

        let err = session
            .subscribe("positions", "", Consumer::callback(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::AuthRequired { .. }));
        assert!(session.subscriptions().is_empty());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_state_guards() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();

        assert!(matches!(
            session.connect().await,
            Err(StreamError::InvalidState { .. })
        ));

        session.close().await;
        session.close().await;
        assert!(matches!(session.connect().await, Err(StreamError::SessionClosed)));
        assert!(matches!(
            session.subscribe("trades", "BTC-USDT", Consumer::callback(|_| {})).await,
            Err(StreamError::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_connect_failure_is_returned() {
        let connector = MockConnector::cooperative();
        connector.fail_next_connect(TransportError::ConnectionFailed("refused".into()));
        let session = session(&connector);

        assert!(matches!(
            session.connect().await,
            Err(StreamError::Transport(TransportError::ConnectionFailed(_)))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);

        // A later connect may succeed
        session.connect().await.unwrap();
        assert!(session.is_active());
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_closes_queues() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();
        let (consumer, mut rx) = Consumer::queue(4, QueuePolicy::Block);
        session.subscribe("trades", "BTC-USDT", consumer).await.unwrap();

        session.close().await;
        assert!(rx.recv().await.is_none());
        assert!(session.subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_single_winner() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);

        // Hold the connection slot so both calls get past their entry checks
        let guard = session.inner.link.lock().await;
        let ((a, b), ()) = tokio::join!(
            async { tokio::join!(session.connect(), session.connect()) },
            async move {
                settle().await;
                drop(guard);
            }
        );

        assert!(a.is_ok() != b.is_ok());
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(StreamError::InvalidState { .. })));
        assert!(session.is_active());
        assert_eq!(connector.connection_count(), 1);

        session
            .subscribe("trades", "BTC-USDT", Consumer::callback(|_| {}))
            .await
            .unwrap();
        assert_eq!(connector.subscribed_on(0).len(), 1);
        session.close().await;
    }

    fn private_session(connector: &MockConnector, hooks: Hooks) -> StreamSession {
        StreamSession::builder(config().with_url("wss://mock.test/ws/private"))
            .with_connector(connector.clone())
            .with_credentials(Credentials::new("key", "secret", "pass"))
            .with_hooks(hooks)
            .build()
            .unwrap()
    }

    fn login_nonce(frame: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        value["args"][0]["nonce"].as_str().unwrap().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_logs_in_again_before_replay() {
        let connector = MockConnector::cooperative();
        let session = private_session(&connector, Hooks::new());
        session.connect().await.unwrap();
        session
            .subscribe("orders", "", Consumer::callback(|_| {}))
            .await
            .unwrap();

        connector.server().unwrap().drop_connection();
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert!(session.is_active());

        let first = not_ping(connector.sent_on(0));
        let second = not_ping(connector.sent_on(1));
        assert_eq!(second.len(), 2);
        assert!(second[0].contains(r#""op":"login""#));
        assert!(second[1].contains(r#""op":"subscribe""#));
        assert_ne!(login_nonce(&first[0]), login_nonce(&second[0]));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rejected_on_reconnect_counts_as_attempt() {
        let logins = Arc::new(AtomicUsize::new(0));
        let connector = {
            let logins = logins.clone();
            MockConnector::new().with_responder(move |frame| {
                if frame.contains(r#""op":"login""#) && logins.fetch_add(1, Ordering::SeqCst) > 0 {
                    vec![r#"{"event":"error","code":"60009","msg":"Login failed"}"#.to_string()]
                } else {
                    standard_responder(frame)
                }
            })
        };
        let (hooks, errors) = recorded_errors();
        let session = private_session(&connector, hooks);
        session.connect().await.unwrap();

        connector.server().unwrap().drop_connection();
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;

        // The rejection goes to the hook; callers are not held up
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(errors
            .lock()
            .iter()
            .any(|e| matches!(e, StreamError::AuthRejected { code, .. } if code == "60009")));
        assert!(matches!(
            session.subscribe("orders", "", Consumer::callback(|_| {})).await,
            Err(StreamError::Transport(TransportError::NotConnected))
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(session.is_closed());
        assert_eq!(connector.connect_count(), 4);
        assert!(matches!(
            errors.lock().last(),
            Some(StreamError::ReconnectExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_send_failure_reported() {
        let connector = MockConnector::cooperative();
        let (hooks, errors) = recorded_errors();
        let session = StreamSession::builder(config())
            .with_connector(connector.clone())
            .with_hooks(hooks)
            .build()
            .unwrap();
        session.connect().await.unwrap();
        session
            .subscribe("tickers", "BTC-USDT", Consumer::callback(|_| {}))
            .await
            .unwrap();

        connector.server().unwrap().break_writes();
        session.unsubscribe("tickers", "BTC-USDT").await.unwrap();

        assert!(session.subscriptions().is_empty());
        assert!(matches!(
            errors.lock().as_slice(),
            [StreamError::Transport(TransportError::SendFailed(_))]
        ));
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_send_failure_kept_and_replayed() {
        let connector = MockConnector::cooperative();
        let session = session(&connector);
        session.connect().await.unwrap();

        let server = connector.server().unwrap();
        server.break_writes();
        let err = session
            .subscribe("trades", "ETH-USDT", Consumer::callback(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Transport(TransportError::SendFailed(_))));
        assert_eq!(session.subscriptions(), vec![ChannelKey::new("trades", "ETH-USDT")]);
        assert!(connector.subscribed_on(0).is_empty());

        server.drop_connection();
        tokio::time::sleep(Duration::from_secs(3)).await;
        settle().await;
        assert!(session.is_active());
        assert_eq!(
            connector.subscribed_on(1),
            vec![ChannelKey::new("trades", "ETH-USDT")]
        );
        session.close().await;
    }
}
