//! Inbound frame routing
//!
//! Runs on a connection's read task. Every frame counts as liveness (the
//! read loop records it before calling in here), then:
//!
//! - `pong` needs nothing further
//! - login events complete a pending login
//! - error events fail a pending login, or are classified: rate limit and
//!   block codes start a send cooldown, duplicate-subscription codes are
//!   ignored, anything else goes to the error hook
//! - subscribe/unsubscribe acknowledgements go to the control hook
//! - data frames reach their consumer once the session is `Active`

use crate::events::{PushEvent, SessionState};
use crate::hooks::Hooks;
use crate::link::Cooldown;
use crate::login::LoginWaiter;
use crate::registry::{Delivery, SubscriptionRegistry};
use feedline_types::{
    CodeTable, ControlFrame, DataFrame, ErrorCodeKind, EventKind, InboundFrame, StreamError,
    TransportError,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Routes decoded frames to consumers, the login waiter and hooks
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub registry: SubscriptionRegistry,
    pub state: Arc<RwLock<SessionState>>,
    pub hooks: Hooks,
    pub login: LoginWaiter,
    pub cooldown: Cooldown,
    pub cooldown_period: Duration,
    pub codes: CodeTable,
}

impl Dispatcher {
    /// Handle one inbound text frame
    pub(crate) async fn dispatch(&self, text: &str) {
        self.hooks.invoke_message(text.len());

        match InboundFrame::parse(text) {
            InboundFrame::Pong => trace!("Keepalive reply"),
            InboundFrame::Control(frame) => self.on_control(frame),
            InboundFrame::Data(frame) => self.on_data(frame).await,
            InboundFrame::Unrecognized(raw) => {
                debug!(len = raw.len(), raw = %truncate(&raw, 256), "Unrecognized frame");
            }
        }
    }

    /// Fail a pending login when the connection dies under it
    pub(crate) fn connection_lost(&self, error: &TransportError) {
        if self.login.complete(Err(error.clone().into())) {
            debug!("Pending login failed by connection loss");
        }
    }

    fn on_control(&self, frame: ControlFrame) {
        match frame.event {
            EventKind::Login => {
                let outcome = if frame.is_success() {
                    Ok(())
                } else {
                    Err(StreamError::AuthRejected {
                        code: frame.code_str().to_string(),
                        msg: frame.msg_str().to_string(),
                    })
                };
                if !self.login.complete(outcome) {
                    debug!(code = frame.code_str(), "Login event with no pending login");
                }
                self.hooks.invoke_control(&frame);
            }
            EventKind::Error => self.on_peer_error(frame),
            EventKind::Subscribe | EventKind::Unsubscribe => {
                debug!(event = ?frame.event, arg = ?frame.arg, "Control acknowledgement");
                self.hooks.invoke_control(&frame);
            }
            EventKind::Other => {
                debug!(msg = frame.msg_str(), "Unhandled control event");
                self.hooks.invoke_control(&frame);
            }
        }
    }

    fn on_peer_error(&self, frame: ControlFrame) {
        let code = frame.code_str().to_string();
        let msg = frame.msg_str().to_string();
        let kind = self.codes.classify(&code, &msg);

        if matches!(kind, ErrorCodeKind::RateLimited | ErrorCodeKind::Blocked) {
            warn!(?kind, %code, %msg, cooldown = ?self.cooldown_period, "Peer asked to slow down");
            self.cooldown.trigger(self.cooldown_period);
        }

        if self.login.is_pending() {
            self.login.complete(Err(StreamError::AuthRejected { code, msg }));
            return;
        }

        match kind {
            ErrorCodeKind::AlreadySubscribed => {
                debug!(%code, %msg, arg = ?frame.arg, "Peer already has this subscription");
            }
            ErrorCodeKind::RateLimited | ErrorCodeKind::Blocked => {
                self.hooks.invoke_error(&StreamError::Protocol { code, msg });
            }
            ErrorCodeKind::Other => {
                warn!(%code, %msg, "Peer error");
                self.hooks.invoke_error(&StreamError::Protocol { code, msg });
            }
        }
    }

    async fn on_data(&self, frame: DataFrame) {
        let state = *self.state.read();
        if state != SessionState::Active {
            trace!(key = %frame.arg, %state, "Dropping data frame before Active");
            return;
        }

        let key = frame.arg.clone();
        let Some(consumer) = self.registry.lookup(&key) else {
            debug!(%key, "Data for unregistered channel");
            self.hooks.invoke_error(&StreamError::OrphanedMessage(key));
            return;
        };

        match consumer.deliver(PushEvent::from_frame(frame)).await {
            Delivery::Delivered => {}
            Delivery::Dropped => trace!(%key, "Queue full, event dropped"),
            Delivery::Closed => trace!(%key, "Queue closed, event discarded"),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Consumer, QueuePolicy};
    use feedline_types::ChannelKey;
    use parking_lot::Mutex;

    struct Harness {
        dispatcher: Dispatcher,
        errors: Arc<Mutex<Vec<StreamError>>>,
        controls: Arc<Mutex<Vec<ControlFrame>>>,
    }

    fn harness(state: SessionState) -> Harness {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let controls = Arc::new(Mutex::new(Vec::new()));
        let hooks = {
            let errors = errors.clone();
            let controls = controls.clone();
            Hooks::new()
                .on_error(move |e| errors.lock().push(e.clone()))
                .on_control(move |f| controls.lock().push(f.clone()))
        };

        Harness {
            dispatcher: Dispatcher {
                registry: SubscriptionRegistry::new(),
                state: Arc::new(RwLock::new(state)),
                hooks,
                login: LoginWaiter::default(),
                cooldown: Cooldown::default(),
                cooldown_period: Duration::from_secs(1),
                codes: CodeTable::default(),
            },
            errors,
            controls,
        }
    }

    const BTC_TRADE: &str = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"tradeId":"1"}]}"#;

    #[tokio::test]
    async fn test_routes_only_to_matching_key() {
        let h = harness(SessionState::Active);
        let (btc, mut btc_rx) = Consumer::queue(8, QueuePolicy::DropNewest);
        let (eth, mut eth_rx) = Consumer::queue(8, QueuePolicy::DropNewest);
        h.dispatcher.registry.add(ChannelKey::new("trades", "BTC-USDT"), btc).unwrap();
        h.dispatcher.registry.add(ChannelKey::new("trades", "ETH-USDT"), eth).unwrap();

        h.dispatcher.dispatch(BTC_TRADE).await;

        let event = btc_rx.try_recv().unwrap();
        assert_eq!(event.key, ChannelKey::new("trades", "BTC-USDT"));
        assert!(eth_rx.try_recv().is_none());
        assert!(h.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_message_reported() {
        let h = harness(SessionState::Active);
        h.dispatcher.dispatch(BTC_TRADE).await;

        let errors = h.errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], StreamError::OrphanedMessage(k) if k.inst_id == "BTC-USDT"));
    }

    #[tokio::test]
    async fn test_data_dropped_before_active() {
        for state in [SessionState::Connecting, SessionState::Authenticating] {
            let h = harness(state);
            let (consumer, mut rx) = Consumer::queue(8, QueuePolicy::DropNewest);
            h.dispatcher.registry.add(ChannelKey::new("trades", "BTC-USDT"), consumer).unwrap();

            h.dispatcher.dispatch(BTC_TRADE).await;
            assert!(rx.try_recv().is_none());
            assert!(h.errors.lock().is_empty());
        }
    }

    #[tokio::test]
    async fn test_login_ack_completes_waiter() {
        let h = harness(SessionState::Authenticating);
        let mut rx = h.dispatcher.login.arm();

        h.dispatcher.dispatch(r#"{"event":"login","code":"0","msg":""}"#).await;
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert_eq!(h.controls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_error_during_login_rejects() {
        let h = harness(SessionState::Authenticating);
        let mut rx = h.dispatcher.login.arm();

        h.dispatcher
            .dispatch(r#"{"event":"error","code":"60009","msg":"Login failed"}"#)
            .await;
        match rx.try_recv() {
            Ok(Err(StreamError::AuthRejected { code, .. })) => assert_eq!(code, "60009"),
            other => panic!("expected AuthRejected, got {:?}", other),
        }
        // Consumed by the login, not reported separately
        assert!(h.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_during_login_starts_cooldown() {
        let h = harness(SessionState::Authenticating);
        let mut rx = h.dispatcher.login.arm();

        h.dispatcher
            .dispatch(r#"{"event":"error","arg":{"instType":"SPOT"},"code":"429","msg":"Too Many Requests"}"#)
            .await;

        assert!(h.dispatcher.cooldown.remaining().is_some());
        match rx.try_recv() {
            Ok(Err(StreamError::AuthRejected { code, .. })) => assert_eq!(code, "429"),
            other => panic!("expected AuthRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_starts_cooldown() {
        let h = harness(SessionState::Active);
        h.dispatcher
            .dispatch(r#"{"event":"error","code":"429","msg":"Too Many Requests"}"#)
            .await;

        assert!(h.dispatcher.cooldown.remaining().is_some());
        assert_eq!(h.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_already_subscribed_ignored() {
        let h = harness(SessionState::Active);
        h.dispatcher
            .dispatch(r#"{"event":"error","code":"60018","msg":"already subscribed"}"#)
            .await;

        assert!(h.errors.lock().is_empty());
        assert!(h.dispatcher.cooldown.remaining().is_none());
    }

    #[tokio::test]
    async fn test_other_error_reported() {
        let h = harness(SessionState::Active);
        h.dispatcher
            .dispatch(r#"{"event":"error","code":"60012","msg":"Invalid request"}"#)
            .await;

        let errors = h.errors.lock();
        assert!(matches!(&errors[0], StreamError::Protocol { code, .. } if code == "60012"));
    }

    #[tokio::test]
    async fn test_subscribe_ack_to_control_hook() {
        let h = harness(SessionState::Active);
        h.dispatcher
            .dispatch(r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"}}"#)
            .await;

        assert_eq!(h.controls.lock().len(), 1);
        assert!(h.dispatcher.registry.is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_is_harmless() {
        let h = harness(SessionState::Active);
        h.dispatcher.dispatch("garbage").await;
        h.dispatcher.dispatch(r#"{"foo":1}"#).await;
        assert!(h.errors.lock().is_empty());
        assert!(h.controls.lock().is_empty());
    }

    #[test]
    fn test_connection_lost_fails_login() {
        let h = harness(SessionState::Authenticating);
        let mut rx = h.dispatcher.login.arm();
        h.dispatcher.connection_lost(&TransportError::ConnectionClosed);
        assert!(matches!(rx.try_recv(), Ok(Err(StreamError::Transport(_)))));
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("héllo", 2), "h");
    }
}
