//! Login negotiation for private streams

use crate::link::LinkWriter;
use feedline_auth::{generate_nonce, login_args, timestamp_millis, Credentials, Signer};
use feedline_types::{Request, StreamError, StreamResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Slot through which the dispatcher completes a pending login
#[derive(Debug, Clone, Default)]
pub(crate) struct LoginWaiter {
    slot: Arc<Mutex<Option<oneshot::Sender<StreamResult<()>>>>>,
}

impl LoginWaiter {
    /// Start waiting; replaces any earlier waiter
    pub(crate) fn arm(&self) -> oneshot::Receiver<StreamResult<()>> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock() = Some(tx);
        rx
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Deliver the login outcome; returns false if nobody was waiting
    pub(crate) fn complete(&self, outcome: StreamResult<()>) -> bool {
        match self.slot.lock().take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub(crate) fn disarm(&self) {
        self.slot.lock().take();
    }
}

/// Authenticates one connection
///
/// Every attempt uses a fresh timestamp and nonce. Credentials are passed
/// in per call and never kept.
pub(crate) struct AuthNegotiator<'a> {
    signer: &'a dyn Signer,
    waiter: &'a LoginWaiter,
    timeout: Duration,
}

impl<'a> AuthNegotiator<'a> {
    pub(crate) fn new(signer: &'a dyn Signer, waiter: &'a LoginWaiter, timeout: Duration) -> Self {
        Self {
            signer,
            waiter,
            timeout,
        }
    }

    /// Send a login frame and wait for the peer's verdict
    #[instrument(skip_all, fields(api_key = %credentials.api_key()))]
    pub(crate) async fn login(
        &self,
        writer: &LinkWriter,
        credentials: &Credentials,
    ) -> StreamResult<()> {
        let args = login_args(
            credentials,
            self.signer,
            &timestamp_millis(),
            &generate_nonce(),
        );
        let frame = Request::login(args).to_json()?;

        let verdict = self.waiter.arm();
        if let Err(e) = writer.send(&frame).await {
            self.waiter.disarm();
            return Err(e.into());
        }
        debug!("Login sent");

        match tokio::time::timeout(self.timeout, verdict).await {
            Ok(Ok(Ok(()))) => {
                info!("Login accepted");
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Login failed");
                Err(e)
            }
            Ok(Err(_)) => Err(StreamError::SessionClosed),
            Err(_) => {
                self.waiter.disarm();
                warn!(timeout = ?self.timeout, "Login not acknowledged");
                Err(StreamError::AuthTimeout {
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Cooldown;
    use crate::transport::{Connector, MockConnector};
    use feedline_auth::HmacSha256Signer;
    use feedline_types::TransportError;

    async fn writer(connector: &MockConnector) -> LinkWriter {
        let (sink, _stream) = connector.connect("wss://mock.test").await.unwrap();
        LinkWriter::new(sink, Cooldown::default())
    }

    #[test]
    fn test_waiter_complete() {
        let waiter = LoginWaiter::default();
        assert!(!waiter.complete(Ok(())));

        let mut rx = waiter.arm();
        assert!(waiter.is_pending());
        assert!(waiter.complete(Ok(())));
        assert!(!waiter.is_pending());
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_login_accepted() {
        let connector = MockConnector::new();
        let writer = writer(&connector).await;
        let waiter = LoginWaiter::default();
        let signer = HmacSha256Signer;
        let creds = Credentials::new("key", "secret", "pass");

        let completer = waiter.clone();
        let pending = tokio::spawn(async move {
            while !completer.is_pending() {
                tokio::task::yield_now().await;
            }
            completer.complete(Ok(()));
        });

        AuthNegotiator::new(&signer, &waiter, Duration::from_secs(5))
            .login(&writer, &creds)
            .await
            .unwrap();
        pending.await.unwrap();

        let sent: serde_json::Value = serde_json::from_str(&connector.sent()[0]).unwrap();
        assert_eq!(sent["op"], "login");
        assert_eq!(sent["args"][0]["apiKey"], "key");
        assert_eq!(sent["args"][0]["passphrase"], "pass");
        assert_eq!(sent["args"][0]["nonce"].as_str().unwrap().len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout() {
        let connector = MockConnector::new();
        let writer = writer(&connector).await;
        let waiter = LoginWaiter::default();
        let creds = Credentials::new("key", "secret", "pass");

        let err = AuthNegotiator::new(&HmacSha256Signer, &waiter, Duration::from_secs(10))
            .login(&writer, &creds)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::AuthTimeout { .. }));
        assert!(!waiter.is_pending());
    }

    #[tokio::test]
    async fn test_login_send_failure() {
        let connector = MockConnector::new();
        let writer = writer(&connector).await;
        connector.server().unwrap().drop_connection();
        let waiter = LoginWaiter::default();
        let creds = Credentials::new("key", "secret", "pass");

        let err = AuthNegotiator::new(&HmacSha256Signer, &waiter, Duration::from_secs(10))
            .login(&writer, &creds)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StreamError::Transport(TransportError::SendFailed(_))
        ));
        assert!(!waiter.is_pending());
    }

    #[tokio::test]
    async fn test_fresh_nonce_each_attempt() {
        let connector = MockConnector::new();
        let writer = writer(&connector).await;
        let waiter = LoginWaiter::default();
        let creds = Credentials::new("key", "secret", "pass");
        let negotiator = AuthNegotiator::new(&HmacSha256Signer, &waiter, Duration::from_millis(1));

        let _ = negotiator.login(&writer, &creds).await;
        let _ = negotiator.login(&writer, &creds).await;

        let nonces: Vec<String> = connector
            .sent()
            .iter()
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(f).unwrap();
                v["args"][0]["nonce"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(nonces.len(), 2);
        assert_ne!(nonces[0], nonces[1]);
    }
}
