//! Subscription registry and consumers
//!
//! The registry is the session's source of truth for what the caller wants
//! to receive. It is never cleared by a transport loss; after a reconnect
//! its snapshot drives re-subscription. All access goes through one mutex
//! and no method performs I/O while holding it.

use crate::events::PushEvent;
use feedline_types::{ChannelKey, StreamError, StreamResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Callback invoked on the dispatch task for each event
pub type Callback = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// What a full queue does with a new event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Discard the incoming event and count it
    #[default]
    DropNewest,
    /// Wait for the drainer to make room (stalls dispatch for every key)
    Block,
}

/// Sending side of a queue consumer
pub struct QueueSink {
    tx: Mutex<Option<mpsc::Sender<PushEvent>>>,
    policy: QueuePolicy,
    dropped: AtomicU64,
}

impl QueueSink {
    fn sender(&self) -> Option<mpsc::Sender<PushEvent>> {
        self.tx.lock().clone()
    }

    /// Close the queue; the drainer sees end-of-stream after buffered events
    pub fn close(&self) {
        self.tx.lock().take();
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Overflow policy
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

/// Receiving side of a queue consumer
pub struct QueueReceiver {
    rx: mpsc::Receiver<PushEvent>,
    sink: Arc<QueueSink>,
}

impl QueueReceiver {
    /// Wait for the next event; `None` once the subscription is closed and
    /// the buffer is drained
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is buffered
    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.rx.try_recv().ok()
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.sink.dropped()
    }

    /// Whether the subscription behind this queue is closed
    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

impl fmt::Debug for QueueReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueReceiver")
            .field("policy", &self.sink.policy)
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// How a subscription consumes its events
#[derive(Clone)]
pub enum Consumer {
    /// Called synchronously on the dispatch task
    Callback(Callback),
    /// Bounded queue drained by the caller
    Queue(Arc<QueueSink>),
}

/// Outcome of handing one event to a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the consumer
    Delivered,
    /// Queue was full and the event was discarded
    Dropped,
    /// Queue was already closed
    Closed,
}

impl Consumer {
    /// Callback consumer
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    /// Queue consumer with its receiver
    ///
    /// A zero capacity is raised to one.
    pub fn queue(capacity: usize, policy: QueuePolicy) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Arc::new(QueueSink {
            tx: Mutex::new(Some(tx)),
            policy,
            dropped: AtomicU64::new(0),
        });
        (
            Self::Queue(sink.clone()),
            QueueReceiver { rx, sink },
        )
    }

    /// Consumer kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Callback(_) => "callback",
            Self::Queue(_) => "queue",
        }
    }

    /// Hand an event to the consumer
    pub async fn deliver(&self, event: PushEvent) -> Delivery {
        match self {
            Self::Callback(f) => {
                f(&event);
                Delivery::Delivered
            }
            Self::Queue(sink) => {
                let Some(tx) = sink.sender() else {
                    return Delivery::Closed;
                };
                match sink.policy {
                    QueuePolicy::DropNewest => match tx.try_send(event) {
                        Ok(()) => Delivery::Delivered,
                        Err(TrySendError::Full(_)) => {
                            sink.dropped.fetch_add(1, Ordering::Relaxed);
                            Delivery::Dropped
                        }
                        Err(TrySendError::Closed(_)) => Delivery::Closed,
                    },
                    QueuePolicy::Block => match tx.send(event).await {
                        Ok(()) => Delivery::Delivered,
                        Err(_) => Delivery::Closed,
                    },
                }
            }
        }
    }

    fn close(&self) {
        if let Self::Queue(sink) = self {
            sink.close();
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Consumer::Callback"),
            Self::Queue(sink) => f
                .debug_struct("Consumer::Queue")
                .field("policy", &sink.policy)
                .field("dropped", &sink.dropped())
                .finish(),
        }
    }
}

struct Entry {
    seq: u64,
    consumer: Consumer,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<ChannelKey, Entry>,
    next_seq: u64,
}

/// Registry of active subscriptions, one per [`ChannelKey`]
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer for `key`
    ///
    /// Fails with `AlreadySubscribed` if the key is present; the existing
    /// consumer is left untouched.
    pub fn add(&self, key: ChannelKey, consumer: Consumer) -> StreamResult<()> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            return Err(StreamError::AlreadySubscribed(key));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        trace!(%key, kind = consumer.kind(), "Registered subscription");
        inner.entries.insert(key, Entry { seq, consumer });
        Ok(())
    }

    /// Remove the subscription for `key`, closing a queue consumer
    pub fn remove(&self, key: &ChannelKey) -> StreamResult<Consumer> {
        let entry = self
            .inner
            .lock()
            .entries
            .remove(key)
            .ok_or_else(|| StreamError::NotSubscribed(key.clone()))?;

        entry.consumer.close();
        Ok(entry.consumer)
    }

    /// Point-in-time copy of every subscription, in registration order
    pub fn snapshot(&self) -> Vec<(ChannelKey, Consumer)> {
        let inner = self.inner.lock();
        let mut entries: Vec<_> = inner
            .entries
            .iter()
            .map(|(key, entry)| (entry.seq, key.clone(), entry.consumer.clone()))
            .collect();
        drop(inner);

        entries.sort_by_key(|(seq, _, _)| *seq);
        entries
            .into_iter()
            .map(|(_, key, consumer)| (key, consumer))
            .collect()
    }

    /// Registered keys, in registration order
    pub fn keys(&self) -> Vec<ChannelKey> {
        self.snapshot().into_iter().map(|(key, _)| key).collect()
    }

    /// Consumer for `key`, if registered
    pub fn lookup(&self, key: &ChannelKey) -> Option<Consumer> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.consumer.clone())
    }

    /// Whether `key` is registered
    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything, closing all queue consumers
    pub fn close_all(&self) -> usize {
        let drained: Vec<Entry> = self.inner.lock().entries.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.consumer.close();
        }
        drained.len()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
