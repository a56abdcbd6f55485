//! One live connection and its background tasks

use crate::config::KeepAliveConfig;
use crate::dispatch::Dispatcher;
use crate::keepalive::{self, LivenessClock};
use crate::transport::{BoxFrameSink, BoxFrameStream};
use feedline_types::TransportError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, trace, warn};

/// Upper bound on the close handshake of a connection being torn down
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Send pause shared by every connection of a session
///
/// Set when the peer answers with a rate limit or block code; every send
/// waits until it has passed.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cooldown {
    until: Arc<Mutex<Option<Instant>>>,
}

impl Cooldown {
    /// Extend the pause to at least `period` from now
    pub(crate) fn trigger(&self, period: Duration) {
        let candidate = Instant::now() + period;
        let mut until = self.until.lock();
        match *until {
            Some(current) if current >= candidate => {}
            _ => *until = Some(candidate),
        }
    }

    /// Remaining pause, if any
    pub(crate) fn remaining(&self) -> Option<Duration> {
        let until = (*self.until.lock())?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    pub(crate) async fn wait(&self) {
        let until = *self.until.lock();
        if let Some(until) = until {
            if until > Instant::now() {
                trace!(remaining = ?(until - Instant::now()), "Waiting out send cooldown");
                sleep_until(until).await;
            }
        }
    }
}

/// Serialised access to a connection's outbound half
#[derive(Clone)]
pub(crate) struct LinkWriter {
    sink: Arc<tokio::sync::Mutex<BoxFrameSink>>,
    cooldown: Cooldown,
}

impl LinkWriter {
    pub(crate) fn new(sink: BoxFrameSink, cooldown: Cooldown) -> Self {
        Self {
            sink: Arc::new(tokio::sync::Mutex::new(sink)),
            cooldown,
        }
    }

    /// Send one text frame, honouring the cooldown
    pub(crate) async fn send(&self, text: &str) -> Result<(), TransportError> {
        self.cooldown.wait().await;
        self.sink.lock().await.send(text).await
    }

    pub(crate) async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await
    }
}

/// Terminal condition reported by a connection's tasks
#[derive(Debug, Clone)]
pub(crate) struct LinkFailure {
    pub generation: u64,
    pub error: TransportError,
}

/// Everything a connection's tasks need
pub(crate) struct LinkContext {
    pub generation: u64,
    pub keepalive: KeepAliveConfig,
    pub dispatcher: Dispatcher,
    pub cooldown: Cooldown,
    pub failures: mpsc::UnboundedSender<LinkFailure>,
    pub shutdown: watch::Receiver<bool>,
}

/// An open connection: writer, reader task and keepalive task
///
/// Failures are reported once per task with the link's generation so the
/// session can ignore reports from connections it already replaced.
pub(crate) struct Link {
    generation: u64,
    writer: LinkWriter,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl Link {
    /// Start the background tasks for a freshly opened connection
    pub(crate) fn spawn(sink: BoxFrameSink, stream: BoxFrameStream, ctx: LinkContext) -> Self {
        let writer = LinkWriter::new(sink, ctx.cooldown);
        let clock = LivenessClock::new();

        let reader = tokio::spawn(read_loop(
            stream,
            ctx.dispatcher,
            clock.clone(),
            ctx.generation,
            ctx.failures.clone(),
            ctx.shutdown.clone(),
        ));

        let keepalive = {
            let writer = writer.clone();
            let failures = ctx.failures;
            let mut shutdown = ctx.shutdown;
            let generation = ctx.generation;
            let config = ctx.keepalive;
            tokio::spawn(async move {
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => {}
                    error = keepalive::run(config, writer, clock) => {
                        let _ = failures.send(LinkFailure { generation, error });
                    }
                }
            })
        };

        debug!(generation = ctx.generation, "Link started");
        Self {
            generation: ctx.generation,
            writer,
            reader,
            keepalive,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn writer(&self) -> &LinkWriter {
        &self.writer
    }

    /// Stop both tasks and close the connection
    ///
    /// The close handshake gets at most [`CLOSE_TIMEOUT`]; a stalled peer
    /// is abandoned after that.
    pub(crate) async fn shutdown(self) {
        self.reader.abort();
        self.keepalive.abort();
        match timeout(CLOSE_TIMEOUT, self.writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(error = %e, "Error closing connection"),
            Err(_) => warn!(generation = self.generation, "Close handshake timed out"),
        }
        debug!(generation = self.generation, "Link closed");
    }
}

async fn read_loop(
    mut stream: BoxFrameStream,
    dispatcher: Dispatcher,
    clock: LivenessClock,
    generation: u64,
    failures: mpsc::UnboundedSender<LinkFailure>,
    mut shutdown: watch::Receiver<bool>,
) {
    let error = loop {
        let result = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => return,
            result = stream.recv() => result,
        };

        match result {
            Ok(Some(text)) => {
                clock.touch();
                dispatcher.dispatch(&text).await;
            }
            Ok(None) => break TransportError::ConnectionClosed,
            Err(e) => break e,
        }
    };

    debug!(generation, error = %error, "Read loop ended");
    dispatcher.connection_lost(&error);
    let _ = failures.send(LinkFailure { generation, error });
}

/// Resolve once the shutdown flag is set or its sender is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
