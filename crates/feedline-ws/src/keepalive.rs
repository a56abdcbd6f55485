//! Application-level keepalive
//!
//! The peer expects a literal `ping` at least every 30 seconds and answers
//! `pong`. Any inbound frame counts as proof of life, so a busy data
//! stream never trips the deadline even if a `pong` gets lost.

use crate::config::KeepAliveConfig;
use crate::link::LinkWriter;
use feedline_types::{TransportError, PING};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{trace, warn};

/// Time of the last inbound frame on one connection
#[derive(Debug, Clone)]
pub(crate) struct LivenessClock {
    last_inbound: Arc<Mutex<Instant>>,
}

impl LivenessClock {
    pub(crate) fn new() -> Self {
        Self {
            last_inbound: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record an inbound frame
    pub(crate) fn touch(&self) {
        *self.last_inbound.lock() = Instant::now();
    }

    pub(crate) fn last_inbound(&self) -> Instant {
        *self.last_inbound.lock()
    }

    fn answered_since(&self, sent: Instant) -> bool {
        self.last_inbound() >= sent
    }
}

/// Probe the connection until it is found dead
///
/// Returns the error that ended the connection: a failed probe send or
/// `LivenessTimeout` when nothing arrived within the deadline of a probe.
pub(crate) async fn run(
    config: KeepAliveConfig,
    writer: LinkWriter,
    clock: LivenessClock,
) -> TransportError {
    let start = Instant::now() + config.probe_interval;
    let mut ticker = interval_at(start, config.probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut outstanding: Option<Instant> = None;

    loop {
        let deadline = outstanding.map(|sent| sent + config.liveness_deadline);

        tokio::select! {
            _ = ticker.tick() => {
                if let Some(sent) = outstanding {
                    if clock.answered_since(sent) {
                        outstanding = None;
                    }
                }
                if outstanding.is_none() {
                    if let Err(e) = writer.send(PING).await {
                        warn!(error = %e, "Keepalive probe failed");
                        return e;
                    }
                    trace!("Sent keepalive probe");
                    outstanding = Some(Instant::now());
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                match outstanding {
                    Some(sent) if !clock.answered_since(sent) => {
                        warn!(
                            deadline = ?config.liveness_deadline,
                            "No inbound frame since keepalive probe"
                        );
                        return TransportError::LivenessTimeout(config.liveness_deadline);
                    }
                    _ => outstanding = None,
                }
            }
        }
    }
}
