//! Session configuration

use crate::endpoint::Endpoint;
use crate::reconnect::ReconnectConfig;
use feedline_types::{CodeTable, StreamError, StreamResult};
use std::time::Duration;

/// Keepalive probe settings
#[derive(Debug, Clone, PartialEq)]
pub struct KeepAliveConfig {
    /// Time between `ping` probes
    pub probe_interval: Duration,
    /// Time after a probe within which any inbound frame must arrive
    pub liveness_deadline: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(20),
            liveness_deadline: Duration::from_secs(25),
        }
    }
}

impl KeepAliveConfig {
    /// Create keepalive settings
    pub fn new(probe_interval: Duration, liveness_deadline: Duration) -> Self {
        Self {
            probe_interval,
            liveness_deadline,
        }
    }

    /// Check that the deadline leaves room for a reply
    pub fn validate(&self) -> StreamResult<()> {
        if self.probe_interval.is_zero() {
            return Err(StreamError::Configuration(
                "keepalive probe interval must be non-zero".into(),
            ));
        }
        if self.liveness_deadline <= self.probe_interval {
            return Err(StreamError::Configuration(format!(
                "liveness deadline ({:?}) must exceed probe interval ({:?})",
                self.liveness_deadline, self.probe_interval
            )));
        }
        Ok(())
    }
}

/// Configuration for a streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Public or private endpoint
    pub endpoint: Endpoint,
    /// Use the demo-trading environment
    pub demo: bool,
    /// Explicit URL, overriding `endpoint` and `demo`
    pub url: Option<String>,
    /// Transport open timeout
    pub connect_timeout: Duration,
    /// Time allowed for a login acknowledgement
    pub login_timeout: Duration,
    /// Keepalive probe settings
    pub keepalive: KeepAliveConfig,
    /// Reconnection settings
    pub reconnect: ReconnectConfig,
    /// Pause applied to sends after a rate limit or block code
    pub cooldown: Duration,
    /// Peer error code classification
    pub codes: CodeTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Public,
            demo: false,
            url: None,
            connect_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(10),
            keepalive: KeepAliveConfig::default(),
            reconnect: ReconnectConfig::default(),
            cooldown: Duration::from_secs(1),
            codes: CodeTable::default(),
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for the public endpoint
    pub fn public() -> Self {
        Self::default().with_endpoint(Endpoint::Public)
    }

    /// Config for the private endpoint
    pub fn private() -> Self {
        Self::default().with_endpoint(Endpoint::Private)
    }

    /// Set the endpoint
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Select the demo-trading environment
    pub fn with_demo(mut self, demo: bool) -> Self {
        self.demo = demo;
        self
    }

    /// Connect to an explicit URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set login acknowledgement timeout
    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Set keepalive settings
    pub fn with_keepalive(mut self, keepalive: KeepAliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Set reconnection config
    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Disable automatic reconnection
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = ReconnectConfig::disabled();
        self
    }

    /// Set the rate limit cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Replace the peer error code table
    pub fn with_codes(mut self, codes: CodeTable) -> Self {
        self.codes = codes;
        self
    }

    /// URL the session connects to
    pub fn resolved_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => self.endpoint.url_for(self.demo).to_string(),
        }
    }

    /// Reject settings the session cannot run with
    pub fn validate(&self) -> StreamResult<()> {
        self.keepalive.validate()?;

        if self.login_timeout.is_zero() {
            return Err(StreamError::Configuration(
                "login timeout must be non-zero".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(StreamError::Configuration(
                "connect timeout must be non-zero".into(),
            ));
        }
        if let Some(url) = &self.url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(StreamError::Configuration(format!(
                    "unsupported URL scheme: {}",
                    url
                )));
            }
        }
        Ok(())
    }
}
