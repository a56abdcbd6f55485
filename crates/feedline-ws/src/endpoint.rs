//! Streaming endpoint definitions

use std::fmt;

/// Streaming API endpoints
///
/// Each endpoint has a production and a demo-trading URL. Which one is
/// used is decided per session by [`SessionConfig`](crate::SessionConfig),
/// never by process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endpoint {
    /// Public market data (default)
    #[default]
    Public,
    /// Authenticated private data
    Private,
}

impl Endpoint {
    /// Production URL
    pub fn url(&self) -> &'static str {
        match self {
            Self::Public => "wss://openapi.blofin.com/ws/public",
            Self::Private => "wss://openapi.blofin.com/ws/private",
        }
    }

    /// Demo-trading URL
    pub fn demo_url(&self) -> &'static str {
        match self {
            Self::Public => "wss://demo-trading-openapi.blofin.com/ws/public",
            Self::Private => "wss://demo-trading-openapi.blofin.com/ws/private",
        }
    }

    /// URL for the given environment
    pub fn url_for(&self, demo: bool) -> &'static str {
        if demo {
            self.demo_url()
        } else {
            self.url()
        }
    }

    /// Check if this endpoint requires authentication
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::Private)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}
