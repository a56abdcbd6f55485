//! Channel names and subscription keys

use serde::{Deserialize, Serialize};
use std::fmt;

/// Public channel names
pub mod public {
    /// Ticker snapshots
    pub const TICKERS: &str = "tickers";
    /// Public trades
    pub const TRADES: &str = "trades";
    /// Full order book (snapshot followed by incremental updates)
    pub const BOOKS: &str = "books";
    /// Top 5 levels, snapshot only
    pub const BOOKS5: &str = "books5";
    /// Funding rate for perpetual swaps
    pub const FUNDING_RATE: &str = "funding-rate";
    /// Candle channel prefix, e.g. `candle1m`
    pub const CANDLE_PREFIX: &str = "candle";
}

/// Private channel names (login required)
pub mod private {
    /// Order updates
    pub const ORDERS: &str = "orders";
    /// Algo/TPSL order updates
    pub const ORDERS_ALGO: &str = "orders-algo";
    /// Position updates
    pub const POSITIONS: &str = "positions";
    /// Account balance updates
    pub const ACCOUNT: &str = "account";
    /// Prefix used by inverse-contract variants of the above
    pub const INVERSE_PREFIX: &str = "inverse-";
}

/// Check whether a channel requires an authenticated session
pub fn is_private_channel(channel: &str) -> bool {
    let base = channel
        .strip_prefix(private::INVERSE_PREFIX)
        .unwrap_or(channel);
    matches!(
        base,
        private::ORDERS | private::ORDERS_ALGO | private::POSITIONS | private::ACCOUNT
    )
}

/// Identifies one logical stream: a channel plus an instrument
///
/// Account-scope channels (e.g. `account`) use an empty instrument id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Channel name
    pub channel: String,
    /// Instrument identifier, empty for account-scope channels
    #[serde(rename = "instId", default, skip_serializing_if = "String::is_empty")]
    pub inst_id: String,
}

impl ChannelKey {
    /// Create a key for an instrument-scoped channel
    pub fn new(channel: impl Into<String>, inst_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            inst_id: inst_id.into(),
        }
    }

    /// Create a key for an account-scope channel
    pub fn account(channel: impl Into<String>) -> Self {
        Self::new(channel, "")
    }

    /// Whether this key has no instrument
    pub fn is_account_scope(&self) -> bool {
        self.inst_id.is_empty()
    }

    /// Whether this key's channel needs a login first
    pub fn is_private(&self) -> bool {
        is_private_channel(&self.channel)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inst_id.is_empty() {
            write!(f, "{}", self.channel)
        } else {
            write!(f, "{}:{}", self.channel, self.inst_id)
        }
    }
}
