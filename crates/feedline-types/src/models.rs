//! Typed payloads for the common public channels
//!
//! Numeric fields arrive as strings; `rust_decimal` parses them without
//! going through floating point.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Trade side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy / bid
    Buy,
    /// Sell / ask
    Sell,
}

/// One record of the `tickers` channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerData {
    /// Instrument id
    pub inst_id: String,
    /// Last traded price
    pub last: Decimal,
    /// Last traded size
    #[serde(default)]
    pub last_size: Option<Decimal>,
    /// Best ask price
    pub ask_price: Decimal,
    /// Best ask size
    #[serde(default)]
    pub ask_size: Option<Decimal>,
    /// Best bid price
    pub bid_price: Decimal,
    /// Best bid size
    #[serde(default)]
    pub bid_size: Option<Decimal>,
    /// 24h open
    #[serde(rename = "open24h", default)]
    pub open_24h: Option<Decimal>,
    /// 24h high
    #[serde(rename = "high24h", default)]
    pub high_24h: Option<Decimal>,
    /// 24h low
    #[serde(rename = "low24h", default)]
    pub low_24h: Option<Decimal>,
    /// 24h volume in contracts
    #[serde(rename = "vol24h", default)]
    pub vol_24h: Option<Decimal>,
    /// Server timestamp, milliseconds
    pub ts: String,
}

impl TickerData {
    /// Ask minus bid
    pub fn spread(&self) -> Decimal {
        self.ask_price - self.bid_price
    }

    /// Midpoint of best bid and ask
    pub fn mid_price(&self) -> Decimal {
        (self.ask_price + self.bid_price) / Decimal::from(2)
    }
}

/// One record of the `trades` channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeData {
    /// Instrument id
    pub inst_id: String,
    /// Trade id
    pub trade_id: String,
    /// Execution price
    pub price: Decimal,
    /// Execution size
    pub size: Decimal,
    /// Taker side
    pub side: Side,
    /// Server timestamp, milliseconds
    pub ts: String,
}

/// A `[price, size]` book level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BookLevel(pub Decimal, pub Decimal);

impl BookLevel {
    /// Level price
    pub fn price(&self) -> Decimal {
        self.0
    }

    /// Level size; zero removes the level in an update
    pub fn size(&self) -> Decimal {
        self.1
    }
}

/// One record of the `books`/`books5` channels
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookData {
    /// Ask levels, ascending price
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    /// Bid levels, descending price
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    /// Server timestamp, milliseconds
    #[serde(default)]
    pub ts: Option<String>,
    /// Sequence id of the previous update
    #[serde(default)]
    pub prev_seq_id: Option<i64>,
    /// Sequence id of this update
    #[serde(default)]
    pub seq_id: Option<i64>,
}

impl BookData {
    /// Best (lowest) ask
    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// Best (highest) bid
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }
}

/// One record of the `funding-rate` channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRateData {
    /// Instrument id
    pub inst_id: String,
    /// Current funding rate
    pub funding_rate: Decimal,
    /// Next settlement time, milliseconds
    pub funding_time: String,
}
