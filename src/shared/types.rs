//! Shared type definitions.
//!
//! Types used by the feed decoder, the ledger and the exchange gateway alike.

use serde::{Deserialize, Serialize};

/// Exchange-assigned order number.
pub type OrderId = i64;

// ============================================================================
// Side
// ============================================================================

/// Direction of an order or a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side a counter-order takes after a fill on this side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side of the order book a price level lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bid,
    Ask,
}

impl std::fmt::Display for BookSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

// ============================================================================
// Channel and market identifiers
// ============================================================================

/// Identifier of one logical stream multiplexed over the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Reserved channel carrying private account events.
    pub const ACCOUNT: ChannelId = ChannelId(1000);
    /// Exchange heartbeat channel.
    pub const HEARTBEAT: ChannelId = ChannelId(1010);

    pub fn is_account(&self) -> bool {
        *self == Self::ACCOUNT
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Market identifier as carried by the account feed.
///
/// The feed reports either the numeric market id or the pair symbol
/// (`BTC_ETH`), depending on the event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarketRef {
    Id(u32),
    Symbol(String),
}

impl MarketRef {
    /// Whether this reference names the given pair.
    pub fn matches(&self, pair: &PairMetadata) -> bool {
        match self {
            Self::Id(id) => *id == pair.id.0,
            Self::Symbol(symbol) => symbol.eq_ignore_ascii_case(&pair.symbol),
        }
    }
}

impl std::fmt::Display for MarketRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Symbol(symbol) => write!(f, "{}", symbol),
        }
    }
}

/// Static description of a tradable pair, as returned by the exchange gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairMetadata {
    /// Market channel id (also the numeric market id)
    pub id: ChannelId,
    /// Pair symbol, e.g. `BTC_ETH`
    pub symbol: String,
    /// Minimum quantity increment, when the exchange publishes one
    #[serde(default)]
    pub lot_size: Option<rust_decimal::Decimal>,
}
