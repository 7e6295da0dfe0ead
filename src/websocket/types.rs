//! Message types for the exchange push protocol.
//!
//! Outbound commands are JSON objects; inbound frames are positional arrays
//! decoded by [`crate::websocket::codec`] into the event types below.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auth::SignedPayload;
use crate::shared::{BookSide, ChannelId, MarketRef, OrderId, Side};

// ============================================================================
// REQUEST TYPES (Client → Server)
// ============================================================================

/// Command verb of an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Subscribe,
    Unsubscribe,
}

/// Subscribe/Unsubscribe request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WsRequest {
    pub command: Command,
    pub channel: ChannelId,
    #[serde(flatten)]
    pub auth: Option<SignedPayload>,
}

impl WsRequest {
    /// Create a subscribe request
    pub fn subscribe(channel: ChannelId) -> Self {
        Self {
            command: Command::Subscribe,
            channel,
            auth: None,
        }
    }

    /// Create an unsubscribe request
    pub fn unsubscribe(channel: ChannelId) -> Self {
        Self {
            command: Command::Unsubscribe,
            channel,
            auth: None,
        }
    }

    /// Create a signed subscribe request for the account channel
    pub fn subscribe_account(auth: SignedPayload) -> Self {
        Self {
            command: Command::Subscribe,
            channel: ChannelId::ACCOUNT,
            auth: Some(auth),
        }
    }
}

// ============================================================================
// MARKET EVENTS
// ============================================================================

/// One aggregated market channel message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub sequence: i64,
    pub is_snapshot: bool,
    pub order_book_deltas: Vec<OrderBookDelta>,
    pub trades: Vec<TradeEvent>,
}

impl MarketUpdate {
    pub fn is_empty(&self) -> bool {
        self.order_book_deltas.is_empty() && self.trades.is_empty()
    }
}

/// Price level change. Zero size removes the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub side: BookSide,
    pub price: Decimal,
    pub size: Decimal,
}

impl OrderBookDelta {
    pub fn is_removal(&self) -> bool {
        self.size.is_zero()
    }
}

/// Public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub trade_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: i64,
}

// ============================================================================
// ACCOUNT EVENTS
// ============================================================================

/// One aggregated account channel message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub sequence: i64,
    pub pending_orders: Vec<OpenOrder>,
    pub new_orders: Vec<OpenOrder>,
    pub order_transitions: Vec<OrderTransition>,
}

/// Resting order as reported by the feed or the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_number: OrderId,
    pub market: MarketRef,
    pub side: Side,
    pub rate: Decimal,
    pub amount: Decimal,
    pub total: Decimal,
}

impl OpenOrder {
    /// Build an order whose total is derived as `rate * amount`.
    ///
    /// Returns `None` when the total does not fit in a `Decimal`.
    pub fn new(
        order_number: OrderId,
        market: MarketRef,
        side: Side,
        rate: Decimal,
        amount: Decimal,
    ) -> Option<Self> {
        Some(Self {
            order_number,
            market,
            side,
            rate,
            amount,
            total: rate.checked_mul(amount)?,
        })
    }
}

/// What happened to a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Filled,
    PartiallyFilled,
    Canceled,
    Other,
}

/// State change of a resting order, with the amount still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransition {
    pub order_number: OrderId,
    pub kind: TransitionKind,
    pub remaining_amount: Decimal,
}

impl OrderTransition {
    /// A fill that leaves nothing open.
    pub fn is_complete_fill(&self) -> bool {
        matches!(
            self.kind,
            TransitionKind::Filled | TransitionKind::PartiallyFilled
        ) && self.remaining_amount <= Decimal::ZERO
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Decoded update handed to a channel subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUpdate {
    Market(MarketUpdate),
    Account(AccountUpdate),
}
