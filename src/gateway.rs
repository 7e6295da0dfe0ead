//! Exchange trade endpoints consumed by jobs.
//!
//! Request/response calls (placing orders, listing open orders, pair lookup)
//! are kept behind [`ExchangeGateway`] so a job can run against any exchange
//! client, or an in-memory fake in tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::{OrderId, PairMetadata, Side};
use crate::websocket::types::OpenOrder;

/// Gateway error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The exchange refused the request
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Network failure or exchange unavailable
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Credentials missing or refused
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_number: OrderId,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<Decimal>,
}

impl OrderConfirmation {
    pub fn new(order_number: OrderId) -> Self {
        Self {
            order_number,
            price: None,
            quantity: None,
        }
    }
}

/// Trade operations a job needs from its exchange.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Place a limit order on `market` (pair symbol).
    async fn place_order(
        &self,
        market: &str,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> GatewayResult<OrderConfirmation>;

    /// Resting orders of the account on `market`.
    async fn get_open_orders(&self, market: &str) -> GatewayResult<Vec<OpenOrder>>;

    /// Pair metadata for `symbol`, `None` when the exchange does not list it.
    async fn get_pair(&self, symbol: &str) -> GatewayResult<Option<PairMetadata>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_confirmation_deserialize() {
        let c: OrderConfirmation = serde_json::from_str(r#"{"order_number":42}"#).unwrap();
        assert_eq!(c, OrderConfirmation::new(42));

        let c: OrderConfirmation =
            serde_json::from_str(r#"{"order_number":43,"price":"0.011","quantity":"0.9975"}"#)
                .unwrap();
        assert_eq!(c.price, Some(dec!(0.011)));
        assert_eq!(c.quantity, Some(dec!(0.9975)));
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::Rejected("insufficient funds".to_string());
        assert_eq!(err.to_string(), "Rejected: insufficient funds");
    }
}
