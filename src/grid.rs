//! Grid strategy: the counter-order placed after each fill.
//!
//! A filled sell is answered with a buy one `buy_step` lower, sized to the
//! configured quote volume. A filled buy is answered with a sell one
//! `sell_step` higher, sized to the bought amount minus the trading fee. All
//! quantities are rounded down to the exchange lot step.
//!
//! Everything here is pure: no I/O, no clock, no shared state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::Order;
use crate::shared::{default_lot_size, percent_of, quantize_down, Side};

/// Grid computation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("counter-order price {price} is not positive")]
    NonPositivePrice { price: Decimal },

    #[error("quantity {target} is below the lot step {lot}")]
    BelowLotSize { target: Decimal, lot: Decimal },

    #[error("counter-order {field} overflows a decimal")]
    Overflow { field: &'static str },
}

/// Result type alias for grid computations
pub type GridResult<T> = Result<T, GridError>;

/// Strategy parameters of one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Price offset used for both sides unless overridden
    pub step: Decimal,
    /// Offset below a filled sell
    pub buy_step: Option<Decimal>,
    /// Offset above a filled buy
    pub sell_step: Option<Decimal>,
    /// Quote asset amount spent per buy
    pub volume: Decimal,
    /// Trading fee in percent
    pub fee_percent: Decimal,
    /// Minimum quantity increment
    pub lot_size: Decimal,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            step: Decimal::ZERO,
            buy_step: None,
            sell_step: None,
            volume: Decimal::ZERO,
            fee_percent: Decimal::ZERO,
            lot_size: default_lot_size(),
        }
    }
}

impl GridConfig {
    /// Price offset for a counter-order on `side`.
    ///
    /// Falls back to `step` when the side-specific step is unset or not positive.
    pub fn step_for(&self, side: Side) -> Decimal {
        let specific = match side {
            Side::Buy => self.buy_step,
            Side::Sell => self.sell_step,
        };
        specific
            .filter(|step| *step > Decimal::ZERO)
            .unwrap_or(self.step)
    }
}

/// Order to place in answer to a fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOrder {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    /// `price * quantity`
    pub total: Decimal,
    /// `total * fee_percent / 100`
    pub fee: Decimal,
}

impl CounterOrder {
    fn new(
        side: Side,
        price: Decimal,
        quantity: Decimal,
        fee_percent: Decimal,
    ) -> GridResult<Self> {
        let total = price
            .checked_mul(quantity)
            .ok_or(GridError::Overflow { field: "total" })?;
        Ok(Self {
            side,
            price,
            quantity,
            total,
            fee: percent_of(total, fee_percent),
        })
    }
}

/// Counter-order for a completely filled order.
pub fn compute_counter_order(filled: &Order, config: &GridConfig) -> GridResult<CounterOrder> {
    let side = filled.side.opposite();
    let price = match side {
        Side::Buy => filled.price.checked_sub(config.step_for(Side::Buy)),
        Side::Sell => filled.price.checked_add(config.step_for(Side::Sell)),
    }
    .ok_or(GridError::Overflow { field: "price" })?;
    if price <= Decimal::ZERO {
        return Err(GridError::NonPositivePrice { price });
    }

    let target = match side {
        Side::Buy => config
            .volume
            .checked_div(price)
            .ok_or(GridError::Overflow { field: "quantity" })?,
        Side::Sell => filled.volume - percent_of(filled.volume, config.fee_percent),
    };
    let quantity = quantize_down(target, config.lot_size);
    if quantity <= Decimal::ZERO {
        return Err(GridError::BelowLotSize {
            target,
            lot: config.lot_size,
        });
    }

    CounterOrder::new(side, price, quantity, config.fee_percent)
}

/// Sell counter-order adjusted against the job's base asset balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeCover {
    pub order: CounterOrder,
    /// Signed change to apply to the base asset balance
    pub balance_delta: Decimal,
}

/// Let a sell counter-order reuse the whole bought amount when the base
/// balance can pay the withheld fee.
///
/// When `base_balance` exceeds the fee, the order sells the full (lot-rounded)
/// bought amount and the fee is taken from the balance. Otherwise the order is
/// unchanged and the sub-lot remainder is credited to the balance. Buy
/// counter-orders pass through with a zero delta.
pub fn cover_sell_fee(
    counter: &CounterOrder,
    filled: &Order,
    base_balance: Decimal,
    config: &GridConfig,
) -> GridResult<FeeCover> {
    if counter.side != Side::Sell {
        return Ok(FeeCover {
            order: counter.clone(),
            balance_delta: Decimal::ZERO,
        });
    }

    let withheld = percent_of(filled.volume, config.fee_percent);
    if base_balance > withheld {
        let quantity = quantize_down(filled.volume, config.lot_size);
        Ok(FeeCover {
            order: CounterOrder::new(Side::Sell, counter.price, quantity, config.fee_percent)?,
            balance_delta: -withheld,
        })
    } else {
        let available = filled.volume - withheld;
        Ok(FeeCover {
            order: counter.clone(),
            balance_delta: available - counter.quantity,
        })
    }
}
