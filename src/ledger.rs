//! Per-job order and balance ledger.
//!
//! Holds the exchange orders a job is responsible for and the balances of the
//! job's two assets. Every operation is one critical section over a single
//! lock, so no caller ever sees a half-applied change.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::{format_decimal, percent_of, OrderId, Side};
use crate::websocket::types::OpenOrder;

/// Ledger lookup errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("order {0} not found")]
    NotFound(OrderId),
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Lifecycle status of a ledger order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Filled,
    Canceled,
}

/// Ledger entry for one exchange order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Base asset quantity
    pub volume: Decimal,
    pub price: Decimal,
    /// Quote asset value, `price * volume`
    pub total: Decimal,
    pub fee: Decimal,
    pub side: Side,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
}

impl Order {
    /// Ledger entry for an order reported by the feed or the gateway.
    ///
    /// A non-positive total is recomputed as `rate * amount` when that fits;
    /// the fee is `fee_percent` of the total.
    pub fn from_open(open: &OpenOrder, fee_percent: Decimal) -> Self {
        let total = if open.total <= Decimal::ZERO {
            open.amount.checked_mul(open.rate).unwrap_or(open.total)
        } else {
            open.total
        };
        Self {
            id: open.order_number,
            volume: open.amount,
            price: open.rate,
            total,
            fee: percent_of(total, fee_percent),
            side: open.side,
            status: OrderStatus::New,
            placed_at: Utc::now(),
        }
    }

    /// Copy of this order marked filled.
    pub fn filled(&self) -> Self {
        Self {
            status: OrderStatus::Filled,
            ..self.clone()
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    orders: HashMap<OrderId, Order>,
    balances: HashMap<String, Decimal>,
    /// Counter-order id to the filled order it answers
    answering: HashMap<OrderId, OrderId>,
}

impl LedgerState {
    /// Drop `filled` if it is still present and filled.
    fn retire(&mut self, filled: OrderId) -> bool {
        match self.orders.get(&filled) {
            Some(order) if order.status == OrderStatus::Filled => {
                self.orders.remove(&filled);
                true
            }
            _ => false,
        }
    }
}

/// Open orders and asset balances of one job.
#[derive(Debug, Default)]
pub struct OrderLedger {
    state: Mutex<LedgerState>,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an order. Returns `false` (and changes nothing) when already present.
    ///
    /// Attaching the counter-order of a filled order retires the filled one.
    pub fn attach(&self, order: Order) -> bool {
        let (id, side, price, volume) = (order.id, order.side, order.price, order.volume);
        let (inserted, retired) = {
            let mut state = self.lock();
            if state.orders.contains_key(&id) {
                (false, None)
            } else {
                state.orders.insert(id, order);
                let retired = state
                    .answering
                    .remove(&id)
                    .filter(|filled| state.retire(*filled));
                (true, retired)
            }
        };

        // Log after releasing the lock
        if inserted {
            tracing::info!(
                order_id = id,
                side = %side,
                price = %format_decimal(&price),
                volume = %format_decimal(&volume),
                "Order registered"
            );
        }
        if let Some(filled) = retired {
            tracing::info!(order_id = filled, counter_id = id, "Filled order retired");
        }
        inserted
    }

    /// Record that `counter` answers the fill of `filled`.
    ///
    /// The filled order leaves the ledger once the counter-order is attached,
    /// right away when it already is. Returns whether it left now.
    pub fn link_counter(&self, filled: OrderId, counter: OrderId) -> bool {
        let retired = {
            let mut state = self.lock();
            if state.orders.contains_key(&counter) {
                state.retire(filled)
            } else {
                state.answering.insert(counter, filled);
                false
            }
        };
        if retired {
            tracing::info!(order_id = filled, counter_id = counter, "Filled order retired");
        }
        retired
    }

    /// Remove an order. Returns `false` when it was not present.
    pub fn detach(&self, id: OrderId) -> bool {
        let removed = self.lock().orders.remove(&id);
        match removed {
            Some(order) => {
                tracing::info!(order_id = id, side = %order.side, "Order removed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: OrderId) -> LedgerResult<Order> {
        self.lock()
            .orders
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    /// Mark an order filled. Returns `false` when it already was.
    pub fn mark_filled(&self, id: OrderId) -> LedgerResult<bool> {
        let mut state = self.lock();
        let order = state.orders.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        if order.status == OrderStatus::Filled {
            return Ok(false);
        }
        order.status = OrderStatus::Filled;
        Ok(true)
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.lock().orders.contains_key(&id)
    }

    /// Snapshot of all orders, sorted by id
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.lock().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    pub fn len(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().orders.is_empty()
    }

    /// Balance of `asset`; zero when unknown.
    pub fn balance(&self, asset: &str) -> Decimal {
        self.lock()
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.lock().balances.insert(asset.to_string(), amount);
    }

    /// Add to a balance, returning the new value.
    pub fn add_balance(&self, asset: &str, amount: Decimal) -> Decimal {
        let mut state = self.lock();
        let balance = state.balances.entry(asset.to_string()).or_default();
        *balance += amount;
        *balance
    }

    /// Subtract from a balance, returning the new value.
    pub fn sub_balance(&self, asset: &str, amount: Decimal) -> Decimal {
        self.add_balance(asset, -amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::MarketRef;
    use rust_decimal_macros::dec;

    fn order(id: OrderId) -> Order {
        Order::from_open(
            &OpenOrder::new(id, MarketRef::Id(148), Side::Buy, dec!(0.01), dec!(1.0)).unwrap(),
            dec!(0.25),
        )
    }

    #[test]
    fn test_from_open_derives_total_and_fee() {
        let mut open = OpenOrder::new(1, MarketRef::Id(148), Side::Sell, dec!(200), dec!(2)).unwrap();
        open.total = Decimal::ZERO;
        let order = Order::from_open(&open, dec!(0.25));

        assert_eq!(order.total, dec!(400));
        assert_eq!(order.fee, dec!(1));
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.filled().status, OrderStatus::Filled);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let ledger = OrderLedger::new();

        assert!(ledger.attach(order(12345)));
        assert!(!ledger.attach(order(12345)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_attach_keeps_first_entry() {
        let ledger = OrderLedger::new();
        ledger.attach(order(1));

        let mut replacement = order(1);
        replacement.price = dec!(99);
        ledger.attach(replacement);

        assert_eq!(ledger.get(1).unwrap().price, dec!(0.01));
    }

    #[test]
    fn test_detach_absent_is_noop() {
        let ledger = OrderLedger::new();
        ledger.attach(order(1));

        assert!(!ledger.detach(2));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.detach(1));
        assert!(ledger.is_empty());
        assert!(!ledger.detach(1));
    }

    #[test]
    fn test_get_not_found() {
        let ledger = OrderLedger::new();
        assert_eq!(ledger.get(7), Err(LedgerError::NotFound(7)));
        assert!(!ledger.contains(7));
    }

    #[test]
    fn test_mark_filled_once() {
        let ledger = OrderLedger::new();
        ledger.attach(order(5));

        assert_eq!(ledger.mark_filled(5), Ok(true));
        assert_eq!(ledger.mark_filled(5), Ok(false));
        assert_eq!(ledger.get(5).unwrap().status, OrderStatus::Filled);
        assert_eq!(ledger.mark_filled(6), Err(LedgerError::NotFound(6)));
    }

    #[test]
    fn test_counter_attach_retires_filled_order() {
        let ledger = OrderLedger::new();
        ledger.attach(order(5));
        ledger.mark_filled(5).unwrap();

        assert!(!ledger.link_counter(5, 90));
        assert!(ledger.contains(5));

        assert!(ledger.attach(order(90)));
        assert!(!ledger.contains(5));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_link_after_counter_attached() {
        let ledger = OrderLedger::new();
        ledger.attach(order(5));
        ledger.attach(order(90));
        ledger.mark_filled(5).unwrap();

        assert!(ledger.link_counter(5, 90));
        assert_eq!(ledger.orders().iter().map(|o| o.id).collect::<Vec<_>>(), vec![90]);
    }

    #[test]
    fn test_link_keeps_unfilled_order() {
        let ledger = OrderLedger::new();
        ledger.attach(order(5));
        ledger.link_counter(5, 90);

        ledger.attach(order(90));
        assert!(ledger.contains(5));
    }

    #[test]
    fn test_orders_sorted() {
        let ledger = OrderLedger::new();
        ledger.attach(order(3));
        ledger.attach(order(1));
        ledger.attach(order(2));

        let ids: Vec<_> = ledger.orders().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_balances() {
        let ledger = OrderLedger::new();
        assert_eq!(ledger.balance("ETH"), Decimal::ZERO);

        ledger.set_balance("ETH", dec!(1.5));
        assert_eq!(ledger.add_balance("ETH", dec!(0.5)), dec!(2.0));
        assert_eq!(ledger.sub_balance("ETH", dec!(0.25)), dec!(1.75));
        assert_eq!(ledger.add_balance("BTC", dec!(0.1)), dec!(0.1));
        assert_eq!(ledger.balance("ETH"), dec!(1.75));
    }

    #[test]
    fn test_concurrent_attach() {
        let ledger = std::sync::Arc::new(OrderLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    (0..100).filter(|id| ledger.attach(order(*id))).count()
                })
            })
            .collect();

        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(inserted, 100);
        assert_eq!(ledger.len(), 100);
    }
}
