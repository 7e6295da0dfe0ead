//! Markdown reports sent to the operator.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::grid::{CounterOrder, GridConfig};
use crate::ledger::{Order, OrderStatus};
use crate::shared::{percent_of, Side};

/// Trading results over the last 24 hours, from persisted fill records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Base asset amount sold
    pub volume: Decimal,
    /// Quote asset gained by completed sells, net of both fees
    pub profit: Decimal,
    pub sells: usize,
    pub buys: usize,
    /// Profit relative to the per-buy volume
    pub profit_percent: Decimal,
}

impl Summary {
    /// Aggregate `records` filled within 24 hours before `now`.
    ///
    /// Each filled sell is paired with the buy one sell step below it, which is
    /// where the grid bought that amount.
    pub fn from_records(records: &[Order], now: DateTime<Utc>, grid: &GridConfig) -> Self {
        let window = Duration::hours(24);
        let mut summary = Self::default();

        let recent = records
            .iter()
            .filter(|o| o.status == OrderStatus::Filled && now - o.placed_at <= window);
        for order in recent {
            match order.side {
                Side::Sell => match sell_profit(order, grid) {
                    Some(profit) => {
                        summary.volume += order.volume;
                        summary.profit += profit;
                        summary.sells += 1;
                    }
                    None => tracing::warn!(order_id = order.id, "Record out of range, skipped"),
                },
                Side::Buy => summary.buys += 1,
            }
        }

        if grid.volume > Decimal::ZERO {
            summary.profit_percent = summary.profit / grid.volume * Decimal::ONE_HUNDRED;
        }
        summary
    }

    pub fn to_markdown(&self, exchange: &str, symbol: &str) -> String {
        format!(
            "#### {} {} Summary\n\n\
             | Volume | Profit | Sell Orders | Buy Orders | P% |\n\
             |:-------|:-------|:------------|:-----------|:---|\n\
             | {:.8} | {:.8} | {} | {} | {:.4}% |",
            exchange.to_uppercase(),
            symbol.to_uppercase(),
            self.volume,
            self.profit,
            self.sells,
            self.buys,
            self.profit_percent,
        )
    }
}

/// Net quote gain of a filled sell against the buy one sell step below it.
fn sell_profit(order: &Order, grid: &GridConfig) -> Option<Decimal> {
    let sell_total = order.volume.checked_mul(order.price)?;
    let buy_price = order.price.checked_sub(grid.step_for(Side::Sell))?;
    let buy_total = order.volume.checked_mul(buy_price)?;
    let fees = percent_of(sell_total, grid.fee_percent)
        .checked_add(percent_of(buy_total, grid.fee_percent))?;
    sell_total.checked_sub(buy_total)?.checked_sub(fees)
}

/// Quote asset gained by answering `filled` with `counter`.
pub fn gain(filled: &Order, counter: &CounterOrder) -> Decimal {
    match counter.side {
        Side::Buy => filled.total - counter.total,
        Side::Sell => counter.total - filled.total,
    }
}

pub fn order_placed(exchange: &str, symbol: &str, filled: &Order, counter: &CounterOrder) -> String {
    format!(
        "#### {} {} order placed on {}\n\n\
         | Gain | Price | Amount | Total |\n\
         |:-----|:------|:-------|:------|\n\
         | {:.8} | {:.8} | {:.8} | {:.8} |",
        counter.side.as_str().to_uppercase(),
        symbol.to_uppercase(),
        exchange.to_uppercase(),
        gain(filled, counter),
        counter.price,
        counter.quantity,
        counter.total,
    )
}

pub fn idling(exchange: &str, symbol: &str, minutes: i64) -> String {
    format!(
        "#### {} on {} is idling\n\nNo order activity for {} minutes.",
        symbol.to_uppercase(),
        exchange.to_uppercase(),
        minutes
    )
}

pub fn stopped(exchange: &str, symbol: &str, reason: &str) -> String {
    format!(
        "#### {} on {} stopped\n\n{}",
        symbol.to_uppercase(),
        exchange.to_uppercase(),
        reason
    )
}
