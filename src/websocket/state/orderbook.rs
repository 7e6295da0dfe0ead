//! Local order book for one market channel.
//!
//! Maintains a copy of the book from snapshot and delta updates, plus the most
//! recent public trade.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::shared::{BookSide, ChannelId};
use crate::websocket::types::{MarketUpdate, OrderBookDelta, TradeEvent};

/// Result of applying one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Delta at or behind the last applied sequence; ignored
    Stale { last: i64, received: i64 },
}

/// Local order book state
#[derive(Debug, Clone)]
pub struct MarketBook {
    pub channel: ChannelId,
    /// Bid levels (price -> size)
    bids: BTreeMap<Decimal, Decimal>,
    /// Ask levels (price -> size)
    asks: BTreeMap<Decimal, Decimal>,
    last_sequence: i64,
    has_snapshot: bool,
    last_trade: Option<TradeEvent>,
}

impl MarketBook {
    /// Create a new empty book
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence: 0,
            has_snapshot: false,
            last_trade: None,
        }
    }

    /// Apply a snapshot or delta update.
    ///
    /// Snapshots always replace the book. Deltas whose sequence does not move
    /// forward are reported as stale and leave the book untouched.
    pub fn apply(&mut self, update: &MarketUpdate) -> ApplyOutcome {
        if update.is_snapshot {
            self.bids.clear();
            self.asks.clear();
            self.has_snapshot = true;
        } else if update.sequence <= self.last_sequence {
            return ApplyOutcome::Stale {
                last: self.last_sequence,
                received: update.sequence,
            };
        }

        for delta in &update.order_book_deltas {
            self.apply_level(delta);
        }
        if let Some(trade) = update.trades.last() {
            self.last_trade = Some(trade.clone());
        }
        self.last_sequence = update.sequence;
        ApplyOutcome::Applied
    }

    fn apply_level(&mut self, delta: &OrderBookDelta) {
        let levels = match delta.side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        if delta.is_removal() {
            levels.remove(&delta.price);
        } else {
            levels.insert(delta.price, delta.size);
        }
    }

    /// Get the best bid (highest bid price)
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.iter().next_back().map(|(&p, &s)| (p, s))
    }

    /// Get the best ask (lowest ask price)
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.iter().next().map(|(&p, &s)| (p, s))
    }

    /// Get the spread (best_ask - best_bid)
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((ask - bid).max(Decimal::ZERO)),
            _ => None,
        }
    }

    /// Get the midpoint price
    pub fn midpoint(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Top `n` bids, best first
    pub fn top_bids(&self, n: usize) -> Vec<(Decimal, Decimal)> {
        self.bids.iter().rev().take(n).map(|(&p, &s)| (p, s)).collect()
    }

    /// Top `n` asks, best first
    pub fn top_asks(&self, n: usize) -> Vec<(Decimal, Decimal)> {
        self.asks.iter().take(n).map(|(&p, &s)| (p, s)).collect()
    }

    pub fn last_trade(&self) -> Option<&TradeEvent> {
        self.last_trade.as_ref()
    }

    pub fn last_sequence(&self) -> i64 {
        self.last_sequence
    }

    /// Whether the initial snapshot has been received
    pub fn has_snapshot(&self) -> bool {
        self.has_snapshot
    }

    /// Level counts (bids, asks)
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}
