//! Local state rebuilt from market channel updates.

pub mod orderbook;

pub use orderbook::{ApplyOutcome, MarketBook};
