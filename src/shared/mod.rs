//! Shared utilities and types used by the feed, the ledger and the grid engine.

pub mod decimal;
pub mod types;

// Re-export commonly used items
pub use decimal::{default_lot_size, format_decimal, parse_decimal, percent_of, quantize_down};
pub use types::*;
