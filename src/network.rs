//! Network URL constants for the exchange endpoints.

/// Default WebSocket push API URL.
pub const DEFAULT_WS_URL: &str = "wss://api2.poloniex.com";
