//! # gridline
//!
//! Grid trading engine over a multiplexed exchange WebSocket feed.
//!
//! ## Modules
//!
//! The streaming side:
//! - [`websocket`]: one shared connection, positional frame codec, channel
//!   subscriptions and a local order book
//! - [`auth`]: signing of the private account subscription
//!
//! The trading side:
//! - [`ledger`]: open orders and balances of a job
//! - [`grid`]: counter-order computation
//! - [`job`]: reconciliation, streaming, placement with retry, alerts
//! - [`runner`]: several jobs and their minute tick
//!
//! Collaborators behind traits: [`gateway`] (trade endpoints), [`store`]
//! (filled-order records) and [`notify`] (operator messages).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gridline::prelude::*;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: JobConfig = serde_json::from_str(include_str!("btc_eth.json"))?;
//!     let provider = ProviderConfig { name: "main".into(), key: "...".into(), secret: "...".into() };
//!
//!     let mut socket = ExchangeSocket::new(TransportConfig::new(DEFAULT_WS_URL));
//!     if let Some(credentials) = provider.credentials() {
//!         socket = socket.with_credentials(credentials);
//!     }
//!
//!     let services = JobServices {
//!         gateway: Arc::new(my_rest_client()),
//!         feed: Arc::new(socket),
//!         store: Arc::new(FileOrderStore::new(&config.order_dir)),
//!         notifier: Arc::new(LogNotifier),
//!     };
//!
//!     let mut runner = Runner::new();
//!     runner.add(Job::new("btc-eth", config, services)?);
//!
//!     let (stop_tx, stop) = watch::channel(false);
//!     runner.start(stop);
//!     tokio::signal::ctrl_c().await?;
//!     stop_tx.send_replace(true);
//!
//!     for (id, result) in runner.join().await {
//!         println!("{}: {:?}", id, result);
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Shared utilities and types.
/// Decimal helpers, sides, channel ids and pair metadata.
pub mod shared;

/// Network URL constants.
pub mod network;

/// Account subscription signing (HMAC-SHA512 over a nonce payload).
pub mod auth;

/// Streaming client: transport, codec, subscriptions, local state.
pub mod websocket;

/// Per-job order and balance ledger.
pub mod ledger;

/// Grid strategy engine.
pub mod grid;

/// Exchange trade endpoints, as a trait.
pub mod gateway;

/// Filled-order records.
pub mod store;

/// Operator notifications.
pub mod notify;

/// Job and provider configuration.
pub mod config;

/// Grid job controller.
pub mod job;

/// Multi-job runner.
pub mod runner;

// ============================================================================
// PRELUDE
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use gridline::prelude::*;
/// ```
pub mod prelude {
    // Shared types
    pub use crate::shared::{
        format_decimal, parse_decimal, quantize_down, ChannelId, MarketRef, OrderId,
        PairMetadata, Side,
    };

    // Network constants
    pub use crate::network::DEFAULT_WS_URL;

    // Auth
    pub use crate::auth::{AuthError, AuthResult, Credentials};

    // Streaming
    pub use crate::websocket::{
        AccountUpdate, ChannelUpdate, ConnectionState, EventFeed, ExchangeSocket, MarketBook,
        MarketUpdate, OpenOrder, OrderTransition, StopSignal, TransitionKind, Transport,
        TransportConfig, WebSocketError, WsResult,
    };

    // Trading
    pub use crate::config::{AlertConfig, ConfigError, JobConfig, ProviderConfig};
    pub use crate::gateway::{ExchangeGateway, GatewayError, GatewayResult, OrderConfirmation};
    pub use crate::grid::{compute_counter_order, CounterOrder, GridConfig, GridError};
    pub use crate::job::{Job, JobError, JobResult, JobServices, JobState, Summary};
    pub use crate::ledger::{Order, OrderLedger, OrderStatus};
    pub use crate::notify::{LogNotifier, Notifier, NotifyError};
    pub use crate::runner::Runner;
    pub use crate::store::{FileOrderStore, OrderStore, StoreError};
}
