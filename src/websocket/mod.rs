//! Streaming client for the exchange push API.
//!
//! One [`Transport`] holds the single physical connection. Logical channels
//! (trading pair feeds and the private account feed) are multiplexed over it
//! through the [`SubscriptionRegistry`], and decoded by [`codec`].
//!
//! ```rust,ignore
//! use gridline::websocket::{ExchangeSocket, TransportConfig};
//! use gridline::shared::ChannelId;
//! use tokio::sync::{mpsc, watch};
//!
//! let socket = ExchangeSocket::new(TransportConfig::default());
//! let (tx, mut rx) = mpsc::channel(64);
//! let (stop_tx, stop) = watch::channel(false);
//!
//! tokio::spawn(async move { socket.subscribe_market_updates(ChannelId(148), tx, stop).await });
//! while let Some(update) = rx.recv().await {
//!     println!("{} deltas", update.order_book_deltas.len());
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod state;
pub mod subscriptions;
pub mod transport;
pub mod types;

pub use client::{EventFeed, ExchangeSocket, StopSignal, UNSUBSCRIBE_TIMEOUT};
pub use codec::{ChannelKind, DecodeError, Entry, Frame};
pub use error::{WebSocketError, WsResult};
pub use state::{ApplyOutcome, MarketBook};
pub use subscriptions::{SubscriptionRegistry, UpdateHandler};
pub use transport::{ConnectionState, Transport, TransportConfig};
pub use types::{
    AccountUpdate, ChannelUpdate, MarketUpdate, OpenOrder, OrderBookDelta, OrderTransition,
    TradeEvent, TransitionKind, WsRequest,
};
