//! Channel subscriptions over the shared transport.
//!
//! [`ExchangeSocket`] turns the transport and registry into long-running
//! subscribe calls: each call registers its channel, sends the subscribe
//! command, then holds until the caller's stop signal fires or the connection
//! reports an error. Every exit path unsubscribes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::auth::{self, Credentials, NonceGenerator};
use crate::shared::ChannelId;
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::subscriptions::{forward_to, UpdateHandler};
use crate::websocket::transport::{ConnectionState, Transport, TransportConfig};
use crate::websocket::types::{AccountUpdate, ChannelUpdate, MarketUpdate, WsRequest};

/// Bound on the unsubscribe command write
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Stop signal for subscribe loops. `true`, or a dropped sender, means stop.
pub type StopSignal = watch::Receiver<bool>;

/// Subscribe operations consumed by a job.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Stream account updates into `updates` until stopped or failed.
    async fn subscribe_account_updates(
        &self,
        updates: mpsc::Sender<AccountUpdate>,
        stop: StopSignal,
    ) -> WsResult<()>;

    /// Stream one market channel into `updates` until stopped or failed.
    async fn subscribe_market_updates(
        &self,
        channel: ChannelId,
        updates: mpsc::Sender<MarketUpdate>,
        stop: StopSignal,
    ) -> WsResult<()>;
}

/// Exchange push API client
///
/// # Example
///
/// ```ignore
/// use gridline::prelude::*;
/// use tokio::sync::{mpsc, watch};
///
/// #[tokio::main]
/// async fn main() -> Result<(), WebSocketError> {
///     let socket = ExchangeSocket::new(TransportConfig::default());
///     let (tx, mut rx) = mpsc::channel(64);
///     let (_stop_tx, stop) = watch::channel(false);
///
///     tokio::spawn(async move {
///         while let Some(update) = rx.recv().await {
///             println!("{:?}", update);
///         }
///     });
///
///     socket.subscribe_market_updates(ChannelId(148), tx, stop).await
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ExchangeSocket {
    transport: Transport,
    credentials: Option<Credentials>,
    nonces: Arc<NonceGenerator>,
    unsubscribe_timeout: Duration,
}

impl ExchangeSocket {
    /// Create a socket with its own transport. Requires a tokio runtime.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_transport(Transport::new(config))
    }

    /// Share an existing transport.
    pub fn with_transport(transport: Transport) -> Self {
        Self {
            transport,
            credentials: None,
            nonces: Arc::new(NonceGenerator::new()),
            unsubscribe_timeout: UNSUBSCRIBE_TIMEOUT,
        }
    }

    /// Credentials used to sign the account subscription.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Bound on the unsubscribe command write. Defaults to [`UNSUBSCRIBE_TIMEOUT`].
    pub fn with_unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.unsubscribe_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Subscribe to a trading pair channel.
    ///
    /// Blocks until `stop` fires (returns `Ok`) or the subscription fails.
    pub async fn subscribe_market_updates(
        &self,
        channel: ChannelId,
        updates: mpsc::Sender<MarketUpdate>,
        stop: StopSignal,
    ) -> WsResult<()> {
        if channel.is_account() {
            return Err(WebSocketError::SubscriptionFailed(
                "account channel needs a signed subscription".to_string(),
            ));
        }

        let handler = forward_to(channel, updates, |update| match update {
            ChannelUpdate::Market(m) => Some(m),
            ChannelUpdate::Account(_) => None,
        });
        self.run_subscription(channel, WsRequest::subscribe(channel), handler, stop)
            .await
    }

    /// Subscribe to the private account channel.
    ///
    /// Fails with [`WebSocketError::AuthRequired`] before touching the network
    /// when no credentials are configured.
    pub async fn subscribe_account_updates(
        &self,
        updates: mpsc::Sender<AccountUpdate>,
        stop: StopSignal,
    ) -> WsResult<()> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(WebSocketError::AuthRequired)?;
        let signed = auth::sign_nonce(credentials, self.nonces.next()?)?;

        let handler = forward_to(ChannelId::ACCOUNT, updates, |update| match update {
            ChannelUpdate::Account(a) => Some(a),
            ChannelUpdate::Market(_) => None,
        });
        self.run_subscription(
            ChannelId::ACCOUNT,
            WsRequest::subscribe_account(signed),
            handler,
            stop,
        )
        .await
    }

    async fn run_subscription(
        &self,
        channel: ChannelId,
        request: WsRequest,
        handler: UpdateHandler,
        mut stop: StopSignal,
    ) -> WsResult<()> {
        let mut errors = self.transport.registry().register(channel, handler)?;
        tracing::info!(channel = %channel, "Subscribing");

        let result = self.hold(&request, &mut errors, &mut stop).await;
        if let Err(e) = &result {
            tracing::warn!(channel = %channel, error = %e, "Subscription ended with error");
        }

        self.unsubscribe(channel).await;
        result
    }

    /// Wait for the subscribe write, then for stop or error, whichever comes first.
    async fn hold(
        &self,
        request: &WsRequest,
        errors: &mut mpsc::Receiver<WebSocketError>,
        stop: &mut StopSignal,
    ) -> WsResult<()> {
        tokio::select! {
            sent = self.transport.send(request) => sent?,
            _ = stopped(stop) => return Ok(()),
            err = errors.recv() => return Err(err.unwrap_or(WebSocketError::ChannelClosed)),
        }
        tracing::debug!(channel = %request.channel, "Subscribe command written");

        tokio::select! {
            _ = stopped(stop) => Ok(()),
            err = errors.recv() => Err(err.unwrap_or(WebSocketError::ChannelClosed)),
        }
    }

    /// Send `unsubscribe` (bounded by the unsubscribe timeout) and drop the
    /// local registration regardless of the outcome.
    ///
    /// Server-side subscriptions die with their connection, so nothing is
    /// written when the transport is not connected.
    pub async fn unsubscribe(&self, channel: ChannelId) {
        if self.transport.state() != ConnectionState::Connected {
            tracing::debug!(channel = %channel, "Not connected, dropping subscription locally");
            self.transport.registry().remove(channel);
            return;
        }

        let request = WsRequest::unsubscribe(channel);
        match tokio::time::timeout(self.unsubscribe_timeout, self.transport.send(&request)).await {
            Ok(Ok(())) => tracing::debug!(channel = %channel, "Unsubscribed"),
            Ok(Err(e)) => {
                tracing::warn!(channel = %channel, error = %e, "Unsubscribe command failed")
            }
            Err(_) => {
                tracing::warn!(channel = %channel, "Unsubscribe timed out");
                self.transport.registry().notify(
                    channel,
                    WebSocketError::SubscriptionFailed("unsubscribe timed out".to_string()),
                );
            }
        }
        self.transport.registry().remove(channel);
    }

    /// Close the underlying transport.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

/// Resolve once `stop` reads `true` or its sender is dropped.
pub(crate) async fn stopped(stop: &mut StopSignal) {
    // Err means the sender is gone, which also stops the loop.
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Whether `stop` has already fired, without waiting.
pub(crate) fn is_stopped(stop: &StopSignal) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

#[async_trait]
impl EventFeed for ExchangeSocket {
    async fn subscribe_account_updates(
        &self,
        updates: mpsc::Sender<AccountUpdate>,
        stop: StopSignal,
    ) -> WsResult<()> {
        ExchangeSocket::subscribe_account_updates(self, updates, stop).await
    }

    async fn subscribe_market_updates(
        &self,
        channel: ChannelId,
        updates: mpsc::Sender<MarketUpdate>,
        stop: StopSignal,
    ) -> WsResult<()> {
        ExchangeSocket::subscribe_market_updates(self, channel, updates, stop).await
    }
}
