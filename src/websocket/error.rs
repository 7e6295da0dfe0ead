//! Error types for the exchange feed.

use thiserror::Error;

use crate::shared::ChannelId;

/// Feed and transport errors.
///
/// `Clone` so one terminal error can be broadcast to every subscriber.
#[derive(Debug, Clone, Error)]
pub enum WebSocketError {
    /// Dial failure
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer closed the connection
    #[error("Connection closed: code {code}, reason: {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// No frame arrived within the idle window
    #[error("Connection idle for {0:?}, no data received")]
    IdleTimeout(std::time::Duration),

    /// Frame could not be parsed
    #[error("Failed to parse message: {0}")]
    MessageParseError(String),

    /// Channel already has a subscriber
    #[error("Channel {channel} already subscribed")]
    AlreadySubscribed { channel: ChannelId },

    /// Subscribe or unsubscribe command did not complete
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// WebSocket protocol error
    #[error("WebSocket protocol error: {0}")]
    Protocol(String),

    /// Transport shut down or connection discarded
    #[error("Not connected to WebSocket server")]
    NotConnected,

    /// Send failed
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Channel closed
    #[error("Internal channel closed")]
    ChannelClosed,

    /// Invalid URL
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Credentials rejected or unusable
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Private channel requested without credentials
    #[error("Authentication required for account stream")]
    AuthRequired,
}

impl WebSocketError {
    /// Auth failures end a job's account stream instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::AuthenticationFailed(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WebSocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed => WebSocketError::ConnectionClosed {
                code: 1000,
                reason: "Connection closed normally".to_string(),
            },
            Error::AlreadyClosed => WebSocketError::NotConnected,
            Error::Io(e) => WebSocketError::Io(e.to_string()),
            Error::Protocol(e) => WebSocketError::Protocol(e.to_string()),
            Error::Url(e) => WebSocketError::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                WebSocketError::ConnectionFailed(format!("HTTP error: {:?}", resp.status()))
            }
            Error::HttpFormat(e) => WebSocketError::ConnectionFailed(e.to_string()),
            other => WebSocketError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WebSocketError {
    fn from(err: serde_json::Error) -> Self {
        WebSocketError::MessageParseError(err.to_string())
    }
}

impl From<crate::auth::AuthError> for WebSocketError {
    fn from(err: crate::auth::AuthError) -> Self {
        match err {
            crate::auth::AuthError::MissingCredentials => WebSocketError::AuthRequired,
            other => WebSocketError::AuthenticationFailed(other.to_string()),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WebSocketError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        WebSocketError::ChannelClosed
    }
}

/// Result type alias for feed operations
pub type WsResult<T> = Result<T, WebSocketError>;
