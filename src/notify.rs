//! Operator notifications.
//!
//! Jobs report placed orders, idle periods, summaries and fatal errors as
//! markdown text. Delivery (chat, email) is up to the [`Notifier`]
//! implementation; [`LogNotifier`] writes the text through `tracing`.

use async_trait::async_trait;
use thiserror::Error;

/// Notification delivery errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Result type alias for notifications
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Sink for operator messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> NotifyResult<()>;
}

/// Notifier that logs each message at info level.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> NotifyResult<()> {
        tracing::info!(target: "gridline::notify", "{}", text);
        Ok(())
    }
}
