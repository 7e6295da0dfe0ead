//! Subscription registry for multiplexed channels.
//!
//! Maps each channel id to exactly one handler and one error slot. The reader
//! task dispatches decoded updates through [`SubscriptionRegistry::dispatch`]
//! and broadcasts terminal connection errors through
//! [`SubscriptionRegistry::notify_all`]. Neither ever blocks.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::shared::ChannelId;
use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::types::ChannelUpdate;

/// Callback invoked by the reader task for each update on a channel.
///
/// Must not block: it runs on the shared read loop.
pub type UpdateHandler = Box<dyn Fn(ChannelUpdate) + Send + Sync>;

struct Subscription {
    handler: UpdateHandler,
    errors: mpsc::Sender<WebSocketError>,
}

/// Active channel subscriptions, guarded by a single lock.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: Mutex<HashMap<ChannelId, Subscription>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, Subscription>> {
        self.subs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the single subscriber of `channel`.
    ///
    /// Returns the receiving end of the subscription's error slot (capacity 1).
    pub fn register(
        &self,
        channel: ChannelId,
        handler: UpdateHandler,
    ) -> WsResult<mpsc::Receiver<WebSocketError>> {
        let mut subs = self.lock();
        if subs.contains_key(&channel) {
            return Err(WebSocketError::AlreadySubscribed { channel });
        }

        let (errors, errors_rx) = mpsc::channel(1);
        subs.insert(channel, Subscription { handler, errors });
        Ok(errors_rx)
    }

    /// Drop the subscriber of `channel`. Returns whether one existed.
    pub fn remove(&self, channel: ChannelId) -> bool {
        self.lock().remove(&channel).is_some()
    }

    /// Hand an update to the channel's handler. Returns whether a handler existed.
    pub fn dispatch(&self, channel: ChannelId, update: ChannelUpdate) -> bool {
        let subs = self.lock();
        match subs.get(&channel) {
            Some(sub) => {
                (sub.handler)(update);
                true
            }
            None => false,
        }
    }

    /// Signal an error to one subscriber without blocking.
    pub fn notify(&self, channel: ChannelId, err: WebSocketError) -> bool {
        let subs = self.lock();
        match subs.get(&channel) {
            Some(sub) => {
                signal(channel, &sub.errors, err);
                true
            }
            None => false,
        }
    }

    /// Signal a terminal error to every subscriber. Returns how many were signalled.
    pub fn notify_all(&self, err: &WebSocketError) -> usize {
        let subs = self.lock();
        for (channel, sub) in subs.iter() {
            signal(*channel, &sub.errors, err.clone());
        }
        subs.len()
    }

    pub fn is_subscribed(&self, channel: ChannelId) -> bool {
        self.lock().contains_key(&channel)
    }

    /// Subscribed channel ids, sorted
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<_> = self.lock().keys().copied().collect();
        channels.sort();
        channels
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn signal(channel: ChannelId, slot: &mpsc::Sender<WebSocketError>, err: WebSocketError) {
    // A full slot already holds an undelivered error; the first one wins.
    if let Err(TrySendError::Full(dropped)) = slot.try_send(err) {
        tracing::debug!(channel = %channel, error = %dropped, "Error slot full, dropping error");
    }
}

/// Build a handler that forwards the updates selected by `extract` into `tx`.
///
/// Delivery is `try_send`: when the consumer falls behind, updates are dropped
/// with a warning rather than stalling the shared read loop.
pub fn forward_to<T, F>(channel: ChannelId, tx: mpsc::Sender<T>, extract: F) -> UpdateHandler
where
    T: Send + 'static,
    F: Fn(ChannelUpdate) -> Option<T> + Send + Sync + 'static,
{
    Box::new(move |update| {
        let Some(item) = extract(update) else {
            return;
        };
        match tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(channel = %channel, "Update channel full, dropping update");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(channel = %channel, "Update receiver dropped");
            }
        }
    })
}
