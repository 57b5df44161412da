//! Record store abstraction.
//!
//! The engine needs two capabilities from a backend: a filtered query and a
//! push channel of change payloads plus connection statuses. Any backend
//! with query + publish/subscribe semantics can implement [`RecordStore`].

use crate::error::StoreResult;
use async_trait::async_trait;
use livesync_protocol::{ChannelStatus, CollectionFilter, RawChange, Record};
use tokio::sync::mpsc;

/// Identifier of an open subscription, unique per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// A message delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Connection status change.
    Status {
        /// New status.
        status: ChannelStatus,
        /// Backend-supplied reason, mostly for `Error` and `Closed`.
        reason: Option<String>,
    },
    /// Undecoded change payload.
    Change(RawChange),
}

/// An open change-feed channel.
///
/// Owned by exactly one consumer and handed back to
/// [`RecordStore::unsubscribe`] to close it, so it cannot be closed twice.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    messages: mpsc::UnboundedReceiver<FeedMessage>,
}

impl Subscription {
    /// Creates a subscription and the sender side that feeds it.
    pub fn channel(id: SubscriptionId, topic: impl Into<String>) -> (FeedSender, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Subscription {
            id,
            topic: topic.into(),
            messages: rx,
        };
        (FeedSender { id, tx }, sub)
    }

    /// Returns the subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the channel topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receives the next message. `None` once the sender side is gone.
    pub async fn next(&mut self) -> Option<FeedMessage> {
        self.messages.recv().await
    }
}

/// Sender side of a subscription, held by the store.
#[derive(Debug, Clone)]
pub struct FeedSender {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<FeedMessage>,
}

impl FeedSender {
    /// Returns the subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Reports a status. Returns false if the subscriber is gone.
    pub fn status(&self, status: ChannelStatus, reason: Option<String>) -> bool {
        self.tx.send(FeedMessage::Status { status, reason }).is_ok()
    }

    /// Delivers a change payload. Returns false if the subscriber is gone.
    pub fn change(&self, change: RawChange) -> bool {
        self.tx.send(FeedMessage::Change(change)).is_ok()
    }

    /// Returns true if the subscriber dropped its end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A queryable store with a change feed.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync + 'static {
    /// Fetches every record matching the filter.
    async fn fetch_all(&self, filter: &CollectionFilter) -> StoreResult<Vec<R>>;

    /// Opens a change-feed channel scoped by the filter.
    ///
    /// The returned subscription reports `Connecting` / `Connected` /
    /// `Error` / `Closed` statuses and change payloads as they happen.
    async fn subscribe(&self, filter: &CollectionFilter) -> StoreResult<Subscription>;

    /// Closes a channel.
    fn unsubscribe(&self, subscription: Subscription);
}
