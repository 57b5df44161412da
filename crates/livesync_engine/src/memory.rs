//! In-memory record store with a change feed.
//!
//! Useful for tests and simulations: it behaves like a hosted backend
//! (filtered queries, per-subscription change payloads, connection
//! statuses) and lets the caller inject outages.

use crate::error::{StoreError, StoreResult};
use crate::store::{FeedSender, RecordStore, Subscription, SubscriptionId};
use async_trait::async_trait;
use livesync_protocol::{ChangeKind, ChannelStatus, CollectionFilter, RawChange, Record};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

struct Subscriber {
    filter: CollectionFilter,
    sender: FeedSender,
}

/// A single-collection store kept in memory.
pub struct MemoryRecordStore<R> {
    collection: String,
    rows: RwLock<BTreeMap<String, R>>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    fetch_failure: Mutex<Option<String>>,
    subscribe_failure: Mutex<Option<String>>,
    auto_connect: AtomicBool,
    fetch_calls: AtomicU64,
    subscribe_calls: AtomicU64,
    unsubscribe_calls: AtomicU64,
}

impl<R> MemoryRecordStore<R>
where
    R: Record + Serialize,
{
    /// Creates an empty store for one collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            rows: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fetch_failure: Mutex::new(None),
            subscribe_failure: Mutex::new(None),
            auto_connect: AtomicBool::new(true),
            fetch_calls: AtomicU64::new(0),
            subscribe_calls: AtomicU64::new(0),
            unsubscribe_calls: AtomicU64::new(0),
        }
    }

    /// Creates a store pre-filled with rows, without emitting events.
    pub fn with_records(collection: impl Into<String>, records: impl IntoIterator<Item = R>) -> Self {
        let store = Self::new(collection);
        {
            let mut rows = store.rows.write();
            for record in records {
                rows.insert(record.id().to_string(), record);
            }
        }
        store
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns a stored row.
    pub fn get(&self, id: &str) -> Option<R> {
        self.rows.read().get(id).cloned()
    }

    /// Inserts or replaces a row and publishes INSERT or UPDATE.
    pub fn upsert(&self, record: R) {
        let existed = self
            .rows
            .write()
            .insert(record.id().to_string(), record.clone())
            .is_some();
        let kind = if existed {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        match serde_json::to_value(&record) {
            Ok(row) => self.publish(&row, RawChange::new(kind, row.clone())),
            Err(err) => warn!(id = record.id(), error = %err, "cannot serialize record"),
        }
    }

    /// Removes a row and publishes DELETE.
    pub fn remove(&self, id: &str) -> Option<R> {
        let removed = self.rows.write().remove(id)?;
        let row = serde_json::to_value(&removed).unwrap_or_else(|_| json!({ "id": id }));
        self.publish(&row, RawChange::new(ChangeKind::Delete, json!({ "id": id })));
        Some(removed)
    }

    /// Sends a raw payload to every open subscription.
    pub fn publish_raw(&self, change: RawChange) {
        self.subscribers
            .lock()
            .retain(|_, sub| sub.sender.change(change.clone()));
    }

    /// Reports `Connected` on every open subscription.
    pub fn connect_all(&self) {
        self.broadcast_status(ChannelStatus::Connected, None);
    }

    /// Reports `Closed` on every open subscription and drops them.
    pub fn close_channels(&self, reason: &str) {
        self.end_channels(ChannelStatus::Closed, reason);
    }

    /// Reports `Error` on every open subscription and drops them.
    pub fn fail_channels(&self, reason: &str) {
        self.end_channels(ChannelStatus::Error, reason);
    }

    /// Makes `fetch_all` fail with the given message, or succeed again with `None`.
    pub fn set_fetch_failure(&self, message: Option<&str>) {
        *self.fetch_failure.lock() = message.map(str::to_string);
    }

    /// Makes `subscribe` fail with the given message, or succeed again with `None`.
    pub fn set_subscribe_failure(&self, message: Option<&str>) {
        *self.subscribe_failure.lock() = message.map(str::to_string);
    }

    /// Whether new subscriptions report `Connected` right away (default true).
    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::SeqCst);
    }

    /// Number of `fetch_all` calls, failed ones included.
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of `subscribe` calls, failed ones included.
    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of `unsubscribe` calls.
    pub fn unsubscribe_calls(&self) -> u64 {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of open subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn publish(&self, row: &Value, change: RawChange) {
        let change = change.with_table(self.collection.clone());
        self.subscribers.lock().retain(|_, sub| {
            if sub.filter.matches(row) {
                sub.sender.change(change.clone())
            } else {
                !sub.sender.is_closed()
            }
        });
    }

    fn broadcast_status(&self, status: ChannelStatus, reason: Option<&str>) {
        self.subscribers
            .lock()
            .retain(|_, sub| sub.sender.status(status, reason.map(str::to_string)));
    }

    fn end_channels(&self, status: ChannelStatus, reason: &str) {
        let ended: Vec<Subscriber> = self.subscribers.lock().drain().map(|(_, s)| s).collect();
        for sub in ended {
            sub.sender.status(status, Some(reason.to_string()));
        }
    }

    fn check_collection(&self, filter: &CollectionFilter) -> StoreResult<()> {
        if filter.collection == self.collection {
            Ok(())
        } else {
            Err(StoreError::Rejected(format!(
                "unknown collection {:?}",
                filter.collection
            )))
        }
    }
}

#[async_trait]
impl<R> RecordStore<R> for MemoryRecordStore<R>
where
    R: Record + Serialize,
{
    async fn fetch_all(&self, filter: &CollectionFilter) -> StoreResult<Vec<R>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fetch_failure.lock().clone() {
            return Err(StoreError::Unavailable(message));
        }
        self.check_collection(filter)?;

        let rows = self.rows.read();
        let mut matching = Vec::with_capacity(rows.len());
        for record in rows.values() {
            let row = serde_json::to_value(record)
                .map_err(|e| StoreError::Rejected(format!("cannot serialize row: {e}")))?;
            if filter.matches(&row) {
                matching.push(record.clone());
            }
        }
        Ok(matching)
    }

    async fn subscribe(&self, filter: &CollectionFilter) -> StoreResult<Subscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.subscribe_failure.lock().clone() {
            return Err(StoreError::Subscribe(message));
        }
        self.check_collection(filter)?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, subscription) = Subscription::channel(id, filter.topic());
        sender.status(ChannelStatus::Connecting, None);
        if self.auto_connect.load(Ordering::SeqCst) {
            sender.status(ChannelStatus::Connected, None);
        }
        self.subscribers.lock().insert(
            id,
            Subscriber {
                filter: filter.clone(),
                sender,
            },
        );
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: Subscription) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().remove(&subscription.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FeedMessage;
    use chrono::{TimeZone, Utc};
    use livesync_protocol::{ChangeEvent, Document};

    fn doc(id: &str, secs: i64, project: &str) -> Document {
        Document::new(id, Utc.timestamp_opt(secs, 0).unwrap()).with_field("project_id", project)
    }

    fn filter(project: &str) -> CollectionFilter {
        CollectionFilter::new("measurements").eq("project_id", project)
    }

    #[tokio::test]
    async fn fetch_honours_filter_and_failures() {
        let store = MemoryRecordStore::with_records(
            "measurements",
            vec![doc("a", 1, "p1"), doc("b", 2, "p2"), doc("c", 3, "p1")],
        );

        let rows = store.fetch_all(&filter("p1")).await.unwrap();
        let mut ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "c"]);

        assert!(matches!(
            store.fetch_all(&CollectionFilter::new("windows")).await,
            Err(StoreError::Rejected(_))
        ));

        store.set_fetch_failure(Some("offline"));
        assert!(matches!(
            store.fetch_all(&filter("p1")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn subscription_receives_scoped_changes() {
        let store = MemoryRecordStore::<Document>::new("measurements");
        let mut sub = store.subscribe(&filter("p1")).await.unwrap();
        assert_eq!(sub.topic(), "measurements:project_id=eq.p1");

        assert!(matches!(
            sub.next().await,
            Some(FeedMessage::Status { status: ChannelStatus::Connecting, .. })
        ));
        assert!(matches!(
            sub.next().await,
            Some(FeedMessage::Status { status: ChannelStatus::Connected, .. })
        ));

        store.upsert(doc("x", 1, "p2"));
        store.upsert(doc("a", 1, "p1"));
        store.upsert(doc("a", 2, "p1"));
        store.remove("a");

        let mut kinds = Vec::new();
        for _ in 0..3 {
            match sub.next().await {
                Some(FeedMessage::Change(raw)) => {
                    let event: ChangeEvent<Document> = raw.decode().unwrap();
                    assert_eq!(event.id(), "a");
                    kinds.push(event.kind());
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(kinds, vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]);
    }

    #[tokio::test]
    async fn closing_channels_ends_subscriptions() {
        let store = MemoryRecordStore::<Document>::new("measurements");
        store.set_auto_connect(false);
        let mut sub = store.subscribe(&CollectionFilter::new("measurements")).await.unwrap();
        assert_eq!(store.active_subscriptions(), 1);

        store.close_channels("server restart");
        assert_eq!(store.active_subscriptions(), 0);

        assert!(matches!(
            sub.next().await,
            Some(FeedMessage::Status { status: ChannelStatus::Connecting, .. })
        ));
        match sub.next().await {
            Some(FeedMessage::Status { status, reason }) => {
                assert_eq!(status, ChannelStatus::Closed);
                assert_eq!(reason.as_deref(), Some("server restart"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_failure_and_unsubscribe() {
        let store = MemoryRecordStore::<Document>::new("measurements");
        store.set_subscribe_failure(Some("realtime disabled"));
        assert!(matches!(
            store.subscribe(&CollectionFilter::new("measurements")).await,
            Err(StoreError::Subscribe(_))
        ));

        store.set_subscribe_failure(None);
        let sub = store.subscribe(&CollectionFilter::new("measurements")).await.unwrap();
        store.unsubscribe(sub);
        assert_eq!(store.active_subscriptions(), 0);
        assert_eq!(store.subscribe_calls(), 2);
        assert_eq!(store.unsubscribe_calls(), 1);
    }
}
