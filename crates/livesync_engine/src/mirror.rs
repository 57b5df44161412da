//! The client-side copy of the remote collection.

use livesync_protocol::{reconcile, reconcile_event, ChangeEvent, Record, Reconciled, Tombstones};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a single mutation did to the mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorUpdate {
    /// Newly inserted ids.
    pub inserted: usize,
    /// Entries replaced by an equal-or-newer version.
    pub replaced: usize,
    /// Incoming records older than the local version.
    pub rejected: usize,
    /// Incoming records identical to the local version.
    pub unchanged: usize,
    /// Entries removed by a delete.
    pub removed: usize,
    /// Incoming records blocked by a delete tombstone.
    pub suppressed: usize,
}

impl MirrorUpdate {
    /// Returns true if the mirror contents changed.
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced + self.removed > 0
    }

    fn from_reconciled<R>(result: &Reconciled<R>, suppressed: usize) -> Self {
        Self {
            inserted: result.inserted,
            replaced: result.replaced,
            rejected: result.rejected,
            unchanged: result.unchanged,
            removed: result.removed,
            suppressed,
        }
    }
}

/// Ordered, id-unique view of the collection.
///
/// Mutated only through [`merge_batch`](Self::merge_batch) and
/// [`apply`](Self::apply); readers get cheap `Arc` snapshots.
#[derive(Debug)]
pub struct LocalMirror<R> {
    records: Arc<[R]>,
    tombstones: Option<Tombstones>,
}

impl<R: Record> LocalMirror<R> {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self {
            records: Arc::from(Vec::new()),
            tombstones: None,
        }
    }

    /// Creates an empty mirror that remembers deletes for `grace`.
    pub fn with_delete_grace(grace: Duration) -> Self {
        Self {
            records: Arc::from(Vec::new()),
            tombstones: Some(Tombstones::new(grace)),
        }
    }

    /// Returns a snapshot, newest first.
    pub fn snapshot(&self) -> Arc<[R]> {
        Arc::clone(&self.records)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the mirror is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up a record by id.
    pub fn get(&self, id: &str) -> Option<&R> {
        self.records.iter().find(|r| r.id() == id)
    }

    /// Merges a fetched batch.
    pub fn merge_batch(&mut self, incoming: &[R], now: Instant) -> MirrorUpdate {
        let admitted: Vec<R>;
        let mut suppressed = 0;
        let incoming = match self.tombstones.as_mut() {
            Some(tombstones) => {
                tombstones.purge(now);
                admitted = incoming
                    .iter()
                    .filter(|r| tombstones.admits(*r, now))
                    .cloned()
                    .collect();
                suppressed = incoming.len() - admitted.len();
                admitted.as_slice()
            }
            None => incoming,
        };

        if incoming.is_empty() {
            return MirrorUpdate {
                suppressed,
                ..MirrorUpdate::default()
            };
        }

        let result = reconcile(&self.records, incoming);
        let update = MirrorUpdate::from_reconciled(&result, suppressed);
        if update.changed() {
            self.records = Arc::from(result.records);
        }
        update
    }

    /// Applies a pushed change event.
    pub fn apply(&mut self, event: &ChangeEvent<R>, now: Instant) -> MirrorUpdate {
        match event {
            ChangeEvent::Insert(record) | ChangeEvent::Update(record) => {
                self.merge_batch(std::slice::from_ref(record), now)
            }
            ChangeEvent::Delete { id } => {
                if let Some(tombstones) = self.tombstones.as_mut() {
                    let version = self
                        .records
                        .iter()
                        .find(|r| r.id() == id)
                        .map(|r| r.updated_at());
                    tombstones.insert(id, version, now);
                }
                let result = reconcile_event(&self.records, event);
                let update = MirrorUpdate::from_reconciled(&result, 0);
                if update.changed() {
                    self.records = Arc::from(result.records);
                }
                update
            }
        }
    }
}

impl<R: Record> Default for LocalMirror<R> {
    fn default() -> Self {
        Self::new()
    }
}
