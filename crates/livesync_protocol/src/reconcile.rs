//! Recency-based reconciliation of a local mirror with incoming records.
//!
//! The rules are the same whether records arrive as a fetched batch or as a
//! single pushed event:
//!
//! - An id absent locally is inserted.
//! - An id present locally is replaced only when
//!   `incoming.updated_at >= local.updated_at`. Ties favor the incoming
//!   record, so the feed is authoritative for same-instant writes.
//! - A delete removes the id unconditionally.
//! - The result is ordered newest first, ties broken by id ascending.
//!
//! Because the outcome depends only on timestamps, applying the same input
//! twice is a no-op and the arrival order of distinct records does not matter.

use crate::change::ChangeEvent;
use crate::record::{Record, Timestamp};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Result of reconciling incoming data against a local view.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<R> {
    /// The new view, newest first.
    pub records: Vec<R>,
    /// Number of ids that were not present before.
    pub inserted: usize,
    /// Number of existing entries replaced by an equal-or-newer version.
    pub replaced: usize,
    /// Number of incoming records rejected as stale.
    pub rejected: usize,
    /// Number of incoming records identical to the local entry.
    pub unchanged: usize,
    /// Number of entries removed by a delete.
    pub removed: usize,
}

impl<R> Reconciled<R> {
    /// Returns true if the view differs from the input view.
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced + self.removed > 0
    }
}

/// Merges incoming records into a local view.
pub fn merge<R: Record>(local: &[R], incoming: &[R]) -> Vec<R> {
    reconcile(local, incoming).records
}

/// Merges incoming records and reports what happened.
pub fn reconcile<R: Record>(local: &[R], incoming: &[R]) -> Reconciled<R> {
    let mut by_id: HashMap<&str, &R> = HashMap::with_capacity(local.len() + incoming.len());
    for record in local {
        by_id.insert(record.id(), record);
    }

    let (mut inserted, mut replaced, mut rejected, mut unchanged) = (0, 0, 0, 0);
    for record in incoming {
        match by_id.entry(record.id()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                inserted += 1;
            }
            Entry::Occupied(mut slot) => {
                if *slot.get() == record {
                    unchanged += 1;
                } else if record.updated_at() >= slot.get().updated_at() {
                    slot.insert(record);
                    replaced += 1;
                } else {
                    rejected += 1;
                }
            }
        }
    }

    let mut records: Vec<R> = by_id.into_values().cloned().collect();
    sort_newest_first(&mut records);

    Reconciled {
        records,
        inserted,
        replaced,
        rejected,
        unchanged,
        removed: 0,
    }
}

/// Applies a single change event to a local view.
pub fn apply_event<R: Record>(local: &[R], event: &ChangeEvent<R>) -> Vec<R> {
    reconcile_event(local, event).records
}

/// Applies a single change event and reports what happened.
pub fn reconcile_event<R: Record>(local: &[R], event: &ChangeEvent<R>) -> Reconciled<R> {
    match event {
        ChangeEvent::Insert(record) | ChangeEvent::Update(record) => {
            reconcile(local, std::slice::from_ref(record))
        }
        ChangeEvent::Delete { id } => {
            let records: Vec<R> = local.iter().filter(|r| r.id() != id).cloned().collect();
            let removed = local.len() - records.len();
            Reconciled {
                records,
                inserted: 0,
                replaced: 0,
                rejected: 0,
                unchanged: 0,
                removed,
            }
        }
    }
}

/// Orders records newest first, then by id ascending.
pub fn sort_newest_first<R: Record>(records: &mut [R]) {
    records.sort_by(|a, b| compare_recency(a, b));
}

fn compare_recency<R: Record>(a: &R, b: &R) -> Ordering {
    b.updated_at()
        .cmp(&a.updated_at())
        .then_with(|| a.id().cmp(b.id()))
}

/// Short-lived delete markers.
///
/// A delete followed by a late, redelivered update would otherwise
/// resurrect the record. While a tombstone is live, incoming records for
/// the id are admitted only if they are strictly newer than the version
/// that was deleted (or rejected outright if that version was unknown).
#[derive(Debug, Clone)]
pub struct Tombstones {
    grace: Duration,
    entries: HashMap<String, Tombstone>,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    deleted_version: Option<Timestamp>,
    expires_at: Instant,
}

impl Tombstones {
    /// Creates an empty set with the given grace period.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            entries: HashMap::new(),
        }
    }

    /// Returns the grace period.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Marks an id as deleted.
    pub fn insert(&mut self, id: &str, deleted_version: Option<Timestamp>, now: Instant) {
        self.entries.insert(
            id.to_string(),
            Tombstone {
                deleted_version,
                expires_at: now + self.grace,
            },
        );
    }

    /// Returns true if the record may enter the mirror.
    pub fn admits<R: Record>(&self, record: &R, now: Instant) -> bool {
        match self.entries.get(record.id()) {
            Some(t) if t.expires_at > now => t
                .deleted_version
                .map_or(false, |deleted| record.updated_at() > deleted),
            _ => true,
        }
    }

    /// Drops expired markers.
    pub fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, t| t.expires_at > now);
    }

    /// Number of markers, live or expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no markers are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
