//! # LiveSync Protocol
//!
//! Record, filter and change-feed types for live collection sync.
//!
//! This crate provides:
//! - The `Record` trait and a schemaless `Document`
//! - `CollectionFilter` shared by queries and subscriptions
//! - `ChangeEvent` and the `RawChange` wire payload
//! - Recency-based reconciliation (`merge`, `apply_event`)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod error;
mod filter;
mod reconcile;
mod record;

pub use change::{ChangeEvent, ChangeKind, ChannelStatus, RawChange};
pub use error::{ProtocolError, ProtocolResult};
pub use filter::{CollectionFilter, EqPredicate};
pub use reconcile::{
    apply_event, merge, reconcile, reconcile_event, sort_newest_first, Reconciled, Tombstones,
};
pub use record::{timestamp, Document, Record, Timestamp};
