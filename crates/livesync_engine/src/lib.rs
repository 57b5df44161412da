//! # LiveSync Engine
//!
//! Keeps a local mirror of a remote collection fresh.
//!
//! This crate provides:
//! - `LiveCollection`, the orchestrator behind every subscribed view
//! - `LocalMirror`, the ordered, id-unique client copy
//! - `ReconnectManager` with exponential backoff and jitter
//! - `PollingFallback` for periods without a change feed
//! - The `RecordStore` abstraction and an in-memory implementation
//!
//! ## Architecture
//!
//! A live collection prefers push and falls back to pull:
//! 1. Fetch the full filtered collection once
//! 2. Subscribe to the change feed and merge events as they arrive
//! 3. When the feed drops, poll on an interval while reconnecting with backoff
//! 4. When the feed returns, stop polling and resync once
//!
//! ## Key Invariants
//!
//! - The mirror never holds two records with the same id
//! - Records are ordered by `updated_at`, newest first
//! - A record only replaces a local one with an equal or older `updated_at`
//! - Connected and polling are never both true
//! - A failed fetch never clears the mirror

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod error;
mod memory;
mod mirror;
mod polling;
mod reconnect;
mod state;
mod store;

pub use collection::LiveCollection;
pub use config::{LiveConfig, ReconnectConfig};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use memory::MemoryRecordStore;
pub use mirror::{LocalMirror, MirrorUpdate};
pub use polling::PollingFallback;
pub use reconnect::{ReconnectManager, RetryDecision};
pub use state::{Notice, SubscriptionState, SyncPhase, SyncStats};
pub use store::{FeedMessage, FeedSender, RecordStore, Subscription, SubscriptionId};

pub use livesync_protocol as protocol;
