//! The live collection orchestrator.
//!
//! A [`LiveCollection`] owns a local mirror of one filtered collection and
//! keeps it in sync:
//!
//! ```text
//! Initializing ──Connected──▶ Live
//!      │                      │  ▲
//!      │ Error/Closed/timeout │  │ Connected
//!      ▼                      ▼  │
//!      └──────────────────▶ Degraded (polling + backoff reconnect)
//!
//! any state ──teardown()──▶ TornDown
//! ```
//!
//! All timers and channel traffic are driven by one spawned task.
//! `refresh()` runs on the caller's task; because merges are decided purely
//! by `updated_at`, the order in which the two paths land does not affect
//! the final mirror.

use crate::config::LiveConfig;
use crate::error::{SyncError, SyncResult};
use crate::mirror::{LocalMirror, MirrorUpdate};
use crate::polling::PollingFallback;
use crate::reconnect::{ReconnectManager, RetryDecision};
use crate::state::{Notice, SubscriptionState, SyncPhase, SyncStats};
use crate::store::{FeedMessage, RecordStore, Subscription};
use chrono::Utc;
use livesync_protocol::{ChannelStatus, CollectionFilter, RawChange, Record};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const NOTICE_CAPACITY: usize = 16;

/// State shared between the handle and the driver task.
struct Shared<R> {
    filter: CollectionFilter,
    mirror: RwLock<LocalMirror<R>>,
    state: RwLock<SubscriptionState>,
    stats: RwLock<SyncStats>,
    revision: watch::Sender<u64>,
    notices: broadcast::Sender<Notice>,
}

impl<R: Record> Shared<R> {
    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn phase(&self) -> SyncPhase {
        self.state.read().phase
    }

    fn update_state(&self, f: impl FnOnce(&mut SubscriptionState)) {
        f(&mut self.state.write());
        self.bump();
    }

    fn notify(&self, notice: Notice) {
        // No receivers is fine; notices are advisory.
        let _ = self.notices.send(notice);
    }

    /// Full fetch merged into the mirror. Never touches the mirror on failure.
    async fn fetch_and_merge<S>(&self, store: &S, origin: &'static str) -> SyncResult<usize>
    where
        S: RecordStore<R> + ?Sized,
    {
        match store.fetch_all(&self.filter).await {
            Ok(batch) => {
                let update = self.mirror.write().merge_batch(&batch, now());
                self.stats.write().fetches += 1;
                debug!(
                    collection = %self.filter,
                    origin,
                    fetched = batch.len(),
                    inserted = update.inserted,
                    replaced = update.replaced,
                    unchanged = update.unchanged,
                    "fetch merged"
                );
                self.update_state(|s| {
                    s.last_sync_time = Some(Utc::now());
                    s.last_error = None;
                });
                Ok(batch.len())
            }
            Err(err) => {
                let err = SyncError::from(err);
                warn!(
                    collection = %self.filter,
                    origin,
                    error = %err,
                    "fetch failed, keeping last known records"
                );
                self.stats.write().fetch_failures += 1;
                self.update_state(|s| s.last_error = Some(err.clone()));
                Err(err)
            }
        }
    }

    fn apply_change(&self, raw: &RawChange)
    where
        R: DeserializeOwned,
    {
        match raw.decode::<R>() {
            Ok(event) => {
                let update: MirrorUpdate = self.mirror.write().apply(&event, now());
                {
                    let mut stats = self.stats.write();
                    if update.changed() {
                        stats.events_applied += 1;
                    } else {
                        stats.events_ignored += 1;
                    }
                }
                debug!(
                    collection = %self.filter,
                    kind = event.kind().as_str(),
                    id = event.id(),
                    changed = update.changed(),
                    "change event"
                );
                if update.changed() {
                    self.bump();
                }
            }
            Err(err) => {
                let err = SyncError::MalformedEvent(err);
                warn!(collection = %self.filter, error = %err, "dropping change event");
                self.stats.write().malformed_events += 1;
            }
        }
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// A self-synchronizing mirror of a remote collection.
///
/// Must be started inside a tokio runtime.
///
/// Call [`teardown`](Self::teardown) and await it to stop syncing: it
/// returns only after the channel has been unsubscribed and all timers are
/// cleared. Dropping the handle merely cancels the background task; the
/// unsubscribe then happens whenever the runtime next polls that task, and
/// never if the runtime is shutting down.
pub struct LiveCollection<R: Record, S: RecordStore<R>> {
    store: Arc<S>,
    shared: Arc<Shared<R>>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<R, S> LiveCollection<R, S>
where
    R: Record + DeserializeOwned,
    S: RecordStore<R>,
{
    /// Starts syncing the filtered collection.
    ///
    /// Returns immediately; the initial fetch and the first channel attempt
    /// happen in the background (see [`wait_initialized`](Self::wait_initialized)).
    pub fn start(store: Arc<S>, filter: CollectionFilter, config: LiveConfig) -> Self {
        let mirror = match config.delete_grace {
            Some(grace) => LocalMirror::with_delete_grace(grace),
            None => LocalMirror::new(),
        };
        let (revision, _) = watch::channel(0);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let shared = Arc::new(Shared {
            filter,
            mirror: RwLock::new(mirror),
            state: RwLock::new(SubscriptionState::initializing()),
            stats: RwLock::new(SyncStats::default()),
            revision,
            notices,
        });
        let cancel = CancellationToken::new();

        info!(collection = %shared.filter, "starting live collection");
        let driver = Driver {
            store: Arc::clone(&store),
            shared: Arc::clone(&shared),
            reconnect: ReconnectManager::new(config.reconnect.clone()),
            polling: PollingFallback::new(config.poll_interval),
            channel: None,
            connect_deadline: None,
            cancel: cancel.clone(),
            config,
        };
        let handle = tokio::spawn(driver.run());

        Self {
            store,
            shared,
            cancel,
            driver: Mutex::new(Some(handle)),
        }
    }

    /// Returns the filter this collection mirrors.
    pub fn filter(&self) -> &CollectionFilter {
        &self.shared.filter
    }

    /// Returns a snapshot of the records, newest first.
    pub fn records(&self) -> Arc<[R]> {
        self.shared.mirror.read().snapshot()
    }

    /// Returns a snapshot of the connection state.
    pub fn subscription_state(&self) -> SubscriptionState {
        self.shared.state.read().clone()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SyncStats {
        self.shared.stats.read().clone()
    }

    /// Subscribes to mode-transition notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    /// Watches a revision counter that changes whenever records or state change.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Waits until the collection has left `Initializing`.
    pub async fn wait_initialized(&self) -> SubscriptionState {
        let mut updates = self.updates();
        loop {
            let state = self.subscription_state();
            if state.phase != SyncPhase::Initializing || updates.changed().await.is_err() {
                return state;
            }
        }
    }

    /// Forces a full fetch and merge, whatever the channel state.
    ///
    /// Returns false if the fetch failed; the mirror is then unchanged and
    /// the error is in `last_error`.
    pub async fn refresh(&self) -> bool {
        self.try_refresh().await.is_ok()
    }

    /// Like [`refresh`](Self::refresh) but returns the error or the number
    /// of records fetched.
    pub async fn try_refresh(&self) -> SyncResult<usize> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::TornDown);
        }
        self.shared.fetch_and_merge(&*self.store, "refresh").await
    }

    /// Returns true once teardown has been requested.
    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops syncing: closes the channel, clears the reconnect timer and
    /// stops polling. Safe to call more than once and during initialization.
    pub async fn teardown(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(collection = %self.shared.filter, error = %err, "sync task ended abnormally");
            }
        }
    }
}

impl<R: Record, S: RecordStore<R>> Drop for LiveCollection<R, S> {
    /// Cancels the driver without waiting for it to close the channel.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Step {
    Shutdown,
    Feed(Option<FeedMessage>),
    ConnectTimeout,
    Reconnect,
    Poll,
}

/// Background task owning the channel, the timers and the polling loop.
struct Driver<R, S> {
    store: Arc<S>,
    shared: Arc<Shared<R>>,
    config: LiveConfig,
    reconnect: ReconnectManager,
    polling: PollingFallback,
    channel: Option<Subscription>,
    connect_deadline: Option<Pin<Box<Sleep>>>,
    cancel: CancellationToken,
}

impl<R, S> Driver<R, S>
where
    R: Record + DeserializeOwned,
    S: RecordStore<R>,
{
    async fn run(mut self) {
        let cancel = self.cancel.clone();

        let initialized = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.initialize() => true,
        };

        if initialized {
            loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Shutdown,
                    message = next_message(&mut self.channel) => Step::Feed(message),
                    _ = expired(&mut self.connect_deadline) => Step::ConnectTimeout,
                    _ = self.reconnect.wait() => Step::Reconnect,
                    _ = self.polling.tick() => Step::Poll,
                };
                if matches!(step, Step::Shutdown) {
                    break;
                }

                let completed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = self.handle(step) => true,
                };
                if !completed {
                    break;
                }
            }
        }

        self.shutdown();
    }

    async fn initialize(&mut self) {
        // A failed initial fetch is recorded in the state. The catch-up
        // fetch on the first `Connected`, or the polling fallback, retries it.
        let _ = self.shared.fetch_and_merge(&*self.store, "initial").await;
        self.open_channel().await;
    }

    async fn handle(&mut self, step: Step) {
        match step {
            Step::Shutdown => {}
            Step::Feed(Some(FeedMessage::Change(raw))) => self.shared.apply_change(&raw),
            Step::Feed(Some(FeedMessage::Status { status, reason })) => {
                self.on_status(status, reason).await
            }
            Step::Feed(None) => {
                self.on_channel_failure(SyncError::Connection("change feed ended".into()))
            }
            Step::ConnectTimeout => {
                self.on_channel_failure(SyncError::ConnectTimeout(self.config.connect_timeout))
            }
            Step::Reconnect => {
                self.shared.stats.write().reconnect_attempts += 1;
                debug!(
                    collection = %self.shared.filter,
                    attempt = self.reconnect.attempt(),
                    "reopening change feed"
                );
                self.open_channel().await;
            }
            Step::Poll => {
                let _ = self.shared.fetch_and_merge(&*self.store, "poll").await;
            }
        }
    }

    async fn open_channel(&mut self) {
        match self.store.subscribe(&self.shared.filter).await {
            Ok(subscription) => {
                debug!(
                    collection = %self.shared.filter,
                    topic = subscription.topic(),
                    id = subscription.id().0,
                    "change feed subscription opened"
                );
                self.channel = Some(subscription);
                self.connect_deadline = Some(Box::pin(sleep(self.config.connect_timeout)));
            }
            Err(err) => self.on_channel_failure(SyncError::Connection(err.to_string())),
        }
    }

    async fn on_status(&mut self, status: ChannelStatus, reason: Option<String>) {
        match status {
            ChannelStatus::Connecting => {
                debug!(collection = %self.shared.filter, "change feed connecting");
            }
            ChannelStatus::Connected => self.on_connected().await,
            ChannelStatus::Error | ChannelStatus::Closed => {
                let reason = reason.unwrap_or_else(|| format!("channel reported {status:?}"));
                self.on_channel_failure(SyncError::Connection(reason));
            }
        }
    }

    async fn on_connected(&mut self) {
        self.connect_deadline = None;
        self.reconnect.reset();
        self.polling.stop();

        let previous = self.shared.phase();
        self.shared.update_state(|s| {
            s.is_connected = true;
            s.is_polling = false;
            s.phase = SyncPhase::Live;
            s.retries_exhausted = false;
            if s.last_error.as_ref().is_some_and(SyncError::is_connection) {
                s.last_error = None;
            }
        });

        if previous == SyncPhase::Degraded {
            self.shared.stats.write().mode_transitions += 1;
            info!(collection = %self.shared.filter, "real-time restored, polling stopped");
            self.shared.notify(Notice::RealtimeRestored);
            if self.config.resync_on_reconnect {
                let _ = self.shared.fetch_and_merge(&*self.store, "resync").await;
            }
        } else if previous == SyncPhase::Initializing {
            info!(collection = %self.shared.filter, "change feed connected");
            // The feed only carries new changes; rows that predate the
            // subscription arrive through a fetch.
            let never_synced = self.shared.state.read().last_sync_time.is_none();
            if never_synced {
                let _ = self.shared.fetch_and_merge(&*self.store, "resync").await;
            }
        }
    }

    fn on_channel_failure(&mut self, err: SyncError) {
        self.close_channel();
        self.connect_deadline = None;

        let previous = self.shared.phase();
        warn!(collection = %self.shared.filter, error = %err, "change feed unavailable");

        if self.polling.start() {
            debug!(
                collection = %self.shared.filter,
                period_ms = self.polling.period().as_millis() as u64,
                "polling fallback started"
            );
        }
        self.shared.update_state(|s| {
            s.is_connected = false;
            s.is_polling = true;
            s.phase = SyncPhase::Degraded;
            s.last_error = Some(err);
        });

        if previous == SyncPhase::Live {
            self.shared.stats.write().mode_transitions += 1;
            info!(collection = %self.shared.filter, "switching to polling");
            self.shared.notify(Notice::SwitchedToPolling);
        }

        match self.reconnect.on_failure() {
            RetryDecision::Scheduled { attempt, delay } => {
                info!(
                    collection = %self.shared.filter,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling change feed reconnect"
                );
            }
            RetryDecision::AlreadyPending => {}
            RetryDecision::Exhausted => {
                let first = !self.shared.state.read().retries_exhausted;
                if first {
                    warn!(
                        collection = %self.shared.filter,
                        attempts = self.reconnect.attempt(),
                        "giving up on change feed, polling from now on"
                    );
                    self.shared.update_state(|s| s.retries_exhausted = true);
                    self.shared.notify(Notice::FallbackPermanent);
                }
            }
        }
    }

    fn close_channel(&mut self) {
        if let Some(subscription) = self.channel.take() {
            debug!(
                collection = %self.shared.filter,
                id = subscription.id().0,
                "closing change feed subscription"
            );
            self.store.unsubscribe(subscription);
        }
    }

    fn shutdown(&mut self) {
        self.polling.stop();
        self.reconnect.cancel();
        self.connect_deadline = None;
        self.close_channel();
        self.shared.update_state(|s| {
            s.is_connected = false;
            s.is_polling = false;
            s.phase = SyncPhase::TornDown;
        });
        info!(collection = %self.shared.filter, "live collection torn down");
    }
}

async fn next_message(channel: &mut Option<Subscription>) -> Option<FeedMessage> {
    match channel.as_mut() {
        Some(subscription) => subscription.next().await,
        None => pending().await,
    }
}

async fn expired(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline.as_mut() {
        Some(timer) => timer.await,
        None => pending().await,
    }
}
