//! Simulate command implementation.
//!
//! Seeds an in-memory store, starts a live collection on it and keeps
//! writing to the store once per second. Between `outage_after` and
//! `outage_after + outage` the change feed is closed and refuses new
//! subscriptions, so the collection has to fall back to polling.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use livesync_engine::{
    LiveCollection, LiveConfig, MemoryRecordStore, Notice, ReconnectConfig, SubscriptionState,
    SyncPhase, SyncStats,
};
use livesync_protocol::{CollectionFilter, Document};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Instant};
use tracing::{info, warn};

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// One JSON document per line.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("Unknown format: {other} (expected text or json)")),
        }
    }
}

/// Options for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Collection name.
    pub collection: String,
    /// Project the filter is scoped to.
    pub project: String,
    /// Records seeded before start.
    pub records: usize,
    /// Total run time.
    pub duration: Duration,
    /// Polling interval.
    pub poll_interval: Duration,
    /// Reconnect attempts, 0 for unlimited.
    pub max_attempts: u32,
    /// Delay before the outage.
    pub outage_after: Duration,
    /// Outage length, zero for none.
    pub outage: Duration,
    /// Output format.
    pub format: OutputFormat,
}

/// Final snapshot of a simulation.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Subscription topic.
    pub topic: String,
    /// Mirrored records, newest first.
    pub records: Vec<Document>,
    /// Connection state at the end of the run.
    pub state: StateReport,
    /// Sync counters.
    pub stats: StatsReport,
}

/// Serializable view of the subscription state.
#[derive(Debug, Serialize)]
pub struct StateReport {
    /// Lifecycle phase.
    pub phase: String,
    /// Change feed connected.
    pub is_connected: bool,
    /// Polling active.
    pub is_polling: bool,
    /// Last error message.
    pub last_error: Option<String>,
    /// Last successful fetch.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Reconnection gave up.
    pub retries_exhausted: bool,
}

impl From<SubscriptionState> for StateReport {
    fn from(state: SubscriptionState) -> Self {
        Self {
            phase: phase_name(state.phase).to_string(),
            is_connected: state.is_connected,
            is_polling: state.is_polling,
            last_error: state.last_error.map(|e| e.to_string()),
            last_sync_time: state.last_sync_time,
            retries_exhausted: state.retries_exhausted,
        }
    }
}

/// Serializable view of the sync counters.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Change events applied.
    pub events_applied: u64,
    /// Change events ignored.
    pub events_ignored: u64,
    /// Malformed payloads dropped.
    pub malformed_events: u64,
    /// Successful fetches.
    pub fetches: u64,
    /// Failed fetches.
    pub fetch_failures: u64,
    /// Reconnect attempts.
    pub reconnect_attempts: u64,
    /// Live/degraded transitions.
    pub mode_transitions: u64,
}

impl From<SyncStats> for StatsReport {
    fn from(stats: SyncStats) -> Self {
        Self {
            events_applied: stats.events_applied,
            events_ignored: stats.events_ignored,
            malformed_events: stats.malformed_events,
            fetches: stats.fetches,
            fetch_failures: stats.fetch_failures,
            reconnect_attempts: stats.reconnect_attempts,
            mode_transitions: stats.mode_transitions,
        }
    }
}

/// Runs the simulate command.
pub async fn run(options: SimulateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryRecordStore::<Document>::new(options.collection.clone()));
    let mut ids = seed(&store, &options.project, options.records);
    let mut next_id = options.records;

    let reconnect = if options.max_attempts == 0 {
        ReconnectConfig::unlimited()
    } else {
        ReconnectConfig::new(options.max_attempts)
    };
    let config = LiveConfig::new()
        .with_poll_interval(options.poll_interval)
        .with_reconnect(reconnect);
    let filter = CollectionFilter::new(options.collection.clone()).eq("project_id", &options.project);

    let collection = LiveCollection::start(Arc::clone(&store), filter, config);
    let printer = spawn_notice_printer(&collection, options.format);
    collection.wait_initialized().await;

    let started = Instant::now();
    let outage_end = options.outage_after + options.outage;
    let mut in_outage = false;
    let mut ticker = interval(Duration::from_secs(1));
    ticker.tick().await;

    while started.elapsed() < options.duration {
        ticker.tick().await;
        let elapsed = started.elapsed();

        if !options.outage.is_zero()
            && !in_outage
            && elapsed >= options.outage_after
            && elapsed < outage_end
        {
            info!(seconds = options.outage.as_secs(), "simulating change feed outage");
            store.set_subscribe_failure(Some("simulated outage"));
            store.close_channels("simulated outage");
            in_outage = true;
        } else if in_outage && elapsed >= outage_end {
            info!("change feed available again");
            store.set_subscribe_failure(None);
            in_outage = false;
        }

        write_random(&store, &options.project, &mut ids, &mut next_id);
    }

    let report = SimulationReport {
        topic: collection.filter().topic(),
        records: collection.records().to_vec(),
        state: collection.subscription_state().into(),
        stats: collection.stats().into(),
    };
    collection.teardown().await;
    drop(collection);
    if let Err(err) = printer.await {
        warn!(error = %err, "notice printer failed");
    }

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

fn seed(store: &MemoryRecordStore<Document>, project: &str, count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let now = Utc::now();
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("rec-{i}");
        let minutes = i64::try_from(i).unwrap_or(0);
        let updated_at = now - ChronoDuration::minutes(minutes);
        store.upsert(reading(&id, project, updated_at, rng.gen_range(0.0..100.0)));
        ids.push(id);
    }
    ids
}

/// Inserts, updates or deletes one random record.
fn write_random(
    store: &MemoryRecordStore<Document>,
    project: &str,
    ids: &mut Vec<String>,
    next_id: &mut usize,
) {
    let mut rng = rand::thread_rng();
    let roll: f64 = rng.gen();
    let value = rng.gen_range(0.0..100.0);

    if !ids.is_empty() && roll < 0.1 {
        let id = ids.swap_remove(rng.gen_range(0..ids.len()));
        store.remove(&id);
    } else if !ids.is_empty() && roll < 0.5 {
        let id = &ids[rng.gen_range(0..ids.len())];
        store.upsert(reading(id, project, Utc::now(), value));
    } else {
        let id = format!("rec-{next_id}");
        *next_id += 1;
        store.upsert(reading(&id, project, Utc::now(), value));
        ids.push(id);
    }
}

fn reading(id: &str, project: &str, updated_at: DateTime<Utc>, value: f64) -> Document {
    Document::new(id, updated_at)
        .with_field("project_id", project)
        .with_field("value", (value * 100.0).round() / 100.0)
}

fn spawn_notice_printer(
    collection: &LiveCollection<Document, MemoryRecordStore<Document>>,
    format: OutputFormat,
) -> tokio::task::JoinHandle<()> {
    let mut notices = collection.notices();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => print_notice(notice, format),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notices lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_notice(notice: Notice, format: OutputFormat) {
    let at = Utc::now().to_rfc3339();
    match format {
        OutputFormat::Text => println!("[{at}] {}", notice.message()),
        OutputFormat::Json => println!(
            "{}",
            json!({ "at": at, "notice": notice_name(notice), "message": notice.message() })
        ),
    }
}

fn notice_name(notice: Notice) -> &'static str {
    match notice {
        Notice::SwitchedToPolling => "switched_to_polling",
        Notice::RealtimeRestored => "realtime_restored",
        Notice::FallbackPermanent => "fallback_permanent",
    }
}

fn phase_name(phase: SyncPhase) -> &'static str {
    match phase {
        SyncPhase::Initializing => "initializing",
        SyncPhase::Live => "live",
        SyncPhase::Degraded => "degraded",
        SyncPhase::TornDown => "torn_down",
    }
}

fn print_text(report: &SimulationReport) {
    let state = &report.state;
    println!("LiveSync Simulation");
    println!("===================");
    println!();
    println!("Topic:          {}", report.topic);
    println!("Phase:          {}", state.phase);
    println!("Connected:      {}", state.is_connected);
    println!("Polling:        {}", state.is_polling);
    println!("Retries spent:  {}", state.retries_exhausted);
    match &state.last_sync_time {
        Some(at) => println!("Last sync:      {}", at.to_rfc3339()),
        None => println!("Last sync:      never"),
    }
    if let Some(err) = &state.last_error {
        println!("Last error:     {err}");
    }

    println!();
    println!("Records ({}):", report.records.len());
    for record in &report.records {
        let value = record
            .field("value")
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<16} {}  value={}", record.id, record.updated_at.to_rfc3339(), value);
    }

    let stats = &report.stats;
    println!();
    println!("Stats:");
    println!("  Events applied:     {}", stats.events_applied);
    println!("  Events ignored:     {}", stats.events_ignored);
    println!("  Malformed events:   {}", stats.malformed_events);
    println!("  Fetches:            {}", stats.fetches);
    println!("  Fetch failures:     {}", stats.fetch_failures);
    println!("  Reconnect attempts: {}", stats.reconnect_attempts);
    println!("  Mode transitions:   {}", stats.mode_transitions);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_output_format() {
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn random_writes_stay_in_project() {
        let store = MemoryRecordStore::<Document>::new("measurements");
        let mut ids = seed(&store, "demo", 3);
        let mut next_id = 3;
        assert_eq!(store.len(), 3);

        for _ in 0..50 {
            write_random(&store, "demo", &mut ids, &mut next_id);
        }
        assert_eq!(store.len(), ids.len());
        for id in &ids {
            let record = store.get(id).unwrap();
            assert_eq!(record.field("project_id"), Some(&json!("demo")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_run_reports_live_state() {
        let options = SimulateOptions {
            collection: "measurements".into(),
            project: "demo".into(),
            records: 2,
            duration: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            max_attempts: 0,
            outage_after: Duration::from_secs(1),
            outage: Duration::ZERO,
            format: OutputFormat::Json,
        };
        run(options).await.unwrap();
    }
}
