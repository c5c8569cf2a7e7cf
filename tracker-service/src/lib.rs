pub mod checker;
pub mod collector;
pub mod ingester;
pub mod persister;
pub mod stats;
pub mod tracker;


pub use checker::{CycleReport, RemovalChecker};
pub use collector::Collector;
pub use ingester::{IngestOutcome, StreamIngester};
pub use persister::{JsonFilePersister, Persister};
pub use stats::{BatchStats, NumericSummary, StatsAggregator};
pub use tracker::{Deduplicator, Tracker, TrackingEntry};

use reddit_client::RateLimiter;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracker_core::{ContentSource, CoreError, TrackerConfig};

/// Owns the ingestion and checking loops and their shared state.
pub struct TrackerService {
    config: TrackerConfig,
    tracker: Arc<Tracker>,
    ingester: Arc<StreamIngester>,
    checker: Arc<RemovalChecker>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TrackerService {
    pub fn new(
        config: TrackerConfig,
        source: Arc<dyn ContentSource>,
        persister: Arc<dyn Persister>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let tracker = Arc::new(Tracker::new());
        let dedup = Arc::new(Deduplicator::new());

        let collector = Arc::new(Collector::new(
            source.clone(),
            limiter.clone(),
            config.comment_limit,
            config.keywords.clone(),
        ));
        let ingester = Arc::new(StreamIngester::new(
            source.clone(),
            config.subreddits.clone(),
            collector,
            dedup.clone(),
            tracker.clone(),
            config.stream_backoff(),
        ));
        let checker = Arc::new(RemovalChecker::new(
            source,
            limiter,
            tracker.clone(),
            StatsAggregator::new(config.cumulative_stats),
            persister,
            config.tracking_duration(),
        )
        .with_seen_retention(dedup, config.tracking_duration() * 2));

        Self {
            config,
            tracker,
            ingester,
            checker,
            shutdown: None,
            tasks: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    pub fn tracked_posts(&self) -> usize {
        self.tracker.len()
    }

    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.is_running() {
            return Err(CoreError::Internal {
                message: "tracker service already running".to_string(),
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ingester = self.ingester.clone();
        let ingester_shutdown = shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            ingester.run(ingester_shutdown).await;
        }));

        let checker = self.checker.clone();
        let period = self.config.poll_interval();
        self.tasks.push(tokio::spawn(async move {
            checker.run(period, shutdown_rx).await;
        }));

        self.shutdown = Some(shutdown_tx);
        info!(
            "Tracker service started: r/{}, polling every {}s, tracking for {}h",
            self.config.subreddits.join("+"),
            self.config.poll_interval_secs,
            self.config.tracking_duration_hours
        );
        Ok(())
    }

    /// Signal both loops and wait for them to finish their current step.
    pub async fn stop(&mut self) -> Result<(), CoreError> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };
        // Receivers may already be gone if a task panicked
        let _ = shutdown.send(true);

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Tracker task ended abnormally: {}", e);
            }
        }

        info!(
            "Tracker service stopped with {} posts still tracked",
            self.tracker.len()
        );
        Ok(())
    }
}
