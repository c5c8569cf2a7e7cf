use crate::persister::Persister;
use crate::stats::StatsAggregator;
use crate::tracker::{Deduplicator, Tracker, TrackingEntry};
use chrono::{DateTime, Utc};
use reddit_client::RateLimiter;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracker_core::{ContentSource, CoreError, ErrorExt, PostRecord, SourceErrorKind};

/// Source of wall-clock time for check timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What one check cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub checked: usize,
    pub updated: usize,
    pub removed: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub finalized: usize,
    pub flushed: bool,
}

struct SeenRetention {
    dedup: Arc<Deduplicator>,
    retention: chrono::Duration,
}

/// Periodically re-fetches every tracked post and finalizes the ones that
/// were removed or have been watched long enough.
pub struct RemovalChecker {
    source: Arc<dyn ContentSource>,
    limiter: Arc<RateLimiter>,
    tracker: Arc<Tracker>,
    aggregator: StatsAggregator,
    persister: Arc<dyn Persister>,
    tracking_duration: chrono::Duration,
    clock: Clock,
    seen_retention: Option<SeenRetention>,
    pending: Mutex<Vec<PostRecord>>,
}

impl RemovalChecker {
    pub fn new(
        source: Arc<dyn ContentSource>,
        limiter: Arc<RateLimiter>,
        tracker: Arc<Tracker>,
        aggregator: StatsAggregator,
        persister: Arc<dyn Persister>,
        tracking_duration: chrono::Duration,
    ) -> Self {
        Self {
            source,
            limiter,
            tracker,
            aggregator,
            persister,
            tracking_duration,
            clock: Arc::new(Utc::now),
            seen_retention: None,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Forget seen ids older than `retention` at the end of every cycle.
    /// Ids of posts still being tracked are always kept.
    pub fn with_seen_retention(mut self, dedup: Arc<Deduplicator>, retention: chrono::Duration) -> Self {
        self.seen_retention = Some(SeenRetention { dedup, retention });
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("Removal checker started, checking every {:?}", period);

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and nothing is tracked yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_cycle().await;
            info!(
                "Check cycle: {} checked, {} removed, {} timed out, {} failed, {} still tracked",
                report.checked,
                report.removed,
                report.timed_out,
                report.failed,
                self.tracker.len()
            );
            debug!("Rate limiter: {:?}", self.limiter.status());
        }

        info!("Removal checker stopped");
    }

    /// One pass over the current snapshot followed by a flush.
    ///
    /// The clock is read per entry, after its fetch returns, so time spent
    /// waiting on the rate limiter is reflected in `hours_tracked`.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for (post_id, entry) in self.tracker.snapshot() {
            report.checked += 1;

            let now = self.now();
            if entry.elapsed(now) > self.tracking_duration {
                if self.finalize_stored(&post_id, &entry, now) {
                    debug!("Post {} reached the tracking limit", post_id);
                    report.timed_out += 1;
                }
                continue;
            }

            // Already removed when collected; no need to ask again
            if entry.record.is_removed {
                if self.finalize_stored(&post_id, &entry, now) {
                    info!("Post {} was removed before its first check", post_id);
                    report.removed += 1;
                }
                continue;
            }

            self.limiter.acquire().await;
            let handle = match self.source.fetch_post(&post_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    match e.kind() {
                        SourceErrorKind::NotFound => {
                            warn!("Post {} no longer exists, will retry: {}", post_id, e)
                        }
                        _ => warn!("Failed to check post {}: {}", post_id, e),
                    }
                    report.failed += 1;
                    continue;
                }
            };

            let checked_at = self.now();
            let mut record = entry.record.clone();
            record.apply_fetched(&handle, checked_at);
            record.hours_tracked = entry
                .hours_tracked(checked_at)
                .max(entry.record.hours_tracked);

            if record.is_removed {
                if self.tracker.evict(&post_id).is_some() {
                    info!(
                        "Post {} removed after {:.2}h ({})",
                        post_id,
                        record.hours_tracked,
                        record.removal_reason.as_deref().unwrap_or("unknown")
                    );
                    self.push_pending(record);
                    report.removed += 1;
                }
            } else if self.tracker.update(&post_id, &record) {
                report.updated += 1;
            }
        }

        let now = self.now();
        report.finalized = report.removed + report.timed_out;
        report.flushed = self.flush(now).await;
        self.prune_seen(now);
        report
    }

    /// Finalize an entry from its stored state, without fetching it.
    fn finalize_stored(&self, post_id: &str, entry: &TrackingEntry, now: DateTime<Utc>) -> bool {
        let Some(evicted) = self.tracker.evict(post_id) else {
            return false;
        };
        let mut record = evicted.record;
        record.hours_tracked = entry.hours_tracked(now).max(record.hours_tracked);
        self.push_pending(record);
        true
    }

    fn prune_seen(&self, now: DateTime<Utc>) {
        let Some(seen) = &self.seen_retention else {
            return;
        };
        let pruned = seen
            .dedup
            .prune_before(now - seen.retention, &self.tracker.ids());
        if pruned > 0 {
            debug!("Forgot {} expired post ids, {} remembered", pruned, seen.dedup.len());
        }
    }

    fn push_pending(&self, record: PostRecord) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Aggregate and persist the pending batch. The batch is only dropped
    /// once the write succeeded.
    async fn flush(&self, now: DateTime<Utc>) -> bool {
        let batch = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(stats) = self.aggregator.aggregate(&batch) else {
            return false;
        };

        match self.persister.persist(&batch, &stats, now).await {
            Ok(()) => {
                self.aggregator.commit(&batch);
                self.pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .drain(..batch.len());
                info!(
                    "Flushed {} finalized posts ({} removed, {:.1}% removal rate)",
                    batch.len(),
                    stats.removed_posts,
                    stats.removal_rate
                );
                true
            }
            Err(e) => {
                let e = CoreError::from(e);
                e.log_error();
                error!(
                    "Keeping {} finalized posts for the next cycle ({})",
                    batch.len(),
                    e.error_code()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{
        at, fixed_clock, now, post_handle, sample_record, unlimited, FakeSource, MemoryPersister,
    };
    use std::sync::atomic::{AtomicI64, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_periodic_loop_stops_on_shutdown() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(Tracker::new());
        let persister = Arc::new(MemoryPersister::default());
        source.set_post(post_handle("p1"));
        tracker.admit("p1", sample_record("p1"), Utc::now());

        let checker = Arc::new(RemovalChecker::new(
            source.clone(),
            unlimited(),
            tracker.clone(),
            StatsAggregator::new(false),
            persister,
            chrono::Duration::hours(24),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let checker = checker.clone();
            tokio::spawn(async move { checker.run(Duration::from_secs(300), shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.post_fetches(), 0);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.post_fetches(), 1);
        assert!(tracker.contains("p1"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_report_counts_each_outcome() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(Tracker::new());
        let start = crate::tests::now();

        let mut removed = post_handle("removed");
        removed.banned_by = Some("mod_alice".to_string());
        source.set_post(removed);
        source.set_post(post_handle("kept"));

        for id in ["removed", "kept", "missing"] {
            tracker.admit(id, sample_record(id), start);
        }
        tracker.admit("old", sample_record("old"), start - chrono::Duration::hours(30));

        let checker = RemovalChecker::new(
            source,
            unlimited(),
            tracker.clone(),
            StatsAggregator::new(false),
            Arc::new(MemoryPersister::default()),
            chrono::Duration::hours(24),
        )
        .with_clock(fixed_clock(start + chrono::Duration::minutes(5)));
        let report = checker.run_cycle().await;

        assert_eq!(
            report,
            CycleReport {
                checked: 4,
                updated: 1,
                removed: 1,
                timed_out: 1,
                failed: 1,
                finalized: 2,
                flushed: true,
            }
        );
        assert_eq!(tracker.len(), 2);
    }

    #[tokio::test]
    async fn test_check_time_is_read_per_entry() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(Tracker::new());
        for id in ["a", "b"] {
            source.set_post(post_handle(id));
            tracker.admit(id, sample_record(id), now());
        }

        // Every clock read lands two seconds after the previous one
        let reads = Arc::new(AtomicI64::new(0));
        let clock: Clock = {
            let reads = reads.clone();
            Arc::new(move || at(600 + 2 * reads.fetch_add(1, Ordering::SeqCst)))
        };
        let checker = RemovalChecker::new(
            source,
            unlimited(),
            tracker.clone(),
            StatsAggregator::new(false),
            Arc::new(MemoryPersister::default()),
            chrono::Duration::hours(24),
        )
        .with_clock(clock);
        checker.run_cycle().await;

        let mut checked: Vec<_> = tracker
            .snapshot()
            .into_iter()
            .map(|(_, entry)| entry.record)
            .collect();
        checked.sort_by_key(|record| record.timestamp_checked);

        assert!(checked[0].timestamp_checked < checked[1].timestamp_checked);
        for record in &checked {
            let expected = (record.timestamp_checked - now()).num_milliseconds() as f64 / 3_600_000.0;
            assert!((record.hours_tracked - expected).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_expired_seen_ids_are_pruned() {
        let source = Arc::new(FakeSource::new());
        let tracker = Arc::new(Tracker::new());
        let dedup = Arc::new(Deduplicator::new());
        source.set_post(post_handle("tracked"));

        dedup.mark_seen("finalized_long_ago", now());
        dedup.mark_seen("tracked", now());
        tracker.admit("tracked", sample_record("tracked"), at(47 * 3600));

        let checker = RemovalChecker::new(
            source,
            unlimited(),
            tracker,
            StatsAggregator::new(false),
            Arc::new(MemoryPersister::default()),
            chrono::Duration::hours(24),
        )
        .with_clock(fixed_clock(at(49 * 3600)))
        .with_seen_retention(dedup.clone(), chrono::Duration::hours(48));
        checker.run_cycle().await;

        assert!(!dedup.seen("finalized_long_ago"));
        assert!(dedup.seen("tracked"));
    }
}
