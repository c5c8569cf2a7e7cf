use crate::collector::Collector;
use crate::tracker::{Deduplicator, Tracker};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracker_core::{ContentSource, ErrorExt, PostHandle, SourceError, SourceErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Admitted,
    Duplicate,
    Filtered,
    Failed(SourceError),
}

impl IngestOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, IngestOutcome::Admitted)
    }
}

enum FeedEnd {
    Exhausted,
    Faulted(SourceError),
}

/// Feeds newly created posts into the tracker.
pub struct StreamIngester {
    source: Arc<dyn ContentSource>,
    subreddits: Vec<String>,
    collector: Arc<Collector>,
    dedup: Arc<Deduplicator>,
    tracker: Arc<Tracker>,
    backoff: Duration,
}

impl StreamIngester {
    pub fn new(
        source: Arc<dyn ContentSource>,
        subreddits: Vec<String>,
        collector: Arc<Collector>,
        dedup: Arc<Deduplicator>,
        tracker: Arc<Tracker>,
        backoff: Duration,
    ) -> Self {
        Self {
            source,
            subreddits,
            collector,
            dedup,
            tracker,
            backoff,
        }
    }

    /// Consume the feed until shutdown, reconnecting after every fault.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Stream ingester started for r/{}", self.subreddits.join("+"));

        loop {
            if *shutdown.borrow() {
                break;
            }

            let end = tokio::select! {
                end = self.consume_feed() => end,
                _ = shutdown.changed() => break,
            };

            let delay = match end {
                FeedEnd::Exhausted => {
                    warn!("Post feed ended, reconnecting in {:?}", self.backoff);
                    self.backoff
                }
                FeedEnd::Faulted(e) => {
                    e.log_error();
                    let delay = e.retry_after().unwrap_or_default().max(self.backoff);
                    error!("Post feed failed ({}), retrying in {:?}", e.error_code(), delay);
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Stream ingester stopped");
    }

    async fn consume_feed(&self) -> FeedEnd {
        let mut feed = self.source.stream_new_posts(&self.subreddits);
        while let Some(item) = feed.next().await {
            match item {
                Ok(handle) => {
                    self.ingest(handle, Utc::now()).await;
                }
                // A single undecodable listing entry does not poison the feed
                Err(e) if e.kind() == SourceErrorKind::Malformed => {
                    warn!("Skipping malformed feed item: {}", e);
                }
                Err(e) => return FeedEnd::Faulted(e),
            }
        }
        FeedEnd::Exhausted
    }

    /// Admit one post seen at `now`. Faults are confined to this post.
    pub async fn ingest(&self, handle: PostHandle, now: chrono::DateTime<Utc>) -> IngestOutcome {
        if self.dedup.seen(&handle.id) {
            debug!("Skipping already seen post {}", handle.id);
            return IngestOutcome::Duplicate;
        }

        let Some(matched_keywords) = self.collector.keyword_filter(&handle) else {
            debug!("Post {} matched no keywords", handle.id);
            return IngestOutcome::Filtered;
        };

        let record = match self.collector.collect(&handle, matched_keywords, now).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to collect post {}: {}", handle.id, e);
                return IngestOutcome::Failed(e);
            }
        };

        // Re-checked here since collection awaited; mark and admit have no await between them
        let post_id = record.id.clone();
        if !self.dedup.mark_seen(&post_id, now) {
            return IngestOutcome::Duplicate;
        }
        self.tracker.admit(&post_id, record, now);
        info!(
            "Tracking post {} in r/{} ({} active)",
            handle.id,
            handle.subreddit,
            self.tracker.len()
        );
        IngestOutcome::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{now, post_handle, unlimited, FakeSource};

    fn ingester(source: Arc<FakeSource>, keywords: Vec<String>) -> (StreamIngester, Arc<Tracker>) {
        let tracker = Arc::new(Tracker::new());
        let collector = Arc::new(Collector::new(source.clone(), unlimited(), 3, keywords));
        let ingester = StreamIngester::new(
            source,
            vec!["rust".to_string()],
            collector,
            Arc::new(Deduplicator::new()),
            tracker.clone(),
            Duration::from_secs(60),
        );
        (ingester, tracker)
    }

    #[tokio::test]
    async fn test_keyword_filter_skips_non_matching_posts() {
        let source = Arc::new(FakeSource::new());
        let (ingester, tracker) = ingester(source, vec!["ban".to_string()]);

        let mut hit = post_handle("hit");
        hit.selftext = Some("I got a BAN today".to_string());

        assert_eq!(ingester.ingest(post_handle("miss"), now()).await, IngestOutcome::Filtered);
        assert!(ingester.ingest(hit, now()).await.is_admitted());
        assert_eq!(tracker.len(), 1);
        assert_eq!(
            tracker.snapshot()[0].1.record.matched_keywords,
            vec!["ban".to_string()]
        );
    }

    #[tokio::test]
    async fn test_admitted_post_is_marked_seen_and_tracked() {
        let source = Arc::new(FakeSource::new());
        let (ingester, tracker) = ingester(source, Vec::new());

        assert!(ingester.ingest(post_handle("p1"), now()).await.is_admitted());

        assert!(ingester.dedup.seen("p1"));
        let (post_id, entry) = tracker.snapshot().remove(0);
        assert_eq!(post_id, "p1");
        assert_eq!(entry.record.id, "p1");
        assert_eq!(entry.first_seen_at, now());
    }

    #[tokio::test]
    async fn test_failed_collection_is_not_marked_seen() {
        let source = Arc::new(FakeSource::new());
        let (ingester, tracker) = ingester(source, Vec::new());

        let mut broken = post_handle("p1");
        broken.subreddit.clear();
        let outcome = ingester.ingest(broken, now()).await;
        assert!(matches!(outcome, IngestOutcome::Failed(_)));
        assert!(!ingester.dedup.seen("p1"));

        assert!(ingester.ingest(post_handle("p1"), now()).await.is_admitted());
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_fault_backs_off_and_reconnects() {
        let source = Arc::new(FakeSource::new());
        source.push_feed(vec![
            Ok(post_handle("a")),
            Err(SourceError::malformed("bad child")),
            Ok(post_handle("b")),
            Err(SourceError::transient("connection reset")),
            Ok(post_handle("never")),
        ]);
        source.push_feed(vec![Ok(post_handle("b")), Ok(post_handle("c"))]);

        let (ingester, tracker) = ingester(source.clone(), Vec::new());
        let ingester = Arc::new(ingester);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let ingester = ingester.clone();
            tokio::spawn(async move { ingester.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.stream_calls(), 1);
        assert_eq!(tracker.len(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(source.stream_calls(), 2);
        assert_eq!(tracker.len(), 3);
        assert!(!tracker.contains("never"));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_feed_waits_for_retry_after() {
        let source = Arc::new(FakeSource::new());
        source.push_feed(vec![Err(SourceError::RateLimitExceeded { retry_after: 120 })]);

        let (ingester, _tracker) = ingester(source.clone(), Vec::new());
        let ingester = Arc::new(ingester);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let ingester = ingester.clone();
            tokio::spawn(async move { ingester.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(source.stream_calls(), 1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(source.stream_calls(), 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
