//! Per-flush statistics over finalized records.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracker_core::media::host_of;
use tracker_core::PostRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericSummary {
    pub min: i64,
    pub max: i64,
    pub avg: f64,
}

impl NumericSummary {
    /// `None` for an empty input.
    pub fn from_values(values: impl IntoIterator<Item = i64>) -> Option<Self> {
        let mut count = 0u64;
        let mut sum = 0f64;
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for value in values {
            count += 1;
            sum += value as f64;
            min = min.min(value);
            max = max.max(value);
        }
        (count > 0).then(|| Self {
            min,
            max,
            avg: sum / count as f64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentStats {
    pub title_length: NumericSummary,
    pub body_length: NumericSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementStats {
    pub score: NumericSummary,
    pub comments: NumericSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlStats {
    pub posts_with_urls: usize,
    pub total_urls: usize,
    pub urls_in_removed_posts: usize,
    /// Share of all URLs that sit in removed posts, in percent.
    pub url_removal_rate: f64,
    pub domain_frequency: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemovalCount {
    pub total: usize,
    pub removed: usize,
    pub removal_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalBreakdown {
    pub by_subreddit: BTreeMap<String, RemovalCount>,
    pub by_media_type: BTreeMap<String, RemovalCount>,
    pub by_url_count: BTreeMap<usize, RemovalCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStats {
    pub total_posts: usize,
    pub removed_posts: usize,
    pub removal_rate: f64,
    pub subreddit_distribution: BTreeMap<String, usize>,
    pub media_type_distribution: BTreeMap<String, usize>,
    pub removal_reason_distribution: BTreeMap<String, usize>,
    pub content_stats: ContentStats,
    pub engagement_stats: EngagementStats,
    pub url_stats: UrlStats,
    pub removal_breakdown: RemovalBreakdown,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn url_domain(raw: &str) -> Option<String> {
    host_of(raw).or_else(|| host_of(&format!("http://{}", raw)))
}

fn count_into<K: Ord>(map: &mut BTreeMap<K, RemovalCount>, key: K, removed: bool) {
    let entry = map.entry(key).or_default();
    entry.total += 1;
    if removed {
        entry.removed += 1;
    }
}

fn finish_rates<K>(map: &mut BTreeMap<K, RemovalCount>) {
    for count in map.values_mut() {
        count.removal_rate = percent(count.removed, count.total);
    }
}

/// Stateless summary of `records`. Returns `None` for an empty batch.
pub fn compute(records: &[PostRecord]) -> Option<BatchStats> {
    let total_posts = records.len();
    let title_length =
        NumericSummary::from_values(records.iter().map(|r| r.title.chars().count() as i64))?;
    let body_length =
        NumericSummary::from_values(records.iter().map(|r| r.body.chars().count() as i64))?;
    let score = NumericSummary::from_values(records.iter().map(|r| r.score))?;
    let comments = NumericSummary::from_values(records.iter().map(|r| r.num_comments as i64))?;

    let mut removed_posts = 0;
    let mut subreddit_distribution = BTreeMap::new();
    let mut media_type_distribution = BTreeMap::new();
    let mut removal_reason_distribution = BTreeMap::new();
    let mut by_subreddit = BTreeMap::new();
    let mut by_media_type = BTreeMap::new();
    let mut by_url_count = BTreeMap::new();

    let mut posts_with_urls = 0;
    let mut total_urls = 0;
    let mut urls_in_removed_posts = 0;
    let mut domain_frequency = BTreeMap::new();

    for record in records {
        *subreddit_distribution
            .entry(record.subreddit.clone())
            .or_insert(0) += 1;
        *media_type_distribution
            .entry(record.media_type.to_string())
            .or_insert(0) += 1;

        if record.is_removed {
            removed_posts += 1;
            urls_in_removed_posts += record.url_count;
        }
        if let Some(reason) = &record.removal_reason {
            *removal_reason_distribution
                .entry(reason.clone())
                .or_insert(0) += 1;
        }

        if record.url_count > 0 {
            posts_with_urls += 1;
        }
        total_urls += record.url_count;
        for domain in record.all_urls().filter_map(|url| url_domain(url)) {
            *domain_frequency.entry(domain).or_insert(0) += 1;
        }

        count_into(&mut by_subreddit, record.subreddit.clone(), record.is_removed);
        count_into(
            &mut by_media_type,
            record.media_type.to_string(),
            record.is_removed,
        );
        count_into(&mut by_url_count, record.url_count, record.is_removed);
    }

    finish_rates(&mut by_subreddit);
    finish_rates(&mut by_media_type);
    finish_rates(&mut by_url_count);

    Some(BatchStats {
        total_posts,
        removed_posts,
        removal_rate: percent(removed_posts, total_posts),
        subreddit_distribution,
        media_type_distribution,
        removal_reason_distribution,
        content_stats: ContentStats {
            title_length,
            body_length,
        },
        engagement_stats: EngagementStats { score, comments },
        url_stats: UrlStats {
            posts_with_urls,
            total_urls,
            urls_in_removed_posts,
            url_removal_rate: percent(urls_in_removed_posts, total_urls),
            domain_frequency,
        },
        removal_breakdown: RemovalBreakdown {
            by_subreddit,
            by_media_type,
            by_url_count,
        },
    })
}

/// Computes statistics per flush, optionally over the running total of
/// everything flushed so far.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    cumulative: bool,
    history: Mutex<Vec<PostRecord>>,
}

impl StatsAggregator {
    pub fn new(cumulative: bool) -> Self {
        Self {
            cumulative,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn aggregate(&self, batch: &[PostRecord]) -> Option<BatchStats> {
        if batch.is_empty() {
            return None;
        }
        if !self.cumulative {
            return compute(batch);
        }

        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all = history.clone();
        all.extend_from_slice(batch);
        compute(&all)
    }

    /// Record a batch as flushed. Only matters in cumulative mode.
    pub fn commit(&self, batch: &[PostRecord]) {
        if self.cumulative {
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(batch);
        }
    }

    pub fn is_cumulative(&self) -> bool {
        self.cumulative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_record;
    use tracker_core::MediaType;

    fn removed(id: &str, reason: &str) -> PostRecord {
        let mut record = sample_record(id);
        record.is_removed = true;
        record.removal_reason = Some(reason.to_string());
        record
    }

    #[test]
    fn test_score_summary() {
        let records: Vec<_> = [10, -2, 7]
            .into_iter()
            .enumerate()
            .map(|(i, score)| {
                let mut record = sample_record(&format!("p{}", i));
                record.score = score;
                record
            })
            .collect();

        let stats = compute(&records).unwrap();
        assert_eq!(
            stats.engagement_stats.score,
            NumericSummary {
                min: -2,
                max: 10,
                avg: 5.0
            }
        );
    }

    #[test]
    fn test_empty_batch_is_skipped() {
        assert!(compute(&[]).is_none());
        assert!(StatsAggregator::new(true).aggregate(&[]).is_none());
        assert!(NumericSummary::from_values(Vec::new()).is_none());
    }

    #[test]
    fn test_removal_rate_and_distributions() {
        let mut image = sample_record("p3");
        image.subreddit = "pics".to_string();
        image.media_type = MediaType::Image;

        let records = vec![
            removed("p1", "moderator_removed"),
            removed("p2", "automod_filtered"),
            image,
            sample_record("p4"),
        ];
        let stats = compute(&records).unwrap();

        assert_eq!(stats.total_posts, 4);
        assert_eq!(stats.removed_posts, 2);
        assert_eq!(stats.removal_rate, 50.0);
        assert_eq!(stats.subreddit_distribution["rust"], 3);
        assert_eq!(stats.media_type_distribution["image"], 1);
        assert_eq!(stats.removal_reason_distribution["automod_filtered"], 1);

        let rust = &stats.removal_breakdown.by_subreddit["rust"];
        assert_eq!((rust.total, rust.removed), (3, 2));
        assert!((rust.removal_rate - 66.666).abs() < 0.01);
        assert_eq!(stats.removal_breakdown.by_subreddit["pics"].removed, 0);
    }

    #[test]
    fn test_url_statistics() {
        let mut linked = removed("p1", "moderator_removed");
        linked.title_urls = vec!["https://Example.com/a".to_string()];
        linked.body_urls = vec![
            "www.example.com/b".to_string(),
            "http://other.org".to_string(),
        ];
        linked.url_count = 3;

        let mut kept = sample_record("p2");
        kept.body_urls = vec!["https://other.org/x".to_string()];
        kept.url_count = 1;

        let stats = compute(&[linked, kept, sample_record("p3")]).unwrap();
        let urls = &stats.url_stats;
        assert_eq!(urls.posts_with_urls, 2);
        assert_eq!(urls.total_urls, 4);
        assert_eq!(urls.urls_in_removed_posts, 3);
        assert_eq!(urls.url_removal_rate, 75.0);
        assert_eq!(urls.domain_frequency["example.com"], 1);
        assert_eq!(urls.domain_frequency["www.example.com"], 1);
        assert_eq!(urls.domain_frequency["other.org"], 2);

        let by_count = &stats.removal_breakdown.by_url_count;
        assert_eq!(by_count[&0].total, 1);
        assert_eq!(by_count[&3].removed, 1);
    }

    #[test]
    fn test_cumulative_mode_includes_committed_batches() {
        let aggregator = StatsAggregator::new(true);
        let first = vec![removed("p1", "moderator_removed")];
        aggregator.commit(&first);

        let stats = aggregator.aggregate(&[sample_record("p2")]).unwrap();
        assert_eq!(stats.total_posts, 2);
        assert_eq!(stats.removed_posts, 1);

        let per_batch = StatsAggregator::new(false);
        per_batch.commit(&first);
        assert_eq!(per_batch.aggregate(&[sample_record("p2")]).unwrap().total_posts, 1);
    }

    #[test]
    fn test_stats_serialize_with_expected_keys() {
        let stats = compute(&[sample_record("p1")]).unwrap();
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["engagement_stats"]["score"]["min"], 1);
        assert!(json["removal_breakdown"]["by_url_count"]["0"].is_object());
    }
}
