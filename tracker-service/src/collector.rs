use chrono::{DateTime, Utc};
use reddit_client::RateLimiter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use tracker_core::removal::{DELETED_SENTINEL, REMOVED_SENTINEL};
use tracker_core::{
    media, text, CommentHandle, CommentRecord, ContentSource, PostHandle, PostRecord,
    RemovalState, SourceError, SubredditRule,
};

/// Turns a post handle into a full `PostRecord`.
///
/// Every outbound call goes through the shared rate limiter. Comment and
/// rule lookups are best effort; only a handle missing required fields fails
/// the whole collection.
pub struct Collector {
    source: Arc<dyn ContentSource>,
    limiter: Arc<RateLimiter>,
    comment_limit: usize,
    keywords: Vec<String>,
    rules_cache: Mutex<HashMap<String, Vec<SubredditRule>>>,
}

impl Collector {
    pub fn new(
        source: Arc<dyn ContentSource>,
        limiter: Arc<RateLimiter>,
        comment_limit: usize,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            source,
            limiter,
            comment_limit,
            keywords,
            rules_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Keywords found in the post, or `None` when a keyword filter is set
    /// and nothing matched.
    pub fn keyword_filter(&self, handle: &PostHandle) -> Option<Vec<String>> {
        if self.keywords.is_empty() {
            return Some(Vec::new());
        }
        let body = handle.selftext.as_deref().unwrap_or_default();
        let matched = text::matched_keywords(&self.keywords, &[&handle.title, body]);
        (!matched.is_empty()).then_some(matched)
    }

    pub async fn collect(
        &self,
        handle: &PostHandle,
        matched_keywords: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<PostRecord, SourceError> {
        if handle.id.trim().is_empty() {
            return Err(SourceError::malformed("post handle without id"));
        }
        if handle.subreddit.trim().is_empty() {
            return Err(SourceError::malformed(format!(
                "post {} has no subreddit",
                handle.id
            )));
        }

        let comments = self.collect_comments(handle).await;
        let subreddit_rules = self.subreddit_rules(&handle.subreddit).await;

        let raw_body = handle.selftext.as_deref().unwrap_or_default();
        let title_urls = text::extract_urls(&handle.title);
        let body_urls = text::extract_urls(raw_body);
        let media_type = media::classify(handle);

        let mut record = PostRecord {
            id: handle.id.clone(),
            title: text::clean(&handle.title),
            body: text::clean(raw_body),
            url_count: title_urls.len() + body_urls.len(),
            title_urls,
            body_urls,
            url: handle.url.clone(),
            permalink: handle.permalink.clone(),
            author: handle.author.clone(),
            subreddit: handle.subreddit.clone(),
            created_utc: handle.created_utc,
            score: handle.score,
            num_comments: handle.num_comments,
            media_type,
            media_urls: media::media_urls(handle, media_type),
            subreddit_rules,
            comments,
            matched_keywords,
            is_removed: false,
            removal_reason: None,
            removed_by: None,
            removed_by_category: None,
            banned_by: None,
            author_absent: false,
            selftext_sentinel: None,
            approved_by: None,
            approved_at_utc: None,
            timestamp_collected: now,
            timestamp_checked: now,
            hours_tracked: 0.0,
        };
        record.apply_removal(&RemovalState::from_handle(handle));

        debug!(
            "Collected post {} from r/{} ({}, {} urls, {} comments)",
            record.id,
            record.subreddit,
            record.media_type,
            record.url_count,
            record.comments.len()
        );
        Ok(record)
    }

    async fn collect_comments(&self, handle: &PostHandle) -> Vec<CommentRecord> {
        if self.comment_limit == 0 {
            return Vec::new();
        }

        self.limiter.acquire().await;
        match self.source.fetch_comments(handle, self.comment_limit).await {
            Ok(comments) => comments
                .into_iter()
                .filter(|comment| !comment.stickied)
                .take(self.comment_limit)
                .map(comment_record)
                .collect(),
            Err(e) => {
                warn!("Failed to fetch comments for {}: {}", handle.id, e);
                Vec::new()
            }
        }
    }

    async fn subreddit_rules(&self, subreddit: &str) -> Vec<SubredditRule> {
        let key = subreddit.to_lowercase();
        if let Some(rules) = self
            .rules_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return rules.clone();
        }

        self.limiter.acquire().await;
        match self.source.fetch_subreddit_rules(subreddit).await {
            Ok(rules) => {
                self.rules_cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, rules.clone());
                rules
            }
            Err(e) => {
                warn!("Failed to fetch rules for r/{}: {}", subreddit, e);
                Vec::new()
            }
        }
    }
}

fn comment_record(comment: CommentHandle) -> CommentRecord {
    let body = comment.body.trim();
    CommentRecord {
        is_removed: body == REMOVED_SENTINEL,
        is_deleted: body == DELETED_SENTINEL,
        urls: text::extract_urls(&comment.body),
        body: text::clean(&comment.body),
        id: comment.id,
        author: comment.author,
        score: comment.score,
        created_utc: comment.created_utc,
    }
}
