use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracker_core::{
    CommentHandle, ContentSource, CoreError, PostHandle, PostStream, SourceError, SubredditRule,
};

const REDDIT_API_BASE: &str = "https://www.reddit.com";
const FEED_PAGE_SIZE: &str = "100";
const FEED_MEMORY: usize = 2000;
const DELETED_AUTHOR: &str = "[deleted]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: String,
    pub subreddit: String,
    pub url: Option<String>,
    pub permalink: String,
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u64,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_video: bool,
    pub is_gallery: Option<bool>,
    pub domain: Option<String>,
    #[serde(default)]
    pub stickied: bool,
    pub removed_by_category: Option<String>,
    /// A moderator name, or `true` for viewers that may not see the name.
    pub banned_by: Option<serde_json::Value>,
    pub approved_by: Option<String>,
    pub approved_at_utc: Option<f64>,
    pub media: Option<RedditMedia>,
    pub gallery_data: Option<RedditGalleryData>,
    pub media_metadata: Option<HashMap<String, RedditMediaMetadata>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditMedia {
    pub reddit_video: Option<RedditVideo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditVideo {
    pub fallback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditGalleryData {
    pub items: Vec<RedditGalleryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditGalleryItem {
    pub media_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditMediaMetadata {
    pub status: Option<String>,
    pub s: Option<RedditMediaSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditMediaSource {
    pub u: Option<String>,
    pub gif: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    pub created_utc: f64,
    #[serde(default)]
    pub stickied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditRulesResponse {
    pub rules: Vec<RedditRuleData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditRuleData {
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub priority: i64,
    pub violation_reason: Option<String>,
}

fn timestamp(seconds: f64, field: &str) -> Result<DateTime<Utc>, SourceError> {
    Utc.timestamp_opt(seconds.trunc() as i64, 0)
        .single()
        .ok_or_else(|| SourceError::malformed(format!("invalid {field}: {seconds}")))
}

fn present_author(author: String) -> Option<String> {
    if author.is_empty() || author == DELETED_AUTHOR {
        None
    } else {
        Some(author)
    }
}

impl RedditPostData {
    fn gallery_urls(&self) -> Vec<String> {
        let Some(metadata) = self.media_metadata.as_ref() else {
            return Vec::new();
        };
        let source_url = |id: &str| {
            metadata
                .get(id)
                .filter(|m| m.status.as_deref().map_or(true, |s| s == "valid"))
                .and_then(|m| m.s.as_ref())
                .and_then(|s| s.u.clone().or_else(|| s.gif.clone()))
        };

        match self.gallery_data.as_ref() {
            Some(gallery) => gallery
                .items
                .iter()
                .filter_map(|item| source_url(&item.media_id))
                .collect(),
            None => {
                let mut ids: Vec<&String> = metadata.keys().collect();
                ids.sort();
                ids.into_iter().filter_map(|id| source_url(id)).collect()
            }
        }
    }
}

impl TryFrom<RedditPostData> for PostHandle {
    type Error = SourceError;

    fn try_from(post_data: RedditPostData) -> Result<Self, Self::Error> {
        if post_data.id.is_empty() {
            return Err(SourceError::malformed("post without id"));
        }

        let created_utc = timestamp(post_data.created_utc, "created_utc")?;
        let approved_at_utc = post_data
            .approved_at_utc
            .map(|at| timestamp(at, "approved_at_utc"))
            .transpose()?;
        let banned_by = match &post_data.banned_by {
            Some(serde_json::Value::String(name)) => Some(name.clone()),
            Some(serde_json::Value::Bool(true)) => Some("moderator".to_string()),
            _ => None,
        };
        let gallery_urls = post_data.gallery_urls();
        let video_url = post_data
            .media
            .as_ref()
            .and_then(|media| media.reddit_video.as_ref())
            .and_then(|video| video.fallback_url.clone());

        Ok(Self {
            id: post_data.id,
            title: post_data.title,
            selftext: Some(post_data.selftext).filter(|text| !text.is_empty()),
            url: post_data.url,
            domain: post_data.domain,
            permalink: post_data.permalink,
            author: present_author(post_data.author),
            subreddit: post_data.subreddit,
            created_utc,
            score: post_data.score,
            num_comments: post_data.num_comments,
            is_self: post_data.is_self,
            is_video: post_data.is_video,
            is_gallery: post_data.is_gallery.unwrap_or(false),
            gallery_urls,
            video_url,
            stickied: post_data.stickied,
            removed_by_category: post_data.removed_by_category,
            banned_by,
            approved_by: post_data.approved_by,
            approved_at_utc,
        })
    }
}

impl TryFrom<RedditCommentData> for CommentHandle {
    type Error = SourceError;

    fn try_from(comment: RedditCommentData) -> Result<Self, Self::Error> {
        Ok(Self {
            created_utc: timestamp(comment.created_utc, "comment created_utc")?,
            id: comment.id,
            author: present_author(comment.author),
            body: comment.body,
            score: comment.score,
            stickied: comment.stickied,
        })
    }
}

impl From<RedditRuleData> for SubredditRule {
    fn from(rule: RedditRuleData) -> Self {
        Self {
            short_name: rule.short_name,
            description: rule.description,
            kind: rule.kind,
            priority: rule.priority,
            violation_reason: rule.violation_reason,
        }
    }
}

/// Map a non-success HTTP status to the source error taxonomy.
pub fn status_error(status: StatusCode, retry_after: Option<u64>, endpoint: &str) -> SourceError {
    match status.as_u16() {
        429 => SourceError::RateLimitExceeded {
            retry_after: retry_after.unwrap_or(60),
        },
        404 => SourceError::not_found(endpoint),
        401 | 403 => SourceError::Forbidden {
            resource: endpoint.to_string(),
        },
        code if status.is_server_error() => SourceError::ServerError { status_code: code },
        code => SourceError::transient(format!("unexpected status {code} for {endpoint}")),
    }
}

/// Remembers which posts the feed already yielded.
#[derive(Debug)]
pub struct FeedCursor {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl FeedCursor {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Filter a newest-first page down to unseen posts, oldest first.
    pub fn fresh(&mut self, newest_first: Vec<PostHandle>) -> Vec<PostHandle> {
        let mut fresh: Vec<PostHandle> = newest_first
            .into_iter()
            .filter(|post| !self.seen.contains(&post.id))
            .collect();
        fresh.reverse();

        for post in &fresh {
            self.remember(post.id.clone());
        }
        fresh
    }

    fn remember(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

type FeedItem = Result<PostHandle, SourceError>;

struct FeedState<'a> {
    client: &'a RedditApiClient,
    endpoint: String,
    cursor: FeedCursor,
    pending: VecDeque<PostHandle>,
    polled_once: bool,
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    user_agent: String,
    feed_limiter: Option<Arc<RateLimiter>>,
    feed_poll_interval: Duration,
}

impl RedditApiClient {
    pub fn new(user_agent: String) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::Internal {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            http_client,
            user_agent,
            feed_limiter: None,
            feed_poll_interval: Duration::from_secs(30),
        })
    }

    /// Share the process-wide limiter with the new-post feed's listing polls.
    pub fn with_feed_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.feed_limiter = Some(limiter);
        self
    }

    pub fn with_feed_poll_interval(mut self, interval: Duration) -> Self {
        self.feed_poll_interval = interval;
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn make_request(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Response, SourceError> {
        let url = format!("{}{}", REDDIT_API_BASE, endpoint);

        debug!("Making Reddit request: GET {}", endpoint);
        let response = self
            .http_client
            .get(&url)
            .query(query_params)
            .query(&[("raw_json", "1")])
            .send()
            .await
            .map_err(|e| {
                error!("Network error for GET {}: {}", endpoint, e);
                if e.is_timeout() {
                    SourceError::RequestTimeout
                } else {
                    SourceError::transient(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Request successful: {} {}", status, endpoint);
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok())
            .map(|seconds| seconds.ceil() as u64);
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited on {}, retry after {:?}s", endpoint, retry_after);
        } else {
            error!("Request failed with status: {} for {}", status, endpoint);
        }
        Err(status_error(status, retry_after, endpoint))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let response = self.make_request(endpoint, query_params).await?;
        response.json::<T>().await.map_err(|e| {
            error!("Failed to parse response from {}: {}", endpoint, e);
            if e.is_decode() {
                SourceError::malformed(format!("unparseable response from {endpoint}"))
            } else {
                SourceError::transient(e)
            }
        })
    }

    pub async fn get_new_posts(&self, endpoint: &str) -> Result<Vec<PostHandle>, SourceError> {
        let listing: RedditListing<RedditPostData> = self
            .get_json(endpoint, &[("limit", FEED_PAGE_SIZE)])
            .await?;

        let posts: Vec<PostHandle> = listing
            .data
            .children
            .into_iter()
            .filter_map(|child| match PostHandle::try_from(child.data) {
                Ok(post) => Some(post),
                Err(e) => {
                    warn!("Skipping malformed post in {}: {}", endpoint, e);
                    None
                }
            })
            .collect();
        debug!("Retrieved {} posts from {}", posts.len(), endpoint);
        Ok(posts)
    }

    async fn next_feed_item(state: FeedState<'_>) -> Option<(FeedItem, FeedState<'_>)> {
        let mut state = state;
        loop {
            if let Some(post) = state.pending.pop_front() {
                return Some((Ok(post), state));
            }

            if state.polled_once {
                tokio::time::sleep(state.client.feed_poll_interval).await;
            }
            state.polled_once = true;

            if let Some(limiter) = &state.client.feed_limiter {
                limiter.acquire().await;
            }

            match state.client.get_new_posts(&state.endpoint).await {
                Ok(page) => {
                    let fresh = state.cursor.fresh(page);
                    if !fresh.is_empty() {
                        info!("Feed {} yielded {} new posts", state.endpoint, fresh.len());
                    }
                    state.pending.extend(fresh);
                }
                Err(e) => return Some((Err(e), state)),
            }
        }
    }
}

#[async_trait]
impl ContentSource for RedditApiClient {
    fn stream_new_posts(&self, subreddits: &[String]) -> PostStream<'_> {
        let joined = subreddits
            .iter()
            .map(|s| s.trim().trim_start_matches("r/"))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("+");
        let state = FeedState {
            client: self,
            endpoint: format!("/r/{}/new.json", joined),
            cursor: FeedCursor::new(FEED_MEMORY),
            pending: VecDeque::new(),
            polled_once: false,
        };

        stream::unfold(state, Self::next_feed_item).boxed()
    }

    async fn fetch_post(&self, post_id: &str) -> Result<PostHandle, SourceError> {
        let endpoint = format!("/by_id/t3_{}.json", post_id);
        let listing: RedditListing<RedditPostData> = self.get_json(&endpoint, &[]).await?;

        let post_data = listing
            .data
            .children
            .into_iter()
            .next()
            .map(|child| child.data)
            .ok_or_else(|| SourceError::not_found(format!("t3_{post_id}")))?;
        PostHandle::try_from(post_data)
    }

    async fn fetch_comments(
        &self,
        post: &PostHandle,
        limit: usize,
    ) -> Result<Vec<CommentHandle>, SourceError> {
        let endpoint = format!("/comments/{}.json", post.id);
        // Over-fetch a little so dropping stickied comments still fills the limit
        let fetch_limit = (limit + 2).to_string();
        let (_, listing): (IgnoredAny, RedditListing<serde_json::Value>) = self
            .get_json(&endpoint, &[("limit", fetch_limit.as_str()), ("depth", "1")])
            .await?;

        Ok(top_level_comments(listing, limit))
    }

    async fn fetch_subreddit_rules(
        &self,
        subreddit: &str,
    ) -> Result<Vec<SubredditRule>, SourceError> {
        let endpoint = format!("/r/{}/about/rules.json", subreddit);
        let response: RedditRulesResponse = self.get_json(&endpoint, &[]).await?;
        debug!("Retrieved {} rules for r/{}", response.rules.len(), subreddit);
        Ok(response.rules.into_iter().map(SubredditRule::from).collect())
    }
}

/// Non-stickied `t1` children of a comment listing, at most `limit`.
pub fn top_level_comments(
    listing: RedditListing<serde_json::Value>,
    limit: usize,
) -> Vec<CommentHandle> {
    listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind == "t1")
        .filter_map(|child| serde_json::from_value::<RedditCommentData>(child.data).ok())
        .filter_map(|comment| CommentHandle::try_from(comment).ok())
        .filter(|comment| !comment.stickied)
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> PostHandle {
        PostHandle {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_status_error_mapping() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some(12), "/x"),
            SourceError::RateLimitExceeded { retry_after: 12 }
        );
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, None, "/x"),
            SourceError::RateLimitExceeded { retry_after: 60 }
        );
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, None, "/by_id/t3_a.json"),
            SourceError::not_found("/by_id/t3_a.json")
        );
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, None, "/r/private/new.json"),
            SourceError::Forbidden { .. }
        ));
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, None, "/x"),
            SourceError::ServerError { status_code: 502 }
        );
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, None, "/x"),
            SourceError::Transient { .. }
        ));
    }

    #[test]
    fn test_feed_cursor_yields_oldest_first_once() {
        let mut cursor = FeedCursor::new(10);

        let first = cursor.fresh(vec![handle("c"), handle("b"), handle("a")]);
        let ids: Vec<_> = first.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let second = cursor.fresh(vec![handle("d"), handle("c"), handle("b")]);
        let ids: Vec<_> = second.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["d"]);
        assert_eq!(cursor.len(), 4);
    }

    #[test]
    fn test_feed_cursor_is_bounded() {
        let mut cursor = FeedCursor::new(2);
        cursor.fresh(vec![handle("c"), handle("b"), handle("a")]);
        assert_eq!(cursor.len(), 2);

        // "a" was forgotten, so it is fresh again
        let again = cursor.fresh(vec![handle("a")]);
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_client_creation() {
        let client = RedditApiClient::new("removal-tracker-test/1.0".to_string()).unwrap();
        assert_eq!(client.user_agent(), "removal-tracker-test/1.0");
        assert!(client.feed_limiter.is_none());
    }
}
