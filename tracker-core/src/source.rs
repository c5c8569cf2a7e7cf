//! Boundary to the external content source.
//!
//! Every optional attribute of a post is modeled as `Option` so callers never
//! check whether a field exists.

use crate::error::SourceError;
use crate::types::SubredditRule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub type PostStream<'a> = BoxStream<'a, Result<PostHandle, SourceError>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostHandle {
    pub id: String,
    pub title: String,
    pub selftext: Option<String>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub permalink: String,
    /// `None` once the account is deleted or suspended.
    pub author: Option<String>,
    pub subreddit: String,
    pub created_utc: DateTime<Utc>,
    pub score: i64,
    pub num_comments: u64,
    pub is_self: bool,
    pub is_video: bool,
    pub is_gallery: bool,
    pub gallery_urls: Vec<String>,
    pub video_url: Option<String>,
    pub stickied: bool,
    pub removed_by_category: Option<String>,
    pub banned_by: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentHandle {
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    pub stickied: bool,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Lazy, unbounded feed of newly created posts across `subreddits`.
    ///
    /// The stream may end or yield an error at any point; callers restart it
    /// by calling this method again.
    fn stream_new_posts(&self, subreddits: &[String]) -> PostStream<'_>;

    async fn fetch_post(&self, post_id: &str) -> Result<PostHandle, SourceError>;

    /// Top-level comments only, at most `limit` of them.
    async fn fetch_comments(
        &self,
        post: &PostHandle,
        limit: usize,
    ) -> Result<Vec<CommentHandle>, SourceError>;

    async fn fetch_subreddit_rules(
        &self,
        subreddit: &str,
    ) -> Result<Vec<SubredditRule>, SourceError>;
}
