use crate::removal::RemovalState;
use crate::source::PostHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
    Video,
    Gallery,
    Link,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Text => "text",
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Gallery => "gallery",
            MediaType::Link => "link",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubredditRule {
    pub short_name: String,
    pub description: String,
    pub kind: String,
    pub priority: i64,
    pub violation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    pub urls: Vec<String>,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    pub is_removed: bool,
    pub is_deleted: bool,
}

/// Snapshot of everything collected about one post.
///
/// Identity and content fields are written once at collection time. Removal
/// state, engagement counters and the check timestamps are overwritten on
/// every poll until the record is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub title: String,
    pub body: String,
    pub title_urls: Vec<String>,
    pub body_urls: Vec<String>,
    pub url_count: usize,
    pub url: Option<String>,
    pub permalink: String,
    pub author: Option<String>,
    pub subreddit: String,
    pub created_utc: DateTime<Utc>,
    pub score: i64,
    pub num_comments: u64,
    pub media_type: MediaType,
    pub media_urls: Vec<String>,
    pub subreddit_rules: Vec<SubredditRule>,
    pub comments: Vec<CommentRecord>,
    pub matched_keywords: Vec<String>,

    pub is_removed: bool,
    pub removal_reason: Option<String>,
    pub removed_by: Option<String>,
    pub removed_by_category: Option<String>,
    pub banned_by: Option<String>,
    pub author_absent: bool,
    pub selftext_sentinel: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at_utc: Option<DateTime<Utc>>,

    pub timestamp_collected: DateTime<Utc>,
    pub timestamp_checked: DateTime<Utc>,
    pub hours_tracked: f64,
}

impl PostRecord {
    /// Title URLs followed by body URLs.
    pub fn all_urls(&self) -> impl Iterator<Item = &String> {
        self.title_urls.iter().chain(self.body_urls.iter())
    }

    /// Merge freshly fetched post state into this record.
    pub fn apply_fetched(&mut self, handle: &PostHandle, checked_at: DateTime<Utc>) {
        self.score = handle.score;
        self.num_comments = handle.num_comments;
        self.timestamp_checked = checked_at;
        self.apply_removal(&RemovalState::from_handle(handle));
    }

    pub fn apply_removal(&mut self, state: &RemovalState) {
        self.is_removed = state.is_removed;
        self.removal_reason = state.removal_reason.clone();
        self.removed_by = state.removed_by.clone();
        self.removed_by_category = state.removed_by_category.clone();
        self.banned_by = state.banned_by.clone();
        self.author_absent = state.author_absent;
        self.selftext_sentinel = state.selftext_sentinel.clone();
        self.approved_by = state.approved_by.clone();
        self.approved_at_utc = state.approved_at_utc;
    }

    /// Copy the poll-mutable fields of `other` onto this record.
    pub fn overwrite_mutable(&mut self, other: &PostRecord) {
        self.score = other.score;
        self.num_comments = other.num_comments;
        self.is_removed = other.is_removed;
        self.removal_reason = other.removal_reason.clone();
        self.removed_by = other.removed_by.clone();
        self.removed_by_category = other.removed_by_category.clone();
        self.banned_by = other.banned_by.clone();
        self.author_absent = other.author_absent;
        self.selftext_sentinel = other.selftext_sentinel.clone();
        self.approved_by = other.approved_by.clone();
        self.approved_at_utc = other.approved_at_utc;
        self.timestamp_checked = other.timestamp_checked;
        self.hours_tracked = other.hours_tracked;
    }
}
