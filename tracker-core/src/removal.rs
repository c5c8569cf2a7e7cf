//! Removal classification from the raw moderation fields of a post.

use crate::source::PostHandle;
use chrono::{DateTime, Utc};

pub const REMOVED_SENTINEL: &str = "[removed]";
pub const DELETED_SENTINEL: &str = "[deleted]";

pub const REASON_MODERATOR: &str = "moderator_removed";
pub const REASON_AUTOMOD: &str = "automod_filtered";
pub const REASON_ADMIN: &str = "admin_removed";
pub const REASON_LEGAL: &str = "legal_takedown";
pub const REASON_AUTHOR_DELETED: &str = "deleted_by_author";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovalState {
    pub is_removed: bool,
    pub removal_reason: Option<String>,
    pub removed_by: Option<String>,
    pub removed_by_category: Option<String>,
    pub banned_by: Option<String>,
    pub author_absent: bool,
    pub selftext_sentinel: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at_utc: Option<DateTime<Utc>>,
}

impl RemovalState {
    pub fn from_handle(handle: &PostHandle) -> Self {
        let selftext_sentinel = handle
            .selftext
            .as_deref()
            .map(str::trim)
            .filter(|text| *text == REMOVED_SENTINEL || *text == DELETED_SENTINEL)
            .map(str::to_string);

        let (reason, removed_by) = classify(
            handle.removed_by_category.as_deref(),
            handle.banned_by.as_deref(),
            selftext_sentinel.as_deref(),
        );

        Self {
            is_removed: reason.is_some_and(|r| r != REASON_AUTHOR_DELETED),
            removal_reason: reason.map(str::to_string),
            removed_by,
            removed_by_category: handle.removed_by_category.clone(),
            banned_by: handle.banned_by.clone(),
            author_absent: handle.author.is_none(),
            selftext_sentinel,
            approved_by: handle.approved_by.clone(),
            approved_at_utc: handle.approved_at_utc,
        }
    }
}

fn classify(
    category: Option<&str>,
    banned_by: Option<&str>,
    sentinel: Option<&str>,
) -> (Option<&'static str>, Option<String>) {
    if let Some(category) = category {
        let hit = match category {
            "moderator" => Some((REASON_MODERATOR, "moderator")),
            "automod_filtered" => Some((REASON_AUTOMOD, "automoderator")),
            "anti_evil_ops" | "community_ops" | "reddit" => Some((REASON_ADMIN, "reddit")),
            "copyright_takedown" | "content_takedown" => Some((REASON_LEGAL, "reddit")),
            "deleted" | "author" => Some((REASON_AUTHOR_DELETED, "author")),
            _ => None,
        };
        if let Some((reason, by)) = hit {
            return (Some(reason), Some(by.to_string()));
        }
    }

    if let Some(banned_by) = banned_by.filter(|b| !b.is_empty()) {
        return (Some(REASON_MODERATOR), Some(banned_by.to_string()));
    }

    match sentinel {
        Some(REMOVED_SENTINEL) => (Some(REASON_MODERATOR), Some("moderator".to_string())),
        Some(DELETED_SENTINEL) => (Some(REASON_AUTHOR_DELETED), Some("author".to_string())),
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> PostHandle {
        PostHandle {
            id: "abc".to_string(),
            author: Some("someone".to_string()),
            selftext: Some("hello".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_live_post_is_not_removed() {
        let state = RemovalState::from_handle(&handle());
        assert!(!state.is_removed);
        assert_eq!(state.removal_reason, None);
        assert!(!state.author_absent);
    }

    #[test]
    fn test_moderator_category() {
        let mut post = handle();
        post.removed_by_category = Some("moderator".to_string());
        let state = RemovalState::from_handle(&post);
        assert!(state.is_removed);
        assert_eq!(state.removal_reason.as_deref(), Some(REASON_MODERATOR));
        assert_eq!(state.removed_by.as_deref(), Some("moderator"));
        assert_eq!(state.removed_by_category.as_deref(), Some("moderator"));
    }

    #[test]
    fn test_banned_by_without_category() {
        let mut post = handle();
        post.banned_by = Some("AutoModerator".to_string());
        let state = RemovalState::from_handle(&post);
        assert!(state.is_removed);
        assert_eq!(state.removed_by.as_deref(), Some("AutoModerator"));
    }

    #[test]
    fn test_removed_sentinel_in_selftext() {
        let mut post = handle();
        post.selftext = Some("[removed]".to_string());
        let state = RemovalState::from_handle(&post);
        assert!(state.is_removed);
        assert_eq!(state.selftext_sentinel.as_deref(), Some(REMOVED_SENTINEL));
    }

    #[test]
    fn test_author_deletion_is_not_a_removal() {
        let mut post = handle();
        post.author = None;
        post.selftext = Some("[deleted]".to_string());
        post.removed_by_category = Some("deleted".to_string());
        let state = RemovalState::from_handle(&post);
        assert!(!state.is_removed);
        assert!(state.author_absent);
        assert_eq!(state.removal_reason.as_deref(), Some(REASON_AUTHOR_DELETED));
    }

    #[test]
    fn test_category_takes_priority_over_banned_by() {
        let mut post = handle();
        post.removed_by_category = Some("anti_evil_ops".to_string());
        post.banned_by = Some("some_mod".to_string());
        let state = RemovalState::from_handle(&post);
        assert_eq!(state.removal_reason.as_deref(), Some(REASON_ADMIN));
        assert_eq!(state.removed_by.as_deref(), Some("reddit"));
        assert_eq!(state.banned_by.as_deref(), Some("some_mod"));
    }
}
