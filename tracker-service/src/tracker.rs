//! Shared tracking state.
//!
//! Both the ingester and the checker touch these structures. Every method
//! takes the lock for a single map/set operation and never across an await.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracker_core::PostRecord;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Post ids that have been admitted, with the time they were first seen.
///
/// Ids are only dropped by `prune_before`, long after the post could still
/// show up in the new-post feed, so a finalized post is never admitted twice.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, post_id: &str) -> bool {
        lock(&self.seen).contains_key(post_id)
    }

    /// Returns false when another caller marked the id first.
    pub fn mark_seen(&self, post_id: &str, now: DateTime<Utc>) -> bool {
        let mut seen = lock(&self.seen);
        if seen.contains_key(post_id) {
            return false;
        }
        seen.insert(post_id.to_string(), now);
        true
    }

    /// Forget ids first seen before `cutoff`, except those in `active`.
    pub fn prune_before(&self, cutoff: DateTime<Utc>, active: &HashSet<String>) -> usize {
        let mut seen = lock(&self.seen);
        let before = seen.len();
        seen.retain(|id, first_seen| *first_seen >= cutoff || active.contains(id));
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.seen).is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingEntry {
    pub post_id: String,
    pub record: PostRecord,
    pub first_seen_at: DateTime<Utc>,
}

impl TrackingEntry {
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.first_seen_at
    }

    /// Hours under observation at `now`, never negative.
    pub fn hours_tracked(&self, now: DateTime<Utc>) -> f64 {
        let hours = self.elapsed(now).num_milliseconds() as f64 / 3_600_000.0;
        hours.max(0.0)
    }
}

#[derive(Debug, Default)]
pub struct Tracker {
    entries: Mutex<HashMap<String, TrackingEntry>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry first seen at `now`. No-op if the id is present.
    pub fn admit(&self, post_id: &str, record: PostRecord, now: DateTime<Utc>) -> bool {
        let mut entries = lock(&self.entries);
        if entries.contains_key(post_id) {
            return false;
        }
        entries.insert(
            post_id.to_string(),
            TrackingEntry {
                post_id: post_id.to_string(),
                record,
                first_seen_at: now,
            },
        );
        true
    }

    /// Independent copy of every active entry.
    pub fn snapshot(&self) -> Vec<(String, TrackingEntry)> {
        lock(&self.entries)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    /// Overwrite the poll-mutable fields. Returns false if the entry is gone.
    pub fn update(&self, post_id: &str, new_record: &PostRecord) -> bool {
        let mut entries = lock(&self.entries);
        match entries.get_mut(post_id) {
            Some(entry) => {
                let previous_hours = entry.record.hours_tracked;
                entry.record.overwrite_mutable(new_record);
                entry.record.hours_tracked = entry.record.hours_tracked.max(previous_hours);
                true
            }
            None => false,
        }
    }

    pub fn evict(&self, post_id: &str) -> Option<TrackingEntry> {
        lock(&self.entries).remove(post_id)
    }

    pub fn ids(&self) -> HashSet<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    pub fn contains(&self, post_id: &str) -> bool {
        lock(&self.entries).contains_key(post_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}
