//! Output of finalized batches.
//!
//! ```text
//! {data_dir}/
//! ├── records/
//! │   └── removal_tracking_YYYYMMDD_HHMMSS.json
//! └── stats/
//!     └── removal_stats_YYYYMMDD_HHMMSS.json
//! ```

use crate::stats::BatchStats;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracker_core::{PersistenceError, PostRecord};

#[async_trait]
pub trait Persister: Send + Sync {
    /// Write one flush. The caller keeps `records` until this succeeds.
    async fn persist(
        &self,
        records: &[PostRecord],
        stats: &BatchStats,
        flushed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;
}

/// Pretty-printed JSON files, one pair per flush.
#[derive(Debug, Clone)]
pub struct JsonFilePersister {
    data_dir: PathBuf,
}

impl JsonFilePersister {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn records_path(&self, flushed_at: DateTime<Utc>) -> PathBuf {
        self.data_dir
            .join("records")
            .join(format!("removal_tracking_{}.json", stamp(flushed_at)))
    }

    pub fn stats_path(&self, flushed_at: DateTime<Utc>) -> PathBuf {
        self.data_dir
            .join("stats")
            .join(format!("removal_stats_{}.json", stamp(flushed_at)))
    }

    async fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &bytes).await.map_err(|e| PersistenceError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Write to a sibling temp file, then rename over the target. The temp
/// file is removed again if any step fails.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let result = write_and_rename(&tmp, path, bytes).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

async fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(tmp, path).await
}

#[async_trait]
impl Persister for JsonFilePersister {
    async fn persist(
        &self,
        records: &[PostRecord],
        stats: &BatchStats,
        flushed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let records_path = self.records_path(flushed_at);
        let stats_path = self.stats_path(flushed_at);

        self.write_json(&records_path, records).await?;
        // A flush is all or nothing: the caller retries the whole batch
        if let Err(e) = self.write_json(&stats_path, stats).await {
            if let Err(cleanup) = tokio::fs::remove_file(&records_path).await {
                warn!(
                    "Failed to remove {} after stats write failed: {}",
                    records_path.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        info!(
            "Saved {} records to {} and stats to {}",
            records.len(),
            records_path.display(),
            stats_path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::compute;
    use crate::tests::{now, sample_record};

    #[test]
    fn test_paths_use_timestamp_convention() {
        let persister = JsonFilePersister::new("/data");
        assert_eq!(
            persister.records_path(now()),
            PathBuf::from("/data/records/removal_tracking_20231114_221320.json")
        );
        assert_eq!(
            persister.stats_path(now()),
            PathBuf::from("/data/stats/removal_stats_20231114_221320.json")
        );
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let persister = JsonFilePersister::new(dir.path());
        let records = vec![sample_record("p1")];
        let stats = compute(&records).unwrap();

        persister.persist(&records, &stats, now()).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join("records"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["removal_tracking_20231114_221320.json"]);
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let persister = JsonFilePersister::new(&blocker);
        let records = vec![sample_record("p1")];
        let stats = compute(&records).unwrap();

        let err = persister
            .persist(&records, &stats, now())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Write { .. }));
    }

    #[tokio::test]
    async fn test_failed_stats_write_leaves_no_records_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stats"), b"not a directory").unwrap();

        let persister = JsonFilePersister::new(dir.path());
        let records = vec![sample_record("p1")];
        let stats = compute(&records).unwrap();

        let err = persister
            .persist(&records, &stats, now())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Write { .. }));

        let leftovers = std::fs::read_dir(dir.path().join("records"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let persister = JsonFilePersister::new(dir.path());
        // A non-empty directory where the records file should go
        let target = persister.records_path(now());
        std::fs::create_dir_all(target.join("occupied")).unwrap();

        let records = vec![sample_record("p1")];
        let stats = compute(&records).unwrap();
        assert!(persister.persist(&records, &stats, now()).await.is_err());

        let names: Vec<_> = std::fs::read_dir(dir.path().join("records"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["removal_tracking_20231114_221320.json"]);
        assert!(!dir.path().join("stats").exists());
    }
}
