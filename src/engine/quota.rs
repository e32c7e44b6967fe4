//! Storage accounting and cleanup.
//!
//! Usage is measured against the configured ceiling, not the real
//! filesystem, which keeps the numbers deterministic and safe to act
//! on. Cleanup applies up to three sequential filters (age, total
//! size, keep-recent count) and deletes through [`remove_image`] so
//! cloud copies and the merged view stay consistent.
//!
//! [`remove_image`]: super::MediaLibrary::remove_image

use chrono::{DateTime, Utc};

use crate::error::MediaError;
use crate::records::MediaRecord;

use super::{run_blocking, MediaLibrary};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageInfo {
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub remaining_bytes: u64,
    pub percent_used: f64,
    pub record_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudStorageInfo {
    pub object_count: usize,
    pub total_bytes: u64,
}

/// Filters are applied in declaration order; `None` skips a filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupPolicy {
    pub max_age_days: Option<u32>,
    pub max_total_bytes: Option<u64>,
    pub keep_recent_count: Option<usize>,
}

impl MediaLibrary {
    pub async fn get_storage_info(&self) -> Result<StorageInfo, MediaError> {
        let used_bytes = self.store().media_total_bytes().await?;
        let record_count = self.store().media_count().await?;
        let max_bytes = self.config().storage.max_total_bytes;
        let percent_used = if max_bytes == 0 {
            100.0
        } else {
            used_bytes as f64 / max_bytes as f64 * 100.0
        };
        Ok(StorageInfo {
            used_bytes,
            max_bytes,
            remaining_bytes: max_bytes.saturating_sub(used_bytes),
            percent_used,
            record_count,
        })
    }

    pub async fn get_cloud_storage_info(&self) -> Result<CloudStorageInfo, MediaError> {
        let objects = self.objects();
        let prefix = self.config().cloud.prefix.clone();
        let listed = run_blocking(move || objects.list(&prefix)).await?;
        Ok(CloudStorageInfo {
            object_count: listed.len(),
            total_bytes: listed.iter().filter_map(|r| r.byte_size).sum(),
        })
    }

    /// Cleanup with the configured defaults: age and keep-recent count.
    pub async fn auto_cleanup(&self) -> Result<usize, MediaError> {
        let storage = &self.config().storage;
        self.perform_cleanup(CleanupPolicy {
            max_age_days: Some(storage.max_age_days),
            max_total_bytes: None,
            keep_recent_count: Some(storage.keep_recent_count),
        })
        .await
    }

    /// Delete records until every active filter is satisfied, oldest
    /// first. Returns the number of records removed; per-record delete
    /// failures are collected rather than aborting the sweep.
    pub async fn perform_cleanup(&self, policy: CleanupPolicy) -> Result<usize, MediaError> {
        let mut survivors = self.store().all_media().await?;
        survivors.sort_by(|a, b| a.upload_date.cmp(&b.upload_date));

        let mut doomed: Vec<MediaRecord> = Vec::new();

        if let Some(days) = policy.max_age_days {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            let (old, kept): (Vec<_>, Vec<_>) = survivors
                .into_iter()
                .partition(|r| upload_time(r) < cutoff);
            doomed.extend(old);
            survivors = kept;
        }

        if let Some(max_total) = policy.max_total_bytes {
            let mut total: u64 = survivors.iter().filter_map(|r| r.byte_size).sum();
            while total > max_total && !survivors.is_empty() {
                let oldest = survivors.remove(0);
                total = total.saturating_sub(oldest.byte_size.unwrap_or(0));
                doomed.push(oldest);
            }
        }

        if let Some(keep) = policy.keep_recent_count {
            while survivors.len() > keep {
                doomed.push(survivors.remove(0));
            }
        }

        let mut removed = 0usize;
        let mut failures = Vec::new();
        for record in &doomed {
            match self.remove_image(&record.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => failures.push(format!("{}: {err}", record.name)),
            }
        }

        if !failures.is_empty() {
            self.status()
                .warning("cleanup skipped some records", Some(failures.join("; ")));
        }
        if removed > 0 {
            self.status()
                .info(format!("cleanup removed {removed} images"));
        }
        Ok(removed)
    }

    /// Drop assignments whose image no longer exists locally.
    pub async fn cleanup_orphaned_assignments(&self) -> Result<usize, MediaError> {
        let orphaned = self.store().orphaned_assignments().await?;
        let mut removed = 0usize;
        for slide_id in &orphaned {
            if self.store().delete_assignment(slide_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            self.status()
                .info(format!("removed {removed} orphaned slide assignments"));
        }
        Ok(removed)
    }

    /// Remove images no slide references, oldest first.
    pub async fn cleanup_unused_media(&self) -> Result<usize, MediaError> {
        let unused = self.store().unused_media().await?;
        let mut removed = 0usize;
        for id in &unused {
            if self.remove_image(id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            self.status()
                .info(format!("removed {removed} unused images"));
        }
        Ok(removed)
    }
}

fn upload_time(record: &MediaRecord) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&record.upload_date)
        .map(|dt| dt.with_timezone(&Utc))
        // Unparseable timestamps count as ancient so they age out first.
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::records::{ImageSource, SlideAssignment};

    fn local_record(id: &str, bytes: u64, uploaded: DateTime<Utc>) -> MediaRecord {
        let mut record = cloud_record(id);
        record.source = ImageSource::Local;
        record.cloud_path = None;
        record.public_url = None;
        record.byte_size = Some(bytes);
        record.upload_date = uploaded.to_rfc3339();
        record
    }

    #[tokio::test]
    async fn storage_info_tracks_usage_against_ceiling() {
        let mut config = crate::config::Config::default();
        config.storage.max_total_bytes = 10_000;
        let fx = library(config);
        fx.library
            .store()
            .put_media(&local_record("a", 4_000, Utc::now()))
            .await
            .unwrap();

        let info = fx.library.get_storage_info().await.unwrap();
        assert_eq!(info.used_bytes, 4_000);
        assert_eq!(info.remaining_bytes, 6_000);
        assert_eq!(info.record_count, 1);
        assert!((info.percent_used - 40.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cleanup_with_zero_budgets_empties_the_store() {
        let fx = default_library();
        let now = Utc::now();
        for (id, age_days) in [("fresh", 0i64), ("old", 45), ("ancient", 400)] {
            fx.library
                .store()
                .put_media(&local_record(id, 100, now - chrono::Duration::days(age_days)))
                .await
                .unwrap();
        }

        let removed = fx
            .library
            .perform_cleanup(CleanupPolicy {
                max_age_days: Some(30),
                max_total_bytes: Some(0),
                keep_recent_count: Some(0),
            })
            .await
            .unwrap();

        assert_eq!(removed, 3);
        assert_eq!(fx.library.store().media_count().await.unwrap(), 0);
        // A second run converges to a no-op.
        let again = fx
            .library
            .perform_cleanup(CleanupPolicy {
                max_age_days: Some(30),
                max_total_bytes: Some(0),
                keep_recent_count: Some(0),
            })
            .await
            .unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn size_filter_evicts_oldest_first() {
        let fx = default_library();
        let now = Utc::now();
        fx.library
            .store()
            .put_media(&local_record("oldest", 600, now - chrono::Duration::days(3)))
            .await
            .unwrap();
        fx.library
            .store()
            .put_media(&local_record("newest", 600, now))
            .await
            .unwrap();

        let removed = fx
            .library
            .perform_cleanup(CleanupPolicy {
                max_age_days: None,
                max_total_bytes: Some(800),
                keep_recent_count: None,
            })
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(fx.library.store().get_media("oldest").await.unwrap().is_none());
        assert!(fx.library.store().get_media("newest").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keep_recent_count_caps_the_library() {
        let fx = default_library();
        let now = Utc::now();
        for i in 0..5 {
            fx.library
                .store()
                .put_media(&local_record(
                    &format!("img-{i}"),
                    10,
                    now - chrono::Duration::minutes(i),
                ))
                .await
                .unwrap();
        }

        let removed = fx
            .library
            .perform_cleanup(CleanupPolicy {
                max_age_days: None,
                max_total_bytes: None,
                keep_recent_count: Some(2),
            })
            .await
            .unwrap();

        assert_eq!(removed, 3);
        // img-0 and img-1 are the most recent.
        assert!(fx.library.store().get_media("img-0").await.unwrap().is_some());
        assert!(fx.library.store().get_media("img-1").await.unwrap().is_some());
        assert!(fx.library.store().get_media("img-4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn orphaned_and_unused_sweeps() {
        let fx = default_library();
        fx.library
            .store()
            .put_media(&local_record("kept", 10, Utc::now()))
            .await
            .unwrap();
        fx.library
            .store()
            .put_media(&local_record("loose", 10, Utc::now()))
            .await
            .unwrap();
        fx.library
            .store()
            .put_assignment(&SlideAssignment::new("s1".into(), "kept".into(), None))
            .await
            .unwrap();
        fx.library
            .store()
            .put_assignment(&SlideAssignment::new("s2".into(), "deleted-img".into(), None))
            .await
            .unwrap();

        assert_eq!(fx.library.cleanup_orphaned_assignments().await.unwrap(), 1);
        assert!(fx.library.store().get_assignment("s1").await.unwrap().is_some());

        assert_eq!(fx.library.cleanup_unused_media().await.unwrap(), 1);
        assert!(fx.library.store().get_media("kept").await.unwrap().is_some());
        assert!(fx.library.store().get_media("loose").await.unwrap().is_none());
    }
}
