//! Recovery of a lost local cache from cloud state.
//!
//! All three entry points converge on `put_media_if_absent`, so a
//! record already known locally (by id or cloud path) is never
//! clobbered and repeated restores are idempotent. Each returns the
//! number of records actually written.

use crate::error::MediaError;
use crate::records::{ImageSource, MediaRecord};

use super::{run_blocking, MediaLibrary};

impl MediaLibrary {
    /// Rebuild cache entries from the raw object listing. The written
    /// records carry `Cloud` source and no payload; bytes are fetched
    /// on demand via [`cache_image_locally`].
    ///
    /// [`cache_image_locally`]: MediaLibrary::cache_image_locally
    pub async fn restore_from_cloud(&self) -> Result<usize, MediaError> {
        let objects = self.objects();
        let prefix = self.config().cloud.prefix.clone();
        let listed = run_blocking(move || objects.list(&prefix)).await?;
        let restored = self.write_missing(listed).await?;
        self.status()
            .info(format!("restored {restored} images from cloud storage"));
        self.refresh_view().await?;
        Ok(restored)
    }

    /// Restore from an explicit record set, or from the session's
    /// cloud-discovered entries when none is given. Written records are
    /// marked `Synced` since the caller vouches for them.
    pub async fn restore_from_cloud_images(
        &self,
        images: Option<Vec<MediaRecord>>,
    ) -> Result<usize, MediaError> {
        let candidates = match images {
            Some(images) => images,
            None => self
                .list_images()
                .await
                .into_iter()
                .filter(|r| r.source == ImageSource::Cloud)
                .collect(),
        };

        let mut restored = 0usize;
        for mut record in candidates {
            record.source = ImageSource::Synced;
            if self.store().put_media_if_absent(&record).await? {
                restored += 1;
            }
        }
        if restored > 0 {
            self.status()
                .info(format!("restored {restored} cloud images"));
            self.refresh_view().await?;
        }
        Ok(restored)
    }

    /// Rebuild cache entries and slide assignments from the active
    /// published slides. The written records are adopted as `Synced`,
    /// the same as any other caller-vouched restore. Per-row failures
    /// are collected and logged, and never abort the rest of the
    /// restore.
    pub async fn restore_from_published_slides(&self) -> Result<usize, MediaError> {
        let api = self.api();
        let slides = run_blocking(move || api.published_slides()).await?;

        let mut restored = 0usize;
        let mut failures = Vec::new();
        for slide in &slides {
            let mut record = slide.to_media_record();
            record.source = ImageSource::Synced;
            match self.store().put_media_if_absent(&record).await {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(err) => {
                    failures.push(format!("{}: {err}", slide.slide_id));
                    continue;
                }
            }
            let assignment = slide.to_assignment();
            if let Err(err) = self.store().put_assignment(&assignment).await {
                failures.push(format!("{} assignment: {err}", slide.slide_id));
            }
        }

        if !failures.is_empty() {
            tracing::warn!(failed = failures.len(), "published-slide restore had failures");
            self.status().warning(
                "some published slides could not be restored",
                Some(failures.join("; ")),
            );
        }
        if restored > 0 {
            self.status().info(format!(
                "restored {restored} images from published slides"
            ));
            self.refresh_view().await?;
        }
        Ok(restored)
    }

    async fn write_missing(&self, records: Vec<MediaRecord>) -> Result<usize, MediaError> {
        let mut written = 0usize;
        for record in records {
            if self.store().put_media_if_absent(&record).await? {
                written += 1;
            }
        }
        Ok(written)
    }
}
