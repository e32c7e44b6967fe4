//! Slide assignments and publishing.
//!
//! Publishing sends a fully resolved payload to the privileged server
//! function; the server is never asked to upload anything. The combined
//! assign-and-publish operation snapshots the previous assignment and
//! rolls the local row back when the publish fails, so the local table
//! never claims a publish that did not happen.

use crate::error::MediaError;
use crate::records::{MediaRecord, PublishSlidePayload, SlideAssignment};

use super::{run_blocking, MediaLibrary};

#[derive(Debug)]
pub enum AssignOutcome {
    Committed(SlideAssignment),
    RolledBack {
        previous: Option<SlideAssignment>,
        error: String,
    },
}

impl MediaLibrary {
    pub async fn slide_assignments(&self) -> Result<Vec<SlideAssignment>, MediaError> {
        self.store().all_assignments().await
    }

    /// Upsert the local assignment row only; no publish.
    pub async fn set_slide_assignment(
        &self,
        slide_id: &str,
        image_id: &str,
        image_alt: Option<String>,
    ) -> Result<SlideAssignment, MediaError> {
        self.store()
            .get_media(image_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("image {image_id}")))?;
        let assignment =
            SlideAssignment::new(slide_id.to_string(), image_id.to_string(), image_alt);
        self.store().put_assignment(&assignment).await?;
        Ok(assignment)
    }

    pub async fn remove_slide_assignment(&self, slide_id: &str) -> Result<bool, MediaError> {
        self.store().delete_assignment(slide_id).await
    }

    /// Publish the slide's current assignment. The referenced image is
    /// uploaded first when it has no cloud reference yet.
    pub async fn publish_slide(&self, slide_id: &str) -> Result<(), MediaError> {
        let assignment = self
            .store()
            .get_assignment(slide_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("assignment for slide {slide_id}")))?;
        let record = self
            .store()
            .get_media(&assignment.image_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("image {}", assignment.image_id)))?;
        let record = self.ensure_uploaded(record).await?;

        let payload = PublishSlidePayload {
            slide_id: assignment.slide_id.clone(),
            image_id: record.id.clone(),
            image_name: record.name.clone(),
            image_url: record
                .public_url
                .clone()
                .ok_or_else(|| MediaError::validation(record.name.clone(), "no public URL"))?,
            cloud_path: record.cloud_path.clone(),
            width: record.dimensions.map(|d| d.width),
            height: record.dimensions.map(|d| d.height),
            byte_size: record.byte_size,
            image_alt: assignment.image_alt.clone(),
        };

        let api = self.api();
        run_blocking(move || api.publish_slide(&payload)).await?;
        self.status()
            .info(format!("published slide {slide_id} with {}", record.name));
        Ok(())
    }

    /// Two-phase assign: write the local row, publish, and roll the row
    /// back to its prior state when the publish fails. The rollback is
    /// reported in the outcome, not as an error.
    pub async fn assign_and_publish(
        &self,
        slide_id: &str,
        image_id: &str,
        image_alt: Option<String>,
    ) -> Result<AssignOutcome, MediaError> {
        let previous = self.store().get_assignment(slide_id).await?;
        let assignment = self.set_slide_assignment(slide_id, image_id, image_alt).await?;

        match self.publish_slide(slide_id).await {
            Ok(()) => Ok(AssignOutcome::Committed(assignment)),
            Err(err) => {
                match &previous {
                    Some(prev) => self.store().put_assignment(prev).await?,
                    None => {
                        self.store().delete_assignment(slide_id).await?;
                    }
                }
                self.status().warning(
                    format!("publish failed for slide {slide_id}, assignment rolled back"),
                    Some(err.to_string()),
                );
                Ok(AssignOutcome::RolledBack {
                    previous,
                    error: err.to_string(),
                })
            }
        }
    }

    /// Upload the record's payload when it has never been synced, so
    /// the publish payload can be fully resolved.
    async fn ensure_uploaded(&self, mut record: MediaRecord) -> Result<MediaRecord, MediaError> {
        if record.cloud_path.is_some() && record.public_url.is_some() {
            return Ok(record);
        }
        let content = record.content.clone().ok_or_else(|| {
            MediaError::validation(record.name.clone(), "no payload available to upload")
        })?;

        let objects = self.objects();
        let name = record.name.clone();
        // Re-publishing the same asset is expected, so clobbering the
        // existing object is fine here.
        let stored =
            run_blocking(move || objects.upload(&content, &name, "image/jpeg", true)).await?;
        record.promote_to_synced(stored.path, stored.public_url);
        self.store().put_media(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::records::{Dimensions, ImageSource};
    use std::sync::atomic::Ordering;

    async fn seed_synced(fx: &Fixture, id: &str) {
        let mut record = cloud_record(id);
        record.source = ImageSource::Synced;
        record.dimensions = Some(Dimensions {
            width: 640,
            height: 480,
        });
        fx.library.store().put_media(&record).await.unwrap();
    }

    #[tokio::test]
    async fn assign_and_publish_commits() {
        let fx = default_library();
        seed_synced(&fx, "hero").await;

        let outcome = fx
            .library
            .assign_and_publish("intro", "hero", Some("intro hero".into()))
            .await
            .unwrap();

        assert!(matches!(outcome, AssignOutcome::Committed(_)));
        let published = fx.api.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].slide_id, "intro");
        assert_eq!(published[0].image_url, "https://cdn.test/library/hero.jpg");
        assert_eq!(published[0].width, Some(640));
        assert_eq!(published[0].image_alt.as_deref(), Some("intro hero"));
    }

    #[tokio::test]
    async fn failed_publish_rolls_back_to_previous_assignment() {
        let fx = default_library();
        seed_synced(&fx, "first").await;
        seed_synced(&fx, "second").await;
        fx.library
            .set_slide_assignment("intro", "first", None)
            .await
            .unwrap();
        fx.api.fail_publish.store(true, Ordering::SeqCst);

        let outcome = fx
            .library
            .assign_and_publish("intro", "second", None)
            .await
            .unwrap();

        match outcome {
            AssignOutcome::RolledBack { previous, .. } => {
                assert_eq!(previous.unwrap().image_id, "first");
            }
            other => panic!("expected rollback, got {other:?}"),
        }
        let current = fx
            .library
            .store()
            .get_assignment("intro")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.image_id, "first");
    }

    #[tokio::test]
    async fn failed_publish_with_no_prior_assignment_removes_the_row() {
        let fx = default_library();
        seed_synced(&fx, "hero").await;
        fx.api.fail_publish.store(true, Ordering::SeqCst);

        let outcome = fx
            .library
            .assign_and_publish("fresh", "hero", None)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            AssignOutcome::RolledBack { previous: None, .. }
        ));
        assert!(fx.library.store().get_assignment("fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn publish_uploads_local_only_images_first() {
        let fx = default_library();
        let mut record = cloud_record("draft");
        record.source = ImageSource::Local;
        record.cloud_path = None;
        record.public_url = None;
        record.content = Some(vec![1, 2, 3]);
        fx.library.store().put_media(&record).await.unwrap();
        fx.library
            .set_slide_assignment("intro", "draft", None)
            .await
            .unwrap();

        fx.library.publish_slide("intro").await.unwrap();

        let stored = fx.library.store().get_media("draft").await.unwrap().unwrap();
        assert_eq!(stored.source, ImageSource::Synced);
        assert!(stored.cloud_path.is_some());
        let published = fx.api.published.lock().unwrap();
        assert_eq!(published[0].cloud_path, stored.cloud_path);
    }

    #[tokio::test]
    async fn assigning_a_missing_image_is_refused() {
        let fx = default_library();
        let err = fx
            .library
            .set_slide_assignment("intro", "nope", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));
    }
}
