//! The upload pipeline.
//!
//! A batch is pre-validated in full (type, size, decodability) before
//! anything is written, then checked against the storage quota, then
//! processed in chunks of a few concurrent files. Each file is
//! compressed to JPEG, pushed to cloud storage when it is reachable
//! (failure leaves the image local-only) and persisted through the
//! store's retry path. Per-file failures are reported alongside the
//! successes; only pre-admission problems fail the whole batch.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::compress::probe_image;
use crate::config::UploadConfig;
use crate::error::MediaError;
use crate::records::{content_id, MediaRecord, UploadProgress, UploadStage};
use crate::retry::{retry, RetryPolicy};

use super::{run_blocking, MediaLibrary, ProgressListener};

const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

const COMPRESS_RETRY: RetryPolicy = RetryPolicy::fixed(3, Duration::from_secs(1));
const LOCAL_SAVE_RETRY: RetryPolicy = RetryPolicy::fixed(3, Duration::from_millis(500));

#[derive(Debug, Clone)]
pub struct NewImageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl NewImageFile {
    /// Read a file from disk, inferring the content type from its
    /// extension.
    pub fn from_path(path: &Path) -> Result<Self, MediaError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                MediaError::validation(path.display().to_string(), "not a usable file name")
            })?;
        let content_type = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            other => {
                return Err(MediaError::validation(
                    name,
                    format!("unsupported file extension {:?}", other.unwrap_or("")),
                ))
            }
        };
        let bytes = std::fs::read(path)
            .map_err(|e| MediaError::validation(name.clone(), format!("read failed: {e}")))?;
        Ok(Self {
            name,
            content_type: content_type.to_string(),
            bytes,
        })
    }
}

#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub success: Vec<MediaRecord>,
    pub errors: Vec<String>,
}

impl MediaLibrary {
    /// Add a batch of images. Returns `Err` only when the batch as a
    /// whole is inadmissible (quota); individual file failures land in
    /// [`UploadOutcome::errors`]. Quota headroom is judged against the
    /// configured ceiling minus the ledger of stored byte sizes, never
    /// a filesystem probe, so admission stays deterministic.
    pub async fn add_images(
        self: &Arc<Self>,
        files: Vec<NewImageFile>,
    ) -> Result<UploadOutcome, MediaError> {
        let mut errors = Vec::new();
        let mut valid = Vec::new();
        for (index, file) in files.into_iter().enumerate() {
            match validate_file(&file, &self.config().upload) {
                Ok(()) => valid.push((index, file)),
                Err(err) => errors.push(err.to_string()),
            }
        }
        if valid.is_empty() {
            return Ok(UploadOutcome {
                success: Vec::new(),
                errors,
            });
        }

        // Quota admission before any write. Headroom for two compressed
        // files keeps a concurrent batch from landing exactly at the
        // ceiling.
        let info = self.get_storage_info().await?;
        let declared: u64 = valid.iter().map(|(_, f)| f.bytes.len() as u64).sum();
        let headroom = 2 * self.config().upload.max_compressed_bytes;
        if declared.saturating_add(headroom) > info.remaining_bytes {
            return Err(MediaError::QuotaExceeded(format!(
                "batch of {declared} bytes does not fit in the remaining {} bytes; \
                 remove unused images and try again",
                info.remaining_bytes
            )));
        }

        let concurrency = self.config().upload.concurrency.max(1);
        let mut success = Vec::new();
        let mut queue = valid.into_iter().peekable();
        while queue.peek().is_some() {
            let chunk: Vec<_> = queue.by_ref().take(concurrency).collect();
            let mut join = JoinSet::new();
            for (index, file) in chunk {
                let library = Arc::clone(self);
                join.spawn(async move { library.process_one(index, file).await });
            }
            while let Some(joined) = join.join_next().await {
                match joined {
                    Ok(Ok(record)) => success.push(record),
                    Ok(Err(message)) => errors.push(message),
                    Err(err) => errors.push(format!("upload task failed: {err}")),
                }
            }
        }

        self.refresh_view().await?;
        self.status().info(format!(
            "upload finished: {} succeeded, {} failed",
            success.len(),
            errors.len()
        ));
        Ok(UploadOutcome { success, errors })
    }

    async fn process_one(&self, index: usize, file: NewImageFile) -> Result<MediaRecord, String> {
        let reporter = Reporter {
            listener: self.progress_listener(),
            file_name: file.name.clone(),
            file_index: index,
        };
        reporter.stage(UploadStage::Preparing, 5);
        reporter.stage(UploadStage::Validating, 15);

        let compressed = {
            let compressor = self.compressor();
            let bytes = file.bytes.clone();
            let retry_reporter = reporter.clone();
            retry("compress image", COMPRESS_RETRY, |_| true, move || {
                let compressor = Arc::clone(&compressor);
                let bytes = bytes.clone();
                let reporter = retry_reporter.clone();
                async move {
                    run_blocking(move || {
                        let progress = |p: u8| {
                            let scaled = 30 + u8::try_from(u16::from(p) * 30 / 100).unwrap_or(30);
                            reporter.stage(UploadStage::Compressing, scaled);
                        };
                        compressor.compress(&bytes, &progress)
                    })
                    .await
                }
            })
            .await
            .map_err(|err| reporter.failure(&file.name, err))?
        };

        let max_compressed = self.config().upload.max_compressed_bytes;
        if compressed.bytes.len() as u64 > max_compressed {
            let message = format!(
                "{}: compressed size {} exceeds the {max_compressed} byte ceiling",
                file.name,
                compressed.bytes.len()
            );
            reporter.fail(&message);
            return Err(message);
        }

        reporter.stage(UploadStage::Processing, 70);
        let mut record = MediaRecord::new_local(content_id(&file.bytes), file.name.clone());
        record.dimensions = Some(crate::records::Dimensions {
            width: compressed.width,
            height: compressed.height,
        });
        record.byte_size = Some(compressed.bytes.len() as u64);
        record.content = Some(compressed.bytes.clone());

        reporter.stage(UploadStage::SyncingToCloud, 80);
        self.sync_to_cloud(&mut record, &compressed.bytes).await;

        let store = Arc::clone(self.store());
        let save_record = record.clone();
        retry(
            "save image locally",
            LOCAL_SAVE_RETRY,
            |err| !err.is_quota(),
            || store.put_media(&save_record),
        )
        .await
        .map_err(|err| reporter.failure(&file.name, err))?;

        reporter.complete();
        Ok(record)
    }

    /// Best-effort cloud upload; a failure leaves `record` local-only
    /// and is surfaced through the status log, never as a hard error.
    async fn sync_to_cloud(&self, record: &mut MediaRecord, payload: &[u8]) {
        let probe = self.objects();
        let available = run_blocking(move || Ok(probe.is_available()))
            .await
            .unwrap_or(false);
        if !available {
            let err = MediaError::CloudUnavailable("availability probe failed".into());
            self.status().warning(
                format!("keeping {} local-only", record.name),
                Some(err.to_string()),
            );
            return;
        }

        let objects = self.objects();
        let name = jpeg_name(&record.name);
        let bytes = payload.to_vec();
        let upload_name = name.clone();
        match run_blocking(move || objects.upload(&bytes, &upload_name, "image/jpeg", false)).await
        {
            Ok(stored) => record.promote_to_synced(stored.path, stored.public_url),
            Err(MediaError::AlreadyExists(path)) => {
                // Same object is already up there; adopt the reference.
                let url = self.objects().public_url(&path);
                record.promote_to_synced(path, url);
            }
            Err(err) => {
                tracing::warn!(name = %record.name, error = %err, "cloud upload failed");
                self.status().warning(
                    format!("cloud upload failed for {}, keeping it local-only", record.name),
                    Some(err.to_string()),
                );
            }
        }
    }
}

fn validate_file(file: &NewImageFile, limits: &UploadConfig) -> Result<(), MediaError> {
    if !ALLOWED_CONTENT_TYPES.contains(&file.content_type.as_str()) {
        return Err(MediaError::validation(
            file.name.clone(),
            format!("unsupported content type {}", file.content_type),
        ));
    }
    if file.bytes.len() as u64 > limits.max_input_bytes {
        return Err(MediaError::validation(
            file.name.clone(),
            format!(
                "input size {} exceeds the {} byte ceiling",
                file.bytes.len(),
                limits.max_input_bytes
            ),
        ));
    }
    probe_image(&file.name, &file.bytes)?;
    Ok(())
}

/// The pipeline re-encodes everything to JPEG, so the stored object
/// name follows suit.
fn jpeg_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.jpg"),
        _ => format!("{name}.jpg"),
    }
}

#[derive(Clone)]
struct Reporter {
    listener: Option<ProgressListener>,
    file_name: String,
    file_index: usize,
}

impl Reporter {
    fn emit(&self, stage: UploadStage, progress: u8, completed: bool, error: Option<String>) {
        if let Some(listener) = &self.listener {
            listener(UploadProgress {
                file_name: self.file_name.clone(),
                file_index: self.file_index,
                stage,
                progress,
                completed,
                error,
            });
        }
    }

    fn stage(&self, stage: UploadStage, progress: u8) {
        self.emit(stage, progress, false, None);
    }

    fn complete(&self) {
        self.emit(UploadStage::Completed, 100, true, None);
    }

    fn fail(&self, message: &str) {
        self.emit(UploadStage::Failed, 100, true, Some(message.to_string()));
    }

    fn failure(&self, name: &str, err: MediaError) -> String {
        let message = format!("{name}: {err}");
        self.fail(&message);
        message
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::compress::test_support::sample_png;
    use crate::records::ImageSource;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn png_file(name: &str) -> NewImageFile {
        NewImageFile {
            name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: sample_png(64, 48),
        }
    }

    #[tokio::test]
    async fn upload_compresses_syncs_and_persists() {
        let fx = default_library();
        let events = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        fx.library
            .set_progress_listener(std::sync::Arc::new(move |p| {
                sink.lock().unwrap().push(p);
            }));

        let outcome = fx
            .library
            .add_images(vec![png_file("photo.png")])
            .await
            .unwrap();

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(outcome.success.len(), 1);
        let record = &outcome.success[0];
        assert_eq!(record.source, ImageSource::Synced);
        assert_eq!(record.cloud_path.as_deref(), Some("library/photo.jpg"));
        assert!(record.public_url.is_some());

        let stored = fx
            .library
            .store()
            .get_media(&record.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.content.is_some());
        assert!(fx.objects.stored.lock().unwrap().contains_key("library/photo.jpg"));

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|p| p.stage == UploadStage::Compressing && (30..=60).contains(&p.progress)));
        assert!(events.last().unwrap().completed);
        assert_eq!(events.last().unwrap().stage, UploadStage::Completed);
    }

    #[tokio::test]
    async fn batch_validation_rejects_without_writing() {
        let fx = default_library();
        let oversized = NewImageFile {
            name: "huge.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: vec![0u8; 60 * 1024 * 1024],
        };
        let wrong_type = NewImageFile {
            name: "notes.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![1, 2, 3],
        };
        let corrupt = NewImageFile {
            name: "broken.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0xde, 0xad, 0xbe, 0xef],
        };

        let outcome = fx
            .library
            .add_images(vec![oversized, wrong_type, corrupt])
            .await
            .unwrap();

        assert!(outcome.success.is_empty());
        assert_eq!(outcome.errors.len(), 3);
        assert_eq!(fx.library.store().media_count().await.unwrap(), 0);
        assert!(fx.objects.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn quota_admission_refuses_the_whole_batch() {
        let mut config = crate::config::Config::default();
        config.storage.max_total_bytes = 1_000;
        let fx = library(config);

        let err = fx
            .library
            .add_images(vec![png_file("photo.png")])
            .await
            .unwrap_err();

        assert!(err.is_quota());
        assert_eq!(fx.library.store().media_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cloud_failure_keeps_image_local_only() {
        let fx = default_library();
        fx.objects.available.store(false, Ordering::SeqCst);

        let outcome = fx
            .library
            .add_images(vec![png_file("offline.png")])
            .await
            .unwrap();

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.success.len(), 1);
        assert_eq!(outcome.success[0].source, ImageSource::Local);
        assert!(outcome.success[0].cloud_path.is_none());
        assert_eq!(fx.library.store().media_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn existing_object_is_adopted_not_clobbered() {
        let fx = default_library();
        fx.objects
            .stored
            .lock()
            .unwrap()
            .insert("library/photo.jpg".to_string(), vec![9, 9, 9]);

        let outcome = fx
            .library
            .add_images(vec![png_file("photo.png")])
            .await
            .unwrap();

        assert_eq!(outcome.success.len(), 1);
        let record = &outcome.success[0];
        assert_eq!(record.source, ImageSource::Synced);
        assert_eq!(record.cloud_path.as_deref(), Some("library/photo.jpg"));
        // The original payload was not overwritten.
        assert_eq!(
            fx.objects.stored.lock().unwrap()["library/photo.jpg"],
            vec![9, 9, 9]
        );
    }

    #[tokio::test]
    async fn compressed_ceiling_fails_the_file_not_the_batch() {
        let mut config = crate::config::Config::default();
        config.upload.max_compressed_bytes = 16;
        let fx = library(config);
        let events = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        fx.library
            .set_progress_listener(std::sync::Arc::new(move |p| {
                sink.lock().unwrap().push(p);
            }));

        let outcome = fx
            .library
            .add_images(vec![png_file("dense.png")])
            .await
            .unwrap();

        assert!(outcome.success.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("ceiling"));
        assert_eq!(fx.library.store().media_count().await.unwrap(), 0);

        // The reporter stays usable after the compression attempts, so
        // the terminal failure event is still delivered.
        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.stage, UploadStage::Failed);
        assert!(last.completed);
        assert!(last.error.as_deref().unwrap().contains("ceiling"));
    }

    #[test]
    fn jpeg_names_replace_the_extension() {
        assert_eq!(jpeg_name("photo.png"), "photo.jpg");
        assert_eq!(jpeg_name("archive.tar.png"), "archive.tar.jpg");
        assert_eq!(jpeg_name("noext"), "noext.jpg");
    }
}
