//! Synchronization engine.
//!
//! [`MediaLibrary`] owns the merged in-memory view of local and
//! cloud-known media and orchestrates the load sequence: ephemeral
//! storage probe, cloud discovery (with its own retry loop), local
//! discovery (degrading to cloud-only on failure), merge with local
//! precedence, and the one-shot auto-restore of an empty cache from
//! published state. The whole load retries up to three times before
//! falling back to a cloud-only view rather than presenting nothing.

pub mod assign;
pub mod quota;
pub mod restore;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::cloud::{ConfigApi, ObjectStore};
use crate::compress::Compressor;
use crate::config::Config;
use crate::error::MediaError;
use crate::records::{merge_records, ImageSource, MediaRecord, UploadProgress};
use crate::retry::{retry, RetryPolicy};
use crate::status::{StatusEntry, StatusLog};
use crate::store::LocalStore;

pub use assign::AssignOutcome;
pub use quota::{CleanupPolicy, CloudStorageInfo, StorageInfo};
pub use upload::{NewImageFile, UploadOutcome};

const CLOUD_DISCOVERY_ATTEMPTS: u32 = 3;
const CLOUD_DISCOVERY_STEP: Duration = Duration::from_millis(500);
const LOAD_RETRY: RetryPolicy = RetryPolicy::linear(3, Duration::from_secs(1));

pub type ProgressListener = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryPhase {
    Uninitialized,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReloadOptions {
    /// A forced reload re-arms the auto-restore guard.
    pub force: bool,
}

/// Partial update for a media record. `upload_date` is immutable and
/// `source` changes are checked against the allowed promotions.
#[derive(Debug, Clone, Default)]
pub struct MediaUpdate {
    pub name: Option<String>,
    pub cloud_path: Option<String>,
    pub public_url: Option<String>,
    pub source: Option<ImageSource>,
}

struct LibraryState {
    phase: LibraryPhase,
    images: Vec<MediaRecord>,
    auto_restore_done: bool,
    ephemeral: bool,
}

pub struct MediaLibrary {
    store: Arc<LocalStore>,
    objects: Arc<dyn ObjectStore>,
    api: Arc<dyn ConfigApi>,
    compressor: Arc<dyn Compressor>,
    config: Config,
    state: Mutex<LibraryState>,
    status: StatusLog,
    progress: std::sync::Mutex<Option<ProgressListener>>,
}

/// Run blocking client work (ureq, image encoding) off the async
/// executor threads.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, MediaError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MediaError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MediaError::Task(e.to_string()))?
}

impl MediaLibrary {
    pub fn new(
        store: Arc<LocalStore>,
        objects: Arc<dyn ObjectStore>,
        api: Arc<dyn ConfigApi>,
        compressor: Arc<dyn Compressor>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            objects,
            api,
            compressor,
            config,
            state: Mutex::new(LibraryState {
                phase: LibraryPhase::Uninitialized,
                images: Vec::new(),
                auto_restore_done: false,
                ephemeral: false,
            }),
            status: StatusLog::new(),
            progress: std::sync::Mutex::new(None),
        })
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub(crate) fn objects(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.objects)
    }

    pub(crate) fn api(&self) -> Arc<dyn ConfigApi> {
        Arc::clone(&self.api)
    }

    pub(crate) fn compressor(&self) -> Arc<dyn Compressor> {
        Arc::clone(&self.compressor)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn status(&self) -> &StatusLog {
        &self.status
    }

    /// Read-only diagnostics for the operator, most recent last.
    pub fn status_log(&self) -> Vec<StatusEntry> {
        self.status.snapshot()
    }

    pub fn set_progress_listener(&self, listener: ProgressListener) {
        if let Ok(mut slot) = self.progress.lock() {
            *slot = Some(listener);
        }
    }

    pub(crate) fn progress_listener(&self) -> Option<ProgressListener> {
        self.progress.lock().ok().and_then(|slot| slot.clone())
    }

    pub async fn phase(&self) -> LibraryPhase {
        self.state.lock().await.phase
    }

    // ========================================================================
    // Load sequence
    // ========================================================================

    /// Initial or repeated load: local scan + cloud scan + merge, with
    /// the one-shot auto-restore when an empty cache meets a non-empty
    /// cloud. Degrades to a cloud-only view instead of failing.
    pub async fn load(&self) -> Result<(), MediaError> {
        let result = retry("library load", LOAD_RETRY, |_| true, || self.load_once()).await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(error = %err, "library load exhausted retries, degrading to cloud-only view");
                self.status
                    .error("library load failed, showing cloud view only", Some(err.to_string()));
                let cloud = self.discover_cloud().await;
                let mut state = self.state.lock().await;
                state.images = merge_records(Vec::new(), cloud);
                state.phase = LibraryPhase::Ready;
                Ok(())
            }
        }
    }

    pub async fn reload_library(&self, options: ReloadOptions) -> Result<(), MediaError> {
        if options.force {
            self.state.lock().await.auto_restore_done = false;
        }
        self.load().await
    }

    /// Re-run cloud discovery and merge only; the local set is reused.
    /// Returns the number of cloud-known records.
    pub async fn reload_cloud_images(&self) -> Result<usize, MediaError> {
        let cloud = self.discover_cloud().await;
        let count = cloud.len();
        let local = self.store.all_media().await.unwrap_or_default();
        let mut state = self.state.lock().await;
        state.images = merge_records(local, cloud);
        Ok(count)
    }

    async fn load_once(&self) -> Result<(), MediaError> {
        {
            let mut state = self.state.lock().await;
            state.phase = LibraryPhase::Loading;
            state.ephemeral = self.store.is_ephemeral();
            if state.ephemeral {
                tracing::warn!("local store path looks ephemeral; auto-restore is disabled");
            }
        }

        self.store.open().await?;
        let legacy_errors = self.store.legacy_migration_errors();
        if !legacy_errors.is_empty() {
            self.status.warning(
                "legacy assignment migration had failures",
                Some(legacy_errors.join("; ")),
            );
        }

        let cloud = self.discover_cloud().await;

        let local = match self.store.all_media().await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "local discovery failed, degrading to cloud-only view");
                self.status.warning(
                    "local discovery failed, showing cloud images only",
                    Some(err.to_string()),
                );
                Vec::new()
            }
        };

        let local_empty = local.is_empty();
        let cloud_nonempty = !cloud.is_empty();
        let merged = merge_records(local, cloud.clone());

        let fire_restore = {
            let mut state = self.state.lock().await;
            let fire = !state.auto_restore_done
                && local_empty
                && cloud_nonempty
                && !state.ephemeral;
            // One-shot per session, armed again only by a forced reload.
            state.auto_restore_done = true;
            fire
        };

        if fire_restore {
            self.status
                .info("local cache is empty but cloud has content, restoring published slides");
            match self.restore_from_published_slides().await {
                Ok(count) => {
                    self.status
                        .info(format!("auto-restore recovered {count} images"));
                }
                Err(err) => {
                    self.status
                        .warning("auto-restore failed", Some(err.to_string()));
                }
            }
            let local = self.store.all_media().await.unwrap_or_default();
            let mut state = self.state.lock().await;
            state.images = merge_records(local, cloud);
            state.phase = LibraryPhase::Ready;
            return Ok(());
        }

        let mut state = self.state.lock().await;
        state.images = merged;
        state.phase = LibraryPhase::Ready;
        Ok(())
    }

    /// Build the cloud-known set from the published catalog and the raw
    /// object listing. Retried when the result is empty AND a partial
    /// error occurred, to tell "genuinely empty" from a transient
    /// failure. All errors are concatenated into one diagnostic.
    pub(crate) async fn discover_cloud(&self) -> Vec<MediaRecord> {
        let mut attempt = 1u32;
        loop {
            let mut errors = Vec::new();
            let mut records: Vec<MediaRecord> = Vec::new();

            let api = self.api();
            match run_blocking(move || api.published_media()).await {
                Ok(catalog) => records = merge_records(records, catalog),
                Err(err) => errors.push(format!("published catalog: {err}")),
            }

            let probe = self.objects();
            let available = run_blocking(move || Ok(probe.is_available()))
                .await
                .unwrap_or(false);
            if available {
                let objects = self.objects();
                let prefix = self.config.cloud.prefix.clone();
                match run_blocking(move || objects.list(&prefix)).await {
                    Ok(listed) => records = merge_records(records, listed),
                    Err(err) => errors.push(format!("object listing: {err}")),
                }
            } else {
                errors.push(
                    MediaError::CloudUnavailable("availability probe failed".into()).to_string(),
                );
            }

            if records.is_empty() && !errors.is_empty() && attempt < CLOUD_DISCOVERY_ATTEMPTS {
                tracing::debug!(attempt, "cloud discovery came back empty with errors, retrying");
                tokio::time::sleep(CLOUD_DISCOVERY_STEP * attempt).await;
                attempt += 1;
                continue;
            }

            if !errors.is_empty() {
                let diagnostic = errors.join("; ");
                if records.is_empty() {
                    self.status.error("cloud discovery failed", Some(diagnostic));
                } else {
                    self.status
                        .warning("cloud discovery partially failed", Some(diagnostic));
                }
            }
            return records;
        }
    }

    /// Recompute the merged view from the store, keeping the
    /// cloud-discovered entries already known to the session.
    pub(crate) async fn refresh_view(&self) -> Result<(), MediaError> {
        let local = self.store.all_media().await?;
        let mut state = self.state.lock().await;
        let cloud: Vec<MediaRecord> = state
            .images
            .iter()
            .filter(|r| r.source == ImageSource::Cloud)
            .cloned()
            .collect();
        state.images = merge_records(local, cloud);
        Ok(())
    }

    // ========================================================================
    // Library operations
    // ========================================================================

    /// The merged view, current as of the last load or mutation.
    pub async fn list_images(&self) -> Vec<MediaRecord> {
        self.state.lock().await.images.clone()
    }

    /// Remove an image everywhere it is known: best-effort cloud delete
    /// first, then the local row. A failed cloud delete never blocks
    /// the local removal.
    pub async fn remove_image(&self, id: &str) -> Result<bool, MediaError> {
        let record = match self.store.get_media(id).await? {
            Some(record) => record,
            None => {
                // Cloud-only entries exist in the view, not the store.
                let mut state = self.state.lock().await;
                let Some(pos) = state.images.iter().position(|r| r.id == id) else {
                    return Ok(false);
                };
                let record = state.images.remove(pos);
                drop(state);
                if let Some(path) = record.cloud_path {
                    self.delete_cloud_object(&path).await;
                }
                self.status.info(format!("removed cloud image {}", record.name));
                return Ok(true);
            }
        };

        if let Some(path) = record.cloud_path.clone() {
            if !self.delete_cloud_object(&path).await {
                self.status.warning(
                    format!("cloud delete failed for {}, removing local copy anyway", record.name),
                    None,
                );
            }
        }

        let removed = self.store.delete_media(id).await?;
        {
            let mut state = self.state.lock().await;
            state.images.retain(|r| r.id != id);
        }
        if removed {
            self.status.info(format!("removed image {}", record.name));
        }
        Ok(removed)
    }

    pub(crate) async fn delete_cloud_object(&self, path: &str) -> bool {
        let objects = self.objects();
        let path = path.to_string();
        run_blocking(move || Ok(objects.delete(&path)))
            .await
            .unwrap_or(false)
    }

    pub async fn update_image(
        &self,
        id: &str,
        update: MediaUpdate,
    ) -> Result<MediaRecord, MediaError> {
        let mut record = self
            .store
            .get_media(id)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("image {id}")))?;

        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(cloud_path) = update.cloud_path {
            record.cloud_path = Some(cloud_path);
        }
        if let Some(public_url) = update.public_url {
            record.public_url = Some(public_url);
        }
        if let Some(source) = update.source {
            if !record.source.can_transition_to(source) {
                return Err(MediaError::validation(
                    record.name,
                    format!(
                        "source may not move {} -> {} without a reset",
                        record.source.as_str(),
                        source.as_str()
                    ),
                ));
            }
            record.source = source;
        }

        self.store.put_media(&record).await?;
        self.refresh_view().await?;
        Ok(record)
    }

    /// Drop every local record and assignment.
    pub async fn clear_all(&self) -> Result<(), MediaError> {
        self.store.clear_media().await?;
        self.store.clear_assignments().await?;
        self.state.lock().await.images.clear();
        self.status.info("library cleared");
        Ok(())
    }

    /// Fetch a cloud record's payload and adopt it into the local cache,
    /// promoting it to `Synced`.
    pub async fn cache_image_locally(
        &self,
        record: &MediaRecord,
    ) -> Result<MediaRecord, MediaError> {
        let mut cached = record.clone();
        if cached.content.is_none() {
            let path = cached.cloud_path.clone().ok_or_else(|| {
                MediaError::validation(record.name.clone(), "no cloud reference to fetch")
            })?;
            let objects = self.objects();
            let bytes = run_blocking(move || objects.download(&path)).await?;
            if cached.byte_size.is_none() {
                cached.byte_size = Some(bytes.len() as u64);
            }
            cached.content = Some(bytes);
        }
        if cached.source == ImageSource::Cloud {
            cached.source = ImageSource::Synced;
        }

        self.store.put_media(&cached).await?;
        self.refresh_view().await?;
        self.status.info(format!("cached {} locally", cached.name));
        Ok(cached)
    }

    /// Wipe the on-device cache. Records with a cloud reference stay in
    /// the view as `Cloud` entries; purely local records are gone.
    pub async fn reset_local_cache(&self) -> Result<(), MediaError> {
        self.store.clear_media().await?;
        self.store.clear_assignments().await?;

        let mut state = self.state.lock().await;
        let kept: Vec<MediaRecord> = state
            .images
            .drain(..)
            .filter(|r| r.cloud_path.is_some() || r.public_url.is_some())
            .map(|mut r| {
                r.source = ImageSource::Cloud;
                r.content = None;
                r
            })
            .collect();
        state.images = kept;
        drop(state);
        self.status.info("local cache reset; cloud images remain available");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cloud::StoredObject;
    use crate::compress::JpegCompressor;
    use crate::records::{PublishSlidePayload, PublishedSlideRecord};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    pub struct MockObjectStore {
        pub stored: Mutex<HashMap<String, Vec<u8>>>,
        pub listed: Mutex<Vec<MediaRecord>>,
        pub available: AtomicBool,
        pub fail_delete: AtomicBool,
        pub fail_list: AtomicBool,
        pub deletes: Mutex<Vec<String>>,
        pub list_calls: AtomicUsize,
    }

    impl MockObjectStore {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                stored: Mutex::new(HashMap::new()),
                listed: Mutex::new(Vec::new()),
                available: AtomicBool::new(true),
                fail_delete: AtomicBool::new(false),
                fail_list: AtomicBool::new(false),
                deletes: Mutex::new(Vec::new()),
                list_calls: AtomicUsize::new(0),
            })
        }
    }

    impl ObjectStore for MockObjectStore {
        fn upload(
            &self,
            bytes: &[u8],
            name: &str,
            _content_type: &str,
            upsert: bool,
        ) -> Result<StoredObject, MediaError> {
            let path = format!("library/{name}");
            let mut stored = self.stored.lock().unwrap();
            if stored.contains_key(&path) && !upsert {
                return Err(MediaError::AlreadyExists(path));
            }
            stored.insert(path.clone(), bytes.to_vec());
            Ok(StoredObject {
                public_url: self.public_url(&path),
                path,
            })
        }

        fn download(&self, path: &str) -> Result<Vec<u8>, MediaError> {
            self.stored
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| MediaError::network("object download", format!("missing {path}")))
        }

        fn list(&self, _prefix: &str) -> Result<Vec<MediaRecord>, MediaError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(MediaError::network("object listing", "boom"));
            }
            Ok(self.listed.lock().unwrap().clone())
        }

        fn delete(&self, path: &str) -> bool {
            self.deletes.lock().unwrap().push(path.to_string());
            if self.fail_delete.load(Ordering::SeqCst) {
                return false;
            }
            self.stored.lock().unwrap().remove(path);
            true
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://cdn.test/{path}")
        }

        fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }
    }

    pub struct MockConfigApi {
        pub catalog: Mutex<Vec<MediaRecord>>,
        pub slides: Mutex<Vec<PublishedSlideRecord>>,
        pub slide_reads: AtomicUsize,
        pub catalog_reads: AtomicUsize,
        pub published: Mutex<Vec<PublishSlidePayload>>,
        pub fail_publish: AtomicBool,
    }

    impl MockConfigApi {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                catalog: Mutex::new(Vec::new()),
                slides: Mutex::new(Vec::new()),
                slide_reads: AtomicUsize::new(0),
                catalog_reads: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
                fail_publish: AtomicBool::new(false),
            })
        }
    }

    impl ConfigApi for MockConfigApi {
        fn published_media(&self) -> Result<Vec<MediaRecord>, MediaError> {
            self.catalog_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.catalog.lock().unwrap().clone())
        }

        fn published_slides(&self) -> Result<Vec<PublishedSlideRecord>, MediaError> {
            self.slide_reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.slides.lock().unwrap().clone())
        }

        fn publish_slide(&self, payload: &PublishSlidePayload) -> Result<(), MediaError> {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(MediaError::network("publish slide", "denied"));
            }
            self.published.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    pub fn published_slide(slide_id: &str, image_id: &str) -> PublishedSlideRecord {
        PublishedSlideRecord {
            slide_id: slide_id.to_string(),
            image_id: image_id.to_string(),
            image_name: Some(format!("{image_id}.jpg")),
            image_url: format!("https://cdn.test/library/{image_id}.jpg"),
            cloud_path: Some(format!("library/{image_id}.jpg")),
            width: Some(640),
            height: Some(480),
            byte_size: Some(1024),
            image_alt: Some(format!("{slide_id} hero")),
            updated_at: None,
            status: "active".to_string(),
        }
    }

    pub fn cloud_record(id: &str) -> MediaRecord {
        MediaRecord {
            id: id.to_string(),
            name: format!("{id}.jpg"),
            content: None,
            upload_date: chrono::Utc::now().to_rfc3339(),
            dimensions: None,
            byte_size: Some(2048),
            cloud_path: Some(format!("library/{id}.jpg")),
            public_url: Some(format!("https://cdn.test/library/{id}.jpg")),
            source: ImageSource::Cloud,
        }
    }

    pub struct Fixture {
        pub library: Arc<MediaLibrary>,
        pub objects: Arc<MockObjectStore>,
        pub api: Arc<MockConfigApi>,
        pub dir: TempDir,
    }

    pub fn library(config: Config) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::assume_durable(dir.path().join("media.db")));
        build(store, config, dir)
    }

    pub fn default_library() -> Fixture {
        library(Config::default())
    }

    /// Fixture whose store path keeps the temp-dir heuristic, so the
    /// library sees it as ephemeral.
    pub fn ephemeral_library() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(dir.path().join("media.db")));
        build(store, Config::default(), dir)
    }

    fn build(store: Arc<LocalStore>, config: Config, dir: TempDir) -> Fixture {
        let objects = MockObjectStore::new();
        let api = MockConfigApi::new();
        let compressor = Arc::new(JpegCompressor::new(
            config.upload.max_dimension,
            config.upload.jpeg_quality,
        ));
        let library = MediaLibrary::new(
            store,
            objects.clone() as Arc<dyn ObjectStore>,
            api.clone() as Arc<dyn ConfigApi>,
            compressor,
            config,
        );
        Fixture {
            library,
            objects,
            api,
            dir,
        }
    }
}
