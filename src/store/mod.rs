//! Local persistent store: durable CRUD over the media and
//! slide-assignment tables, surviving restarts.
//!
//! The store is an explicitly owned resource, constructed once and
//! passed (via `Arc`) to the sync engine. The live connection is a
//! memoized field behind an async mutex: parallel callers that find it
//! missing share one reopen instead of racing separate attempts. Every
//! operation runs under the shared retry policy; a connection-level
//! failure discards the handle so the next attempt reopens it.

pub mod assignments;
pub mod legacy;
pub mod media;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::{classify_db_error, MediaError};
use crate::records::{MediaRecord, SlideAssignment};
use crate::retry::{retry, RetryPolicy};
use schema::{MIGRATIONS, SCHEMA};

/// 3 attempts, exponential backoff with jitter.
const STORE_RETRY: RetryPolicy = RetryPolicy::exponential(3, Duration::from_millis(100), 100);

pub struct LocalStore {
    path: PathBuf,
    assume_durable: bool,
    conn: Mutex<Option<Connection>>,
    legacy_done: AtomicBool,
    legacy_errors: std::sync::Mutex<Vec<String>>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            assume_durable: false,
            conn: Mutex::new(None),
            legacy_done: AtomicBool::new(false),
            legacy_errors: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Like [`LocalStore::new`] but skips the ephemeral-path heuristic.
    /// Useful when the caller knows the directory is durable (for
    /// example a mounted data volume under the OS temp root).
    pub fn assume_durable(path: impl Into<PathBuf>) -> Self {
        Self {
            assume_durable: true,
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file is unlikely to survive across sessions.
    /// A flag only; it never blocks any operation.
    pub fn is_ephemeral(&self) -> bool {
        if self.assume_durable {
            return false;
        }
        self.path.starts_with(std::env::temp_dir())
    }

    /// Idempotent open: ensures the schema exists and the legacy
    /// key-value migration has run.
    pub async fn open(&self) -> Result<(), MediaError> {
        self.with_conn("open local store", |_| Ok(())).await
    }

    /// Errors collected by the legacy migration, if any. Cleared state
    /// is not an error; partial failures never abort an open.
    pub fn legacy_migration_errors(&self) -> Vec<String> {
        match self.legacy_errors.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn open_connection(&self) -> Result<Connection, MediaError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MediaError::ConnectionClosed(format!("create data dir: {e}")))?;
        }
        let conn = Connection::open(&self.path).map_err(classify_db_error)?;
        conn.execute_batch(SCHEMA).map_err(classify_db_error)?;
        for migration in MIGRATIONS {
            // Additive-only; rerunning an applied migration errors harmlessly.
            let _ = conn.execute(migration, []);
        }
        if !self.legacy_done.swap(true, Ordering::SeqCst) {
            let errors = legacy::migrate_legacy_assignments(&conn);
            if !errors.is_empty() {
                tracing::warn!(count = errors.len(), "legacy assignment migration had failures");
                if let Ok(mut slot) = self.legacy_errors.lock() {
                    *slot = errors;
                }
            }
        }
        Ok(conn)
    }

    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, MediaError>
    where
        F: Fn(&Connection) -> rusqlite::Result<T>,
    {
        retry(operation, STORE_RETRY, MediaError::is_transient, || async {
            let mut guard = self.conn.lock().await;
            if guard.is_none() {
                *guard = Some(self.open_connection()?);
            }
            let conn = guard
                .as_ref()
                .ok_or_else(|| MediaError::ConnectionClosed("no live connection".into()))?;
            match f(conn) {
                Ok(value) => Ok(value),
                Err(err) => {
                    let classified = classify_db_error(err);
                    if matches!(classified, MediaError::ConnectionClosed(_)) {
                        *guard = None;
                    }
                    Err(classified)
                }
            }
        })
        .await
    }

    // ========================================================================
    // Media records
    // ========================================================================

    pub async fn get_media(&self, id: &str) -> Result<Option<MediaRecord>, MediaError> {
        let id = id.to_string();
        self.with_conn("read media record", move |conn| media::get(conn, &id))
            .await
    }

    pub async fn all_media(&self) -> Result<Vec<MediaRecord>, MediaError> {
        self.with_conn("list media records", media::get_all).await
    }

    pub async fn put_media(&self, record: &MediaRecord) -> Result<(), MediaError> {
        let record = record.clone();
        self.with_conn("write media record", move |conn| media::put(conn, &record))
            .await
    }

    pub async fn put_media_if_absent(&self, record: &MediaRecord) -> Result<bool, MediaError> {
        let record = record.clone();
        self.with_conn("insert media record", move |conn| {
            media::put_if_absent(conn, &record)
        })
        .await
    }

    pub async fn delete_media(&self, id: &str) -> Result<bool, MediaError> {
        let id = id.to_string();
        self.with_conn("delete media record", move |conn| media::delete(conn, &id))
            .await
    }

    pub async fn clear_media(&self) -> Result<(), MediaError> {
        self.with_conn("clear media records", media::clear).await
    }

    pub async fn media_total_bytes(&self) -> Result<u64, MediaError> {
        self.with_conn("sum media sizes", media::total_bytes).await
    }

    pub async fn media_count(&self) -> Result<u64, MediaError> {
        self.with_conn("count media records", media::count).await
    }

    // ========================================================================
    // Slide assignments
    // ========================================================================

    pub async fn get_assignment(
        &self,
        slide_id: &str,
    ) -> Result<Option<SlideAssignment>, MediaError> {
        let slide_id = slide_id.to_string();
        self.with_conn("read slide assignment", move |conn| {
            assignments::get(conn, &slide_id)
        })
        .await
    }

    pub async fn all_assignments(&self) -> Result<Vec<SlideAssignment>, MediaError> {
        self.with_conn("list slide assignments", assignments::get_all)
            .await
    }

    pub async fn put_assignment(&self, assignment: &SlideAssignment) -> Result<(), MediaError> {
        let assignment = assignment.clone();
        self.with_conn("write slide assignment", move |conn| {
            assignments::put(conn, &assignment)
        })
        .await
    }

    pub async fn delete_assignment(&self, slide_id: &str) -> Result<bool, MediaError> {
        let slide_id = slide_id.to_string();
        self.with_conn("delete slide assignment", move |conn| {
            assignments::delete(conn, &slide_id)
        })
        .await
    }

    pub async fn clear_assignments(&self) -> Result<(), MediaError> {
        self.with_conn("clear slide assignments", assignments::clear)
            .await
    }

    pub async fn orphaned_assignments(&self) -> Result<Vec<String>, MediaError> {
        self.with_conn("find orphaned assignments", assignments::orphaned)
            .await
    }

    pub async fn unused_media(&self) -> Result<Vec<String>, MediaError> {
        self.with_conn("find unused media", assignments::unused_media)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Dimensions, ImageSource};
    use tempfile::TempDir;

    fn record(id: &str) -> MediaRecord {
        let mut r = MediaRecord::new_local(id.to_string(), format!("{id}.jpg"));
        r.content = Some(vec![0xFF, 0xD8, 0xFF]);
        r.byte_size = Some(3);
        r.dimensions = Some(Dimensions {
            width: 4,
            height: 3,
        });
        r
    }

    fn store_in(dir: &TempDir) -> LocalStore {
        LocalStore::assume_durable(dir.path().join("media.db"))
    }

    #[tokio::test]
    async fn crud_roundtrip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("media.db");

        let store = LocalStore::assume_durable(&path);
        store.put_media(&record("a")).await.unwrap();
        drop(store);

        let store = LocalStore::assume_durable(&path);
        let loaded = store.get_media("a").await.unwrap().unwrap();
        assert_eq!(loaded.name, "a.jpg");
        assert_eq!(loaded.content.as_deref(), Some(&[0xFF, 0xD8, 0xFF][..]));
        assert_eq!(loaded.source, ImageSource::Local);
    }

    #[tokio::test]
    async fn missing_record_is_none_not_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.get_media("nope").await.unwrap().is_none());
        assert!(!store.delete_media("nope").await.unwrap());
    }

    #[tokio::test]
    async fn put_if_absent_respects_id_and_cloud_path() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut first = record("a");
        first.cloud_path = Some("p1".into());
        assert!(store.put_media_if_absent(&first).await.unwrap());

        // Same id.
        assert!(!store.put_media_if_absent(&record("a")).await.unwrap());

        // Different id, same cloud path.
        let mut shadow = record("b");
        shadow.cloud_path = Some("p1".into());
        assert!(!store.put_media_if_absent(&shadow).await.unwrap());

        assert_eq!(store.media_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cloud_records_never_store_payload() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut r = record("c");
        r.source = ImageSource::Cloud;
        r.cloud_path = Some("library/c.jpg".into());
        store.put_media(&r).await.unwrap();

        let loaded = store.get_media("c").await.unwrap().unwrap();
        assert!(loaded.content.is_none());
        assert_eq!(loaded.source, ImageSource::Cloud);
    }

    #[tokio::test]
    async fn accounting_sums_byte_sizes() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut a = record("a");
        a.byte_size = Some(100);
        let mut b = record("b");
        b.byte_size = Some(250);
        store.put_media(&a).await.unwrap();
        store.put_media(&b).await.unwrap();

        assert_eq!(store.media_total_bytes().await.unwrap(), 350);
        assert_eq!(store.media_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn orphan_and_unused_queries() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.put_media(&record("img-live")).await.unwrap();
        store.put_media(&record("img-unused")).await.unwrap();
        store
            .put_assignment(&SlideAssignment::new(
                "intro".into(),
                "img-live".into(),
                None,
            ))
            .await
            .unwrap();
        store
            .put_assignment(&SlideAssignment::new(
                "closing".into(),
                "img-deleted".into(),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(store.orphaned_assignments().await.unwrap(), vec!["closing"]);
        assert_eq!(store.unused_media().await.unwrap(), vec!["img-unused"]);
    }

    #[tokio::test]
    async fn clear_empties_both_tables() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.put_media(&record("a")).await.unwrap();
        store
            .put_assignment(&SlideAssignment::new("s".into(), "a".into(), None))
            .await
            .unwrap();

        store.clear_media().await.unwrap();
        store.clear_assignments().await.unwrap();
        assert!(store.all_media().await.unwrap().is_empty());
        assert!(store.all_assignments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn temp_paths_flag_as_ephemeral() {
        let dir = TempDir::new().unwrap();
        let probing = LocalStore::new(dir.path().join("media.db"));
        assert!(probing.is_ephemeral());
        assert!(!store_in(&dir).is_ephemeral());
    }
}
