//! deckmedia - local/cloud media synchronization for slide decks.
//!
//! The local SQLite cache is the fast path and the cloud is the
//! durable one; the engine merges the two views with local precedence
//! and keeps them converging through uploads, restores and cleanup.

pub mod cloud;
pub mod compress;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod records;
pub mod retry;
pub mod status;
pub mod store;

pub use cloud::{BucketClient, ConfigApi, ObjectStore, RestConfigClient, StoredObject};
pub use compress::{CompressedImage, Compressor, JpegCompressor};
pub use config::Config;
pub use engine::{
    AssignOutcome, CleanupPolicy, CloudStorageInfo, LibraryPhase, MediaLibrary, MediaUpdate,
    NewImageFile, ProgressListener, ReloadOptions, StorageInfo, UploadOutcome,
};
pub use error::MediaError;
pub use records::{
    merge_records, ImageSource, MediaRecord, PublishedSlideRecord, SlideAssignment, UploadProgress,
    UploadStage,
};
pub use status::{StatusEntry, StatusLevel, StatusLog};
pub use store::LocalStore;
