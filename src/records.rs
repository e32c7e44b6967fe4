//! Core data model: media records, slide assignments, published rows
//! and the ephemeral upload-progress type.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a media record currently lives.
///
/// `Local` exists only on-device, `Cloud` was discovered remotely and is
/// not cached on-device, `Synced` is present on both sides with a
/// resolvable public URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Local,
    Cloud,
    Synced,
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSource::Local => "local",
            ImageSource::Cloud => "cloud",
            ImageSource::Synced => "synced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(ImageSource::Local),
            "cloud" => Some(ImageSource::Cloud),
            "synced" => Some(ImageSource::Synced),
            _ => None,
        }
    }

    /// `Local -> Synced` and `Cloud -> Synced` are the only permitted
    /// promotions; everything else requires an explicit reset.
    pub fn can_transition_to(&self, next: ImageSource) -> bool {
        *self == next || next == ImageSource::Synced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// A managed image asset with a lifecycle across local/cloud presence.
#[derive(Debug, Clone)]
pub struct MediaRecord {
    /// Opaque identifier, stable across local and cloud presence.
    pub id: String,
    /// Display name; the only freely mutable field.
    pub name: String,
    /// Encoded payload. Only ever present for on-device records; a
    /// cloud-sourced record carries a reference URL instead.
    pub content: Option<Vec<u8>>,
    /// ISO-8601 timestamp, immutable once set.
    pub upload_date: String,
    pub dimensions: Option<Dimensions>,
    /// Encoded payload size, used for quota accounting.
    pub byte_size: Option<u64>,
    /// Reference into the remote object store, set once an upload succeeds.
    pub cloud_path: Option<String>,
    /// Stable remote URL derived from `cloud_path`.
    pub public_url: Option<String>,
    pub source: ImageSource,
}

impl MediaRecord {
    pub fn new_local(id: String, name: String) -> Self {
        Self {
            id,
            name,
            content: None,
            upload_date: Utc::now().to_rfc3339(),
            dimensions: None,
            byte_size: None,
            cloud_path: None,
            public_url: None,
            source: ImageSource::Local,
        }
    }

    /// Two records sharing an `id` or a non-empty `cloud_path` are the
    /// same logical asset.
    pub fn is_same_asset(&self, other: &MediaRecord) -> bool {
        if self.id == other.id {
            return true;
        }
        match (&self.cloud_path, &other.cloud_path) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        }
    }

    /// Attach the remote reference after a successful upload or cache
    /// write. Legal from `Local` and `Cloud` only.
    pub fn promote_to_synced(&mut self, cloud_path: String, public_url: String) {
        self.cloud_path = Some(cloud_path);
        self.public_url = Some(public_url);
        self.source = ImageSource::Synced;
    }
}

/// Merge the local set with a cloud-discovered set. Local records take
/// precedence; non-duplicate cloud records are appended with `source`
/// forced to `Cloud`.
pub fn merge_records(local: Vec<MediaRecord>, cloud: Vec<MediaRecord>) -> Vec<MediaRecord> {
    let mut merged = local;
    for mut candidate in cloud {
        if merged.iter().any(|known| known.is_same_asset(&candidate)) {
            continue;
        }
        candidate.source = ImageSource::Cloud;
        candidate.content = None;
        merged.push(candidate);
    }
    merged
}

/// Content-addressed record id: hex SHA-256 of the original bytes.
pub fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Association of a named slide to a media record. `image_id` is a soft
/// reference and may dangle after a deletion; the orphan cleanup pass
/// removes such rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideAssignment {
    pub slide_id: String,
    pub image_id: String,
    pub image_alt: Option<String>,
    pub last_updated: String,
}

impl SlideAssignment {
    pub fn new(slide_id: String, image_id: String, image_alt: Option<String>) -> Self {
        Self {
            slide_id,
            image_id,
            image_alt,
            last_updated: Utc::now().to_rfc3339(),
        }
    }
}

/// Server-authoritative snapshot of a published slide assignment plus
/// resolved image metadata, as returned by the configuration API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedSlideRecord {
    pub slide_id: String,
    pub image_id: String,
    #[serde(default)]
    pub image_name: Option<String>,
    pub image_url: String,
    #[serde(default)]
    pub cloud_path: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub byte_size: Option<u64>,
    #[serde(default)]
    pub image_alt: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    pub status: String,
}

impl PublishedSlideRecord {
    /// Reshape into the record the restore path writes locally.
    pub fn to_media_record(&self) -> MediaRecord {
        let dimensions = match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Dimensions { width, height }),
            _ => None,
        };
        MediaRecord {
            id: self.image_id.clone(),
            name: self
                .image_name
                .clone()
                .unwrap_or_else(|| self.slide_id.clone()),
            content: None,
            upload_date: self
                .updated_at
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
            dimensions,
            byte_size: self.byte_size,
            cloud_path: self.cloud_path.clone(),
            public_url: Some(self.image_url.clone()),
            source: ImageSource::Cloud,
        }
    }

    /// The local assignment row this published slide corresponds to.
    pub fn to_assignment(&self) -> SlideAssignment {
        SlideAssignment {
            slide_id: self.slide_id.clone(),
            image_id: self.image_id.clone(),
            image_alt: self.image_alt.clone(),
            last_updated: self
                .updated_at
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
        }
    }
}

/// Fully resolved payload for the privileged publish function. The image
/// is already uploaded and its URL known; the server is never asked to
/// perform the upload.
#[derive(Debug, Clone, Serialize)]
pub struct PublishSlidePayload {
    pub slide_id: String,
    pub image_id: String,
    pub image_name: String,
    pub image_url: String,
    pub cloud_path: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub byte_size: Option<u64>,
    pub image_alt: Option<String>,
}

/// Per-file upload stage. Progress within `Compressing` is scaled into
/// the 30-60 band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Preparing,
    Validating,
    Compressing,
    Processing,
    SyncingToCloud,
    Completed,
    Failed,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Preparing => "preparing",
            UploadStage::Validating => "validating",
            UploadStage::Compressing => "compressing",
            UploadStage::Processing => "processing",
            UploadStage::SyncingToCloud => "syncing to cloud",
            UploadStage::Completed => "completed",
            UploadStage::Failed => "failed",
        }
    }
}

/// Ephemeral per-file progress entry. Never persisted.
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub file_name: String,
    pub file_index: usize,
    pub stage: UploadStage,
    pub progress: u8,
    pub completed: bool,
    pub error: Option<String>,
}
