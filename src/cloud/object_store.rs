//! Remote object store client.
//!
//! The engine only depends on the [`ObjectStore`] capability; the
//! concrete implementation talks to a bucket-scoped storage REST API
//! (upload/list/delete plus stable public URLs) with ureq.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;

use crate::error::MediaError;
use crate::records::{ImageSource, MediaRecord};

/// Cache directives: image payloads are immutable once uploaded and can
/// be cached for a year; anything else gets a short directive.
const IMAGE_CACHE_CONTROL: &str = "max-age=31536000, immutable";
const DEFAULT_CACHE_CONTROL: &str = "max-age=3600";

/// Placeholder objects some storage backends keep inside "empty" folders.
const FOLDER_PLACEHOLDER: &str = ".emptyFolderPlaceholder";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub path: String,
    pub public_url: String,
}

pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` under a path derived from `name`. Without `upsert`
    /// an existing path is an [`MediaError::AlreadyExists`], never a
    /// silent clobber.
    fn upload(
        &self,
        bytes: &[u8],
        name: &str,
        content_type: &str,
        upsert: bool,
    ) -> Result<StoredObject, MediaError>;

    /// Fetch the payload for a previously stored object.
    fn download(&self, path: &str) -> Result<Vec<u8>, MediaError>;

    /// Cloud-known records under `prefix`, newest first, with `source`
    /// set to `Cloud`. Placeholder entries are excluded.
    fn list(&self, prefix: &str) -> Result<Vec<MediaRecord>, MediaError>;

    /// Best-effort delete: failures are logged and reported as `false`,
    /// never propagated.
    fn delete(&self, path: &str) -> bool;

    fn public_url(&self, path: &str) -> String;

    /// Lightweight capability probe used to short-circuit sync attempts
    /// when the cloud is entirely unreachable.
    fn is_available(&self) -> bool;
}

// Listing response shape of the storage API.
#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    metadata: Option<ObjectMetadata>,
}

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: u32,
    #[serde(rename = "sortBy")]
    sort_by: SortBy,
}

#[derive(Debug, Serialize)]
struct SortBy {
    column: &'static str,
    order: &'static str,
}

pub struct BucketClient {
    endpoint: String,
    bucket: String,
    prefix: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl BucketClient {
    pub fn new(endpoint: &str, bucket: &str, prefix: &str, api_key: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
            api_key,
            agent,
        }
    }

    fn prefixed(&self, object_name: &str) -> String {
        if self.prefix.is_empty() {
            object_name.to_string()
        } else {
            format!("{}/{}", self.prefix, object_name)
        }
    }

    fn authorize(&self, req: ureq::Request) -> ureq::Request {
        match &self.api_key {
            Some(key) => req
                .set("apikey", key)
                .set("Authorization", &format!("Bearer {key}")),
            None => req,
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.endpoint, self.bucket, path)
    }
}

/// Keep object names URL- and filesystem-safe.
pub fn sanitize_object_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        format!("upload-{}", Utc::now().timestamp_millis())
    } else {
        cleaned
    }
}

impl ObjectStore for BucketClient {
    fn upload(
        &self,
        bytes: &[u8],
        name: &str,
        content_type: &str,
        upsert: bool,
    ) -> Result<StoredObject, MediaError> {
        let path = self.prefixed(&sanitize_object_name(name));
        let cache_control = if content_type.starts_with("image/") {
            IMAGE_CACHE_CONTROL
        } else {
            DEFAULT_CACHE_CONTROL
        };

        let req = self
            .authorize(self.agent.post(&self.object_url(&path)))
            .set("Content-Type", content_type)
            .set("Cache-Control", cache_control)
            .set("x-upsert", if upsert { "true" } else { "false" });

        match req.send_bytes(bytes) {
            Ok(_) => Ok(StoredObject {
                public_url: self.public_url(&path),
                path,
            }),
            Err(ureq::Error::Status(409, _)) => Err(MediaError::AlreadyExists(path)),
            Err(e) => Err(MediaError::network("object upload", e.to_string())),
        }
    }

    fn download(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        let response = self
            .authorize(self.agent.get(&self.object_url(path)))
            .call()
            .map_err(|e| MediaError::network("object download", e.to_string()))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| MediaError::network("object download", e.to_string()))?;
        Ok(bytes)
    }

    fn list(&self, prefix: &str) -> Result<Vec<MediaRecord>, MediaError> {
        let url = format!(
            "{}/storage/v1/object/list/{}",
            self.endpoint, self.bucket
        );
        let request = ListRequest {
            prefix,
            limit: 1000,
            sort_by: SortBy {
                column: "created_at",
                order: "desc",
            },
        };

        let response = self
            .authorize(self.agent.post(&url))
            .send_json(&request)
            .map_err(|e| MediaError::network("object listing", e.to_string()))?;
        let entries: Vec<ObjectEntry> = response
            .into_json()
            .map_err(|e| MediaError::network("object listing", e.to_string()))?;

        let records = entries
            .into_iter()
            .filter(|e| !e.name.is_empty() && e.name != FOLDER_PLACEHOLDER && !e.name.starts_with('.'))
            .map(|entry| {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{prefix}/{}", entry.name)
                };
                let id = entry.id.unwrap_or_else(|| entry.name.clone());
                MediaRecord {
                    id,
                    name: entry.name,
                    content: None,
                    upload_date: entry
                        .created_at
                        .unwrap_or_else(|| Utc::now().to_rfc3339()),
                    dimensions: None,
                    byte_size: entry.metadata.and_then(|m| m.size),
                    public_url: Some(self.public_url(&path)),
                    cloud_path: Some(path),
                    source: ImageSource::Cloud,
                }
            })
            .collect();
        Ok(records)
    }

    fn delete(&self, path: &str) -> bool {
        let result = self
            .authorize(self.agent.delete(&self.object_url(path)))
            .call();
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(path, error = %e, "cloud delete failed");
                false
            }
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.endpoint, self.bucket, path
        )
    }

    fn is_available(&self) -> bool {
        if self.endpoint.is_empty() {
            return false;
        }
        let url = format!("{}/storage/v1/bucket/{}", self.endpoint, self.bucket);
        match self.authorize(self.agent.get(&url)).call() {
            Ok(response) => response.status() == 200,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_object_names() {
        assert_eq!(sanitize_object_name("Team Photo (1).JPG"), "Team_Photo__1_.JPG");
        assert_eq!(sanitize_object_name("ok-name_1.png"), "ok-name_1.png");
        assert!(sanitize_object_name("").starts_with("upload-"));
    }

    #[test]
    fn public_urls_are_stable() {
        let client = BucketClient::new("https://api.example.com/", "slide-media", "library", None);
        assert_eq!(
            client.public_url("library/a.jpg"),
            "https://api.example.com/storage/v1/object/public/slide-media/library/a.jpg"
        );
        assert_eq!(client.prefixed("a.jpg"), "library/a.jpg");
    }

    #[test]
    fn unconfigured_endpoint_is_unavailable() {
        let client = BucketClient::new("", "slide-media", "library", None);
        assert!(!client.is_available());
    }
}
