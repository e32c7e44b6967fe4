//! Remote configuration client.
//!
//! Reads the published-media catalog and the per-slide published
//! assignments (active rows only) over the relational query API, and
//! performs privileged writes through a server-side function. The
//! payload handed to that function is fully resolved — the image is
//! already uploaded and its URL known.

use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

use crate::error::MediaError;
use crate::records::{
    Dimensions, ImageSource, MediaRecord, PublishSlidePayload, PublishedSlideRecord,
};

pub trait ConfigApi: Send + Sync {
    /// The flat published-media catalog.
    fn published_media(&self) -> Result<Vec<MediaRecord>, MediaError>;

    /// Published slide rows, already filtered to `status = active`.
    fn published_slides(&self) -> Result<Vec<PublishedSlideRecord>, MediaError>;

    /// Privileged upsert of one published slide row.
    fn publish_slide(&self, payload: &PublishSlidePayload) -> Result<(), MediaError>;
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    id: String,
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    cloud_path: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    byte_size: Option<u64>,
    #[serde(default)]
    created_at: Option<String>,
}

impl CatalogRow {
    fn into_record(self) -> MediaRecord {
        let dimensions = match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Dimensions { width, height }),
            _ => None,
        };
        MediaRecord {
            id: self.id,
            name: self.name,
            content: None,
            upload_date: self.created_at.unwrap_or_else(|| Utc::now().to_rfc3339()),
            dimensions,
            byte_size: self.byte_size,
            cloud_path: self.cloud_path,
            public_url: self.url,
            source: ImageSource::Cloud,
        }
    }
}

pub struct RestConfigClient {
    endpoint: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl RestConfigClient {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            agent,
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

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.endpoint, table)
    }
}

impl ConfigApi for RestConfigClient {
    fn published_media(&self) -> Result<Vec<MediaRecord>, MediaError> {
        let url = format!("{}?select=*", self.table_url("published_media"));
        let rows: Vec<CatalogRow> = self
            .authorize(self.agent.get(&url))
            .call()
            .map_err(|e| MediaError::network("published media read", e.to_string()))?
            .into_json()
            .map_err(|e| MediaError::network("published media read", e.to_string()))?;
        Ok(rows.into_iter().map(CatalogRow::into_record).collect())
    }

    fn published_slides(&self) -> Result<Vec<PublishedSlideRecord>, MediaError> {
        let url = format!(
            "{}?select=*&status=eq.active",
            self.table_url("published_slides")
        );
        let rows: Vec<PublishedSlideRecord> = self
            .authorize(self.agent.get(&url))
            .call()
            .map_err(|e| MediaError::network("published slides read", e.to_string()))?
            .into_json()
            .map_err(|e| MediaError::network("published slides read", e.to_string()))?;
        Ok(rows)
    }

    fn publish_slide(&self, payload: &PublishSlidePayload) -> Result<(), MediaError> {
        let url = format!("{}/rest/v1/rpc/publish_slide_image", self.endpoint);
        self.authorize(self.agent.post(&url))
            .send_json(payload)
            .map_err(|e| MediaError::network("publish slide", e.to_string()))?;
        Ok(())
    }
}
