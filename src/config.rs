use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the remote API (storage and configuration endpoints
    /// share it). Leave empty to run cache-only.
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Object key prefix for this library inside the bucket.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_bucket() -> String {
    "slide-media".to_string()
}

fn default_prefix() -> String {
    "library".to_string()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: default_bucket(),
            prefix: default_prefix(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local cache ceiling for quota accounting.
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,

    /// Records older than this are candidates for auto-cleanup.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// Auto-cleanup never shrinks the library below this many records.
    #[serde(default = "default_keep_recent_count")]
    pub keep_recent_count: usize,
}

fn default_max_total_bytes() -> u64 {
    500 * 1024 * 1024 // 500MB
}

fn default_max_age_days() -> u32 {
    180
}

fn default_keep_recent_count() -> usize {
    200
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: default_max_total_bytes(),
            max_age_days: default_max_age_days(),
            keep_recent_count: default_keep_recent_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Hard ceiling on raw input size, checked before any work.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Ceiling on the compressed payload; exceeding it fails the file.
    #[serde(default = "default_max_compressed_bytes")]
    pub max_compressed_bytes: u64,

    /// Longest edge after compression.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Files processed concurrently per chunk.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_max_input_bytes() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_max_compressed_bytes() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_max_dimension() -> u32 {
    1920
}

fn default_jpeg_quality() -> u8 {
    80
}

fn default_concurrency() -> usize {
    3
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            max_compressed_bytes: default_max_compressed_bytes(),
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("deckmedia")
        .join("deckmedia.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cloud: CloudConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deckmedia")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
