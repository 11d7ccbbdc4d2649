//! Configuration loading: TOML file plus environment overrides.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::harvest::transform::TransformConfig;
use crate::repository::AsyncSqlitePool;
use crate::storage::{FsStore, ObjectStore, S3Store};

pub const DEFAULT_CONFIG_PATH: &str = "mediakeep.toml";

/// Top-level settings, deserialized from TOML.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub discord_token: String,
    /// Channels harvested by backfill and watched live.
    #[serde(default)]
    pub channel_ids: Vec<String>,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub harvest: HarvestSettings,
    #[serde(default)]
    pub transform: TransformSettings,
}

fn default_database_url() -> String {
    "mediakeep.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageSettings {
    S3 {
        endpoint: String,
        #[serde(default = "default_region")]
        region: String,
        bucket: String,
        access_key: String,
        secret_key: String,
    },
    Filesystem {
        root: String,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::Filesystem {
            root: "media".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestSettings {
    /// History page size, capped at the API maximum of 100.
    #[serde(default = "default_page_size")]
    pub page_size: u8,
    /// Concurrent ingests per page.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_page_size() -> u8 {
    100
}

fn default_chunk_size() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            chunk_size: default_chunk_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformSettings {
    #[serde(default = "default_max_video_seconds")]
    pub max_video_seconds: f64,
    #[serde(default = "default_thumbnail_edge")]
    pub thumbnail_max_width: u32,
    #[serde(default = "default_thumbnail_edge")]
    pub thumbnail_max_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub thumbnail_jpeg_quality: u8,
}

fn default_max_video_seconds() -> f64 {
    60.0
}

fn default_thumbnail_edge() -> u32 {
    300
}

fn default_jpeg_quality() -> u8 {
    80
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            max_video_seconds: default_max_video_seconds(),
            thumbnail_max_width: default_thumbnail_edge(),
            thumbnail_max_height: default_thumbnail_edge(),
            thumbnail_jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file if present, then applies environment
    /// overrides. A missing file yields defaults plus environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        settings.apply_env();
        Ok(settings)
    }

    /// Environment variables win over the file.
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("DISCORD_BOT_TOKEN") {
            self.discord_token = token;
        }
        if let Ok(ids) = std::env::var("DISCORD_CHANNEL_IDS") {
            self.channel_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            bail!("no Discord token configured (set discord_token or DISCORD_BOT_TOKEN)");
        }
        if self.channel_ids.is_empty() {
            bail!("no channels configured (set channel_ids or DISCORD_CHANNEL_IDS)");
        }
        if self.harvest.page_size == 0 || self.harvest.page_size > 100 {
            bail!("harvest.page_size must be between 1 and 100");
        }
        Ok(())
    }

    pub fn watched_channels(&self) -> HashSet<String> {
        self.channel_ids.iter().cloned().collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.harvest.request_timeout_secs)
    }

    pub fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            max_video_seconds: self.transform.max_video_seconds,
            thumbnail_max_width: self.transform.thumbnail_max_width,
            thumbnail_max_height: self.transform.thumbnail_max_height,
            thumbnail_jpeg_quality: self.transform.thumbnail_jpeg_quality,
        }
    }

    pub fn create_pool(&self) -> AsyncSqlitePool {
        AsyncSqlitePool::new(&self.database_url)
    }

    /// Builds the configured object store, bootstrapping the S3 bucket when
    /// needed.
    pub async fn create_store(&self) -> Result<Arc<dyn ObjectStore>> {
        match &self.storage {
            StorageSettings::S3 {
                endpoint,
                region,
                bucket,
                access_key,
                secret_key,
            } => {
                let store = S3Store::new(endpoint, region, access_key, secret_key, bucket);
                store.ensure_bucket().await?;
                Ok(Arc::new(store))
            }
            StorageSettings::Filesystem { root } => {
                tokio::fs::create_dir_all(root).await?;
                Ok(Arc::new(FsStore::new(root)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.harvest.page_size, 100);
        assert_eq!(settings.harvest.chunk_size, 10);
        assert_eq!(settings.transform.max_video_seconds, 60.0);
        assert!(matches!(
            settings.storage,
            StorageSettings::Filesystem { .. }
        ));
    }

    #[test]
    fn test_parse_s3_storage() {
        let raw = r#"
            discord_token = "t"
            channel_ids = ["1", "2"]

            [storage]
            mode = "s3"
            endpoint = "http://localhost:9000"
            bucket = "media"
            access_key = "minio"
            secret_key = "secret"
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert!(matches!(settings.storage, StorageSettings::S3 { .. }));
        assert_eq!(settings.channel_ids.len(), 2);
        settings.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_page_size() {
        let mut settings = Settings {
            discord_token: "t".into(),
            channel_ids: vec!["1".into()],
            ..Default::default()
        };
        settings.validate().unwrap();

        settings.harvest.page_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let raw = r#"
            discord_token = "t"
            not_a_real_key = true
        "#;
        assert!(toml::from_str::<Settings>(raw).is_err());
    }
}
