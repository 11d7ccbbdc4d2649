//! Single-reference ingestion: fetch, dedup, transform, store, catalog.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::extract::MediaReference;
use super::transform::{self, TransformConfig, TRANSFORM_TIMEOUT};
use crate::models::{
    build_storage_key, compute_content_hash, thumbnail_key, MediaKind, MediaRecord,
};
use crate::repository::{FailedUrlRepository, InsertOutcome, MediaRepository};
use crate::storage::ObjectStore;

/// Downloads raw bytes for a media URL. Abstracted so tests can ingest
/// without a network.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Reqwest-backed fetcher used in production.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create download client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("download failed for {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("download of {url} returned {status}"));
        }

        let bytes = response.bytes().await.context("download body read failed")?;
        Ok(bytes.to_vec())
    }
}

/// How a single reference fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored,
    /// Identical content already cataloged.
    Duplicate,
    /// URL has failed too many times and is no longer attempted.
    SkippedPoison,
    Failed,
}

/// The provenance of a reference, carried alongside it through ingestion.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub channel_id: String,
    pub message_id: String,
    pub text_content: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Orchestrates ingestion of individual media references.
#[derive(Clone)]
pub struct MediaIngestor {
    fetcher: Arc<dyn MediaFetcher>,
    store: Arc<dyn ObjectStore>,
    media: MediaRepository,
    failed: FailedUrlRepository,
    transform: TransformConfig,
}

impl MediaIngestor {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<dyn ObjectStore>,
        media: MediaRepository,
        failed: FailedUrlRepository,
        transform: TransformConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            media,
            failed,
            transform,
        }
    }

    pub fn media_repository(&self) -> &MediaRepository {
        &self.media
    }

    /// Ingest one reference end to end.
    ///
    /// Every failure after the poison gate records an attempt against the
    /// URL so repeat offenders eventually stop being fetched.
    pub async fn ingest(&self, reference: &MediaReference, ctx: &MessageContext) -> IngestOutcome {
        match self.failed.is_poisoned(&reference.url).await {
            Ok(true) => {
                debug!(url = %reference.url, "Skipping poisoned URL");
                return IngestOutcome::SkippedPoison;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(url = %reference.url, error = %e, "Poison check failed");
                return IngestOutcome::Failed;
            }
        }

        let bytes = match self.fetcher.fetch(&reference.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %reference.url, error = %e, "Fetch failed");
                self.note_failure(&reference.url, &format!("fetch: {e}")).await;
                return IngestOutcome::Failed;
            }
        };

        let content_hash = compute_content_hash(&bytes);
        match self.media.exists_by_hash(&content_hash).await {
            Ok(true) => {
                debug!(url = %reference.url, hash = %content_hash, "Duplicate content");
                return IngestOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(url = %reference.url, error = %e, "Dedup lookup failed");
                self.note_failure(&reference.url, &format!("dedup: {e}")).await;
                return IngestOutcome::Failed;
            }
        }

        match self
            .store_and_catalog(reference, ctx, bytes, Some(content_hash))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(url = %reference.url, error = %e, "Ingest failed");
                self.note_failure(&reference.url, &e.to_string()).await;
                IngestOutcome::Failed
            }
        }
    }

    /// Re-fetches a known record's source and refreshes the stored object
    /// and catalog row in place. Skips the dedup gate: the point is to
    /// overwrite what is already there.
    pub async fn redownload(&self, record: &MediaRecord, url: &str) -> Result<()> {
        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .with_context(|| format!("re-fetch failed for {url}"))?;
        let content_hash = compute_content_hash(&bytes);

        let (bytes, duration_seconds) = self.transform_bytes(record.kind, bytes).await;
        let content_type = record.kind.default_content_type();

        self.store
            .put(
                &record.storage_key,
                &bytes,
                content_type,
                &object_metadata(&record.source_message_id, Some(&content_hash)),
            )
            .await
            .context("store write failed")?;

        let thumb_key = self
            .write_thumbnail(record.kind, &record.storage_key, &bytes)
            .await;

        self.media
            .refresh_by_storage_key(
                &record.storage_key,
                &content_hash,
                thumb_key.as_deref(),
                duration_seconds.or(record.duration_seconds),
            )
            .await
            .context("catalog refresh failed")?;

        info!(id = %record.id, key = %record.storage_key, "Refreshed media");
        Ok(())
    }

    /// Deletes a record and best-effort removes its stored objects.
    pub async fn delete_media(&self, id: &str) -> Result<Option<MediaRecord>> {
        let Some(record) = self.media.delete(id).await.context("catalog delete failed")? else {
            return Ok(None);
        };

        if let Err(e) = self.store.delete(&record.storage_key).await {
            warn!(key = %record.storage_key, error = %e, "Failed to delete stored object");
        }
        if let Some(thumb) = &record.thumbnail_key {
            if let Err(e) = self.store.delete(thumb).await {
                warn!(key = %thumb, error = %e, "Failed to delete thumbnail");
            }
        }

        info!(id = %record.id, key = %record.storage_key, "Deleted media");
        Ok(Some(record))
    }

    async fn store_and_catalog(
        &self,
        reference: &MediaReference,
        ctx: &MessageContext,
        bytes: Vec<u8>,
        content_hash: Option<String>,
    ) -> Result<IngestOutcome> {
        let storage_key = build_storage_key(
            &ctx.channel_id,
            &ctx.message_id,
            &reference.url,
            &reference.filename,
        );

        let (bytes, duration_seconds) = self.transform_bytes(reference.kind, bytes).await;

        // Declared type wins; embed references carry a synthetic marker, so
        // sniff the bytes for those and fall back to the kind default.
        let sniffed = infer::get(&bytes).map(|t| t.mime_type());
        let content_type = reference
            .content_type
            .as_deref()
            .filter(|ct| !ct.ends_with("/embed"))
            .or(sniffed)
            .unwrap_or_else(|| reference.kind.default_content_type());

        self.store
            .put(
                &storage_key,
                &bytes,
                content_type,
                &object_metadata(&ctx.message_id, content_hash.as_deref()),
            )
            .await
            .context("store write failed")?;

        let thumb_key = self
            .write_thumbnail(reference.kind, &storage_key, &bytes)
            .await;

        let text = reference
            .text_override
            .clone()
            .or_else(|| ctx.text_content.clone());

        let record = MediaRecord::new(
            reference.kind,
            storage_key.clone(),
            thumb_key,
            content_hash.unwrap_or_else(|| compute_content_hash(&bytes)),
            ctx.channel_id.clone(),
            ctx.message_id.clone(),
            text,
            ctx.timestamp,
            duration_seconds,
        );

        match self.media.insert(&record).await.context("catalog insert failed")? {
            InsertOutcome::Inserted => {
                info!(key = %storage_key, kind = reference.kind.as_str(), "Stored media");
                Ok(IngestOutcome::Stored)
            }
            InsertOutcome::DuplicateRace => {
                debug!(key = %storage_key, "Lost insert race, already cataloged");
                Ok(IngestOutcome::Duplicate)
            }
        }
    }

    /// Applies the kind-appropriate transform, returning possibly-trimmed
    /// bytes plus a probed duration for videos.
    async fn transform_bytes(&self, kind: MediaKind, bytes: Vec<u8>) -> (Vec<u8>, Option<f64>) {
        match kind {
            MediaKind::Video => {
                let prepared = match tokio::time::timeout(
                    TRANSFORM_TIMEOUT,
                    transform::prepare_video(bytes.clone(), &self.transform),
                )
                .await
                {
                    Ok(prepared) => prepared,
                    Err(_) => {
                        warn!("Video transform timed out, storing original bytes");
                        return (bytes, None);
                    }
                };
                (prepared.bytes, prepared.duration_seconds)
            }
            MediaKind::Image => (bytes, None),
        }
    }

    /// Generates and stores a thumbnail. Failures are logged, never fatal.
    async fn write_thumbnail(&self, kind: MediaKind, storage_key: &str, bytes: &[u8]) -> Option<String> {
        let thumb = match kind {
            MediaKind::Image => transform::image_thumbnail(bytes, &self.transform),
            MediaKind::Video => transform::video_thumbnail(bytes, &self.transform).await,
        };

        let thumb = match thumb {
            Ok(thumb) => thumb,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Thumbnail generation failed");
                return None;
            }
        };

        let key = thumbnail_key(storage_key);
        match self.store.put(&key, &thumb, "image/jpeg", &[]).await {
            Ok(()) => Some(key),
            Err(e) => {
                warn!(key = %key, error = %e, "Thumbnail store failed");
                None
            }
        }
    }

    async fn note_failure(&self, url: &str, reason: &str) {
        if let Err(e) = self.failed.record_failure(url, reason).await {
            warn!(url = %url, error = %e, "Failed to record URL failure");
        }
    }
}

fn object_metadata(message_id: &str, content_hash: Option<&str>) -> Vec<(String, String)> {
    let mut meta = vec![(
        "x-source-message-id".to_string(),
        message_id.to_string(),
    )];
    if let Some(hash) = content_hash {
        meta.push(("x-content-hash".to_string(), hash.to_string()));
    }
    meta
}
