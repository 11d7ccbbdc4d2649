//! Media catalog models.
//!
//! Stored media is content-addressed: a SHA-256 digest of the downloaded
//! bytes is the dedup key, independent of source URL or filename. The
//! storage key is derived deterministically from the message provenance so
//! that retries of the same reference address the same object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Classified kind of a media reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    /// Fallback content type used when the source declared none.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
        }
    }
}

/// One stored media object with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Unique identifier, generated at creation.
    pub id: String,
    pub kind: MediaKind,
    /// Object store key; unique, derived from provenance.
    pub storage_key: String,
    /// Key of the derived thumbnail, if one was generated.
    pub thumbnail_key: Option<String>,
    /// SHA-256 digest of the stored bytes. Legacy records may lack it.
    pub content_hash: Option<String>,
    pub source_channel_id: String,
    pub source_message_id: String,
    /// Message text associated with the reference (snapshot text wins for
    /// forwarded media).
    pub text_content: Option<String>,
    /// Platform-reported creation time of the originating message.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Video duration after any trim, in seconds.
    pub duration_seconds: Option<f64>,
    /// Flipped false when a consumer reports the object unreachable.
    pub available: bool,
    pub ingested_at: DateTime<Utc>,
}

impl MediaRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: MediaKind,
        storage_key: String,
        thumbnail_key: Option<String>,
        content_hash: String,
        source_channel_id: String,
        source_message_id: String,
        text_content: Option<String>,
        source_timestamp: Option<DateTime<Utc>>,
        duration_seconds: Option<f64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            storage_key,
            thumbnail_key,
            content_hash: Some(content_hash),
            source_channel_id,
            source_message_id,
            text_content,
            source_timestamp,
            duration_seconds,
            available: true,
            ingested_at: Utc::now(),
        }
    }
}

/// All media for one message, the grouping unit consumers display as a post.
#[derive(Debug, Clone, Serialize)]
pub struct MessageGroup {
    pub source_message_id: String,
    pub source_channel_id: String,
    pub text_content: Option<String>,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub media: Vec<MediaRecord>,
}

/// Compute the SHA-256 content digest of downloaded bytes.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Stable 8-character id derived from a source URL.
///
/// Used in both the temp path and the final storage key so repeated
/// attempts against the same URL are idempotent.
pub fn url_short_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

/// Sanitize a filename for use inside a storage key.
///
/// Any character outside `[A-Za-z0-9._-]` maps to `_`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();

    if sanitized.is_empty() {
        "unknown_file".to_string()
    } else {
        sanitized
    }
}

/// Derive the storage key for a media reference.
///
/// Layout: `{channelId}/{messageId}_{shortId}_{sanitizedFilename}`. The
/// external API layer relies on this scheme to resolve records to bytes.
pub fn build_storage_key(channel_id: &str, message_id: &str, url: &str, filename: &str) -> String {
    format!(
        "{}/{}_{}_{}",
        channel_id,
        message_id,
        url_short_id(url),
        sanitize_filename(filename)
    )
}

/// Thumbnail key derived from a storage key.
pub fn thumbnail_key(storage_key: &str) -> String {
    format!("{storage_key}_thumb.jpg")
}
