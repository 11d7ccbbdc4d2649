//! Domain models for the media catalog.

mod failed_url;
mod media;

pub use failed_url::{FailedUrl, POISON_THRESHOLD};
pub use media::{
    build_storage_key, compute_content_hash, sanitize_filename, thumbnail_key, url_short_id,
    MediaKind, MediaRecord, MessageGroup,
};
