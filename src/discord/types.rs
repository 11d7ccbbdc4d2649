//! Wire types for the subset of the Discord API this crate consumes.
//!
//! Only the fields the harvest pipeline reads are modeled. Everything else in
//! the payloads is ignored during deserialization.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A channel message as returned by the REST history endpoint or a gateway
/// MESSAGE_CREATE dispatch.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// Present on forwarded messages. Carries the forwarded content.
    #[serde(default)]
    pub message_snapshots: Vec<MessageSnapshot>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Embed {
    #[serde(default)]
    pub video: Option<EmbedMedia>,
    #[serde(default)]
    pub image: Option<EmbedMedia>,
    #[serde(default)]
    pub thumbnail: Option<EmbedMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedMedia {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSnapshot {
    pub message: SnapshotMessage,
}

/// The nested message inside a forward snapshot. Discord omits the id and
/// channel fields here.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SnapshotMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

/// Parses a snowflake id string into its numeric form.
///
/// Snowflakes exceed 2^53, so they must never round-trip through a float.
pub fn parse_snowflake(id: &str) -> Option<u64> {
    id.parse::<u64>().ok()
}
