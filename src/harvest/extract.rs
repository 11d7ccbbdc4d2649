//! Media reference extraction from Discord messages.
//!
//! Turns a raw message into zero or more downloadable references, covering
//! direct attachments, embedded media, and forwarded message snapshots.

use tracing::debug;

use crate::discord::types::{Embed, Message};
use crate::models::MediaKind;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// A single downloadable media item found in a message.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaReference {
    pub url: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub kind: MediaKind,
    /// Replaces the message's own text when set. Used for forwarded
    /// messages, where the snapshot carries the caption.
    pub text_override: Option<String>,
}

/// Classifies a reference by content type first, then by URL extension.
/// Returns `None` when the item is neither an image nor a video.
fn classify(url: &str, content_type: Option<&str>) -> Option<MediaKind> {
    if let Some(ct) = content_type {
        if ct.starts_with("video/") {
            return Some(MediaKind::Video);
        }
        if ct.starts_with("image/") {
            return Some(MediaKind::Image);
        }
    }

    // Strip query string and fragment before looking at the extension
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return Some(MediaKind::Video);
    }
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Some(MediaKind::Image);
    }
    None
}

/// Picks at most one reference out of an embed, preferring the richest
/// representation: video over image over thumbnail.
fn embed_reference(
    embed: &Embed,
    message_id: &str,
    name_prefix: &str,
    text_override: Option<&str>,
) -> Option<MediaReference> {
    let (url, kind, stem) = if let Some(url) = embed.video.as_ref().and_then(|m| m.url.clone()) {
        (url, MediaKind::Video, "video")
    } else if let Some(url) = embed.image.as_ref().and_then(|m| m.url.clone()) {
        (url, MediaKind::Image, "image")
    } else if let Some(url) = embed.thumbnail.as_ref().and_then(|m| m.url.clone()) {
        (url, MediaKind::Image, "thumb")
    } else {
        return None;
    };

    let synthetic_type = match kind {
        MediaKind::Video => "video/embed",
        MediaKind::Image => "image/embed",
    };

    Some(MediaReference {
        url,
        filename: format!("{name_prefix}embed_{stem}_{message_id}"),
        content_type: Some(synthetic_type.to_string()),
        size: None,
        kind,
        text_override: text_override.map(String::from),
    })
}

/// Extracts every media reference from a message.
///
/// Messages from bot authors yield nothing. Attachments that are neither
/// image nor video are dropped with a debug log.
pub fn extract_references(message: &Message) -> Vec<MediaReference> {
    if message.author.as_ref().is_some_and(|a| a.bot) {
        debug!(message_id = %message.id, "Skipping bot-authored message");
        return Vec::new();
    }

    let mut refs = Vec::new();

    for attachment in &message.attachments {
        match classify(&attachment.url, attachment.content_type.as_deref()) {
            Some(kind) => refs.push(MediaReference {
                url: attachment.url.clone(),
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size: Some(attachment.size),
                kind,
                text_override: None,
            }),
            None => {
                debug!(
                    message_id = %message.id,
                    filename = %attachment.filename,
                    "Dropping non-media attachment"
                );
            }
        }
    }

    for embed in &message.embeds {
        if let Some(media_ref) = embed_reference(embed, &message.id, "", None) {
            refs.push(media_ref);
        }
    }

    for snapshot in &message.message_snapshots {
        let snap = &snapshot.message;
        let text_override = if snap.content.is_empty() {
            None
        } else {
            Some(snap.content.as_str())
        };

        for attachment in &snap.attachments {
            match classify(&attachment.url, attachment.content_type.as_deref()) {
                Some(kind) => refs.push(MediaReference {
                    url: attachment.url.clone(),
                    filename: format!("forward_{}", attachment.filename),
                    content_type: attachment.content_type.clone(),
                    size: Some(attachment.size),
                    kind,
                    text_override: text_override.map(String::from),
                }),
                None => {
                    debug!(
                        message_id = %message.id,
                        filename = %attachment.filename,
                        "Dropping non-media forwarded attachment"
                    );
                }
            }
        }

        for embed in &snap.embeds {
            if let Some(media_ref) = embed_reference(embed, &message.id, "forward_", text_override)
            {
                refs.push(media_ref);
            }
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::types::{Attachment, EmbedMedia, MessageSnapshot, SnapshotMessage, User};

    fn attachment(url: &str, filename: &str, content_type: Option<&str>) -> Attachment {
        Attachment {
            url: url.to_string(),
            filename: filename.to_string(),
            content_type: content_type.map(String::from),
            size: 42,
        }
    }

    #[test]
    fn test_classify_by_content_type() {
        assert_eq!(classify("https://x/file", Some("video/mp4")), Some(MediaKind::Video));
        assert_eq!(classify("https://x/file", Some("image/png")), Some(MediaKind::Image));
        assert_eq!(classify("https://x/file", Some("application/pdf")), None);
    }

    #[test]
    fn test_classify_by_extension_ignores_query() {
        assert_eq!(classify("https://cdn.x/a.MP4?ex=1&hm=2", None), Some(MediaKind::Video));
        assert_eq!(classify("https://cdn.x/a.webp#frag", None), Some(MediaKind::Image));
        assert_eq!(classify("https://cdn.x/a.txt", None), None);
        assert_eq!(classify("https://cdn.x/noext", None), None);
    }

    #[test]
    fn test_bot_messages_yield_nothing() {
        let message = Message {
            id: "1".into(),
            author: Some(User {
                id: "b".into(),
                username: "bot".into(),
                bot: true,
            }),
            attachments: vec![attachment("https://cdn.x/a.png", "a.png", Some("image/png"))],
            ..Default::default()
        };
        assert!(extract_references(&message).is_empty());
    }

    #[test]
    fn test_attachments_keep_original_names() {
        let message = Message {
            id: "100".into(),
            attachments: vec![
                attachment("https://cdn.x/a.mp4", "a.mp4", Some("video/mp4")),
                attachment("https://cdn.x/b.pdf", "b.pdf", Some("application/pdf")),
            ],
            ..Default::default()
        };
        let refs = extract_references(&message);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].filename, "a.mp4");
        assert_eq!(refs[0].kind, MediaKind::Video);
        assert_eq!(refs[0].size, Some(42));
    }

    #[test]
    fn test_embed_prefers_video_over_image_over_thumbnail() {
        let embed = Embed {
            video: Some(EmbedMedia {
                url: Some("https://cdn.x/v.mp4".into()),
            }),
            image: Some(EmbedMedia {
                url: Some("https://cdn.x/i.png".into()),
            }),
            thumbnail: Some(EmbedMedia {
                url: Some("https://cdn.x/t.png".into()),
            }),
        };
        let message = Message {
            id: "200".into(),
            embeds: vec![embed],
            ..Default::default()
        };
        let refs = extract_references(&message);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].url, "https://cdn.x/v.mp4");
        assert_eq!(refs[0].filename, "embed_video_200");
        assert_eq!(refs[0].content_type.as_deref(), Some("video/embed"));
    }

    #[test]
    fn test_embed_thumbnail_fallback() {
        let embed = Embed {
            thumbnail: Some(EmbedMedia {
                url: Some("https://cdn.x/t.jpg".into()),
            }),
            ..Default::default()
        };
        let message = Message {
            id: "201".into(),
            embeds: vec![embed],
            ..Default::default()
        };
        let refs = extract_references(&message);
        assert_eq!(refs[0].filename, "embed_thumb_201");
        assert_eq!(refs[0].kind, MediaKind::Image);
    }

    #[test]
    fn test_snapshot_attachments_carry_text_override() {
        let message = Message {
            id: "300".into(),
            content: "look at this".into(),
            message_snapshots: vec![MessageSnapshot {
                message: SnapshotMessage {
                    content: "original caption".into(),
                    attachments: vec![attachment(
                        "https://cdn.x/f.png",
                        "f.png",
                        Some("image/png"),
                    )],
                    embeds: vec![],
                },
            }],
            ..Default::default()
        };
        let refs = extract_references(&message);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].filename, "forward_f.png");
        assert_eq!(refs[0].text_override.as_deref(), Some("original caption"));
    }

    #[test]
    fn test_snapshot_embed_names_use_forward_prefix() {
        let message = Message {
            id: "301".into(),
            message_snapshots: vec![MessageSnapshot {
                message: SnapshotMessage {
                    content: String::new(),
                    attachments: vec![],
                    embeds: vec![Embed {
                        image: Some(EmbedMedia {
                            url: Some("https://cdn.x/e.png".into()),
                        }),
                        ..Default::default()
                    }],
                },
            }],
            ..Default::default()
        };
        let refs = extract_references(&message);
        assert_eq!(refs[0].filename, "forward_embed_image_301");
        assert_eq!(refs[0].text_override, None);
    }
}
