//! The harvest pipeline: extraction, transformation, and ingestion of media
//! from channel messages, driven either by history backfill or live events.

pub mod backfill;
pub mod extract;
pub mod ingest;
pub mod listener;
pub mod transform;

use std::collections::HashSet;

use tracing::debug;

use crate::discord::types::Message;
use self::extract::extract_references;
use self::ingest::{IngestOutcome, MediaIngestor, MessageContext};

/// Tally of per-reference outcomes across a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCounts {
    pub stored: u64,
    pub duplicates: u64,
    pub poisoned: u64,
    pub failed: u64,
}

impl PipelineCounts {
    pub fn add(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Stored => self.stored += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::SkippedPoison => self.poisoned += 1,
            IngestOutcome::Failed => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: PipelineCounts) {
        self.stored += other.stored;
        self.duplicates += other.duplicates;
        self.poisoned += other.poisoned;
        self.failed += other.failed;
    }

    pub fn total(&self) -> u64 {
        self.stored + self.duplicates + self.poisoned + self.failed
    }
}

/// Runs one message through extraction and ingestion.
///
/// Messages from unwatched channels are ignored entirely.
pub async fn handle_message(
    ingestor: &MediaIngestor,
    watched_channels: &HashSet<String>,
    message: &Message,
) -> PipelineCounts {
    let mut counts = PipelineCounts::default();

    if !watched_channels.contains(&message.channel_id) {
        debug!(channel_id = %message.channel_id, "Ignoring unwatched channel");
        return counts;
    }

    let references = extract_references(message);
    if references.is_empty() {
        return counts;
    }

    let ctx = MessageContext {
        channel_id: message.channel_id.clone(),
        message_id: message.id.clone(),
        text_content: if message.content.is_empty() {
            None
        } else {
            Some(message.content.clone())
        },
        timestamp: message.timestamp,
    };

    for reference in &references {
        counts.add(ingestor.ingest(reference, &ctx).await);
    }

    counts
}
