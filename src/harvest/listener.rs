//! Live message listener.
//!
//! Drains messages from an event source (the gateway in production) through
//! the same pipeline the backfill uses, so both paths share extraction,
//! dedup, and poison handling.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use super::ingest::MediaIngestor;
use super::{handle_message, PipelineCounts};
use crate::discord::types::Message;

/// Pushes live messages into a channel until the connection ends.
#[async_trait]
pub trait MessageEventSource: Send + Sync {
    async fn run(&self, tx: mpsc::Sender<Message>) -> Result<()>;
}

/// Connects an event source to the ingest pipeline.
pub struct LiveListener {
    ingestor: MediaIngestor,
    watched_channels: HashSet<String>,
}

impl LiveListener {
    pub fn new(ingestor: MediaIngestor, watched_channels: HashSet<String>) -> Self {
        Self {
            ingestor,
            watched_channels,
        }
    }

    /// Runs until the source ends, returning the accumulated counts.
    pub async fn run<S: MessageEventSource + 'static>(&self, source: S) -> Result<PipelineCounts> {
        let (tx, mut rx) = mpsc::channel::<Message>(64);

        let source_task = tokio::spawn(async move { source.run(tx).await });

        let mut counts = PipelineCounts::default();
        while let Some(message) = rx.recv().await {
            let message_counts =
                handle_message(&self.ingestor, &self.watched_channels, &message).await;
            if message_counts.total() > 0 {
                info!(
                    message_id = %message.id,
                    stored = message_counts.stored,
                    duplicates = message_counts.duplicates,
                    "Handled live message"
                );
            }
            counts.merge(message_counts);
        }

        // Channel closed, surface the source's exit status
        match source_task.await {
            Ok(result) => result?,
            Err(e) => return Err(anyhow::anyhow!("event source task panicked: {e}")),
        }

        Ok(counts)
    }
}
