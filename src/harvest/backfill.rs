//! Channel history backfill.
//!
//! Walks each watched channel backwards in pages of up to 100 messages,
//! ingesting media as it goes. The pagination cursor is the numerically
//! smallest message id of each page; ids are snowflakes and are handled as
//! u64 end to end.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use super::ingest::MediaIngestor;
use super::{handle_message, PipelineCounts};
use crate::discord::types::{parse_snowflake, Message};

/// Source of paged channel history, newest first.
#[async_trait]
pub trait ChannelHistorySource: Send + Sync {
    async fn fetch_page(
        &self,
        channel_id: &str,
        limit: u8,
        before: Option<u64>,
    ) -> Result<Vec<Message>>;
}

/// Per-run backfill totals.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackfillStats {
    pub pages: u64,
    pub messages: u64,
    pub counts: PipelineCounts,
}

/// Drains channel history through the ingest pipeline.
pub struct BackfillCrawler<H> {
    ingestor: MediaIngestor,
    history: H,
    /// Traversal order follows the operator's configuration.
    channels: Vec<String>,
    /// Per-message watch gate, derived from `channels`.
    watched_channels: HashSet<String>,
    page_size: u8,
    /// Messages ingested concurrently within a page.
    chunk_size: usize,
}

impl<H: ChannelHistorySource> BackfillCrawler<H> {
    pub fn new(
        ingestor: MediaIngestor,
        history: H,
        channels: Vec<String>,
        page_size: u8,
        chunk_size: usize,
    ) -> Self {
        let watched_channels = channels.iter().cloned().collect();
        Self {
            ingestor,
            history,
            channels,
            watched_channels,
            page_size,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Backfills every channel, in configured order.
    pub async fn run(&self) -> BackfillStats {
        let mut stats = BackfillStats::default();

        for channel_id in &self.channels {
            let channel_stats = self.backfill_channel(channel_id).await;
            stats.pages += channel_stats.pages;
            stats.messages += channel_stats.messages;
            stats.counts.merge(channel_stats.counts);
        }

        stats
    }

    /// Backfills a single channel until history is exhausted.
    ///
    /// A failed page fetch ends this channel's crawl; already-ingested pages
    /// are kept and the next run resumes from the top thanks to dedup.
    pub async fn backfill_channel(&self, channel_id: &str) -> BackfillStats {
        let mut stats = BackfillStats::default();
        let mut before: Option<u64> = None;

        info!(channel_id = channel_id, "Backfilling channel");

        loop {
            let page = match self
                .history
                .fetch_page(channel_id, self.page_size, before)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(channel_id = channel_id, before = ?before, error = %e, "Page fetch failed, aborting channel");
                    break;
                }
            };

            if page.is_empty() {
                break;
            }

            stats.pages += 1;
            stats.messages += page.len() as u64;

            for chunk in page.chunks(self.chunk_size) {
                let results = join_all(
                    chunk
                        .iter()
                        .map(|message| handle_message(&self.ingestor, &self.watched_channels, message)),
                )
                .await;
                for counts in results {
                    stats.counts.merge(counts);
                }
            }

            let page_len = page.len();
            before = match oldest_id(&page) {
                Some(cursor) => Some(cursor),
                None => {
                    warn!(channel_id = channel_id, "Page had no parseable ids, stopping");
                    break;
                }
            };

            // A short page means history is exhausted
            if page_len < usize::from(self.page_size) {
                break;
            }
        }

        info!(
            channel_id = channel_id,
            pages = stats.pages,
            messages = stats.messages,
            stored = stats.counts.stored,
            duplicates = stats.counts.duplicates,
            "Channel backfill done"
        );

        stats
    }
}

/// The numerically smallest snowflake in a page, the next `before` cursor.
fn oldest_id(page: &[Message]) -> Option<u64> {
    page.iter()
        .filter_map(|m| parse_snowflake(&m.id))
        .min()
}
