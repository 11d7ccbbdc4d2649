//! Discord REST client for channel history and single-message lookups.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use super::types::Message;
use crate::harvest::backfill::ChannelHistorySource;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Bot-token REST client. One client is shared across the whole run.
pub struct DiscordRestClient {
    client: Client,
    base_url: String,
    token: String,
}

impl DiscordRestClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Self::with_base_url(DISCORD_API_BASE, token, timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        // One retry after the advertised delay when rate limited
        for attempt in 0..2 {
            let response = self
                .client
                .get(url)
                .header(header::AUTHORIZATION, format!("Bot {}", self.token))
                .send()
                .await
                .with_context(|| format!("request to {url} failed"))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt == 0 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(1.0);
                warn!(url = url, retry_after = retry_after, "Rate limited, retrying");
                tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow!("Discord API returned {status} for {url}: {body}"));
            }

            return response
                .json::<T>()
                .await
                .with_context(|| format!("failed to parse response from {url}"));
        }

        Err(anyhow!("rate limited twice on {url}"))
    }

    /// Fetches a single message by channel and message id.
    pub async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Message> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.base_url, channel_id, message_id
        );
        debug!(channel_id = channel_id, message_id = message_id, "Fetching message");
        self.get_json(&url).await
    }
}

#[async_trait]
impl ChannelHistorySource for DiscordRestClient {
    async fn fetch_page(
        &self,
        channel_id: &str,
        limit: u8,
        before: Option<u64>,
    ) -> Result<Vec<Message>> {
        let mut url = format!(
            "{}/channels/{}/messages?limit={}",
            self.base_url, channel_id, limit
        );
        if let Some(cursor) = before {
            url.push_str(&format!("&before={cursor}"));
        }

        debug!(channel_id = channel_id, before = ?before, "Fetching history page");
        self.get_json(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DiscordRestClient::new("token", Duration::from_secs(30));
        assert!(client.is_ok());
    }
}
