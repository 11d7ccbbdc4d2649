//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use crate::config::{Settings, DEFAULT_CONFIG_PATH};
use crate::discord::{DiscordGateway, DiscordRestClient};
use crate::harvest::backfill::BackfillCrawler;
use crate::harvest::extract::extract_references;
use crate::harvest::ingest::{HttpFetcher, MediaIngestor};
use crate::harvest::listener::LiveListener;
use crate::models::build_storage_key;
use crate::repository::{
    run_migrations, FailedUrlRepository, MediaRepository,
};
use crate::storage::public_url;

#[derive(Parser)]
#[command(name = "mediakeep")]
#[command(about = "Discord media harvesting and deduplication pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest full channel history
    Backfill {
        /// Restrict to a single channel ID
        channel: Option<String>,
    },

    /// Watch channels for new messages
    Watch,

    /// Backfill, then keep watching
    Run,

    /// Re-fetch a stored media item from its source message
    Redownload {
        /// Media record ID
        id: String,
    },

    /// Show catalog status
    Status,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Backfill { channel } => cmd_backfill(&settings, channel.as_deref()).await,
        Commands::Watch => cmd_watch(&settings).await,
        Commands::Run => cmd_run(&settings).await,
        Commands::Redownload { id } => cmd_redownload(&settings, &id).await,
        Commands::Status => cmd_status(&settings).await,
    }
}

/// Wires up the repositories, store, and ingestor shared by every command.
async fn build_ingestor(settings: &Settings) -> Result<MediaIngestor> {
    run_migrations(&settings.database_url).await?;

    let pool = settings.create_pool();
    let store = settings.create_store().await?;
    let fetcher = Arc::new(HttpFetcher::new(settings.request_timeout())?);

    Ok(MediaIngestor::new(
        fetcher,
        store,
        MediaRepository::new(pool.clone()),
        FailedUrlRepository::new(pool),
        settings.transform_config(),
    ))
}

fn print_counts(counts: &crate::harvest::PipelineCounts) {
    println!(
        "  {} stored, {} duplicates, {} poisoned, {} failed",
        style(counts.stored).green(),
        style(counts.duplicates).dim(),
        style(counts.poisoned).yellow(),
        style(counts.failed).red()
    );
}

async fn cmd_backfill(settings: &Settings, channel: Option<&str>) -> Result<()> {
    settings.validate()?;
    let ingestor = build_ingestor(settings).await?;
    let rest = DiscordRestClient::new(&settings.discord_token, settings.request_timeout())?;

    // Traversal preserves the configured channel order
    let mut channels = settings.channel_ids.clone();
    if let Some(channel) = channel {
        if !channels.iter().any(|c| c.as_str() == channel) {
            bail!("channel {channel} is not in the configured channel list");
        }
        channels.retain(|c| c.as_str() == channel);
    }

    println!(
        "{} Backfilling {} channel(s)",
        style("→").cyan(),
        channels.len()
    );

    let crawler = BackfillCrawler::new(
        ingestor,
        rest,
        channels,
        settings.harvest.page_size,
        settings.harvest.chunk_size,
    );
    let stats = crawler.run().await;

    println!(
        "{} Backfill complete: {} pages, {} messages",
        style("✓").green(),
        stats.pages,
        stats.messages
    );
    print_counts(&stats.counts);
    Ok(())
}

async fn cmd_watch(settings: &Settings) -> Result<()> {
    settings.validate()?;
    let ingestor = build_ingestor(settings).await?;

    println!(
        "{} Watching {} channel(s) for new messages",
        style("→").cyan(),
        settings.channel_ids.len()
    );

    let listener = LiveListener::new(ingestor, settings.watched_channels());
    let gateway = DiscordGateway::new(&settings.discord_token);
    let counts = listener.run(gateway).await?;
    print_counts(&counts);
    Ok(())
}

async fn cmd_run(settings: &Settings) -> Result<()> {
    cmd_backfill(settings, None).await?;
    cmd_watch(settings).await
}

async fn cmd_redownload(settings: &Settings, id: &str) -> Result<()> {
    settings.validate()?;
    let ingestor = build_ingestor(settings).await?;
    let rest = DiscordRestClient::new(&settings.discord_token, settings.request_timeout())?;

    let Some(record) = ingestor.media_repository().get(id).await? else {
        bail!("no media record with id {id}");
    };

    let message = rest
        .fetch_message(&record.source_channel_id, &record.source_message_id)
        .await
        .context("source message lookup failed")?;

    // Find the reference whose derived key matches the stored object
    let matching = extract_references(&message).into_iter().find(|r| {
        build_storage_key(
            &record.source_channel_id,
            &record.source_message_id,
            &r.url,
            &r.filename,
        ) == record.storage_key
    });

    match matching {
        Some(reference) => {
            ingestor.redownload(&record, &reference.url).await?;
            println!(
                "{} Refreshed {} from {}",
                style("✓").green(),
                record.storage_key,
                reference.url
            );
            println!("  served at {}", public_url(&record.storage_key));
        }
        None => {
            ingestor.media_repository().mark_unavailable(id).await?;
            println!(
                "{} Media no longer present in source message, marked unavailable",
                style("!").yellow()
            );
        }
    }

    Ok(())
}

async fn cmd_status(settings: &Settings) -> Result<()> {
    run_migrations(&settings.database_url).await?;
    let pool = settings.create_pool();
    let media = MediaRepository::new(pool.clone());
    let failed = FailedUrlRepository::new(pool);

    println!("\n{}", style("Media Catalog").bold());
    println!("  Total records: {}", media.count().await?);
    for (kind, count) in media.kind_counts().await? {
        println!("    {kind}: {count}");
    }
    for channel_id in &settings.channel_ids {
        match media.latest_message_id(channel_id).await? {
            Some(latest) => println!("  {channel_id}: latest message {latest}"),
            None => println!("  {channel_id}: {}", style("no media yet").dim()),
        }
    }
    println!("  Failed URLs tracked: {}", failed.count().await?);

    Ok(())
}
