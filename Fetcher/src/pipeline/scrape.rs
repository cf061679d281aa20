// src/pipeline/scrape.rs

//! Scrape run: every channel in order, one incremental pass each.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::models::{ChannelResult, Config, Watermarks};
use crate::pipeline::fetch::{ChannelFetcher, FetchOptions};
use crate::pipeline::{RetryPolicy, merge_partitions};
use crate::provider::MessageProvider;
use crate::storage::{PartitionStore, WatermarkStore};

/// How a channel's pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Fetched,
    TimedOut,
    /// Invalid, private or missing channel
    Skipped,
    Failed,
}

/// One channel's outcome within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub status: ChannelStatus,
    #[serde(flatten)]
    pub result: ChannelResult,
}

/// Outcome of a whole scrape run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub channels: Vec<ChannelReport>,
}

impl RunSummary {
    pub fn new_messages(&self) -> usize {
        self.channels.iter().map(|c| c.result.new_messages).sum()
    }

    pub fn media_downloaded(&self) -> usize {
        self.channels.iter().map(|c| c.result.media_downloaded).sum()
    }

    pub fn count(&self, status: ChannelStatus) -> usize {
        self.channels.iter().filter(|c| c.status == status).count()
    }

    pub fn report(&self, channel: &str) -> Option<&ChannelReport> {
        self.channels.iter().find(|c| c.result.channel == channel)
    }
}

/// Run the scraper over `channels`, strictly one after another.
///
/// Each channel is bounded by `fetcher.channel_timeout_secs`. Failures
/// stay within their channel: the watermark is left as it was and the run
/// moves on. Only an invalid configuration fails the run as a whole.
pub async fn run_scraper<S>(
    config: &Config,
    root: &Path,
    provider: &dyn MessageProvider,
    store: &S,
    channels: &[String],
) -> Result<RunSummary>
where
    S: WatermarkStore + PartitionStore,
{
    config.validate()?;

    let policy = RetryPolicy::from_config(&config.retry);
    let options = FetchOptions::from_config(config);
    let images_dir = root.join(&config.paths.images_dir);
    let fetcher = ChannelFetcher::new(provider, &policy, &options, root, &images_dir);
    let timeout = config.fetcher.channel_timeout();

    let mut marks = store.load_watermarks().await;
    log::info!(
        "Scraping {} channels ({} watermarks loaded)",
        channels.len(),
        marks.len()
    );

    let mut summary = RunSummary::default();
    for channel in channels {
        let report = scrape_channel(config, &fetcher, store, &mut marks, channel, timeout).await;
        summary.channels.push(report);
    }

    log::info!(
        "Scrape complete: {} new messages, {} media files; {} fetched, {} timed out, {} skipped, {} failed",
        summary.new_messages(),
        summary.media_downloaded(),
        summary.count(ChannelStatus::Fetched),
        summary.count(ChannelStatus::TimedOut),
        summary.count(ChannelStatus::Skipped),
        summary.count(ChannelStatus::Failed),
    );
    Ok(summary)
}

async fn scrape_channel<S>(
    config: &Config,
    fetcher: &ChannelFetcher<'_>,
    store: &S,
    marks: &mut Watermarks,
    channel: &str,
    timeout: std::time::Duration,
) -> ChannelReport
where
    S: WatermarkStore + PartitionStore,
{
    let last_id = marks.get(channel);
    let unchanged = |status| ChannelReport {
        status,
        result: ChannelResult::unchanged(channel, last_id),
    };
    log::info!("[{channel}] Fetching messages after id {last_id}");

    let batch = match tokio::time::timeout(timeout, fetcher.fetch(channel, last_id, Utc::now()))
        .await
    {
        Ok(Ok(batch)) => batch,
        Ok(Err(e)) if e.is_permanent() => {
            log::warn!("[{channel}] Skipping: {e}");
            return unchanged(ChannelStatus::Skipped);
        }
        Ok(Err(e)) => {
            log::error!("[{channel}] Fetch failed: {e}");
            return unchanged(ChannelStatus::Failed);
        }
        Err(_) => {
            log::warn!(
                "[{channel}] Timed out after {}s; watermark stays at {last_id}",
                timeout.as_secs()
            );
            return unchanged(ChannelStatus::TimedOut);
        }
    };

    if batch.new_messages == 0 {
        log::info!("[{channel}] No new messages");
        return unchanged(ChannelStatus::Fetched);
    }

    let partitions_written = match merge_partitions(
        store,
        channel,
        batch.partitions,
        config.fetcher.csv_mirror,
    )
    .await
    {
        Ok(n) => n,
        Err(e) => {
            log::error!("[{channel}] Writing partitions failed: {e}");
            return unchanged(ChannelStatus::Failed);
        }
    };

    if marks.advance(channel, batch.max_id, Utc::now()) {
        if let Err(e) = store.save_watermarks(marks).await {
            log::error!("[{channel}] Saving watermark failed: {e}");
        }
    }

    log::info!(
        "[{channel}] {} new messages, {} media files, {} partitions; watermark {}",
        batch.new_messages,
        batch.media_downloaded,
        partitions_written,
        marks.get(channel)
    );
    ChannelReport {
        status: ChannelStatus::Fetched,
        result: ChannelResult {
            channel: channel.to_string(),
            new_messages: batch.new_messages,
            media_downloaded: batch.media_downloaded,
            partitions_written,
            last_message_id: marks.get(channel),
        },
    }
}
