// src/pipeline/fetch.rs

//! Incremental fetch of one channel.
//!
//! Pages through the provider from newest to oldest, taking only messages
//! above the channel's watermark, and groups the normalized records by UTC
//! day. Nothing is written here; the caller merges the batch into the
//! partitions once the whole pass has finished.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Map;

use crate::error::{AppError, Result};
use crate::models::{Config, MessageRecord};
use crate::pipeline::RetryPolicy;
use crate::provider::{MessageProvider, ProviderMessage};
use crate::services::MediaDownloader;
use crate::utils::lookback_cutoff;

/// Limits applied to a single channel pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Messages taken per pass (0 = unlimited)
    pub max_messages: usize,
    /// First-run age limit in days (0 = disabled)
    pub lookback_days: u32,
    pub page_size: usize,
    pub download_media: bool,
    /// Fresh photo downloads per pass (0 = unlimited)
    pub max_media: usize,
}

impl FetchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_messages: config.fetcher.max_messages,
            lookback_days: config.fetcher.lookback_days,
            page_size: config.fetcher.page_size.max(1),
            download_media: config.media.download,
            max_media: config.media.max_per_channel,
        }
    }

    fn page_limit(&self, taken: usize) -> usize {
        if self.max_messages == 0 {
            self.page_size
        } else {
            self.page_size.min(self.max_messages.saturating_sub(taken))
        }
    }

    fn cap_reached(&self, taken: usize) -> bool {
        self.max_messages > 0 && taken >= self.max_messages
    }
}

/// Output of one channel pass, not yet persisted.
#[derive(Debug, Default)]
pub struct FetchedBatch {
    /// Records grouped by partition day (`YYYY-MM-DD`)
    pub partitions: BTreeMap<String, Vec<MessageRecord>>,
    /// Highest id seen, never below the starting watermark
    pub max_id: i64,
    pub new_messages: usize,
    pub media_downloaded: usize,
}

/// Runs fetch passes against a provider.
pub struct ChannelFetcher<'a> {
    provider: &'a dyn MessageProvider,
    policy: &'a RetryPolicy,
    options: &'a FetchOptions,
    root: &'a Path,
    images_dir: &'a Path,
}

impl<'a> ChannelFetcher<'a> {
    pub fn new(
        provider: &'a dyn MessageProvider,
        policy: &'a RetryPolicy,
        options: &'a FetchOptions,
        root: &'a Path,
        images_dir: &'a Path,
    ) -> Self {
        Self {
            provider,
            policy,
            options,
            root,
            images_dir,
        }
    }

    /// Fetch everything newer than `last_id` for `channel`.
    ///
    /// The lookback window only applies when `last_id` is 0, i.e. the
    /// channel has never been fetched. Undated messages are filed under
    /// `now`'s day.
    pub async fn fetch(
        &self,
        channel: &str,
        last_id: i64,
        now: DateTime<Utc>,
    ) -> Result<FetchedBatch> {
        let cutoff = if last_id == 0 {
            lookback_cutoff(now, self.options.lookback_days)
        } else {
            None
        };
        let mut media = self.options.download_media.then(|| {
            MediaDownloader::new(
                self.provider,
                self.policy,
                self.root,
                self.images_dir,
                channel,
                self.options.max_media,
            )
        });

        let label = format!("{channel}: list");
        let mut batch = FetchedBatch {
            max_id: last_id,
            ..FetchedBatch::default()
        };
        let mut before: Option<i64> = None;

        'pages: loop {
            let limit = self.options.page_limit(batch.new_messages);
            let page = self
                .policy
                .run(&label, || {
                    self.provider.list_messages(channel, last_id, before, limit)
                })
                .await
                .map_err(|e| AppError::provider(channel, e))?;

            let Some(oldest) = page.iter().map(|m| m.id).min() else {
                break;
            };
            log::debug!(
                "[{channel}] Page of {} messages (before={before:?})",
                page.len()
            );

            for message in page {
                if message.id <= last_id {
                    continue;
                }
                if let (Some(cutoff), Some(date)) = (cutoff, message.date) {
                    if date < cutoff {
                        log::info!(
                            "[{channel}] Reached lookback limit at message {} ({})",
                            message.id,
                            date.format("%Y-%m-%d")
                        );
                        break 'pages;
                    }
                }

                batch.max_id = batch.max_id.max(message.id);
                let record = self.normalize(channel, message, media.as_mut()).await;
                batch
                    .partitions
                    .entry(record.partition_day(now))
                    .or_default()
                    .push(record);
                batch.new_messages += 1;

                if self.options.cap_reached(batch.new_messages) {
                    log::info!(
                        "[{channel}] Reached max_messages={}",
                        self.options.max_messages
                    );
                    break 'pages;
                }
            }

            if oldest <= last_id || before.is_some_and(|b| oldest >= b) {
                break;
            }
            before = Some(oldest);
        }

        batch.media_downloaded = media.map(|m| m.downloaded()).unwrap_or(0);
        Ok(batch)
    }

    async fn normalize(
        &self,
        channel: &str,
        message: ProviderMessage,
        media: Option<&mut MediaDownloader<'_>>,
    ) -> MessageRecord {
        let media_path = match (media, &message.media) {
            (Some(downloader), Some(attachment)) => {
                downloader.fetch(message.id, attachment).await
            }
            _ => None,
        };

        MessageRecord {
            channel: channel.to_string(),
            message_id: message.id,
            date: message.date,
            text: message.text,
            views: message.views,
            forwards: message.forwards,
            has_media: message.media.is_some(),
            media: message.media.map(|m| m.info),
            media_path,
            raw: message.raw,
            extra: Map::new(),
        }
    }
}
