// src/models/mod.rs

//! Domain models for the fetcher application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod channel;
mod config;
mod message;
mod state;

// Re-export all public types
pub use channel::{dedupe_channels, load_channels, normalize_channel, parse_channel_lines};
pub use config::{
    Config, FetcherConfig, LoggingConfig, MediaConfig, PathsConfig, ProviderConfig, RetryConfig,
    WarehouseConfig,
};
pub use message::{MediaInfo, MediaKind, MessageRecord, StoredMessage};
pub use state::{Watermark, Watermarks};

/// Summary of one channel's fetch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChannelResult {
    pub channel: String,
    pub new_messages: usize,
    pub media_downloaded: usize,
    pub partitions_written: usize,
    /// Watermark after this pass
    pub last_message_id: i64,
}

impl ChannelResult {
    /// A pass that made no progress; the watermark stays where it was.
    pub fn unchanged(channel: impl Into<String>, last_message_id: i64) -> Self {
        Self {
            channel: channel.into(),
            last_message_id,
            ..Self::default()
        }
    }
}
