//! Messaging provider abstraction.
//!
//! The fetch loop only talks to [`MessageProvider`]. The production
//! implementation reads the public channel web preview
//! ([`WebPreviewProvider`]); tests script responses in memory.

mod web;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ProviderError;
use crate::models::{MediaInfo, MediaKind};

pub use web::WebPreviewProvider;

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// An attachment as announced by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAttachment {
    pub info: MediaInfo,
    /// Where the file can be fetched from, when the provider exposes it
    pub url: Option<String>,
}

impl MediaAttachment {
    pub fn is_photo(&self) -> bool {
        self.info.kind == MediaKind::Photo
    }
}

/// A message exactly as the provider returned it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderMessage {
    pub id: i64,
    pub date: Option<DateTime<Utc>>,
    pub text: String,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub media: Option<MediaAttachment>,
    /// Full provider payload
    pub raw: Value,
}

/// Source of channel messages.
#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// List messages of `channel` with `min_id < id < before`, newest first,
    /// at most `limit` of them. An empty page means there is nothing older.
    async fn list_messages(
        &self,
        channel: &str,
        min_id: i64,
        before: Option<i64>,
        limit: usize,
    ) -> ProviderResult<Vec<ProviderMessage>>;

    /// Download an attachment to `target`.
    async fn download_media(&self, media: &MediaAttachment, target: &Path) -> ProviderResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory provider for fetch and pipeline tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// A provider backed by a fixed message history per channel.
    ///
    /// Errors can be queued per channel; each queued error is returned
    /// instead of one `list_messages` result, in order.
    #[derive(Default)]
    pub struct ScriptedProvider {
        history: HashMap<String, Vec<ProviderMessage>>,
        errors: Mutex<HashMap<String, VecDeque<ProviderError>>>,
        always_fail: HashMap<String, ProviderError>,
        hang: Vec<String>,
        failing_downloads: Vec<i64>,
        pub list_calls: Mutex<usize>,
        pub downloads: Mutex<Vec<i64>>,
    }

    impl ScriptedProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Messages in any order; served newest first.
        pub fn with_channel(mut self, channel: &str, mut messages: Vec<ProviderMessage>) -> Self {
            messages.sort_by(|a, b| b.id.cmp(&a.id));
            self.history.insert(channel.to_string(), messages);
            self
        }

        pub fn with_errors(self, channel: &str, errors: Vec<ProviderError>) -> Self {
            self.errors
                .lock()
                .unwrap()
                .insert(channel.to_string(), errors.into());
            self
        }

        pub fn always_failing(mut self, channel: &str, error: ProviderError) -> Self {
            self.always_fail.insert(channel.to_string(), error);
            self
        }

        pub fn hanging(mut self, channel: &str) -> Self {
            self.hang.push(channel.to_string());
            self
        }

        pub fn failing_download(mut self, id: i64) -> Self {
            self.failing_downloads.push(id);
            self
        }

        pub fn list_calls(&self) -> usize {
            *self.list_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl MessageProvider for ScriptedProvider {
        async fn list_messages(
            &self,
            channel: &str,
            min_id: i64,
            before: Option<i64>,
            limit: usize,
        ) -> ProviderResult<Vec<ProviderMessage>> {
            *self.list_calls.lock().unwrap() += 1;

            if self.hang.iter().any(|c| c == channel) {
                std::future::pending::<()>().await;
            }
            if let Some(err) = self.always_fail.get(channel) {
                return Err(err.clone());
            }
            if let Some(err) = self
                .errors
                .lock()
                .unwrap()
                .get_mut(channel)
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }

            let Some(history) = self.history.get(channel) else {
                return Err(ProviderError::permanent(format!("unknown channel {channel}")));
            };
            Ok(history
                .iter()
                .filter(|m| m.id > min_id && before.is_none_or(|b| m.id < b))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn download_media(
            &self,
            media: &MediaAttachment,
            target: &Path,
        ) -> ProviderResult<()> {
            let id: i64 = target
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            if self.failing_downloads.contains(&id) {
                return Err(ProviderError::transient("download reset"));
            }
            self.downloads.lock().unwrap().push(id);

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(ProviderError::transient)?;
            }
            let body = media.url.clone().unwrap_or_default();
            tokio::fs::write(target, body.as_bytes())
                .await
                .map_err(ProviderError::transient)
        }
    }

    /// A text message with the given id and timestamp.
    pub fn message(id: i64, date: Option<DateTime<Utc>>) -> ProviderMessage {
        ProviderMessage {
            id,
            date,
            text: format!("message {id}"),
            views: Some(id * 10),
            forwards: None,
            media: None,
            raw: serde_json::json!({ "id": id }),
        }
    }

    /// A photo message with the given id and timestamp.
    pub fn photo(id: i64, date: Option<DateTime<Utc>>) -> ProviderMessage {
        ProviderMessage {
            media: Some(MediaAttachment {
                info: MediaInfo {
                    kind: MediaKind::Photo,
                    mime_type: None,
                    duration: None,
                    size: None,
                },
                url: Some(format!("https://cdn.example/{id}.jpg")),
            }),
            ..message(id, date)
        }
    }
}
