// src/services/media.rs

//! Photo downloads for one channel's fetch pass.

use std::path::{Path, PathBuf};

use crate::pipeline::RetryPolicy;
use crate::provider::{MediaAttachment, MessageProvider};
use crate::utils::relative_path;

/// Downloads photo attachments into `images/<channel>/<id>.jpg`.
///
/// Files already on disk (non-empty) are reused and do not count against
/// `limit`. A failed download is logged and yields no path; the message
/// itself is still kept.
pub struct MediaDownloader<'a> {
    provider: &'a dyn MessageProvider,
    policy: &'a RetryPolicy,
    root: &'a Path,
    channel: &'a str,
    dir: PathBuf,
    /// Fresh downloads allowed (0 = unlimited)
    limit: usize,
    downloaded: usize,
}

impl<'a> MediaDownloader<'a> {
    pub fn new(
        provider: &'a dyn MessageProvider,
        policy: &'a RetryPolicy,
        root: &'a Path,
        images_dir: &Path,
        channel: &'a str,
        limit: usize,
    ) -> Self {
        Self {
            provider,
            policy,
            root,
            channel,
            dir: images_dir.join(channel),
            limit,
            downloaded: 0,
        }
    }

    /// Fresh downloads completed so far.
    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    fn limit_reached(&self) -> bool {
        self.limit > 0 && self.downloaded >= self.limit
    }

    /// Make sure the photo of message `id` is on disk and return its path
    /// relative to the project root. `None` for non-photo attachments, when
    /// the cap is reached, or when the download fails.
    pub async fn fetch(&mut self, id: i64, media: &MediaAttachment) -> Option<String> {
        if !media.is_photo() {
            return None;
        }

        let target = self.dir.join(format!("{id}.jpg"));
        if is_non_empty_file(&target).await {
            log::debug!("[{}] Reusing {}", self.channel, target.display());
            return Some(relative_path(self.root, &target));
        }
        if self.limit_reached() {
            log::debug!(
                "[{}] Media cap of {} reached, skipping photo of {}",
                self.channel,
                self.limit,
                id
            );
            return None;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            log::warn!("[{}] Cannot create {}: {}", self.channel, self.dir.display(), e);
            return None;
        }

        let label = format!("{}: media {}", self.channel, id);
        match self
            .policy
            .run(&label, || self.provider.download_media(media, &target))
            .await
        {
            Ok(()) => {
                self.downloaded += 1;
                Some(relative_path(self.root, &target))
            }
            Err(e) => {
                log::warn!("[{}] Photo download failed for {}: {}", self.channel, id, e);
                None
            }
        }
    }
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
