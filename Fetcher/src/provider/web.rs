// src/provider/web.rs

//! Public channel web preview provider.
//!
//! Reads `https://t.me/s/<channel>?before=<id>`, the HTML preview Telegram
//! serves for public channels, and parses each post with CSS selectors.
//! A page holds the ~20 posts preceding `before`.
//!
//! Status mapping:
//! - `429` → [`ProviderError::RateLimited`] (wait from `Retry-After`)
//! - `5xx`, `408`, transport errors → [`ProviderError::Transient`]
//! - `4xx`, or a redirect away from `/s/` (private/unknown channel) →
//!   [`ProviderError::Permanent`]

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode, header::RETRY_AFTER};
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::json;
use tokio::io::AsyncWriteExt;

use super::{MediaAttachment, MessageProvider, ProviderMessage, ProviderResult};
use crate::error::{AppError, ProviderError, Result};
use crate::models::{MediaInfo, MediaKind, ProviderConfig};
use crate::utils::http;

/// CSS selectors for the preview markup.
struct PreviewSelectors {
    history: Selector,
    message: Selector,
    date: Selector,
    text: Selector,
    views: Selector,
    author: Selector,
    photo: Selector,
    video: Selector,
    video_duration: Selector,
    voice: Selector,
    voice_duration: Selector,
    document: Selector,
    document_extra: Selector,
    other_media: Selector,
}

impl PreviewSelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            history: parse_selector(".tgme_channel_history")?,
            message: parse_selector("div.tgme_widget_message[data-post]")?,
            date: parse_selector("a.tgme_widget_message_date time[datetime]")?,
            text: parse_selector("div.tgme_widget_message_text")?,
            views: parse_selector("span.tgme_widget_message_views")?,
            author: parse_selector(".tgme_widget_message_from_author")?,
            photo: parse_selector("a.tgme_widget_message_photo_wrap")?,
            video: parse_selector(".tgme_widget_message_video_player")?,
            video_duration: parse_selector("time.message_video_duration")?,
            voice: parse_selector(".tgme_widget_message_voice")?,
            voice_duration: parse_selector("time.tgme_widget_message_voice_duration")?,
            document: parse_selector(".tgme_widget_message_document")?,
            document_extra: parse_selector(".tgme_widget_message_document_extra")?,
            other_media: parse_selector(
                ".tgme_widget_message_sticker_wrap, .tgme_widget_message_roundvideo_player, \
                 .tgme_widget_message_poll, .tgme_widget_message_location_wrap",
            )?,
        })
    }
}

/// Provider backed by the public web preview.
pub struct WebPreviewProvider {
    client: Client,
    base_url: String,
    default_flood_wait: Duration,
    selectors: PreviewSelectors,
}

impl WebPreviewProvider {
    /// Create a provider from configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_flood_wait: Duration::from_secs(config.default_flood_wait_secs),
            selectors: PreviewSelectors::new()?,
        })
    }

    fn page_url(&self, channel: &str, before: Option<i64>) -> String {
        match before {
            Some(id) => format!("{}/s/{}?before={}", self.base_url, channel, id),
            None => format!("{}/s/{}", self.base_url, channel),
        }
    }

    /// Map a response status onto the provider error taxonomy.
    fn check_status(&self, response: &Response) -> ProviderResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(self.default_flood_wait);
            return Err(ProviderError::RateLimited { wait });
        }
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            return Err(ProviderError::transient(format!(
                "{} returned {}",
                response.url(),
                status
            )));
        }
        if status.is_client_error() {
            return Err(ProviderError::permanent(format!(
                "{} returned {}",
                response.url(),
                status
            )));
        }
        Err(ProviderError::transient(format!(
            "{} returned unexpected {}",
            response.url(),
            status
        )))
    }

    /// Parse one preview page into messages, newest first.
    fn parse_page(&self, html: &str) -> ProviderResult<Vec<ProviderMessage>> {
        let document = Html::parse_document(html);
        let sel = &self.selectors;

        let mut posts: Vec<ProviderMessage> = document
            .select(&sel.message)
            .filter_map(|el| self.parse_post(el))
            .collect();

        if posts.is_empty() && document.select(&sel.history).next().is_none() {
            return Err(ProviderError::permanent("page has no public message history"));
        }

        posts.sort_by(|a, b| b.id.cmp(&a.id));
        posts.dedup_by_key(|m| m.id);
        Ok(posts)
    }

    fn parse_post(&self, el: ElementRef<'_>) -> Option<ProviderMessage> {
        let sel = &self.selectors;
        let post = el.value().attr("data-post")?;
        let id: i64 = post.rsplit('/').next()?.parse().ok()?;

        let date_attr = el
            .select(&sel.date)
            .next()
            .and_then(|t| t.value().attr("datetime"));
        let date = date_attr
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&Utc));

        let text = el.select(&sel.text).next().map(element_text).unwrap_or_default();
        let views_text = el
            .select(&sel.views)
            .next()
            .map(|v| v.text().collect::<String>());
        let views = views_text.as_deref().and_then(parse_counter);
        let author = el
            .select(&sel.author)
            .next()
            .map(|a| a.text().collect::<String>().trim().to_string());

        let media = self.parse_media(el);

        let raw = json!({
            "post": post,
            "id": id,
            "date": date_attr,
            "text": text,
            "views": views_text,
            "author": author,
            "media": media.as_ref().map(|m| json!({
                "kind": m.info.kind,
                "url": m.url,
                "duration": m.info.duration,
            })),
            "html": el.html(),
        });

        Some(ProviderMessage {
            id,
            date,
            text,
            views,
            forwards: None,
            media,
            raw,
        })
    }

    fn parse_media(&self, el: ElementRef<'_>) -> Option<MediaAttachment> {
        let sel = &self.selectors;

        if let Some(photo) = el.select(&sel.photo).next() {
            let url = photo.value().attr("style").and_then(background_url);
            return Some(attachment(MediaKind::Photo, url, None));
        }
        if let Some(video) = el.select(&sel.video).next() {
            let duration = el
                .select(&sel.video_duration)
                .next()
                .and_then(|d| parse_duration(&d.text().collect::<String>()));
            let url = video.value().attr("href").map(str::to_string);
            return Some(attachment(MediaKind::Video, url, duration));
        }
        if el.select(&sel.voice).next().is_some() {
            let duration = el
                .select(&sel.voice_duration)
                .next()
                .and_then(|d| parse_duration(&d.text().collect::<String>()));
            return Some(attachment(MediaKind::Voice, None, duration));
        }
        if el.select(&sel.document).next().is_some() {
            let mut media = attachment(MediaKind::Document, None, None);
            media.info.size = el
                .select(&sel.document_extra)
                .next()
                .and_then(|d| parse_size(&d.text().collect::<String>()));
            return Some(media);
        }
        if el.select(&sel.other_media).next().is_some() {
            return Some(attachment(MediaKind::Other, None, None));
        }
        None
    }
}

#[async_trait]
impl MessageProvider for WebPreviewProvider {
    async fn list_messages(
        &self,
        channel: &str,
        min_id: i64,
        before: Option<i64>,
        limit: usize,
    ) -> ProviderResult<Vec<ProviderMessage>> {
        let url = self.page_url(channel, before);
        log::debug!("GET {url}");

        let response = self.client.get(&url).send().await?;
        if !response.url().path().starts_with("/s/") {
            return Err(ProviderError::permanent(format!(
                "@{channel} has no public preview (redirected to {})",
                response.url()
            )));
        }
        self.check_status(&response)?;
        let html = response.text().await?;

        let mut page = self.parse_page(&html)?;
        page.retain(|m| m.id > min_id && before.is_none_or(|b| m.id < b));
        page.truncate(limit);
        Ok(page)
    }

    async fn download_media(&self, media: &MediaAttachment, target: &Path) -> ProviderResult<()> {
        let Some(url) = media.url.as_deref() else {
            return Err(ProviderError::permanent("attachment has no download URL"));
        };

        let response = self.client.get(url).send().await?;
        self.check_status(&response)?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::transient(format!("empty body from {url}")));
        }

        write_file(target, &bytes)
            .await
            .map_err(|e| ProviderError::transient(format!("writing {}: {e}", target.display())))
    }
}

/// Write to a temp file next to `target`, then rename over it.
async fn write_file(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = target.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&tmp, target).await
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn attachment(kind: MediaKind, url: Option<String>, duration: Option<u32>) -> MediaAttachment {
    MediaAttachment {
        info: MediaInfo {
            kind,
            mime_type: None,
            duration,
            size: None,
        },
        url,
    }
}

/// Text of an element with `<br>` turned into newlines.
fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) if e.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Extract `X` from `background-image:url('X')`.
fn background_url(style: &str) -> Option<String> {
    let start = style.find("url(")? + "url(".len();
    let rest = style[start..].trim_start_matches(['\'', '"']);
    let end = rest.find(['\'', '"', ')'])?;
    let url = &rest[..end];
    (!url.is_empty()).then(|| url.to_string())
}

/// Parse view counters like `845`, `1.2K`, `3M`.
fn parse_counter(s: &str) -> Option<i64> {
    let s = s.trim();
    let (number, multiplier) = match s.chars().last()? {
        'K' | 'k' => (&s[..s.len() - 1], 1_000.0),
        'M' | 'm' => (&s[..s.len() - 1], 1_000_000.0),
        'B' | 'b' => (&s[..s.len() - 1], 1_000_000_000.0),
        _ => (s, 1.0),
    };
    let value: f64 = number.trim().replace(',', "").parse().ok()?;
    Some((value * multiplier).round() as i64)
}

/// Parse `m:ss` or `h:mm:ss` durations into seconds.
fn parse_duration(s: &str) -> Option<u32> {
    s.trim()
        .split(':')
        .try_fold(0u32, |acc, part| {
            acc.checked_mul(60)?.checked_add(part.parse::<u32>().ok()?)
        })
}

/// Parse document sizes like `1.2 MB` or `640 KB` into bytes.
fn parse_size(s: &str) -> Option<u64> {
    let mut parts = s.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let multiplier = match parts.next()?.to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" => 1024.0,
        "MB" => 1024.0 * 1024.0,
        "GB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

impl std::fmt::Debug for WebPreviewProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPreviewProvider")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<section class="tgme_channel_history js-message_history">
  <div class="tgme_widget_message_wrap">
    <div class="tgme_widget_message js-widget_message" data-post="TikvahPharma/101">
      <div class="tgme_widget_message_text js-message_text">First line<br/>second <b>bold</b></div>
      <div class="tgme_widget_message_footer">
        <span class="tgme_widget_message_views">1.2K</span>
        <a class="tgme_widget_message_date" href="https://t.me/TikvahPharma/101"><time datetime="2026-01-10T08:30:00+00:00">08:30</time></a>
      </div>
    </div>
  </div>
  <div class="tgme_widget_message_wrap">
    <div class="tgme_widget_message js-widget_message" data-post="TikvahPharma/102">
      <a class="tgme_widget_message_photo_wrap" href="https://t.me/TikvahPharma/102" style="width:800px;background-image:url('https://cdn.example/file/abc.jpg')"></a>
      <div class="tgme_widget_message_footer">
        <span class="tgme_widget_message_views">845</span>
        <a class="tgme_widget_message_date"><time datetime="2026-01-11T09:00:00+03:00">09:00</time></a>
      </div>
    </div>
  </div>
  <div class="tgme_widget_message_wrap">
    <div class="tgme_widget_message js-widget_message" data-post="TikvahPharma/103">
      <a class="tgme_widget_message_video_player" href="https://t.me/TikvahPharma/103"><time class="message_video_duration">1:05</time></a>
    </div>
  </div>
</section>
</body></html>
"#;

    fn provider() -> WebPreviewProvider {
        WebPreviewProvider::new(&ProviderConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_page_newest_first() {
        let messages = provider().parse_page(PAGE).unwrap();
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![103, 102, 101]);
    }

    #[test]
    fn test_parse_text_views_and_date() {
        let messages = provider().parse_page(PAGE).unwrap();
        let first = messages.iter().find(|m| m.id == 101).unwrap();

        assert_eq!(first.text, "First line\nsecond bold");
        assert_eq!(first.views, Some(1_200));
        assert_eq!(first.date.unwrap().to_rfc3339(), "2026-01-10T08:30:00+00:00");
        assert!(first.media.is_none());
        assert_eq!(first.raw["post"], "TikvahPharma/101");
        assert!(first.raw["html"].as_str().unwrap().contains("First line"));
    }

    #[test]
    fn test_parse_photo_and_video() {
        let messages = provider().parse_page(PAGE).unwrap();

        let photo = messages.iter().find(|m| m.id == 102).unwrap();
        let media = photo.media.as_ref().unwrap();
        assert!(media.is_photo());
        assert_eq!(media.url.as_deref(), Some("https://cdn.example/file/abc.jpg"));
        // 09:00+03:00 is 06:00 UTC
        assert_eq!(photo.date.unwrap().to_rfc3339(), "2026-01-11T06:00:00+00:00");

        let video = messages.iter().find(|m| m.id == 103).unwrap();
        let media = video.media.as_ref().unwrap();
        assert_eq!(media.info.kind, MediaKind::Video);
        assert_eq!(media.info.duration, Some(65));
        assert!(video.date.is_none());
    }

    #[test]
    fn test_page_without_history_is_permanent() {
        let err = provider()
            .parse_page("<html><body><div class=\"tgme_page\">Join</div></body></html>")
            .unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }

    #[test]
    fn test_empty_history_is_ok() {
        let html = r#"<section class="tgme_channel_history"></section>"#;
        assert!(provider().parse_page(html).unwrap().is_empty());
    }

    #[test]
    fn test_page_url() {
        let p = provider();
        assert_eq!(p.page_url("chan", None), "https://t.me/s/chan");
        assert_eq!(p.page_url("chan", Some(50)), "https://t.me/s/chan?before=50");
    }

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("845"), Some(845));
        assert_eq!(parse_counter("1.2K"), Some(1_200));
        assert_eq!(parse_counter(" 3M "), Some(3_000_000));
        assert_eq!(parse_counter("1,024"), Some(1_024));
        assert_eq!(parse_counter("n/a"), None);
        assert_eq!(parse_counter(""), None);
    }

    #[test]
    fn test_parse_duration_and_size() {
        assert_eq!(parse_duration("0:15"), Some(15));
        assert_eq!(parse_duration("1:02:03"), Some(3_723));
        assert_eq!(parse_duration("x"), None);
        assert_eq!(parse_duration("99999999:00"), None);
        assert_eq!(parse_duration("1:00:00:00:00:00:00"), None);
        assert_eq!(parse_size("640 KB"), Some(655_360));
        assert_eq!(parse_size("2 MB"), Some(2_097_152));
        assert_eq!(parse_size("big"), None);
    }

    #[test]
    fn test_background_url() {
        assert_eq!(
            background_url("width:1px;background-image:url('https://x/y.jpg')").as_deref(),
            Some("https://x/y.jpg")
        );
        assert_eq!(
            background_url("background-image:url(\"https://x/z.jpg\")").as_deref(),
            Some("https://x/z.jpg")
        );
        assert_eq!(background_url("color:red"), None);
    }
}
