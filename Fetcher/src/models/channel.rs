//! Channel identifiers and the channel list.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Prefixes stripped from channel references, checked in order.
const URL_PREFIXES: &[&str] = &["https://", "http://"];
const HOST_PREFIXES: &[&str] = &["t.me/", "telegram.me/", "www.t.me/"];

/// Normalize a channel reference (`@Name`, `https://t.me/name`,
/// `t.me/s/name?x=1`) into the bare lowercase username.
///
/// Returns an empty string when nothing usable is left.
pub fn normalize_channel(input: &str) -> String {
    let mut name = input.trim();

    for prefix in URL_PREFIXES {
        if let Some(rest) = strip_prefix_ignore_case(name, prefix) {
            name = rest;
            break;
        }
    }
    for prefix in HOST_PREFIXES {
        if let Some(rest) = strip_prefix_ignore_case(name, prefix) {
            name = rest;
            break;
        }
    }
    if let Some(rest) = name.strip_prefix("s/") {
        name = rest;
    }

    let name = name.split(['?', '#']).next().unwrap_or_default();
    let name = name.trim_matches('/').trim_start_matches('@');

    name.trim().to_lowercase()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Parse a channels file: one channel per line, `#` comments and blank
/// lines ignored.
pub fn parse_channel_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Build the ordered, deduplicated list of channels to scrape.
///
/// `defaults` come first, then the entries of `channels_file` if it exists.
/// An unreadable file is logged and ignored.
pub fn load_channels(defaults: &[String], channels_file: &Path) -> Vec<String> {
    let mut raw: Vec<String> = defaults.to_vec();

    if channels_file.exists() {
        match fs::read_to_string(channels_file) {
            Ok(text) => {
                let extra = parse_channel_lines(&text);
                log::info!(
                    "Loaded {} additional channels from {}",
                    extra.len(),
                    channels_file.display()
                );
                raw.extend(extra);
            }
            Err(e) => log::error!(
                "Failed reading channels file {}: {}",
                channels_file.display(),
                e
            ),
        }
    }

    dedupe_channels(raw)
}

/// Normalize, drop empties and deduplicate while keeping first-seen order.
pub fn dedupe_channels<I, S>(channels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    channels
        .into_iter()
        .map(|c| normalize_channel(c.as_ref()))
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
