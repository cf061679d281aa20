// src/services/warehouse.rs

//! Partition discovery and row extraction for the warehouse loader.
//!
//! Partition files come in several generations: the current record format,
//! older scraper output with a Telethon-style `raw` payload, and hand-made
//! dumps. Every typed column therefore has a chain of fallbacks, and the
//! full entry is always kept as `payload`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// A JSON file found under the data lake directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFile {
    /// Day taken from the parent directory name, for `YYYY-MM-DD/*.json`
    pub partition_date: Option<NaiveDate>,
    pub path: PathBuf,
}

/// Typed columns of one `raw.telegram_messages` row.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseRow {
    pub channel_username: String,
    pub message_id: i64,
    pub channel_title: Option<String>,
    pub message_ts: Option<DateTime<Utc>>,
    pub message_text: Option<String>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    pub reply_count: Option<i64>,
    pub has_media: Option<bool>,
    pub has_image: Option<bool>,
    pub media_type: Option<String>,
    pub media_path: Option<String>,
    pub partition_date: Option<NaiveDate>,
    pub source_file: String,
    /// The full entry, unchanged
    pub payload: Value,
}

/// List the JSON files to load: day directories in sorted order (files
/// sorted within each), then loose `*.json` files at the top level.
pub async fn find_partition_files(data_lake_dir: &Path) -> Result<Vec<PartitionFile>> {
    if !tokio::fs::try_exists(data_lake_dir).await? {
        return Err(AppError::config(format!(
            "data lake directory not found: {}",
            data_lake_dir.display()
        )));
    }

    let (dirs, loose) = list_dir(data_lake_dir).await?;

    let mut files = Vec::new();
    for dir in dirs {
        let partition_date = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_partition_date);
        let (_, inside) = list_dir(&dir).await?;
        files.extend(inside.into_iter().map(|path| PartitionFile {
            partition_date,
            path,
        }));
    }
    files.extend(loose.into_iter().map(|path| PartitionFile {
        partition_date: None,
        path,
    }));
    Ok(files)
}

/// Sorted subdirectories and `*.json` files of `dir`.
async fn list_dir(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut dirs = Vec::new();
    let mut json_files = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            dirs.push(path);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            json_files.push(path);
        }
    }
    dirs.sort();
    json_files.sort();
    Ok((dirs, json_files))
}

fn parse_partition_date(name: &str) -> Option<NaiveDate> {
    let pattern = Regex::new(r"^\d{4}-\d{2}-\d{2}$").ok()?;
    if !pattern.is_match(name) {
        return None;
    }
    NaiveDate::parse_from_str(name, "%Y-%m-%d").ok()
}

/// Messages held by a partition file: a list, a `{"messages": [...]}`
/// wrapper, or a single object. Non-object entries are dropped.
pub fn normalize_messages(value: Value) -> Vec<Map<String, Value>> {
    let objects = |items: Vec<Value>| {
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(obj) => Some(obj),
                _ => None,
            })
            .collect()
    };

    match value {
        Value::Array(items) => objects(items),
        Value::Object(mut obj) => match obj.remove("messages") {
            Some(Value::Array(items)) => objects(items),
            Some(other) => {
                obj.insert("messages".to_string(), other);
                vec![obj]
            }
            None => vec![obj],
        },
        _ => Vec::new(),
    }
}

/// Build a row from one message entry.
///
/// The channel falls back to the file stem. Entries without a channel or
/// a message id yield `None`.
pub fn make_row(
    msg: Map<String, Value>,
    partition_date: Option<NaiveDate>,
    source_file: &Path,
) -> Option<WarehouseRow> {
    let channel_username = extract_channel_username(&msg).or_else(|| {
        source_file
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.trim().trim_start_matches('@').to_string())
            .filter(|s| !s.is_empty())
    })?;
    let message_id = extract_message_id(&msg)?;
    let (has_media, has_image, media_type) = extract_media_flags(&msg);

    Some(WarehouseRow {
        channel_username,
        message_id,
        channel_title: extract_channel_title(&msg),
        message_ts: extract_timestamp(&msg),
        message_text: extract_text(&msg),
        views: raw_or_top_int(&msg, "views"),
        forwards: raw_or_top_int(&msg, "forwards"),
        reply_count: extract_reply_count(&msg),
        has_media,
        has_image,
        media_type,
        media_path: msg.get("media_path").and_then(non_empty_str),
        partition_date,
        source_file: source_file.display().to_string(),
        payload: Value::Object(msg),
    })
}

fn raw(msg: &Map<String, Value>) -> Option<&Map<String, Value>> {
    msg.get("raw").and_then(Value::as_object)
}

fn non_empty_str(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn username(value: &Value) -> Option<String> {
    non_empty_str(value).map(|s| s.trim_start_matches('@').to_string())
}

/// Integer from a number, a boolean, or a numeric string (`"1,234"` too).
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse().ok().or_else(|| s.replace(',', "").parse().ok())
        }
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Some(true),
            "false" | "f" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Timestamp from RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`, or Unix
/// seconds. Naive values are taken as UTC.
fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => Utc.timestamp_opt(n.as_f64()? as i64, 0).single(),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt.and_utc());
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
        }
        _ => None,
    }
}

fn extract_channel_username(msg: &Map<String, Value>) -> Option<String> {
    ["channel", "channel_username", "chat_username", "username"]
        .iter()
        .find_map(|key| msg.get(*key).and_then(username))
        .or_else(|| {
            raw(msg)?
                .get("chat")?
                .get("username")
                .and_then(username)
        })
}

fn extract_channel_title(msg: &Map<String, Value>) -> Option<String> {
    ["channel_title", "chat_title", "title"]
        .iter()
        .find_map(|key| msg.get(*key).and_then(non_empty_str))
        .or_else(|| raw(msg)?.get("chat")?.get("title").and_then(non_empty_str))
}

fn extract_message_id(msg: &Map<String, Value>) -> Option<i64> {
    msg.get("message_id")
        .and_then(as_int)
        .or_else(|| raw(msg)?.get("id").and_then(as_int))
        .or_else(|| {
            ["id", "msg_id"]
                .iter()
                .find_map(|key| msg.get(*key).and_then(as_int))
        })
}

fn extract_timestamp(msg: &Map<String, Value>) -> Option<DateTime<Utc>> {
    msg.get("date")
        .and_then(as_timestamp)
        .or_else(|| raw(msg)?.get("date").and_then(as_timestamp))
}

fn extract_text(msg: &Map<String, Value>) -> Option<String> {
    let trimmed = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    if let Some(text) = msg.get("text").and_then(Value::as_str) {
        return trimmed(text);
    }
    if let Some(text) = raw(msg).and_then(|r| r.get("message")).and_then(Value::as_str) {
        return trimmed(text);
    }
    ["message", "caption"]
        .iter()
        .find_map(|key| msg.get(*key).and_then(Value::as_str))
        .and_then(trimmed)
}

fn raw_or_top_int(msg: &Map<String, Value>, key: &str) -> Option<i64> {
    raw(msg)
        .and_then(|r| r.get(key))
        .and_then(as_int)
        .or_else(|| msg.get(key).and_then(as_int))
}

fn extract_reply_count(msg: &Map<String, Value>) -> Option<i64> {
    let from_raw = raw(msg)
        .and_then(|r| r.get("replies"))
        .and_then(Value::as_object)
        .and_then(|replies| {
            replies
                .get("replies")
                .and_then(as_int)
                .filter(|n| *n != 0)
                .or_else(|| replies.get("count").and_then(as_int))
        });
    from_raw.or_else(|| {
        ["reply_count", "replies_count"]
            .iter()
            .find_map(|key| msg.get(*key).and_then(as_int))
    })
}

/// `(has_media, has_image, media_type)`.
///
/// The media type comes from a Telethon `raw.media._` tag when present,
/// otherwise from the record's own `media.kind`.
fn extract_media_flags(msg: &Map<String, Value>) -> (Option<bool>, Option<bool>, Option<String>) {
    let mut has_media = msg.get("has_media").and_then(as_bool);
    let raw_media = raw(msg).and_then(|r| r.get("media")).filter(|m| !m.is_null());

    let media_type = raw_media
        .and_then(|m| m.get("_"))
        .and_then(non_empty_str)
        .or_else(|| {
            msg.get("media")
                .and_then(|m| m.get("kind"))
                .and_then(non_empty_str)
        });

    let has_image = media_type.as_deref().map(|kind| match kind {
        "MessageMediaDocument" | "MessageMediaWebPage" => false,
        "photo" => true,
        other => other.contains("Photo"),
    });

    if has_media.is_none() && raw_media.is_some() {
        has_media = Some(true);
    }
    if has_media.is_none() && msg.get("media_path").and_then(non_empty_str).is_some() {
        has_media = Some(true);
    }

    (has_media, has_image, media_type)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(obj) => obj,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_normalize_messages_shapes() {
        assert_eq!(normalize_messages(json!([{"a": 1}, 2, {"b": 2}])).len(), 2);
        assert_eq!(normalize_messages(json!({"messages": [{"a": 1}]})).len(), 1);
        assert_eq!(normalize_messages(json!({"message_id": 1})).len(), 1);
        assert!(normalize_messages(json!("text")).is_empty());
        assert!(normalize_messages(Value::Null).is_empty());
    }

    #[test]
    fn test_row_from_current_record_format() {
        let msg = obj(json!({
            "channel": "tikvahpharma",
            "message_id": 42,
            "date": "2026-03-01T08:30:00Z",
            "text": "  Paracetamol in stock  ",
            "views": 1200,
            "forwards": null,
            "has_media": true,
            "media": {"kind": "photo"},
            "media_path": "data/raw/images/tikvahpharma/42.jpg",
            "raw": {"id": 42, "html": "<div></div>"}
        }));
        let day = NaiveDate::from_ymd_opt(2026, 3, 1);
        let row = make_row(msg, day, Path::new("lake/2026-03-01/tikvahpharma.json")).unwrap();

        assert_eq!(row.channel_username, "tikvahpharma");
        assert_eq!(row.message_id, 42);
        assert_eq!(
            row.message_ts,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap())
        );
        assert_eq!(row.message_text.as_deref(), Some("Paracetamol in stock"));
        assert_eq!(row.views, Some(1200));
        assert_eq!(row.forwards, None);
        assert_eq!(row.has_media, Some(true));
        assert_eq!(row.has_image, Some(true));
        assert_eq!(row.media_type.as_deref(), Some("photo"));
        assert_eq!(row.partition_date, day);
        assert_eq!(row.payload["raw"]["html"], json!("<div></div>"));
    }

    #[test]
    fn test_row_from_telethon_style_payload() {
        let msg = obj(json!({
            "id": "1,234",
            "raw": {
                "chat": {"username": "@CheMed123", "title": "CheMed"},
                "date": "2026-02-01 10:00:00",
                "message": "from raw",
                "views": "77",
                "forwards": 3,
                "replies": {"replies": 0, "count": 5},
                "media": {"_": "MessageMediaDocument"}
            }
        }));
        let row = make_row(msg, None, Path::new("lake/chemed.json")).unwrap();

        assert_eq!(row.channel_username, "CheMed123");
        assert_eq!(row.channel_title.as_deref(), Some("CheMed"));
        assert_eq!(row.message_id, 1234);
        assert_eq!(
            row.message_ts,
            Some(Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(row.message_text.as_deref(), Some("from raw"));
        assert_eq!(row.views, Some(77));
        assert_eq!(row.forwards, Some(3));
        assert_eq!(row.reply_count, Some(5));
        assert_eq!(row.has_media, Some(true));
        assert_eq!(row.has_image, Some(false));
    }

    #[test]
    fn test_channel_falls_back_to_file_stem() {
        let row = make_row(
            obj(json!({"message_id": "9"})),
            None,
            Path::new("lake/2026-01-01/@lobelia4cosmetics.json"),
        )
        .unwrap();
        assert_eq!(row.channel_username, "lobelia4cosmetics");
        assert_eq!(row.message_id, 9);
        assert_eq!(row.has_media, None);
    }

    #[test]
    fn test_rows_without_id_are_skipped() {
        assert!(make_row(obj(json!({"text": "x"})), None, Path::new("c.json")).is_none());
    }

    #[test]
    fn test_partition_date_requires_exact_day_name() {
        assert_eq!(
            parse_partition_date("2026-03-01"),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(parse_partition_date("2026-13-01"), None);
        assert_eq!(parse_partition_date("backup-2026-03-01"), None);
    }

    #[tokio::test]
    async fn test_find_partition_files_order() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        for (dir, file) in [
            ("2026-03-02", "b.json"),
            ("2026-03-01", "z.json"),
            ("2026-03-01", "a.json"),
            ("misc", "m.json"),
        ] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
            std::fs::write(root.join(dir).join(file), "[]").unwrap();
        }
        std::fs::write(root.join("2026-03-01").join("notes.txt"), "").unwrap();
        std::fs::write(root.join("loose.json"), "[]").unwrap();

        let files = find_partition_files(root).await.unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| {
                f.path
                    .strip_prefix(root)
                    .unwrap()
                    .display()
                    .to_string()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "2026-03-01/a.json",
                "2026-03-01/z.json",
                "2026-03-02/b.json",
                "misc/m.json",
                "loose.json"
            ]
        );
        assert_eq!(files[0].partition_date, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(files[3].partition_date, None);
    }

    #[tokio::test]
    async fn test_missing_data_lake_dir_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(find_partition_files(&tmp.path().join("nope")).await.is_err());
    }
}
