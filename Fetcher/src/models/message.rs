//! Message record stored in day partitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Kind of attachment carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Voice,
    Document,
    Other,
}

/// Small media summary kept next to the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub kind: MediaKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Duration in seconds (video, voice)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A normalized message, one entry of a day partition.
///
/// Identity is `(channel, message_id)`. Keys this version does not know
/// about are kept in `extra` so rewriting an older partition never drops
/// data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub channel: String,

    pub message_id: i64,

    #[serde(default)]
    pub date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub views: Option<i64>,

    #[serde(default)]
    pub forwards: Option<i64>,

    #[serde(default)]
    pub has_media: bool,

    #[serde(default)]
    pub media: Option<MediaInfo>,

    /// Downloaded file, relative to the project root
    #[serde(default)]
    pub media_path: Option<String>,

    /// Provider payload, preserved as-is
    #[serde(default)]
    pub raw: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageRecord {
    /// Read a record from an arbitrary JSON entry.
    ///
    /// Returns `None` for entries without a usable `message_id`. Older
    /// partitions sometimes hold the id as a numeric string; it is
    /// normalized before deserializing.
    pub fn from_value(mut value: Value) -> Option<Self> {
        let obj = value.as_object_mut()?;
        let id = read_id(obj.get("message_id")?)?;
        obj.insert("message_id".into(), Value::from(id));
        serde_json::from_value(value).ok()
    }

    /// UTC calendar day used as the partition key.
    pub fn partition_day(&self, today: DateTime<Utc>) -> String {
        self.date
            .unwrap_or(today)
            .format("%Y-%m-%d")
            .to_string()
    }
}

fn read_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A partition entry as it sits on disk.
///
/// Only the id is interpreted. The rest of the object is carried verbatim,
/// so entries whose fields no longer fit [`MessageRecord`] (fractional
/// durations, null channels, free-form dates) survive a rewrite untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub message_id: i64,
    fields: Map<String, Value>,
}

impl StoredMessage {
    /// Returns `None` only for non-objects and entries without a usable id.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let message_id = read_id(fields.get("message_id")?)?;
        fields.insert("message_id".into(), Value::from(message_id));
        Some(Self { message_id, fields })
    }

    pub fn from_record(record: &MessageRecord) -> Result<Self> {
        Self::from_value(serde_json::to_value(record)?).ok_or_else(|| {
            AppError::validation(format!(
                "message {} did not serialize to an object",
                record.message_id
            ))
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String field, empty when missing or not a string.
    pub fn str_field(&self, key: &str) -> &str {
        self.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn bool_field(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

impl Serialize for StoredMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}
