//! Per-channel watermarks for incremental fetching.
//!
//! ## Stored format
//!
//! ```json
//! {
//!   "channels": {
//!     "tikvahpharma": { "last_message_id": 12345, "updated_at": "2026-01-01T00:00:00Z" }
//!   }
//! }
//! ```
//!
//! Older state files stored the value as a bare integer, a numeric string,
//! or an object using a different key for the id. All of those are read
//! through `StoredWatermark` and normalized to an `i64` on the spot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::channel::normalize_channel;

/// A message id as found in a state file: a number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredId {
    Int(i64),
    Float(f64),
    Text(String),
}

impl StoredId {
    fn to_id(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.is_finite() && *f >= 0.0 => Some(*f as i64),
            Self::Float(_) => None,
            Self::Text(s) if s.trim().is_empty() => Some(0),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Every shape a channel's watermark has been stored in.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredWatermark {
    Id(StoredId),
    Entry {
        #[serde(default)]
        last_message_id: Option<StoredId>,
        #[serde(default)]
        last_id: Option<StoredId>,
        #[serde(default)]
        message_id: Option<StoredId>,
        #[serde(default)]
        id: Option<StoredId>,
        #[serde(default)]
        updated_at: Option<Value>,
    },
}

impl StoredWatermark {
    fn normalize(self) -> Option<Watermark> {
        match self {
            Self::Id(id) => Some(Watermark {
                last_message_id: id.to_id()?,
                updated_at: None,
            }),
            Self::Entry {
                last_message_id,
                last_id,
                message_id,
                id,
                updated_at,
            } => {
                let id = [last_message_id, last_id, message_id, id]
                    .into_iter()
                    .flatten()
                    .find_map(|candidate| candidate.to_id())?;
                Some(Watermark {
                    last_message_id: id,
                    updated_at: updated_at
                        .as_ref()
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok()),
                })
            }
        }
    }
}

/// Highest processed message id for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub last_message_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Channel → watermark mapping, loaded once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    #[serde(default)]
    pub channels: BTreeMap<String, Watermark>,
}

impl Watermarks {
    /// Parse a state document, skipping entries that cannot be understood.
    ///
    /// Accepts both the `{"channels": {...}}` wrapper and a bare top-level
    /// mapping. Anything that is not a JSON object yields an empty set.
    /// Channel names are normalized; when several stored names map to the
    /// same channel the highest id wins.
    pub fn from_value(value: Value) -> Self {
        let map = match value {
            Value::Object(mut obj) => match obj.remove("channels") {
                Some(Value::Object(inner)) => inner,
                Some(_) => serde_json::Map::new(),
                None => obj,
            },
            _ => serde_json::Map::new(),
        };

        let mut channels = BTreeMap::new();
        for (name, raw) in map {
            let parsed = match raw {
                Value::Number(_) | Value::String(_) | Value::Object(_) => {
                    serde_json::from_value::<StoredWatermark>(raw)
                        .ok()
                        .and_then(StoredWatermark::normalize)
                }
                _ => None,
            };
            let key = normalize_channel(&name);
            match parsed {
                Some(_) if key.is_empty() => {
                    log::warn!("Ignoring watermark with unusable channel name {name:?}")
                }
                Some(mark) => {
                    let keep = channels
                        .get(&key)
                        .is_none_or(|held: &Watermark| mark.last_message_id > held.last_message_id);
                    if keep {
                        channels.insert(key, mark);
                    }
                }
                None => log::warn!("Ignoring unreadable watermark for channel {name}"),
            }
        }
        Self { channels }
    }

    /// Last processed id for `channel`, 0 when never fetched.
    pub fn get(&self, channel: &str) -> i64 {
        self.channels
            .get(channel)
            .map(|m| m.last_message_id)
            .unwrap_or(0)
    }

    /// Move `channel` forward to `candidate`.
    ///
    /// Only a strictly greater id is accepted; returns whether the stored
    /// value changed.
    pub fn advance(&mut self, channel: &str, candidate: i64, now: DateTime<Utc>) -> bool {
        if candidate <= self.get(channel) {
            return false;
        }
        self.channels.insert(
            channel.to_string(),
            Watermark {
                last_message_id: candidate,
                updated_at: Some(now),
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
