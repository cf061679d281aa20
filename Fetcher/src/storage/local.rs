//! Local filesystem storage implementation.
//!
//! All keys are relative to the project root; every write goes through a
//! temporary file followed by a rename so readers never see a torn file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{PathsConfig, StoredMessage, Watermarks};
use crate::storage::{PartitionStore, WatermarkStore};

/// One row of a partition's CSV mirror.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    channel: &'a str,
    message_id: i64,
    date: &'a str,
    text: &'a str,
    has_media: bool,
    media_path: &'a str,
}

impl<'a> From<&'a StoredMessage> for CsvRow<'a> {
    fn from(entry: &'a StoredMessage) -> Self {
        Self {
            channel: entry.str_field("channel"),
            message_id: entry.message_id,
            date: entry.str_field("date"),
            text: entry.str_field("text"),
            has_media: entry.bool_field("has_media"),
            media_path: entry.str_field("media_path"),
        }
    }
}

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    paths: PathsConfig,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given project directory.
    pub fn new(root_dir: impl Into<PathBuf>, paths: PathsConfig) -> Self {
        Self {
            root_dir: root_dir.into(),
            paths,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    pub fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn partition_key(&self, day: &str, channel: &str) -> String {
        format!("{}/{}/{}.json", self.paths.messages_dir, day, channel)
    }

    fn csv_key(&self, day: &str, channel: &str) -> String {
        format!("{}/{}/{}.csv", self.paths.csv_dir, day, channel)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WatermarkStore for LocalStorage {
    async fn load_watermarks(&self) -> Watermarks {
        let key = &self.paths.state_file;
        match self.read_json::<Value>(key).await {
            Ok(Some(value)) => {
                let marks = Watermarks::from_value(value);
                log::debug!("Loaded {} watermarks from {}", marks.len(), key);
                marks
            }
            Ok(None) => {
                log::info!("No state file at {key}; starting fresh");
                Watermarks::default()
            }
            Err(e) => {
                log::warn!("Unreadable state file {key}: {e}; starting fresh");
                Watermarks::default()
            }
        }
    }

    async fn save_watermarks(&self, marks: &Watermarks) -> Result<()> {
        self.write_json(&self.paths.state_file, marks).await
    }
}

#[async_trait]
impl PartitionStore for LocalStorage {
    async fn load_partition(&self, day: &str, channel: &str) -> Vec<StoredMessage> {
        let key = self.partition_key(day, channel);
        let entries = match self.read_json::<Value>(&key).await {
            Ok(Some(Value::Array(entries))) => entries,
            Ok(Some(_)) => {
                log::warn!("Partition {key} is not a JSON array; treating as empty");
                return Vec::new();
            }
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Unreadable partition {key}: {e}; treating as empty");
                return Vec::new();
            }
        };

        let total = entries.len();
        let records: Vec<StoredMessage> = entries
            .into_iter()
            .filter_map(StoredMessage::from_value)
            .collect();
        if records.len() < total {
            log::warn!(
                "Skipped {} entries without a message_id in {}",
                total - records.len(),
                key
            );
        }
        records
    }

    async fn write_partition(
        &self,
        day: &str,
        channel: &str,
        records: &[StoredMessage],
    ) -> Result<()> {
        let key = self.partition_key(day, channel);
        self.write_json(&key, records).await?;
        log::debug!("{} records written to {}", records.len(), key);
        Ok(())
    }

    async fn write_csv_mirror(
        &self,
        day: &str,
        channel: &str,
        records: &[StoredMessage],
    ) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            writer.serialize(CsvRow::from(record))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Io(e.into_error()))?;

        self.write_bytes(&self.csv_key(day, channel), &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::models::MessageRecord;

    fn storage(tmp: &TempDir) -> LocalStorage {
        LocalStorage::new(tmp.path(), PathsConfig::default())
    }

    fn record(id: i64, text: &str) -> MessageRecord {
        MessageRecord::from_value(json!({
            "channel": "chemed123",
            "message_id": id,
            "date": "2026-03-01T08:30:00Z",
            "text": text,
        }))
        .unwrap()
    }

    fn stored(record: &MessageRecord) -> StoredMessage {
        StoredMessage::from_record(record).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!storage.path("test.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_watermarks_missing_or_corrupt_load_empty() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        assert!(storage.load_watermarks().await.is_empty());

        let state = storage.path(&PathsConfig::default().state_file);
        std::fs::create_dir_all(state.parent().unwrap()).unwrap();
        std::fs::write(&state, "{ not json").unwrap();
        assert!(storage.load_watermarks().await.is_empty());
    }

    #[tokio::test]
    async fn test_watermarks_round_trip() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        let mut marks = Watermarks::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        marks.advance("chemed123", 120, now);
        marks.advance("tikvahpharma", 7, now);
        storage.save_watermarks(&marks).await.unwrap();

        let loaded = storage.load_watermarks().await;
        assert_eq!(loaded, marks);
        assert_eq!(loaded.get("chemed123"), 120);
    }

    #[tokio::test]
    async fn test_legacy_state_file_is_readable() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        let state = storage.path(&PathsConfig::default().state_file);
        std::fs::create_dir_all(state.parent().unwrap()).unwrap();
        std::fs::write(&state, r#"{"chemed123": "55", "tikvahpharma": {"last_id": 9}}"#).unwrap();

        let loaded = storage.load_watermarks().await;
        assert_eq!(loaded.get("chemed123"), 55);
        assert_eq!(loaded.get("tikvahpharma"), 9);
    }

    #[tokio::test]
    async fn test_partition_round_trip() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        let records = vec![stored(&record(1, "a")), stored(&record(2, "b"))];
        storage
            .write_partition("2026-03-01", "chemed123", &records)
            .await
            .unwrap();

        let loaded = storage.load_partition("2026-03-01", "chemed123").await;
        assert_eq!(loaded, records);
        assert!(
            storage
                .path("data/raw/telegram_messages/2026-03-01/chemed123.json")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_partition_tolerates_bad_content() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        let dir = storage.path("data/raw/telegram_messages/2026-03-01");
        std::fs::create_dir_all(&dir).unwrap();

        std::fs::write(dir.join("broken.json"), "[{").unwrap();
        assert!(storage.load_partition("2026-03-01", "broken").await.is_empty());

        std::fs::write(dir.join("object.json"), r#"{"message_id": 1}"#).unwrap();
        assert!(storage.load_partition("2026-03-01", "object").await.is_empty());

        std::fs::write(
            dir.join("mixed.json"),
            r#"[{"message_id": 1, "text": "ok"}, {"text": "no id"}, 42, {"message_id": "3"}]"#,
        )
        .unwrap();
        let loaded = storage.load_partition("2026-03-01", "mixed").await;
        let ids: Vec<i64> = loaded.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_partition_keeps_entries_with_odd_fields() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);
        let dir = storage.path("data/raw/telegram_messages/2026-03-01");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("chemed123.json"),
            r#"[
                {"message_id": 1, "media": {"kind": "video", "duration": 12.5}},
                {"message_id": 2, "channel": null},
                {"message_id": 4, "date": "01/03/2026 08:30"}
            ]"#,
        )
        .unwrap();

        let loaded = storage.load_partition("2026-03-01", "chemed123").await;
        let ids: Vec<i64> = loaded.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
        assert_eq!(loaded[0].get("media").unwrap()["duration"], json!(12.5));
        assert_eq!(loaded[2].str_field("date"), "01/03/2026 08:30");
    }

    #[tokio::test]
    async fn test_csv_mirror_columns() {
        let tmp = TempDir::new().unwrap();
        let storage = storage(&tmp);

        let mut with_media = record(2, "line one\nline two");
        with_media.has_media = true;
        with_media.media_path = Some("data/raw/images/chemed123/2.jpg".to_string());
        let records = vec![stored(&record(1, "plain")), stored(&with_media)];

        storage
            .write_csv_mirror("2026-03-01", "chemed123", &records)
            .await
            .unwrap();

        let csv = std::fs::read_to_string(storage.path("data/raw/csv/2026-03-01/chemed123.csv"))
            .unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("channel,message_id,date,text,has_media,media_path")
        );
        assert_eq!(
            lines.next(),
            Some("chemed123,1,2026-03-01T08:30:00Z,plain,false,")
        );
        assert!(csv.contains("\"line one\nline two\",true,data/raw/images/chemed123/2.jpg"));
    }
}
