//! Storage abstractions for the local data lake.
//!
//! ## Directory Structure
//!
//! ```text
//! {root}/
//! └── data/raw/
//!     ├── scrape_state.json            # Watermarks
//!     ├── telegram_messages/
//!     │   └── YYYY-MM-DD/<channel>.json  # Day partitions
//!     ├── csv/
//!     │   └── YYYY-MM-DD/<channel>.csv   # Partition mirrors
//!     └── images/<channel>/<id>.jpg
//! ```

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{StoredMessage, Watermarks};

pub use local::LocalStorage;

/// Persistence for per-channel watermarks.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Load all watermarks. A missing or corrupt state file yields an
    /// empty set; this never fails.
    async fn load_watermarks(&self) -> Watermarks;

    /// Persist all watermarks atomically.
    async fn save_watermarks(&self, marks: &Watermarks) -> Result<()>;
}

/// Persistence for day partitions.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Entries currently stored for `(day, channel)`.
    ///
    /// Missing or unreadable files yield an empty list. Entries without a
    /// usable `message_id` are skipped; every other entry is kept as-is.
    async fn load_partition(&self, day: &str, channel: &str) -> Vec<StoredMessage>;

    /// Replace the partition for `(day, channel)` atomically.
    async fn write_partition(
        &self,
        day: &str,
        channel: &str,
        records: &[StoredMessage],
    ) -> Result<()>;

    /// Regenerate the CSV mirror of a partition.
    async fn write_csv_mirror(
        &self,
        day: &str,
        channel: &str,
        records: &[StoredMessage],
    ) -> Result<()>;
}
