// src/pipeline/merge.rs

//! Merging fetched records into day partitions.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{MessageRecord, StoredMessage};
use crate::storage::PartitionStore;

/// Upsert `incoming` into `existing` by message id.
///
/// Incoming records replace stored ones with the same id; stored entries
/// the run did not touch are kept verbatim. The result is sorted ascending
/// by id with no duplicates.
pub fn merge_records(
    existing: Vec<StoredMessage>,
    incoming: Vec<MessageRecord>,
) -> Result<Vec<StoredMessage>> {
    let mut by_id: BTreeMap<i64, StoredMessage> = existing
        .into_iter()
        .map(|entry| (entry.message_id, entry))
        .collect();
    for record in &incoming {
        by_id.insert(record.message_id, StoredMessage::from_record(record)?);
    }
    Ok(by_id.into_values().collect())
}

/// Merge a channel's fetched partitions into the store.
///
/// Days without records are not touched. A failed CSV mirror is logged;
/// the JSON partition is the source of truth. Returns the number of
/// partitions written.
pub async fn merge_partitions(
    store: &dyn PartitionStore,
    channel: &str,
    partitions: BTreeMap<String, Vec<MessageRecord>>,
    csv_mirror: bool,
) -> Result<usize> {
    let mut written = 0;
    for (day, incoming) in partitions {
        if incoming.is_empty() {
            continue;
        }

        let existing = store.load_partition(&day, channel).await;
        let before = existing.len();
        let merged = merge_records(existing, incoming)?;
        store.write_partition(&day, channel, &merged).await?;
        log::info!(
            "[{channel}] {day}: {} records ({} new)",
            merged.len(),
            merged.len().saturating_sub(before)
        );

        if csv_mirror {
            if let Err(e) = store.write_csv_mirror(&day, channel, &merged).await {
                log::warn!("[{channel}] CSV mirror for {day} failed: {e}");
            }
        }
        written += 1;
    }
    Ok(written)
}
