// src/pipeline/load.rs

//! Warehouse loader: upserts every partition file into Postgres.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::Result;
use crate::models::{Config, WarehouseConfig};
use crate::services::warehouse::{WarehouseRow, find_partition_files, make_row, normalize_messages};

/// Columns bound per row in the upsert.
const COLUMNS_PER_ROW: usize = 15;
/// Postgres accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Totals for one loader run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub files: usize,
    pub unreadable_files: usize,
    pub messages_seen: usize,
    pub rows_upserted: usize,
    /// Entries without a channel or message id
    pub rows_skipped: usize,
}

/// DDL for the raw table and its indexes, one statement per entry.
///
/// `schema` and `table` must already be validated identifiers.
pub fn create_statements(schema: &str, table: &str) -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
        format!(
            "CREATE TABLE IF NOT EXISTS {schema}.{table} (
    channel_username TEXT        NOT NULL,
    message_id       BIGINT      NOT NULL,
    channel_title    TEXT        NULL,
    message_ts       TIMESTAMPTZ NULL,
    message_text     TEXT        NULL,
    views            BIGINT      NULL,
    forwards         BIGINT      NULL,
    reply_count      BIGINT      NULL,
    has_media        BOOLEAN     NULL,
    has_image        BOOLEAN     NULL,
    media_type       TEXT        NULL,
    media_path       TEXT        NULL,
    partition_date   DATE        NULL,
    source_file      TEXT        NULL,
    ingested_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    payload          JSONB       NOT NULL,
    CONSTRAINT {table}_pk PRIMARY KEY (channel_username, message_id)
)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{schema}_{table}_ts ON {schema}.{table} (message_ts)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{schema}_{table}_partition_date ON {schema}.{table} (partition_date)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{schema}_{table}_payload_gin ON {schema}.{table} USING GIN (payload)"
        ),
    ]
}

/// Keep the last row for each `(channel, id)`, preserving first-seen order.
///
/// Postgres rejects an upsert that touches the same key twice.
pub fn dedupe_rows(rows: Vec<WarehouseRow>) -> Vec<WarehouseRow> {
    let mut index: HashMap<(String, i64), usize> = HashMap::new();
    let mut out: Vec<WarehouseRow> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = (row.channel_username.clone(), row.message_id);
        match index.get(&key) {
            Some(&i) => out[i] = row,
            None => {
                index.insert(key, out.len());
                out.push(row);
            }
        }
    }
    out
}

fn rows_per_statement(config: &WarehouseConfig) -> usize {
    config.batch_size.clamp(1, MAX_BIND_PARAMS / COLUMNS_PER_ROW)
}

async fn ensure_table(pool: &PgPool, config: &WarehouseConfig) -> Result<()> {
    for statement in create_statements(&config.schema, &config.table) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

async fn upsert_rows(pool: &PgPool, config: &WarehouseConfig, rows: &[WarehouseRow]) -> Result<()> {
    let table = config.qualified_table();
    let mut tx = pool.begin().await?;

    for batch in rows.chunks(rows_per_statement(config)) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {table} (channel_username, message_id, channel_title, message_ts, \
             message_text, views, forwards, reply_count, has_media, has_image, media_type, \
             media_path, partition_date, source_file, payload) "
        ));
        builder.push_values(batch, |mut b, row| {
            b.push_bind(&row.channel_username)
                .push_bind(row.message_id)
                .push_bind(&row.channel_title)
                .push_bind(row.message_ts)
                .push_bind(&row.message_text)
                .push_bind(row.views)
                .push_bind(row.forwards)
                .push_bind(row.reply_count)
                .push_bind(row.has_media)
                .push_bind(row.has_image)
                .push_bind(&row.media_type)
                .push_bind(&row.media_path)
                .push_bind(row.partition_date)
                .push_bind(&row.source_file)
                .push_bind(&row.payload);
        });
        builder.push(format!(
            " ON CONFLICT (channel_username, message_id) DO UPDATE SET \
             channel_title = EXCLUDED.channel_title, \
             message_ts = EXCLUDED.message_ts, \
             message_text = EXCLUDED.message_text, \
             views = EXCLUDED.views, \
             forwards = EXCLUDED.forwards, \
             reply_count = EXCLUDED.reply_count, \
             has_media = EXCLUDED.has_media, \
             has_image = EXCLUDED.has_image, \
             media_type = EXCLUDED.media_type, \
             media_path = EXCLUDED.media_path, \
             partition_date = COALESCE(EXCLUDED.partition_date, {table}.partition_date), \
             source_file = COALESCE(EXCLUDED.source_file, {table}.source_file), \
             payload = EXCLUDED.payload"
        ));
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load every partition file under `data_lake_dir` into the warehouse.
///
/// Unreadable files are logged and skipped; database errors abort the run.
pub async fn run_loader(config: &Config, data_lake_dir: &Path) -> Result<LoadSummary> {
    config.validate()?;
    let wh = &config.warehouse;

    let files = find_partition_files(data_lake_dir).await?;
    log::info!(
        "Loading {} files from {} into {} ({}@{}:{}/{})",
        files.len(),
        data_lake_dir.display(),
        wh.qualified_table(),
        wh.user,
        wh.host,
        wh.port,
        wh.database
    );

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&wh.connection_url()?)
        .await?;
    ensure_table(&pool, wh).await?;

    let mut summary = LoadSummary::default();
    for file in files {
        summary.files += 1;
        let name = file.path.display();

        let value = match tokio::fs::read(&file.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(e) => {
                    log::warn!("Failed to parse {name}: {e}");
                    summary.unreadable_files += 1;
                    continue;
                }
            },
            Err(e) => {
                log::warn!("Failed to read {name}: {e}");
                summary.unreadable_files += 1;
                continue;
            }
        };

        let messages = normalize_messages(value);
        let seen = messages.len();
        summary.messages_seen += seen;

        let rows: Vec<WarehouseRow> = messages
            .into_iter()
            .filter_map(|msg| make_row(msg, file.partition_date, &file.path))
            .collect();
        summary.rows_skipped += seen - rows.len();

        if rows.is_empty() {
            log::info!("{name}: 0 rows to write (messages={seen})");
            continue;
        }

        let rows = dedupe_rows(rows);
        upsert_rows(&pool, wh, &rows).await?;
        summary.rows_upserted += rows.len();
        log::debug!(
            "Loaded {name} | partition_date={:?} | messages={seen} | upserted={}",
            file.partition_date,
            rows.len()
        );
    }

    pool.close().await;
    log::info!(
        "Load complete: {} files ({} unreadable), {} messages seen, {} rows upserted, {} skipped",
        summary.files,
        summary.unreadable_files,
        summary.messages_seen,
        summary.rows_upserted,
        summary.rows_skipped
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(channel: &str, id: i64, text: &str) -> WarehouseRow {
        WarehouseRow {
            channel_username: channel.to_string(),
            message_id: id,
            channel_title: None,
            message_ts: None,
            message_text: Some(text.to_string()),
            views: None,
            forwards: None,
            reply_count: None,
            has_media: None,
            has_image: None,
            media_type: None,
            media_path: None,
            partition_date: None,
            source_file: "f.json".to_string(),
            payload: json!({}),
        }
    }

    #[test]
    fn test_create_statements_use_configured_names() {
        let statements = create_statements("staging", "messages");
        assert_eq!(statements.len(), 5);
        assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS staging");
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS staging.messages ("));
        assert!(statements[1].contains("CONSTRAINT messages_pk PRIMARY KEY (channel_username, message_id)"));
        assert!(statements[4].contains("ON staging.messages USING GIN (payload)"));
    }

    #[test]
    fn test_dedupe_rows_last_wins() {
        let rows = dedupe_rows(vec![
            row("a", 1, "first"),
            row("b", 1, "other channel"),
            row("a", 1, "second"),
        ]);
        let texts: Vec<_> = rows
            .iter()
            .map(|r| (r.channel_username.as_str(), r.message_text.as_deref()))
            .collect();
        assert_eq!(
            texts,
            vec![("a", Some("second")), ("b", Some("other channel"))]
        );
    }

    #[test]
    fn test_rows_per_statement_respects_bind_limit() {
        let mut config = WarehouseConfig::default();
        assert_eq!(rows_per_statement(&config), 1000);
        config.batch_size = 100_000;
        assert_eq!(rows_per_statement(&config), 65_535 / 15);
    }
}
