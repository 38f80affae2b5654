//! Adjustment history persistence
//!
//! The table mirrors the in-memory ring: after every insert it is pruned
//! to the ring capacity, newest rows kept.

use crate::learning::AdjustmentRecord;
use crisis_common::Result;
use sqlx::{Pool, Sqlite};
use tracing::warn;

/// Append `record` and prune the table to `capacity` rows
pub async fn insert_adjustment(
    db: &Pool<Sqlite>,
    record: &AdjustmentRecord,
    capacity: usize,
) -> Result<()> {
    let mut tx = db.begin().await?;

    sqlx::query("INSERT INTO adjustment_history (record_json, recorded_at) VALUES (?, ?)")
        .bind(serde_json::to_string(record)?)
        .bind(record.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "DELETE FROM adjustment_history WHERE id NOT IN (
             SELECT id FROM adjustment_history ORDER BY id DESC LIMIT ?
         )",
    )
    .bind(capacity as i64)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Up to `capacity` most recent records, oldest first
pub async fn load_recent_adjustments(
    db: &Pool<Sqlite>,
    capacity: usize,
) -> Result<Vec<AdjustmentRecord>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT id, record_json FROM adjustment_history ORDER BY id DESC LIMIT ?",
    )
    .bind(capacity as i64)
    .fetch_all(db)
    .await?;

    let mut records: Vec<AdjustmentRecord> = rows
        .into_iter()
        .filter_map(|(id, json)| match serde_json::from_str(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(row_id = id, error = %e, "Skipping unreadable adjustment history row");
                None
            }
        })
        .collect();
    records.reverse();
    Ok(records)
}
