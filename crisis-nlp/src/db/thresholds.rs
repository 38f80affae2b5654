//! Threshold set persistence
//!
//! One row per mode holding the active set and the baseline it may drift
//! from. Rows are re-validated on load; a row that no longer parses or
//! validates is skipped so the configured set stays in force.

use crate::thresholds::ThresholdSet;
use chrono::{DateTime, Utc};
use crisis_common::Result;
use sqlx::{Pool, Sqlite};
use tracing::warn;

/// Persisted threshold row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredThresholdSet {
    pub mode: String,
    pub active: ThresholdSet,
    pub baseline: ThresholdSet,
    pub updated_at: DateTime<Utc>,
}

/// Insert or replace the row for `mode`
pub async fn save_threshold_set(
    db: &Pool<Sqlite>,
    mode: &str,
    active: &ThresholdSet,
    baseline: &ThresholdSet,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO threshold_sets (mode, active_json, baseline_json, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(mode) DO UPDATE SET
             active_json = excluded.active_json,
             baseline_json = excluded.baseline_json,
             updated_at = excluded.updated_at",
    )
    .bind(mode)
    .bind(serde_json::to_string(active)?)
    .bind(serde_json::to_string(baseline)?)
    .bind(Utc::now().to_rfc3339())
    .execute(db)
    .await?;

    Ok(())
}

/// All valid persisted rows, ordered by mode
pub async fn load_threshold_sets(db: &Pool<Sqlite>) -> Result<Vec<StoredThresholdSet>> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT mode, active_json, baseline_json, updated_at FROM threshold_sets ORDER BY mode",
    )
    .fetch_all(db)
    .await?;

    let mut stored = Vec::with_capacity(rows.len());
    for (mode, active_json, baseline_json, updated_at) in rows {
        match parse_row(&active_json, &baseline_json, &updated_at) {
            Ok((active, baseline, updated_at)) => stored.push(StoredThresholdSet {
                mode,
                active,
                baseline,
                updated_at,
            }),
            Err(reason) => warn!(
                mode = %mode,
                reason = %reason,
                "Ignoring persisted threshold set, configured set stays active"
            ),
        }
    }

    Ok(stored)
}

fn parse_row(
    active_json: &str,
    baseline_json: &str,
    updated_at: &str,
) -> std::result::Result<(ThresholdSet, ThresholdSet, DateTime<Utc>), String> {
    let active: ThresholdSet = serde_json::from_str(active_json).map_err(|e| e.to_string())?;
    let baseline: ThresholdSet = serde_json::from_str(baseline_json).map_err(|e| e.to_string())?;
    active.validate().map_err(|e| format!("active: {}", e))?;
    baseline.validate().map_err(|e| format!("baseline: {}", e))?;
    let updated_at = DateTime::parse_from_rfc3339(updated_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| e.to_string())?;
    Ok((active, baseline, updated_at))
}
