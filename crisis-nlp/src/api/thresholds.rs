//! Threshold configuration endpoints

use crate::thresholds::ThresholdSet;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ThresholdConfigResponse {
    pub mode: String,
    /// Threshold generation the set belongs to
    pub generation: u64,
    pub thresholds: ThresholdSet,
}

/// GET /api/thresholds/:mode
pub async fn get_thresholds(
    State(state): State<AppState>,
    Path(mode): Path<String>,
) -> ApiResult<Json<ThresholdConfigResponse>> {
    let snapshot = state.learning.snapshot().await;
    let thresholds = snapshot
        .get(&mode)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("threshold mode '{}'", mode)))?;

    Ok(Json(ThresholdConfigResponse {
        generation: snapshot.generation(),
        mode,
        thresholds,
    }))
}

/// PUT /api/thresholds/:mode
///
/// Validates the set before it replaces the active set and its baseline.
/// An unknown mode creates a new table.
///
/// **Errors:** 400 THRESHOLD_CONFIG_INVALID when bounds are out of range,
/// outside the learning sensitivity bounds, or not strictly ascending.
pub async fn put_thresholds(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    payload: Result<Json<ThresholdSet>, JsonRejection>,
) -> ApiResult<Json<ThresholdConfigResponse>> {
    let Json(thresholds) = payload?;
    if mode.trim().is_empty() {
        return Err(ApiError::BadRequest("mode must not be empty".to_string()));
    }

    let generation = state
        .learning
        .put_threshold_config(&mode, thresholds.clone())
        .await?;

    Ok(Json(ThresholdConfigResponse {
        mode,
        generation,
        thresholds,
    }))
}

pub fn threshold_routes() -> Router<AppState> {
    Router::new().route("/api/thresholds/:mode", get(get_thresholds).put(put_thresholds))
}
