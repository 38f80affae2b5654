//! Learning health and audit endpoints

use crate::learning::{AdjustmentRecord, LearningHealthReport};
use crate::{ApiResult, AppState};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Newest first
    pub records: Vec<AdjustmentRecord>,
    pub count: usize,
}

/// GET /api/learning/health
pub async fn learning_health(State(state): State<AppState>) -> Json<LearningHealthReport> {
    Json(state.learning.health_check().await)
}

/// GET /api/learning/history?limit=N
pub async fn learning_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<HistoryResponse>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = state.learning.history(limit).await;

    Ok(Json(HistoryResponse {
        count: records.len(),
        records,
    }))
}

pub fn learning_routes() -> Router<AppState> {
    Router::new()
        .route("/api/learning/health", get(learning_health))
        .route("/api/learning/history", get(learning_history))
}
