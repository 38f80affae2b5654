//! Analysis endpoint

use crate::pipeline::AnalysisRequest;
use crate::types::EnsembleResult;
use crate::{ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};

/// POST /api/analyze
///
/// **Request:** `{"text": "...", "mode"?, "consensus_algorithm"?, "weights"?, "context"?}`
/// **Response:** the full EnsembleResult
///
/// Classifier outages never fail the request; the result carries status
/// FALLBACK or UNRESOLVED instead. Empty text is 400; a request cut short
/// by shutdown is 503.
pub async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> ApiResult<Json<EnsembleResult>> {
    let Json(request) = payload?;
    let cancel = state.shutdown.child_token();
    let result = state.analyzer.analyze(&request, &cancel).await?;
    Ok(Json(result))
}

pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/api/analyze", post(analyze))
}
