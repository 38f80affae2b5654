//! Reviewer feedback endpoint

use crate::learning::FeedbackOutcome;
use crate::types::FeedbackEvent;
use crate::{ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use tracing::info;

/// POST /api/feedback
///
/// **Response:** `{"status": "adjusted", "adjustment": {...}, "generation": N}`
/// or `{"status": "acknowledged", "message_ref": "..."}`
///
/// **Errors:**
/// - 429 LEARNING_LIMIT_EXCEEDED: daily adjustment cap reached
/// - 422 LEARNING_BOUNDS_EXCEEDED / THRESHOLD_ORDER_VIOLATION / NOT_ADJUSTABLE
/// - 404 UNKNOWN_MODE
/// - 409 LEARNING_DISABLED
pub async fn submit_feedback(
    State(state): State<AppState>,
    payload: Result<Json<FeedbackEvent>, JsonRejection>,
) -> ApiResult<Json<FeedbackOutcome>> {
    let Json(event) = payload?;
    let outcome = state.learning.record_feedback(&event).await?;

    if let FeedbackOutcome::Adjusted { adjustment, generation } = &outcome {
        info!(
            message_ref = %adjustment.message_ref,
            mode = %adjustment.mode,
            level = %adjustment.crisis_level,
            generation,
            "Feedback applied"
        );
    }

    Ok(Json(outcome))
}

pub fn feedback_routes() -> Router<AppState> {
    Router::new().route("/api/feedback", post(submit_feedback))
}
