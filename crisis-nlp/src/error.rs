//! Error types for the crisis-nlp HTTP surface

use crate::learning::LearningRejection;
use crate::pipeline::AnalysisError;
use crate::thresholds::ThresholdConfigError;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Threshold write rejected (400)
    #[error("Invalid threshold set: {0}")]
    InvalidThresholds(#[from] ThresholdConfigError),

    /// Feedback rejected by the learning system
    #[error("Feedback rejected: {0}")]
    Learning(#[from] LearningRejection),

    /// Service shutting down (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::InvalidThresholds(_) => (StatusCode::BAD_REQUEST, "THRESHOLD_CONFIG_INVALID"),
            ApiError::Learning(rejection) => {
                let status = match rejection {
                    LearningRejection::Disabled => StatusCode::CONFLICT,
                    LearningRejection::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                    LearningRejection::BoundsExceeded { .. }
                    | LearningRejection::OrderingViolation(_)
                    | LearningRejection::NotAdjustable(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    LearningRejection::UnknownMode(_) => StatusCode::NOT_FOUND,
                    LearningRejection::InvalidFeedback(_) => StatusCode::BAD_REQUEST,
                };
                (status, rejection.code())
            }
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::EmptyText | AnalysisError::InvalidRequest(_) => {
                ApiError::BadRequest(err.to_string())
            }
            AnalysisError::Cancelled => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        let message = match &self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Unavailable(msg) => msg.clone(),
            ApiError::InvalidThresholds(err) => err.to_string(),
            ApiError::Learning(rejection) => rejection.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
