//! HTTP API handlers for crisis-nlp
//!
//! JSON in, JSON out. Errors use the `{"error": {"code", "message"}}` shape
//! from [`crate::error::ApiError`].

pub mod analyze;
pub mod feedback;
pub mod health;
pub mod learning;
pub mod thresholds;

pub use analyze::analyze_routes;
pub use feedback::feedback_routes;
pub use health::health_routes;
pub use learning::learning_routes;
pub use thresholds::threshold_routes;
