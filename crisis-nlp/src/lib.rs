//! crisis-nlp library interface
//!
//! Ensemble crisis detection: concurrent classifier fan-out, conflict
//! detection and resolution, consensus, threshold mapping and
//! feedback-driven threshold learning. Exposed over HTTP by the
//! `crisis-nlp` binary; the library is also used directly by the
//! integration tests.

pub mod api;
pub mod cache;
pub mod classifiers;
pub mod config;
pub mod conflict;
pub mod consensus;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod learning;
pub mod pipeline;
pub mod thresholds;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use crate::cache::ResponseCache;
use crate::learning::LearningSystem;
use crate::pipeline::CrisisAnalyzer;
use axum::Router;
use chrono::{DateTime, Utc};
use crisis_common::events::EventBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<CrisisAnalyzer>,
    pub learning: Arc<LearningSystem>,
    /// Present when response caching is enabled
    pub cache: Option<Arc<ResponseCache>>,
    pub event_bus: EventBus,
    /// Cancelled on shutdown; in-flight analyses use child tokens
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(analyzer: Arc<CrisisAnalyzer>, event_bus: EventBus) -> Self {
        Self {
            learning: Arc::clone(analyzer.learning()),
            analyzer,
            cache: None,
            event_bus,
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
        }
    }

    /// Record the cache the analyzer uses, for health reporting
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::analyze_routes())
        .merge(api::feedback_routes())
        .merge(api::threshold_routes())
        .merge(api::learning_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
