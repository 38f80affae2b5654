//! Shared helpers for crisis-nlp integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use crisis_common::events::EventBus;
use crisis_nlp::cache::ResponseCache;
use crisis_nlp::classifiers::{ClassifierError, ClassifierOutput, SemanticClassifier};
use crisis_nlp::config::ServiceConfig;
use crisis_nlp::coordinator::EnsembleMember;
use crisis_nlp::learning::LearningSystem;
use crisis_nlp::pipeline::CrisisAnalyzer;
use crisis_nlp::types::ClassifierRole;
use crisis_nlp::AppState;
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

/// Classifier answering with a fixed confidence, or failing when `None`
pub struct StaticClassifier {
    pub id: String,
    pub role: ClassifierRole,
    pub label: String,
    pub confidence: Option<f64>,
    pub calls: AtomicUsize,
}

impl StaticClassifier {
    pub fn crisis(id: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            role: ClassifierRole::Crisis,
            label: "crisis".to_string(),
            confidence: Some(confidence),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            role: ClassifierRole::Crisis,
            label: String::new(),
            confidence: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticClassifier for StaticClassifier {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> ClassifierRole {
        self.role
    }

    async fn classify(
        &self,
        _text: &str,
        _candidate_labels: &[String],
    ) -> Result<ClassifierOutput, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.confidence {
            Some(confidence) => Ok(ClassifierOutput {
                label: self.label.clone(),
                confidence,
                raw_label_scores: BTreeMap::new(),
            }),
            None => Err(ClassifierError::Request("connection refused".to_string())),
        }
    }
}

/// Test application around the given classifiers
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub fn build_app(config: ServiceConfig, classifiers: &[Arc<StaticClassifier>]) -> TestApp {
    build_app_with_learning(config.clone(), classifiers, learning_for(&config))
}

pub fn learning_for(config: &ServiceConfig) -> LearningSystem {
    LearningSystem::new(
        config.learning.clone(),
        config.thresholds.clone(),
        config.default_mode(),
    )
}

pub fn build_app_with_learning(
    config: ServiceConfig,
    classifiers: &[Arc<StaticClassifier>],
    learning: LearningSystem,
) -> TestApp {
    let members = classifiers
        .iter()
        .map(|c| EnsembleMember::new(c.clone(), Duration::from_millis(500)))
        .collect();
    let event_bus = EventBus::new(64);
    let learning = Arc::new(learning.with_event_bus(event_bus.clone()));

    let mut analyzer = CrisisAnalyzer::new(&config, members, learning)
        .with_event_bus(event_bus.clone());
    let cache = config.cache.enabled.then(|| {
        Arc::new(ResponseCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_secs),
        ))
    });
    if let Some(cache) = &cache {
        analyzer = analyzer.with_cache(Arc::clone(cache));
    }

    let mut state = AppState::new(Arc::new(analyzer), event_bus);
    if let Some(cache) = cache {
        state = state.with_cache(cache);
    }
    TestApp {
        router: crisis_nlp::build_router(state.clone()),
        state,
    }
}

/// Service config without response caching
pub fn uncached_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.cache.enabled = false;
    config
}

pub async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
