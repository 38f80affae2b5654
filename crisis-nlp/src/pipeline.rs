//! CrisisAnalyzer: the analysis pipeline
//!
//! request → ModelCoordinator → ConflictDetector → ConsensusEngine →
//! ConflictResolver (conflict-aware only) → history context →
//! CrisisThresholdManager → EnsembleResult
//!
//! When every semantic classifier fails the keyword fallback answers
//! (status FALLBACK); with no usable fallback the result is UNRESOLVED and
//! always goes to staff review. Only RESOLVED results are cached.

use crate::cache::{CacheKey, ResponseCache};
use crate::classifiers::{ClassifierError, HttpClassifier, KeywordClassifier, SemanticClassifier};
use crate::config::ServiceConfig;
use crate::conflict::{attach_unresolved, ConflictDetector, ConflictResolver, Resolution};
use crate::consensus::{decision_confidence, AgreementThresholds, ConsensusEngine};
use crate::coordinator::{to_signal, CoordinatorError, EnsembleMember, ModelCoordinator};
use crate::learning::LearningSystem;
use crate::thresholds::CrisisThresholdManager;
use crate::types::{
    AgreementLevel, AnalysisStatus, ClassifierSignal, ConsensusAlgorithm, CrisisLevel,
    EnsembleResult, FailedModel, HistoryContext, ReviewReason,
};
use crisis_common::events::{CrisisEvent, EventBus};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Analysis failure (classifier failures never end up here)
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("text must not be empty")]
    EmptyText,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("analysis cancelled")]
    Cancelled,
}

/// One analysis request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisRequest {
    pub text: String,
    /// Threshold table; defaults to the algorithm's table, then the configured mode
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, alias = "algorithm")]
    pub consensus_algorithm: Option<ConsensusAlgorithm>,
    /// Per-model weight overrides
    #[serde(default)]
    pub weights: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub candidate_labels: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<HistoryContext>,
}

impl AnalysisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Build HTTP ensemble members from configuration
pub fn build_members(config: &ServiceConfig) -> Result<Vec<EnsembleMember>, ClassifierError> {
    config
        .classifiers
        .iter()
        .map(|classifier| {
            let timeout = config.classifier_timeout(classifier);
            // Transport ceiling slightly above the ensemble timeout
            let client = HttpClassifier::from_config(classifier, timeout * 2)?;
            Ok(EnsembleMember::new(Arc::new(client), timeout))
        })
        .collect()
}

/// Request pipeline composing the decision components
pub struct CrisisAnalyzer {
    coordinator: ModelCoordinator,
    fallback: Option<KeywordClassifier>,
    detector: ConflictDetector,
    engine: ConsensusEngine,
    resolver: ConflictResolver,
    learning: Arc<LearningSystem>,
    cache: Option<Arc<ResponseCache>>,
    configured_weights: BTreeMap<String, f64>,
    candidate_labels: Vec<String>,
    default_algorithm: ConsensusAlgorithm,
    default_mode: String,
    event_bus: Option<EventBus>,
}

impl CrisisAnalyzer {
    pub fn new(
        config: &ServiceConfig,
        members: Vec<EnsembleMember>,
        learning: Arc<LearningSystem>,
    ) -> Self {
        let fallback = if config.fallback.enabled {
            Some(KeywordClassifier::new(&config.fallback.patterns)).filter(|k| k.has_rules())
        } else {
            None
        };

        let agreement = AgreementThresholds {
            unanimous_variance: config.ensemble.unanimous_variance,
            strong_variance: config.ensemble.strong_variance,
            conflict_variance: config.conflict.conflict_threshold,
        };

        Self {
            coordinator: ModelCoordinator::new(members),
            fallback,
            detector: ConflictDetector::new(config.conflict.clone()),
            engine: ConsensusEngine::new(agreement),
            resolver: ConflictResolver::new(config.ensemble.resolution_strategy),
            learning,
            cache: None,
            configured_weights: config
                .classifiers
                .iter()
                .map(|c| (c.model_id.clone(), c.weight))
                .collect(),
            candidate_labels: config.ensemble.candidate_labels.clone(),
            default_algorithm: config.ensemble.default_algorithm,
            default_mode: config.default_mode(),
            event_bus: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Emit degraded/unresolved events on this bus
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.coordinator = self.coordinator.with_event_bus(event_bus.clone());
        self.event_bus = Some(event_bus);
        self
    }

    pub fn learning(&self) -> &Arc<LearningSystem> {
        &self.learning
    }

    /// Number of configured semantic classifiers
    pub fn classifier_count(&self) -> usize {
        self.coordinator.configured_count()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Analyze one message
    ///
    /// # Errors
    /// Only for invalid input or cancellation; classifier failures yield a
    /// FALLBACK or UNRESOLVED result instead.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<EnsembleResult, AnalysisError> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(AnalysisError::EmptyText);
        }

        let algorithm = request.consensus_algorithm.unwrap_or(self.default_algorithm);
        let requested_mode = match (&request.mode, request.consensus_algorithm) {
            (Some(mode), _) => mode.clone(),
            (None, Some(algorithm)) => algorithm.as_str().to_string(),
            (None, None) => self.default_mode.clone(),
        };
        let context = request.context.unwrap_or_default();
        if !context.context_boost.is_finite() {
            return Err(AnalysisError::InvalidRequest(
                "context_boost must be finite".to_string(),
            ));
        }

        let mut weights = self.configured_weights.clone();
        if let Some(overrides) = &request.weights {
            weights.extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        }

        let manager = CrisisThresholdManager::new(self.learning.snapshot().await);
        let generation = manager.snapshot().generation();

        let cache_key = self.cache.as_ref().map(|_| {
            CacheKey::new(text, algorithm, &requested_mode, &weights, &context, generation)
        });
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(mode = %requested_mode, generation, "Response cache hit");
                return Ok((*hit).clone());
            }
        }

        let labels = request
            .candidate_labels
            .as_deref()
            .unwrap_or(&self.candidate_labels);

        let (signals, failed_models, status) =
            match self.coordinator.analyze(text, labels, cancel).await {
                Ok(collected) => (collected.signals, collected.failed, AnalysisStatus::Resolved),
                Err(CoordinatorError::Cancelled) => return Err(AnalysisError::Cancelled),
                Err(CoordinatorError::AllClassifiersFailed { failed }) => {
                    if cancel.is_cancelled() {
                        return Err(AnalysisError::Cancelled);
                    }
                    match self.run_fallback(text, labels).await {
                        Some(signal) => (vec![signal], failed, AnalysisStatus::Fallback),
                        None => {
                            let resolved = manager.resolve(&requested_mode);
                            return Ok(self.unresolved(algorithm, resolved.mode, failed, context));
                        }
                    }
                }
            };

        let resolved = manager.resolve(&requested_mode);
        let set = &resolved.set;

        let conflict = self.detector.detect(&signals);
        let outcome = self
            .engine
            .combine(&signals, conflict.as_ref(), algorithm, set, &weights);

        let resolution = match algorithm {
            ConsensusAlgorithm::ConflictAware => self.resolver.resolve(outcome.score, conflict),
            ConsensusAlgorithm::Weighted
            | ConsensusAlgorithm::Majority
            | ConsensusAlgorithm::Unanimous => Resolution {
                score: outcome.score,
                conflict: attach_unresolved(outcome.score, conflict),
                forces_review: false,
            },
        };

        let final_score = (resolution.score + context.context_boost).clamp(0.0, 1.0);
        let crisis_level = manager.level_for(final_score, &resolved.mode);
        let confidence = match status {
            AnalysisStatus::Resolved => {
                decision_confidence(&signals, self.coordinator.configured_count())
            }
            AnalysisStatus::Fallback | AnalysisStatus::Unresolved => 0.0,
        };

        let mut reasons = manager.review_reasons(
            crisis_level,
            final_score,
            resolution.conflict.is_some(),
            confidence,
            &resolved.mode,
        );
        if resolution.forces_review {
            reasons.push(ReviewReason::ResolutionReview);
        }
        if context.requires_escalation_review {
            reasons.push(ReviewReason::EscalationContext);
        }

        let result = EnsembleResult {
            signals,
            consensus_score: final_score,
            consensus_label: outcome.label,
            agreement_level: outcome.agreement_level,
            conflict: resolution.conflict,
            crisis_level,
            requires_staff_review: !reasons.is_empty(),
            algorithm,
            mode: resolved.mode,
            status,
            decision_confidence: confidence,
            review_reasons: reasons,
            failed_models,
            context_boost: context.context_boost,
        };

        info!(
            mode = %result.mode,
            algorithm = %algorithm,
            status = ?result.status,
            level = %result.crisis_level,
            score = result.consensus_score,
            agreement = ?result.agreement_level,
            review = result.requires_staff_review,
            signals = result.signals.len(),
            failed = result.failed_models.len(),
            "Analysis complete"
        );

        if let (AnalysisStatus::Resolved, Some(cache), Some(key)) = (status, &self.cache, cache_key) {
            cache.insert(key, Arc::new(result.clone()));
        }

        Ok(result)
    }

    async fn run_fallback(&self, text: &str, labels: &[String]) -> Option<ClassifierSignal> {
        let fallback = self.fallback.as_ref()?;
        match fallback.classify(text, labels).await {
            Ok(output) => match to_signal(fallback, output) {
                Ok(signal) => {
                    warn!(
                        level = %signal.label,
                        confidence = signal.confidence,
                        "All classifiers failed, using pattern fallback"
                    );
                    Some(signal)
                }
                Err(e) => {
                    warn!(error = %e, "Pattern fallback produced an invalid signal");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Pattern fallback failed");
                None
            }
        }
    }

    fn unresolved(
        &self,
        algorithm: ConsensusAlgorithm,
        mode: String,
        failed_models: Vec<FailedModel>,
        context: HistoryContext,
    ) -> EnsembleResult {
        warn!(
            failed = failed_models.len(),
            "No classifier produced a signal, analysis unresolved"
        );
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(CrisisEvent::AnalysisUnresolved {
                failed_models: failed_models.iter().map(|f| f.model_id.clone()).collect(),
                timestamp: chrono::Utc::now(),
            });
        }

        let mut review_reasons = vec![ReviewReason::Unresolved];
        if context.requires_escalation_review {
            review_reasons.push(ReviewReason::EscalationContext);
        }

        EnsembleResult {
            signals: Vec::new(),
            consensus_score: 0.0,
            consensus_label: CrisisLevel::None.as_str().to_string(),
            agreement_level: AgreementLevel::SignificantDisagreement,
            conflict: None,
            crisis_level: CrisisLevel::None,
            requires_staff_review: true,
            algorithm,
            mode,
            status: AnalysisStatus::Unresolved,
            decision_confidence: 0.0,
            review_reasons,
            failed_models,
            context_boost: context.context_boost,
        }
    }
}
