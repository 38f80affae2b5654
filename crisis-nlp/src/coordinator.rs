//! ModelCoordinator
//!
//! Dispatches one message to every configured classifier concurrently and
//! collects the signals that arrive inside each classifier's timeout.
//! Failures are isolated per classifier: a timeout or error drops that
//! signal and is reported in `failed`, the rest of the ensemble proceeds.
//!
//! Calls are plain futures polled by `join_all` inside the request, so a
//! dropped request or a cancelled token aborts every in-flight call.

use crate::classifiers::{ClassifierError, ClassifierOutput, SemanticClassifier};
use crisis_common::events::{CrisisEvent, EventBus};
use crate::types::{ClassifierSignal, FailedModel};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Coordinator-level failure
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("all {} classifiers failed", failed.len())]
    AllClassifiersFailed { failed: Vec<FailedModel> },

    #[error("analysis cancelled")]
    Cancelled,
}

/// Classifier plus the timeout bounding each call
#[derive(Clone)]
pub struct EnsembleMember {
    pub classifier: Arc<dyn SemanticClassifier>,
    pub timeout: Duration,
}

impl EnsembleMember {
    pub fn new(classifier: Arc<dyn SemanticClassifier>, timeout: Duration) -> Self {
        Self { classifier, timeout }
    }
}

/// Signals collected for one message
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedSignals {
    /// In configured classifier order
    pub signals: Vec<ClassifierSignal>,
    pub failed: Vec<FailedModel>,
}

/// Concurrent classifier dispatcher
pub struct ModelCoordinator {
    members: Vec<EnsembleMember>,
    event_bus: Option<EventBus>,
}

impl ModelCoordinator {
    pub fn new(members: Vec<EnsembleMember>) -> Self {
        Self {
            members,
            event_bus: None,
        }
    }

    /// Report failing classifiers as `ClassifierDegraded` events
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Number of configured classifiers
    pub fn configured_count(&self) -> usize {
        self.members.len()
    }

    /// Classify `text` with every member
    ///
    /// # Errors
    /// - `Cancelled` if `cancel` fires before collection completes
    /// - `AllClassifiersFailed` if no member produced a signal
    pub async fn analyze(
        &self,
        text: &str,
        candidate_labels: &[String],
        cancel: &CancellationToken,
    ) -> Result<CollectedSignals, CoordinatorError> {
        let calls = self.members.iter().map(|member| async move {
            let labels = member
                .classifier
                .pinned_labels()
                .unwrap_or(candidate_labels);
            let started = Instant::now();
            let result = match timeout(member.timeout, member.classifier.classify(text, labels)).await
            {
                Ok(result) => result,
                Err(_) => Err(ClassifierError::Timeout(member.timeout)),
            };
            (member, result, started.elapsed())
        });

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Analysis cancelled, dropping in-flight classifier calls");
                return Err(CoordinatorError::Cancelled);
            }
            results = join_all(calls) => results,
        };

        let mut signals = Vec::with_capacity(results.len());
        let mut failed = Vec::new();

        for (member, result, elapsed) in results {
            let model_id = member.classifier.model_id();
            match result.and_then(|output| to_signal(member.classifier.as_ref(), output)) {
                Ok(signal) => {
                    debug!(
                        model_id = %model_id,
                        confidence = signal.confidence,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Classifier signal collected"
                    );
                    signals.push(signal);
                }
                Err(e) => {
                    warn!(
                        model_id = %model_id,
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Classifier excluded from ensemble"
                    );
                    if let Some(bus) = &self.event_bus {
                        bus.emit_lossy(CrisisEvent::ClassifierDegraded {
                            model_id: model_id.to_string(),
                            reason: e.to_string(),
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    failed.push(FailedModel {
                        model_id: model_id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if signals.is_empty() {
            return Err(CoordinatorError::AllClassifiersFailed { failed });
        }

        Ok(CollectedSignals { signals, failed })
    }
}

/// Validate a classifier answer; out-of-range confidences are clamped
pub(crate) fn to_signal(
    classifier: &dyn SemanticClassifier,
    output: ClassifierOutput,
) -> Result<ClassifierSignal, ClassifierError> {
    if !output.confidence.is_finite() {
        return Err(ClassifierError::InvalidConfidence(output.confidence));
    }
    let confidence = output.confidence.clamp(0.0, 1.0);
    if confidence != output.confidence {
        warn!(
            model_id = %classifier.model_id(),
            reported = output.confidence,
            clamped = confidence,
            "Classifier confidence outside [0, 1], clamped"
        );
    }

    Ok(ClassifierSignal {
        model_id: classifier.model_id().to_string(),
        role: classifier.role(),
        label: output.label,
        confidence,
        raw_label_scores: output.raw_label_scores,
    })
}
