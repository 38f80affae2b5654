//! Classifier adapters
//!
//! Every ensemble member implements [`SemanticClassifier`]. The
//! ModelCoordinator owns the timeout and concurrency; adapters only turn
//! one piece of text into one [`ClassifierOutput`].
//!
//! # Adapters
//! - **http_classifier** - remote zero-shot / text-classification endpoint
//! - **keyword** - phrase-list fallback used when every semantic model fails

pub mod http_classifier;
pub mod keyword;

pub use http_classifier::HttpClassifier;
pub use keyword::KeywordClassifier;

use crate::types::ClassifierRole;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Classifier failure; the signal is dropped from the ensemble
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("non-finite confidence {0}")]
    InvalidConfidence(f64),
}

/// Raw classifier answer before it becomes a ClassifierSignal
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    pub label: String,
    pub confidence: f64,
    pub raw_label_scores: BTreeMap<String, f64>,
}

/// One ensemble member
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    /// Identifier reported on every signal
    fn model_id(&self) -> &str;

    fn role(&self) -> ClassifierRole;

    /// Label space this classifier always uses, if it ignores the request's
    fn pinned_labels(&self) -> Option<&[String]> {
        None
    }

    /// Classify `text` against `candidate_labels`
    async fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> Result<ClassifierOutput, ClassifierError>;
}
