//! Core types and data contracts for crisis-nlp
//!
//! Defines the explicit contracts between the pipeline stages:
//! - **Signals:** per-classifier output collected by the ModelCoordinator
//! - **Conflicts:** ConflictDetector findings and their resolution
//! - **Results:** the immutable EnsembleResult returned to callers
//! - **Feedback:** reviewer corrections consumed by the LearningSystem

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Crisis Levels
// ============================================================================

/// Discrete severity bucket derived from a consensus score
///
/// Ordering follows severity: `None < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl CrisisLevel {
    /// All levels, lowest first
    pub const ALL: [CrisisLevel; 5] = [
        CrisisLevel::None,
        CrisisLevel::Low,
        CrisisLevel::Medium,
        CrisisLevel::High,
        CrisisLevel::Critical,
    ];

    /// Levels with a configurable lower bound, lowest first (`none` is pinned at 0.0)
    pub const BOUNDED: [CrisisLevel; 4] = [
        CrisisLevel::Low,
        CrisisLevel::Medium,
        CrisisLevel::High,
        CrisisLevel::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for CrisisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse confidence-in-the-consensus indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementLevel {
    Unanimous,
    Strong,
    Weak,
    SignificantDisagreement,
}

// ============================================================================
// Consensus Algorithms
// ============================================================================

/// Algorithm used to combine an ensemble into one score
///
/// Closed set: every consumer matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusAlgorithm {
    Weighted,
    Majority,
    Unanimous,
    #[serde(alias = "conflict-aware")]
    ConflictAware,
}

impl ConsensusAlgorithm {
    pub const ALL: [ConsensusAlgorithm; 4] = [
        ConsensusAlgorithm::Weighted,
        ConsensusAlgorithm::Majority,
        ConsensusAlgorithm::Unanimous,
        ConsensusAlgorithm::ConflictAware,
    ];

    /// Name used as the default threshold-table key for this algorithm
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weighted => "weighted",
            Self::Majority => "majority",
            Self::Unanimous => "unanimous",
            Self::ConflictAware => "conflict_aware",
        }
    }
}

impl fmt::Display for ConsensusAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Classifier Signals
// ============================================================================

/// What a classifier is trained to detect
///
/// Rule-based conflict checks look signals up by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierRole {
    /// Crisis-relevance classifier (zero-shot over crisis labels)
    #[default]
    Crisis,
    /// Sentiment polarity classifier
    Sentiment,
    /// Emotion classifier
    Emotion,
    /// Irony/sarcasm detector (modifier only)
    Irony,
    /// Keyword/pattern fallback
    Pattern,
}

impl ClassifierRole {
    /// Whether signals of this role contribute to the combined score
    ///
    /// Irony signals only inform conflict detection.
    pub fn is_scoring(self) -> bool {
        !matches!(self, Self::Irony)
    }
}

/// One classifier's opinion about one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSignal {
    /// Configured classifier identifier
    pub model_id: String,
    /// Classifier role from configuration
    pub role: ClassifierRole,
    /// Top label reported by the classifier
    pub label: String,
    /// Crisis-relevance confidence, [0.0, 1.0]
    pub confidence: f64,
    /// Score per candidate label as reported by the classifier
    pub raw_label_scores: BTreeMap<String, f64>,
}

impl ClassifierSignal {
    /// Score the classifier gave to `label`
    ///
    /// Falls back to `confidence` when `label` is the top label and the
    /// classifier did not report per-label scores.
    pub fn label_score(&self, label: &str) -> Option<f64> {
        self.raw_label_scores
            .get(label)
            .copied()
            .or_else(|| (self.label == label).then_some(self.confidence))
    }
}

// ============================================================================
// Conflicts
// ============================================================================

/// Disagreement pattern found among ensemble signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    ScoreDisagreement,
    IronySentiment,
    EmotionMismatch,
    LabelDisagreement,
}

impl ConflictType {
    /// Lower value wins when several rules fire (most safety-relevant first)
    pub fn priority(self) -> u8 {
        match self {
            Self::ScoreDisagreement => 0,
            Self::LabelDisagreement => 1,
            Self::EmotionMismatch => 2,
            Self::IronySentiment => 3,
        }
    }
}

/// Conflict severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

/// Policy applied by the ConflictResolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Maximum of the disagreeing confidences (errs toward flagging)
    #[default]
    Conservative,
    /// Minimum of the disagreeing confidences
    Optimistic,
    /// Arithmetic mean of the disagreeing confidences
    Mean,
    /// Keep the score, force staff review
    #[serde(alias = "review-flag")]
    ReviewFlag,
}

/// Detected conflict with its resolution audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    /// Strategy actually applied; `None` when the algorithm does not resolve
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub pre_resolution_score: f64,
    pub post_resolution_score: f64,
    /// Population variance of scoring-signal confidences
    pub variance: f64,
    /// Models whose signals took part in the disagreement
    pub involved_models: Vec<String>,
    /// Confidences of the disagreeing signals (resolver input)
    pub disagreeing_confidences: Vec<f64>,
    /// Human-readable explanation
    pub description: String,
}

// ============================================================================
// Results
// ============================================================================

/// How the decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    /// At least one semantic classifier answered
    Resolved,
    /// Only the pattern fallback answered
    Fallback,
    /// Nothing answered
    Unresolved,
}

/// Why a decision needs human confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewReason {
    Borderline,
    HighSeverity,
    AlwaysReviewLevel,
    Conflict,
    LowConfidence,
    ResolutionReview,
    EscalationContext,
    Unresolved,
}

/// A classifier excluded from the ensemble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedModel {
    pub model_id: String,
    pub reason: String,
}

/// Opaque input from the history/trend analyzer
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryContext {
    /// Added to the resolved score before level mapping
    #[serde(default)]
    pub context_boost: f64,
    /// Forces staff review when set
    #[serde(default)]
    pub requires_escalation_review: bool,
}

/// Final decision for one message; never mutated after construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub signals: Vec<ClassifierSignal>,
    pub consensus_score: f64,
    pub consensus_label: String,
    pub agreement_level: AgreementLevel,
    pub conflict: Option<ConflictRecord>,
    pub crisis_level: CrisisLevel,
    pub requires_staff_review: bool,
    pub algorithm: ConsensusAlgorithm,
    /// Threshold table actually used (after unknown-mode fallback)
    pub mode: String,
    pub status: AnalysisStatus,
    pub decision_confidence: f64,
    pub review_reasons: Vec<ReviewReason>,
    pub failed_models: Vec<FailedModel>,
    pub context_boost: f64,
}

// ============================================================================
// Feedback
// ============================================================================

/// Reviewer verdict on a past decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    FalsePositive,
    FalseNegative,
    ConfirmedCorrect,
}

/// Direction of an applied threshold adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentDirection {
    /// Bound raised (less sensitive)
    FalsePositive,
    /// Bound lowered (more sensitive)
    FalseNegative,
}

/// Correction supplied by an external reviewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Reference to the reviewed message (opaque to the core)
    pub message_ref: String,
    /// Level the system reported
    pub reported_crisis_level: CrisisLevel,
    /// Level the reviewer says was correct
    pub correct_or_expected_level: CrisisLevel,
    pub feedback_type: FeedbackType,
    /// Optional step scale in [0.0, 1.0]
    #[serde(default)]
    pub severity_score: Option<f64>,
    /// Threshold table to adjust (defaults to the configured mode)
    #[serde(default)]
    pub mode: Option<String>,
}
