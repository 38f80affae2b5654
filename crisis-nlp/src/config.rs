//! Service configuration for crisis-nlp
//!
//! Bootstrap configuration is a single TOML file. Every key has a built-in
//! default, so a missing file (or a missing section) still yields a runnable
//! service; a present file is validated as a whole before startup continues.
//!
//! ```toml
//! [server]
//! port = 8881
//!
//! [ensemble]
//! default_algorithm = "conflict_aware"
//! resolution_strategy = "conservative"
//!
//! [[classifiers]]
//! model_id = "bart-crisis"
//! role = "crisis"
//! endpoint = "http://127.0.0.1:9000/zero-shot"
//! weight = 0.5
//! crisis_labels = ["suicidal ideation", "self-harm"]
//!
//! [thresholds.conflict_aware]
//! low = 0.12
//! medium = 0.30
//! high = 0.55
//! critical = 0.75
//! ```

use crate::thresholds::{ThresholdConfigError, ThresholdSet, ThresholdTables};
use crate::types::{ClassifierRole, ConsensusAlgorithm, CrisisLevel, ResolutionStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("classifier '{0}' is configured more than once")]
    DuplicateClassifier(String),

    #[error("classifier '{model_id}': {reason}")]
    InvalidClassifier { model_id: String, reason: String },

    #[error("threshold set '{mode}' is invalid: {source}")]
    InvalidThresholds {
        mode: String,
        #[source]
        source: ThresholdConfigError,
    },

    #[error("no threshold sets configured")]
    NoThresholdSets,

    #[error("default mode '{0}' has no threshold set")]
    UnknownDefaultMode(String),

    #[error("invalid ensemble configuration: {0}")]
    InvalidEnsemble(String),

    #[error("invalid learning configuration: {0}")]
    InvalidLearning(String),

    #[error("invalid fallback configuration: {0}")]
    InvalidFallback(String),
}

// ============================================================================
// Sections
// ============================================================================

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8881
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "crisis_nlp=info,tower_http=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Ensemble-wide defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default = "default_algorithm")]
    pub default_algorithm: ConsensusAlgorithm,
    /// Threshold table key when a request names none (defaults to the algorithm name)
    #[serde(default)]
    pub default_mode: Option<String>,
    #[serde(default)]
    pub resolution_strategy: ResolutionStrategy,
    /// Per-classifier timeout unless the classifier overrides it
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    /// Candidate labels sent to classifiers that do not pin their own
    #[serde(default = "default_candidate_labels")]
    pub candidate_labels: Vec<String>,
    /// Variance at or below which agreement is UNANIMOUS
    #[serde(default = "default_unanimous_variance")]
    pub unanimous_variance: f64,
    /// Variance at or below which agreement is STRONG
    #[serde(default = "default_strong_variance")]
    pub strong_variance: f64,
}

fn default_algorithm() -> ConsensusAlgorithm {
    ConsensusAlgorithm::ConflictAware
}

fn default_classifier_timeout_ms() -> u64 {
    5_000
}

fn default_candidate_labels() -> Vec<String> {
    [
        "suicidal ideation",
        "self-harm",
        "severe emotional distress",
        "mild emotional concern",
        "no crisis",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_unanimous_variance() -> f64 {
    0.001
}

fn default_strong_variance() -> f64 {
    0.01
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            default_algorithm: default_algorithm(),
            default_mode: None,
            resolution_strategy: ResolutionStrategy::default(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            candidate_labels: default_candidate_labels(),
            unanimous_variance: default_unanimous_variance(),
            strong_variance: default_strong_variance(),
        }
    }
}

/// One ensemble member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model_id: String,
    #[serde(default)]
    pub role: ClassifierRole,
    /// Inference endpoint (zero-shot classification API)
    pub endpoint: String,
    /// Model name forwarded to the endpoint, if it serves several
    #[serde(default)]
    pub model: Option<String>,
    /// Consensus weight (renormalized over the signals present)
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Overrides `ensemble.classifier_timeout_ms`
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Fixed label space (sentiment/emotion/irony models)
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    /// Labels whose scores add up to this classifier's crisis confidence
    #[serde(default)]
    pub crisis_labels: Vec<String>,
    /// Environment variable holding a bearer token for the endpoint
    #[serde(default)]
    pub api_token_env: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

/// ConflictDetector rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Variance above which scores disagree
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: f64,
    #[serde(default = "default_irony_label")]
    pub irony_label: String,
    #[serde(default = "default_irony_threshold")]
    pub irony_threshold: f64,
    #[serde(default = "default_negative_sentiment_label")]
    pub negative_sentiment_label: String,
    #[serde(default = "default_negative_sentiment_threshold")]
    pub negative_sentiment_threshold: f64,
    #[serde(default = "default_positive_emotions")]
    pub positive_emotions: Vec<String>,
    #[serde(default = "default_distress_emotions")]
    pub distress_emotions: Vec<String>,
    #[serde(default = "default_emotion_threshold")]
    pub emotion_threshold: f64,
    /// Crisis-classifier confidence at which its label counts as crisis
    #[serde(default = "default_crisis_positive_floor")]
    pub crisis_positive_floor: f64,
}

fn default_conflict_threshold() -> f64 {
    0.04
}

fn default_irony_label() -> String {
    "irony".to_string()
}

fn default_irony_threshold() -> f64 {
    0.7
}

fn default_negative_sentiment_label() -> String {
    "negative".to_string()
}

fn default_negative_sentiment_threshold() -> f64 {
    0.7
}

fn default_positive_emotions() -> Vec<String> {
    ["joy", "love", "optimism", "gratitude", "relief", "amusement"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_distress_emotions() -> Vec<String> {
    ["sadness", "fear", "anger", "grief", "despair", "remorse"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_emotion_threshold() -> f64 {
    0.6
}

fn default_crisis_positive_floor() -> f64 {
    0.5
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            conflict_threshold: default_conflict_threshold(),
            irony_label: default_irony_label(),
            irony_threshold: default_irony_threshold(),
            negative_sentiment_label: default_negative_sentiment_label(),
            negative_sentiment_threshold: default_negative_sentiment_threshold(),
            positive_emotions: default_positive_emotions(),
            distress_emotions: default_distress_emotions(),
            emotion_threshold: default_emotion_threshold(),
            crisis_positive_floor: default_crisis_positive_floor(),
        }
    }
}

/// Step multiplier per adjusted level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityMultipliers {
    #[serde(default = "default_multiplier_low")]
    pub low: f64,
    #[serde(default = "default_multiplier_medium")]
    pub medium: f64,
    #[serde(default = "default_multiplier_high")]
    pub high: f64,
    #[serde(default = "default_multiplier_critical")]
    pub critical: f64,
}

fn default_multiplier_low() -> f64 {
    0.8
}

fn default_multiplier_medium() -> f64 {
    1.0
}

fn default_multiplier_high() -> f64 {
    1.2
}

fn default_multiplier_critical() -> f64 {
    1.5
}

impl Default for SeverityMultipliers {
    fn default() -> Self {
        Self {
            low: default_multiplier_low(),
            medium: default_multiplier_medium(),
            high: default_multiplier_high(),
            critical: default_multiplier_critical(),
        }
    }
}

impl SeverityMultipliers {
    pub fn for_level(&self, level: CrisisLevel) -> f64 {
        match level {
            CrisisLevel::None => 0.0,
            CrisisLevel::Low => self.low,
            CrisisLevel::Medium => self.medium,
            CrisisLevel::High => self.high,
            CrisisLevel::Critical => self.critical,
        }
    }
}

/// Hard limits no threshold may cross
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for SensitivityBounds {
    fn default() -> Self {
        Self {
            min: 0.05,
            max: 0.95,
        }
    }
}

impl SensitivityBounds {
    /// Every bound of `set` must lie inside `[min, max]`
    pub fn check(&self, set: &ThresholdSet) -> Result<(), ThresholdConfigError> {
        for level in CrisisLevel::BOUNDED {
            let value = set.bound(level);
            if !(self.min..=self.max).contains(&value) {
                return Err(ThresholdConfigError::OutsideSensitivityBounds {
                    level,
                    value,
                    min: self.min,
                    max: self.max,
                });
            }
        }
        Ok(())
    }
}

/// LearningSystem parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_learning_enabled")]
    pub enabled: bool,
    #[serde(default = "default_base_learning_rate")]
    pub base_learning_rate: f64,
    #[serde(default = "default_min_adjustment")]
    pub min_confidence_adjustment: f64,
    #[serde(default = "default_max_adjustment")]
    pub max_confidence_adjustment: f64,
    #[serde(default)]
    pub severity_multipliers: SeverityMultipliers,
    #[serde(default)]
    pub sensitivity_bounds: SensitivityBounds,
    #[serde(default = "default_max_drift")]
    pub max_drift_from_baseline: f64,
    #[serde(default = "default_max_adjustments_per_day")]
    pub max_adjustments_per_day: u32,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_learning_enabled() -> bool {
    true
}

fn default_base_learning_rate() -> f64 {
    0.02
}

fn default_min_adjustment() -> f64 {
    0.005
}

fn default_max_adjustment() -> f64 {
    0.05
}

fn default_max_drift() -> f64 {
    0.15
}

fn default_max_adjustments_per_day() -> u32 {
    50
}

fn default_history_capacity() -> usize {
    1_000
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: default_learning_enabled(),
            base_learning_rate: default_base_learning_rate(),
            min_confidence_adjustment: default_min_adjustment(),
            max_confidence_adjustment: default_max_adjustment(),
            severity_multipliers: SeverityMultipliers::default(),
            sensitivity_bounds: SensitivityBounds::default(),
            max_drift_from_baseline: default_max_drift(),
            max_adjustments_per_day: default_max_adjustments_per_day(),
            history_capacity: default_history_capacity(),
        }
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

/// Phrases that indicate one crisis level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub level: CrisisLevel,
    /// Confidence emitted when this rule matches
    pub score: f64,
    pub phrases: Vec<String>,
}

/// Keyword fallback used when every semantic classifier fails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub patterns: Vec<PatternRule>,
}

fn default_fallback_enabled() -> bool {
    true
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: default_fallback_enabled(),
            patterns: Vec::new(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub classifiers: Vec<ClassifierConfig>,
    #[serde(default)]
    pub conflict: ConflictConfig,
    #[serde(default = "default_threshold_tables")]
    pub thresholds: ThresholdTables,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Built-in threshold table per consensus algorithm
pub fn default_threshold_tables() -> ThresholdTables {
    let mut tables = ThresholdTables::new();
    tables.insert(
        ConsensusAlgorithm::Weighted.as_str().to_string(),
        ThresholdSet::with_bounds(0.15, 0.35, 0.60, 0.80),
    );
    tables.insert(
        ConsensusAlgorithm::Majority.as_str().to_string(),
        ThresholdSet::with_bounds(0.15, 0.35, 0.60, 0.80),
    );
    tables.insert(
        ConsensusAlgorithm::Unanimous.as_str().to_string(),
        ThresholdSet::with_bounds(0.20, 0.40, 0.65, 0.85),
    );
    tables.insert(
        ConsensusAlgorithm::ConflictAware.as_str().to_string(),
        ThresholdSet::with_bounds(0.12, 0.30, 0.55, 0.75),
    );
    tables
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            ensemble: EnsembleConfig::default(),
            classifiers: Vec::new(),
            conflict: ConflictConfig::default(),
            thresholds: default_threshold_tables(),
            learning: LearningConfig::default(),
            cache: CacheConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Threshold table key used when a request names none
    pub fn default_mode(&self) -> String {
        self.ensemble
            .default_mode
            .clone()
            .unwrap_or_else(|| self.ensemble.default_algorithm.as_str().to_string())
    }

    /// Timeout for one classifier
    pub fn classifier_timeout(&self, classifier: &ClassifierConfig) -> Duration {
        Duration::from_millis(
            classifier
                .timeout_ms
                .unwrap_or(self.ensemble.classifier_timeout_ms),
        )
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for classifier in &self.classifiers {
            if !seen.insert(classifier.model_id.as_str()) {
                return Err(ConfigError::DuplicateClassifier(classifier.model_id.clone()));
            }
            let invalid = |reason: &str| ConfigError::InvalidClassifier {
                model_id: classifier.model_id.clone(),
                reason: reason.to_string(),
            };
            if classifier.model_id.trim().is_empty() {
                return Err(invalid("model_id must not be empty"));
            }
            if classifier.endpoint.trim().is_empty() {
                return Err(invalid("endpoint must not be empty"));
            }
            if !classifier.weight.is_finite() || classifier.weight < 0.0 {
                return Err(invalid("weight must be a finite value >= 0"));
            }
            if classifier.timeout_ms == Some(0) {
                return Err(invalid("timeout_ms must be > 0"));
            }
        }

        if self.thresholds.is_empty() {
            return Err(ConfigError::NoThresholdSets);
        }
        for (mode, set) in &self.thresholds {
            set.validate().map_err(|source| ConfigError::InvalidThresholds {
                mode: mode.clone(),
                source,
            })?;
        }

        let ensemble = &self.ensemble;
        if ensemble.classifier_timeout_ms == 0 {
            return Err(ConfigError::InvalidEnsemble(
                "classifier_timeout_ms must be > 0".to_string(),
            ));
        }
        if !(0.0 <= ensemble.unanimous_variance
            && ensemble.unanimous_variance <= ensemble.strong_variance
            && ensemble.strong_variance <= self.conflict.conflict_threshold)
        {
            return Err(ConfigError::InvalidEnsemble(format!(
                "variance thresholds must satisfy 0 <= unanimous ({}) <= strong ({}) <= conflict ({})",
                ensemble.unanimous_variance,
                ensemble.strong_variance,
                self.conflict.conflict_threshold
            )));
        }

        let learning = &self.learning;
        let bounds = learning.sensitivity_bounds;
        if !(0.0..=1.0).contains(&bounds.min) || !(0.0..=1.0).contains(&bounds.max) || bounds.min >= bounds.max {
            return Err(ConfigError::InvalidLearning(format!(
                "sensitivity_bounds must satisfy 0 <= min ({}) < max ({}) <= 1",
                bounds.min, bounds.max
            )));
        }
        if !(learning.min_confidence_adjustment > 0.0
            && learning.min_confidence_adjustment <= learning.max_confidence_adjustment)
        {
            return Err(ConfigError::InvalidLearning(format!(
                "adjustment step must satisfy 0 < min ({}) <= max ({})",
                learning.min_confidence_adjustment, learning.max_confidence_adjustment
            )));
        }
        if !(learning.base_learning_rate > 0.0) || !(learning.max_drift_from_baseline > 0.0) {
            return Err(ConfigError::InvalidLearning(
                "base_learning_rate and max_drift_from_baseline must be > 0".to_string(),
            ));
        }
        if learning.history_capacity == 0
            || learning.history_capacity < learning.max_adjustments_per_day as usize
        {
            return Err(ConfigError::InvalidLearning(format!(
                "history_capacity ({}) must be > 0 and >= max_adjustments_per_day ({})",
                learning.history_capacity, learning.max_adjustments_per_day
            )));
        }
        // Learning starts from these sets, so they must already sit inside the hard limits
        for (mode, set) in &self.thresholds {
            bounds.check(set).map_err(|source| ConfigError::InvalidThresholds {
                mode: mode.clone(),
                source,
            })?;
        }

        let default_mode = self.default_mode();
        if !self.thresholds.contains_key(&default_mode) {
            return Err(ConfigError::UnknownDefaultMode(default_mode));
        }

        for rule in &self.fallback.patterns {
            if !(0.0..=1.0).contains(&rule.score) {
                return Err(ConfigError::InvalidFallback(format!(
                    "pattern score {} for level '{}' outside [0.0, 1.0]",
                    rule.score, rule.level
                )));
            }
        }

        Ok(())
    }
}
