//! ConsensusEngine
//!
//! Combines the scoring signals of one request into a single score, label
//! and agreement level. Signals are sorted by `model_id` before any
//! arithmetic, so the outcome does not depend on arrival order.

use crate::thresholds::ThresholdSet;
use crate::types::{AgreementLevel, ClassifierSignal, ConflictRecord, ConsensusAlgorithm, CrisisLevel};
use std::collections::BTreeMap;
use tracing::warn;

/// Variance cut-offs for the agreement level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgreementThresholds {
    pub unanimous_variance: f64,
    pub strong_variance: f64,
    /// Above this the ensemble significantly disagrees
    pub conflict_variance: f64,
}

impl Default for AgreementThresholds {
    fn default() -> Self {
        Self {
            unanimous_variance: 0.001,
            strong_variance: 0.01,
            conflict_variance: 0.04,
        }
    }
}

impl AgreementThresholds {
    pub fn classify(&self, variance: f64) -> AgreementLevel {
        if variance <= self.unanimous_variance {
            AgreementLevel::Unanimous
        } else if variance <= self.strong_variance {
            AgreementLevel::Strong
        } else if variance <= self.conflict_variance {
            AgreementLevel::Weak
        } else {
            AgreementLevel::SignificantDisagreement
        }
    }
}

/// Output of one combination
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusOutcome {
    pub score: f64,
    pub label: String,
    pub agreement_level: AgreementLevel,
    /// Population variance of the scoring confidences
    pub variance: f64,
}

impl ConsensusOutcome {
    fn empty() -> Self {
        Self {
            score: 0.0,
            label: CrisisLevel::None.as_str().to_string(),
            agreement_level: AgreementLevel::SignificantDisagreement,
            variance: 0.0,
        }
    }
}

/// Population variance (0.0 for fewer than two values)
pub fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// `clamp(1 - 2σ, 0, 1) × coverage`
///
/// σ is the standard deviation of the scoring confidences; coverage is the
/// share of configured classifiers that answered.
pub fn decision_confidence(signals: &[ClassifierSignal], configured: usize) -> f64 {
    let confidences: Vec<f64> = signals
        .iter()
        .filter(|s| s.role.is_scoring())
        .map(|s| s.confidence)
        .collect();
    if confidences.is_empty() || configured == 0 {
        return 0.0;
    }
    let sigma = population_variance(&confidences).sqrt();
    let coverage = (signals.len() as f64 / configured as f64).min(1.0);
    (1.0 - 2.0 * sigma).clamp(0.0, 1.0) * coverage
}

/// Combines signals per the selected algorithm
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    agreement: AgreementThresholds,
}

impl ConsensusEngine {
    pub fn new(agreement: AgreementThresholds) -> Self {
        Self { agreement }
    }

    /// Combine `signals` into score, label and agreement
    ///
    /// `weights` holds the effective per-model weights; a model without an
    /// entry weighs 1.0. `thresholds` is needed by majority and unanimous
    /// to bucket individual signals.
    pub fn combine(
        &self,
        signals: &[ClassifierSignal],
        conflict: Option<&ConflictRecord>,
        algorithm: ConsensusAlgorithm,
        thresholds: &ThresholdSet,
        weights: &BTreeMap<String, f64>,
    ) -> ConsensusOutcome {
        let mut scoring: Vec<&ClassifierSignal> =
            signals.iter().filter(|s| s.role.is_scoring()).collect();
        if scoring.is_empty() {
            return ConsensusOutcome::empty();
        }
        scoring.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        let weighted: Vec<(&ClassifierSignal, f64)> = {
            let raw: Vec<f64> = scoring
                .iter()
                .map(|s| effective_weight(&s.model_id, weights))
                .collect();
            let all_zero = raw.iter().all(|w| *w == 0.0);
            scoring
                .iter()
                .zip(raw)
                .map(|(s, w)| (*s, if all_zero { 1.0 } else { w }))
                .collect()
        };

        let confidences: Vec<f64> = scoring.iter().map(|s| s.confidence).collect();
        let variance = population_variance(&confidences);
        let variance_agreement = self.agreement.classify(variance);

        let (score, label, agreement_level) = match algorithm {
            ConsensusAlgorithm::Weighted => (
                weighted_mean(&weighted),
                heaviest_label(&weighted),
                variance_agreement,
            ),
            ConsensusAlgorithm::Majority => {
                let (score, label) = majority(&weighted, thresholds);
                (score, label, variance_agreement)
            }
            ConsensusAlgorithm::Unanimous => {
                let asserted = weighted
                    .iter()
                    .all(|(s, _)| thresholds.level_for(s.confidence) >= CrisisLevel::Low);
                if asserted {
                    (weighted_mean(&weighted), heaviest_label(&weighted), variance_agreement)
                } else {
                    let dissent = weighted
                        .iter()
                        .map(|(s, _)| *s)
                        .min_by(|a, b| a.confidence.total_cmp(&b.confidence));
                    match dissent {
                        Some(s) => (s.confidence, s.label.clone(), variance_agreement),
                        None => return ConsensusOutcome::empty(),
                    }
                }
            }
            ConsensusAlgorithm::ConflictAware => {
                let agreement = if conflict.is_some() {
                    AgreementLevel::SignificantDisagreement
                } else {
                    variance_agreement
                };
                (weighted_mean(&weighted), heaviest_label(&weighted), agreement)
            }
        };

        ConsensusOutcome {
            score: score.clamp(0.0, 1.0),
            label,
            agreement_level,
            variance,
        }
    }
}

fn effective_weight(model_id: &str, weights: &BTreeMap<String, f64>) -> f64 {
    let weight = weights.get(model_id).copied().unwrap_or(1.0);
    if !weight.is_finite() || weight < 0.0 {
        warn!(model_id, weight, "Invalid consensus weight treated as 0");
        return 0.0;
    }
    weight
}

fn weighted_mean(weighted: &[(&ClassifierSignal, f64)]) -> f64 {
    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return 0.0;
    }
    weighted.iter().map(|(s, w)| s.confidence * w).sum::<f64>() / total
}

/// Label with the largest summed weight; ties go to the smaller label
fn heaviest_label(weighted: &[(&ClassifierSignal, f64)]) -> String {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for (signal, weight) in weighted {
        *totals.entry(signal.label.as_str()).or_insert(0.0) += weight;
    }
    let mut best: Option<(&str, f64)> = None;
    for (label, total) in totals {
        match best {
            Some((_, best_total)) if total <= best_total => {}
            _ => best = Some((label, total)),
        }
    }
    best.map(|(label, _)| label.to_string())
        .unwrap_or_else(|| CrisisLevel::None.as_str().to_string())
}

/// Plurality level (ties to the higher level); mean confidence of its members
fn majority(weighted: &[(&ClassifierSignal, f64)], thresholds: &ThresholdSet) -> (f64, String) {
    let mut buckets: BTreeMap<CrisisLevel, Vec<(&ClassifierSignal, f64)>> = BTreeMap::new();
    for (signal, weight) in weighted {
        buckets
            .entry(thresholds.level_for(signal.confidence))
            .or_default()
            .push((*signal, *weight));
    }

    // BTreeMap iterates lowest level first, so `>=` keeps the higher level on ties
    let mut winner: Option<&Vec<(&ClassifierSignal, f64)>> = None;
    for members in buckets.values() {
        match winner {
            Some(current) if members.len() < current.len() => {}
            _ => winner = Some(members),
        }
    }

    match winner {
        Some(members) => {
            let score =
                members.iter().map(|(s, _)| s.confidence).sum::<f64>() / members.len() as f64;
            (score, heaviest_label(members))
        }
        None => (0.0, CrisisLevel::None.as_str().to_string()),
    }
}
