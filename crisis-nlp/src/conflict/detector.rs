//! ConflictDetector
//!
//! Rules, in priority order (first match wins when several fire):
//! 1. SCORE_DISAGREEMENT  - variance of scoring confidences above threshold
//! 2. LABEL_DISAGREEMENT  - crisis classifiers report different top labels
//! 3. EMOTION_MISMATCH    - dominant emotion contradicts the crisis reading
//! 4. IRONY_SENTIMENT     - confident irony on top of strongly negative sentiment
//!
//! Pure function of the signal set. pre/post scores on the returned record
//! are zero until the consensus score is known.

use crate::config::ConflictConfig;
use crate::consensus::population_variance;
use crate::types::{ClassifierRole, ClassifierSignal, ConflictRecord, ConflictSeverity, ConflictType};

/// Rule-based disagreement finder
pub struct ConflictDetector {
    config: ConflictConfig,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(ConflictConfig::default())
    }
}

impl ConflictDetector {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    /// Most relevant conflict in `signals`, if any
    pub fn detect(&self, signals: &[ClassifierSignal]) -> Option<ConflictRecord> {
        let mut ordered: Vec<&ClassifierSignal> = signals.iter().collect();
        ordered.sort_by(|a, b| a.model_id.cmp(&b.model_id));

        let scoring: Vec<&ClassifierSignal> =
            ordered.iter().copied().filter(|s| s.role.is_scoring()).collect();
        let variance =
            population_variance(&scoring.iter().map(|s| s.confidence).collect::<Vec<_>>());

        let found = [
            self.score_disagreement(&scoring, variance),
            self.label_disagreement(&ordered, variance),
            self.emotion_mismatch(&ordered, variance),
            self.irony_sentiment(&ordered, variance),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|record| record.conflict_type.priority());

        if let Some(record) = &found {
            tracing::debug!(
                conflict_type = ?record.conflict_type,
                severity = ?record.severity,
                variance = record.variance,
                "Conflict detected: {}",
                record.description
            );
        }
        found
    }

    fn score_disagreement(&self, scoring: &[&ClassifierSignal], variance: f64) -> Option<ConflictRecord> {
        let threshold = self.config.conflict_threshold;
        if scoring.len() < 2 || variance <= threshold {
            return None;
        }
        let severity = if variance >= 2.0 * threshold {
            ConflictSeverity::High
        } else {
            ConflictSeverity::Medium
        };
        Some(record(
            ConflictType::ScoreDisagreement,
            severity,
            variance,
            scoring,
            scoring.iter().map(|s| s.confidence).collect(),
            format!(
                "confidence variance {:.4} exceeds {:.4} across {} classifiers",
                variance,
                threshold,
                scoring.len()
            ),
        ))
    }

    fn label_disagreement(&self, signals: &[&ClassifierSignal], variance: f64) -> Option<ConflictRecord> {
        let crisis = by_role(signals, ClassifierRole::Crisis);
        if crisis.len() < 2 {
            return None;
        }
        let first = &crisis[0].label;
        if crisis.iter().all(|s| &s.label == first) {
            return None;
        }

        let floor = self.config.crisis_positive_floor;
        let split = crisis.iter().any(|s| s.confidence >= floor)
            && crisis.iter().any(|s| s.confidence < floor);
        let severity = if split {
            ConflictSeverity::High
        } else {
            ConflictSeverity::Medium
        };

        let labels: Vec<String> = crisis
            .iter()
            .map(|s| format!("{}={}", s.model_id, s.label))
            .collect();
        Some(record(
            ConflictType::LabelDisagreement,
            severity,
            variance,
            &crisis,
            crisis.iter().map(|s| s.confidence).collect(),
            format!("crisis classifiers disagree on label ({})", labels.join(", ")),
        ))
    }

    fn emotion_mismatch(&self, signals: &[&ClassifierSignal], variance: f64) -> Option<ConflictRecord> {
        let crisis = by_role(signals, ClassifierRole::Crisis);
        if crisis.is_empty() {
            return None;
        }
        let floor = self.config.crisis_positive_floor;
        let crisis_positive = crisis.iter().any(|s| s.confidence >= floor);

        for emotion in by_role(signals, ClassifierRole::Emotion) {
            let strength = emotion.label_score(&emotion.label).unwrap_or(emotion.confidence);
            if strength < self.config.emotion_threshold {
                continue;
            }
            let is_positive = contains_label(&self.config.positive_emotions, &emotion.label);
            let is_distress = contains_label(&self.config.distress_emotions, &emotion.label);

            let contradiction = if is_positive && crisis_positive {
                Some("positive emotion alongside a crisis reading")
            } else if is_distress && !crisis_positive {
                Some("distress emotion alongside a non-crisis reading")
            } else {
                None
            };

            if let Some(what) = contradiction {
                let mut involved = vec![emotion];
                involved.extend(crisis.iter().copied());
                return Some(record(
                    ConflictType::EmotionMismatch,
                    ConflictSeverity::Medium,
                    variance,
                    &involved,
                    involved.iter().map(|s| s.confidence).collect(),
                    format!("{}: '{}' at {:.2}", what, emotion.label, strength),
                ));
            }
        }
        None
    }

    fn irony_sentiment(&self, signals: &[&ClassifierSignal], variance: f64) -> Option<ConflictRecord> {
        let irony = by_role(signals, ClassifierRole::Irony).into_iter().find_map(|s| {
            s.label_score(&self.config.irony_label)
                .filter(|score| *score >= self.config.irony_threshold)
                .map(|score| (s, score))
        })?;
        let sentiment = by_role(signals, ClassifierRole::Sentiment).into_iter().find_map(|s| {
            s.label_score(&self.config.negative_sentiment_label)
                .filter(|score| *score >= self.config.negative_sentiment_threshold)
                .map(|score| (s, score))
        })?;

        let (irony_signal, irony_score) = irony;
        let (sentiment_signal, negative_score) = sentiment;
        // The ironic reading discounts the sentiment signal by the irony score
        let ironic_reading = sentiment_signal.confidence * (1.0 - irony_score);

        Some(record(
            ConflictType::IronySentiment,
            ConflictSeverity::Low,
            variance,
            &[irony_signal, sentiment_signal],
            vec![sentiment_signal.confidence, ironic_reading],
            format!(
                "irony {:.2} on top of negative sentiment {:.2}",
                irony_score, negative_score
            ),
        ))
    }
}

fn by_role<'a>(signals: &[&'a ClassifierSignal], role: ClassifierRole) -> Vec<&'a ClassifierSignal> {
    signals.iter().copied().filter(|s| s.role == role).collect()
}

fn contains_label(list: &[String], label: &str) -> bool {
    list.iter().any(|l| l.eq_ignore_ascii_case(label))
}

fn record(
    conflict_type: ConflictType,
    severity: ConflictSeverity,
    variance: f64,
    involved: &[&ClassifierSignal],
    disagreeing_confidences: Vec<f64>,
    description: String,
) -> ConflictRecord {
    ConflictRecord {
        conflict_type,
        severity,
        resolution_strategy: None,
        pre_resolution_score: 0.0,
        post_resolution_score: 0.0,
        variance,
        involved_models: involved.iter().map(|s| s.model_id.clone()).collect(),
        disagreeing_confidences,
        description,
    }
}
