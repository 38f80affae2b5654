//! Keyword fallback classifier
//!
//! Matches operator-supplied phrase lists against normalized text. Used only
//! when every semantic classifier failed; its signal carries the model id
//! `pattern_fallback`.

use super::{ClassifierError, ClassifierOutput, SemanticClassifier};
use crate::config::PatternRule;
use crate::types::{ClassifierRole, CrisisLevel};
use async_trait::async_trait;
use crisis_common::text::normalize;
use std::collections::BTreeMap;

/// Model id of the fallback signal
pub const FALLBACK_MODEL_ID: &str = "pattern_fallback";

struct CompiledRule {
    level: CrisisLevel,
    score: f64,
    phrases: Vec<String>,
}

/// Phrase-list classifier
pub struct KeywordClassifier {
    rules: Vec<CompiledRule>,
}

impl KeywordClassifier {
    pub fn new(patterns: &[PatternRule]) -> Self {
        let rules = patterns
            .iter()
            .map(|rule| CompiledRule {
                level: rule.level,
                score: rule.score,
                phrases: rule
                    .phrases
                    .iter()
                    .map(|p| normalize(p))
                    .filter(|p| !p.is_empty())
                    .collect(),
            })
            .filter(|rule| !rule.phrases.is_empty())
            .collect();
        Self { rules }
    }

    /// True when at least one usable phrase is configured
    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    fn evaluate(&self, text: &str) -> ClassifierOutput {
        let text = normalize(text);
        let mut raw_label_scores = BTreeMap::new();
        let mut best: Option<(CrisisLevel, f64)> = None;

        for rule in &self.rules {
            if !rule.phrases.iter().any(|p| text.contains(p.as_str())) {
                continue;
            }
            let entry = raw_label_scores
                .entry(rule.level.as_str().to_string())
                .or_insert(0.0_f64);
            *entry = entry.max(rule.score);

            let better = match best {
                None => true,
                Some((level, score)) => (rule.level, rule.score) > (level, score),
            };
            if better {
                best = Some((rule.level, rule.score));
            }
        }

        match best {
            Some((level, score)) => ClassifierOutput {
                label: level.as_str().to_string(),
                confidence: score,
                raw_label_scores,
            },
            None => ClassifierOutput {
                label: CrisisLevel::None.as_str().to_string(),
                confidence: 0.0,
                raw_label_scores,
            },
        }
    }
}

#[async_trait]
impl SemanticClassifier for KeywordClassifier {
    fn model_id(&self) -> &str {
        FALLBACK_MODEL_ID
    }

    fn role(&self) -> ClassifierRole {
        ClassifierRole::Pattern
    }

    async fn classify(
        &self,
        text: &str,
        _candidate_labels: &[String],
    ) -> Result<ClassifierOutput, ClassifierError> {
        Ok(self.evaluate(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<PatternRule> {
        vec![
            PatternRule {
                level: CrisisLevel::Medium,
                score: 0.45,
                phrases: vec!["can't cope".to_string(), "so alone".to_string()],
            },
            PatternRule {
                level: CrisisLevel::Critical,
                score: 0.9,
                phrases: vec!["end it  ALL".to_string()],
            },
            PatternRule {
                level: CrisisLevel::Low,
                score: 0.2,
                phrases: vec!["   ".to_string()],
            },
        ]
    }

    #[tokio::test]
    async fn test_highest_matching_level_wins() {
        let classifier = KeywordClassifier::new(&rules());
        let output = classifier
            .classify("I feel so alone and want to END it all", &[])
            .await
            .unwrap();
        assert_eq!(output.label, "critical");
        assert_eq!(output.confidence, 0.9);
        assert_eq!(output.raw_label_scores.len(), 2);
    }

    #[tokio::test]
    async fn test_no_match_reports_none() {
        let classifier = KeywordClassifier::new(&rules());
        let output = classifier.classify("lovely weather today", &[]).await.unwrap();
        assert_eq!(output.label, "none");
        assert_eq!(output.confidence, 0.0);
        assert!(output.raw_label_scores.is_empty());
    }

    #[test]
    fn test_blank_phrases_are_dropped() {
        let classifier = KeywordClassifier::new(&rules());
        assert_eq!(classifier.rules.len(), 2);
        assert!(classifier.has_rules());
        assert!(!KeywordClassifier::new(&[]).has_rules());
        assert_eq!(classifier.model_id(), FALLBACK_MODEL_ID);
    }
}
