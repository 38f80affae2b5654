//! HTTP inference classifier
//!
//! Talks to a remote inference endpoint speaking the common zero-shot
//! classification wire format:
//!
//! ```json
//! POST {"inputs": "...", "parameters": {"candidate_labels": ["a", "b"]}}
//! 200  {"labels": ["a", "b"], "scores": [0.8, 0.2]}
//! ```
//!
//! Plain text-classification answers (`[{"label": "...", "score": ...}]`,
//! optionally nested one level) are accepted as well, so sentiment and
//! emotion models can sit behind the same adapter.

use super::{ClassifierError, ClassifierOutput, SemanticClassifier};
use crate::config::ClassifierConfig;
use crate::types::ClassifierRole;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("crisis-nlp/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Serialize)]
struct InferenceParameters<'a> {
    candidate_labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    ZeroShot { labels: Vec<String>, scores: Vec<f64> },
    Scored(Vec<LabelScore>),
    Nested(Vec<Vec<LabelScore>>),
}

impl InferenceResponse {
    fn into_scores(self) -> Result<BTreeMap<String, f64>, ClassifierError> {
        match self {
            Self::ZeroShot { labels, scores } => {
                if labels.len() != scores.len() {
                    return Err(ClassifierError::InvalidResponse(format!(
                        "{} labels but {} scores",
                        labels.len(),
                        scores.len()
                    )));
                }
                Ok(labels.into_iter().zip(scores).collect())
            }
            Self::Scored(items) => Ok(items.into_iter().map(|i| (i.label, i.score)).collect()),
            Self::Nested(batches) => Ok(batches
                .into_iter()
                .next()
                .unwrap_or_default()
                .into_iter()
                .map(|i| (i.label, i.score))
                .collect()),
        }
    }
}

/// Remote zero-shot classifier
pub struct HttpClassifier {
    model_id: String,
    role: ClassifierRole,
    endpoint: String,
    model: Option<String>,
    labels: Option<Vec<String>>,
    crisis_labels: Vec<String>,
    http_client: Client,
}

impl HttpClassifier {
    /// Build a classifier from its configuration entry
    ///
    /// `request_timeout` is a transport-level ceiling; the coordinator
    /// enforces the ensemble timeout independently.
    pub fn from_config(
        config: &ClassifierConfig,
        request_timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));

        if let Some(var) = &config.api_token_env {
            match std::env::var(var) {
                Ok(token) => {
                    let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                        .map_err(|e| ClassifierError::Request(format!("invalid token in {}: {}", var, e)))?;
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => warn!(
                    model_id = %config.model_id,
                    env_var = %var,
                    "API token variable not set, calling endpoint unauthenticated"
                ),
            }
        }

        let http_client = Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClassifierError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            model_id: config.model_id.clone(),
            role: config.role,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            labels: config.labels.clone(),
            crisis_labels: config.crisis_labels.clone(),
            http_client,
        })
    }
}

#[async_trait]
impl SemanticClassifier for HttpClassifier {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn role(&self) -> ClassifierRole {
        self.role
    }

    fn pinned_labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    async fn classify(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> Result<ClassifierOutput, ClassifierError> {
        let body = InferenceRequest {
            inputs: text,
            parameters: InferenceParameters { candidate_labels },
            model: self.model.as_deref(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Request(format!("transport timeout: {}", e))
                } else {
                    ClassifierError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Request(format!(
                "endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        let output = interpret_scores(parsed.into_scores()?, &self.crisis_labels)?;
        debug!(
            model_id = %self.model_id,
            label = %output.label,
            confidence = output.confidence,
            "Classifier responded"
        );
        Ok(output)
    }
}

/// Turn per-label scores into label + crisis confidence
///
/// The label is the top-scoring label (ties go to the lexicographically
/// smaller one). Confidence is the summed score of `crisis_labels`
/// (capped at 1.0), or the top score when no crisis labels are configured.
fn interpret_scores(
    scores: BTreeMap<String, f64>,
    crisis_labels: &[String],
) -> Result<ClassifierOutput, ClassifierError> {
    if let Some((_, bad)) = scores.iter().find(|(_, s)| !s.is_finite()) {
        return Err(ClassifierError::InvalidConfidence(*bad));
    }

    let mut top: Option<(&String, f64)> = None;
    for (label, &score) in &scores {
        match top {
            Some((_, best)) if score <= best => {}
            _ => top = Some((label, score)),
        }
    }
    let (label, top_score) = top
        .map(|(l, s)| (l.clone(), s))
        .ok_or_else(|| ClassifierError::InvalidResponse("no label scores".to_string()))?;

    let confidence = if crisis_labels.is_empty() {
        top_score
    } else {
        crisis_labels
            .iter()
            .filter_map(|l| scores.get(l))
            .sum::<f64>()
            .min(1.0)
    };

    Ok(ClassifierOutput {
        label,
        confidence,
        raw_label_scores: scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(l, s)| (l.to_string(), *s)).collect()
    }

    #[test]
    fn test_zero_shot_response_parsing() {
        let json = r#"{"sequence": "x", "labels": ["self-harm", "no crisis"], "scores": [0.7, 0.3]}"#;
        let parsed: InferenceResponse = serde_json::from_str(json).unwrap();
        let map = parsed.into_scores().unwrap();
        assert_eq!(map.get("self-harm"), Some(&0.7));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_text_classification_response_parsing() {
        let flat = r#"[{"label": "negative", "score": 0.9}, {"label": "positive", "score": 0.1}]"#;
        let parsed: InferenceResponse = serde_json::from_str(flat).unwrap();
        assert_eq!(parsed.into_scores().unwrap().len(), 2);

        let nested = r#"[[{"label": "joy", "score": 0.6}, {"label": "sadness", "score": 0.4}]]"#;
        let parsed: InferenceResponse = serde_json::from_str(nested).unwrap();
        assert_eq!(parsed.into_scores().unwrap().get("joy"), Some(&0.6));
    }

    #[test]
    fn test_mismatched_zero_shot_lengths_rejected() {
        let parsed: InferenceResponse =
            serde_json::from_str(r#"{"labels": ["a", "b"], "scores": [1.0]}"#).unwrap();
        assert!(matches!(
            parsed.into_scores(),
            Err(ClassifierError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_crisis_confidence_sums_crisis_labels() {
        let crisis = vec!["suicidal ideation".to_string(), "self-harm".to_string()];
        let output = interpret_scores(
            scores(&[("suicidal ideation", 0.35), ("self-harm", 0.25), ("no crisis", 0.4)]),
            &crisis,
        )
        .unwrap();
        assert_eq!(output.label, "no crisis");
        assert!((output.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_defaults_to_top_score() {
        let output = interpret_scores(scores(&[("b", 0.5), ("a", 0.5)]), &[]).unwrap();
        // Tie goes to the lexicographically smaller label
        assert_eq!(output.label, "a");
        assert_eq!(output.confidence, 0.5);
    }

    #[test]
    fn test_non_finite_score_is_an_error() {
        assert!(matches!(
            interpret_scores(scores(&[("a", f64::NAN)]), &[]),
            Err(ClassifierError::InvalidConfidence(_))
        ));
        assert!(matches!(
            interpret_scores(BTreeMap::new(), &[]),
            Err(ClassifierError::InvalidResponse(_))
        ));
    }
}
