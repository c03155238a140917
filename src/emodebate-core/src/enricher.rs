//! Emotion enrichment.
//!
//! Replaces the heuristic guess attached at generation time with scores from
//! a classification backend. Enrichment never fails a turn: when the backend
//! is missing or unreachable the heuristic vector is passed through as-is.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmotionConfig;
use crate::emotion::{EmotionSource, EmotionVector, is_known_label};
use crate::error::DebateError;

const CAPABILITY: &str = "emotion classification";

/// Number of labels kept after thresholding.
pub const TOP_LABELS: usize = 5;

/// A text classification backend returning (label, score) pairs.
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<Vec<(String, f32)>, DebateError>;
}

#[derive(Debug, Clone, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LabelScore {
    label: String,
    score: f32,
}

/// Inference endpoints answer either `[[{label, score}]]` or `[{label, score}]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Batched(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

impl InferenceResponse {
    fn into_scores(self) -> Vec<(String, f32)> {
        let scores = match self {
            InferenceResponse::Batched(mut batches) => {
                if batches.is_empty() {
                    Vec::new()
                } else {
                    batches.swap_remove(0)
                }
            }
            InferenceResponse::Flat(scores) => scores,
        };
        scores.into_iter().map(|s| (s.label, s.score)).collect()
    }
}

/// Classifier backed by a Hugging Face style text-classification endpoint.
pub struct HttpEmotionClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpEmotionClassifier {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DebateError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl EmotionClassifier for HttpEmotionClassifier {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn classify(&self, text: &str) -> Result<Vec<(String, f32)>, DebateError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&InferenceRequest { inputs: text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DebateError::unavailable(CAPABILITY, e.to_string()))?;

        if !response.status().is_success() {
            return Err(DebateError::unavailable(
                CAPABILITY,
                format!("endpoint answered {}", response.status()),
            ));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| DebateError::unavailable(CAPABILITY, format!("bad response: {}", e)))?;

        Ok(parsed.into_scores())
    }
}

/// Outcome of an enrichment attempt.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub vector: EmotionVector,
    /// Set when a configured classifier failed and the heuristic was kept.
    pub failure: Option<String>,
}

/// Scores turn text against the fixed label set.
pub struct EmotionEnricher {
    classifier: Option<Arc<dyn EmotionClassifier>>,
    threshold: f32,
    top_k: usize,
}

impl EmotionEnricher {
    pub fn new(classifier: Option<Arc<dyn EmotionClassifier>>, threshold: f32) -> Self {
        Self {
            classifier,
            threshold,
            top_k: TOP_LABELS,
        }
    }

    /// Enricher without a classifier; always keeps the heuristic guess.
    pub fn heuristic_only() -> Self {
        Self::new(None, 0.0)
    }

    /// Build the enricher described by `config`.
    pub fn from_config(config: &EmotionConfig, api_key: Option<String>) -> Result<Self, DebateError> {
        let classifier = match &config.endpoint {
            Some(endpoint) => Some(Arc::new(HttpEmotionClassifier::new(
                endpoint.clone(),
                api_key,
                Duration::from_secs(config.timeout_secs),
            )?) as Arc<dyn EmotionClassifier>),
            None => None,
        };
        Ok(Self::new(classifier, config.threshold))
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score `text`, falling back to `heuristic` when classification is unavailable.
    pub async fn enrich(&self, text: &str, heuristic: &EmotionVector) -> Enrichment {
        let Some(classifier) = &self.classifier else {
            return Enrichment {
                vector: heuristic.clone(),
                failure: None,
            };
        };

        match classifier.classify(text).await {
            Ok(scores) => {
                let vector = self.score(scores);
                if vector.is_empty() {
                    warn!(classifier = classifier.name(), "classifier returned no known labels, keeping heuristic emotions");
                    return Enrichment {
                        vector: heuristic.clone(),
                        failure: Some(format!("{} returned no known emotion labels", classifier.name())),
                    };
                }
                debug!(
                    classifier = classifier.name(),
                    primary = vector.primary_label(),
                    labels = vector.scores().len(),
                    "classified turn"
                );
                Enrichment {
                    vector,
                    failure: None,
                }
            }
            Err(e) => {
                warn!(classifier = classifier.name(), error = %e, "enrichment unavailable, keeping heuristic emotions");
                Enrichment {
                    vector: heuristic.clone(),
                    failure: Some(e.to_string()),
                }
            }
        }
    }

    /// Threshold and truncate raw scores into a classified vector.
    ///
    /// If nothing clears the threshold, the single strongest label is kept.
    /// The result is empty only when no score carries a known label.
    pub fn score(&self, scores: Vec<(String, f32)>) -> EmotionVector {
        let known = scores
            .into_iter()
            .filter(|(label, _)| is_known_label(label));
        let full = EmotionVector::new(known, EmotionSource::Classified);

        let mut pruned = full.clone();
        pruned.prune(self.threshold, self.top_k);
        if pruned.is_empty() {
            let mut strongest = full;
            strongest.prune(f32::NEG_INFINITY, 1);
            return strongest;
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::heuristic_emotions;

    struct Fixed(Vec<(String, f32)>);

    #[async_trait]
    impl EmotionClassifier for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn classify(&self, _text: &str) -> Result<Vec<(String, f32)>, DebateError> {
            Ok(self.0.clone())
        }
    }

    struct Offline;

    #[async_trait]
    impl EmotionClassifier for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        async fn classify(&self, _text: &str) -> Result<Vec<(String, f32)>, DebateError> {
            Err(DebateError::unavailable(CAPABILITY, "connection refused"))
        }
    }

    fn scores(pairs: &[(&str, f32)]) -> Vec<(String, f32)> {
        pairs.iter().map(|(l, s)| (l.to_string(), *s)).collect()
    }

    #[tokio::test]
    async fn test_threshold_and_top_five() {
        let classifier = Fixed(scores(&[
            ("anger", 0.9),
            ("annoyance", 0.8),
            ("disapproval", 0.7),
            ("fear", 0.6),
            ("sadness", 0.5),
            ("disgust", 0.4),
            ("joy", 0.2),
        ]));
        let enricher = EmotionEnricher::new(Some(Arc::new(classifier)), 0.3);
        let heuristic = heuristic_emotions("whatever");

        let result = enricher.enrich("text", &heuristic).await;
        assert!(result.failure.is_none());
        let v = result.vector;
        assert_eq!(v.source(), EmotionSource::Classified);
        assert_eq!(v.scores().len(), TOP_LABELS);
        assert_eq!(v.primary_label(), "anger");
        assert!(v.intensity("disgust").is_none());
        assert!(v.intensity("joy").is_none());
    }

    #[tokio::test]
    async fn test_unknown_labels_are_ignored() {
        let classifier = Fixed(scores(&[("boredom", 0.99), ("curiosity", 0.6)]));
        let enricher = EmotionEnricher::new(Some(Arc::new(classifier)), 0.3);
        let v = enricher.enrich("text", &heuristic_emotions("x")).await.vector;
        assert_eq!(v.primary_label(), "curiosity");
        assert_eq!(v.scores().len(), 1);
    }

    #[tokio::test]
    async fn test_no_known_labels_falls_back_to_heuristic() {
        let heuristic = heuristic_emotions("This is ridiculous nonsense.");
        for raw in [scores(&[("LABEL_0", 0.9), ("LABEL_1", 0.1)]), Vec::new()] {
            let enricher = EmotionEnricher::new(Some(Arc::new(Fixed(raw))), 0.3);
            let result = enricher.enrich("This is ridiculous nonsense.", &heuristic).await;
            assert_eq!(result.vector, heuristic);
            assert_eq!(result.vector.primary_label(), "annoyance");
            assert_eq!(result.vector.source(), EmotionSource::Heuristic);
            assert!(result.failure.unwrap().contains("no known emotion labels"));
        }
    }

    #[tokio::test]
    async fn test_nothing_above_threshold_keeps_strongest() {
        let classifier = Fixed(scores(&[("joy", 0.1), ("neutral", 0.25)]));
        let enricher = EmotionEnricher::new(Some(Arc::new(classifier)), 0.3);
        let v = enricher.enrich("text", &heuristic_emotions("x")).await.vector;
        assert_eq!(v.scores().len(), 1);
        assert_eq!(v.primary_label(), "neutral");
        assert_eq!(v.source(), EmotionSource::Classified);
    }

    #[tokio::test]
    async fn test_offline_classifier_keeps_heuristic() {
        let enricher = EmotionEnricher::new(Some(Arc::new(Offline)), 0.3);
        let heuristic = heuristic_emotions("This is ridiculous nonsense.");

        let result = enricher.enrich("This is ridiculous nonsense.", &heuristic).await;
        assert_eq!(result.vector, heuristic);
        assert_eq!(result.vector.source(), EmotionSource::Heuristic);
        assert!(result.failure.is_some());
    }

    #[tokio::test]
    async fn test_without_classifier_is_not_a_failure() {
        let enricher = EmotionEnricher::heuristic_only();
        let heuristic = heuristic_emotions("hope for a better future");
        let result = enricher.enrich("hope for a better future", &heuristic).await;
        assert_eq!(result.vector, heuristic);
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_frozen_classifier_is_deterministic() {
        let enricher = EmotionEnricher::new(
            Some(Arc::new(Fixed(scores(&[("fear", 0.7), ("nervousness", 0.5)])))),
            0.3,
        );
        let h = heuristic_emotions("x");
        let a = enricher.enrich("same text", &h).await.vector;
        let b = enricher.enrich("same text", &h).await.vector;
        assert_eq!(a, b);
        assert_eq!(a.valence(), b.valence());
        assert_eq!(a.arousal(), b.arousal());
    }

    #[test]
    fn test_inference_response_shapes() {
        let batched: InferenceResponse =
            serde_json::from_str(r#"[[{"label":"joy","score":0.9}]]"#).unwrap();
        assert_eq!(batched.into_scores(), vec![("joy".to_string(), 0.9)]);

        let flat: InferenceResponse =
            serde_json::from_str(r#"[{"label":"fear","score":0.4}]"#).unwrap();
        assert_eq!(flat.into_scores(), vec![("fear".to_string(), 0.4)]);
    }
}
