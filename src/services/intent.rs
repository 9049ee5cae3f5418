//! Intent resolution
//!
//! The dialogue only sees `ClassificationResult`; which engine produced it is
//! hidden behind `IntentClassifier`. Engine responses in the node-nlp shape are
//! normalized here so every adapter feeds the dialogue the same guarantees:
//! finite scores in [0, 1], intents ordered by descending confidence, and an
//! entity value that is always plain text.

use crate::domain::types::{ClassificationResult, Entity, Intent};
use crate::error::KioskResult;
use async_trait::async_trait;
use serde::Deserialize;

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify one finalized utterance
    async fn classify(&self, locale: &str, text: &str) -> KioskResult<ClassificationResult>;

    /// Succeeds once the engine answers; probes with a short phrase by default
    async fn ready(&self, locale: &str) -> KioskResult<()> {
        self.classify(locale, "bonjour").await.map(|_| ())
    }

    /// Engine name for logs
    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
pub struct NlpResponse {
    #[serde(default)]
    pub classifications: Vec<NlpClassification>,
    #[serde(default)]
    pub entities: Vec<NlpEntity>,
}

#[derive(Debug, Deserialize)]
pub struct NlpClassification {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct NlpEntity {
    pub entity: String,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default)]
    pub resolution: Option<NlpResolution>,
    #[serde(default, rename = "sourceText")]
    pub source_text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NlpResolution {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default, rename = "strValue")]
    pub str_value: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

fn clamp_score(score: f64) -> Option<f64> {
    score.is_finite().then(|| score.clamp(0.0, 1.0))
}

fn entity_value(entity: &NlpEntity) -> Option<String> {
    let resolution = entity.resolution.as_ref();
    if let Some(s) = resolution.and_then(|r| r.str_value.as_ref()) {
        return Some(s.clone());
    }
    match resolution.and_then(|r| r.value.as_ref()) {
        Some(serde_json::Value::String(s)) => return Some(s.clone()),
        Some(serde_json::Value::Null) | None => {}
        Some(other) => return Some(other.to_string()),
    }
    entity.source_text.clone()
}

impl NlpResponse {
    pub fn normalize(self) -> ClassificationResult {
        let mut intents: Vec<Intent> = self
            .classifications
            .into_iter()
            .filter(|c| !c.label.is_empty())
            .filter_map(|c| clamp_score(c.value).map(|confidence| Intent { label: c.label, confidence }))
            .collect();
        // Stable: equal scores keep engine order
        intents.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let entities = self
            .entities
            .iter()
            .filter_map(|e| {
                let accuracy = clamp_score(e.accuracy)?;
                let value = entity_value(e)?;
                Some(Entity {
                    entity_type: e.entity.clone(),
                    value,
                    accuracy,
                    subtype: e.resolution.as_ref().and_then(|r| r.subtype.clone()),
                })
            })
            .collect();

        ClassificationResult::new(intents, entities)
    }
}

/// Parse and normalize a raw engine body
pub fn parse_nlp_response(body: &str) -> Result<ClassificationResult, serde_json::Error> {
    serde_json::from_str::<NlpResponse>(body).map(NlpResponse::normalize)
}
