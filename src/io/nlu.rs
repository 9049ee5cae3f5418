//! HTTP intent classifier
//!
//! POSTs `{"locale":"fr-CA","text":"..."}` to the NLP service and reads back a
//! node-nlp style body (`classifications`, `entities`).

use crate::domain::types::ClassificationResult;
use crate::error::{KioskError, KioskResult};
use crate::infra::config::Config;
use crate::services::intent::{parse_nlp_response, IntentClassifier};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    locale: &'a str,
    text: &'a str,
}

pub struct HttpIntentClassifier {
    url: String,
    client: reqwest::Client,
}

impl HttpIntentClassifier {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // Built once for connection pooling
        let client = reqwest::Client::builder().timeout(config.nlu_timeout()).build()?;
        Ok(Self { url: config.nlu_url().to_string(), client })
    }
}

fn unavailable(e: impl std::fmt::Display) -> KioskError {
    KioskError::ClassificationUnavailable(e.to_string())
}

#[async_trait]
impl IntentClassifier for HttpIntentClassifier {
    async fn classify(&self, locale: &str, text: &str) -> KioskResult<ClassificationResult> {
        let body = serde_json::to_string(&ClassifyRequest { locale, text }).map_err(unavailable)?;

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("status {}", status.as_u16())));
        }

        let body = response.text().await.map_err(unavailable)?;
        debug!(bytes = %body.len(), "nlu_response");
        parse_nlp_response(&body).map_err(unavailable)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_string(&ClassifyRequest { locale: "fr-CA", text: "oui" }).unwrap();
        assert_eq!(body, r#"{"locale":"fr-CA","text":"oui"}"#);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let config = Config::default();
        let mut classifier = HttpIntentClassifier::new(&config).unwrap();
        // Port 9 (discard) is not expected to serve HTTP
        classifier.url = "http://127.0.0.1:9/nlp/process".to_string();

        let err = classifier.classify("fr-CA", "oui").await.unwrap_err();
        assert!(matches!(err, KioskError::ClassificationUnavailable(_)));
    }
}
