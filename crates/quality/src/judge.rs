//! Language-model accuracy judge over an Ollama-compatible API.

use std::time::Duration;
use async_trait::async_trait;
use pharmaqa_core::Document;
use reqwest::{Client, ClientBuilder};
use serde_json::json;
use tracing::debug;

use crate::validator::{AccuracyValidator, Judgment, ValidatorError};

/// Characters of document JSON included in a prompt.
const MAX_DOCUMENT_CHARS: usize = 1000;

/// Asks a hosted model whether a document is accurate.
#[derive(Clone)]
pub struct LlmJudgeValidator {
    /// HTTP client
    client: Client,

    /// Server URL, without trailing slash
    url: String,

    /// Model name
    model: String,
}

impl LlmJudgeValidator {
    /// Create a judge for `url` using `model`.
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, ValidatorError> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| ValidatorError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Prompt sent for one document.
    pub fn prompt(collection: &str, document: &Document) -> String {
        let body = serde_json::to_string_pretty(document.as_map()).unwrap_or_default();
        let body: String = body.chars().take(MAX_DOCUMENT_CHARS).collect();
        format!(
            "Validate the accuracy of this {collection} document:\n\n\
             Document: {body}\n\n\
             Check for:\n\
             1. Logical consistency\n\
             2. Proper brand name mentions\n\
             3. Valid dates and formats\n\
             4. Reasonable data values\n\n\
             Return only \"ACCURATE\" or \"INACCURATE\" with brief reason."
        )
    }
}

/// Read a verdict out of a model answer.
///
/// `INACCURATE` contains `ACCURATE`, so it is looked for first.
pub fn parse_verdict(answer: &str) -> Option<Judgment> {
    let upper = answer.to_uppercase();
    let reason = answer.trim().to_string();
    if upper.contains("INACCURATE") {
        Some(Judgment::inaccurate(reason))
    } else if upper.contains("ACCURATE") {
        Some(Judgment::accurate(reason))
    } else {
        None
    }
}

#[async_trait]
impl AccuracyValidator for LlmJudgeValidator {
    async fn judge(&self, collection: &str, document: &Document) -> Result<Judgment, ValidatorError> {
        let payload = json!({
            "model": self.model,
            "prompt": Self::prompt(collection, document),
            "stream": false,
            "options": { "num_predict": 100 }
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ValidatorError::Unavailable(format!("failed to call model API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ValidatorError::Unavailable(format!(
                "model API error (status {}): {}",
                status, text
            )));
        }

        #[derive(serde::Deserialize)]
        struct Response {
            response: String,
        }

        let data: Response = response
            .json()
            .await
            .map_err(|e| ValidatorError::Unavailable(format!("failed to parse model response: {}", e)))?;

        debug!(collection, answer = %data.response, "model judged document");
        parse_verdict(&data.response)
            .ok_or_else(|| ValidatorError::Unavailable(format!("no verdict in answer: {}", data.response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inaccurate_is_not_read_as_accurate() {
        let j = parse_verdict("INACCURATE - the phase field is not a valid trial phase").unwrap();
        assert!(!j.accurate);
        assert!(parse_verdict("Accurate: all fields plausible.").unwrap().accurate);
        assert!(parse_verdict("I cannot tell").is_none());
    }

    #[test]
    fn test_prompt_truncates_document() {
        let doc = Document::new().with("abstract", "x".repeat(5000));
        let prompt = LlmJudgeValidator::prompt("papers", &doc);
        assert!(prompt.starts_with("Validate the accuracy of this papers document"));
        assert!(prompt.len() < 1500);
    }

    #[tokio::test]
    async fn test_unreachable_model_is_unavailable() {
        let judge = LlmJudgeValidator::new("http://127.0.0.1:9", "llama3", Duration::from_millis(500)).unwrap();
        let err = judge.judge("trials", &Document::new()).await.unwrap_err();
        assert!(matches!(err, ValidatorError::Unavailable(_)));
    }

    fn answer(text: &str) -> String {
        serde_json::json!({ "model": "llama3", "response": text, "done": true }).to_string()
    }

    #[tokio::test]
    async fn test_model_verdicts_over_http() {
        let (url, server) = crate::testing::serve(vec![
            (200, answer("ACCURATE - dates and sponsor look right")),
            (200, answer("INACCURATE: phase is not a trial phase")),
        ])
        .await;
        let judge = LlmJudgeValidator::new(url, "llama3", Duration::from_secs(5)).unwrap();
        let doc = Document::new().with("id", "NCT04567890");

        assert!(judge.judge("trials", &doc).await.unwrap().accurate);
        let verdict = judge.judge("trials", &doc).await.unwrap();
        assert!(!verdict.accurate);
        assert!(verdict.reason.contains("phase"));

        let requests = server.await.unwrap();
        assert_eq!(requests[0]["model"], "llama3");
        assert_eq!(requests[0]["stream"], false);
        assert!(requests[0]["prompt"].as_str().unwrap().contains("NCT04567890"));
    }

    #[tokio::test]
    async fn test_unusable_model_answers_are_unavailable() {
        let (url, server) = crate::testing::serve(vec![
            (200, answer("I cannot tell from this record")),
            (500, "{\"error\":\"model not loaded\"}".into()),
            (200, "not json".into()),
        ])
        .await;
        let judge = LlmJudgeValidator::new(url, "llama3", Duration::from_secs(5)).unwrap();
        let doc = Document::new().with("id", "NCT04567890");

        for _ in 0..3 {
            let err = judge.judge("trials", &doc).await.unwrap_err();
            assert!(matches!(err, ValidatorError::Unavailable(_)));
        }
        server.await.unwrap();
    }
}
