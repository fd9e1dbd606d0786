use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{ConciergeError, Result};
use crate::transport::GeminiTransport;

#[cfg(test)]
use mockall::automock;

/// Gemini embedding task types. Queries and stored documents are encoded differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalQuery,
    RetrievalDocument,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>>;
}

/// Embedding client bound to one model, sharing the Gemini HTTP client.
pub struct GeminiEmbedder {
    transport: std::sync::Arc<GeminiTransport>,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(transport: std::sync::Arc<GeminiTransport>, model: String) -> Self {
        Self { transport, model }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>> {
        debug!("Generating {:?} embedding for text: {}", task_type, text);

        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        let body = json!({
            "model": format!("models/{model}"),
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type,
        });

        let url = self.transport.model_url(model, "embedContent");
        let response = self
            .transport
            .client
            .post(&url)
            .header("x-goog-api-key", &self.transport.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ConciergeError::from_status(status.as_u16(), &body));
        }

        let payload: Value = response.json().await.map_err(|e| {
            ConciergeError::Decode(format!("Failed to parse embedding response: {e}"))
        })?;
        parse_embedding(&payload)
    }
}

/// Pulls `embedding.values` out of an embedContent response. Anything other
/// than a non-empty flat array of numbers is an error.
pub fn parse_embedding(payload: &Value) -> Result<Vec<f32>> {
    let values = payload
        .get("embedding")
        .and_then(|e| e.get("values"))
        .ok_or_else(|| {
            ConciergeError::Decode("Embedding response has no embedding.values field".to_string())
        })?;

    let items = values.as_array().ok_or_else(|| {
        ConciergeError::Decode("Embedding values are not an array".to_string())
    })?;
    if items.is_empty() {
        return Err(ConciergeError::Decode("Embedding values are empty".to_string()));
    }

    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                ConciergeError::Decode(format!(
                    "Embedding is not a flat numeric array (element {i} is {v})"
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_embedding() {
        let payload = json!({"embedding": {"values": [0.1, -0.2, 3]}});
        let v = parse_embedding(&payload).expect("flat array should parse");
        assert_eq!(v.len(), 3);
        assert!((v[2] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nested_embedding_is_rejected() {
        let payload = json!({"embedding": {"values": [[0.1, 0.2], [0.3, 0.4]]}});
        let err = parse_embedding(&payload).expect_err("nested array must fail");
        assert!(err.to_string().contains("not a flat numeric array"));
    }

    #[test]
    fn test_missing_or_empty_embedding_is_rejected() {
        assert!(parse_embedding(&json!({"error": "nope"})).is_err());
        assert!(parse_embedding(&json!({"embedding": {"values": []}})).is_err());
        assert!(parse_embedding(&json!({"embedding": {"values": "0.1,0.2"}})).is_err());
    }

    #[test]
    fn test_task_type_wire_name() {
        assert_eq!(
            serde_json::to_value(TaskType::RetrievalQuery).expect("serializes"),
            json!("RETRIEVAL_QUERY")
        );
    }
}
