use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::collections::VecDeque;

use crate::error::{ConciergeError, Result};
use crate::models::{GenerateRequest, GenerateResponse};

/// Raw provider chunks, one JSON object per item, in arrival order.
pub type ChunkStream = BoxStream<'static, Result<Value>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Single-shot generation. Returns the text of the first candidate.
    async fn generate(&self, model: &str, req: &GenerateRequest) -> Result<String>;

    /// Incremental generation.
    async fn generate_stream(&self, model: &str, req: &GenerateRequest) -> Result<ChunkStream>;
}

/// Gemini REST client. Constructed once at startup and shared.
pub struct GeminiTransport {
    pub(crate) client: Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
}

impl GeminiTransport {
    pub fn new(api_key: String, base_url: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(ConciergeError::Config(
                "Gemini API key is empty".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    async fn post(&self, url: &str, body: &impl serde::Serialize) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
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
        Ok(response)
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn generate(&self, model: &str, req: &GenerateRequest) -> Result<String> {
        let url = self.model_url(model, "generateContent");
        tracing::debug!(model, "Sending generateContent request");

        let response: GenerateResponse = self.post(&url, req).await?.json().await.map_err(|e| {
            ConciergeError::Decode(format!("Failed to parse Gemini response: {e}"))
        })?;

        response.first_text().ok_or_else(|| {
            ConciergeError::Decode("Gemini returned no candidates".to_string())
        })
    }

    async fn generate_stream(&self, model: &str, req: &GenerateRequest) -> Result<ChunkStream> {
        let url = format!("{}?alt=sse", self.model_url(model, "streamGenerateContent"));
        tracing::debug!(model, "Opening streamGenerateContent request");

        let response = self.post(&url, req).await?;
        let bytes = response.bytes_stream().boxed();

        let chunks = stream::unfold(
            (bytes, SseDecoder::default(), VecDeque::new(), false),
            |(mut bytes, mut decoder, mut pending, mut done)| async move {
                loop {
                    if let Some(item) = pending.pop_front() {
                        return Some((item, (bytes, decoder, pending, done)));
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(buf)) => pending.extend(decoder.push(&buf)),
                        Some(Err(e)) => {
                            done = true;
                            pending.push_back(Err(ConciergeError::Http(e)));
                        }
                        None => {
                            done = true;
                            pending.extend(decoder.finish());
                        }
                    }
                }
            },
        );

        Ok(chunks.boxed())
    }
}

/// Splits a server-sent-events byte stream into `data:` JSON payloads.
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network reads survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Value>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(item) = parse_sse_line(&line) {
                out.push(item);
            }
        }
        out
    }

    /// Flushes a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<Result<Value>> {
        let rest = std::mem::take(&mut self.buffer);
        parse_sse_line(&rest).into_iter().collect()
    }
}

fn parse_sse_line(raw: &[u8]) -> Option<Result<Value>> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(data).map_err(|e| {
        ConciergeError::Decode(format!("Invalid stream chunk: {e}"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_url() {
        let tx = GeminiTransport::new("k".to_string(), "https://example.test/v1beta/".to_string())
            .expect("transport should build");
        assert_eq!(
            tx.model_url("models/gemini-2.5-flash", "generateContent"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(GeminiTransport::new("  ".to_string(), "https://x".to_string()).is_err());
    }

    #[test]
    fn test_sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push(b"data: {\"text\": \"Hel");
        assert!(first.is_empty());

        let second = decoder.push(b"lo\"}\r\n\r\ndata: {\"text\": \"!\"}\n");
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].as_ref().expect("valid json")["text"], "Hello");
        assert_eq!(second[1].as_ref().expect("valid json")["text"], "!");
    }

    #[test]
    fn test_sse_decoder_keeps_multibyte_characters() {
        let mut decoder = SseDecoder::default();
        let payload = "data: {\"text\": \"reunión\"}\n".as_bytes();
        let (a, b) = payload.split_at(payload.len() - 6);
        assert!(decoder.push(a).is_empty());
        let items = decoder.push(b);
        assert_eq!(items[0].as_ref().expect("valid json")["text"], "reunión");
    }

    #[test]
    fn test_sse_decoder_ignores_comments_and_reports_bad_json() {
        let mut decoder = SseDecoder::default();
        let items = decoder.push(b": keep-alive\nevent: message\ndata: not-json\n");
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ConciergeError::Decode(_))));
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\": 1}").is_empty());
        let tail = decoder.finish();
        assert_eq!(tail.len(), 1);
    }
}
