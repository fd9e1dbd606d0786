use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{GenerateRequest, Turn, render_transcript};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Schedule,
    Other,
}

const SCHEDULE_TOKEN: &str = "SCHEDULE";
const OTHER_TOKEN: &str = "OTHER";

pub struct GeminiIntent {
    tx: Arc<dyn Transport>,
    model: String,
    history_window: usize,
}

impl GeminiIntent {
    pub fn new(tx: Arc<dyn Transport>, model: String, history_window: usize) -> Self {
        Self {
            tx,
            model,
            history_window: history_window.max(1),
        }
    }

    fn prompt(&self, utterance: &str, history: &[Turn]) -> String {
        let start = history.len().saturating_sub(self.history_window);
        let transcript = render_transcript(&history[start..]);

        format!(
            r#"You are an intent classifier for a customer assistant.
Decide whether the user's latest message expresses a wish to schedule a meeting, call, or appointment, or continues an ongoing scheduling conversation (giving a topic, a date, a time, confirming, or cancelling it).

Recent conversation:
{transcript}

Latest user message: "{utterance}"

Reply with exactly one word and nothing else:
{SCHEDULE_TOKEN} - if the message is about scheduling a meeting
{OTHER_TOKEN} - for anything else"#
        )
    }
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Never fails: any error or unexpected reply maps to `Intent::Other`.
    async fn classify(&self, utterance: &str, history: &[Turn]) -> Intent;
}

/// Exact token match, ignoring case and surrounding whitespace.
pub fn parse_intent(reply: &str) -> Intent {
    if reply.trim().eq_ignore_ascii_case(SCHEDULE_TOKEN) {
        Intent::Schedule
    } else {
        Intent::Other
    }
}

#[async_trait]
impl IntentClassifier for GeminiIntent {
    async fn classify(&self, utterance: &str, history: &[Turn]) -> Intent {
        let request = GenerateRequest::prompt(self.prompt(utterance, history));

        match self.tx.generate(&self.model, &request).await {
            Ok(reply) => {
                let intent = parse_intent(&reply);
                tracing::info!("Classified intent as {:?} (raw reply: {:?})", intent, reply.trim());
                intent
            }
            Err(e) => {
                tracing::warn!("Intent classification failed, defaulting to OTHER: {}", e);
                Intent::Other
            }
        }
    }
}
