use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::error::{ConciergeError, Result};
use crate::events::{EventChannel, Sentinel, StreamEvent};
use crate::models::Candidate;
use crate::transport::ChunkStream;

// A fence wrapping the whole chunk: opening marker with optional language tag,
// non-greedy body, closing marker at the very end.
static WRAPPED_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)\r?\n?[ \t]*```\s*$")
        .expect("wrapped fence regex is valid")
});

static LEADING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*```[A-Za-z0-9_+-]*[ \t]*\r?\n?").expect("leading fence regex is valid")
});

static TRAILING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\r?\n?[ \t]*```\s*$").expect("trailing fence regex is valid")
});

/// Removes code-fence wrapping from a chunk of model output.
///
/// A fence pair spanning the whole chunk is unwrapped first; then a lone
/// marker at the very start or end is dropped, since fences are often split
/// across chunks. Applied until nothing changes, so it is idempotent.
pub fn strip_code_fences(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_once(text: &str) -> String {
    let unwrapped = match WRAPPED_FENCE.captures(text) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        None => text.to_string(),
    };
    let without_leading = LEADING_FENCE.replace(&unwrapped, "");
    TRAILING_FENCE.replace(&without_leading, "").into_owned()
}

/// The chunk shapes a provider may send, tried in declaration order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChunkShape {
    /// Flattened accessor: `{"text": "..."}`
    Flat { text: String },
    /// Raw Gemini: `{"candidates": [{"content": {"parts": [{"text": "..."}]}}]}`
    Candidates { candidates: Vec<Candidate> },
}

/// Extracts the text carried by one provider chunk.
pub fn chunk_text(chunk: &Value) -> Result<String> {
    let shape = ChunkShape::deserialize(chunk)
        .map_err(|_| ConciergeError::Decode("unrecognized chunk shape".to_string()))?;

    match shape {
        ChunkShape::Flat { text } => Ok(text),
        ChunkShape::Candidates { candidates } => {
            let content = candidates
                .first()
                .and_then(|c| c.content.as_ref())
                .ok_or_else(|| ConciergeError::Decode("chunk has no candidate content".to_string()))?;
            let texts: Vec<&str> = content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect();
            if texts.is_empty() {
                return Err(ConciergeError::Decode("chunk has no text parts".to_string()));
            }
            Ok(texts.concat())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Provider stream drained and `[END]` written.
    Completed { fragments: usize },
    /// The client left or the stream was already ended; nothing more was written.
    Interrupted { fragments: usize },
    /// The provider stream broke; an error fragment and `[END]` were written.
    Failed { fragments: usize },
}

/// Relays provider chunks to the client as `texto` events, in arrival order.
pub async fn relay(mut chunks: ChunkStream, channel: &EventChannel) -> RelayOutcome {
    let mut fragments = 0usize;

    loop {
        if !channel.is_open() {
            debug!("Stream closed before next chunk");
            channel.end();
            return RelayOutcome::Interrupted { fragments };
        }

        let next = tokio::select! {
            biased;
            _ = channel.disconnected() => {
                info!("Client disconnected mid-stream after {} fragments", fragments);
                channel.end();
                return RelayOutcome::Interrupted { fragments };
            }
            item = chunks.next() => item,
        };

        let chunk = match next {
            None => break,
            Some(Ok(chunk)) => chunk,
            Some(Err(ConciergeError::Decode(reason))) => {
                warn!("Skipping undecodable chunk: {}", reason);
                continue;
            }
            Some(Err(e)) => {
                warn!("Provider stream failed: {}", e);
                channel
                    .error(format!("The answer stream was interrupted: {e}"))
                    .await;
                channel.finish(Sentinel::End).await;
                return RelayOutcome::Failed { fragments };
            }
        };

        let text = match chunk_text(&chunk) {
            Ok(text) => text,
            Err(e) => {
                debug!("Skipping chunk without text: {}", e);
                continue;
            }
        };

        let clean = strip_code_fences(&text);
        if clean.trim().is_empty() {
            continue;
        }

        if !channel.send(StreamEvent::Content(clean)).await {
            channel.end();
            return RelayOutcome::Interrupted { fragments };
        }
        fragments += 1;
    }

    if channel.finish(Sentinel::End).await {
        RelayOutcome::Completed { fragments }
    } else {
        RelayOutcome::Interrupted { fragments }
    }
}
