//! Events written to the client's `text/event-stream` and the channel that
//! carries them from a request task to the HTTP body.

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Out-of-band tokens closing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    End,
    ContinueScheduling,
    AwaitingConfirmation,
    ScheduleSuccess,
    ScheduleError,
    ConversationEnded,
    CriticalError,
}

impl Sentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::End => "[END]",
            Sentinel::ContinueScheduling => "[CONTINUE_SCHEDULING_FLOW]",
            Sentinel::AwaitingConfirmation => "[AWAITING_FINAL_CONFIRMATION]",
            Sentinel::ScheduleSuccess => "[END_OF_SCHEDULE_SUCCESS_SIMULATION]",
            Sentinel::ScheduleError => "[END_OF_SCHEDULE_ERROR]",
            Sentinel::ConversationEnded => "[END_OF_CONVERSATION]",
            Sentinel::CriticalError => "[END_OF_CRITICAL_ERROR]",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `{"texto": ...}`
    Content(String),
    /// `{"error": ...}`
    Error(String),
    Sentinel(Sentinel),
}

impl StreamEvent {
    /// The text placed after `data: ` on the wire.
    pub fn payload(&self) -> String {
        match self {
            StreamEvent::Content(text) => json!({ "texto": text }).to_string(),
            StreamEvent::Error(message) => json!({ "error": message }).to_string(),
            StreamEvent::Sentinel(s) => s.as_str().to_string(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, StreamEvent::Sentinel(_))
    }
}

/// Sending half of a response stream.
///
/// Writes after `finish`/`end` or after the client went away are dropped
/// silently, and `finish` takes effect at most once across all clones.
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: mpsc::Sender<StreamEvent>,
    ended: Arc<AtomicBool>,
}

impl EventChannel {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                ended: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        !self.is_ended() && !self.is_disconnected()
    }

    /// Resolves once the client side has been dropped.
    pub async fn disconnected(&self) {
        self.tx.closed().await
    }

    /// Returns false when the event was not delivered.
    pub async fn send(&self, event: StreamEvent) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.send(event).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Client disconnected, dropping event");
                false
            }
        }
    }

    pub async fn content(&self, text: impl Into<String>) -> bool {
        self.send(StreamEvent::Content(text.into())).await
    }

    pub async fn error(&self, message: impl Into<String>) -> bool {
        self.send(StreamEvent::Error(message.into())).await
    }

    /// Writes the terminal sentinel and marks the stream ended.
    /// Only the first call on any clone writes anything.
    pub async fn finish(&self, sentinel: Sentinel) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        if self.is_disconnected() {
            return false;
        }
        self.tx.send(StreamEvent::Sentinel(sentinel)).await.is_ok()
    }

    /// Marks the stream ended without writing a sentinel.
    pub fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}
