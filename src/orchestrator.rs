use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

use crate::composer::AnswerComposer;
use crate::events::{EventChannel, Sentinel};
use crate::intent::{Intent, IntentClassifier};
use crate::models::{Role, Turn};
use crate::retrieval::RetrievalClient;
use crate::scheduling::Scheduler;
use crate::streaming::relay;
use crate::transport::Transport;

pub const EMPTY_HISTORY: &str = "No conversation history received.";
pub const LAST_TURN_NOT_USER: &str = "The last message in the history must come from the user.";
pub const BLANK_QUESTION: &str = "The last user message is empty.";

/// Returns the question carried by the last turn, or the message to send back.
pub fn validate(history: &[Turn]) -> Result<String, &'static str> {
    let last = history.last().ok_or(EMPTY_HISTORY)?;
    if last.role != Role::User {
        return Err(LAST_TURN_NOT_USER);
    }
    let question = last.text();
    if question.trim().is_empty() {
        return Err(BLANK_QUESTION);
    }
    Ok(question.trim().to_string())
}

/// Reports an unusable request inside the stream and closes it.
pub async fn reject(channel: &EventChannel, message: impl Into<String>) {
    let message = message.into();
    warn!("Rejecting request: {}", message);
    channel.error(message).await;
    channel.finish(Sentinel::End).await;
}

fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Runs `work` on its own task. A panic, or work that returns without writing
/// a sentinel, still ends the stream with `[END_OF_CRITICAL_ERROR]`.
async fn guarded<F>(channel: EventChannel, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let outcome = tokio::spawn(work.instrument(tracing::Span::current())).await;

    match outcome {
        Err(e) => {
            error!("Request task failed: {}", e);
            channel
                .error(format!("Server error while processing the request: {e}"))
                .await;
            channel.finish(Sentinel::CriticalError).await;
        }
        Ok(()) if channel.is_open() => {
            error!("Request finished without a terminal event");
            channel
                .error("Server error while processing the request.")
                .await;
            channel.finish(Sentinel::CriticalError).await;
        }
        Ok(()) => {}
    }
}

/// Routes one request and owns its response lifecycle.
pub struct Orchestrator {
    classifier: Arc<dyn IntentClassifier>,
    retrieval: RetrievalClient,
    composer: AnswerComposer,
    transport: Arc<dyn Transport>,
    chat_model: String,
    scheduler: Option<Scheduler>,
    today: fn() -> NaiveDate,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        retrieval: RetrievalClient,
        composer: AnswerComposer,
        transport: Arc<dyn Transport>,
        chat_model: String,
    ) -> Self {
        Self {
            classifier,
            retrieval,
            composer,
            transport,
            chat_model,
            scheduler: None,
            today: local_today,
        }
    }

    /// Enables the scheduling branch. Without it every request is answered from the knowledge base.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub async fn handle(self: Arc<Self>, history: Vec<Turn>, channel: EventChannel) {
        let worker = Arc::clone(&self);
        let task_channel = channel.clone();
        guarded(channel, async move {
            worker.process(history, &task_channel).await
        })
        .await;
    }

    async fn process(&self, history: Vec<Turn>, channel: &EventChannel) {
        let question = match validate(&history) {
            Ok(question) => question,
            Err(message) => return reject(channel, message).await,
        };

        if let Some(scheduler) = &self.scheduler {
            let intent = self.classifier.classify(&question, &history).await;
            if intent == Intent::Schedule {
                let reply = scheduler.respond(&history, (self.today)()).await;
                channel.content(reply.text).await;
                channel.finish(reply.sentinel).await;
                info!("Scheduling reply sent with {}", reply.sentinel);
                return;
            }
        }

        self.answer(&question, &history, channel).await;
    }

    async fn answer(&self, question: &str, history: &[Turn], channel: &EventChannel) {
        let context = self.retrieval.retrieve(question).await;

        if !channel.is_open() {
            debug!("Client left during retrieval");
            channel.end();
            return;
        }

        let request = self.composer.compose(&context, history);
        let chunks = match self.transport.generate_stream(&self.chat_model, &request).await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Failed to start answer generation: {}", e);
                channel
                    .error(format!("The answer could not be generated: {e}"))
                    .await;
                channel.finish(Sentinel::End).await;
                return;
            }
        };

        let outcome = relay(chunks, channel).await;
        info!(?outcome, "Answer stream finished");
    }
}
