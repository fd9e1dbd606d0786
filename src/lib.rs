pub mod composer;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod intent;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod scheduling;
pub mod server;
pub mod streaming;
pub mod transport;
pub mod vector_search;

use axum::Router;
use std::sync::Arc;

use crate::composer::AnswerComposer;
use crate::config::Config;
use crate::embeddings::{EmbeddingProvider, GeminiEmbedder};
use crate::error::Result;
use crate::intent::{GeminiIntent, IntentClassifier};
use crate::orchestrator::Orchestrator;
use crate::retrieval::RetrievalClient;
use crate::scheduling::{GeminiSlotExtractor, Scheduler, SlotExtractor};
use crate::server::AppState;
use crate::transport::{GeminiTransport, Transport};
use crate::vector_search::{SupabaseSearch, VectorSearch};

/// Process-wide provider handles, built once from configuration.
pub struct ConciergeService {
    orchestrator: Arc<Orchestrator>,
}

impl ConciergeService {
    pub fn new(cfg: &Config) -> Result<Self> {
        let transport = Arc::new(GeminiTransport::new(
            cfg.gemini.api_key.clone(),
            cfg.gemini.base_url.clone(),
        )?);

        let embedder = GeminiEmbedder::new(
            Arc::clone(&transport),
            cfg.gemini.embedding_model.clone(),
        );
        let search = SupabaseSearch::new(
            cfg.vector_store.url.clone(),
            cfg.vector_store.api_key.clone(),
            cfg.vector_store.rpc_function.clone(),
        );
        let retrieval = RetrievalClient::new(
            Arc::new(embedder) as Arc<dyn EmbeddingProvider>,
            Arc::new(search) as Arc<dyn VectorSearch>,
            cfg.retrieval.similarity_threshold,
            cfg.retrieval.match_count,
        );

        let classifier = GeminiIntent::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            cfg.gemini.utility_model.clone(),
            cfg.intent.history_window,
        );

        let mut orchestrator = Orchestrator::new(
            Arc::new(classifier) as Arc<dyn IntentClassifier>,
            retrieval,
            AnswerComposer::new(cfg.answer.html_output),
            Arc::clone(&transport) as Arc<dyn Transport>,
            cfg.gemini.chat_model.clone(),
        );

        if cfg.scheduling.enabled {
            let extractor = GeminiSlotExtractor::new(
                Arc::clone(&transport) as Arc<dyn Transport>,
                cfg.gemini.utility_model.clone(),
            );
            orchestrator = orchestrator.with_scheduler(Scheduler::new(
                Arc::new(extractor) as Arc<dyn SlotExtractor>,
                cfg.scheduling.affirmative_phrases.clone(),
            ));
        } else {
            tracing::info!("Scheduling disabled - every request is answered from the knowledge base");
        }

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn router(&self, cfg: &Config) -> Router {
        server::router(
            AppState {
                orchestrator: Arc::clone(&self.orchestrator),
            },
            &cfg.server,
        )
    }

    /// Drops the provider handles. In-flight requests keep their own clones.
    pub fn shutdown(self) {
        let in_flight = Arc::strong_count(&self.orchestrator).saturating_sub(1);
        tracing::info!(in_flight, "Releasing provider clients");
        drop(self.orchestrator);
    }
}
