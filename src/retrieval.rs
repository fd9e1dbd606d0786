use std::sync::Arc;
use tracing::{info, warn};

use crate::embeddings::{EmbeddingProvider, TaskType};
use crate::models::Fragment;
use crate::vector_search::VectorSearch;

/// Prefix of every context block that reports a retrieval failure.
pub const RETRIEVAL_ERROR_PREFIX: &str = "RETRIEVAL ERROR:";

pub const NO_MATCHES_TEXT: &str =
    "No relevant information was found in the knowledge base for this question.";

/// Outcome of a retrieval, rendered into the grounding context.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextBlock {
    Fragments(Vec<Fragment>),
    NoMatches,
    /// Provider failure, surfaced to the model instead of raised.
    Failed(String),
}

impl ContextBlock {
    pub fn render(&self) -> String {
        match self {
            ContextBlock::Fragments(fragments) => fragments
                .iter()
                .enumerate()
                .map(|(i, f)| format_fragment(i + 1, f))
                .collect::<Vec<_>>()
                .join("\n\n---\n\n"),
            ContextBlock::NoMatches => NO_MATCHES_TEXT.to_string(),
            ContextBlock::Failed(reason) => format!("{RETRIEVAL_ERROR_PREFIX} {reason}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ContextBlock::Failed(_))
    }
}

fn format_fragment(index: usize, f: &Fragment) -> String {
    let locator = f
        .page_range
        .as_deref()
        .map(|p| format!(", pages {p}"))
        .unwrap_or_default();
    format!(
        "[Fragment {index}] Source: {}{locator} (similarity: {:.2})\n{}",
        f.source_label,
        f.similarity,
        f.text.trim()
    )
}

pub struct RetrievalClient {
    embedder: Arc<dyn EmbeddingProvider>,
    search: Arc<dyn VectorSearch>,
    similarity_threshold: f32,
    match_count: u32,
}

impl RetrievalClient {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        search: Arc<dyn VectorSearch>,
        similarity_threshold: f32,
        match_count: u32,
    ) -> Self {
        Self {
            embedder,
            search,
            similarity_threshold,
            match_count,
        }
    }

    /// Never fails: provider errors come back as `ContextBlock::Failed`.
    pub async fn retrieve(&self, query: &str) -> ContextBlock {
        let embedding = match self.embedder.embed(query, TaskType::RetrievalQuery).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Embedding generation failed: {}", e);
                return ContextBlock::Failed(format!(
                    "the embedding for the question could not be generated ({e})."
                ));
            }
        };

        let matches = match self
            .search
            .search(&embedding, self.similarity_threshold, self.match_count)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Vector search failed: {}", e);
                return ContextBlock::Failed(format!("the knowledge base search failed ({e})."));
            }
        };

        if matches.is_empty() {
            info!("No fragments above threshold {}", self.similarity_threshold);
            return ContextBlock::NoMatches;
        }

        let fragments: Vec<Fragment> = matches.iter().map(Fragment::from_match).collect();
        info!("Retrieved {} context fragments", fragments.len());
        ContextBlock::Fragments(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::error::ConciergeError;
    use crate::models::SearchMatch;
    use crate::vector_search::MockVectorSearch;
    use serde_json::json;

    fn row(similarity: f32, source: &str, text: &str) -> SearchMatch {
        serde_json::from_value(json!({
            "similarity": similarity,
            "source": source,
            "page_range": "1-2",
            "content": text,
        }))
        .expect("row should parse")
    }

    fn embedder_ok() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .withf(|_, task| *task == TaskType::RetrievalQuery)
            .returning(|_, _| Ok(vec![0.1, 0.2, 0.3]));
        embedder
    }

    #[tokio::test]
    async fn test_formats_fragments_with_rounded_scores() {
        let mut search = MockVectorSearch::new();
        search
            .expect_search()
            .withf(|emb, threshold, limit| emb.len() == 3 && *threshold == 0.4 && *limit == 3)
            .returning(|_, _, _| Ok(vec![row(0.81234, "services.pdf", "We provide X, Y, Z")]));

        let client = RetrievalClient::new(Arc::new(embedder_ok()), Arc::new(search), 0.4, 3);
        let block = client.retrieve("What services do you offer?").await;

        let rendered = block.render();
        assert!(!block.is_error());
        assert!(rendered.contains("Source: services.pdf, pages 1-2 (similarity: 0.81)"));
        assert!(rendered.contains("We provide X, Y, Z"));
    }

    #[tokio::test]
    async fn test_empty_results_yield_no_match_text() {
        let mut search = MockVectorSearch::new();
        search.expect_search().returning(|_, _, _| Ok(vec![]));

        let client = RetrievalClient::new(Arc::new(embedder_ok()), Arc::new(search), 0.5, 5);
        let block = client.retrieve("anything").await;
        assert_eq!(block, ContextBlock::NoMatches);
        assert_eq!(block.render(), NO_MATCHES_TEXT);
    }

    #[tokio::test]
    async fn test_search_error_text_is_carried_into_context() {
        let mut search = MockVectorSearch::new();
        search.expect_search().returning(|_, _, _| {
            Err(ConciergeError::from_status(500, "function match_documents does not exist"))
        });

        let client = RetrievalClient::new(Arc::new(embedder_ok()), Arc::new(search), 0.5, 5);
        let block = client.retrieve("anything").await;
        let rendered = block.render();
        assert!(block.is_error());
        assert!(rendered.starts_with(RETRIEVAL_ERROR_PREFIX));
        assert!(rendered.contains("function match_documents does not exist"));
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_search() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .withf(|text, task| text == "q" && *task == TaskType::RetrievalQuery)
            .returning(|_, _| {
                Err(ConciergeError::Decode(
                    "Embedding is not a flat numeric array".to_string(),
                ))
            });
        let mut search = MockVectorSearch::new();
        search.expect_search().never();

        let client = RetrievalClient::new(Arc::new(embedder), Arc::new(search), 0.5, 5);
        let rendered = client.retrieve("q").await.render();
        assert!(rendered.contains("could not be generated"));
        assert!(rendered.contains("flat numeric array"));
    }
}
