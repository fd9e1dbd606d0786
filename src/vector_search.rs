use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::error::{ConciergeError, Result};
use crate::models::SearchMatch;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: u32,
    ) -> Result<Vec<SearchMatch>>;
}

#[derive(Debug, Serialize)]
struct MatchDocumentsArgs<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: u32,
}

/// Similarity search through a Supabase (PostgREST) RPC function.
pub struct SupabaseSearch {
    client: Client,
    url: String,
    api_key: String,
    function: String,
}

impl SupabaseSearch {
    pub fn new(url: String, api_key: String, function: String) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            api_key,
            function,
        }
    }

    fn rpc_url(&self) -> String {
        format!("{}/rest/v1/rpc/{}", self.url, self.function)
    }
}

#[async_trait]
impl VectorSearch for SupabaseSearch {
    async fn search(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: u32,
    ) -> Result<Vec<SearchMatch>> {
        if self.url.is_empty() {
            return Err(ConciergeError::Config(
                "vector store URL is not configured".to_string(),
            ));
        }

        info!(
            "Searching {} with {} dimensions for top {} matches (threshold: {})",
            self.function,
            embedding.len(),
            limit,
            threshold
        );

        let args = MatchDocumentsArgs {
            query_embedding: embedding,
            match_threshold: threshold,
            match_count: limit,
        };

        let response = self
            .client
            .post(self.rpc_url())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&args)
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

        let mut matches: Vec<SearchMatch> = response.json().await.map_err(|e| {
            ConciergeError::Decode(format!("Failed to parse search results: {e}"))
        })?;

        // The RPC already orders by similarity; keep the guarantee local.
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit as usize);
        Ok(matches)
    }
}
