// Optional reranker (Cohere-style /rerank endpoint)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RerankConfig;

const DEFAULT_RERANK_MODEL: &str = "rerank-v3.5";

/// One reranked document; `index` points into the input slice
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    pub index: usize,
    pub document: String,
    pub score: f32,
}

#[async_trait]
pub trait RerankService: Send + Sync {
    /// Best first, at most `top_n` entries
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RankedDocument>>;
}

pub struct HttpReranker {
    client: Client,
    url: String,
    model: String,
    api_key: String,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_RERANK_MODEL.to_string()),
            api_key: config.api_key.clone(),
        })
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[async_trait]
impl RerankService for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Result<Vec<RankedDocument>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.url).json(&RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
        });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await.context("Failed to send rerank request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Rerank request failed\n\nStatus: {}\nBody: {}", status, body);
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .context("Failed to parse rerank response")?;

        let mut ranked = Vec::with_capacity(parsed.results.len());
        for result in parsed.results {
            let document = documents
                .get(result.index)
                .with_context(|| format!("Reranker returned out-of-range index {}", result.index))?;
            ranked.push(RankedDocument {
                index: result.index,
                document: document.clone(),
                score: result.relevance_score,
            });
        }
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_n);
        Ok(ranked)
    }
}
