// Embedding engines for semantic similarity
//
// Converts text to vector embeddings for the vector index

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::constants::DEFAULT_EMBEDDING_DIMENSION;

/// Trait for embedding engines
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate embedding vector for text. `is_code` selects code-aware tokenisation.
    async fn embed(&self, text: &str, is_code: bool) -> Result<Vec<f32>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

/// Deterministic hashed bag-of-words embedding.
///
/// Needs no model and no network. Token hashes come from SHA-256 so vectors
/// stay comparable across process restarts and toolchain upgrades.
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new() -> Self {
        Self::with_dimension(DEFAULT_EMBEDDING_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn hash_embed(&self, tokens: &[String]) -> Vec<f32> {
        let mut embedding = vec![0.0; self.dimension];

        for token in tokens {
            let digest = Sha256::digest(token.as_bytes());
            // Map each token to two buckets with signed weights
            for j in 0..2 {
                let offset = j * 8;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&digest[offset..offset + 8]);
                let hash = u64::from_le_bytes(bytes);
                let idx = (hash % self.dimension as u64) as usize;
                let sign = if digest[16 + j] & 1 == 0 { 1.0 } else { -1.0 };
                embedding[idx] += sign;
            }
        }

        normalize(&mut embedding);
        embedding
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str, is_code: bool) -> Result<Vec<f32>> {
        let tokens = if is_code {
            code_tokens(text)
        } else {
            prose_tokens(text)
        };
        Ok(self.hash_embed(&tokens))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Lowercased words with punctuation removed
fn prose_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Identifier-aware split: `parseHttpRequest` / `parse_http_request` both
/// yield `parse`, `http`, `request`.
fn code_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let mut current = String::new();
        let mut prev_lower = false;
        for c in raw.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                tokens.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.push(c);
        }
        if !current.is_empty() {
            tokens.push(current.to_lowercase());
        }
    }
    tokens
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Embeddings from an OpenAI-compatible /v1/embeddings endpoint
pub struct HttpEmbeddingService {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str, _is_code: bool) -> Result<Vec<f32>> {
        let mut request = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send embedding request")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding request failed\n\nStatus: {}\nBody: {}", status, body);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("Embedding response contained no vectors")
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedding_dimension() {
        let engine = HashEmbedding::new();
        assert_eq!(engine.dimension(), 384);
        let emb = engine.embed("Hello world", false).await.unwrap();
        assert_eq!(emb.len(), 384);
    }

    #[tokio::test]
    async fn test_identical_text_is_maximally_similar() {
        let engine = HashEmbedding::new();
        let emb1 = engine.embed("error handling in async code", false).await.unwrap();
        let emb2 = engine.embed("Error handling in async code!", false).await.unwrap();
        let sim = cosine_similarity(&emb1, &emb2);
        assert!((sim - 1.0).abs() < 0.01, "Similarity: {}", sim);
    }

    #[tokio::test]
    async fn test_unrelated_text_scores_lower() {
        let engine = HashEmbedding::new();
        let a = engine.embed("rust lifetime annotations", false).await.unwrap();
        let b = engine.embed("python data science notebooks", false).await.unwrap();
        let c = engine.embed("rust lifetime elision rules", false).await.unwrap();
        assert!(cosine_similarity(&a, &b) < cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_code_tokens_split_identifiers() {
        assert_eq!(
            code_tokens("parseHttpRequest(buf_len)"),
            vec!["parse", "http", "request", "buf", "len"]
        );

        let engine = HashEmbedding::new();
        let camel = engine.embed("parseHttpRequest", true).await.unwrap();
        let snake = engine.embed("parse_http_request", true).await.unwrap();
        assert!(cosine_similarity(&camel, &snake) > 0.99);
    }

    #[tokio::test]
    async fn test_empty_text_embeds_to_zero_vector() {
        let engine = HashEmbedding::with_dimension(16);
        let emb = engine.embed("   ", false).await.unwrap();
        assert!(emb.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&emb, &emb), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_http_embedding_service() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_body(r#"{"data":[{"embedding":[0.1,0.2,0.3]}]}"#)
            .create_async()
            .await;

        let service =
            HttpEmbeddingService::new(server.url(), "", "m", 3, Duration::from_secs(5)).unwrap();
        let emb = service.embed("text", false).await.unwrap();
        assert_eq!(emb, vec![0.1, 0.2, 0.3]);
    }
}
