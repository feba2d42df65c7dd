// Configuration structs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::constants::*;

/// Top-level configuration, one section per subsystem.
///
/// Every section carries serde defaults so a partial (or missing) config
/// file still yields a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: Option<RerankConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Generation service (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// API key; usually supplied via CODECAST_API_KEY instead
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// HTTP-level attempts for transient failures
    #[serde(default = "default_http_attempts")]
    pub max_attempts: u32,
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: String::new(),
            timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
            max_attempts: default_http_attempts(),
        }
    }
}

/// Which embedding engine backs the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Deterministic local hashing engine, no network
    Hash,
    /// OpenAI-compatible /v1/embeddings endpoint
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    /// Falls back to the generation endpoint when unset
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            model: default_embedding_model(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            base_url: None,
        }
    }
}

/// Optional reranker endpoint. Absent section = no reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for all databases and logs (defaults to ~/.codecast)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_results_limit")]
    pub results_limit: usize,
    #[serde(default = "default_lexical_window_days")]
    pub lexical_window_days: i64,
}

impl StorageConfig {
    pub fn memory_db(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    pub fn vector_db(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }

    /// Database written by the file-change watcher
    pub fn changes_db(&self) -> PathBuf {
        self.data_dir.join("file_history.db")
    }

    pub fn habits_file(&self) -> PathBuf {
        self.data_dir.join("habits.txt")
    }

    pub fn results_db(&self) -> PathBuf {
        self.data_dir.join("results.db")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            results_limit: DEFAULT_RESULTS_LIMIT,
            lexical_window_days: DEFAULT_LEXICAL_WINDOW_DAYS,
        }
    }
}

/// Novelty selector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default = "default_max_strict_attempts")]
    pub max_strict_attempts: u32,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,
    #[serde(default = "default_diff_budget")]
    pub diff_budget: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_strict_attempts: DEFAULT_MAX_STRICT_ATTEMPTS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            recent_days: DEFAULT_RECENT_TOPIC_DAYS,
            diff_budget: DEFAULT_DIFF_BUDGET,
        }
    }
}

/// Workflow engine bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_minor_change_threshold")]
    pub minor_change_threshold: usize,
    #[serde(default = "default_node_retry_budget")]
    pub node_retry_budget: u32,
    #[serde(default = "default_review_retry_bound")]
    pub review_retry_bound: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_true")]
    pub deep_analysis: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            minor_change_threshold: DEFAULT_MINOR_CHANGE_THRESHOLD,
            node_retry_budget: DEFAULT_NODE_RETRY_BUDGET,
            review_retry_bound: DEFAULT_REVIEW_RETRY_BOUND,
            max_steps: DEFAULT_MAX_STEPS,
            deep_analysis: true,
        }
    }
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> Result<()> {
        let tau = self.selector.similarity_threshold;
        if !(tau > 0.0 && tau <= 1.0) {
            bail!(
                "selector.similarity_threshold must be in (0, 1], got {}",
                tau
            );
        }
        if self.selector.max_strict_attempts == 0 {
            bail!("selector.max_strict_attempts must be at least 1");
        }
        if self.selector.recent_days < 0 || self.storage.lexical_window_days < 0 {
            bail!("day windows must not be negative");
        }
        if self.storage.results_limit == 0 {
            bail!("storage.results_limit must be at least 1");
        }
        if self.workflow.max_steps == 0 {
            bail!("workflow.max_steps must be at least 1");
        }
        if self.generation.timeout_secs == 0 {
            bail!("generation.timeout_secs must be at least 1");
        }
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be at least 1");
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_GENERATION_TIMEOUT_SECS
}

fn default_http_attempts() -> u32 {
    3
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Hash
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

pub(crate) fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

fn default_results_limit() -> usize {
    DEFAULT_RESULTS_LIMIT
}

fn default_lexical_window_days() -> i64 {
    DEFAULT_LEXICAL_WINDOW_DAYS
}

fn default_max_strict_attempts() -> u32 {
    DEFAULT_MAX_STRICT_ATTEMPTS
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_recent_days() -> i64 {
    DEFAULT_RECENT_TOPIC_DAYS
}

fn default_diff_budget() -> usize {
    DEFAULT_DIFF_BUDGET
}

fn default_minor_change_threshold() -> usize {
    DEFAULT_MINOR_CHANGE_THRESHOLD
}

fn default_node_retry_budget() -> u32 {
    DEFAULT_NODE_RETRY_BUDGET
}

fn default_review_retry_bound() -> u32 {
    DEFAULT_REVIEW_RETRY_BOUND
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}
