// Project-wide constants
//
// Centralised here so thresholds and default paths have one source of
// truth. Import via `use crate::config::constants::*;`.

/// Directory under $HOME holding config, databases and logs.
pub const DATA_DIR_NAME: &str = ".codecast";

/// Default config file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default OpenAI-compatible endpoint for generation and embeddings.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Default generation model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default embedding model for the HTTP embedding engine.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Dimension of the local hash embedding.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Per-call timeout for the generation service, in seconds.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;

/// Changes with fewer `+`/`-` lines than this skip the full pipeline.
pub const DEFAULT_MINOR_CHANGE_THRESHOLD: usize = 5;

/// Strict topic-selection attempts before the relaxed attempt.
pub const DEFAULT_MAX_STRICT_ATTEMPTS: u32 = 3;

/// Similarity above which a proposed topic counts as a duplicate.
/// Higher score = more similar, everywhere in the crate.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Window (days) for exact/semantic topic deduplication.
pub const DEFAULT_RECENT_TOPIC_DAYS: i64 = 3;

/// Window (days) for the lexical index.
pub const DEFAULT_LEXICAL_WINDOW_DAYS: i64 = 7;

/// Max characters of a single diff included in the topic-selection prompt.
pub const DEFAULT_DIFF_BUDGET: usize = 1000;

/// Number of analysis results kept in the results log.
pub const DEFAULT_RESULTS_LIMIT: usize = 10;

/// Review passes allowed before the review loop is exhausted.
pub const DEFAULT_REVIEW_RETRY_BOUND: u32 = 2;

/// Node-level retries shared across the whole cycle.
pub const DEFAULT_NODE_RETRY_BUDGET: u32 = 2;

/// Hard cap on node executions per cycle.
pub const DEFAULT_MAX_STEPS: usize = 25;
