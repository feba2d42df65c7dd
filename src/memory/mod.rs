// Hybrid memory store
//
// - Relational log (SQLite, WAL) for topics and reports
// - Vector index under the same ids for semantic lookup
// - Lexical ranking over a recent window
// - Optional reranker over the merged candidates
//
// A topic or report becomes visible only after both the relational row and
// its vector exist. Rows are inserted uncommitted, flagged after the vector
// upsert, and deleted if embedding or upsert fails.

mod embeddings;
mod lexical;
mod relational;
mod rerank;
mod vector;

pub use embeddings::{cosine_similarity, EmbeddingService, HashEmbedding, HttpEmbeddingService};
pub use lexical::LexicalIndex;
pub use relational::{RelationalLog, RowCounts, Table};
pub use rerank::{HttpReranker, RankedDocument, RerankService};
pub use vector::{Namespace, SqliteVectorIndex, VectorHit, VectorIndex, VectorRecord};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::constants::DEFAULT_LEXICAL_WINDOW_DAYS;
use crate::config::StorageConfig;
use crate::personas::PersonaKind;

/// A review topic accepted by the selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub text: String,
    pub context: String,
    pub created_at: DateTime<Utc>,
}

/// One persona's report for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub persona: PersonaKind,
    pub topic_id: i64,
    pub topic_text: String,
    pub content: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// Where a similarity hit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Lexical,
    Vector,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarItem {
    /// Vector-style id (`topic_12`, `report_3`, `habit_x`)
    pub id: String,
    pub text: String,
    /// Higher is more similar
    pub score: f32,
    pub source: MatchSource,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub topics: RowCounts,
    pub reports: RowCounts,
}

/// How familiar the author is with a concept. Advances each cycle the
/// concept comes up in a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Basic,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Basic => "basic",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// Next level; Advanced stays Advanced
    pub fn next(self) -> Self {
        match self {
            Difficulty::Basic => Difficulty::Intermediate,
            Difficulty::Intermediate | Difficulty::Advanced => Difficulty::Advanced,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text embedded and lexically indexed for a topic
pub fn topic_document(text: &str, context: &str) -> String {
    if context.trim().is_empty() {
        text.to_string()
    } else {
        format!("{}\n\n[Context]: {}", text, context)
    }
}

pub struct HybridMemory {
    relational: RelationalLog,
    embedder: Arc<dyn EmbeddingService>,
    vectors: Option<Arc<dyn VectorIndex>>,
    reranker: Option<Arc<dyn RerankService>>,
    lexical: LexicalIndex,
    lexical_window_days: i64,
    counter_lock: Mutex<()>,
}

impl HybridMemory {
    /// Relational log only; add a vector index with `with_vector_index`
    pub fn new(relational: RelationalLog, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self {
            relational,
            embedder,
            vectors: None,
            reranker: None,
            lexical: LexicalIndex::new(),
            lexical_window_days: DEFAULT_LEXICAL_WINDOW_DAYS,
            counter_lock: Mutex::new(()),
        }
    }

    /// Open both databases under the configured data directory
    pub fn open(storage: &StorageConfig, embedder: Arc<dyn EmbeddingService>) -> Result<Self> {
        let relational = RelationalLog::open(&storage.memory_db())?;
        let vectors = SqliteVectorIndex::open(&storage.vector_db())?;
        tracing::info!("Memory store initialized: {}", storage.data_dir.display());
        Ok(Self::new(relational, embedder)
            .with_vector_index(Arc::new(vectors))
            .with_lexical_window_days(storage.lexical_window_days))
    }

    pub fn with_vector_index(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankService>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_lexical_window_days(mut self, days: i64) -> Self {
        self.lexical_window_days = days;
        self
    }

    /// Store a topic in both stores, or in neither
    pub async fn add_topic(&self, created_at: DateTime<Utc>, text: &str, context: &str) -> Result<i64> {
        let id = self.relational.insert_topic(created_at, text, context).await?;
        let metadata = json!({
            "id": id,
            "text": text,
            "context": context,
            "created_at": created_at.to_rfc3339(),
        });

        let document = topic_document(text, context);
        if let Err(e) = self
            .index_then_commit(Table::Topics, Namespace::Topics, id, &document, metadata)
            .await
        {
            self.roll_back(Table::Topics, id).await;
            return Err(e.context(format!("Failed to store topic '{}'", text)));
        }

        tracing::debug!(topic_id = id, "Stored topic");
        Ok(id)
    }

    /// Store a persona report in both stores, or in neither
    pub async fn add_report(
        &self,
        created_at: DateTime<Utc>,
        persona: PersonaKind,
        topic_id: i64,
        topic_text: &str,
        content: &str,
        summary: &str,
    ) -> Result<i64> {
        let id = self
            .relational
            .insert_report(created_at, persona, topic_id, topic_text, content, summary)
            .await?;
        let metadata = json!({
            "id": id,
            "text": content,
            "persona": persona.key(),
            "topic_id": topic_id,
            "topic_text": topic_text,
            "summary": summary,
            "created_at": created_at.to_rfc3339(),
        });

        if let Err(e) = self
            .index_then_commit(Table::Reports, Namespace::Reports, id, content, metadata)
            .await
        {
            self.roll_back(Table::Reports, id).await;
            return Err(e.context(format!("Failed to store {} report", persona)));
        }

        tracing::debug!(report_id = id, persona = %persona, "Stored report");
        Ok(id)
    }

    async fn index_then_commit(
        &self,
        table: Table,
        namespace: Namespace,
        id: i64,
        document: &str,
        metadata: Value,
    ) -> Result<()> {
        let Some(vectors) = &self.vectors else {
            return self.relational.commit(table, id).await;
        };

        let vector_id = namespace.vector_id(id);
        let embedding = self
            .embedder
            .embed(document, false)
            .await
            .context("Embedding failed")?;
        vectors
            .upsert(namespace, &vector_id, &embedding, metadata)
            .await
            .context("Vector upsert failed")?;

        if let Err(e) = self.relational.commit(table, id).await {
            if let Err(del) = vectors.delete(namespace, &vector_id).await {
                tracing::warn!("Failed to remove orphan vector {}: {}", vector_id, del);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove a committed topic from both stores
    pub async fn remove_topic(&self, id: i64) -> Result<()> {
        if let Some(vectors) = &self.vectors {
            vectors
                .delete(Namespace::Topics, &Namespace::Topics.vector_id(id))
                .await?;
        }
        self.relational.delete(Table::Topics, id).await
    }

    async fn roll_back(&self, table: Table, id: i64) {
        if let Err(e) = self.relational.delete(table, id).await {
            tracing::warn!("Rollback of {:?} row {} failed: {}", table, id, e);
        }
    }

    /// Hybrid similarity query. Never fails: errors degrade to no results.
    pub async fn find_similar(&self, namespace: Namespace, query: &str, top_k: usize) -> Vec<SimilarItem> {
        match self.try_find_similar(namespace, query, top_k).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Similarity query on {} failed: {:#}", namespace, e);
                Vec::new()
            }
        }
    }

    async fn try_find_similar(
        &self,
        namespace: Namespace,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarItem>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let lexical = self.lexical_candidates(namespace, query, top_k).await?;
        let semantic = self.vector_candidates(namespace, query, top_k).await?;
        let merged = merge_candidates(lexical, semantic);

        if let Some(reranker) = &self.reranker {
            let documents: Vec<String> = merged.iter().map(|item| item.text.clone()).collect();
            match reranker.rerank(query, &documents, top_k).await {
                Ok(ranked) => {
                    let reranked = ranked
                        .into_iter()
                        .filter_map(|r| {
                            merged.get(r.index).cloned().map(|mut item| {
                                item.score = r.score;
                                item
                            })
                        })
                        .collect();
                    return Ok(reranked);
                }
                Err(e) => tracing::warn!("Rerank failed, using raw scores: {:#}", e),
            }
        }

        let mut items = merged;
        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        items.truncate(top_k);
        Ok(items)
    }

    async fn lexical_candidates(
        &self,
        namespace: Namespace,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarItem>> {
        let since = Utc::now() - Duration::days(self.lexical_window_days);
        let rows: Vec<(i64, String, String, Value)> = match namespace {
            Namespace::Topics => self
                .relational
                .topics_since(since)
                .await?
                .into_iter()
                .map(|t| {
                    let document = topic_document(&t.text, &t.context);
                    let metadata = json!({
                        "id": t.id,
                        "text": &t.text,
                        "context": &t.context,
                        "created_at": t.created_at.to_rfc3339(),
                    });
                    (t.id, t.text, document, metadata)
                })
                .collect(),
            Namespace::Reports => self
                .relational
                .reports_since(since)
                .await?
                .into_iter()
                .map(|r| {
                    let metadata = json!({
                        "id": r.id,
                        "text": &r.content,
                        "persona": r.persona.key(),
                        "topic_id": r.topic_id,
                        "topic_text": &r.topic_text,
                        "summary": &r.summary,
                        "created_at": r.created_at.to_rfc3339(),
                    });
                    (r.id, r.content.clone(), r.content, metadata)
                })
                .collect(),
            // Habits and concepts only live in the vector index
            Namespace::Habits | Namespace::Concepts => return Ok(Vec::new()),
        };

        let documents: Vec<(i64, String)> = rows
            .iter()
            .map(|(id, _, document, _)| (*id, document.clone()))
            .collect();
        let ranked = self.lexical.rank(query, &documents, top_k);

        let by_id: HashMap<i64, (String, Value)> = rows
            .into_iter()
            .map(|(id, text, _, metadata)| (id, (text, metadata)))
            .collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(&id).map(|(text, metadata)| SimilarItem {
                    id: namespace.vector_id(id),
                    text: text.clone(),
                    score,
                    source: MatchSource::Lexical,
                    metadata: metadata.clone(),
                })
            })
            .collect())
    }

    async fn vector_candidates(
        &self,
        namespace: Namespace,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SimilarItem>> {
        let Some(vectors) = &self.vectors else {
            return Ok(Vec::new());
        };

        let embedding = self.embedder.embed(query, false).await?;
        let hits = vectors.search(namespace, &embedding, top_k).await?;

        // Vectors whose relational row is not committed yet are invisible
        let hits = match namespace.table() {
            Some(table) => {
                let ids: Vec<i64> = hits
                    .iter()
                    .filter_map(|h| parse_row_id(namespace, &h.id))
                    .collect();
                let committed = self.relational.committed_ids(table, &ids).await?;
                hits.into_iter()
                    .filter(|h| {
                        parse_row_id(namespace, &h.id).is_some_and(|id| committed.contains(&id))
                    })
                    .collect()
            }
            None => hits,
        };

        Ok(hits
            .into_iter()
            .map(|hit| SimilarItem {
                text: hit
                    .metadata
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                id: hit.id,
                score: hit.score,
                source: MatchSource::Vector,
                metadata: hit.metadata,
            })
            .collect())
    }

    /// Closest topic among `candidates`, scored by embedding cosine.
    ///
    /// Only the candidates are scored, so older topics elsewhere in the index
    /// cannot crowd them out, and no reranker is applied. Without a vector
    /// index, or if embedding fails, lexical cosine over the candidates is used.
    pub async fn nearest_topic_among(&self, query: &str, candidates: &[Topic]) -> Option<SimilarItem> {
        if candidates.is_empty() || query.trim().is_empty() {
            return None;
        }
        if let Some(vectors) = &self.vectors {
            let ids: Vec<String> = candidates
                .iter()
                .map(|t| Namespace::Topics.vector_id(t.id))
                .collect();
            let scored = match self.embedder.embed(query, false).await {
                Ok(embedding) => vectors.score_ids(Namespace::Topics, &embedding, &ids).await,
                Err(e) => Err(e),
            };
            match scored {
                Ok(hits) if !hits.is_empty() => {
                    return hits.into_iter().next().map(|hit| SimilarItem {
                        text: hit
                            .metadata
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        id: hit.id,
                        score: hit.score,
                        source: MatchSource::Vector,
                        metadata: hit.metadata,
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Vector scoring of recent topics failed: {:#}", e),
            }
        }

        let documents: Vec<(i64, String)> = candidates
            .iter()
            .map(|t| (t.id, topic_document(&t.text, &t.context)))
            .collect();
        let (id, score) = self.lexical.rank(query, &documents, 1).into_iter().next()?;
        let topic = candidates.iter().find(|t| t.id == id)?;
        Some(SimilarItem {
            id: Namespace::Topics.vector_id(id),
            text: topic.text.clone(),
            score,
            source: MatchSource::Lexical,
            metadata: json!({
                "id": topic.id,
                "text": &topic.text,
                "context": &topic.context,
                "created_at": topic.created_at.to_rfc3339(),
            }),
        })
    }

    /// Committed topics from the last `days` days, newest first
    pub async fn recent_topics(&self, days: i64) -> Result<Vec<Topic>> {
        self.relational
            .topics_since(Utc::now() - Duration::days(days))
            .await
    }

    pub async fn get_topic(&self, id: i64) -> Result<Option<Topic>> {
        self.relational.get_topic(id).await
    }

    pub async fn get_report(&self, id: i64) -> Result<Option<Report>> {
        self.relational.get_report(id).await
    }

    pub async fn reports_for_topic(&self, topic_id: i64) -> Result<Vec<Report>> {
        self.relational.reports_for_topic(topic_id).await
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            topics: self.relational.counts(Table::Topics).await?,
            reports: self.relational.counts(Table::Reports).await?,
        })
    }

    fn counter_index(&self) -> Result<&Arc<dyn VectorIndex>> {
        self.vectors
            .as_ref()
            .ok_or_else(|| anyhow!("Habit and concept accounting require a vector index"))
    }

    /// Current occurrence count for a habit (0 if never seen)
    pub async fn get_habit_occurrences(&self, name: &str) -> Result<u32> {
        let index = self.counter_index()?;
        let record = index
            .get(Namespace::Habits, &Namespace::Habits.vector_id(name.trim()))
            .await?;
        Ok(record
            .and_then(|r| r.metadata.get("occurrences").and_then(Value::as_u64))
            .unwrap_or(0) as u32)
    }

    /// Increment a habit's count, or decrement it (floor 0) when `improved`.
    /// Returns the new count.
    pub async fn record_habit_occurrence(&self, name: &str, improved: bool) -> Result<u32> {
        let name = name.trim();
        let index = self.counter_index()?;
        let _guard = self.counter_lock.lock().await;

        let current = self.get_habit_occurrences(name).await?;
        let next = if improved {
            current.saturating_sub(1)
        } else {
            current.saturating_add(1)
        };

        let text = format!("Habit: {}, occurrences: {}", name, next);
        let embedding = self
            .embedder
            .embed(&text, false)
            .await
            .context("Embedding habit failed")?;
        index
            .upsert(
                Namespace::Habits,
                &Namespace::Habits.vector_id(name),
                &embedding,
                json!({
                    "text": text,
                    "habit_name": name,
                    "occurrences": next,
                    "updated_at": Utc::now().to_rfc3339(),
                }),
            )
            .await?;

        tracing::debug!(habit = name, occurrences = next, improved, "Recorded habit");
        Ok(next)
    }
}

impl HybridMemory {
    /// Recorded difficulty for a concept (Basic if never seen)
    pub async fn get_concept_difficulty(&self, concept: &str) -> Result<Difficulty> {
        let index = self.counter_index()?;
        let record = index
            .get(Namespace::Concepts, &Namespace::Concepts.vector_id(concept.trim()))
            .await?;
        Ok(record
            .and_then(|r| r.metadata.get("difficulty").cloned())
            .and_then(|d| serde_json::from_value(d).ok())
            .unwrap_or_default())
    }

    /// Store a concept's difficulty, re-embedding its descriptive text
    pub async fn update_concept_difficulty(&self, concept: &str, difficulty: Difficulty) -> Result<()> {
        let concept = concept.trim();
        let index = self.counter_index()?;
        let text = format!("Concept: {}, difficulty: {}", concept, difficulty);
        let embedding = self
            .embedder
            .embed(&text, false)
            .await
            .context("Embedding concept failed")?;
        index
            .upsert(
                Namespace::Concepts,
                &Namespace::Concepts.vector_id(concept),
                &embedding,
                json!({
                    "text": text,
                    "concept": concept,
                    "difficulty": difficulty,
                    "updated_at": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
        tracing::debug!(concept, %difficulty, "Recorded concept difficulty");
        Ok(())
    }

    /// Move a concept one level up. Returns the new difficulty.
    pub async fn advance_concept(&self, concept: &str) -> Result<Difficulty> {
        let _guard = self.counter_lock.lock().await;
        let next = self.get_concept_difficulty(concept).await?.next();
        self.update_concept_difficulty(concept, next).await?;
        Ok(next)
    }
}

impl Namespace {
    fn table(self) -> Option<Table> {
        match self {
            Namespace::Topics => Some(Table::Topics),
            Namespace::Reports => Some(Table::Reports),
            Namespace::Habits | Namespace::Concepts => None,
        }
    }
}

fn parse_row_id(namespace: Namespace, vector_id: &str) -> Option<i64> {
    vector_id
        .strip_prefix(namespace.id_prefix())
        .and_then(|n| n.parse().ok())
}

/// Merge by id. On collision the higher score wins; equal scores keep the
/// lexical entry.
fn merge_candidates(lexical: Vec<SimilarItem>, semantic: Vec<SimilarItem>) -> Vec<SimilarItem> {
    let mut merged: Vec<SimilarItem> = Vec::with_capacity(lexical.len() + semantic.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for item in lexical {
        positions.insert(item.id.clone(), merged.len());
        merged.push(item);
    }

    for item in semantic {
        match positions.get(&item.id) {
            Some(&pos) => {
                let existing = &mut merged[pos];
                if item.score > existing.score {
                    existing.score = item.score;
                }
                existing.source = MatchSource::Both;
            }
            None => {
                positions.insert(item.id.clone(), merged.len());
                merged.push(item);
            }
        }
    }
    merged
}
