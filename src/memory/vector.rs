// Vector index: namespaced embeddings with JSON metadata

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::embeddings::cosine_similarity;

/// Partition of the vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Topics,
    Reports,
    Habits,
    Concepts,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Topics => "topics",
            Namespace::Reports => "reports",
            Namespace::Habits => "habits",
            Namespace::Concepts => "concepts",
        }
    }

    /// Id prefix shared by the relational row and its vector
    pub fn id_prefix(self) -> &'static str {
        match self {
            Namespace::Topics => "topic_",
            Namespace::Reports => "report_",
            Namespace::Habits => "habit_",
            Namespace::Concepts => "concept_",
        }
    }

    pub fn vector_id(self, key: impl fmt::Display) -> String {
        format!("{}{}", self.id_prefix(), key)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: Namespace, id: &str, vector: &[f32], metadata: Value) -> Result<()>;

    /// Nearest neighbours by cosine similarity, best first
    async fn search(&self, namespace: Namespace, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    /// Cosine scores for the given ids only, best first. Unknown ids are skipped.
    async fn score_ids(&self, namespace: Namespace, query: &[f32], ids: &[String]) -> Result<Vec<VectorHit>>;

    async fn get(&self, namespace: Namespace, id: &str) -> Result<Option<VectorRecord>>;

    async fn delete(&self, namespace: Namespace, id: &str) -> Result<()>;
}

/// Brute-force vector index stored in its own SQLite file
pub struct SqliteVectorIndex {
    db: Arc<Mutex<Connection>>,
}

impl SqliteVectorIndex {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open vector database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vectors (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                PRIMARY KEY (namespace, id)
            );",
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

fn encode(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, namespace: Namespace, id: &str, vector: &[f32], metadata: Value) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO vectors (namespace, id, embedding, metadata) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, id) DO UPDATE SET embedding = excluded.embedding,
                                                     metadata = excluded.metadata",
            params![namespace.as_str(), id, encode(vector), metadata.to_string()],
        )?;
        Ok(())
    }

    async fn search(&self, namespace: Namespace, query: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let rows: Vec<(String, Vec<u8>, String)> = {
            let conn = self.db.lock().await;
            let mut stmt =
                conn.prepare("SELECT id, embedding, metadata FROM vectors WHERE namespace = ?1")?;
            let rows = stmt
                .query_map([namespace.as_str()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut hits = Vec::with_capacity(rows.len());
        for (id, blob, metadata) in rows {
            let score = cosine_similarity(query, &decode(&blob));
            let metadata = serde_json::from_str(&metadata).unwrap_or(Value::Null);
            hits.push(VectorHit { id, score, metadata });
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn score_ids(&self, namespace: Namespace, query: &[f32], ids: &[String]) -> Result<Vec<VectorHit>> {
        let rows: Vec<(String, Vec<u8>, String)> = {
            let conn = self.db.lock().await;
            let mut stmt = conn.prepare(
                "SELECT id, embedding, metadata FROM vectors WHERE namespace = ?1 AND id = ?2",
            )?;
            let mut rows: Vec<(String, Vec<u8>, String)> = Vec::with_capacity(ids.len());
            for id in ids {
                let row = stmt
                    .query_row(params![namespace.as_str(), id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })
                    .optional()?;
                rows.extend(row);
            }
            rows
        };

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .map(|(id, blob, metadata)| VectorHit {
                score: cosine_similarity(query, &decode(&blob)),
                metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                id,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    async fn get(&self, namespace: Namespace, id: &str) -> Result<Option<VectorRecord>> {
        let conn = self.db.lock().await;
        let metadata: Option<String> = conn
            .query_row(
                "SELECT metadata FROM vectors WHERE namespace = ?1 AND id = ?2",
                params![namespace.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        metadata
            .map(|m| {
                let metadata = serde_json::from_str(&m)
                    .with_context(|| format!("Corrupt metadata for {}/{}", namespace, id))?;
                Ok(VectorRecord {
                    id: id.to_string(),
                    metadata,
                })
            })
            .transpose()
    }

    async fn delete(&self, namespace: Namespace, id: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "DELETE FROM vectors WHERE namespace = ?1 AND id = ?2",
            params![namespace.as_str(), id],
        )?;
        Ok(())
    }
}
