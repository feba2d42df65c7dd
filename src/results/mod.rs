// Results log
//
// One row per finished cycle, capped at the most recent `limit` rows. A
// separate delivery component reads it; this module only appends and reads.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    MinorChange,
    Fallback,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::MinorChange => "minor_change",
            ResultStatus::Fallback => "fallback",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ResultStatus::Success),
            "minor_change" => Some(ResultStatus::MinorChange),
            "fallback" => Some(ResultStatus::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultEntry {
    pub id: i64,
    pub status: ResultStatus,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ResultsLog {
    db: Arc<Mutex<Connection>>,
    limit: usize,
}

impl ResultsLog {
    pub fn open(path: &Path, limit: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open results database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, limit)
    }

    pub fn in_memory(limit: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, limit)
    }

    fn init(conn: Connection, limit: usize) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )
        .context("Failed to create results table")?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            limit: limit.max(1),
        })
    }

    /// Append one entry and drop everything older than the newest `limit`
    pub async fn append(&self, status: ResultStatus, text: &str) -> Result<i64> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO results (status, text, created_at) VALUES (?1, ?2, ?3)",
            params![status.as_str(), text, Utc::now().timestamp_millis()],
        )?;
        let id = tx.last_insert_rowid();
        let trimmed = tx.execute(
            "DELETE FROM results WHERE id NOT IN
                (SELECT id FROM results ORDER BY id DESC LIMIT ?1)",
            params![self.limit as i64],
        )?;
        tx.commit().context("Failed to append result")?;

        if trimmed > 0 {
            tracing::debug!(trimmed, "Trimmed old results");
        }
        Ok(id)
    }

    /// Newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<ResultEntry>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, status, text, created_at FROM results ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, status, text, millis) = row?;
            let Some(status) = ResultStatus::parse(&status) else {
                tracing::warn!(id, "Skipping result with unknown status '{}'", status);
                continue;
            };
            let created_at = Utc
                .timestamp_millis_opt(millis)
                .single()
                .unwrap_or_else(Utc::now);
            entries.push(ResultEntry {
                id,
                status,
                text,
                created_at,
            });
        }
        Ok(entries)
    }

    pub async fn len(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM results", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
