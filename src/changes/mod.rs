// File-change records
//
// The watcher that detects changes and computes diffs lives elsewhere; this
// module only reads what it recorded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One recorded change to one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub diff: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn new(path: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            diff: diff.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub content: String,
}

#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn get_recent_changes(&self) -> Result<Vec<ChangeRecord>>;

    async fn get_file_info(&self, path: &str) -> Result<Option<FileInfo>>;
}

/// Number of `+`/`-` prefixed lines across all diffs
pub fn count_changed_lines(changes: &[ChangeRecord]) -> usize {
    changes
        .iter()
        .flat_map(|c| c.diff.lines())
        .filter(|line| line.starts_with('+') || line.starts_with('-'))
        .count()
}

const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Reads the watcher's `files` / `file_changes` tables
pub struct SqliteChangeSource {
    db: Arc<Mutex<Connection>>,
    window: Duration,
}

impl SqliteChangeSource {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open change database: {}", path.display()))?;
        // The watcher normally creates these; an empty database just has no changes
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL UNIQUE,
                file_hash TEXT NOT NULL,
                content BLOB,
                created_at TEXT DEFAULT (datetime('now')),
                modified_at TEXT DEFAULT (datetime('now')),
                last_updated TEXT DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS file_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER UNIQUE,
                diff BLOB NOT NULL,
                change_time TEXT DEFAULT (datetime('now')),
                FOREIGN KEY (file_id) REFERENCES files (id) ON DELETE CASCADE
            );",
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            window: Duration::days(1),
        })
    }

    /// How far back `get_recent_changes` looks (default one day)
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[async_trait]
impl ChangeSource for SqliteChangeSource {
    async fn get_recent_changes(&self) -> Result<Vec<ChangeRecord>> {
        let cutoff = (Utc::now() - self.window)
            .format(SQLITE_DATETIME)
            .to_string();

        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT f.file_path, fc.diff, fc.change_time
             FROM file_changes fc
             JOIN files f ON f.id = fc.file_id
             WHERE fc.change_time > ?1
             ORDER BY fc.change_time DESC",
        )?;
        let rows = stmt
            .query_map([cutoff], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let changes = rows
            .into_iter()
            .map(|(path, diff, change_time)| ChangeRecord {
                path,
                diff: String::from_utf8_lossy(&diff).into_owned(),
                timestamp: parse_change_time(&change_time),
            })
            .collect::<Vec<_>>();

        tracing::debug!("Loaded {} recent changes", changes.len());
        Ok(changes)
    }

    async fn get_file_info(&self, path: &str) -> Result<Option<FileInfo>> {
        let conn = self.db.lock().await;
        let content: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT content FROM files WHERE file_path = ?1",
                [path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content.map(|c| FileInfo {
            path: path.to_string(),
            content: c
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default(),
        }))
    }
}

fn parse_change_time(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| Utc::now())
}
