// Relational log for topics and reports (SQLite, WAL)

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Report, Topic};
use crate::personas::PersonaKind;

/// Which relational table a row lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Topics,
    Reports,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Topics => "topics",
            Table::Reports => "reports",
        }
    }
}

/// Row counts for `stats`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub committed: usize,
    pub pending: usize,
}

#[derive(Clone)]
pub struct RelationalLog {
    db: Arc<Mutex<Connection>>,
}

impl RelationalLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))
            .context("Failed to apply memory schema")?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert an uncommitted topic row
    pub async fn insert_topic(
        &self,
        created_at: DateTime<Utc>,
        text: &str,
        context: &str,
    ) -> Result<i64> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO topics (topic_text, context_text, created_at, committed)
             VALUES (?1, ?2, ?3, 0)",
            params![text, context, created_at.timestamp_millis()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert an uncommitted report row
    pub async fn insert_report(
        &self,
        created_at: DateTime<Utc>,
        persona: PersonaKind,
        topic_id: i64,
        topic_text: &str,
        content: &str,
        summary: &str,
    ) -> Result<i64> {
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO reports (persona, topic_id, topic_text, content, summary, created_at, committed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                persona.key(),
                topic_id,
                topic_text,
                content,
                summary,
                created_at.timestamp_millis()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn commit(&self, table: Table, id: i64) -> Result<()> {
        let conn = self.db.lock().await;
        let sql = format!("UPDATE {} SET committed = 1 WHERE id = ?1", table.name());
        let changed = conn.execute(&sql, [id])?;
        if changed != 1 {
            anyhow::bail!("{} row {} vanished before commit", table.name(), id);
        }
        Ok(())
    }

    /// Compensating delete for a row whose vector write failed
    pub async fn delete(&self, table: Table, id: i64) -> Result<()> {
        let conn = self.db.lock().await;
        let sql = format!("DELETE FROM {} WHERE id = ?1", table.name());
        conn.execute(&sql, [id])?;
        Ok(())
    }

    /// Committed topics created at or after `since`, newest first
    pub async fn topics_since(&self, since: DateTime<Utc>) -> Result<Vec<Topic>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, topic_text, context_text, created_at FROM topics
             WHERE committed = 1 AND created_at >= ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let topics = stmt
            .query_map([since.timestamp_millis()], topic_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    /// Committed reports created at or after `since`, newest first
    pub async fn reports_since(&self, since: DateTime<Utc>) -> Result<Vec<Report>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, persona, topic_id, topic_text, content, summary, created_at FROM reports
             WHERE committed = 1 AND created_at >= ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let reports = stmt
            .query_map([since.timestamp_millis()], report_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    pub async fn get_topic(&self, id: i64) -> Result<Option<Topic>> {
        let conn = self.db.lock().await;
        let topic = conn
            .query_row(
                "SELECT id, topic_text, context_text, created_at FROM topics
                 WHERE id = ?1 AND committed = 1",
                [id],
                topic_from_row,
            )
            .optional()?;
        Ok(topic)
    }

    pub async fn get_report(&self, id: i64) -> Result<Option<Report>> {
        let conn = self.db.lock().await;
        let report = conn
            .query_row(
                "SELECT id, persona, topic_id, topic_text, content, summary, created_at FROM reports
                 WHERE id = ?1 AND committed = 1",
                [id],
                report_from_row,
            )
            .optional()?;
        Ok(report)
    }

    pub async fn reports_for_topic(&self, topic_id: i64) -> Result<Vec<Report>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, persona, topic_id, topic_text, content, summary, created_at FROM reports
             WHERE topic_id = ?1 AND committed = 1
             ORDER BY id ASC",
        )?;
        let reports = stmt
            .query_map([topic_id], report_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    /// Subset of `ids` that are committed in `table`
    pub async fn committed_ids(&self, table: Table, ids: &[i64]) -> Result<HashSet<i64>> {
        let conn = self.db.lock().await;
        let sql = format!(
            "SELECT 1 FROM {} WHERE id = ?1 AND committed = 1",
            table.name()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut found = HashSet::new();
        for id in ids {
            if stmt.exists([id])? {
                found.insert(*id);
            }
        }
        Ok(found)
    }

    pub async fn counts(&self, table: Table) -> Result<RowCounts> {
        let conn = self.db.lock().await;
        let sql = format!(
            "SELECT COALESCE(SUM(committed = 1), 0), COALESCE(SUM(committed = 0), 0) FROM {}",
            table.name()
        );
        let (committed, pending): (i64, i64) =
            conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(RowCounts {
            committed: committed as usize,
            pending: pending as usize,
        })
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get(0)?,
        text: row.get(1)?,
        context: row.get(2)?,
        created_at: millis_to_utc(row.get(3)?),
    })
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    let persona: String = row.get(1)?;
    let persona = PersonaKind::from_key(&persona).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown persona {}", persona).into(),
        )
    })?;
    Ok(Report {
        id: row.get(0)?,
        persona,
        topic_id: row.get(2)?,
        topic_text: row.get(3)?,
        content: row.get(4)?,
        summary: row.get(5)?,
        created_at: millis_to_utc(row.get(6)?),
    })
}
