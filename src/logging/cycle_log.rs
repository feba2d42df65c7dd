// Cycle event log: writes workflow events to <data_dir>/cycle_YYYY-MM-DD.jsonl

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// An event in one workflow cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CycleEvent {
    CycleStart { max_steps: usize, retry_budget: u32 },
    NodeEnter { node: String, step: usize },
    NodeFailed { node: String, reason: String },
    PersonaFailed { persona: String, reason: String },
    Review { pass: u32, outcome: String },
    CycleDone {
        status: String,
        steps: usize,
        review_passes: u32,
    },
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    ts: String,
    cycle: &'a str,
    #[serde(flatten)]
    event: &'a CycleEvent,
}

/// Appends cycle events to a daily JSONL file.
///
/// Write failures are logged and swallowed; a broken log never fails a cycle.
pub struct CycleLogger {
    dir: Option<PathBuf>,
    cycle_id: String,
}

impl CycleLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cycle_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// A logger that drops everything
    pub fn disabled() -> Self {
        Self {
            dir: None,
            cycle_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn log(&self, event: CycleEvent) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = self.append(dir, &event) {
            tracing::warn!("Failed to write cycle log: {:#}", e);
        }
    }

    fn append(&self, dir: &Path, event: &CycleEvent) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(Self::file_name());

        let entry = LogEntry {
            ts: Utc::now().to_rfc3339(),
            cycle: &self.cycle_id,
            event,
        };
        let json = serde_json::to_string(&entry).context("Failed to serialize cycle event")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open cycle log: {}", path.display()))?;
        writeln!(file, "{}", json).context("Failed to write cycle event")?;
        Ok(())
    }

    fn file_name() -> String {
        format!("cycle_{}.jsonl", Local::now().format("%Y-%m-%d"))
    }

    /// Path to today's log file, if logging is enabled
    pub fn today_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(Self::file_name()))
    }
}
