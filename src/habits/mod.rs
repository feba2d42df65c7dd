// Habit profile: the persisted summary of recurring coding patterns
//
// The profile itself is a flat text document. Individual habit keywords are
// counted in the memory store so recurring ones can be called out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use crate::changes::ChangeRecord;
use crate::generation::{
    generate_with_timeout, parse_structured, GenerationRequest, GenerationService, Message,
    StructuredSchema,
};
use crate::memory::{Difficulty, HybridMemory};

#[async_trait]
pub trait HabitStore: Send + Sync {
    /// Current profile; empty when none has been written yet
    async fn read(&self) -> Result<String>;

    async fn write(&self, profile: &str) -> Result<()>;
}

/// Profile kept in a single text file
pub struct FileHabitStore {
    path: PathBuf,
}

impl FileHabitStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HabitStore for FileHabitStore {
    async fn read(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read habit profile: {}", self.path.display())),
        }
    }

    async fn write(&self, profile: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash never leaves a truncated profile
        let tmp = self.path.with_extension("txt.tmp");
        tokio::fs::write(&tmp, profile)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Concepts and habit keywords spotted in a change set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HabitAnalysis {
    pub concepts: Vec<String>,
    pub habits: Vec<String>,
}

/// Structured extraction of habit keywords from changes
pub struct HabitAnalyzer {
    generation: Arc<dyn GenerationService>,
}

impl HabitAnalyzer {
    pub fn new(generation: Arc<dyn GenerationService>) -> Self {
        Self { generation }
    }

    fn schema() -> StructuredSchema {
        StructuredSchema::new(
            "concepts_habits",
            json!({
                "type": "object",
                "properties": {
                    "concepts": {"type": "array", "items": {"type": "string"}},
                    "habits": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["concepts", "habits"],
                "additionalProperties": false,
            }),
        )
    }

    /// Extract keywords. Any failure yields an empty analysis.
    pub async fn analyze(&self, changes: &[ChangeRecord]) -> HabitAnalysis {
        match self.try_analyze(changes).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!("Habit analysis failed, continuing without keywords: {:#}", e);
                HabitAnalysis::default()
            }
        }
    }

    async fn try_analyze(&self, changes: &[ChangeRecord]) -> Result<HabitAnalysis> {
        let body = changes
            .iter()
            .map(|c| format!("File: {}\nDiff:\n{}", c.path, c.diff))
            .collect::<Vec<_>>()
            .join("\n\n");
        let messages = [
            Message::system(
                "You are a JSON extractor. Return only an object matching the schema. \
                 Refuse if you cannot.",
            ),
            Message::user(format!(
                "List the technical concepts used in these changes and any coding habits \
                 (good or bad) the author shows. Use short noun phrases.\n\n{}",
                body
            )),
        ];

        let reply = self
            .generation
            .generate_structured(&messages, &Self::schema())
            .await?;
        let mut analysis: HabitAnalysis = parse_structured(reply)?;
        analysis.concepts = dedup_keywords(analysis.concepts);
        analysis.habits = dedup_keywords(analysis.habits);
        Ok(analysis)
    }
}

fn dedup_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect()
}

/// Rewrites the profile from today's final report
pub struct HabitUpdater {
    generation: Arc<dyn GenerationService>,
    timeout: std::time::Duration,
}

impl HabitUpdater {
    pub fn new(generation: Arc<dyn GenerationService>, timeout: std::time::Duration) -> Self {
        Self { generation, timeout }
    }

    pub async fn update(&self, today: NaiveDate, previous: &str, final_report: &str) -> Result<String> {
        let previous = if previous.trim().is_empty() {
            "(no habits recorded yet)"
        } else {
            previous
        };
        let prompt = format!(
            "Current habit profile:\n{previous}\n\n\
             Today's review report:\n{final_report}\n\n\
             Today's date: {today}\n\n\
             Update the profile. A habit is a pattern that recurs across files or days, not a \
             one-off fix or an unapplied suggestion. Merge near-duplicate habits. Set \
             last_updated to {today} only for habits the report mentions; keep other dates. \
             Describe patterns in general terms rather than naming project functions.\n\n\
             Write one line per habit:\n\
             The author tends to <pattern>. <generalised example>. Language: <lang>. \
             last_updated: YYYY-MM-DD\n\n\
             Return only the profile."
        );

        let request = GenerationRequest::new(prompt)
            .with_system("You maintain a concise profile of a developer's coding habits.")
            .with_temperature(0.0)
            .with_timeout(self.timeout);

        let profile = generate_with_timeout(self.generation.as_ref(), &request)
            .await
            .context("Failed to regenerate habit profile")?;
        if profile.trim().is_empty() {
            anyhow::bail!("Habit update returned an empty profile");
        }
        Ok(profile.trim().to_string())
    }
}

/// Whether `keyword` appears in `text` as a whole phrase (case-insensitive)
pub fn mentions(text: &str, keyword: &str) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return false;
    }
    let pattern = format!(r"(^|\W){}($|\W)", regex::escape(keyword));
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(text),
        Err(_) => text.to_lowercase().contains(&keyword.to_lowercase()),
    }
}

/// Bullet list of habits with their recorded counts, for persona prompts
pub async fn describe_habits(memory: &HybridMemory, keywords: &[String]) -> String {
    let mut lines = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let count = match memory.get_habit_occurrences(keyword).await {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("No occurrence count for '{}': {:#}", keyword, e);
                0
            }
        };
        if count > 0 {
            lines.push(format!("- {} (seen {} times before)", keyword, count));
        } else {
            lines.push(format!("- {}", keyword));
        }
    }
    lines.join("\n")
}

/// Record keywords the critical report repeats; mark the rest improved.
///
/// Keywords with no history are not decremented. Returns each touched
/// keyword with its new count.
pub async fn account_habits(
    memory: &HybridMemory,
    keywords: &[String],
    critical_report: &str,
) -> Result<Vec<(String, u32)>> {
    let mut touched = Vec::new();
    for keyword in keywords {
        if mentions(critical_report, keyword) {
            let count = memory.record_habit_occurrence(keyword, false).await?;
            touched.push((keyword.clone(), count));
        } else if memory.get_habit_occurrences(keyword).await? > 0 {
            let count = memory.record_habit_occurrence(keyword, true).await?;
            touched.push((keyword.clone(), count));
        }
    }
    Ok(touched)
}

/// Bullet list of concepts with the author's recorded familiarity
pub async fn describe_concepts(memory: &HybridMemory, concepts: &[String]) -> String {
    let mut lines = Vec::with_capacity(concepts.len());
    for concept in concepts {
        let difficulty = match memory.get_concept_difficulty(concept).await {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("No difficulty for '{}': {:#}", concept, e);
                Difficulty::Basic
            }
        };
        lines.push(format!("- {} (familiarity: {})", concept, difficulty));
    }
    lines.join("\n")
}

/// Advance each concept that any report discusses, once per call.
pub async fn account_concepts(
    memory: &HybridMemory,
    concepts: &[String],
    reports: &[&str],
) -> Result<Vec<(String, Difficulty)>> {
    let mut advanced = Vec::new();
    for concept in concepts {
        if reports.iter().any(|report| mentions(report, concept)) {
            let difficulty = memory.advance_concept(concept).await?;
            advanced.push((concept.clone(), difficulty));
        }
    }
    Ok(advanced)
}

/// Persona-facing context: habit counts, then concept familiarity
pub fn habit_context(habits: &str, concepts: &str) -> String {
    match (habits.trim().is_empty(), concepts.trim().is_empty()) {
        (true, true) => String::new(),
        (false, true) => habits.to_string(),
        (true, false) => format!("Concepts in these changes:\n{}", concepts),
        (false, false) => format!("{}\n\nConcepts in these changes:\n{}", habits, concepts),
    }
}
