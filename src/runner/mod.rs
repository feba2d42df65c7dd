// Parallel task runner
//
// Fans out one generation task per persona and joins them. Each task
// generates, then persists its report. A failed task is logged and left
// out; it never cancels its siblings. Results are keyed by persona, never
// by completion order.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::generation::{GenerationRequest, GenerationService};
use crate::memory::{HybridMemory, Report};
use crate::personas::PersonaKind;

/// Revision material for a persona sent back by the review step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revision {
    pub feedback: String,
    pub missing_points: Vec<String>,
    pub current_report: String,
}

/// Everything one persona needs to write its report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInput {
    pub topic_id: i64,
    pub topic: String,
    pub context: String,
    pub code: String,
    pub diff: String,
    pub habit_context: String,
    pub revision: Option<Revision>,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation returned an empty report")]
    EmptyReport,
    #[error("storing report failed: {0}")]
    Store(String),
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// What happened in one fan-out
#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: Vec<PersonaKind>,
    pub failed: Vec<(PersonaKind, TaskError)>,
}

impl RunSummary {
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

pub struct TaskRunner {
    generation: Arc<dyn GenerationService>,
    memory: Arc<HybridMemory>,
    timeout: Duration,
}

impl TaskRunner {
    pub fn new(generation: Arc<dyn GenerationService>, memory: Arc<HybridMemory>, timeout: Duration) -> Self {
        Self {
            generation,
            memory,
            timeout,
        }
    }

    /// Run every persona in `inputs`, or only those in `only`.
    ///
    /// Successful reports replace entries in `results`; entries for personas
    /// that were not run, or that failed, are left as they were.
    pub async fn run(
        &self,
        inputs: &BTreeMap<PersonaKind, AgentInput>,
        only: Option<&BTreeSet<PersonaKind>>,
        results: &mut BTreeMap<PersonaKind, Report>,
    ) -> RunSummary {
        let mut handles = Vec::new();
        for (persona, input) in inputs {
            if only.is_some_and(|set| !set.contains(persona)) {
                continue;
            }
            let persona = *persona;
            let generation = Arc::clone(&self.generation);
            let memory = Arc::clone(&self.memory);
            let input = input.clone();
            let timeout = self.timeout;

            let handle = tokio::spawn(async move {
                run_persona(generation.as_ref(), &memory, persona, &input, timeout).await
            });
            handles.push((persona, handle));
        }

        tracing::info!("Running {} persona tasks", handles.len());

        let (personas, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = futures::future::join_all(handles).await;

        let mut summary = RunSummary::default();
        for (persona, outcome) in personas.into_iter().zip(joined) {
            let outcome = match outcome {
                Ok(result) => result,
                Err(join_err) => Err(TaskError::Panicked(join_err.to_string())),
            };
            match outcome {
                Ok(report) => {
                    tracing::info!(persona = %persona, report_id = report.id, "Persona report ready");
                    results.insert(persona, report);
                    summary.succeeded.push(persona);
                }
                Err(e) => {
                    tracing::warn!(persona = %persona, "Persona task failed: {}", e);
                    summary.failed.push((persona, e));
                }
            }
        }
        summary
    }
}

async fn run_persona(
    generation: &dyn GenerationService,
    memory: &HybridMemory,
    persona: PersonaKind,
    input: &AgentInput,
    timeout: Duration,
) -> Result<Report, TaskError> {
    let request = GenerationRequest::new(persona_prompt(persona, input))
        .with_system(persona.system_prompt())
        .with_temperature(persona.temperature())
        .with_timeout(timeout);

    let content = match tokio::time::timeout(timeout, generation.generate(&request)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return Err(TaskError::Generation(format!("{:#}", e))),
        Err(_) => return Err(TaskError::Timeout(timeout)),
    };
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(TaskError::EmptyReport);
    }

    let summary = format!("{}: {}", persona.label(), input.topic);
    let created_at = Utc::now();
    let id = memory
        .add_report(created_at, persona, input.topic_id, &input.topic, &content, &summary)
        .await
        .map_err(|e| TaskError::Store(format!("{:#}", e)))?;

    Ok(Report {
        id,
        persona,
        topic_id: input.topic_id,
        topic_text: input.topic.clone(),
        content,
        summary,
        created_at,
    })
}

/// Prompt for one persona; revisions carry the reviewer's notes
pub fn persona_prompt(persona: PersonaKind, input: &AgentInput) -> String {
    let mut prompt = format!(
        "Topic: {}\n\nWhy it matters: {}\n\nRelevant code:\n```\n{}\n```\n\nDiff:\n```diff\n{}\n```\n",
        input.topic, input.context, input.code, input.diff
    );

    if !input.habit_context.trim().is_empty() {
        prompt.push_str(&format!(
            "\nKnown habits of this developer:\n{}\n",
            input.habit_context
        ));
    }

    match &input.revision {
        Some(revision) => {
            prompt.push_str(&format!(
                "\nYour previous report:\n{}\n\nReviewer feedback:\n{}\n",
                revision.current_report, revision.feedback
            ));
            if !revision.missing_points.is_empty() {
                prompt.push_str("\nPoints to add:\n");
                for point in &revision.missing_points {
                    prompt.push_str(&format!("- {}\n", point));
                }
            }
            prompt.push_str("\nRewrite the report addressing the feedback.\n");
        }
        None => {
            prompt.push_str(&format!(
                "\nWrite the {} section of today's review. Keep it under 300 words and \
                 include a short code example.\n",
                persona.label().to_lowercase()
            ));
        }
    }
    prompt
}
