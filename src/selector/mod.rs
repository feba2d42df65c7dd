// Novelty selector
//
// Picks one topic per persona for the cycle. A proposal is rejected whole if
// any persona's topic repeats a recent topic exactly or is too similar to
// one. After the strict attempts run out, one relaxed attempt accepts
// repeats but still needs three distinct, well-formed topics.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::changes::ChangeRecord;
use crate::config::SelectorConfig;
use crate::generation::{
    parse_structured, require_non_empty, GenerationService, Message, SchemaError, StructuredSchema,
};
use crate::memory::{topic_document, HybridMemory, Topic};
use crate::personas::PersonaKind;
use crate::retry::{with_retry, RetryPolicy};

/// One persona's proposed topic, exactly as the service must return it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicProposal {
    pub topic: String,
    pub context: String,
    #[serde(rename = "relatedFiles")]
    pub related_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProposalSet {
    critical: TopicProposal,
    appreciative: TopicProposal,
    exploratory: TopicProposal,
}

impl ProposalSet {
    fn into_map(self) -> BTreeMap<PersonaKind, TopicProposal> {
        let mut map = BTreeMap::new();
        map.insert(PersonaKind::Critical, self.critical);
        map.insert(PersonaKind::Appreciative, self.appreciative);
        map.insert(PersonaKind::Exploratory, self.exploratory);
        map
    }
}

/// An accepted, persisted topic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedTopic {
    pub topic_id: i64,
    pub proposal: TopicProposal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Strict,
    Relaxed,
}

/// Outcome of a selection run
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Passed every novelty check
    Novel(BTreeMap<PersonaKind, SelectedTopic>),
    /// Accepted by the relaxed attempt; may repeat recent topics
    Relaxed(BTreeMap<PersonaKind, SelectedTopic>),
    /// Nothing usable; the caller falls back
    Empty,
}

impl Selection {
    pub fn topics(&self) -> Option<&BTreeMap<PersonaKind, SelectedTopic>> {
        match self {
            Selection::Novel(t) | Selection::Relaxed(t) => Some(t),
            Selection::Empty => None,
        }
    }

    pub fn is_relaxed(&self) -> bool {
        matches!(self, Selection::Relaxed(_))
    }
}

/// Why a single attempt was rejected
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("{persona} topic '{topic}' repeats a recent topic")]
    ExactDuplicate { persona: PersonaKind, topic: String },
    #[error("{persona} topic '{topic}' is too similar to '{neighbor}' ({score:.2})")]
    SemanticDuplicate {
        persona: PersonaKind,
        topic: String,
        neighbor: String,
        score: f32,
    },
    #[error("two personas proposed the same topic '{0}'")]
    NotDistinct(String),
}

pub struct NoveltySelector {
    generation: Arc<dyn GenerationService>,
    memory: Arc<HybridMemory>,
    config: SelectorConfig,
}

impl NoveltySelector {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        memory: Arc<HybridMemory>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            generation,
            memory,
            config,
        }
    }

    /// Run strict attempts, then the relaxed one. Accepted topics are
    /// persisted before returning; a storage failure is an `Err`.
    pub async fn select(&self, changes: &[ChangeRecord], recent: &[Topic]) -> Result<Selection> {
        let summary = summarize_changes(changes, self.config.diff_budget);

        let strict = with_retry(
            RetryPolicy::immediate(self.config.max_strict_attempts),
            |_: &AttemptError| true,
            |attempt| {
                tracing::debug!(attempt = attempt + 1, "Strict topic selection attempt");
                self.attempt(&summary, recent, Mode::Strict)
            },
        )
        .await;

        let (proposals, mode) = match strict {
            Ok(proposals) => (proposals, Mode::Strict),
            Err(e) => {
                tracing::info!(
                    "All {} strict attempts rejected (last: {}); trying relaxed mode",
                    self.config.max_strict_attempts,
                    e
                );
                match self.attempt(&summary, recent, Mode::Relaxed).await {
                    Ok(proposals) => (proposals, Mode::Relaxed),
                    Err(e) => {
                        tracing::warn!("Relaxed topic selection failed: {}", e);
                        return Ok(Selection::Empty);
                    }
                }
            }
        };

        let selected = self.persist(proposals).await?;
        Ok(match mode {
            Mode::Strict => Selection::Novel(selected),
            Mode::Relaxed => Selection::Relaxed(selected),
        })
    }

    async fn attempt(
        &self,
        summary: &str,
        recent: &[Topic],
        mode: Mode,
    ) -> Result<BTreeMap<PersonaKind, TopicProposal>, AttemptError> {
        let messages = [
            Message::system(
                "You are a JSON generator. Return only an object matching the schema, with no \
                 extra keys. Refuse if the schema cannot be satisfied.",
            ),
            Message::user(selection_prompt(summary, recent, mode)),
        ];
        let reply = self
            .generation
            .generate_structured(&messages, &selection_schema())
            .await
            .map_err(|e| AttemptError::Generation(format!("{:#}", e)))?;

        let proposals = parse_structured::<ProposalSet>(reply)?.into_map();
        for proposal in proposals.values() {
            require_non_empty("topic", &proposal.topic)?;
        }
        check_distinct(&proposals)?;

        if mode == Mode::Strict {
            check_exact_duplicates(&proposals, recent)?;
            self.check_semantic_duplicates(&proposals, recent).await?;
        }
        Ok(proposals)
    }

    async fn check_semantic_duplicates(
        &self,
        proposals: &BTreeMap<PersonaKind, TopicProposal>,
        recent: &[Topic],
    ) -> Result<(), AttemptError> {
        if recent.is_empty() {
            return Ok(());
        }

        for (persona, proposal) in proposals {
            let query = topic_document(&proposal.topic, &proposal.context);
            let Some(nearest) = self.memory.nearest_topic_among(&query, recent).await else {
                continue;
            };
            if nearest.score > self.config.similarity_threshold {
                return Err(AttemptError::SemanticDuplicate {
                    persona: *persona,
                    topic: proposal.topic.clone(),
                    neighbor: nearest.text,
                    score: nearest.score,
                });
            }
        }
        Ok(())
    }

    async fn persist(
        &self,
        proposals: BTreeMap<PersonaKind, TopicProposal>,
    ) -> Result<BTreeMap<PersonaKind, SelectedTopic>> {
        let now = Utc::now();
        let mut selected = BTreeMap::new();

        for (persona, proposal) in proposals {
            match self
                .memory
                .add_topic(now, proposal.topic.trim(), &proposal.context)
                .await
            {
                Ok(topic_id) => {
                    selected.insert(persona, SelectedTopic { topic_id, proposal });
                }
                Err(e) => {
                    // Leave no partial selection behind for the next attempt to trip over
                    for stored in selected.values() {
                        if let Err(undo) = self.memory.remove_topic(stored.topic_id).await {
                            tracing::warn!("Failed to undo topic {}: {:#}", stored.topic_id, undo);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(selected)
    }
}

fn check_distinct(proposals: &BTreeMap<PersonaKind, TopicProposal>) -> Result<(), AttemptError> {
    let mut seen = HashSet::new();
    for proposal in proposals.values() {
        if !seen.insert(proposal.topic.trim().to_lowercase()) {
            return Err(AttemptError::NotDistinct(proposal.topic.clone()));
        }
    }
    Ok(())
}

fn check_exact_duplicates(
    proposals: &BTreeMap<PersonaKind, TopicProposal>,
    recent: &[Topic],
) -> Result<(), AttemptError> {
    let recent_texts: HashSet<&str> = recent.iter().map(|t| t.text.trim()).collect();
    for (persona, proposal) in proposals {
        if recent_texts.contains(proposal.topic.trim()) {
            return Err(AttemptError::ExactDuplicate {
                persona: *persona,
                topic: proposal.topic.clone(),
            });
        }
    }
    Ok(())
}

/// Cut a diff to `budget` characters, marking the cut with "..."
pub fn truncate_diff(diff: &str, budget: usize) -> String {
    match diff.char_indices().nth(budget) {
        Some((byte_idx, _)) => format!("{}...", &diff[..byte_idx]),
        None => diff.to_string(),
    }
}

/// Prompt body describing every change, each diff within `budget`
pub fn summarize_changes(changes: &[ChangeRecord], budget: usize) -> String {
    changes
        .iter()
        .map(|c| format!("File: {}\nChanges:\n{}", c.path, truncate_diff(&c.diff, budget)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn selection_prompt(summary: &str, recent: &[Topic], mode: Mode) -> String {
    let recent_text = if recent.is_empty() {
        "none".to_string()
    } else {
        recent
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    let roles = PersonaKind::ALL
        .iter()
        .map(|p| format!("- {}: {}", p.key(), p.topic_brief()))
        .collect::<Vec<_>>()
        .join("\n");

    let novelty = match mode {
        Mode::Strict => {
            "Never repeat a recent topic, a rewording of one, or a broader/narrower version \
             of one. Choose a genuinely different angle."
        }
        Mode::Relaxed => {
            "You may revisit a recent topic if nothing new fits, but go deeper than before."
        }
    };

    format!(
        "Recent topics:\n---\n{recent_text}\n---\n\n\
         Today's changes:\n---\n{summary}\n---\n\n\
         Identify the main language of the changes, then choose one topic per role:\n{roles}\n\n\
         The three topics must differ from each other. {novelty}\n\
         For each role return `topic`, `context` (why it matters for this code) and \
         `relatedFiles` (paths from the changes)."
    )
}

fn selection_schema() -> StructuredSchema {
    let proposal = json!({
        "type": "object",
        "properties": {
            "topic": {"type": "string"},
            "context": {"type": "string"},
            "relatedFiles": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["topic", "context", "relatedFiles"],
        "additionalProperties": false,
    });
    let mut properties = serde_json::Map::new();
    for persona in PersonaKind::ALL {
        properties.insert(persona.key().to_string(), proposal.clone());
    }
    let required: Vec<&str> = PersonaKind::ALL.iter().map(|p| p.key()).collect();

    StructuredSchema::new(
        "topic_selection",
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        }),
    )
}
