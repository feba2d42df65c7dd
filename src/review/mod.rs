// Review-retry controller
//
// Judges the integrated report against two independent criteria:
// (a) does it reflect the habit profile, and if not which personas fall short;
// (b) does the deep analysis, when present, have a disqualifying defect.
// A criterion that passes once stays passed. Every pass bumps the retry
// count; past the bound the review is exhausted without another call.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::generation::{parse_structured, GenerationService, Message, StructuredSchema};
use crate::personas::PersonaKind;

/// Review bookkeeping carried across passes within one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewState {
    pub retry_count: u32,
    pub habits_pinned: bool,
    pub deep_pinned: bool,
}

/// Reviewer notes for one persona
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersonaFeedback {
    pub suggestions: String,
    pub missing_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Accepted,
    /// Rerun these personas; deep analysis may also need a rerun
    NeedsPersonaRerun {
        personas: BTreeMap<PersonaKind, PersonaFeedback>,
        deep_analysis: Option<String>,
    },
    NeedsDeepAnalysisRerun {
        feedback: String,
    },
    Exhausted,
}

impl ReviewOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReviewOutcome::Accepted => "accepted",
            ReviewOutcome::NeedsPersonaRerun { .. } => "persona_rerun",
            ReviewOutcome::NeedsDeepAnalysisRerun { .. } => "deep_analysis_rerun",
            ReviewOutcome::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HabitVerdict {
    is_reflected: bool,
    feedback: String,
    personas: Vec<PersonaNote>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PersonaNote {
    persona: String,
    suggestions: String,
    missing_points: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeepVerdict {
    has_severe_defect: bool,
    feedback: String,
}

pub struct ReviewController {
    generation: Arc<dyn GenerationService>,
    bound: u32,
}

impl ReviewController {
    pub fn new(generation: Arc<dyn GenerationService>, bound: u32) -> Self {
        Self { generation, bound }
    }

    /// One review pass. A failed service call is returned as `Err`.
    pub async fn review(
        &self,
        state: &mut ReviewState,
        habit_profile: &str,
        report: &str,
        deep_output: Option<&str>,
    ) -> Result<ReviewOutcome> {
        state.retry_count += 1;
        if state.retry_count > self.bound {
            tracing::info!(retry_count = state.retry_count, "Review retries exhausted");
            return Ok(ReviewOutcome::Exhausted);
        }

        let mut personas = BTreeMap::new();
        if !state.habits_pinned {
            if habit_profile.trim().is_empty() {
                state.habits_pinned = true;
            } else {
                let verdict = self.judge_habits(habit_profile, report).await?;
                if verdict.is_reflected {
                    state.habits_pinned = true;
                } else {
                    personas = deficient_personas(verdict);
                }
            }
        }

        let mut deep_feedback = None;
        if let Some(deep) = deep_output {
            if !state.deep_pinned {
                let verdict = self.judge_deep_analysis(deep).await?;
                if verdict.has_severe_defect {
                    deep_feedback = Some(verdict.feedback);
                } else {
                    state.deep_pinned = true;
                }
            }
        }

        let outcome = match (personas.is_empty(), deep_feedback) {
            (true, None) => ReviewOutcome::Accepted,
            (true, Some(feedback)) => ReviewOutcome::NeedsDeepAnalysisRerun { feedback },
            (false, deep_analysis) => ReviewOutcome::NeedsPersonaRerun {
                personas,
                deep_analysis,
            },
        };
        tracing::info!(
            retry_count = state.retry_count,
            outcome = outcome.label(),
            "Review pass complete"
        );
        Ok(outcome)
    }

    async fn judge_habits(&self, habit_profile: &str, report: &str) -> Result<HabitVerdict> {
        let persona_keys: Vec<&str> = PersonaKind::ALL.iter().map(|p| p.key()).collect();
        let schema = StructuredSchema::new(
            "habit_review",
            json!({
                "type": "object",
                "properties": {
                    "is_reflected": {"type": "boolean"},
                    "feedback": {"type": "string"},
                    "personas": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "persona": {"type": "string", "enum": persona_keys},
                                "suggestions": {"type": "string"},
                                "missing_points": {"type": "array", "items": {"type": "string"}},
                            },
                            "required": ["persona", "suggestions", "missing_points"],
                            "additionalProperties": false,
                        },
                    },
                },
                "required": ["is_reflected", "feedback", "personas"],
                "additionalProperties": false,
            }),
        );
        let messages = [
            Message::system(
                "Decide whether the report reflects the developer's habit profile and which \
                 sections fall short.",
            ),
            Message::user(format!(
                "Habit profile:\n{}\n\nReport:\n{}\n\n\
                 1. Is the habit profile adequately reflected in the report?\n\
                 2. If not, which sections ({}) are lacking?\n\
                 3. For each lacking section, say concretely what to add.",
                habit_profile,
                report,
                persona_keys.join(", ")
            )),
        ];

        let reply = self
            .generation
            .generate_structured(&messages, &schema)
            .await
            .context("Habit review call failed")?;
        parse_structured(reply).context("Habit review reply was malformed")
    }

    async fn judge_deep_analysis(&self, deep_output: &str) -> Result<DeepVerdict> {
        let schema = StructuredSchema::new(
            "deep_analysis_review",
            json!({
                "type": "object",
                "properties": {
                    "has_severe_defect": {"type": "boolean"},
                    "feedback": {"type": "string"},
                },
                "required": ["has_severe_defect", "feedback"],
                "additionalProperties": false,
            }),
        );
        let messages = [
            Message::system(
                "Only flag severe problems. Ignore minor, stylistic or incremental gaps.",
            ),
            Message::user(format!(
                "Does this analysis have a severe, disqualifying defect?\n\n{}\n\n\
                 Flag it only if it goes in a completely wrong direction, misses the core point \
                 entirely, or is so generic it says nothing.",
                deep_output
            )),
        ];

        let reply = self
            .generation
            .generate_structured(&messages, &schema)
            .await
            .context("Deep analysis review call failed")?;
        parse_structured(reply).context("Deep analysis review reply was malformed")
    }
}

/// Personas named by a negative habit verdict. Naming none means all of them.
fn deficient_personas(verdict: HabitVerdict) -> BTreeMap<PersonaKind, PersonaFeedback> {
    let mut personas = BTreeMap::new();
    for note in verdict.personas {
        match PersonaKind::from_key(&note.persona) {
            Some(persona) => {
                let suggestions = if note.suggestions.trim().is_empty() {
                    verdict.feedback.clone()
                } else {
                    note.suggestions
                };
                personas.insert(
                    persona,
                    PersonaFeedback {
                        suggestions,
                        missing_points: note.missing_points,
                    },
                );
            }
            None => tracing::debug!("Reviewer named unknown persona '{}'", note.persona),
        }
    }

    if personas.is_empty() {
        for persona in PersonaKind::ALL {
            personas.insert(
                persona,
                PersonaFeedback {
                    suggestions: verdict.feedback.clone(),
                    missing_points: Vec::new(),
                },
            );
        }
    }
    personas
}
