// Workflow engine
//
// Drives one review cycle: executes the current node, feeds its event to
// `transition`, and repeats until End. Nodes never let an error escape; a
// failure becomes `Event::Failed` and the Error node decides between a
// retry and Fallback. Every cycle appends exactly one results entry.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::advice::{fallback_message, minor_change_message};
use super::deep::DeepAnalyzer;
use super::integrate::integrate;
use super::state::WorkflowState;
use super::transition::{transition, Event, Node};
use crate::changes::{count_changed_lines, ChangeRecord, ChangeSource};
use crate::config::Config;
use crate::generation::GenerationService;
use crate::habits::{
    account_concepts, account_habits, describe_concepts, describe_habits, habit_context, HabitAnalyzer,
    HabitStore, HabitUpdater,
};
use crate::logging::{CycleEvent, CycleLogger};
use crate::memory::HybridMemory;
use crate::personas::PersonaKind;
use crate::results::{ResultStatus, ResultsLog};
use crate::review::{ReviewController, ReviewOutcome};
use crate::runner::{AgentInput, Revision, TaskRunner};
use crate::selector::{truncate_diff, NoveltySelector, Selection};

/// Characters of file content handed to a persona per related file
const CODE_BUDGET: usize = 4000;

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    pub status: ResultStatus,
    pub report: String,
    /// Node executions, including Error and terminal nodes
    pub steps: usize,
    pub review_passes: u32,
}

pub struct WorkflowEngine {
    changes: Arc<dyn ChangeSource>,
    memory: Arc<HybridMemory>,
    habits: Arc<dyn HabitStore>,
    results: ResultsLog,
    config: Config,
    log_dir: Option<PathBuf>,

    selector: NoveltySelector,
    analyzer: HabitAnalyzer,
    runner: TaskRunner,
    deep: DeepAnalyzer,
    reviewer: ReviewController,
    updater: HabitUpdater,
}

impl WorkflowEngine {
    pub fn new(
        changes: Arc<dyn ChangeSource>,
        generation: Arc<dyn GenerationService>,
        memory: Arc<HybridMemory>,
        habits: Arc<dyn HabitStore>,
        results: ResultsLog,
        config: Config,
    ) -> Self {
        let timeout = config.generation.timeout();
        Self {
            selector: NoveltySelector::new(
                Arc::clone(&generation),
                Arc::clone(&memory),
                config.selector.clone(),
            ),
            analyzer: HabitAnalyzer::new(Arc::clone(&generation)),
            runner: TaskRunner::new(Arc::clone(&generation), Arc::clone(&memory), timeout),
            deep: DeepAnalyzer::new(Arc::clone(&generation), timeout),
            reviewer: ReviewController::new(
                Arc::clone(&generation),
                config.workflow.review_retry_bound,
            ),
            updater: HabitUpdater::new(generation, timeout),
            changes,
            memory,
            habits,
            results,
            config,
            log_dir: None,
        }
    }

    /// Write cycle events as JSONL under `dir`
    pub fn with_cycle_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Run one cycle to completion. Always produces a report.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let log = match &self.log_dir {
            Some(dir) => CycleLogger::new(dir),
            None => CycleLogger::disabled(),
        };
        let max_steps = self.config.workflow.max_steps;
        log.log(CycleEvent::CycleStart {
            max_steps,
            retry_budget: self.config.workflow.node_retry_budget,
        });
        tracing::info!(cycle = log.cycle_id(), "Starting review cycle");

        let mut state = WorkflowState {
            habit_profile: match self.habits.read().await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!("Could not read habit profile, using none: {:#}", e);
                    String::new()
                }
            },
            ..WorkflowState::default()
        };

        let mut node = Node::Precheck;
        let mut steps = 0;
        while node != Node::End {
            if steps >= max_steps && node != Node::Fallback {
                tracing::warn!(steps, node = %node, "Step limit reached, falling back");
                state.fallback_flag = true;
                node = Node::Fallback;
            }
            steps += 1;
            tracing::debug!(step = steps, node = %node, "Entering node");
            log.log(CycleEvent::NodeEnter {
                node: node.to_string(),
                step: steps,
            });

            let event = match self.execute(node, &mut state, &log).await {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(node = %node, "Node failed: {:#}", e);
                    log.log(CycleEvent::NodeFailed {
                        node: node.to_string(),
                        reason: format!("{:#}", e),
                    });
                    state.record_failure(node, &e);
                    Event::Failed
                }
            };
            node = transition(node, &event);
        }

        let status = state.status.unwrap_or(ResultStatus::Fallback);
        let report = match state.final_report.take() {
            Some(report) => report,
            None => fallback_message(
                state.integrated_report.as_deref(),
                state.last_error.as_deref(),
                &state.habit_profile,
                today(),
            ),
        };

        if let Err(e) = self.results.append(status, &report).await {
            tracing::warn!("Failed to append cycle result: {:#}", e);
        }

        let outcome = CycleOutcome {
            status,
            report,
            steps,
            review_passes: state.review.retry_count,
        };
        log.log(CycleEvent::CycleDone {
            status: status.to_string(),
            steps,
            review_passes: outcome.review_passes,
        });
        tracing::info!(
            status = %status,
            steps,
            review_passes = outcome.review_passes,
            "Cycle finished"
        );
        outcome
    }

    async fn execute(&self, node: Node, state: &mut WorkflowState, log: &CycleLogger) -> Result<Event> {
        match node {
            Node::Precheck => self.precheck(state).await,
            Node::MinorChangeAdvice => {
                state.final_report = Some(minor_change_message(
                    &state.habit_profile,
                    state.changed_lines,
                    today(),
                ));
                state.status = Some(ResultStatus::MinorChange);
                Ok(Event::Finished)
            }
            Node::SelectTopics => self.select_topics(state).await,
            Node::AnalyzeHabits => self.analyze_habits(state).await,
            Node::RunPersonas => Ok(self.run_personas(state, log).await),
            Node::DeepAnalysis => Ok(self.deep_analysis(state).await),
            Node::IntegrateReports => {
                state.integrated_report = Some(integrate(&state.reports, state.deep_output.as_deref()));
                Ok(Event::Integrated)
            }
            Node::Review => self.review(state, log).await,
            Node::UpdateHabits => self.update_habits(state).await,
            Node::Error => Ok(self.handle_error(state)),
            Node::Fallback => {
                let error = if state.error_flag {
                    state.last_error.as_deref()
                } else {
                    None
                };
                state.final_report = Some(fallback_message(
                    state.integrated_report.as_deref(),
                    error,
                    &state.habit_profile,
                    today(),
                ));
                state.status = Some(ResultStatus::Fallback);
                Ok(Event::Finished)
            }
            Node::End => Ok(Event::Finished),
        }
    }

    async fn precheck(&self, state: &mut WorkflowState) -> Result<Event> {
        let changes = self
            .changes
            .get_recent_changes()
            .await
            .context("Failed to load recent changes")?;
        state.changed_lines = count_changed_lines(&changes);
        state.changes = changes;

        let threshold = self.config.workflow.minor_change_threshold;
        if state.changed_lines < threshold {
            tracing::info!(
                changed_lines = state.changed_lines,
                threshold,
                "Minor change, skipping full analysis"
            );
            Ok(Event::MinorChange)
        } else {
            Ok(Event::FullAnalysis)
        }
    }

    async fn select_topics(&self, state: &mut WorkflowState) -> Result<Event> {
        let recent = self
            .memory
            .recent_topics(self.config.selector.recent_days)
            .await
            .context("Failed to load recent topics")?;
        let selection = self.selector.select(&state.changes, &recent).await?;
        state.recent_topics = recent;

        let event = match &selection {
            Selection::Empty => {
                tracing::warn!("No usable topics, falling back");
                state.fallback_flag = true;
                Event::Abandon
            }
            Selection::Relaxed(_) => {
                tracing::info!("Continuing with topics from the relaxed attempt");
                Event::TopicsSelected
            }
            Selection::Novel(_) => Event::TopicsSelected,
        };
        state.selection = Some(selection);
        Ok(event)
    }

    async fn analyze_habits(&self, state: &mut WorkflowState) -> Result<Event> {
        let Some(topics) = state.selection.as_ref().and_then(Selection::topics) else {
            state.fallback_flag = true;
            return Ok(Event::Abandon);
        };

        let analysis = self.analyzer.analyze(&state.changes).await;
        let habit_context = habit_context(
            &describe_habits(&self.memory, &analysis.habits).await,
            &describe_concepts(&self.memory, &analysis.concepts).await,
        );

        let mut contexts = BTreeMap::new();
        for (persona, selected) in topics {
            let (code, diff) = self
                .related_material(&state.changes, &selected.proposal.related_files)
                .await;
            contexts.insert(
                *persona,
                AgentInput {
                    topic_id: selected.topic_id,
                    topic: selected.proposal.topic.clone(),
                    context: selected.proposal.context.clone(),
                    code,
                    diff,
                    habit_context: habit_context.clone(),
                    revision: None,
                },
            );
        }

        tracing::info!(
            habits = analysis.habits.len(),
            concepts = analysis.concepts.len(),
            "Habit context ready"
        );
        state.habit_keywords = analysis.habits;
        state.concepts = analysis.concepts;
        state.persona_contexts = contexts;
        Ok(Event::HabitsAnalyzed)
    }

    /// Current code and diffs for the files a topic names; every change
    /// when it names none that were changed.
    async fn related_material(&self, changes: &[ChangeRecord], related_files: &[String]) -> (String, String) {
        let related: Vec<&ChangeRecord> = changes
            .iter()
            .filter(|c| related_files.iter().any(|f| same_file(&c.path, f)))
            .collect();
        let related = if related.is_empty() {
            changes.iter().collect()
        } else {
            related
        };

        let budget = self.config.selector.diff_budget;
        let diff = related
            .iter()
            .map(|c| format!("# {}\n{}", c.path, truncate_diff(&c.diff, budget)))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut seen = HashSet::new();
        let mut code = Vec::new();
        for change in &related {
            if !seen.insert(change.path.as_str()) {
                continue;
            }
            match self.changes.get_file_info(&change.path).await {
                Ok(Some(info)) => code.push(format!(
                    "// {}\n{}",
                    info.path,
                    truncate_diff(&info.content, CODE_BUDGET)
                )),
                Ok(None) => {}
                Err(e) => tracing::debug!("No content for {}: {:#}", change.path, e),
            }
        }
        (code.join("\n\n"), diff)
    }

    async fn run_personas(&self, state: &mut WorkflowState, log: &CycleLogger) -> Event {
        let only = state.personas_to_rerun.take();
        let summary = self
            .runner
            .run(&state.persona_contexts, only.as_ref(), &mut state.reports)
            .await;

        for (persona, error) in &summary.failed {
            log.log(CycleEvent::PersonaFailed {
                persona: persona.to_string(),
                reason: error.to_string(),
            });
        }
        // A failed rerun keeps its revision notes and previous report
        for persona in &summary.succeeded {
            if let Some(input) = state.persona_contexts.get_mut(persona) {
                input.revision = None;
            }
        }

        if state.reports.is_empty() {
            tracing::warn!("No persona produced a report, falling back");
            state.fallback_flag = true;
            return Event::Abandon;
        }
        Event::ReportsReady {
            deep_analysis: state.deep_analysis_due(self.config.workflow.deep_analysis),
        }
    }

    async fn deep_analysis(&self, state: &mut WorkflowState) -> Event {
        let base = integrate(&state.reports, None);
        match self.deep.analyze(&base, state.deep_feedback.as_deref()).await {
            Ok(text) => state.deep_output = Some(text),
            Err(e) => tracing::warn!("Deep analysis failed, skipping it: {:#}", e),
        }
        state.deep_feedback = None;
        Event::DeepAnalysisDone
    }

    async fn review(&self, state: &mut WorkflowState, log: &CycleLogger) -> Result<Event> {
        let report = state.integrated_report.clone().unwrap_or_default();
        let outcome = self
            .reviewer
            .review(
                &mut state.review,
                &state.habit_profile,
                &report,
                state.deep_output.as_deref(),
            )
            .await?;
        log.log(CycleEvent::Review {
            pass: state.review.retry_count,
            outcome: outcome.label().to_string(),
        });

        Ok(match outcome {
            ReviewOutcome::Accepted => Event::Accepted,
            ReviewOutcome::NeedsPersonaRerun {
                personas,
                deep_analysis,
            } => {
                for (persona, feedback) in &personas {
                    if let Some(input) = state.persona_contexts.get_mut(persona) {
                        input.revision = Some(Revision {
                            feedback: feedback.suggestions.clone(),
                            missing_points: feedback.missing_points.clone(),
                            current_report: state
                                .reports
                                .get(persona)
                                .map(|r| r.content.clone())
                                .unwrap_or_default(),
                        });
                    }
                }
                tracing::info!(personas = personas.len(), "Review sent personas back");
                state.personas_to_rerun = Some(personas.into_keys().collect());
                if deep_analysis.is_some() {
                    state.deep_feedback = deep_analysis;
                }
                Event::RerunPersonas
            }
            ReviewOutcome::NeedsDeepAnalysisRerun { feedback } => {
                state.deep_feedback = Some(feedback);
                Event::RerunDeepAnalysis
            }
            ReviewOutcome::Exhausted => {
                state.fallback_flag = true;
                Event::Exhausted
            }
        })
    }

    async fn update_habits(&self, state: &mut WorkflowState) -> Result<Event> {
        let report = state.integrated_report.clone().unwrap_or_default();

        // Counting twice on a retried node would skew the counts
        if !state.habits_accounted {
            let critical = state
                .reports
                .get(&PersonaKind::Critical)
                .map(|r| r.content.as_str())
                .unwrap_or("");
            let touched = account_habits(&self.memory, &state.habit_keywords, critical)
                .await
                .context("Failed to record habit occurrences")?;
            state.habits_accounted = true;
            tracing::debug!(touched = touched.len(), "Habit occurrences recorded");
        }
        if !state.concepts_accounted {
            let reports: Vec<&str> = state.reports.values().map(|r| r.content.as_str()).collect();
            let advanced = account_concepts(&self.memory, &state.concepts, &reports)
                .await
                .context("Failed to record concept difficulty")?;
            state.concepts_accounted = true;
            tracing::debug!(advanced = advanced.len(), "Concept difficulty recorded");
        }

        let profile = self
            .updater
            .update(today(), &state.habit_profile, &report)
            .await?;
        self.habits
            .write(&profile)
            .await
            .context("Failed to save habit profile")?;

        state.final_report = Some(report);
        state.status = Some(ResultStatus::Success);
        Ok(Event::Finished)
    }

    fn handle_error(&self, state: &mut WorkflowState) -> Event {
        let Some(failed) = state.error_node else {
            return Event::Escalate;
        };
        let budget = self.config.workflow.node_retry_budget;
        if state.node_retries < budget {
            state.node_retries += 1;
            state.clear_error();
            tracing::info!(node = %failed, retry = state.node_retries, budget, "Retrying node");
            Event::Retry(failed)
        } else {
            tracing::warn!(node = %failed, "Node retry budget spent, falling back");
            state.fallback_flag = true;
            Event::Escalate
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn same_file(changed: &str, named: &str) -> bool {
    let named = named.trim();
    !named.is_empty() && (changed == named || changed.ends_with(named) || named.ends_with(changed))
}
