// Integration tests for the review workflow

mod common;

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use codecast::changes::ChangeRecord;
use codecast::config::Config;
use codecast::memory::{Difficulty, HybridMemory};
use codecast::personas::PersonaKind;
use codecast::results::{ResultStatus, ResultsLog};
use codecast::workflow::WorkflowEngine;

use common::{
    diff_with_lines, major_changes, memory, FakeChanges, MemoryHabitStore, Reply,
    ScriptedGeneration,
};

fn config() -> Config {
    let mut config = Config::default();
    config.generation.timeout_secs = 5;
    config.workflow.node_retry_budget = 2;
    config.workflow.review_retry_bound = 2;
    config.workflow.max_steps = 25;
    config.workflow.deep_analysis = true;
    config
}

struct Harness {
    generation: Arc<ScriptedGeneration>,
    memory: Arc<HybridMemory>,
    habits: Arc<MemoryHabitStore>,
    results: ResultsLog,
}

impl Harness {
    fn new(profile: &str) -> Self {
        Self {
            generation: ScriptedGeneration::new(),
            memory: memory(),
            habits: MemoryHabitStore::with_profile(profile),
            results: ResultsLog::in_memory(10).unwrap(),
        }
    }

    fn engine(&self, changes: Arc<FakeChanges>, config: Config) -> WorkflowEngine {
        WorkflowEngine::new(
            changes,
            self.generation.clone(),
            self.memory.clone(),
            self.habits.clone(),
            self.results.clone(),
            config,
        )
    }
}

fn negative_habit_review(personas: serde_json::Value) -> Reply {
    Reply::Value(json!({
        "is_reflected": false,
        "feedback": "mention the unwrap habit",
        "personas": personas,
    }))
}

#[tokio::test]
async fn test_minor_change_skips_analysis() -> Result<()> {
    let h = Harness::new("");
    let changes = FakeChanges::new(vec![ChangeRecord::new("src/main.rs", "+a\n-b\n context")]);

    let outcome = h.engine(changes, config()).run_cycle().await;

    assert_eq!(outcome.status, ResultStatus::MinorChange);
    assert_eq!(outcome.steps, 2);
    assert!(outcome.report.contains("Only 2 changed lines"));
    assert_eq!(h.generation.structured_calls("topic_selection"), 0);
    assert_eq!(h.generation.total_generate_calls(), 0);
    assert_eq!(h.memory.stats().await?.topics.committed, 0);

    let entries = h.results.recent(10).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, ResultStatus::MinorChange);
    Ok(())
}

#[tokio::test]
async fn test_minor_change_threshold_is_exclusive() -> Result<()> {
    let h = Harness::new("");
    let changes = FakeChanges::new(vec![ChangeRecord::new("src/main.rs", diff_with_lines(5))]);

    let outcome = h.engine(changes, config()).run_cycle().await;

    assert_eq!(outcome.status, ResultStatus::Success);
    assert_eq!(h.generation.structured_calls("topic_selection"), 1);
    Ok(())
}

#[tokio::test]
async fn test_full_cycle_succeeds() -> Result<()> {
    let h = Harness::new("");

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Success);
    assert_eq!(outcome.steps, 8);
    assert_eq!(outcome.review_passes, 1);
    assert!(outcome.report.starts_with("# 📊 Daily code review"));
    assert!(outcome.report.contains("## 🔧 [Critical review] Unwrap overuse"));
    assert!(outcome.report.contains("## 👏 [What went well] Iterator chains"));
    assert!(outcome.report.contains("## 💡 [Something new to try] Property testing"));
    assert!(outcome.report.contains("Deep dive into error propagation"));

    for persona in PersonaKind::ALL {
        assert_eq!(h.generation.generate_calls(persona.key()), 1);
    }
    assert_eq!(h.generation.generate_calls("deep"), 1);

    // Profile rewritten once; keyword repeated by the critical report counted
    assert_eq!(h.habits.writes(), 1);
    assert!(h.habits.current().contains("tends to unwrap"));
    assert_eq!(h.memory.get_habit_occurrences("unwrap").await?, 1);

    // Only the concept a report discussed moves up
    assert_eq!(h.memory.get_concept_difficulty("iterators").await?, Difficulty::Intermediate);
    assert_eq!(h.memory.get_concept_difficulty("lifetimes").await?, Difficulty::Basic);

    assert_eq!(h.memory.stats().await?.reports.committed, 3);
    let entries = h.results.recent(10).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, outcome.report);
    Ok(())
}

#[tokio::test]
async fn test_one_failed_persona_does_not_fail_the_cycle() -> Result<()> {
    let h = Harness::new("");
    h.generation.fail_persona(PersonaKind::Appreciative);

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Success);
    assert!(outcome.report.contains("[Critical review]"));
    assert!(outcome.report.contains("[Something new to try]"));
    assert!(!outcome.report.contains("[What went well]"));
    assert_eq!(h.memory.stats().await?.reports.committed, 2);
    Ok(())
}

#[tokio::test]
async fn test_all_personas_failing_falls_back() -> Result<()> {
    let h = Harness::new("The author tends to unwrap results.");
    for persona in PersonaKind::ALL {
        h.generation.fail_persona(persona);
    }

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Fallback);
    assert!(outcome.report.contains("The author tends to unwrap results."));
    assert_eq!(h.habits.writes(), 0);
    assert_eq!(h.generation.structured_calls("habit_review"), 0);
    Ok(())
}

#[tokio::test]
async fn test_review_reruns_only_named_personas() -> Result<()> {
    let h = Harness::new("The author tends to unwrap results.");
    h.generation.script(
        "habit_review",
        vec![
            negative_habit_review(json!([
                {"persona": "critical", "suggestions": "", "missing_points": ["unwrap"]}
            ])),
            Reply::Value(json!({"is_reflected": true, "feedback": "", "personas": []})),
        ],
    );

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Success);
    assert_eq!(outcome.review_passes, 2);
    assert_eq!(h.generation.generate_calls("critical"), 2);
    assert_eq!(h.generation.generate_calls("appreciative"), 1);
    assert_eq!(h.generation.generate_calls("exploratory"), 1);
    // Deep analysis passed on the first review and was not redone
    assert_eq!(h.generation.generate_calls("deep"), 1);
    assert_eq!(h.generation.structured_calls("deep_analysis_review"), 1);
    Ok(())
}

#[tokio::test]
async fn test_deep_analysis_defect_reruns_only_deep_analysis() -> Result<()> {
    let h = Harness::new("");
    h.generation.script(
        "deep_analysis_review",
        vec![
            Reply::Value(json!({"has_severe_defect": true, "feedback": "too generic"})),
            Reply::Value(json!({"has_severe_defect": false, "feedback": ""})),
        ],
    );

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Success);
    assert_eq!(outcome.review_passes, 2);
    assert_eq!(h.generation.generate_calls("deep"), 2);
    assert_eq!(h.generation.generate_calls("critical"), 1);
    Ok(())
}

#[tokio::test]
async fn test_review_exhaustion_keeps_integrated_report() -> Result<()> {
    let h = Harness::new("The author tends to unwrap results.");
    h.generation
        .script("habit_review", vec![negative_habit_review(json!([]))]);

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Fallback);
    // Two failing passes, then the third is exhausted without a call
    assert_eq!(outcome.review_passes, 3);
    assert_eq!(h.generation.structured_calls("habit_review"), 2);
    for persona in PersonaKind::ALL {
        assert_eq!(h.generation.generate_calls(persona.key()), 3);
    }
    assert!(outcome.report.starts_with("# 📊 Daily code review"));
    assert_eq!(h.habits.writes(), 0);
    Ok(())
}

#[tokio::test]
async fn test_persistent_review_errors_terminate() -> Result<()> {
    let h = Harness::new("The author tends to unwrap results.");
    h.generation
        .script("habit_review", vec![Reply::Fail("reviewer down".into())]);
    let config = config();
    let max_steps = config.workflow.max_steps;

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config)
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Fallback);
    assert!(outcome.steps <= max_steps + 1);
    assert_eq!(outcome.review_passes, 3);
    assert!(!outcome.report.trim().is_empty());
    assert_eq!(h.results.recent(10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failing_node_is_retried_then_falls_back() -> Result<()> {
    let h = Harness::new("");

    let outcome = h.engine(FakeChanges::failing(), config()).run_cycle().await;

    // Precheck, Error, Precheck, Error, Precheck, Error, Fallback
    assert_eq!(outcome.steps, 7);
    assert_eq!(outcome.status, ResultStatus::Fallback);
    assert!(outcome.report.contains("went wrong"));
    assert_eq!(h.generation.total_generate_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_no_usable_topics_falls_back_without_running_personas() -> Result<()> {
    let h = Harness::new("");
    h.generation
        .script("topic_selection", vec![Reply::Refuse("cannot".into())]);

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Fallback);
    assert_eq!(h.generation.structured_calls("topic_selection"), 4);
    assert_eq!(h.generation.total_generate_calls(), 0);
    assert!(outcome.report.contains("Tip of the day"));
    Ok(())
}

#[tokio::test]
async fn test_deep_analysis_can_be_disabled() -> Result<()> {
    let h = Harness::new("");
    let mut config = config();
    config.workflow.deep_analysis = false;

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config)
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Success);
    assert_eq!(outcome.steps, 7);
    assert_eq!(h.generation.generate_calls("deep"), 0);
    assert_eq!(h.generation.structured_calls("deep_analysis_review"), 0);
    assert!(!outcome.report.contains("[Deep dive]"));
    Ok(())
}

#[tokio::test]
async fn test_step_limit_forces_fallback() -> Result<()> {
    let h = Harness::new("");
    let mut config = config();
    config.workflow.max_steps = 3;

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config)
        .run_cycle()
        .await;

    assert_eq!(outcome.status, ResultStatus::Fallback);
    assert_eq!(outcome.steps, 4);
    Ok(())
}

#[tokio::test]
async fn test_one_result_per_cycle() -> Result<()> {
    let h = Harness::new("");
    let major = FakeChanges::new(major_changes());
    let minor = FakeChanges::new(vec![ChangeRecord::new("a.rs", "+x")]);

    h.engine(major.clone(), config()).run_cycle().await;
    h.engine(minor, config()).run_cycle().await;
    // Same proposals again: strict attempts repeat, relaxed attempt accepts
    let outcome = h.engine(major, config()).run_cycle().await;
    assert_eq!(outcome.status, ResultStatus::Success);

    let statuses: Vec<_> = h
        .results
        .recent(10)
        .await?
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            ResultStatus::Success,
            ResultStatus::MinorChange,
            ResultStatus::Success
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_cycle_events_are_logged() -> Result<()> {
    let h = Harness::new("");
    let dir = TempDir::new()?;

    h.engine(FakeChanges::new(major_changes()), config())
        .with_cycle_log(dir.path())
        .run_cycle()
        .await;

    let log_file = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().starts_with("cycle_"))
        .expect("cycle log written");
    let text = std::fs::read_to_string(log_file.path())?;
    let events: Vec<String> = text
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["event"].to_string())
        .collect();

    assert_eq!(events.first().map(String::as_str), Some("\"cycle_start\""));
    assert_eq!(events.last().map(String::as_str), Some("\"cycle_done\""));
    assert!(events.iter().any(|e| e == "\"review\""));
    assert_eq!(events.iter().filter(|e| *e == "\"node_enter\"").count(), 8);
    Ok(())
}

#[tokio::test]
async fn test_concept_familiarity_reaches_persona_prompts() -> Result<()> {
    let h = Harness::new("");
    h.memory.update_concept_difficulty("lifetimes", Difficulty::Advanced).await?;

    let outcome = h
        .engine(FakeChanges::new(major_changes()), config())
        .run_cycle()
        .await;
    assert_eq!(outcome.status, ResultStatus::Success);

    let prompt = h.generation.last_prompt(PersonaKind::Critical.key()).expect("critical prompt");
    assert!(prompt.contains("- unwrap"));
    assert!(prompt.contains("Concepts in these changes:"));
    assert!(prompt.contains("- lifetimes (familiarity: advanced)"));
    assert!(prompt.contains("- iterators (familiarity: basic)"));
    Ok(())
}
