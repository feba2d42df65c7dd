// Integration tests for the hybrid memory store

mod common;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tempfile::TempDir;

use codecast::config::StorageConfig;
use codecast::memory::{HashEmbedding, HybridMemory, Namespace};
use codecast::personas::PersonaKind;

use common::{memory, memory_with, FailingEmbedder};

fn storage(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_file_backed_store_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let id = {
        let memory = HybridMemory::open(&storage(&dir), Arc::new(HashEmbedding::with_dimension(64)))?;
        memory
            .add_topic(Utc::now(), "Lifetimes in async code", "borrowed data across await")
            .await?
    };

    let memory = HybridMemory::open(&storage(&dir), Arc::new(HashEmbedding::with_dimension(64)))?;
    let topic = memory.get_topic(id).await?.expect("topic persisted");
    assert_eq!(topic.text, "Lifetimes in async code");

    let hits = memory
        .find_similar(Namespace::Topics, "lifetimes in async code", 3)
        .await;
    assert_eq!(hits.first().map(|h| h.id.clone()), Some(format!("topic_{}", id)));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_report_writes_are_all_visible() -> Result<()> {
    let memory = memory();
    let topic_id = memory.add_topic(Utc::now(), "Shared state", "").await?;

    let mut handles = Vec::new();
    for i in 0..12 {
        let memory = Arc::clone(&memory);
        let persona = PersonaKind::ALL[i % 3];
        handles.push(tokio::spawn(async move {
            memory
                .add_report(
                    Utc::now(),
                    persona,
                    topic_id,
                    "Shared state",
                    &format!("report number {}", i),
                    "summary",
                )
                .await
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await??);
    }

    for (i, id) in ids.iter().enumerate() {
        let report = memory.get_report(*id).await?.expect("report committed");
        assert_eq!(report.persona, PersonaKind::ALL[i % 3]);
        assert_eq!(report.content, format!("report number {}", i));
    }

    let stats = memory.stats().await?;
    assert_eq!(stats.reports.committed, 12);
    assert_eq!(stats.reports.pending, 0);
    assert_eq!(memory.reports_for_topic(topic_id).await?.len(), 12);

    let hits = memory.find_similar(Namespace::Reports, "report number 7", 12).await;
    assert!(hits.iter().any(|h| h.text == "report number 7"));
    Ok(())
}

#[tokio::test]
async fn test_embedding_outage_leaves_no_rows() -> Result<()> {
    let memory = memory_with(Arc::new(FailingEmbedder));

    for i in 0..3 {
        assert!(memory
            .add_topic(Utc::now(), &format!("topic {}", i), "ctx")
            .await
            .is_err());
    }
    assert!(memory
        .add_report(Utc::now(), PersonaKind::Appreciative, 1, "t", "content", "s")
        .await
        .is_err());

    let stats = memory.stats().await?;
    assert_eq!(stats.topics.committed + stats.topics.pending, 0);
    assert_eq!(stats.reports.committed + stats.reports.pending, 0);
    assert!(memory.recent_topics(7).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_removed_topic_disappears_from_both_paths() -> Result<()> {
    let memory = memory();
    let id = memory.add_topic(Utc::now(), "Builder pattern", "config structs").await?;
    memory.remove_topic(id).await?;

    assert!(memory.get_topic(id).await?.is_none());
    assert!(memory
        .find_similar(Namespace::Topics, "Builder pattern", 5)
        .await
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_habit_improvement_then_recurrence_restores_count() -> Result<()> {
    let memory = memory();
    for _ in 0..3 {
        memory.record_habit_occurrence("clone in loops", false).await?;
    }
    let before = memory.get_habit_occurrences("clone in loops").await?;
    assert_eq!(before, 3);

    memory.record_habit_occurrence("clone in loops", true).await?;
    let after = memory.record_habit_occurrence("clone in loops", false).await?;
    assert_eq!(after, before);

    // Never negative
    for _ in 0..5 {
        memory.record_habit_occurrence("clone in loops", true).await?;
    }
    assert_eq!(memory.get_habit_occurrences("clone in loops").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_habit_updates_do_not_lose_counts() -> Result<()> {
    let memory = memory();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let memory = Arc::clone(&memory);
        handles.push(tokio::spawn(async move {
            memory.record_habit_occurrence("unwrap", false).await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    assert_eq!(memory.get_habit_occurrences("unwrap").await?, 10);
    Ok(())
}
