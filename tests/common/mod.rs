// Shared test doubles for the integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use codecast::changes::{ChangeRecord, ChangeSource, FileInfo};
use codecast::generation::{
    GenerationRequest, GenerationService, Message, StructuredReply, StructuredSchema,
};
use codecast::habits::HabitStore;
use codecast::memory::{
    EmbeddingService, HashEmbedding, HybridMemory, RelationalLog, SqliteVectorIndex,
};
use codecast::personas::PersonaKind;

/// One scripted structured answer
#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Refuse(String),
    Fail(String),
}

/// Generation service driven by per-schema scripts.
///
/// Each schema name has a queue whose last entry repeats. Free-text calls
/// are answered by role, detected from the system prompt.
#[derive(Default)]
pub struct ScriptedGeneration {
    structured: Mutex<HashMap<String, Vec<Reply>>>,
    structured_calls: Mutex<HashMap<String, usize>>,
    generate_calls: Mutex<Vec<String>>,
    prompts: Mutex<HashMap<String, String>>,
    failing_personas: Mutex<HashSet<PersonaKind>>,
    fail_all_text: Mutex<bool>,
}

impl ScriptedGeneration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, schema: &str, replies: Vec<Reply>) {
        self.structured
            .lock()
            .unwrap()
            .insert(schema.to_string(), replies);
    }

    pub fn fail_persona(&self, persona: PersonaKind) {
        self.failing_personas.lock().unwrap().insert(persona);
    }

    pub fn fail_all_text(&self) {
        *self.fail_all_text.lock().unwrap() = true;
    }

    pub fn structured_calls(&self, schema: &str) -> usize {
        self.structured_calls
            .lock()
            .unwrap()
            .get(schema)
            .copied()
            .unwrap_or(0)
    }

    /// Free-text calls for a role: a persona key, "habits" or "deep"
    pub fn generate_calls(&self, role: &str) -> usize {
        self.generate_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == role)
            .count()
    }

    /// Most recent prompt sent for a role
    pub fn last_prompt(&self, role: &str) -> Option<String> {
        self.prompts.lock().unwrap().get(role).cloned()
    }

    pub fn total_generate_calls(&self) -> usize {
        self.generate_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let system = request.system_prompt.clone().unwrap_or_default();
        let persona = PersonaKind::ALL
            .into_iter()
            .find(|p| p.system_prompt() == system);
        let role = match persona {
            Some(p) => p.key().to_string(),
            None if system.contains("habits") => "habits".to_string(),
            None => "deep".to_string(),
        };
        self.generate_calls.lock().unwrap().push(role.clone());
        self.prompts
            .lock()
            .unwrap()
            .insert(role.clone(), request.prompt.clone());

        if *self.fail_all_text.lock().unwrap() {
            anyhow::bail!("service unavailable");
        }
        if let Some(p) = persona {
            if self.failing_personas.lock().unwrap().contains(&p) {
                anyhow::bail!("{} generation failed", p);
            }
        }

        Ok(match role.as_str() {
            "critical" => "Too many unwrap calls; propagate errors with ?".to_string(),
            "appreciative" => "Nice use of iterators instead of index loops".to_string(),
            "exploratory" => "Try property-based testing for the parser".to_string(),
            "habits" => "The author tends to unwrap results. last_updated: 2025-01-01".to_string(),
            _ => "Deep dive into error propagation".to_string(),
        })
    }

    async fn generate_structured(
        &self,
        _messages: &[Message],
        schema: &StructuredSchema,
    ) -> Result<StructuredReply> {
        *self
            .structured_calls
            .lock()
            .unwrap()
            .entry(schema.name.clone())
            .or_insert(0) += 1;

        let reply = {
            let mut scripts = self.structured.lock().unwrap();
            match scripts.get_mut(&schema.name) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) if queue.len() == 1 => queue[0].clone(),
                _ => default_reply(&schema.name),
            }
        };
        match reply {
            Reply::Value(v) => Ok(StructuredReply::value(v)),
            Reply::Refuse(r) => Ok(StructuredReply::refused(r)),
            Reply::Fail(e) => anyhow::bail!(e),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn default_reply(schema: &str) -> Reply {
    match schema {
        "topic_selection" => Reply::Value(proposals([
            "Unwrap overuse",
            "Iterator chains",
            "Property testing",
        ])),
        "concepts_habits" => {
            Reply::Value(json!({"concepts": ["iterators", "lifetimes"], "habits": ["unwrap"]}))
        }
        "habit_review" => {
            Reply::Value(json!({"is_reflected": true, "feedback": "", "personas": []}))
        }
        "deep_analysis_review" => {
            Reply::Value(json!({"has_severe_defect": false, "feedback": ""}))
        }
        other => Reply::Fail(format!("no script for {}", other)),
    }
}

/// A topic_selection payload: critical, appreciative, exploratory
pub fn proposals(topics: [&str; 3]) -> Value {
    json!({
        "critical": {
            "topic": topics[0],
            "context": "seen in src/parser.rs",
            "relatedFiles": ["src/parser.rs"],
        },
        "appreciative": {
            "topic": topics[1],
            "context": "seen in src/parser.rs",
            "relatedFiles": ["src/parser.rs"],
        },
        "exploratory": {
            "topic": topics[2],
            "context": "seen in src/lib.rs",
            "relatedFiles": [],
        },
    })
}

/// Fixed change set; file content is synthesised from the path
pub struct FakeChanges {
    pub changes: Vec<ChangeRecord>,
    pub fail: bool,
}

impl FakeChanges {
    pub fn new(changes: Vec<ChangeRecord>) -> Arc<Self> {
        Arc::new(Self {
            changes,
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            changes: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl ChangeSource for FakeChanges {
    async fn get_recent_changes(&self) -> Result<Vec<ChangeRecord>> {
        if self.fail {
            anyhow::bail!("change database locked");
        }
        Ok(self.changes.clone())
    }

    async fn get_file_info(&self, path: &str) -> Result<Option<FileInfo>> {
        Ok(self.changes.iter().find(|c| c.path == path).map(|c| FileInfo {
            path: c.path.clone(),
            content: format!("// current contents of {}", c.path),
        }))
    }
}

/// A diff with `n` added lines
pub fn diff_with_lines(n: usize) -> String {
    (0..n)
        .map(|i| format!("+let x{} = parse()?;", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Three changes, eight changed lines in total
pub fn major_changes() -> Vec<ChangeRecord> {
    vec![
        ChangeRecord::new("src/parser.rs", diff_with_lines(6)),
        ChangeRecord::new("src/lib.rs", "-old\n+new"),
        ChangeRecord::new("README.md", " context only"),
    ]
}

/// Habit profile held in memory; counts writes
#[derive(Default)]
pub struct MemoryHabitStore {
    pub profile: Mutex<String>,
    pub writes: Mutex<usize>,
}

impl MemoryHabitStore {
    pub fn with_profile(profile: &str) -> Arc<Self> {
        Arc::new(Self {
            profile: Mutex::new(profile.to_string()),
            writes: Mutex::new(0),
        })
    }

    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    pub fn current(&self) -> String {
        self.profile.lock().unwrap().clone()
    }
}

#[async_trait]
impl HabitStore for MemoryHabitStore {
    async fn read(&self) -> Result<String> {
        Ok(self.current())
    }

    async fn write(&self, profile: &str) -> Result<()> {
        *self.profile.lock().unwrap() = profile.to_string();
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Embedder whose backend is always down
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingService for FailingEmbedder {
    async fn embed(&self, _text: &str, _is_code: bool) -> Result<Vec<f32>> {
        anyhow::bail!("embedding backend down")
    }

    fn dimension(&self) -> usize {
        64
    }
}

pub fn memory() -> Arc<HybridMemory> {
    memory_with(Arc::new(HashEmbedding::with_dimension(64)))
}

pub fn memory_with(embedder: Arc<dyn EmbeddingService>) -> Arc<HybridMemory> {
    Arc::new(
        HybridMemory::new(RelationalLog::in_memory().unwrap(), embedder)
            .with_vector_index(Arc::new(SqliteVectorIndex::in_memory().unwrap())),
    )
}
