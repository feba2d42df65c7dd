// Per-cycle workflow state. Only the node being executed mutates it.

use std::collections::{BTreeMap, BTreeSet};

use super::transition::Node;
use crate::changes::ChangeRecord;
use crate::memory::{Report, Topic};
use crate::personas::PersonaKind;
use crate::results::ResultStatus;
use crate::review::ReviewState;
use crate::runner::AgentInput;
use crate::selector::Selection;

#[derive(Debug, Default)]
pub struct WorkflowState {
    pub changes: Vec<ChangeRecord>,
    pub changed_lines: usize,
    pub recent_topics: Vec<Topic>,
    pub selection: Option<Selection>,

    /// Read once at cycle start
    pub habit_profile: String,
    pub habit_keywords: Vec<String>,
    pub concepts: Vec<String>,
    pub habits_accounted: bool,
    pub concepts_accounted: bool,

    pub persona_contexts: BTreeMap<PersonaKind, AgentInput>,
    pub reports: BTreeMap<PersonaKind, Report>,
    /// Personas the review sent back; `None` runs everyone
    pub personas_to_rerun: Option<BTreeSet<PersonaKind>>,

    pub deep_output: Option<String>,
    /// Reviewer complaint about the deep analysis, pending a rerun
    pub deep_feedback: Option<String>,

    pub integrated_report: Option<String>,
    pub review: ReviewState,

    pub error_flag: bool,
    pub error_node: Option<Node>,
    pub last_error: Option<String>,
    /// Node retries used so far, shared by every node
    pub node_retries: u32,
    pub fallback_flag: bool,

    pub final_report: Option<String>,
    pub status: Option<ResultStatus>,
}

impl WorkflowState {
    pub fn record_failure(&mut self, node: Node, error: &anyhow::Error) {
        self.error_flag = true;
        self.error_node = Some(node);
        self.last_error = Some(format!("{:#}", error));
    }

    pub fn clear_error(&mut self) {
        self.error_flag = false;
    }

    /// Whether deep analysis should (re)run after the personas
    pub fn deep_analysis_due(&self, enabled: bool) -> bool {
        enabled && (self.deep_output.is_none() || self.deep_feedback.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_bookkeeping() {
        let mut state = WorkflowState::default();
        state.record_failure(Node::Review, &anyhow::anyhow!("outer").context("wrapped"));
        assert!(state.error_flag);
        assert_eq!(state.error_node, Some(Node::Review));
        assert_eq!(state.last_error.as_deref(), Some("wrapped: outer"));

        state.clear_error();
        assert!(!state.error_flag);
        assert_eq!(state.error_node, Some(Node::Review));
    }

    #[test]
    fn test_deep_analysis_due() {
        let mut state = WorkflowState::default();
        assert!(state.deep_analysis_due(true));
        assert!(!state.deep_analysis_due(false));

        state.deep_output = Some("done".into());
        assert!(!state.deep_analysis_due(true));

        state.deep_feedback = Some("missed the point".into());
        assert!(state.deep_analysis_due(true));
    }
}
