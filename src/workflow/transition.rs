// Workflow graph
//
// `transition` is the whole routing table. It is pure and total: a pair
// that is not in the table routes to Fallback, and Fallback only leads to End.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Precheck,
    MinorChangeAdvice,
    SelectTopics,
    AnalyzeHabits,
    RunPersonas,
    DeepAnalysis,
    IntegrateReports,
    Review,
    UpdateHabits,
    Error,
    Fallback,
    End,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Node::Precheck => "precheck",
            Node::MinorChangeAdvice => "minor_change_advice",
            Node::SelectTopics => "select_topics",
            Node::AnalyzeHabits => "analyze_habits",
            Node::RunPersonas => "run_personas",
            Node::DeepAnalysis => "deep_analysis",
            Node::IntegrateReports => "integrate_reports",
            Node::Review => "review",
            Node::UpdateHabits => "update_habits",
            Node::Error => "error",
            Node::Fallback => "fallback",
            Node::End => "end",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a node reports when it finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    MinorChange,
    FullAnalysis,
    TopicsSelected,
    HabitsAnalyzed,
    ReportsReady { deep_analysis: bool },
    DeepAnalysisDone,
    Integrated,
    Accepted,
    RerunPersonas,
    RerunDeepAnalysis,
    Exhausted,
    /// Nothing usable to continue with
    Abandon,
    /// The node failed; its error is recorded in the state
    Failed,
    Retry(Node),
    Escalate,
    Finished,
}

pub fn transition(node: Node, event: &Event) -> Node {
    use Event as E;
    use Node as N;

    match (node, event) {
        (N::End, _) | (N::Fallback, _) => N::End,

        (N::Precheck, E::MinorChange) => N::MinorChangeAdvice,
        (N::Precheck, E::FullAnalysis) => N::SelectTopics,

        (N::SelectTopics, E::TopicsSelected) => N::AnalyzeHabits,
        (N::AnalyzeHabits, E::HabitsAnalyzed) => N::RunPersonas,

        (N::RunPersonas, E::ReportsReady { deep_analysis: true }) => N::DeepAnalysis,
        (N::RunPersonas, E::ReportsReady { deep_analysis: false }) => N::IntegrateReports,
        (N::DeepAnalysis, E::DeepAnalysisDone) => N::IntegrateReports,
        (N::IntegrateReports, E::Integrated) => N::Review,

        (N::Review, E::Accepted) => N::UpdateHabits,
        (N::Review, E::RerunPersonas) => N::RunPersonas,
        (N::Review, E::RerunDeepAnalysis) => N::DeepAnalysis,
        (N::Review, E::Exhausted) => N::Fallback,

        (N::MinorChangeAdvice | N::UpdateHabits, E::Finished) => N::End,

        (N::SelectTopics | N::AnalyzeHabits | N::RunPersonas, E::Abandon) => N::Fallback,

        // Error only re-enters working nodes, never itself or a terminal
        (N::Error, E::Retry(target)) => match target {
            N::Error | N::Fallback | N::End => N::Fallback,
            other => *other,
        },
        (N::Error, E::Escalate) => N::Fallback,
        (N::Error, _) => N::Fallback,
        (_, E::Failed) => N::Error,

        _ => N::Fallback,
    }
}
