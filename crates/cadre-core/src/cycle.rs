use serde::{Deserialize, Serialize};

use crate::evaluation::EvaluationResult;
use crate::plan::WorkflowGraph;
use crate::trace::RunTrace;

/// States of the plan/simulate/evaluate/revise loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Planning,
    Scheduling,
    Simulating,
    Evaluating,
    Revising,
    Done,
    Aborted,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Whether the loop may move from `self` to `next`.
    ///
    /// Any non-terminal state may abort; terminal states are final.
    pub fn can_transition_to(&self, next: CycleState) -> bool {
        use CycleState::*;
        match (self, next) {
            (Done | Aborted, _) => false,
            (_, Aborted) => true,
            (Planning, Scheduling)
            | (Scheduling, Simulating)
            | (Simulating, Evaluating)
            | (Evaluating, Done)
            | (Evaluating, Revising)
            | (Revising, Planning) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Scheduling => "scheduling",
            Self::Simulating => "simulating",
            Self::Evaluating => "evaluating",
            Self::Revising => "revising",
            Self::Done => "done",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Why a cycle stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    TargetReached,
    IterationCapReached,
    PlanningFailed { detail: String },
    SchedulingFailed { detail: String },
    RevisionExhausted { detail: String },
    Cancelled,
}

/// One recorded pass through the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleIteration {
    /// Zero-based iteration number.
    pub index: usize,
    pub graph: WorkflowGraph,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<RunTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationResult>,
    /// Feedback sent to the planner to produce the next iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_feedback: Option<String>,
    /// Error that ended this iteration early, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl CycleIteration {
    pub fn new(index: usize, graph: WorkflowGraph) -> Self {
        Self {
            index,
            graph,
            trace: None,
            evaluation: None,
            revision_feedback: None,
            failure: None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        self.evaluation.as_ref().map(|e| e.score)
    }
}

/// Full history of one `run_cycle` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub task: String,
    pub target_score: f64,
    pub iterations: Vec<CycleIteration>,
    /// `Done` or `Aborted`.
    pub state: CycleState,
    pub termination: TerminationReason,
}

impl CycleResult {
    /// Highest-scoring evaluated iteration; the earliest wins ties.
    pub fn best_iteration(&self) -> Option<&CycleIteration> {
        self.iterations
            .iter()
            .filter(|it| it.evaluation.is_some())
            .fold(None, |best: Option<&CycleIteration>, it| match best {
                Some(b) if b.score() >= it.score() => Some(b),
                _ => Some(it),
            })
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_iteration().and_then(CycleIteration::score)
    }

    pub fn succeeded(&self) -> bool {
        self.state == CycleState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn evaluated(index: usize, score: f64) -> CycleIteration {
        let mut it = CycleIteration::new(index, WorkflowGraph::default());
        it.evaluation = Some(EvaluationResult {
            score,
            base_score: score,
            adjustment: 0.0,
            blocking: vec![],
            feedback: BTreeMap::new(),
            summary: String::new(),
        });
        it
    }

    #[test]
    fn test_transitions() {
        use CycleState::*;
        assert!(Planning.can_transition_to(Scheduling));
        assert!(Evaluating.can_transition_to(Done));
        assert!(Evaluating.can_transition_to(Revising));
        assert!(Revising.can_transition_to(Planning));
        assert!(Simulating.can_transition_to(Aborted));
        assert!(!Planning.can_transition_to(Evaluating));
        assert!(!Revising.can_transition_to(Done));
        assert!(!Done.can_transition_to(Planning));
        assert!(!Aborted.can_transition_to(Aborted));
    }

    #[test]
    fn test_best_iteration_prefers_earliest_tie() {
        let result = CycleResult {
            task: "t".into(),
            target_score: 0.9,
            iterations: vec![
                evaluated(0, 0.4),
                evaluated(1, 0.7),
                CycleIteration::new(2, WorkflowGraph::default()),
                evaluated(3, 0.7),
            ],
            state: CycleState::Aborted,
            termination: TerminationReason::IterationCapReached,
        };
        assert_eq!(result.best_iteration().unwrap().index, 1);
        assert_eq!(result.best_score(), Some(0.7));
        assert!(!result.succeeded());
    }

    #[test]
    fn test_termination_wire_format() {
        let json = serde_json::to_string(&TerminationReason::RevisionExhausted {
            detail: "cycle-detected".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"reason":"revision_exhausted","detail":"cycle-detected"}"#);
    }
}
