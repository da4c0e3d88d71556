//! The plan, simulate, evaluate, revise loop.
//!
//! ```text
//! Planning -> Scheduling -> Simulating -> Evaluating -> Done
//!    ^                                        |
//!    +------------- Revising <----------------+
//! ```
//!
//! Any non-terminal state may move to `Aborted`. The loop always returns a
//! `CycleResult` holding every iteration it ran, whatever the outcome.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadre_core::config::EngineConfig;
use cadre_core::cycle::{CycleIteration, CycleResult, CycleState, TerminationReason};
use cadre_core::error::CadreError;
use cadre_core::event::{CycleEvent, EventBus};
use cadre_core::types::{ModelOverrides, ToolDescriptor};

use crate::evaluator::Evaluator;
use crate::planner::Planner;
use crate::revision::RevisionController;
use crate::scheduler::schedule;
use crate::simulator::Simulator;
use crate::validator::validate;

/// Inputs for one `run_cycle` invocation.
#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub task: String,
    pub target_score: f64,
    pub max_iterations: usize,
    pub tools: Vec<ToolDescriptor>,
    pub overrides: ModelOverrides,
    /// Quality bar for the evaluator; derived from the task when absent.
    pub criteria: Option<String>,
    pub workspace: Option<String>,
}

impl CycleRequest {
    /// A request using the configured target and iteration cap.
    pub fn new(task: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            task: task.into(),
            target_score: config.cycle.target_score,
            max_iterations: config.cycle.max_iterations,
            tools: vec![],
            overrides: ModelOverrides::new(),
            criteria: config.evaluation.criteria.clone(),
            workspace: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }
}

pub struct CycleOrchestrator {
    planner: Planner,
    revision: RevisionController,
    simulator: Simulator,
    evaluator: Evaluator,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

/// Tracks the current state and reports each move.
struct StateTracker<'a> {
    state: CycleState,
    events: &'a EventBus,
}

impl StateTracker<'_> {
    fn move_to(&mut self, next: CycleState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected cycle transition");
        }
        debug!(from = %self.state, to = %next, "Cycle state change");
        self.events.publish(CycleEvent::StateChanged {
            from: self.state,
            to: next,
        });
        self.state = next;
    }
}

impl CycleOrchestrator {
    pub fn new(
        planner: Planner,
        revision: RevisionController,
        simulator: Simulator,
        evaluator: Evaluator,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            planner,
            revision,
            simulator,
            evaluator,
            events,
            cancel,
        }
    }

    /// Run `fut` unless cancellation fires first.
    async fn unless_cancelled<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    pub async fn run(&self, request: CycleRequest) -> CycleResult {
        let mut tracker = StateTracker {
            state: CycleState::Planning,
            events: &self.events,
        };
        let mut iterations: Vec<CycleIteration> = Vec::new();
        let criteria = request.criteria.clone().unwrap_or_else(|| {
            format!(
                "The terminal agent's output fully and correctly accomplishes the task: {}",
                request.task
            )
        });

        info!(
            task = %request.task,
            target_score = request.target_score,
            max_iterations = request.max_iterations,
            tools = request.tools.len(),
            "Cycle started"
        );

        let reason = 'cycle: {
            if request.max_iterations == 0 {
                break 'cycle TerminationReason::IterationCapReached;
            }

            let design = match self
                .unless_cancelled(self.planner.design_solution(
                    &request.task,
                    &request.tools,
                    &request.overrides,
                ))
                .await
            {
                None => break 'cycle TerminationReason::Cancelled,
                Some(Err(e)) => {
                    break 'cycle TerminationReason::PlanningFailed {
                        detail: e.to_string(),
                    }
                }
                Some(Ok(design)) => design,
            };
            let mut graph = design.graph;

            let mut index = 0;
            loop {
                if self.cancel.is_cancelled() {
                    break 'cycle TerminationReason::Cancelled;
                }
                self.events.publish(CycleEvent::IterationStarted { iteration: index });
                info!(iteration = index, agents = graph.len(), "Iteration started");

                let mut iteration = CycleIteration::new(index, graph.clone());

                tracker.move_to(CycleState::Scheduling);
                let scheduled = validate(&graph)
                    .map_err(CadreError::Validation)
                    .and_then(|_| schedule(&graph));
                let tiers = match scheduled {
                    Ok(tiers) => tiers,
                    Err(e) => {
                        iteration.failure = Some(e.to_string());
                        iterations.push(iteration);
                        break 'cycle TerminationReason::SchedulingFailed {
                            detail: e.to_string(),
                        };
                    }
                };

                tracker.move_to(CycleState::Simulating);
                let trace = match self
                    .simulator
                    .simulate(&graph, &tiers, &request.task, request.workspace.as_deref())
                    .await
                {
                    Ok(trace) => trace,
                    Err(e) => {
                        iteration.failure = Some(e.to_string());
                        iterations.push(iteration);
                        break 'cycle TerminationReason::SchedulingFailed {
                            detail: e.to_string(),
                        };
                    }
                };
                if trace.cancelled {
                    iteration.trace = Some(trace);
                    iterations.push(iteration);
                    break 'cycle TerminationReason::Cancelled;
                }

                tracker.move_to(CycleState::Evaluating);
                let evaluation = self.evaluator.evaluate(&graph, &trace, &criteria).await;
                self.events.publish(CycleEvent::Evaluated {
                    iteration: index,
                    score: evaluation.score,
                    blocking: evaluation.blocking.clone(),
                });

                if evaluation.meets(request.target_score) {
                    iteration.trace = Some(trace);
                    iteration.evaluation = Some(evaluation);
                    iterations.push(iteration);
                    break 'cycle TerminationReason::TargetReached;
                }
                if index + 1 >= request.max_iterations {
                    iteration.trace = Some(trace);
                    iteration.evaluation = Some(evaluation);
                    iterations.push(iteration);
                    break 'cycle TerminationReason::IterationCapReached;
                }

                tracker.move_to(CycleState::Revising);
                iteration.revision_feedback = Some(evaluation.feedback_text());
                self.events.publish(CycleEvent::RevisionRequested { iteration: index });

                let revised = self
                    .unless_cancelled(self.revision.revise(
                        &graph,
                        &trace,
                        &evaluation,
                        &request.tools,
                        &request.overrides,
                    ))
                    .await;
                iteration.trace = Some(trace);
                iteration.evaluation = Some(evaluation);
                iterations.push(iteration);

                match revised {
                    None => break 'cycle TerminationReason::Cancelled,
                    Some(Err(e)) => {
                        break 'cycle TerminationReason::RevisionExhausted {
                            detail: e.to_string(),
                        }
                    }
                    Some(Ok(design)) => graph = design.graph,
                }
                tracker.move_to(CycleState::Planning);
                index += 1;
            }
        };

        let state = match reason {
            TerminationReason::TargetReached => CycleState::Done,
            _ => CycleState::Aborted,
        };
        tracker.move_to(state);

        let result = CycleResult {
            task: request.task,
            target_score: request.target_score,
            iterations,
            state,
            termination: reason,
        };

        match result.state {
            CycleState::Done => info!(
                iterations = result.iterations.len(),
                best_score = result.best_score().unwrap_or(0.0),
                "Cycle reached target"
            ),
            _ => error!(
                iterations = result.iterations.len(),
                reason = ?result.termination,
                best_score = result.best_score().unwrap_or(0.0),
                "Cycle aborted"
            ),
        }
        self.events.publish(CycleEvent::CycleFinished {
            state: result.state,
            reason: result.termination.clone(),
            iterations: result.iterations.len(),
        });
        result
    }
}
