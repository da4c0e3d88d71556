use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use cadre_core::config::CycleConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::evaluation::EvaluationResult;
use cadre_core::plan::WorkflowGraph;
use cadre_core::trace::RunTrace;
use cadre_core::traits::ModelCaller;
use cadre_core::types::{ModelOverrides, ModelRequest, ModelRole, ToolDescriptor};

use crate::model::call_checked;
use crate::planner::{accept_design, design_schema, graph_format, SolutionDesign, GRAPH_RULES};

/// Asks the planner for a revised graph after a run fell short.
pub struct RevisionController {
    caller: Arc<dyn ModelCaller>,
    retries: u32,
    timeout: Duration,
}

impl RevisionController {
    pub fn new(caller: Arc<dyn ModelCaller>, config: &CycleConfig) -> Self {
        Self {
            caller,
            retries: config.revision_retries,
            timeout: Duration::from_secs(config.model_timeout_secs),
        }
    }

    /// Request a revision of `prior` that addresses `evaluation`.
    ///
    /// Every failed attempt counts against the retry budget, including
    /// candidates that fail validation. Exhausting it yields
    /// `RevisionExhausted`.
    pub async fn revise(
        &self,
        prior: &WorkflowGraph,
        trace: &RunTrace,
        evaluation: &EvaluationResult,
        tools: &[ToolDescriptor],
        overrides: &ModelOverrides,
    ) -> Result<SolutionDesign> {
        let attempts = self.retries + 1;
        let mut problems: Option<String> = None;

        for attempt in 1..=attempts {
            let request = ModelRequest::new(
                ModelRole::Planner,
                revision_prompt(prior, trace, evaluation, tools, problems.as_deref()),
                design_schema(),
            )
            .with_overrides(overrides);

            let outcome = match call_checked(self.caller.as_ref(), request, self.timeout).await {
                Ok(reply) => accept_design(reply, tools),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(design) => {
                    info!(attempt, agents = design.graph.len(), "Revised graph accepted");
                    return Ok(design);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Revision rejected");
                    problems = Some(e.to_string());
                }
                Err(e) => {
                    return Err(CadreError::RevisionExhausted {
                        attempts: attempt,
                        reason: e.to_string(),
                    })
                }
            }
        }

        Err(CadreError::RevisionExhausted {
            attempts,
            reason: problems.unwrap_or_default(),
        })
    }
}

fn revision_prompt(
    prior: &WorkflowGraph,
    trace: &RunTrace,
    evaluation: &EvaluationResult,
    tools: &[ToolDescriptor],
    problems: Option<&str>,
) -> Value {
    let statuses: Vec<Value> = trace
        .records
        .iter()
        .map(|r| {
            json!({
                "id": r.agent_id,
                "status": r.status.as_str(),
                "error": r.error.as_ref().map(|e| e.to_string()),
            })
        })
        .collect();

    json!({
        "task": trace.context.task(),
        "available_tools": tools,
        "prior_graph": prior,
        "run": statuses,
        "score": evaluation.score,
        "blocking": evaluation.blocking,
        "feedback": evaluation.feedback,
        "summary": evaluation.summary,
        "graph_format": graph_format(),
        "rules": GRAPH_RULES,
        "previous_problems": problems,
        "instructions": "Revise the prior graph so the blocking agents succeed and the feedback \
                         is addressed. Keep agents that worked unless they must change. Return \
                         the complete revised graph.",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::context::SharedContext;
    use cadre_test_utils::{agent, diamond_graph, linear_graph, planner_reply, ScriptedModelCaller};
    use std::collections::BTreeMap;

    fn inputs() -> (RunTrace, EvaluationResult) {
        let trace = RunTrace {
            run_id: "r".into(),
            workspace: None,
            records: vec![],
            context: SharedContext::new("ship notes"),
            terminal: "c".into(),
            output: None,
            cancelled: false,
            total_elapsed_ms: 0,
        };
        let mut feedback = BTreeMap::new();
        feedback.insert("b".to_string(), "too vague".to_string());
        let eval = EvaluationResult {
            score: 0.4,
            base_score: 0.5,
            adjustment: -0.1,
            blocking: vec!["b".into()],
            feedback,
            summary: "weak".into(),
        };
        (trace, eval)
    }

    fn controller(caller: Arc<ScriptedModelCaller>, retries: u32) -> RevisionController {
        let config = CycleConfig {
            revision_retries: retries,
            ..CycleConfig::default()
        };
        RevisionController::new(caller, &config)
    }

    #[tokio::test]
    async fn test_revise_sends_feedback() {
        let caller = Arc::new(ScriptedModelCaller::new().push(ModelRole::Planner, planner_reply(&diamond_graph())));
        let (trace, eval) = inputs();
        let design = controller(caller.clone(), 2)
            .revise(&linear_graph(), &trace, &eval, &[], &ModelOverrides::new())
            .await
            .unwrap();
        assert_eq!(design.graph, diamond_graph());

        let prompt = &caller.requests()[0].prompt;
        assert_eq!(prompt["task"], "ship notes");
        assert_eq!(prompt["blocking"], json!(["b"]));
        assert_eq!(prompt["feedback"]["b"], "too vague");
        assert_eq!(prompt["prior_graph"]["terminal"], "c");
    }

    #[tokio::test]
    async fn test_revise_exhausts() {
        let dangling = WorkflowGraph::new("bad", vec![agent("a", &["ghost"])]);
        let caller = Arc::new(
            ScriptedModelCaller::new()
                .push(ModelRole::Planner, planner_reply(&dangling))
                .push_error(ModelRole::Planner, "HTTP 503"),
        );
        let (trace, eval) = inputs();
        let err = controller(caller.clone(), 1)
            .revise(&linear_graph(), &trace, &eval, &[], &ModelOverrides::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "revision-exhausted");
        match err {
            CadreError::RevisionExhausted { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("503"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(caller.requests().len(), 2);
        assert!(caller.requests()[1].prompt["previous_problems"]
            .as_str()
            .unwrap()
            .contains("unknown-dependency"));
    }
}
