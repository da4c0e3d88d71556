use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cadre_core::config::EvaluationConfig;
use cadre_core::evaluation::EvaluationResult;
use cadre_core::plan::WorkflowGraph;
use cadre_core::schema::{FieldKind, Schema};
use cadre_core::trace::{AgentStatus, RunTrace};
use cadre_core::traits::ModelCaller;
use cadre_core::types::{ModelOverrides, ModelRequest, ModelRole};

use crate::model::call_checked;

/// Highest score a run can get when its terminal agent did not complete.
pub const TERMINAL_FAILURE_CEILING: f64 = 0.3;

/// Scores a run: a deterministic base from agent statuses, then a bounded
/// qualitative adjustment from the evaluator model.
pub struct Evaluator {
    caller: Arc<dyn ModelCaller>,
    config: EvaluationConfig,
    timeout: Duration,
    overrides: ModelOverrides,
}

impl Evaluator {
    pub fn new(caller: Arc<dyn ModelCaller>, config: EvaluationConfig, timeout: Duration) -> Self {
        Self {
            caller,
            config,
            timeout,
            overrides: ModelOverrides::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: ModelOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Evaluate `trace` against `criteria`.
    ///
    /// Never fails: when the qualitative review is unavailable the base score
    /// stands on its own.
    pub async fn evaluate(
        &self,
        graph: &WorkflowGraph,
        trace: &RunTrace,
        criteria: &str,
    ) -> EvaluationResult {
        let base_score = base_score(trace, self.config.terminal_weight);
        let blocking = blocking_agents(graph, trace);
        let terminal_completed = trace.terminal_status() == Some(AgentStatus::Completed);

        let request = ModelRequest::new(
            ModelRole::Evaluator,
            review_prompt(graph, trace, criteria, base_score, &blocking, self.config.max_adjustment),
            Schema::new()
                .field("adjustment", FieldKind::Number)
                .field("feedback", FieldKind::Object)
                .optional("summary", FieldKind::String),
        )
        .with_overrides(&self.overrides);

        let (raw_adjustment, mut feedback, summary) =
            match call_checked(self.caller.as_ref(), request, self.timeout).await {
                Ok(reply) => parse_review(graph, &reply),
                Err(e) => {
                    warn!(error = %e, "Qualitative review failed, using base score");
                    (0.0, BTreeMap::new(), format!("Qualitative review unavailable: {}", e))
                }
            };

        // Per-agent failure notes the review did not already cover.
        for record in &trace.records {
            if feedback.contains_key(&record.agent_id) {
                continue;
            }
            let note = match (record.status, &record.error) {
                (AgentStatus::Failed, Some(err)) => format!("failed with {}", err),
                (AgentStatus::SkippedBlocked, _) => {
                    format!("skipped, blocked by {}", record.blocked_by.join(", "))
                }
                _ => continue,
            };
            feedback.insert(record.agent_id.clone(), note);
        }

        let bound = self.config.max_adjustment.abs();
        let adjustment = raw_adjustment.clamp(-bound, bound);
        let mut score = (base_score + adjustment).clamp(0.0, 1.0);
        if !terminal_completed {
            score = score.min(TERMINAL_FAILURE_CEILING);
        }

        info!(
            score,
            base_score,
            adjustment,
            blocking = blocking.len(),
            terminal_completed,
            "Run evaluated"
        );

        EvaluationResult {
            score,
            base_score,
            adjustment,
            blocking,
            feedback,
            summary,
        }
    }
}

/// `(1 - w) * completed_fraction + w * terminal_completed`.
pub fn base_score(trace: &RunTrace, terminal_weight: f64) -> f64 {
    if trace.records.is_empty() {
        return 0.0;
    }
    let weight = terminal_weight.clamp(0.0, 1.0);
    let completed_fraction = trace.completed_count() as f64 / trace.records.len() as f64;
    let terminal = if trace.terminal_status() == Some(AgentStatus::Completed) {
        1.0
    } else {
        0.0
    };
    (1.0 - weight) * completed_fraction + weight * terminal
}

/// Failed or skipped agents on a dependency path to the terminal, sorted.
pub fn blocking_agents(graph: &WorkflowGraph, trace: &RunTrace) -> Vec<String> {
    let upstream = graph.upstream_of(&trace.terminal);
    // upstream_of is a BTreeSet, so this is already sorted
    upstream
        .into_iter()
        .filter(|id| trace.status_of(id).is_some_and(|s| s.is_blocking()))
        .collect()
}

fn review_prompt(
    graph: &WorkflowGraph,
    trace: &RunTrace,
    criteria: &str,
    base_score: f64,
    blocking: &[String],
    max_adjustment: f64,
) -> Value {
    let agents: Vec<Value> = trace
        .records
        .iter()
        .map(|r| {
            let role = graph.agent(&r.agent_id).map(|a| a.role.as_str()).unwrap_or("");
            json!({
                "id": r.agent_id,
                "role": role,
                "status": r.status.as_str(),
                "artifact": r.artifact,
                "error": r.error.as_ref().map(|e| e.to_string()),
            })
        })
        .collect();

    json!({
        "task": trace.context.task(),
        "criteria": criteria,
        "terminal": trace.terminal,
        "deliverable": trace.output,
        "agents": agents,
        "base_score": base_score,
        "blocking": blocking,
        "instructions": format!(
            "Judge the deliverable against the criteria. Return an adjustment to the base \
             score between -{max:.2} and {max:.2}, feedback keyed by agent id for every \
             agent that should change, and a one-sentence summary.",
            max = max_adjustment
        ),
    })
}

fn parse_review(graph: &WorkflowGraph, reply: &Value) -> (f64, BTreeMap<String, String>, String) {
    let adjustment = reply["adjustment"].as_f64().unwrap_or(0.0);

    let mut feedback = BTreeMap::new();
    if let Some(obj) = reply["feedback"].as_object() {
        for (agent_id, note) in obj {
            if !graph.contains(agent_id) {
                debug!(%agent_id, "Dropping feedback for unknown agent");
                continue;
            }
            let text = match note {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            feedback.insert(agent_id.clone(), text);
        }
    }

    let summary = reply["summary"].as_str().unwrap_or_default().to_string();
    (adjustment, feedback, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::context::SharedContext;
    use cadre_core::trace::{AgentError, AgentErrorKind, ExecutionRecord};
    use cadre_test_utils::{evaluator_reply, linear_graph, ScriptedModelCaller};
    use chrono::Utc;

    fn trace(statuses: &[(&str, AgentStatus)]) -> RunTrace {
        let records = statuses
            .iter()
            .enumerate()
            .map(|(tier, (id, status))| match status {
                AgentStatus::Completed => ExecutionRecord::completed(*id, tier, json!({}), Utc::now()),
                AgentStatus::Failed => ExecutionRecord::failed(
                    *id,
                    tier,
                    AgentError::new(AgentErrorKind::ModelCall, "boom"),
                    Utc::now(),
                ),
                AgentStatus::SkippedBlocked => ExecutionRecord::skipped(*id, tier, vec!["b".into()]),
                AgentStatus::Pending => ExecutionRecord::pending(*id, tier),
            })
            .collect();
        RunTrace {
            run_id: "r".into(),
            workspace: None,
            records,
            context: SharedContext::new("task"),
            terminal: "c".into(),
            output: None,
            cancelled: false,
            total_elapsed_ms: 0,
        }
    }

    fn evaluator(caller: ScriptedModelCaller, max_adjustment: f64) -> Evaluator {
        Evaluator::new(
            Arc::new(caller),
            EvaluationConfig {
                max_adjustment,
                terminal_weight: 0.5,
                criteria: None,
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_base_score() {
        use AgentStatus::*;
        let all = trace(&[("a", Completed), ("b", Completed), ("c", Completed)]);
        assert!((base_score(&all, 0.5) - 1.0).abs() < 1e-9);

        let broken = trace(&[("a", Completed), ("b", Failed), ("c", SkippedBlocked)]);
        assert!((base_score(&broken, 0.5) - (0.5 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_blocking_agents() {
        use AgentStatus::*;
        let broken = trace(&[("a", Completed), ("b", Failed), ("c", SkippedBlocked)]);
        assert_eq!(blocking_agents(&linear_graph(), &broken), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_adjustment_applied_and_clamped() {
        use AgentStatus::*;
        let all = trace(&[("a", Completed), ("b", Completed), ("c", Completed)]);

        let eval = evaluator(ScriptedModelCaller::new().push(ModelRole::Evaluator, evaluator_reply(-0.3)), 0.5)
            .evaluate(&linear_graph(), &all, "good notes")
            .await;
        assert!((eval.score - 0.7).abs() < 1e-9);

        let eval = evaluator(ScriptedModelCaller::new().push(ModelRole::Evaluator, evaluator_reply(-0.9)), 0.2)
            .evaluate(&linear_graph(), &all, "good notes")
            .await;
        assert!((eval.adjustment + 0.2).abs() < 1e-9);
        assert!((eval.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_terminal_failure_caps_score() {
        use AgentStatus::*;
        let broken = trace(&[("a", Completed), ("b", Completed), ("c", Failed)]);
        let eval = evaluator(ScriptedModelCaller::new().push(ModelRole::Evaluator, evaluator_reply(1.0)), 1.0)
            .evaluate(&linear_graph(), &broken, "anything")
            .await;
        assert!(eval.score <= TERMINAL_FAILURE_CEILING);
        assert_eq!(eval.blocking, vec!["c"]);
        assert!(eval.feedback["c"].contains("model-call: boom"));
    }

    #[tokio::test]
    async fn test_review_failure_falls_back_to_base() {
        use AgentStatus::*;
        let all = trace(&[("a", Completed), ("b", Completed), ("c", Completed)]);
        let caller = ScriptedModelCaller::new().push_error(ModelRole::Evaluator, "HTTP 500");
        let eval = evaluator(caller, 0.3).evaluate(&linear_graph(), &all, "x").await;

        assert!((eval.score - 1.0).abs() < 1e-9);
        assert_eq!(eval.adjustment, 0.0);
        assert!(eval.summary.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_invalid_review_falls_back() {
        use AgentStatus::*;
        let all = trace(&[("a", Completed), ("b", Completed), ("c", Completed)]);
        let caller = ScriptedModelCaller::new().push(ModelRole::Evaluator, json!({"adjustment": "lots"}));
        let eval = evaluator(caller, 0.3).evaluate(&linear_graph(), &all, "x").await;
        assert_eq!(eval.adjustment, 0.0);
    }

    #[tokio::test]
    async fn test_feedback_filtered_to_graph_agents() {
        use AgentStatus::*;
        let all = trace(&[("a", Completed), ("b", Completed), ("c", Completed)]);
        let caller = ScriptedModelCaller::new().push(
            ModelRole::Evaluator,
            json!({"adjustment": 0.0, "feedback": {"b": "tighten wording", "zzz": "?", "c": {"x": 1}}}),
        );
        let eval = evaluator(caller, 0.3).evaluate(&linear_graph(), &all, "x").await;
        assert_eq!(eval.feedback.len(), 2);
        assert_eq!(eval.feedback["b"], "tighten wording");
        assert_eq!(eval.feedback["c"], r#"{"x":1}"#);
    }
}
