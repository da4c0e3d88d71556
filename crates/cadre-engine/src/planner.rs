//! Graph design through the planner model.
//!
//! Planner output is untrusted: every reply is shape-checked, parsed into a
//! `WorkflowGraph`, given a terminal when it has several sinks, and validated
//! before anything else sees it. Invalid replies are retried with the
//! problems fed back to the model.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cadre_core::config::CycleConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::plan::WorkflowGraph;
use cadre_core::schema::{FieldKind, Schema};
use cadre_core::traits::ModelCaller;
use cadre_core::types::{
    ActionManifest, DelegationAssessment, EnvironmentRequirements, ModelOverrides, ModelRequest,
    ModelRole, ToolDescriptor,
};

use crate::model::call_checked;
use crate::validator::validate;

/// A validated graph plus what its actions need from the surrounding system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionDesign {
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub action_manifests: Vec<ActionManifest>,
    #[serde(default)]
    pub environment_requirements: EnvironmentRequirements,
}

/// Shape every planner reply must have, for both designs and revisions.
pub(crate) fn design_schema() -> Schema {
    Schema::new()
        .field("graph", FieldKind::Object)
        .optional("action_manifests", FieldKind::Array)
        .optional("environment_requirements", FieldKind::Object)
}

/// Example of the graph wire format, shown to the planner.
pub(crate) fn graph_format() -> Value {
    json!({
        "name": "short-kebab-name",
        "agents": [
            {
                "id": "fetch_changes",
                "role": "Collect merged changes since the last release",
                "action": {"kind": "capability", "name": "<available tool name>"},
                "depends_on": [],
                "input_schema": [{"name": "task", "type": "string"}],
                "output_schema": [{"name": "changes", "type": "array"}]
            },
            {
                "id": "draft_notes",
                "role": "Write release notes from the changes",
                "action": {"kind": "command", "name": "draft", "args": []},
                "depends_on": ["fetch_changes"],
                "input_schema": [{"name": "changes", "type": "array"}],
                "output_schema": [{"name": "notes", "type": "string"}]
            }
        ],
        "terminal": "draft_notes"
    })
}

pub(crate) const GRAPH_RULES: &str = "Agents form a directed acyclic graph through depends_on. \
    Every dependency must name another agent. Exactly one terminal agent produces the \
    deliverable; every other agent must feed it, except agents marked side_effect_only. \
    Input fields resolve from the reserved key \"task\", from a dependency's id, or from a \
    same-named output field of a dependency; no agent may use the id \"task\". Field types: \
    string, number, integer, boolean, object, array, any. Action kinds: command {name, args}, \
    capability {name}, delegate {task}.";

/// Turn a planner reply into a validated design.
pub(crate) fn accept_design(reply: Value, tools: &[ToolDescriptor]) -> Result<SolutionDesign> {
    let graph: WorkflowGraph = serde_json::from_value(reply["graph"].clone())?;
    let graph = graph.with_synthesized_terminal();
    let report = validate(&graph).map_err(CadreError::Validation)?;
    debug!(terminal = %report.terminal, agents = graph.len(), "Planner graph validated");

    let manifests: Vec<ActionManifest> = match reply.get("action_manifests") {
        Some(Value::Array(_)) => serde_json::from_value(reply["action_manifests"].clone())?,
        _ => vec![],
    };
    let environment_requirements = match reply.get("environment_requirements") {
        Some(Value::Object(_)) => serde_json::from_value(reply["environment_requirements"].clone())?,
        _ => EnvironmentRequirements::default(),
    };

    Ok(SolutionDesign {
        action_manifests: restrict_manifests(&graph, manifests, tools),
        graph,
        environment_requirements,
    })
}

/// Drop manifests for unknown agents and tools outside the available list.
fn restrict_manifests(
    graph: &WorkflowGraph,
    manifests: Vec<ActionManifest>,
    tools: &[ToolDescriptor],
) -> Vec<ActionManifest> {
    let available: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    manifests
        .into_iter()
        .filter(|m| {
            let known = graph.contains(&m.agent_id);
            if !known {
                warn!(agent_id = %m.agent_id, "Dropping manifest for unknown agent");
            }
            known
        })
        .map(|mut m| {
            m.tools.retain(|tool| {
                let ok = available.contains(tool.as_str());
                if !ok {
                    warn!(agent_id = %m.agent_id, %tool, "Dropping unavailable tool from manifest");
                }
                ok
            });
            m
        })
        .collect()
}

/// Designs workflow graphs and judges whether a task warrants one.
pub struct Planner {
    caller: Arc<dyn ModelCaller>,
    retries: u32,
    timeout: Duration,
}

impl Planner {
    pub fn new(caller: Arc<dyn ModelCaller>, config: &CycleConfig) -> Self {
        Self {
            caller,
            retries: config.planning_retries,
            timeout: Duration::from_secs(config.model_timeout_secs),
        }
    }

    /// Ask whether `task` is worth a multi-agent workflow.
    pub async fn assess_delegation_need(
        &self,
        task: &str,
        tools: &[ToolDescriptor],
        overrides: &ModelOverrides,
    ) -> Result<DelegationAssessment> {
        let request = ModelRequest::new(
            ModelRole::Planner,
            json!({
                "task": task,
                "available_tools": tools,
                "instructions": "Decide whether this task should be split across a workflow of \
                                 specialised agents rather than handled in one step. Give a \
                                 confidence between 0 and 1 and the areas the workflow should \
                                 focus on.",
            }),
            Schema::new()
                .field("should_delegate", FieldKind::Boolean)
                .field("confidence", FieldKind::Number)
                .optional("focus_areas", FieldKind::Array),
        )
        .with_overrides(overrides);

        let reply = call_checked(self.caller.as_ref(), request, self.timeout).await?;
        let mut assessment: DelegationAssessment = serde_json::from_value(reply)?;
        assessment.confidence = assessment.confidence.clamp(0.0, 1.0);
        info!(
            should_delegate = assessment.should_delegate,
            confidence = assessment.confidence,
            "Delegation assessed"
        );
        Ok(assessment)
    }

    /// Design a validated graph for `task`, retrying invalid designs.
    pub async fn design_solution(
        &self,
        task: &str,
        tools: &[ToolDescriptor],
        overrides: &ModelOverrides,
    ) -> Result<SolutionDesign> {
        let attempts = self.retries + 1;
        let mut problems: Option<String> = None;

        for attempt in 1..=attempts {
            let request = ModelRequest::new(
                ModelRole::Planner,
                json!({
                    "task": task,
                    "available_tools": tools,
                    "graph_format": graph_format(),
                    "rules": GRAPH_RULES,
                    "previous_problems": problems,
                    "instructions": "Design the smallest workflow of narrowly scoped agents that \
                                     accomplishes the task. Also list, per agent, which available \
                                     tools its action uses (action_manifests: [{agent_id, summary, \
                                     tools}]) and the environment variables and secrets the \
                                     workflow needs (environment_requirements: {env_vars, secrets}).",
                }),
                design_schema(),
            )
            .with_overrides(overrides);

            let outcome = match call_checked(self.caller.as_ref(), request, self.timeout).await {
                Ok(reply) => accept_design(reply, tools),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(design) => {
                    info!(
                        attempt,
                        graph = %design.graph.name,
                        agents = design.graph.len(),
                        "Workflow designed"
                    );
                    return Ok(design);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Planner design rejected, retrying");
                    problems = Some(e.to_string());
                }
                Err(e) => {
                    return Err(CadreError::PlanningFailed {
                        attempts: attempt,
                        reason: e.to_string(),
                    })
                }
            }
        }

        Err(CadreError::PlanningFailed {
            attempts,
            reason: problems.unwrap_or_else(|| "no attempts made".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::plan::ViolationKind;
    use cadre_test_utils::{agent, linear_graph, planner_reply, ScriptedModelCaller};

    fn planner(caller: Arc<ScriptedModelCaller>, retries: u32) -> Planner {
        let config = CycleConfig {
            planning_retries: retries,
            ..CycleConfig::default()
        };
        Planner::new(caller, &config)
    }

    fn cyclic_reply() -> Value {
        let graph = WorkflowGraph::new("bad", vec![agent("a", &["b"]), agent("b", &["a"])]);
        planner_reply(&graph)
    }

    #[tokio::test]
    async fn test_design_accepts_valid_graph() {
        let caller = Arc::new(ScriptedModelCaller::new().push(ModelRole::Planner, planner_reply(&linear_graph())));
        let design = planner(caller.clone(), 2)
            .design_solution("notes", &[], &ModelOverrides::new())
            .await
            .unwrap();
        assert_eq!(design.graph, linear_graph());
        assert!(design.action_manifests.is_empty());
        assert!(design.environment_requirements.is_empty());
    }

    #[tokio::test]
    async fn test_design_retries_with_problems() {
        let caller = Arc::new(
            ScriptedModelCaller::new()
                .push(ModelRole::Planner, cyclic_reply())
                .push(ModelRole::Planner, planner_reply(&linear_graph())),
        );
        let design = planner(caller.clone(), 2)
            .design_solution("notes", &[], &ModelOverrides::new())
            .await
            .unwrap();
        assert_eq!(design.graph.len(), 3);

        let requests = caller.requests_for(ModelRole::Planner);
        assert_eq!(requests.len(), 2);
        assert!(requests[0].prompt["previous_problems"].is_null());
        assert!(requests[1].prompt["previous_problems"]
            .as_str()
            .unwrap()
            .contains("cycle-detected"));
    }

    #[tokio::test]
    async fn test_design_gives_up_after_retries() {
        let caller = Arc::new(
            ScriptedModelCaller::new()
                .push(ModelRole::Planner, cyclic_reply())
                .push(ModelRole::Planner, cyclic_reply()),
        );
        let err = planner(caller, 1)
            .design_solution("notes", &[], &ModelOverrides::new())
            .await
            .unwrap_err();
        match err {
            CadreError::PlanningFailed { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("cycle-detected"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_design_synthesizes_aggregator() {
        let graph = WorkflowGraph::new(
            "fan",
            vec![agent("a", &[]), agent("b", &["a"]), agent("c", &["a"])],
        );
        let caller = Arc::new(ScriptedModelCaller::new().push(ModelRole::Planner, planner_reply(&graph)));
        let design = planner(caller, 0)
            .design_solution("t", &[], &ModelOverrides::new())
            .await
            .unwrap();
        assert_eq!(design.graph.terminal.as_deref(), Some("aggregate_outputs"));
        assert!(validate(&design.graph).is_ok());
    }

    #[test]
    fn test_accept_design_filters_manifests() {
        let reply = json!({
            "graph": linear_graph(),
            "action_manifests": [
                {"agent_id": "a", "summary": "fetch", "tools": ["github", "jira"]},
                {"agent_id": "ghost", "tools": ["github"]}
            ],
            "environment_requirements": {"env_vars": ["GITHUB_REPO"], "secrets": ["GITHUB_TOKEN"]}
        });
        let tools = vec![ToolDescriptor::new("github", "GitHub API")];
        let design = accept_design(reply, &tools).unwrap();

        assert_eq!(design.action_manifests.len(), 1);
        assert_eq!(design.action_manifests[0].tools, vec!["github"]);
        assert_eq!(design.environment_requirements.secrets, vec!["GITHUB_TOKEN"]);
    }

    #[test]
    fn test_accept_design_reports_violation() {
        let reply = json!({"graph": {"agents": []}});
        let err = accept_design(reply, &[]).unwrap_err();
        match err {
            CadreError::Validation(v) => assert_eq!(v.kind, ViolationKind::NoTerminal),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_assess_delegation() {
        let caller = Arc::new(ScriptedModelCaller::new().push(
            ModelRole::Planner,
            json!({"should_delegate": true, "confidence": 1.4, "focus_areas": ["fetching"]}),
        ));
        let a = planner(caller, 0)
            .assess_delegation_need("t", &[], &ModelOverrides::new())
            .await
            .unwrap();
        assert!(a.should_delegate);
        assert_eq!(a.confidence, 1.0);
        assert_eq!(a.focus_areas, vec!["fetching"]);
    }
}
