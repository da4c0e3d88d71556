use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CadreError, Result};
use crate::plan::AgentSpec;

/// Reserved input key that resolves to the originating task description.
pub const TASK_KEY: &str = "task";

/// Shared context for passing artifacts between agents in one run.
///
/// Keyed by agent id. Each key is written exactly once, by its owning agent,
/// so readers in later tiers never observe a changing value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContext {
    task: String,
    artifacts: BTreeMap<String, Value>,
}

impl SharedContext {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            artifacts: BTreeMap::new(),
        }
    }

    /// The originating task description.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Get an agent's artifact.
    pub fn get(&self, agent_id: &str) -> Option<&Value> {
        self.artifacts.get(agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.artifacts.contains_key(agent_id)
    }

    /// Record an agent's artifact. Fails if the agent already wrote one.
    pub fn insert(&mut self, agent_id: impl Into<String>, artifact: Value) -> Result<()> {
        let agent_id = agent_id.into();
        if self.artifacts.contains_key(&agent_id) {
            return Err(CadreError::ContextOverwrite(agent_id));
        }
        self.artifacts.insert(agent_id, artifact);
        Ok(())
    }

    /// All artifacts, ordered by agent id.
    pub fn artifacts(&self) -> &BTreeMap<String, Value> {
        &self.artifacts
    }

    /// Resolve a single input key for an agent with the given dependencies.
    ///
    /// Lookup order: the reserved `task` key, the whole artifact of a
    /// dependency named by the key, then a same-named field inside a
    /// dependency's object artifact (first dependency in declared order wins).
    /// Artifacts of agents outside `deps` are never visible.
    pub fn resolve(&self, key: &str, deps: &[String]) -> Option<Value> {
        if key == TASK_KEY {
            return Some(Value::String(self.task.clone()));
        }
        if deps.iter().any(|d| d == key) {
            if let Some(artifact) = self.artifacts.get(key) {
                return Some(artifact.clone());
            }
        }
        deps.iter()
            .filter_map(|dep| self.artifacts.get(dep))
            .filter_map(|artifact| artifact.as_object())
            .find_map(|obj| obj.get(key).cloned())
    }

    /// Resolve every input the agent declares.
    ///
    /// Returns the names of required inputs that could not be found.
    pub fn resolve_inputs(
        &self,
        spec: &AgentSpec,
    ) -> std::result::Result<Map<String, Value>, Vec<String>> {
        let mut inputs = Map::new();
        let mut missing = Vec::new();

        for field in &spec.input_schema.fields {
            match self.resolve(&field.name, &spec.depends_on) {
                Some(value) => {
                    inputs.insert(field.name.clone(), value);
                }
                None if field.required => missing.push(field.name.clone()),
                None => {}
            }
        }

        if missing.is_empty() {
            Ok(inputs)
        } else {
            Err(missing)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ActionRef;
    use crate::schema::{FieldKind, Schema};
    use serde_json::json;

    #[test]
    fn test_write_once() {
        let mut ctx = SharedContext::new("ship release notes");
        ctx.insert("fetch", json!({"prs": [1, 2]})).unwrap();

        let err = ctx.insert("fetch", json!({"prs": []})).unwrap_err();
        assert!(matches!(err, CadreError::ContextOverwrite(ref id) if id == "fetch"));
        assert_eq!(ctx.get("fetch"), Some(&json!({"prs": [1, 2]})));
    }

    #[test]
    fn test_resolve_order() {
        let mut ctx = SharedContext::new("the task");
        ctx.insert("fetch", json!({"notes": "from fetch", "count": 3})).unwrap();
        ctx.insert("draft", json!({"notes": "from draft"})).unwrap();

        let deps = vec!["draft".to_string(), "fetch".to_string()];
        assert_eq!(ctx.resolve(TASK_KEY, &deps), Some(json!("the task")));
        assert_eq!(ctx.resolve("fetch", &deps), Some(json!({"notes": "from fetch", "count": 3})));
        assert_eq!(ctx.resolve("notes", &deps), Some(json!("from draft")));
        assert_eq!(ctx.resolve("count", &deps), Some(json!(3)));
        assert_eq!(ctx.resolve("count", &[]), None);
    }

    #[test]
    fn test_resolve_ignores_agents_outside_dependencies() {
        let mut ctx = SharedContext::new("t");
        ctx.insert("fetch", json!({"summary": "from dependency"})).unwrap();
        ctx.insert("summary", json!({"other": "unrelated agent"})).unwrap();

        let deps = vec!["fetch".to_string()];
        assert_eq!(ctx.resolve("summary", &deps), Some(json!("from dependency")));
        assert_eq!(ctx.resolve("summary", &[]), None);

        let spec = AgentSpec::new("draft", "draft notes", ActionRef::command("draft"))
            .depends_on(["fetch"])
            .with_inputs(Schema::new().field("summary", FieldKind::String));
        let inputs = ctx.resolve_inputs(&spec).unwrap();
        assert_eq!(inputs.get("summary"), Some(&json!("from dependency")));
    }

    #[test]
    fn test_resolve_inputs_reports_missing_required() {
        let mut ctx = SharedContext::new("t");
        ctx.insert("fetch", json!({"prs": []})).unwrap();

        let spec = AgentSpec::new("format", "format notes", ActionRef::command("format"))
            .depends_on(["fetch"])
            .with_inputs(
                Schema::new()
                    .field("prs", FieldKind::Array)
                    .field("template", FieldKind::String)
                    .optional("style", FieldKind::String),
            );

        let missing = ctx.resolve_inputs(&spec).unwrap_err();
        assert_eq!(missing, vec!["template".to_string()]);
    }

    #[test]
    fn test_resolve_inputs_ok() {
        let mut ctx = SharedContext::new("t");
        ctx.insert("fetch", json!({"prs": []})).unwrap();

        let spec = AgentSpec::new("format", "format notes", ActionRef::command("format"))
            .depends_on(["fetch"])
            .with_inputs(Schema::new().field("prs", FieldKind::Array).field(TASK_KEY, FieldKind::String));

        let inputs = ctx.resolve_inputs(&spec).unwrap();
        assert_eq!(inputs.get("prs"), Some(&json!([])));
        assert_eq!(inputs.get("task"), Some(&json!("t")));
    }
}
