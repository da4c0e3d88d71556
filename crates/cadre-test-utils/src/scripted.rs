use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use cadre_core::error::{CadreError, Result};
use cadre_core::schema::{FieldKind, Schema};
use cadre_core::traits::ModelCaller;
use cadre_core::types::{ModelRequest, ModelRole};

/// How a coder-role call for one agent should behave.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// Return this artifact verbatim.
    Artifact(Value),
    /// Fail the call with a model-call error carrying this message.
    Fail(String),
    /// Sleep before returning a schema-conforming artifact.
    Delay(Duration),
}

#[derive(Debug, Clone)]
enum Reply {
    Value(Value),
    Error(String),
}

/// A `ModelCaller` driven entirely by a script.
///
/// Planner and evaluator calls pop per-role queues. Coder calls are answered
/// per agent id (read from the prompt's `agent.id`); agents without a scripted
/// outcome get an artifact that conforms to the requested schema. An empty
/// evaluator queue answers with a zero adjustment; an empty planner queue is
/// an error. Every request is logged.
#[derive(Default)]
pub struct ScriptedModelCaller {
    queues: Mutex<HashMap<ModelRole, VecDeque<Reply>>>,
    outcomes: Mutex<HashMap<String, AgentOutcome>>,
    log: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for `role`.
    pub fn push(self, role: ModelRole, value: Value) -> Self {
        self.queue(role, Reply::Value(value));
        self
    }

    /// Queue a model-call failure for `role`.
    pub fn push_error(self, role: ModelRole, message: impl Into<String>) -> Self {
        self.queue(role, Reply::Error(message.into()));
        self
    }

    /// Script how the coder call for `agent_id` behaves.
    pub fn with_outcome(self, agent_id: impl Into<String>, outcome: AgentOutcome) -> Self {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.insert(agent_id.into(), outcome);
        }
        self
    }

    fn queue(&self, role: ModelRole, reply: Reply) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(role).or_default().push_back(reply);
        }
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn requests_for(&self, role: ModelRole) -> Vec<ModelRequest> {
        self.requests().into_iter().filter(|r| r.role == role).collect()
    }

    /// Agent ids of coder calls, in arrival order.
    pub fn invoked_agents(&self) -> Vec<String> {
        self.requests_for(ModelRole::Coder)
            .iter()
            .filter_map(|r| r.prompt["agent"]["id"].as_str().map(String::from))
            .collect()
    }

    /// Responses still queued for `role`.
    pub fn remaining(&self, role: ModelRole) -> usize {
        self.queues
            .lock()
            .map(|q| q.get(&role).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    fn next_reply(&self, role: ModelRole) -> Option<Reply> {
        self.queues
            .lock()
            .ok()
            .and_then(|mut q| q.get_mut(&role).and_then(VecDeque::pop_front))
    }
}

/// Build a value that satisfies `schema`, labelled with `agent_id`.
pub fn conforming_value(schema: &Schema, agent_id: &str) -> Value {
    if schema.is_empty() {
        return json!({ "result": format!("{} done", agent_id) });
    }
    let mut obj = Map::new();
    for field in &schema.fields {
        let v = match field.kind {
            FieldKind::String | FieldKind::Any => json!(format!("{} from {}", field.name, agent_id)),
            FieldKind::Number => json!(1.0),
            FieldKind::Integer => json!(1),
            FieldKind::Boolean => json!(true),
            FieldKind::Object => json!({}),
            FieldKind::Array => json!([]),
        };
        obj.insert(field.name.clone(), v);
    }
    Value::Object(obj)
}

impl ModelCaller for ScriptedModelCaller {
    fn call_model(&self, request: ModelRequest) -> BoxFuture<'_, Result<Value>> {
        if let Ok(mut log) = self.log.lock() {
            log.push(request.clone());
        }

        Box::pin(async move {
            let role = request.role;

            if role == ModelRole::Coder {
                let agent_id = request.prompt["agent"]["id"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let outcome = self
                    .outcomes
                    .lock()
                    .ok()
                    .and_then(|o| o.get(&agent_id).cloned());
                return match outcome {
                    Some(AgentOutcome::Artifact(v)) => Ok(v),
                    Some(AgentOutcome::Fail(message)) => Err(CadreError::ModelCall { role, message }),
                    Some(AgentOutcome::Delay(d)) => {
                        tokio::time::sleep(d).await;
                        Ok(conforming_value(&request.schema, &agent_id))
                    }
                    None => Ok(conforming_value(&request.schema, &agent_id)),
                };
            }

            match self.next_reply(role) {
                Some(Reply::Value(v)) => Ok(v),
                Some(Reply::Error(message)) => Err(CadreError::ModelCall { role, message }),
                None if role == ModelRole::Evaluator => Ok(json!({
                    "adjustment": 0.0,
                    "feedback": BTreeMap::<String, String>::new(),
                })),
                None => Err(CadreError::ModelCall {
                    role,
                    message: "script exhausted".into(),
                }),
            }
        })
    }
}
