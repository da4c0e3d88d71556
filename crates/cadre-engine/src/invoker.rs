use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use cadre_core::error::Result;
use cadre_core::plan::AgentSpec;
use cadre_core::traits::ModelCaller;
use cadre_core::types::{ModelOverrides, ModelRequest, ModelRole};

/// Everything an action needs to run one agent.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// The originating task description.
    pub task: String,
    pub agent: AgentSpec,
    /// Declared inputs resolved from the shared context.
    pub inputs: Map<String, Value>,
    pub workspace: Option<String>,
}

/// Strategy for carrying out an agent's action.
///
/// The simulator only depends on this trait, so swapping simulation for real
/// execution does not touch scheduling or evaluation.
pub trait ActionInvoker: Send + Sync {
    /// Produce the agent's artifact. The caller checks it against the
    /// agent's output schema and enforces the timeout.
    fn invoke<'a>(&'a self, invocation: &'a AgentInvocation) -> BoxFuture<'a, Result<Value>>;
}

/// Asks the model, in the coder role, what artifact the action would produce.
pub struct SimulatedInvoker {
    caller: Arc<dyn ModelCaller>,
    overrides: ModelOverrides,
}

impl SimulatedInvoker {
    pub fn new(caller: Arc<dyn ModelCaller>) -> Self {
        Self {
            caller,
            overrides: ModelOverrides::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: ModelOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

fn simulation_prompt(invocation: &AgentInvocation) -> Value {
    let agent = &invocation.agent;
    json!({
        "task": invocation.task,
        "agent": {
            "id": agent.id,
            "role": agent.role,
            "action": agent.action.to_string(),
            "side_effect_only": agent.side_effect_only,
        },
        "inputs": invocation.inputs,
        "output_fields": agent.output_schema.describe(),
        "workspace": invocation.workspace,
        "instructions": "Simulate this agent's action on its inputs. Return the artifact it \
                         would produce as a JSON object with exactly the output fields listed.",
    })
}

impl ActionInvoker for SimulatedInvoker {
    fn invoke<'a>(&'a self, invocation: &'a AgentInvocation) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let request = ModelRequest::new(
                ModelRole::Coder,
                simulation_prompt(invocation),
                invocation.agent.output_schema.clone(),
            )
            .with_overrides(&self.overrides);
            self.caller.call_model(request).await
        })
    }
}
