use serde_json::{json, Value};

use cadre_core::plan::{ActionRef, AgentSpec, WorkflowGraph};
use cadre_core::schema::{FieldKind, Schema};

/// An agent with a command action named after it and a single string output
/// field, `<id>_out`.
pub fn agent(id: &str, deps: &[&str]) -> AgentSpec {
    AgentSpec::new(id, format!("{} step", id), ActionRef::command(id))
        .depends_on(deps.iter().copied())
        .with_outputs(Schema::new().field(format!("{}_out", id), FieldKind::String))
}

/// `a -> b -> c`, each agent reading its predecessor's output field.
pub fn linear_graph() -> WorkflowGraph {
    WorkflowGraph::new(
        "linear",
        vec![
            agent("a", &[]).with_inputs(Schema::new().field("task", FieldKind::String)),
            agent("b", &["a"]).with_inputs(Schema::new().field("a_out", FieldKind::String)),
            agent("c", &["b"]).with_inputs(Schema::new().field("b_out", FieldKind::String)),
        ],
    )
    .with_terminal("c")
}

/// `root -> {left, right} -> join`.
pub fn diamond_graph() -> WorkflowGraph {
    WorkflowGraph::new(
        "diamond",
        vec![
            agent("root", &[]),
            agent("left", &["root"]).with_inputs(Schema::new().field("root_out", FieldKind::String)),
            agent("right", &["root"]).with_inputs(Schema::new().field("root_out", FieldKind::String)),
            agent("join", &["left", "right"]).with_inputs(
                Schema::new()
                    .field("left_out", FieldKind::String)
                    .field("right_out", FieldKind::String),
            ),
        ],
    )
    .with_terminal("join")
}

/// A planner response carrying `graph` and nothing else.
pub fn planner_reply(graph: &WorkflowGraph) -> Value {
    json!({ "graph": graph })
}

/// An evaluator response with the given adjustment and no feedback.
pub fn evaluator_reply(adjustment: f64) -> Value {
    json!({
        "adjustment": adjustment,
        "feedback": {},
        "summary": format!("adjusted by {}", adjustment),
    })
}
