//! Agents, their input and output contracts, and the graph connecting them.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::schema::{FieldKind, Schema};

/// Identifier used for a synthesized aggregator terminal.
pub const AGGREGATOR_ID: &str = "aggregate_outputs";

/// What an agent does, as a symbolic reference. Never executable code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionRef {
    /// A named command with arguments, e.g. `fetch_prs --state closed`.
    Command {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A capability provided by one of the available tools.
    Capability { name: String },
    /// Hand a sub-task back to an orchestrator. Recorded, not recursed into.
    Delegate { task: String },
}

impl ActionRef {
    pub fn command(name: impl Into<String>) -> Self {
        Self::Command {
            name: name.into(),
            args: vec![],
        }
    }

    pub fn capability(name: impl Into<String>) -> Self {
        Self::Capability { name: name.into() }
    }
}

impl std::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command { name, args } if args.is_empty() => write!(f, "command:{}", name),
            Self::Command { name, args } => write!(f, "command:{} {}", name, args.join(" ")),
            Self::Capability { name } => write!(f, "capability:{}", name),
            Self::Delegate { task } => write!(f, "delegate:{}", task),
        }
    }
}

/// A declared unit of work in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique identifier within the graph.
    pub id: String,
    /// What this agent is responsible for.
    #[serde(default)]
    pub role: String,
    pub action: ActionRef,
    /// Agents whose artifacts must exist before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Context keys this agent reads.
    #[serde(default)]
    pub input_schema: Schema,
    /// Shape of the artifact this agent produces.
    #[serde(default)]
    pub output_schema: Schema,
    /// Leaf whose effect matters but whose output feeds nothing.
    #[serde(default)]
    pub side_effect_only: bool,
}

impl AgentSpec {
    pub fn new(id: impl Into<String>, role: impl Into<String>, action: ActionRef) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            action,
            depends_on: vec![],
            input_schema: Schema::new(),
            output_schema: Schema::new(),
            side_effect_only: false,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inputs(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_outputs(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn side_effect_only(mut self) -> Self {
        self.side_effect_only = true;
        self
    }
}

/// A set of agents plus the terminal whose artifact is the deliverable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub name: String,
    pub agents: Vec<AgentSpec>,
    /// Designated terminal. When absent, the single non-side-effect sink is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>, agents: Vec<AgentSpec>) -> Self {
        Self {
            name: name.into(),
            agents,
            terminal: None,
        }
    }

    pub fn with_terminal(mut self, id: impl Into<String>) -> Self {
        self.terminal = Some(id.into());
        self
    }

    pub fn agent(&self, id: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agent(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents that list `id` among their dependencies.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.agents
            .iter()
            .filter(|a| a.depends_on.iter().any(|d| d == id))
            .map(|a| a.id.as_str())
            .collect()
    }

    /// Non-side-effect agents nothing depends on, in lexicographic order.
    pub fn sinks(&self) -> Vec<&str> {
        let consumed: BTreeSet<&str> = self
            .agents
            .iter()
            .flat_map(|a| a.depends_on.iter().map(String::as_str))
            .collect();
        let mut sinks: Vec<&str> = self
            .agents
            .iter()
            .filter(|a| !a.side_effect_only && !consumed.contains(a.id.as_str()))
            .map(|a| a.id.as_str())
            .collect();
        sinks.sort_unstable();
        sinks
    }

    /// The terminal agent: the designated one if set, else the sole sink.
    pub fn terminal_id(&self) -> Option<&str> {
        match &self.terminal {
            Some(id) => Some(id.as_str()),
            None => match self.sinks().as_slice() {
                [only] => Some(*only),
                _ => None,
            },
        }
    }

    /// `id` plus every agent it transitively depends on.
    ///
    /// Unknown dependency ids are ignored and cycles terminate, so this is
    /// safe to call on unvalidated graphs.
    pub fn upstream_of(&self, id: &str) -> BTreeSet<String> {
        let index: HashMap<&str, &AgentSpec> =
            self.agents.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut seen = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(spec) = index.get(current.as_str()) {
                for dep in &spec.depends_on {
                    if index.contains_key(dep.as_str()) && !seen.contains(dep) {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        seen
    }

    /// Give a terminal-less graph with several sinks a synthesized aggregator
    /// that depends on every sink. A single sink is designated directly.
    pub fn with_synthesized_terminal(mut self) -> Self {
        if self.terminal.is_some() {
            return self;
        }

        let sinks: Vec<String> = self.sinks().into_iter().map(String::from).collect();
        match sinks.len() {
            0 => self,
            1 => {
                self.terminal = sinks.into_iter().next();
                self
            }
            _ => {
                let mut id = AGGREGATOR_ID.to_string();
                let mut n = 2;
                while self.contains(&id) {
                    id = format!("{}_{}", AGGREGATOR_ID, n);
                    n += 1;
                }

                let inputs = sinks
                    .iter()
                    .fold(Schema::new(), |s, sink| s.field(sink.clone(), FieldKind::Any));
                let aggregator = AgentSpec::new(
                    id.clone(),
                    format!("Combine the outputs of {} into one deliverable", sinks.join(", ")),
                    ActionRef::capability("aggregate"),
                )
                .depends_on(sinks)
                .with_inputs(inputs)
                .with_outputs(Schema::new().field("summary", FieldKind::String));

                self.agents.push(aggregator);
                self.terminal = Some(id);
                self
            }
        }
    }
}

/// The structural rule a graph broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    DuplicateAgent,
    /// An agent uses an id reserved for input resolution.
    ReservedAgentId,
    UnknownDependency,
    CycleDetected,
    NoTerminal,
    UnreachableAgent,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateAgent => "duplicate-agent",
            Self::ReservedAgentId => "reserved-agent-id",
            Self::UnknownDependency => "unknown-dependency",
            Self::CycleDetected => "cycle-detected",
            Self::NoTerminal => "no-terminal",
            Self::UnreachableAgent => "unreachable-agent",
        }
    }
}

/// A failed validation: which rule, and which agents broke it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphViolation {
    pub kind: ViolationKind,
    pub agents: Vec<String>,
}

impl GraphViolation {
    pub fn new(kind: ViolationKind, agents: Vec<String>) -> Self {
        Self { kind, agents }
    }
}

impl std::fmt::Display for GraphViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.agents.is_empty() {
            write!(f, "{}", self.kind.as_str())
        } else {
            write!(f, "{}: {}", self.kind.as_str(), self.agents.join(", "))
        }
    }
}

impl std::error::Error for GraphViolation {}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str, deps: &[&str]) -> AgentSpec {
        AgentSpec::new(id, format!("{} role", id), ActionRef::command(id))
            .depends_on(deps.iter().copied())
    }

    #[test]
    fn test_sinks_and_terminal() {
        let graph = WorkflowGraph::new(
            "g",
            vec![agent("a", &[]), agent("b", &["a"]), agent("c", &["a"])],
        );
        assert_eq!(graph.sinks(), vec!["b", "c"]);
        assert_eq!(graph.terminal_id(), None);

        let graph = graph.with_terminal("c");
        assert_eq!(graph.terminal_id(), Some("c"));
    }

    #[test]
    fn test_side_effect_leaf_is_not_a_sink() {
        let graph = WorkflowGraph::new(
            "g",
            vec![
                agent("a", &[]),
                agent("b", &["a"]),
                agent("log", &["a"]).side_effect_only(),
            ],
        );
        assert_eq!(graph.sinks(), vec!["b"]);
        assert_eq!(graph.terminal_id(), Some("b"));
    }

    #[test]
    fn test_upstream_tolerates_cycles_and_unknowns() {
        let graph = WorkflowGraph::new(
            "g",
            vec![agent("a", &["c", "ghost"]), agent("b", &["a"]), agent("c", &["b"])],
        );
        let up = graph.upstream_of("c");
        assert_eq!(up.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_synthesized_aggregator() {
        let graph = WorkflowGraph::new(
            "g",
            vec![agent("a", &[]), agent("b", &["a"]), agent("c", &["a"])],
        )
        .with_synthesized_terminal();

        assert_eq!(graph.terminal.as_deref(), Some(AGGREGATOR_ID));
        let agg = graph.agent(AGGREGATOR_ID).unwrap();
        assert_eq!(agg.depends_on, vec!["b", "c"]);
        assert!(agg.input_schema.get("b").is_some());
        assert_eq!(graph.sinks(), vec![AGGREGATOR_ID]);
    }

    #[test]
    fn test_synthesized_aggregator_avoids_id_clash() {
        let graph = WorkflowGraph::new(
            "g",
            vec![agent(AGGREGATOR_ID, &[]), agent("b", &[])],
        )
        .with_synthesized_terminal();
        assert_eq!(graph.terminal.as_deref(), Some("aggregate_outputs_2"));
    }

    #[test]
    fn test_graph_wire_format() {
        let json = r#"{
            "name": "release-notes",
            "agents": [
                {"id": "fetch", "role": "Fetch PRs", "action": {"kind": "capability", "name": "github"},
                 "output_schema": [{"name": "prs", "type": "array"}]},
                {"id": "notify", "role": "Post to Slack", "action": {"kind": "command", "name": "post"},
                 "depends_on": ["fetch"], "input_schema": [{"name": "prs", "type": "array"}]}
            ],
            "terminal": "notify"
        }"#;
        let graph: WorkflowGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.agent("notify").unwrap().depends_on, vec!["fetch"]);
        assert_eq!(graph.agent("fetch").unwrap().action.to_string(), "capability:github");
        assert_eq!(graph.dependents("fetch"), vec!["notify"]);
    }

    #[test]
    fn test_violation_display() {
        let v = GraphViolation::new(ViolationKind::UnknownDependency, vec!["x".into(), "y".into()]);
        assert_eq!(v.to_string(), "unknown-dependency: x, y");
    }
}
