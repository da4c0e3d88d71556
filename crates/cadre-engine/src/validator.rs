//! Structural validation of workflow graphs.
//!
//! Checks run in a fixed order and stop at the first broken rule, so a
//! graph always fails with the same violation:
//!
//! 1. the graph is not empty, agent ids are unique, and none is reserved
//! 2. every dependency names an agent in the graph
//! 3. the dependency relation is acyclic
//! 4. exactly one terminal agent exists
//! 5. every agent feeds the terminal, unless it is side-effect-only

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use cadre_core::context::TASK_KEY;
use cadre_core::plan::{AgentSpec, GraphViolation, ViolationKind, WorkflowGraph};

/// What a successful validation established about the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// The resolved terminal agent.
    pub terminal: String,
    /// Side-effect-only agents that do not feed the terminal.
    pub side_effect_leaves: Vec<String>,
}

pub type ValidationOutcome = Result<ValidationReport, GraphViolation>;

/// Validate `graph`. Pure: the same graph always yields the same outcome.
pub fn validate(graph: &WorkflowGraph) -> ValidationOutcome {
    check_duplicates(graph)?;
    check_dependencies(graph)?;
    check_acyclic(graph)?;
    let terminal = resolve_terminal(graph)?;
    let side_effect_leaves = check_reachability(graph, &terminal)?;
    Ok(ValidationReport {
        terminal,
        side_effect_leaves,
    })
}

fn check_duplicates(graph: &WorkflowGraph) -> Result<(), GraphViolation> {
    if graph.is_empty() {
        return Err(GraphViolation::new(ViolationKind::NoTerminal, vec![]));
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for agent in &graph.agents {
        *counts.entry(agent.id.as_str()).or_default() += 1;
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id.to_string())
        .collect();

    if !duplicates.is_empty() {
        return Err(GraphViolation::new(ViolationKind::DuplicateAgent, duplicates));
    }
    if graph.contains(TASK_KEY) {
        return Err(GraphViolation::new(
            ViolationKind::ReservedAgentId,
            vec![TASK_KEY.to_string()],
        ));
    }
    Ok(())
}

/// Reports the unknown dependency ids, not the agents that reference them.
fn check_dependencies(graph: &WorkflowGraph) -> Result<(), GraphViolation> {
    let known: HashSet<&str> = graph.agents.iter().map(|a| a.id.as_str()).collect();
    let unknown: BTreeSet<String> = graph
        .agents
        .iter()
        .flat_map(|a| a.depends_on.iter())
        .filter(|d| !known.contains(d.as_str()))
        .cloned()
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(GraphViolation::new(
            ViolationKind::UnknownDependency,
            unknown.into_iter().collect(),
        ))
    }
}

/// Depth-first search over dependency edges with an in-progress path.
/// Reports the agents on the first cycle found, in path order.
fn check_acyclic(graph: &WorkflowGraph) -> Result<(), GraphViolation> {
    let index: HashMap<&str, &AgentSpec> =
        graph.agents.iter().map(|a| (a.id.as_str(), a)).collect();

    let mut starts: Vec<&str> = index.keys().copied().collect();
    starts.sort_unstable();

    let mut visits: HashMap<&str, Visit> = HashMap::new();
    for start in starts {
        if visits.contains_key(start) {
            continue;
        }
        if let Some(cycle) = find_cycle(start, &index, &mut visits) {
            return Err(GraphViolation::new(ViolationKind::CycleDetected, cycle));
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// One agent on the current DFS path and the next dependency to explore.
struct Frame<'a> {
    id: &'a str,
    deps: Vec<&'a str>,
    next: usize,
}

impl<'a> Frame<'a> {
    fn new(id: &'a str, index: &HashMap<&'a str, &'a AgentSpec>) -> Self {
        let mut deps: Vec<&'a str> = index
            .get(id)
            .map(|spec| spec.depends_on.iter().map(String::as_str).collect())
            .unwrap_or_default();
        deps.sort_unstable();
        deps.dedup();
        Self { id, deps, next: 0 }
    }
}

/// Iterative DFS from `start`; the explicit stack is the in-progress path.
fn find_cycle<'a>(
    start: &'a str,
    index: &HashMap<&'a str, &'a AgentSpec>,
    visits: &mut HashMap<&'a str, Visit>,
) -> Option<Vec<String>> {
    visits.insert(start, Visit::InProgress);
    let mut stack = vec![Frame::new(start, index)];

    while let Some(frame) = stack.last_mut() {
        let Some(&dep) = frame.deps.get(frame.next) else {
            visits.insert(frame.id, Visit::Done);
            stack.pop();
            continue;
        };
        frame.next += 1;

        match visits.get(dep) {
            Some(Visit::Done) => {}
            Some(Visit::InProgress) => {
                let pos = stack.iter().position(|f| f.id == dep).unwrap_or(0);
                return Some(stack[pos..].iter().map(|f| f.id.to_string()).collect());
            }
            None => {
                visits.insert(dep, Visit::InProgress);
                stack.push(Frame::new(dep, index));
            }
        }
    }
    None
}

fn resolve_terminal(graph: &WorkflowGraph) -> Result<String, GraphViolation> {
    if let Some(id) = &graph.terminal {
        return match graph.agent(id) {
            Some(spec) if !spec.side_effect_only => Ok(id.clone()),
            _ => Err(GraphViolation::new(ViolationKind::NoTerminal, vec![id.clone()])),
        };
    }

    match graph.sinks().as_slice() {
        [only] => Ok(only.to_string()),
        sinks => Err(GraphViolation::new(
            ViolationKind::NoTerminal,
            sinks.iter().map(|s| s.to_string()).collect(),
        )),
    }
}

fn check_reachability(
    graph: &WorkflowGraph,
    terminal: &str,
) -> Result<Vec<String>, GraphViolation> {
    let upstream = graph.upstream_of(terminal);

    let mut unreachable = Vec::new();
    let mut leaves = Vec::new();
    for agent in &graph.agents {
        if upstream.contains(&agent.id) {
            continue;
        }
        if agent.side_effect_only {
            leaves.push(agent.id.clone());
        } else {
            unreachable.push(agent.id.clone());
        }
    }

    if unreachable.is_empty() {
        leaves.sort();
        Ok(leaves)
    } else {
        unreachable.sort();
        Err(GraphViolation::new(ViolationKind::UnreachableAgent, unreachable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::plan::ActionRef;

    fn agent(id: &str, deps: &[&str]) -> AgentSpec {
        AgentSpec::new(id, id, ActionRef::command(id)).depends_on(deps.iter().copied())
    }

    fn graph(agents: Vec<AgentSpec>) -> WorkflowGraph {
        WorkflowGraph::new("t", agents)
    }

    #[test]
    fn test_valid_linear() {
        let g = graph(vec![agent("a", &[]), agent("b", &["a"]), agent("c", &["b"])]);
        let report = validate(&g).unwrap();
        assert_eq!(report.terminal, "c");
        assert!(report.side_effect_leaves.is_empty());
    }

    #[test]
    fn test_empty_graph() {
        let v = validate(&graph(vec![])).unwrap_err();
        assert_eq!(v.kind, ViolationKind::NoTerminal);
    }

    #[test]
    fn test_duplicate_ids() {
        let g = graph(vec![agent("a", &[]), agent("a", &[]), agent("b", &["a"])]);
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::DuplicateAgent);
        assert_eq!(v.agents, vec!["a"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let g = graph(vec![agent("a", &["ghost"]), agent("b", &["a", "phantom"])]);
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::UnknownDependency);
        assert_eq!(v.agents, vec!["ghost", "phantom"]);
    }

    #[test]
    fn test_unknown_dependency_reported_before_cycle() {
        let g = graph(vec![agent("a", &["b", "ghost"]), agent("b", &["a"])]);
        assert_eq!(validate(&g).unwrap_err().kind, ViolationKind::UnknownDependency);
    }

    #[test]
    fn test_cycle_names_its_members() {
        let g = graph(vec![
            agent("a", &[]),
            agent("b", &["a", "d"]),
            agent("c", &["b"]),
            agent("d", &["c"]),
            agent("e", &["d"]),
        ]);
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::CycleDetected);
        let mut members = v.agents.clone();
        members.sort();
        assert_eq!(members, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_self_loop() {
        let g = graph(vec![agent("a", &["a"])]);
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::CycleDetected);
        assert_eq!(v.agents, vec!["a"]);
    }

    #[test]
    fn test_two_sinks_without_terminal() {
        let g = graph(vec![agent("a", &[]), agent("b", &["a"]), agent("c", &["a"])]);
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::NoTerminal);
        assert_eq!(v.agents, vec!["b", "c"]);
    }

    #[test]
    fn test_designated_terminal_must_exist() {
        let g = graph(vec![agent("a", &[])]).with_terminal("zzz");
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::NoTerminal);
        assert_eq!(v.agents, vec!["zzz"]);
    }

    #[test]
    fn test_unreachable_agent() {
        let g = graph(vec![agent("a", &[]), agent("b", &["a"]), agent("stray", &["a"])])
            .with_terminal("b");
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::UnreachableAgent);
        assert_eq!(v.agents, vec!["stray"]);
    }

    #[test]
    fn test_side_effect_leaf_allowed() {
        let g = graph(vec![
            agent("a", &[]),
            agent("b", &["a"]),
            agent("notify", &["a"]).side_effect_only(),
        ]);
        let report = validate(&g).unwrap();
        assert_eq!(report.terminal, "b");
        assert_eq!(report.side_effect_leaves, vec!["notify"]);
    }

    #[test]
    fn test_reserved_task_id() {
        let g = graph(vec![agent("task", &[]), agent("b", &["task"])]);
        let v = validate(&g).unwrap_err();
        assert_eq!(v.kind, ViolationKind::ReservedAgentId);
        assert_eq!(v.agents, vec!["task"]);
    }

    /// `n00000 -> n00001 -> ...`: the sink sorts first, so the search starts
    /// at the deep end of the chain.
    fn long_chain(len: usize) -> Vec<AgentSpec> {
        (0..len)
            .map(|i| {
                let id = format!("n{:05}", i);
                if i + 1 < len {
                    let next = format!("n{:05}", i + 1);
                    agent(&id, &[next.as_str()])
                } else {
                    agent(&id, &[])
                }
            })
            .collect()
    }

    #[test]
    fn test_long_chain_validates() {
        let report = validate(&graph(long_chain(20_000))).unwrap();
        assert_eq!(report.terminal, "n00000");
    }

    #[test]
    fn test_long_cycle_detected() {
        let mut agents = long_chain(20_000);
        agents[19_999] = agent("n19999", &["n00000"]);
        let v = validate(&graph(agents)).unwrap_err();
        assert_eq!(v.kind, ViolationKind::CycleDetected);
        assert_eq!(v.agents.len(), 20_000);
        assert_eq!(v.agents[0], "n00000");
    }

    #[test]
    fn test_idempotent() {
        let bad = graph(vec![agent("a", &["c"]), agent("b", &["a"]), agent("c", &["b"])]);
        assert_eq!(validate(&bad), validate(&bad));

        let good = graph(vec![agent("a", &[]), agent("b", &["a"])]);
        assert_eq!(validate(&good), validate(&good));
    }
}
