use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use cadre_core::error::{CadreError, Result};
use cadre_core::plan::WorkflowGraph;

/// Execution tiers: every agent's dependencies sit in strictly earlier tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Agent ids per tier, each tier sorted lexicographically.
    pub tiers: Vec<Vec<String>>,
}

impl Schedule {
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn tier_of(&self, agent_id: &str) -> Option<usize> {
        self.tiers
            .iter()
            .position(|tier| tier.iter().any(|id| id == agent_id))
    }

    /// All agent ids, tier by tier.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.tiers.iter().flatten().map(String::as_str)
    }
}

/// Layer `graph` into tiers with Kahn's algorithm.
///
/// Agents whose dependencies can never all be satisfied (a cycle, or a
/// dependency outside the graph) are reported as `SchedulingImpossible`.
pub fn schedule(graph: &WorkflowGraph) -> Result<Schedule> {
    let mut remaining: HashMap<&str, BTreeSet<&str>> = graph
        .agents
        .iter()
        .map(|a| (a.id.as_str(), a.depends_on.iter().map(String::as_str).collect()))
        .collect();

    let mut tiers = Vec::new();
    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| *id)
            .collect();

        if ready.is_empty() {
            let mut stuck: Vec<String> = remaining.keys().map(|id| id.to_string()).collect();
            stuck.sort();
            return Err(CadreError::SchedulingImpossible { agents: stuck });
        }

        ready.sort_unstable();
        for id in &ready {
            remaining.remove(id);
        }
        for deps in remaining.values_mut() {
            for id in &ready {
                deps.remove(id);
            }
        }
        tiers.push(ready.into_iter().map(String::from).collect());
    }

    Ok(Schedule { tiers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::plan::{ActionRef, AgentSpec};

    fn agent(id: &str, deps: &[&str]) -> AgentSpec {
        AgentSpec::new(id, id, ActionRef::command(id)).depends_on(deps.iter().copied())
    }

    #[test]
    fn test_diamond_tiers() {
        let g = WorkflowGraph::new(
            "d",
            vec![
                agent("join", &["right", "left"]),
                agent("right", &["root"]),
                agent("left", &["root"]),
                agent("root", &[]),
            ],
        );
        let s = schedule(&g).unwrap();
        assert_eq!(
            s.tiers,
            vec![vec!["root"], vec!["left", "right"], vec!["join"]]
        );
        assert_eq!(s.tier_of("right"), Some(1));
        assert_eq!(s.order().collect::<Vec<_>>(), vec!["root", "left", "right", "join"]);
    }

    #[test]
    fn test_independent_agents_share_tier() {
        let g = WorkflowGraph::new("w", vec![agent("z", &[]), agent("m", &[]), agent("a", &[])]);
        assert_eq!(schedule(&g).unwrap().tiers, vec![vec!["a", "m", "z"]]);
    }

    #[test]
    fn test_agent_waits_for_deepest_dependency() {
        let g = WorkflowGraph::new(
            "w",
            vec![agent("a", &[]), agent("b", &["a"]), agent("c", &["a", "b"])],
        );
        assert_eq!(schedule(&g).unwrap().tiers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_residual_cycle() {
        let g = WorkflowGraph::new(
            "w",
            vec![agent("a", &[]), agent("b", &["a", "c"]), agent("c", &["b"]), agent("d", &["c"])],
        );
        let err = schedule(&g).unwrap_err();
        match err {
            CadreError::SchedulingImpossible { agents } => assert_eq!(agents, vec!["b", "c", "d"]),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
