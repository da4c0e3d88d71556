use crate::cycle::{CycleState, TerminationReason};
use crate::trace::AgentStatus;

/// Progress event broadcast while a cycle runs.
#[derive(Debug, Clone)]
pub enum CycleEvent {
    /// An iteration began.
    IterationStarted { iteration: usize },
    /// The orchestrator moved between states.
    StateChanged { from: CycleState, to: CycleState },
    /// A tier of agents is about to run.
    TierStarted { tier: usize, agents: Vec<String> },
    /// An agent reached a final status.
    AgentFinished { agent_id: String, status: AgentStatus },
    /// A run was scored.
    Evaluated { iteration: usize, score: f64, blocking: Vec<String> },
    /// The planner was asked for a revised graph.
    RevisionRequested { iteration: usize },
    /// The cycle stopped.
    CycleFinished { state: CycleState, reason: TerminationReason, iterations: usize },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<CycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: CycleEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
