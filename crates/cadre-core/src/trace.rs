use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::SharedContext;

/// Lifecycle status of one agent within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentStatus {
    Pending,
    Completed,
    Failed,
    #[serde(rename = "skipped-due-to-blocked-dependency")]
    SkippedBlocked,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::SkippedBlocked => "skipped-due-to-blocked-dependency",
        }
    }

    /// Failed or skipped: the agent produced nothing its dependents can use.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Failed | Self::SkippedBlocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentErrorKind {
    /// Returned artifact did not match the declared output schema.
    SchemaMismatch,
    /// The action call exceeded its timeout.
    Timeout,
    /// The model-call collaborator failed.
    ModelCall,
    /// A required declared input was not in the shared context.
    MissingInput,
}

impl AgentErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaMismatch => "schema-mismatch",
            Self::Timeout => "timeout",
            Self::ModelCall => "model-call",
            Self::MissingInput => "missing-input",
        }
    }
}

/// Why an agent failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub detail: String,
}

impl AgentError {
    pub fn new(kind: AgentErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.detail)
    }
}

/// Per-agent result for one simulated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub agent_id: String,
    /// Index of the tier the agent was scheduled in.
    pub tier: usize,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
    /// Dependencies that kept a skipped agent from running.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ExecutionRecord {
    pub fn pending(agent_id: impl Into<String>, tier: usize) -> Self {
        Self {
            agent_id: agent_id.into(),
            tier,
            status: AgentStatus::Pending,
            artifact: None,
            error: None,
            blocked_by: vec![],
            started_at: None,
            finished_at: None,
            elapsed_ms: 0,
        }
    }

    pub fn skipped(agent_id: impl Into<String>, tier: usize, blocked_by: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            status: AgentStatus::SkippedBlocked,
            blocked_by,
            started_at: Some(now),
            finished_at: Some(now),
            ..Self::pending(agent_id, tier)
        }
    }

    pub fn completed(
        agent_id: impl Into<String>,
        tier: usize,
        artifact: Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            status: AgentStatus::Completed,
            artifact: Some(artifact),
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            elapsed_ms: elapsed_between(started_at, finished_at),
            ..Self::pending(agent_id, tier)
        }
    }

    pub fn failed(
        agent_id: impl Into<String>,
        tier: usize,
        error: AgentError,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            status: AgentStatus::Failed,
            error: Some(error),
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            elapsed_ms: elapsed_between(started_at, finished_at),
            ..Self::pending(agent_id, tier)
        }
    }
}

fn elapsed_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// One full simulated run of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    pub run_id: String,
    /// Opaque workspace reference supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Records in execution order; every agent of the graph appears once.
    pub records: Vec<ExecutionRecord>,
    /// Shared context as seen after the last tier.
    pub context: SharedContext,
    pub terminal: String,
    /// The terminal agent's artifact, if it completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Set when the run stopped early at a tier boundary.
    #[serde(default)]
    pub cancelled: bool,
    pub total_elapsed_ms: u64,
}

impl RunTrace {
    pub fn record(&self, agent_id: &str) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.agent_id == agent_id)
    }

    pub fn status_of(&self, agent_id: &str) -> Option<AgentStatus> {
        self.record(agent_id).map(|r| r.status)
    }

    pub fn terminal_status(&self) -> Option<AgentStatus> {
        self.status_of(&self.terminal)
    }

    pub fn completed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == AgentStatus::Completed)
            .count()
    }

    /// Agent ids in the order they were recorded.
    pub fn order(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.agent_id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&AgentStatus::SkippedBlocked).unwrap(),
            "\"skipped-due-to-blocked-dependency\""
        );
        assert_eq!(serde_json::to_string(&AgentStatus::Completed).unwrap(), "\"completed\"");
        assert!(AgentStatus::Failed.is_blocking());
        assert!(!AgentStatus::Pending.is_blocking());
    }

    #[test]
    fn test_record_constructors() {
        let start = Utc::now();
        let done = ExecutionRecord::completed("a", 0, json!({"x": 1}), start);
        assert_eq!(done.status, AgentStatus::Completed);
        assert!(done.finished_at.unwrap() >= start);

        let failed = ExecutionRecord::failed(
            "b",
            1,
            AgentError::new(AgentErrorKind::Timeout, "after 50ms"),
            start,
        );
        assert_eq!(failed.error.as_ref().unwrap().to_string(), "timeout: after 50ms");
        assert!(failed.artifact.is_none());

        let skipped = ExecutionRecord::skipped("c", 2, vec!["b".into()]);
        assert_eq!(skipped.status, AgentStatus::SkippedBlocked);
        assert_eq!(skipped.blocked_by, vec!["b"]);
    }

    #[test]
    fn test_trace_lookup() {
        let trace = RunTrace {
            run_id: "r".into(),
            workspace: None,
            records: vec![
                ExecutionRecord::completed("a", 0, json!({}), Utc::now()),
                ExecutionRecord::skipped("b", 1, vec!["x".into()]),
            ],
            context: SharedContext::new("t"),
            terminal: "b".into(),
            output: None,
            cancelled: false,
            total_elapsed_ms: 0,
        };
        assert_eq!(trace.order(), vec!["a", "b"]);
        assert_eq!(trace.terminal_status(), Some(AgentStatus::SkippedBlocked));
        assert_eq!(trace.completed_count(), 1);
        assert!(trace.status_of("zzz").is_none());
    }
}
