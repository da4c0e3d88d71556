use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cadre_core::config::SimulationConfig;
use cadre_core::context::SharedContext;
use cadre_core::error::{CadreError, Result};
use cadre_core::event::{CycleEvent, EventBus};
use cadre_core::plan::WorkflowGraph;
use cadre_core::trace::{AgentError, AgentErrorKind, AgentStatus, ExecutionRecord, RunTrace};

use crate::invoker::{ActionInvoker, AgentInvocation};
use crate::scheduler::Schedule;

/// Walks a schedule tier by tier, running each agent's action against a
/// write-once shared context.
///
/// Agents of one tier run concurrently (up to `max_parallel_agents`) and the
/// tier is a barrier: their artifacts become visible to later tiers only once
/// the whole tier has finished. Agent failures never abort the run; they are
/// recorded and block the agent's dependents.
pub struct Simulator {
    invoker: Arc<dyn ActionInvoker>,
    config: SimulationConfig,
    events: Option<Arc<EventBus>>,
    cancel: CancellationToken,
}

/// Outcome of preparing one agent before its tier runs.
enum Prepared {
    Finished(ExecutionRecord),
    Invoke(AgentInvocation),
}

impl Simulator {
    pub fn new(invoker: Arc<dyn ActionInvoker>, config: SimulationConfig) -> Self {
        Self {
            invoker,
            config,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Stop at the next tier boundary once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn publish(&self, event: CycleEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Simulate `graph` following `schedule`.
    ///
    /// `graph` must already be validated and `schedule` derived from it.
    pub async fn simulate(
        &self,
        graph: &WorkflowGraph,
        schedule: &Schedule,
        task: &str,
        workspace: Option<&str>,
    ) -> Result<RunTrace> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let terminal = graph.terminal_id().unwrap_or_default().to_string();
        let mut context = SharedContext::new(task);
        let mut statuses: HashMap<String, AgentStatus> = HashMap::new();
        let mut records: Vec<ExecutionRecord> = Vec::new();
        let mut cancelled = false;

        info!(%run_id, graph = %graph.name, agents = graph.len(), tiers = schedule.len(), "Simulating workflow");

        for (tier_idx, tier) in schedule.tiers.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(%run_id, tier = tier_idx, "Run cancelled at tier boundary");
                cancelled = true;
                for (idx, rest) in schedule.tiers.iter().enumerate().skip(tier_idx) {
                    records.extend(rest.iter().map(|id| ExecutionRecord::pending(id.clone(), idx)));
                }
                break;
            }

            self.publish(CycleEvent::TierStarted {
                tier: tier_idx,
                agents: tier.clone(),
            });
            debug!(tier = tier_idx, agents = ?tier, "Starting tier");

            let mut finished: Vec<Option<ExecutionRecord>> = vec![None; tier.len()];
            let mut jobs = Vec::new();
            for (slot, agent_id) in tier.iter().enumerate() {
                match self.prepare(graph, &context, &statuses, tier_idx, agent_id, workspace)? {
                    Prepared::Finished(record) => finished[slot] = Some(record),
                    Prepared::Invoke(invocation) => jobs.push((slot, invocation)),
                }
            }

            let parallelism = self.config.max_parallel_agents.max(1);
            let results: Vec<(usize, ExecutionRecord)> = stream::iter(jobs)
                .map(|(slot, invocation)| async move {
                    (slot, self.run_agent(tier_idx, invocation).await)
                })
                .buffered(parallelism)
                .collect()
                .await;
            for (slot, record) in results {
                finished[slot] = Some(record);
            }

            // Tier barrier: publish artifacts only after every agent in the tier is done.
            for record in finished.into_iter().flatten() {
                if let Some(artifact) = &record.artifact {
                    context.insert(record.agent_id.clone(), artifact.clone())?;
                }
                statuses.insert(record.agent_id.clone(), record.status);
                self.publish(CycleEvent::AgentFinished {
                    agent_id: record.agent_id.clone(),
                    status: record.status,
                });
                records.push(record);
            }
        }

        let output = context.get(&terminal).cloned();
        let trace = RunTrace {
            run_id,
            workspace: workspace.map(String::from),
            records,
            context,
            terminal,
            output,
            cancelled,
            total_elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            run_id = %trace.run_id,
            completed = trace.completed_count(),
            total = trace.records.len(),
            terminal_status = trace.terminal_status().map_or("missing", |s| s.as_str()),
            elapsed_ms = trace.total_elapsed_ms,
            "Simulation finished"
        );
        Ok(trace)
    }

    fn prepare(
        &self,
        graph: &WorkflowGraph,
        context: &SharedContext,
        statuses: &HashMap<String, AgentStatus>,
        tier: usize,
        agent_id: &str,
        workspace: Option<&str>,
    ) -> Result<Prepared> {
        let spec = graph.agent(agent_id).ok_or_else(|| CadreError::SchedulingImpossible {
            agents: vec![agent_id.to_string()],
        })?;

        let blocked_by: Vec<String> = spec
            .depends_on
            .iter()
            .filter(|dep| statuses.get(dep.as_str()) != Some(&AgentStatus::Completed))
            .cloned()
            .collect();
        if !blocked_by.is_empty() {
            debug!(agent_id, ?blocked_by, "Skipping agent with blocked dependencies");
            return Ok(Prepared::Finished(ExecutionRecord::skipped(agent_id, tier, blocked_by)));
        }

        match context.resolve_inputs(spec) {
            Ok(inputs) => Ok(Prepared::Invoke(AgentInvocation {
                task: context.task().to_string(),
                agent: spec.clone(),
                inputs,
                workspace: workspace.map(String::from),
            })),
            Err(missing) => {
                warn!(agent_id, ?missing, "Agent inputs missing from shared context");
                Ok(Prepared::Finished(ExecutionRecord::failed(
                    agent_id,
                    tier,
                    AgentError::new(
                        AgentErrorKind::MissingInput,
                        format!("not in shared context: {}", missing.join(", ")),
                    ),
                    Utc::now(),
                )))
            }
        }
    }

    async fn run_agent(&self, tier: usize, invocation: AgentInvocation) -> ExecutionRecord {
        let agent_id = invocation.agent.id.clone();
        let timeout = Duration::from_secs(self.config.agent_timeout_secs);
        let started_at = Utc::now();

        let outcome = tokio::time::timeout(timeout, self.invoker.invoke(&invocation)).await;
        let error = match outcome {
            Err(_) => AgentError::new(
                AgentErrorKind::Timeout,
                format!("no artifact after {}ms", timeout.as_millis()),
            ),
            Ok(Err(CadreError::ModelTimeout { timeout_ms, .. })) => AgentError::new(
                AgentErrorKind::Timeout,
                format!("model call timed out after {}ms", timeout_ms),
            ),
            Ok(Err(e)) => AgentError::new(AgentErrorKind::ModelCall, e.to_string()),
            Ok(Ok(artifact)) => match invocation.agent.output_schema.check(&artifact) {
                Ok(()) => {
                    debug!(%agent_id, tier, "Agent completed");
                    return ExecutionRecord::completed(agent_id, tier, artifact, started_at);
                }
                Err(problems) => AgentError::new(AgentErrorKind::SchemaMismatch, problems.join("; ")),
            },
        };

        warn!(%agent_id, tier, error = %error, "Agent failed");
        ExecutionRecord::failed(agent_id, tier, error, started_at)
    }
}
