use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cadre_core::config::EngineConfig;
use cadre_core::cycle::CycleResult;
use cadre_core::error::{CadreError, Result};
use cadre_core::evaluation::EvaluationResult;
use cadre_core::event::EventBus;
use cadre_core::plan::WorkflowGraph;
use cadre_core::trace::RunTrace;
use cadre_core::traits::ModelCaller;
use cadre_core::types::{DelegationAssessment, ModelOverrides, ToolDescriptor};

use crate::cycle::{CycleOrchestrator, CycleRequest};
use crate::evaluator::Evaluator;
use crate::invoker::{ActionInvoker, SimulatedInvoker};
use crate::planner::{Planner, SolutionDesign};
use crate::revision::RevisionController;
use crate::scheduler::schedule;
use crate::simulator::Simulator;
use crate::validator::validate;

/// Entry point for every engine operation.
///
/// Holds the model-call collaborator, the action strategy, and the engine
/// configuration; each operation assembles the components it needs.
pub struct Conductor {
    caller: Arc<dyn ModelCaller>,
    invoker: Option<Arc<dyn ActionInvoker>>,
    config: EngineConfig,
    events: Arc<EventBus>,
    cancel: CancellationToken,
}

impl Conductor {
    pub fn new(caller: Arc<dyn ModelCaller>, config: EngineConfig) -> Self {
        Self {
            caller,
            invoker: None,
            config,
            events: Arc::new(EventBus::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace simulated action invocation with another strategy.
    pub fn with_invoker(mut self, invoker: Arc<dyn ActionInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Stop runs and cycles at the next checkpoint once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.config.cycle.model_timeout_secs)
    }

    fn planner(&self) -> Planner {
        Planner::new(self.caller.clone(), &self.config.cycle)
    }

    fn simulator(&self, overrides: &ModelOverrides) -> Simulator {
        let invoker = self.invoker.clone().unwrap_or_else(|| {
            Arc::new(SimulatedInvoker::new(self.caller.clone()).with_overrides(overrides.clone()))
        });
        Simulator::new(invoker, self.config.simulation.clone())
            .with_events(self.events.clone())
            .with_cancellation(self.cancel.clone())
    }

    fn evaluator(&self, overrides: &ModelOverrides) -> Evaluator {
        Evaluator::new(
            self.caller.clone(),
            self.config.evaluation.clone(),
            self.model_timeout(),
        )
        .with_overrides(overrides.clone())
    }

    /// Decide whether `task` warrants a multi-agent workflow.
    pub async fn assess_delegation_need(
        &self,
        task: &str,
        tools: &[ToolDescriptor],
    ) -> Result<DelegationAssessment> {
        self.planner()
            .assess_delegation_need(task, tools, &ModelOverrides::new())
            .await
    }

    /// Design a validated workflow for `task`.
    pub async fn design_solution(
        &self,
        task: &str,
        tools: &[ToolDescriptor],
        overrides: &ModelOverrides,
    ) -> Result<SolutionDesign> {
        self.planner().design_solution(task, tools, overrides).await
    }

    /// Validate, schedule, and simulate `graph` once.
    ///
    /// `task` is the description agents see under the `task` input key;
    /// `workspace` is recorded on the trace untouched.
    pub async fn execute_workflow(
        &self,
        graph: &WorkflowGraph,
        task: &str,
        workspace: Option<&str>,
    ) -> Result<RunTrace> {
        validate(graph).map_err(CadreError::Validation)?;
        let tiers = schedule(graph)?;
        self.simulator(&ModelOverrides::new())
            .simulate(graph, &tiers, task, workspace)
            .await
    }

    /// Execute a design, first reporting environment variables and secrets
    /// it needs but the process does not have. Missing ones are logged, not
    /// fatal: actions are simulated.
    pub async fn execute_design(
        &self,
        design: &SolutionDesign,
        task: &str,
        workspace: Option<&str>,
    ) -> Result<RunTrace> {
        let missing = design.environment_requirements.missing();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Workflow environment requirements not met");
        }
        self.execute_workflow(&design.graph, task, workspace).await
    }

    /// Score `trace` against `criteria`.
    pub async fn evaluate_outputs(
        &self,
        graph: &WorkflowGraph,
        trace: &RunTrace,
        criteria: &str,
    ) -> EvaluationResult {
        self.evaluator(&ModelOverrides::new())
            .evaluate(graph, trace, criteria)
            .await
    }

    /// Plan, simulate, evaluate, and revise until the target score or a stop
    /// condition is reached.
    pub async fn run_cycle(&self, request: CycleRequest) -> CycleResult {
        info!(task = %request.task, "Running cycle");
        let overrides = request.overrides.clone();
        let orchestrator = CycleOrchestrator::new(
            self.planner(),
            RevisionController::new(self.caller.clone(), &self.config.cycle),
            self.simulator(&overrides),
            self.evaluator(&overrides),
            self.events.clone(),
            self.cancel.clone(),
        );
        orchestrator.run(request).await
    }
}
