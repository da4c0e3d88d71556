pub mod config;
pub mod context;
pub mod cycle;
pub mod error;
pub mod evaluation;
pub mod event;
pub mod plan;
pub mod schema;
pub mod trace;
pub mod traits;
pub mod types;

pub use config::{AppConfig, EngineConfig};
pub use context::SharedContext;
pub use cycle::{CycleIteration, CycleResult, CycleState, TerminationReason};
pub use error::{CadreError, Result};
pub use evaluation::EvaluationResult;
pub use event::{CycleEvent, EventBus};
pub use plan::{ActionRef, AgentSpec, GraphViolation, ViolationKind, WorkflowGraph};
pub use schema::{FieldKind, FieldSpec, Schema};
pub use trace::{AgentError, AgentErrorKind, AgentStatus, ExecutionRecord, RunTrace};
pub use traits::ModelCaller;
pub use types::*;
