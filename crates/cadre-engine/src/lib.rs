//! Cadre engine: turns a task into a validated multi-agent workflow, runs it
//! in simulation, scores the result, and revises the workflow until it is
//! good enough.

pub mod conductor;
pub mod cycle;
pub mod evaluator;
pub mod invoker;
mod model;
pub mod planner;
pub mod revision;
pub mod scheduler;
pub mod simulator;
pub mod validator;

pub use conductor::Conductor;
pub use cycle::{CycleOrchestrator, CycleRequest};
pub use evaluator::{Evaluator, TERMINAL_FAILURE_CEILING};
pub use invoker::{ActionInvoker, AgentInvocation, SimulatedInvoker};
pub use planner::{Planner, SolutionDesign};
pub use revision::RevisionController;
pub use scheduler::{schedule, Schedule};
pub use simulator::Simulator;
pub use validator::{validate, ValidationOutcome, ValidationReport};
