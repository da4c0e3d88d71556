//! Test doubles and fixtures shared by the Cadre crates.

pub mod fixtures;
pub mod scripted;

pub use fixtures::{agent, diamond_graph, evaluator_reply, linear_graph, planner_reply};
pub use scripted::{conforming_value, AgentOutcome, ScriptedModelCaller};
