use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::Schema;

/// Which persona a model call is made under.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    /// Designs and revises workflow graphs.
    Planner,
    /// Produces agent artifacts during simulation.
    Coder,
    /// Judges a completed run against the quality bar.
    Evaluator,
}

impl ModelRole {
    pub const ALL: [ModelRole; 3] = [ModelRole::Planner, ModelRole::Coder, ModelRole::Evaluator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Evaluator => "evaluator",
        }
    }
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured request to the model-call collaborator.
///
/// `prompt` is an arbitrary JSON document describing the work; `schema`
/// names the fields the response object must carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub role: ModelRole,
    pub prompt: serde_json::Value,
    pub schema: Schema,
    /// Model id to use instead of the role's configured model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_override: Option<String>,
}

impl ModelRequest {
    pub fn new(role: ModelRole, prompt: serde_json::Value, schema: Schema) -> Self {
        Self {
            role,
            prompt,
            schema,
            model_override: None,
        }
    }

    /// Apply an override from a per-role override map, if one exists.
    pub fn with_overrides(mut self, overrides: &ModelOverrides) -> Self {
        if let Some(model) = overrides.get(&self.role) {
            self.model_override = Some(model.clone());
        }
        self
    }
}

/// Per-role model id overrides supplied by the caller.
pub type ModelOverrides = BTreeMap<ModelRole, String>;

/// A tool the caller makes available to generated agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Result of `assess_delegation_need`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationAssessment {
    pub should_delegate: bool,
    /// Confidence in the decision (0.0 to 1.0).
    pub confidence: f64,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

/// What an agent's action needs from the surrounding system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionManifest {
    pub agent_id: String,
    #[serde(default)]
    pub summary: String,
    /// Names of available tools this agent's action relies on.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Environment variables and secrets a generated workflow expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRequirements {
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl EnvironmentRequirements {
    /// Names (variables first, then secrets) unset or empty in the current process.
    pub fn missing(&self) -> Vec<String> {
        self.env_vars
            .iter()
            .chain(self.secrets.iter())
            .filter(|name| std::env::var(name.as_str()).map_or(true, |v| v.is_empty()))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.env_vars.is_empty() && self.secrets.is_empty()
    }
}
