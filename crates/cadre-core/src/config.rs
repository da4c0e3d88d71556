use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CadreError, Result};
use crate::types::{ModelRole, ToolDescriptor};

/// Top-level Cadre configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model for every role.
    pub model: ModelConfig,
    /// Per-role model overrides.
    #[serde(default)]
    pub roles: RoleModels,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    /// Tools made available to generated agents.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleModels {
    #[serde(default)]
    pub planner: Option<ModelConfig>,
    #[serde(default)]
    pub coder: Option<ModelConfig>,
    #[serde(default)]
    pub evaluator: Option<ModelConfig>,
}

/// Convergence settings for the plan/simulate/evaluate/revise loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Score at or above which a cycle is done.
    #[serde(default = "default_target_score")]
    pub target_score: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Extra planning attempts after an invalid or failed design.
    #[serde(default = "default_planning_retries")]
    pub planning_retries: u32,
    /// Extra revision attempts after an invalid or failed revision.
    #[serde(default = "default_revision_retries")]
    pub revision_retries: u32,
    /// Timeout for planner and evaluator calls.
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            target_score: default_target_score(),
            max_iterations: default_max_iterations(),
            planning_retries: default_planning_retries(),
            revision_retries: default_revision_retries(),
            model_timeout_secs: default_model_timeout(),
        }
    }
}

fn default_target_score() -> f64 { 0.85 }
fn default_max_iterations() -> usize { 5 }
fn default_planning_retries() -> u32 { 2 }
fn default_revision_retries() -> u32 { 2 }
fn default_model_timeout() -> u64 { 120 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Timeout for a single agent's action call.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    /// Agents of one tier that may be in flight at once (1 = sequential).
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: default_agent_timeout(),
            max_parallel_agents: default_max_parallel_agents(),
        }
    }
}

fn default_agent_timeout() -> u64 { 60 }
fn default_max_parallel_agents() -> usize { 4 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Largest qualitative adjustment, in either direction, applied to the base score.
    #[serde(default = "default_max_adjustment")]
    pub max_adjustment: f64,
    /// Share of the base score carried by the terminal agent alone.
    #[serde(default = "default_terminal_weight")]
    pub terminal_weight: f64,
    /// Default quality bar when the caller supplies none.
    #[serde(default)]
    pub criteria: Option<String>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_adjustment: default_max_adjustment(),
            terminal_weight: default_terminal_weight(),
            criteria: None,
        }
    }
}

fn default_max_adjustment() -> f64 { 0.3 }
fn default_terminal_weight() -> f64 { 0.5 }

/// The slice of configuration the engine needs; no model credentials.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cycle: CycleConfig,
    pub simulation: SimulationConfig,
    pub evaluation: EvaluationConfig,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CadreError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| CadreError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn check(&self) -> Result<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(CadreError::Config(format!("{} must be within 0.0..=1.0, got {}", name, v)))
            }
        };
        unit("cycle.target_score", self.cycle.target_score)?;
        unit("evaluation.max_adjustment", self.evaluation.max_adjustment)?;
        unit("evaluation.terminal_weight", self.evaluation.terminal_weight)?;
        if self.simulation.max_parallel_agents == 0 {
            return Err(CadreError::Config(
                "simulation.max_parallel_agents must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Model configured for a role, falling back to `[model]`.
    pub fn model_for(&self, role: ModelRole) -> &ModelConfig {
        let specific = match role {
            ModelRole::Planner => self.roles.planner.as_ref(),
            ModelRole::Coder => self.roles.coder.as_ref(),
            ModelRole::Evaluator => self.roles.evaluator.as_ref(),
        };
        specific.unwrap_or(&self.model)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cycle: self.cycle.clone(),
            simulation: self.simulation.clone(),
            evaluation: self.evaluation.clone(),
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CADRE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CADRE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CADRE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CADRE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CADRE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert!((config.cycle.target_score - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.cycle.max_iterations, 5);
        assert_eq!(config.cycle.revision_retries, 2);
        assert_eq!(config.simulation.agent_timeout_secs, 60);
        assert_eq!(config.simulation.max_parallel_agents, 4);
        assert!(config.tools.is_empty());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_role_model_fallback() {
        let toml_str = r#"
[model]
model_id = "small"

[roles.planner]
provider = "anthropic"
model_id = "large"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model_for(ModelRole::Planner).model_id, "large");
        assert_eq!(config.model_for(ModelRole::Planner).provider, "anthropic");
        assert_eq!(config.model_for(ModelRole::Coder).model_id, "small");
        assert_eq!(config.model_for(ModelRole::Evaluator).model_id, "small");
    }

    #[test]
    fn test_check_rejects_out_of_range() {
        let toml_str = r#"
[model]
model_id = "m"

[cycle]
target_score = 1.5
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("cycle.target_score"));
    }

    #[test]
    fn test_check_rejects_zero_parallelism() {
        let toml_str = r#"
[model]
model_id = "m"

[simulation]
max_parallel_agents = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.check().is_err());
    }
}
