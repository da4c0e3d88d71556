pub mod caller;
pub mod json;
pub mod providers;
pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;

use cadre_core::config::AppConfig;
use cadre_core::error::Result;
use cadre_core::traits::ModelCaller;
use cadre_core::types::ModelRole;

pub use caller::{HttpModelCaller, RoleRouter};
pub use json::extract_json;
pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingCaller;

/// Build the model-call collaborator described by `config`.
///
/// Each role gets its configured model wrapped in retry and fallback
/// handling; roles without an override share the `[model]` settings.
pub fn create_caller(config: &AppConfig) -> Result<Arc<dyn ModelCaller>> {
    let mut routes: BTreeMap<ModelRole, Arc<dyn ModelCaller>> = BTreeMap::new();

    for role in ModelRole::ALL {
        let model = config.model_for(role);
        let primary = HttpModelCaller::new(model.clone())?;

        let mut fallbacks: Vec<(String, Box<dyn ModelCaller>)> = Vec::new();
        for fb in &config.fallback_models {
            fallbacks.push((fb.model_id.clone(), Box::new(HttpModelCaller::new(fb.clone())?)));
        }

        let retry = model.retry.clone().unwrap_or_default();
        routes.insert(
            role,
            Arc::new(RetryingCaller::new(Box::new(primary), fallbacks, retry)),
        );
    }

    Ok(Arc::new(RoleRouter::new(routes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_caller_rejects_unknown_provider() {
        let config: AppConfig = toml::from_str(
            r#"
[model]
provider = "carrier-pigeon"
model_id = "x"
"#,
        )
        .unwrap();
        let err = create_caller(&config).err().unwrap();
        assert_eq!(err.kind(), "model-call-error");
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn test_create_caller_with_role_override() {
        let config: AppConfig = toml::from_str(
            r#"
[model]
model_id = "gpt-4o-mini"

[roles.planner]
provider = "anthropic"
model_id = "claude-sonnet"

[[fallback_models]]
provider = "ollama"
model_id = "llama3"
"#,
        )
        .unwrap();
        assert!(create_caller(&config).is_ok());
    }
}
