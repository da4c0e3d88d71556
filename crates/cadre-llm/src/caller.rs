use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use cadre_core::config::ModelConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::schema::Schema;
use cadre_core::traits::ModelCaller;
use cadre_core::types::{ModelRequest, ModelRole};

use crate::json::extract_json;
use crate::providers::{client_for, ChatClient, ChatPrompt};

/// Model-call collaborator backed by one configured chat model.
pub struct HttpModelCaller {
    config: ModelConfig,
    client: Box<dyn ChatClient>,
}

impl HttpModelCaller {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = client_for(&config.provider)?;
        Ok(Self { config, client })
    }

    /// Use a specific transport, e.g. a stub in tests.
    pub fn with_client(config: ModelConfig, client: Box<dyn ChatClient>) -> Self {
        Self { config, client }
    }

    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }
}

/// System prompt that pins the persona and the response shape.
fn system_prompt(role: ModelRole, schema: &Schema) -> String {
    let persona = match role {
        ModelRole::Planner => {
            "You are the planner of a multi-agent workflow engine. You design and revise \
             directed acyclic graphs of narrowly scoped agents."
        }
        ModelRole::Coder => {
            "You are an agent inside a simulated workflow. Perform the described action \
             on the given inputs and report the artifact it would produce."
        }
        ModelRole::Evaluator => {
            "You are the evaluator of a multi-agent workflow engine. You judge a completed \
             run against its quality bar and give concrete per-agent feedback."
        }
    };

    let shape = if schema.is_empty() {
        "any JSON object".to_string()
    } else {
        schema.describe().to_string()
    };

    format!(
        "{}\n\nThe user message is a JSON document describing the work. Respond with ONLY \
         one valid JSON object, no prose, with these fields: {}",
        persona, shape
    )
}

impl ModelCaller for HttpModelCaller {
    fn call_model(&self, request: ModelRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let mut config = self.config.clone();
            if let Some(model) = request.model_override {
                config.model_id = model;
            }

            let prompt = ChatPrompt {
                role: request.role,
                system: system_prompt(request.role, &request.schema),
                user: serde_json::to_string_pretty(&request.prompt)?,
            };

            let text = self.client.complete(&config, prompt).await?;
            debug!(
                role = %request.role,
                model = %config.model_id,
                chars = text.len(),
                "Model replied"
            );

            serde_json::from_str(extract_json(&text)).map_err(|e| {
                let preview: String = text.chars().take(200).collect();
                CadreError::InvalidModelResponse(format!("{} (reply began: {})", e, preview))
            })
        })
    }
}

/// Dispatches each request to the caller configured for its role.
pub struct RoleRouter {
    routes: BTreeMap<ModelRole, Arc<dyn ModelCaller>>,
}

impl RoleRouter {
    pub fn new(routes: BTreeMap<ModelRole, Arc<dyn ModelCaller>>) -> Self {
        Self { routes }
    }
}

impl ModelCaller for RoleRouter {
    fn call_model(&self, request: ModelRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            match self.routes.get(&request.role) {
                Some(caller) => caller.call_model(request).await,
                None => Err(CadreError::ModelCall {
                    role: request.role,
                    message: "no model configured for this role".into(),
                }),
            }
        })
    }
}
