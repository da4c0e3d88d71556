use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use cadre_core::config::ModelConfig;
use cadre_core::error::{CadreError, Result};

use super::presets::get_preset;
use super::{ChatClient, ChatPrompt};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request(config: &ModelConfig, prompt: &ChatPrompt) -> ChatRequest {
    // o-series models reject temperature
    let is_o_series = config.model_id.starts_with("o1")
        || config.model_id.starts_with("o3")
        || config.model_id.starts_with("o4");

    ChatRequest {
        model: config.model_id.clone(),
        messages: vec![
            OaiMessage {
                role: "system",
                content: prompt.system.clone(),
            },
            OaiMessage {
                role: "user",
                content: prompt.user.clone(),
            },
        ],
        max_tokens: config.max_tokens,
        temperature: if is_o_series || config.temperature <= 0.0 {
            None
        } else {
            Some(config.temperature)
        },
        stream: false,
    }
}

impl ChatClient for OpenAiClient {
    fn complete(&self, config: &ModelConfig, prompt: ChatPrompt) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let role = prompt.role;
            let preset = get_preset(&config.provider);
            let base_url = config
                .base_url
                .as_deref()
                .or(preset.as_ref().map(|p| p.default_base_url))
                .unwrap_or(OPENAI_API_URL);

            let body = build_request(&config, &prompt);
            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            if let Some(preset) = &preset {
                for (k, v) in preset.extra_headers {
                    req = req.header(*k, *v);
                }
            }

            let response = req.send().await.map_err(|e| CadreError::ModelCall {
                role,
                message: e.to_string(),
            })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(CadreError::ModelCall {
                    role,
                    message: format!("HTTP {}: {}", status, body),
                });
            }

            let parsed: ChatResponse = response.json().await.map_err(|e| CadreError::ModelCall {
                role,
                message: format!("unreadable response body: {}", e),
            })?;

            let choice = parsed.choices.into_iter().next().ok_or_else(|| {
                CadreError::InvalidModelResponse("response carried no choices".into())
            })?;

            if choice.finish_reason.as_deref() == Some("length") {
                warn!(model = %config.model_id, %role, "Response truncated at max_tokens");
            }

            Ok(choice.message.content.unwrap_or_default())
        })
    }
}
