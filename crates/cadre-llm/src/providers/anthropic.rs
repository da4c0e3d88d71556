use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cadre_core::config::ModelConfig;
use cadre_core::error::{CadreError, Result};

use super::{ChatClient, ChatPrompt};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

// Anthropic API request types
#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

// Anthropic API response types
#[derive(Deserialize, Debug)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

impl MessageResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

impl ChatClient for AnthropicClient {
    fn complete(&self, config: &ModelConfig, prompt: ChatPrompt) -> BoxFuture<'_, Result<String>> {
        let config = config.clone();

        Box::pin(async move {
            let role = prompt.role;
            let api_key = config.api_key.as_deref().ok_or_else(|| CadreError::ModelCall {
                role,
                message: "Anthropic API key not configured".into(),
            })?;
            let base_url = config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);

            let body = AnthropicRequest {
                model: config.model_id.clone(),
                max_tokens: config.max_tokens,
                temperature: if config.temperature > 0.0 {
                    Some(config.temperature)
                } else {
                    None
                },
                system: prompt.system,
                messages: vec![ApiMessage {
                    role: "user",
                    content: prompt.user,
                }],
            };

            let response = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| CadreError::ModelCall {
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

            let parsed: MessageResponse =
                response.json().await.map_err(|e| CadreError::ModelCall {
                    role,
                    message: format!("unreadable response body: {}", e),
                })?;

            debug!(
                model = %config.model_id,
                stop_reason = parsed.stop_reason.as_deref().unwrap_or("none"),
                "Anthropic response received"
            );
            Ok(parsed.text())
        })
    }
}
