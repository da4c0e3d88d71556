pub mod anthropic;
pub mod openai;
pub mod presets;

use futures::future::BoxFuture;

use cadre_core::config::ModelConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::types::ModelRole;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

/// A single-turn chat exchange: one system message, one user message.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    /// Role the call is made under; carried into error reports.
    pub role: ModelRole,
    pub system: String,
    pub user: String,
}

/// Provider-specific transport for one non-streaming chat completion.
pub trait ChatClient: Send + Sync {
    /// Send the prompt and return the assistant's reply text.
    fn complete(&self, config: &ModelConfig, prompt: ChatPrompt) -> BoxFuture<'_, Result<String>>;
}

/// Pick the transport for a provider name.
pub fn client_for(provider: &str) -> Result<Box<dyn ChatClient>> {
    match provider {
        "anthropic" | "claude" => Ok(Box::new(AnthropicClient::new())),
        "openai" | "openai-compatible" => Ok(Box::new(OpenAiClient::new())),
        p if presets::get_preset(p).is_some() => Ok(Box::new(OpenAiClient::new())),
        other => Err(CadreError::UnsupportedProvider(other.to_string())),
    }
}
