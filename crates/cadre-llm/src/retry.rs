use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{info, warn};

use cadre_core::config::RetryConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::traits::ModelCaller;
use cadre_core::types::ModelRequest;

/// A model caller that retries failed requests and falls back to alternative models.
pub struct RetryingCaller {
    primary: Box<dyn ModelCaller>,
    fallbacks: Vec<(String, Box<dyn ModelCaller>)>,
    retry_config: RetryConfig,
}

impl RetryingCaller {
    /// `fallbacks` pairs a label for logging with the caller to try.
    pub fn new(
        primary: Box<dyn ModelCaller>,
        fallbacks: Vec<(String, Box<dyn ModelCaller>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &CadreError) -> bool {
    match e {
        CadreError::ModelCall { message, .. } => {
            message.contains("429")
                || message.contains("500")
                || message.contains("502")
                || message.contains("503")
                || message.contains("timeout")
                || message.contains("timed out")
                || message.contains("connection")
                || message.contains("error sending request")
        }
        CadreError::ModelTimeout { .. } => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelCaller for RetryingCaller {
    fn call_model(&self, request: ModelRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let role = request.role;

            // Try primary with retries
            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self.primary.call_model(request.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                %role,
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying model call"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            // Fallbacks run their own configured model, never the caller's override.
            if !self.fallbacks.is_empty() {
                info!(%role, "Primary model exhausted, trying fallback models");
            }
            let mut fallback_request = request;
            fallback_request.model_override = None;
            for (label, caller) in &self.fallbacks {
                match caller.call_model(fallback_request.clone()).await {
                    Ok(value) => {
                        info!(model = %label, %role, "Fell back to alternative model");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(model = %label, error = %e, "Fallback model also failed");
                        continue;
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| CadreError::ModelCall {
                role,
                message: "All models failed".into(),
            }))
        })
    }
}
