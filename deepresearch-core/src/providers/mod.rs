//! LLM provider implementations.
//!
//! Only OpenAI-compatible chat-completion endpoints are built in (OpenAI,
//! Azure, Ollama, vLLM, LM Studio). Use `create_provider()` to instantiate one
//! from configuration.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::{ConfigError, LlmError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`),
/// `LlmError::Connection` and `LlmError::Timeout`. Permanent errors (auth,
/// parse, 4xx) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) if !is_retryable(&e) || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let computed = base.min(config.max_backoff_ms as f64) as u64;
    match err {
        LlmError::RateLimited { retry_after_secs } => (retry_after_secs * 1000).max(computed),
        _ => computed,
    }
}

/// Create an LLM provider based on the configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    match config.provider.as_str() {
        "openai" | "azure" | "ollama" | "local" | "vllm" | "lmstudio" => {
            let provider = OpenAiCompatibleProvider::new(config).map_err(|e| match e {
                LlmError::AuthFailed { .. } => ConfigError::EnvVarMissing {
                    var: config.api_key_env.clone(),
                },
                other => ConfigError::Invalid {
                    message: other.to_string(),
                },
            })?;
            Ok(Arc::new(provider))
        }
        other => Err(ConfigError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}
