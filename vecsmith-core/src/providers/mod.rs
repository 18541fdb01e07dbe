//! LLM provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait for:
//! - Anthropic Messages API (Claude models)
//! - OpenAI-compatible APIs (OpenAI, vLLM, Ollama, LM Studio)
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod anthropic;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::RetryConfig;
pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`), `LlmError::Overloaded`,
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth, parse,
/// malformed request) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries + 1,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Check if an error is retryable (transient).
pub fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. }
            | LlmError::Overloaded { .. }
            | LlmError::Connection { .. }
            | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    if let LlmError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs.saturating_mul(1000).min(config.max_backoff_ms);
        return server_ms.max(computed);
    }
    computed
}

/// Pure exponential backoff with optional jitter, in milliseconds.
///
/// Without jitter the result never exceeds `max_backoff_ms`; jitter adds at most 25%.
pub fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter && capped > 0 {
        let jitter = rand::thread_rng().gen_range(0..=capped / 4);
        capped + jitter
    } else {
        capped
    }
}

/// Read the API key named by `config.api_key_env`.
pub fn resolve_api_key(config: &LlmConfig) -> Result<String, LlmError> {
    std::env::var(&config.api_key_env).map_err(|_| LlmError::AuthFailed {
        provider: format!("{} (env var '{}' not set)", config.provider, config.api_key_env),
    })
}

/// Create the configured provider.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config)?)),
        "openai" | "openai_compat" | "vllm" | "ollama" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        other => Err(LlmError::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

/// Classify a reqwest transport failure.
pub(crate) fn map_transport_error(err: reqwest::Error, timeout_secs: u64) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout { timeout_secs }
    } else if err.is_connect() {
        LlmError::Connection {
            message: err.to_string(),
        }
    } else {
        LlmError::ApiRequest {
            message: err.to_string(),
        }
    }
}
