//! Error types for the vecsmith core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM, configuration, extraction, harness, verifier and
//! environment domains.

use std::path::PathBuf;

/// Top-level error type for the vecsmith core library.
#[derive(Debug, thiserror::Error)]
pub enum VecsmithError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Harness error: {0}")]
    Harness(#[from] HarnessError),

    #[error("Verifier error: {0}")]
    Verifier(#[from] VerifierError),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider overloaded: {message}")]
    Overloaded { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Benchmark source not readable at {path}: {message}")]
    SourceUnreadable { path: PathBuf, message: String },
}

/// Errors from locating benchmark functions in source text.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Function '{name}' not found in benchmark source")]
    NotFound { name: String },

    #[error("Function '{name}' has an unterminated body")]
    Unterminated { name: String },
}

/// Errors from harness synthesis. These indicate a broken setup, never a bad candidate.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Original function '{name}' not found in reference source")]
    OriginalNotFound { name: String },

    #[error("Candidate does not define '{expected}'")]
    MissingCandidate { expected: String },
}

/// Errors from the compile-and-run stage that are not verdicts about the candidate.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("Failed to prepare build directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },
}

/// Errors in the host environment, detected before any function is processed.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Compiler '{compiler}' is not usable: {message}")]
    CompilerUnavailable { compiler: String, message: String },

    #[error("Benchmark support file missing: {path}")]
    SupportFileMissing { path: PathBuf },

    #[error("Reference benchmark source missing: {path}")]
    ReferenceSourceMissing { path: PathBuf },
}

/// Convenience result type for vecsmith operations.
pub type Result<T> = std::result::Result<T, VecsmithError>;
