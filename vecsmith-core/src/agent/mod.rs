//! Generation agent: wraps the text-generation provider.
//!
//! Each call sends the persistent per-function system prompt and a single
//! user turn. Transient provider failures are retried with backoff; anything
//! that still fails yields `None`, which ends repair for that function.

pub mod prompts;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::brain::LlmProvider;
use crate::classifier::{OutcomeKind, VerificationOutcome};
use crate::config::{LlmConfig, RetryConfig};
use crate::extractor::TargetFunction;
use crate::providers::with_retry;
use crate::types::{CompletionRequest, Message};

pub use prompts::{INITIAL_USER_MESSAGE, repair_message, system_prompt};

/// Diagnosis of the previous attempt, fed into the next generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub kind: OutcomeKind,
    pub diagnostic: Option<String>,
    pub test_output: Option<String>,
    pub hint: Option<String>,
    /// Cleaned code of the rejected candidate.
    pub previous_code: String,
}

impl Feedback {
    pub fn from_outcome(outcome: &VerificationOutcome, previous_code: impl Into<String>) -> Self {
        Self {
            kind: outcome.kind,
            diagnostic: outcome.diagnostic.clone(),
            test_output: outcome.test_output.clone(),
            hint: outcome.hint.clone(),
            previous_code: previous_code.into(),
        }
    }
}

/// Raw model text plus the prompt pair that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub raw: String,
    pub system_prompt: String,
    pub user_prompt: String,
}

pub struct GenerationAgent {
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
    retry: RetryConfig,
}

impl GenerationAgent {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: LlmConfig, retry: RetryConfig) -> Self {
        Self {
            provider,
            llm,
            retry,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    fn request(&self, system: &str, user: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::system(system), Message::user(user)],
            temperature: self.llm.temperature,
            max_tokens: Some(self.llm.max_tokens),
            seed: self.llm.seed,
            model: None,
        }
    }

    /// Ask for a candidate. `None` when the provider keeps failing.
    pub async fn generate(
        &self,
        target: &TargetFunction,
        feedback: Option<&Feedback>,
    ) -> Option<GenerationOutput> {
        let system = system_prompt(target);
        let user = match feedback {
            Some(feedback) => repair_message(feedback),
            None => INITIAL_USER_MESSAGE.to_string(),
        };
        let request = self.request(&system, &user);

        let started = Instant::now();
        let result = with_retry(&self.retry, || self.provider.complete(request.clone())).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                info!(
                    function = %target.name,
                    repair = feedback.is_some(),
                    elapsed_ms,
                    output_tokens = response.usage.output_tokens,
                    "Candidate generated"
                );
                Some(GenerationOutput {
                    raw: response.text().to_string(),
                    system_prompt: system,
                    user_prompt: user,
                })
            }
            Err(e) => {
                warn!(
                    function = %target.name,
                    elapsed_ms,
                    error = %e,
                    "Generation failed"
                );
                None
            }
        }
    }
}
