//! # Vecsmith Core
//!
//! Core library for vecsmith, an LLM-driven SIMD vectorization harness.
//! Provides benchmark extraction, harness synthesis, compile-and-run
//! verification, outcome classification, the generation agent and the
//! bounded repair loop that ties them together.

pub mod agent;
pub mod brain;
pub mod candidate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod experiment;
pub mod extractor;
pub mod harness;
pub mod providers;
pub mod repair;
pub mod types;
pub mod verifier;
pub mod workspace;

// Re-export commonly used types at the crate root.
pub use agent::{Feedback, GenerationAgent, GenerationOutput};
pub use brain::{LlmProvider, MockLlmProvider};
pub use candidate::{CandidateTransformation, CleanedFunction};
pub use classifier::{
    OutcomeClassifier, OutcomeKind, PerformanceSample, SpeedupStatus, VerificationOutcome,
};
pub use config::{VecsmithConfig, load_config};
pub use error::{
    ConfigError, EnvironmentError, ExtractError, HarnessError, LlmError, Result, VecsmithError,
    VerifierError,
};
pub use experiment::{ExperimentDriver, ExperimentReport, ExperimentSummary, FunctionSelection};
pub use extractor::{FunctionExtractor, TargetFunction};
pub use harness::{HarnessSynthesizer, SynthesizedHarness};
pub use repair::{
    AttemptRecord, FunctionResult, NoOpObserver, RepairLoop, RepairObserver, RepairState,
};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
pub use verifier::{CompilerVerifier, VectorizationReport, Verify, VerifierOutput};
pub use workspace::WorkspaceContext;
